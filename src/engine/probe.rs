//! Supervised availability probe.
//!
//! A long-lived worker task owned by the process lifecycle: pings the
//! retrieval service and flips the engine's retrieval flag, and keeps the
//! credential cache warm so the first turn after startup does not pay the
//! issuance round-trip. Cancelled at shutdown via the process-wide token.

use crate::cloud::CredentialCache;
use crate::engine::traits::Retriever;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

pub struct AvailabilityProbe {
    retriever: Arc<dyn Retriever>,
    credentials: Arc<CredentialCache>,
    retrieval_enabled: Arc<AtomicBool>,
    interval: tokio::time::Duration,
}

impl AvailabilityProbe {
    pub fn new(
        retriever: Arc<dyn Retriever>,
        credentials: Arc<CredentialCache>,
        retrieval_enabled: Arc<AtomicBool>,
        interval: tokio::time::Duration,
    ) -> Self {
        Self {
            retriever,
            credentials,
            retrieval_enabled,
            interval,
        }
    }

    /// Run the probe loop (call from a tokio::spawn).
    ///
    /// The first tick runs immediately so startup reflects real
    /// availability; the loop exits cooperatively when `cancel` fires.
    pub async fn run(self, cancel: CancellationToken) {
        info!("availability probe started");

        loop {
            self.tick().await;

            tokio::select! {
                _ = tokio::time::sleep(self.interval) => {}
                _ = cancel.cancelled() => {
                    info!("availability probe shutting down");
                    return;
                }
            }
        }
    }

    async fn tick(&self) {
        let reachable = self.retriever.ping().await;
        let was = self.retrieval_enabled.swap(reachable, Ordering::Relaxed);
        if was != reachable {
            if reachable {
                info!("retrieval service reachable, augmentation enabled");
            } else {
                warn!("retrieval service unreachable, running without context search");
            }
        }

        // Warm the credential cache; get() refreshes only near expiry.
        match self.credentials.get().await {
            Ok(_) => debug!("credential preflight ok"),
            Err(e) => warn!("credential preflight failed: {e}"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::traits::CredentialIssuer;
    use crate::error::CredentialError;
    use crate::types::Credential;
    use async_trait::async_trait;

    struct DownRetriever;

    #[async_trait]
    impl Retriever for DownRetriever {
        async fn search(&self, _query: &str, _top_k: u32) -> String {
            crate::retrieval::NO_CONTEXT.to_string()
        }
        async fn ping(&self) -> bool {
            false
        }
    }

    struct StaticIssuer;

    #[async_trait]
    impl CredentialIssuer for StaticIssuer {
        async fn issue(&self) -> Result<Credential, CredentialError> {
            Ok(Credential {
                token: "t".into(),
                expires_at: chrono::Utc::now() + chrono::Duration::hours(1),
            })
        }
    }

    #[tokio::test]
    async fn tick_disables_retrieval_when_unreachable() {
        let flag = Arc::new(AtomicBool::new(true));
        let probe = AvailabilityProbe::new(
            Arc::new(DownRetriever),
            Arc::new(CredentialCache::new(Arc::new(StaticIssuer))),
            flag.clone(),
            tokio::time::Duration::from_secs(60),
        );

        probe.tick().await;
        assert!(!flag.load(Ordering::Relaxed));
    }

    #[tokio::test]
    async fn cancelled_probe_exits() {
        let flag = Arc::new(AtomicBool::new(true));
        let probe = AvailabilityProbe::new(
            Arc::new(DownRetriever),
            Arc::new(CredentialCache::new(Arc::new(StaticIssuer))),
            flag,
            tokio::time::Duration::from_secs(3600),
        );

        let cancel = CancellationToken::new();
        let handle = tokio::spawn(probe.run(cancel.clone()));
        cancel.cancel();
        tokio::time::timeout(tokio::time::Duration::from_secs(1), handle)
            .await
            .expect("probe did not shut down")
            .unwrap();
    }
}
