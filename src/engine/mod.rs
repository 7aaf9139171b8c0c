//! The per-turn orchestrator.
//!
//! Sequences admission, validation, moderation, retrieval, history
//! management and generation for every inbound turn, and owns the
//! fail-open / fail-closed policy per collaborator:
//!
//! * validator, fail-closed: a validator that cannot answer blocks;
//! * moderator, fail-open: a moderator outage must not block all traffic,
//!   the lexical layer still covers known attacks;
//! * retriever, best-effort: failures degrade to "no augmentation";
//! * generator, fail-closed with rollback of the appended user turn.

pub mod probe;
pub mod system_prompt;
pub mod traits;

use crate::audit::AuditLog;
use crate::cloud::CredentialCache;
use crate::config::PalisadeConfig;
use crate::error::{Collaborator, DependencyError, RejectStage, TurnError};
use crate::governor::{CooldownLimiter, HeavyGate};
use crate::guard::LexicalFilter;
use crate::history::ConversationStore;
use crate::retrieval::NO_CONTEXT;
use crate::types::{ChatRole, ConversationId, ModerationStatus};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tracing::{info, warn};
use traits::{Generator, Moderator, Retriever, Validator};

/// External collaborators and the shared credential cache, bundled so the
/// engine constructor stays readable and tests can swap any seam.
pub struct Collaborators {
    pub credentials: Arc<CredentialCache>,
    pub validator: Arc<dyn Validator>,
    pub moderator: Arc<dyn Moderator>,
    pub retriever: Arc<dyn Retriever>,
    pub generator: Arc<dyn Generator>,
}

/// The turn-processing engine.
pub struct ChatEngine {
    config: PalisadeConfig,
    system_prompt: String,
    filter: LexicalFilter,
    store: ConversationStore,
    cooldown: CooldownLimiter,
    gate: HeavyGate,
    credentials: Arc<CredentialCache>,
    validator: Arc<dyn Validator>,
    moderator: Arc<dyn Moderator>,
    retriever: Arc<dyn Retriever>,
    generator: Arc<dyn Generator>,
    retrieval_enabled: Arc<AtomicBool>,
    audit: Option<Arc<Mutex<AuditLog>>>,
}

impl ChatEngine {
    pub fn new(
        config: PalisadeConfig,
        collaborators: Collaborators,
        audit: Option<AuditLog>,
    ) -> Self {
        let system_prompt = system_prompt::build_system_prompt(&config.system_prompt);
        let filter = LexicalFilter::new(config.detector_threshold);
        let store = ConversationStore::new(config.history_cap);
        let cooldown = CooldownLimiter::new(Duration::from_secs_f64(config.cooldown_secs));
        let gate = HeavyGate::new(config.heavy_concurrency);

        Self {
            system_prompt,
            filter,
            store,
            cooldown,
            gate,
            credentials: collaborators.credentials,
            validator: collaborators.validator,
            moderator: collaborators.moderator,
            retriever: collaborators.retriever,
            generator: collaborators.generator,
            // Assume reachable until the probe says otherwise.
            retrieval_enabled: Arc::new(AtomicBool::new(true)),
            audit: audit.map(|log| Arc::new(Mutex::new(log))),
            config,
        }
    }

    /// Flag flipped by the availability probe; retrieval is skipped while
    /// the search service is down.
    pub fn retrieval_enabled(&self) -> Arc<AtomicBool> {
        self.retrieval_enabled.clone()
    }

    pub fn credentials(&self) -> Arc<CredentialCache> {
        self.credentials.clone()
    }

    pub fn retriever(&self) -> Arc<dyn Retriever> {
        self.retriever.clone()
    }

    // -----------------------------------------------------------------------
    // Admin operations
    // -----------------------------------------------------------------------

    /// Forget a conversation's history.
    pub fn clear_history(&self, conversation_id: ConversationId) {
        self.store.clear(conversation_id);
        info!(conversation_id, "history cleared");
    }

    pub fn moderation_status(&self) -> ModerationStatus {
        ModerationStatus {
            enabled: self.config.moderation_enabled,
        }
    }

    /// Recent audit records, newest first (empty when auditing is off).
    pub async fn recent_rejections(&self, limit: usize) -> Vec<crate::audit::RejectionRecord> {
        match &self.audit {
            Some(audit) => audit.lock().await.recent(limit).unwrap_or_default(),
            None => Vec::new(),
        }
    }

    /// Total recorded rejections (0 when auditing is off).
    pub async fn rejection_count(&self) -> u64 {
        match &self.audit {
            Some(audit) => audit.lock().await.rejection_count().unwrap_or(0),
            None => 0,
        }
    }

    // -----------------------------------------------------------------------
    // Turn processing
    // -----------------------------------------------------------------------

    /// Process one inbound turn end to end and return the reply text.
    ///
    /// State machine: admission → validation → lexical + LLM moderation →
    /// retrieval → user append → generation → assistant append. Any abort
    /// maps to a [`TurnError`]; rejections before the user append leave
    /// history untouched, failures after it roll the user entry back.
    pub async fn handle_turn(
        &self,
        conversation_id: ConversationId,
        raw_text: &str,
    ) -> Result<String, TurnError> {
        let text = raw_text.trim();

        // Fast rejections: no resources acquired, no state touched.
        if !self.cooldown.admit(conversation_id).await {
            return Err(TurnError::RateLimited);
        }
        if text.is_empty() {
            return Err(TurnError::InputEmpty);
        }

        // Everything below is the expensive section.
        let _permit = self.gate.acquire().await;

        self.check_validator(conversation_id, text).await?;
        self.check_lexical(conversation_id, text).await?;
        self.check_moderation(conversation_id, text).await?;

        let user_entry = self.augment_with_context(text).await;

        self.store
            .ensure_system(conversation_id, &self.system_prompt)
            .await;
        self.store
            .append(conversation_id, ChatRole::User, &user_entry)
            .await;

        let reply = match self.generate(conversation_id).await {
            Ok(reply) => reply,
            Err(err) => {
                // A failed turn must not leave an orphaned user message.
                self.store.rollback_last_user(conversation_id).await;
                return Err(err);
            }
        };

        self.store
            .append(conversation_id, ChatRole::Assistant, &reply)
            .await;

        info!(conversation_id, "turn completed");
        Ok(reply)
    }

    /// Explicit validator, fail-closed: a credential failure, a transport
    /// failure and a "not allowed" all block the turn.
    async fn check_validator(
        &self,
        conversation_id: ConversationId,
        text: &str,
    ) -> Result<(), TurnError> {
        let credential = self.credentials.get().await?;

        let allowed = self
            .validator
            .validate(text, &credential, &self.config.folder_id)
            .await
            .map_err(|source| TurnError::DependencyUnavailable {
                collaborator: Collaborator::Validator,
                source,
            })?;

        if !allowed {
            self.reject(conversation_id, RejectStage::Validator, "not allowed", text)
                .await;
            return Err(TurnError::PolicyRejected {
                stage: RejectStage::Validator,
                signal: "not allowed".into(),
            });
        }
        Ok(())
    }

    async fn check_lexical(
        &self,
        conversation_id: ConversationId,
        text: &str,
    ) -> Result<(), TurnError> {
        let detection = self.filter.detect(text);
        if detection.is_suspicious {
            let signal = detection.top_signal().unwrap_or("unknown").to_string();
            self.reject(conversation_id, RejectStage::Lexical, &signal, text)
                .await;
            return Err(TurnError::PolicyRejected {
                stage: RejectStage::Lexical,
                signal,
            });
        }
        Ok(())
    }

    /// LLM moderation, fail-open: only an affirmative verdict blocks. A
    /// credential or transport failure logs and lets the turn proceed.
    async fn check_moderation(
        &self,
        conversation_id: ConversationId,
        text: &str,
    ) -> Result<(), TurnError> {
        if !self.config.moderation_enabled {
            return Ok(());
        }

        let credential = match self.credentials.get().await {
            Ok(c) => c,
            Err(e) => {
                warn!("moderation skipped, credential unavailable: {e}");
                return Ok(());
            }
        };

        match self.moderator.moderate(text, &credential).await {
            Ok(verdict) if verdict.is_block() => {
                self.reject(conversation_id, RejectStage::Moderation, "classifier", text)
                    .await;
                Err(TurnError::PolicyRejected {
                    stage: RejectStage::Moderation,
                    signal: "classifier".into(),
                })
            }
            Ok(_) => Ok(()),
            Err(e) => {
                warn!("moderation unavailable, proceeding: {e}");
                Ok(())
            }
        }
    }

    /// Best-effort context retrieval. The sentinel means "no augmentation";
    /// the comparison is by value, an empty context is not the sentinel.
    async fn augment_with_context(&self, text: &str) -> String {
        if !self.retrieval_enabled.load(Ordering::Relaxed) {
            return text.to_string();
        }

        let context = self
            .retriever
            .search(text, self.config.retrieval_top_k)
            .await;

        if context == NO_CONTEXT {
            return text.to_string();
        }

        format!(
            "Вопрос пользователя: {text}\n\n\
             Контекст из документов:\n{context}\n\n\
             Пожалуйста, используй этот контекст для более точного ответа \
             на вопрос пользователя."
        )
    }

    /// Generation over the bounded history, fail-closed. The caller rolls
    /// back the user entry on error.
    async fn generate(&self, conversation_id: ConversationId) -> Result<String, TurnError> {
        let credential = self.credentials.get().await?;
        let history = self.store.snapshot(conversation_id).await;

        self.generator
            .generate(&history, &credential)
            .await
            .map_err(|DependencyError(reason)| TurnError::GenerationFailed(reason))
    }

    async fn reject(
        &self,
        conversation_id: ConversationId,
        stage: RejectStage,
        signal: &str,
        text: &str,
    ) {
        warn!(conversation_id, %stage, signal, "turn rejected");
        if let Some(audit) = &self.audit {
            let audit = audit.lock().await;
            if let Err(e) = audit.record(conversation_id, &stage.to_string(), signal, text) {
                warn!("audit write failed: {e}");
            }
        }
    }
}
