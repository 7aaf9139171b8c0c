//! Collaborator contracts consumed by the turn engine.
//!
//! Each external service sits behind one of these traits so the pipeline can
//! be exercised with in-process fakes. The engine owns the fail-open /
//! fail-closed decision; implementations only report success or a typed
//! failure.

use crate::error::{CredentialError, DependencyError};
use crate::types::{ChatMessage, Credential, ModerationVerdict};
use async_trait::async_trait;

/// Explicit safety validator. The engine treats both `Ok(false)` and `Err`
/// as a blocked turn (fail-closed).
#[async_trait]
pub trait Validator: Send + Sync {
    async fn validate(
        &self,
        text: &str,
        credential: &Credential,
        tenant: &str,
    ) -> Result<bool, DependencyError>;
}

/// LLM-based moderator. The engine treats `Err` as "not blocked" (fail-open).
#[async_trait]
pub trait Moderator: Send + Sync {
    async fn moderate(
        &self,
        text: &str,
        credential: &Credential,
    ) -> Result<ModerationVerdict, DependencyError>;
}

/// Reply generation over the full bounded history.
#[async_trait]
pub trait Generator: Send + Sync {
    async fn generate(
        &self,
        history: &[ChatMessage],
        credential: &Credential,
    ) -> Result<String, DependencyError>;
}

/// Context search. Total: failures degrade to the no-context sentinel
/// inside the implementation, never to the caller.
#[async_trait]
pub trait Retriever: Send + Sync {
    async fn search(&self, query: &str, top_k: u32) -> String;

    /// Liveness check used by the availability probe.
    async fn ping(&self) -> bool {
        true
    }
}

/// Issues a fresh short-lived bearer credential.
#[async_trait]
pub trait CredentialIssuer: Send + Sync {
    async fn issue(&self) -> Result<Credential, CredentialError>;
}
