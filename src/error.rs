//! Error taxonomy for the turn-processing pipeline.
//!
//! Every terminal outcome of a turn that is not a delivered reply is one of
//! these variants. The engine decides fail-open vs fail-closed per
//! collaborator; this module only names the outcomes and maps them to the
//! user-visible replies the transport sends.

use std::fmt;
use thiserror::Error;

/// The pipeline stage at which a policy rejection was decided.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RejectStage {
    Validator,
    Lexical,
    Moderation,
}

impl fmt::Display for RejectStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Validator => write!(f, "validator"),
            Self::Lexical => write!(f, "lexical"),
            Self::Moderation => write!(f, "moderation"),
        }
    }
}

/// External collaborators that can become unavailable mid-turn.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Collaborator {
    Validator,
    Moderator,
    Retriever,
    Generator,
}

impl fmt::Display for Collaborator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Validator => write!(f, "validator"),
            Self::Moderator => write!(f, "moderator"),
            Self::Retriever => write!(f, "retriever"),
            Self::Generator => write!(f, "generator"),
        }
    }
}

/// A failed call to an external collaborator (timeout, connect error,
/// unexpected status, malformed body).
#[derive(Debug, Error)]
#[error("{0}")]
pub struct DependencyError(pub String);

/// Credential issuance failure.
#[derive(Debug, Error)]
#[error("credential issuance failed: {0}")]
pub struct CredentialError(pub String);

/// Terminal outcome of a turn that did not produce a reply.
#[derive(Debug, Error)]
pub enum TurnError {
    /// Input was empty after trimming. No state was touched.
    #[error("empty input")]
    InputEmpty,

    /// Cooldown denied admission. No state was touched.
    #[error("rate limited by per-conversation cooldown")]
    RateLimited,

    /// The validator, lexical detector or moderator decided the message is
    /// unsafe. Logged with the matched signal for audit.
    #[error("policy rejected at {stage} stage: {signal}")]
    PolicyRejected { stage: RejectStage, signal: String },

    /// A bearer credential could not be obtained on a fail-closed path.
    #[error(transparent)]
    CredentialUnavailable(#[from] CredentialError),

    /// A fail-closed collaborator call did not complete.
    #[error("{collaborator} unavailable: {source}")]
    DependencyUnavailable {
        collaborator: Collaborator,
        source: DependencyError,
    },

    /// The generation call failed; the appended user turn was rolled back.
    #[error("generation failed: {0}")]
    GenerationFailed(String),
}

impl TurnError {
    /// The reply the transport should deliver for this outcome.
    ///
    /// Validator unavailability reads as a policy refusal: an explicit safety
    /// collaborator that cannot answer blocks the turn.
    pub fn user_message(&self) -> &'static str {
        match self {
            Self::InputEmpty => "Пожалуйста, введите вопрос",
            Self::RateLimited => "⏳ Слишком часто. Замедлитесь и попробуйте чуть позже.",
            Self::PolicyRejected { .. }
            | Self::DependencyUnavailable {
                collaborator: Collaborator::Validator,
                ..
            } => {
                "Я не могу обработать этот запрос. Пожалуйста, задавайте вопросы \
                 в рамках этичного и безопасного диалога."
            }
            Self::CredentialUnavailable(_)
            | Self::DependencyUnavailable { .. }
            | Self::GenerationFailed(_) => {
                "Извините, произошла ошибка при обработке вашего запроса. \
                 Пожалуйста, попробуйте позже."
            }
        }
    }
}
