//! Clients for the cloud foundation-model stack: credential issuance and
//! caching, completion, and LLM moderation.

pub mod completion;
pub mod iam;
pub mod moderation;

pub use completion::{CompletionClient, CompletionOptions, GenerationClient};
pub use iam::{CredentialCache, IamTokenIssuer};
pub use moderation::ModerationClient;
