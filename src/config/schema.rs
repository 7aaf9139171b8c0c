//! Configuration schema for palisade.toml.

use serde::{Deserialize, Serialize};

/// Root configuration structure.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PalisadeConfig {
    /// Human-readable deployment name.
    pub name: String,

    /// Token issuance endpoint.
    pub iam_url: String,

    /// Foundation-models completion endpoint (generation and moderation).
    pub completion_url: String,

    /// External validator endpoint.
    pub validator_url: String,

    /// Context retrieval service base URL.
    pub retriever_url: String,

    /// Cloud tenant / folder identifier, attached to outbound calls.
    pub folder_id: String,

    /// Service account used for credential issuance.
    pub service_account_id: String,

    /// Key identifier for the service-account signing key.
    pub key_id: String,

    /// Path to the service-account private key (PEM, PS256).
    pub private_key_path: String,

    /// Model reference for reply generation.
    pub generation_model: String,

    /// Model reference for the LLM moderator.
    pub moderation_model: String,

    /// Whether LLM moderation runs at all.
    pub moderation_enabled: bool,

    /// Lexical detector threshold: 1 blocks on any hit (strict mode),
    /// 3 requires three weighted points (scored mode).
    pub detector_threshold: u32,

    /// Minimum seconds between admitted turns per conversation.
    pub cooldown_secs: f64,

    /// Process-wide cap on concurrent heavy operations.
    pub heavy_concurrency: usize,

    /// Maximum history entries per conversation (system entry included).
    pub history_cap: usize,

    /// Number of retrieval results requested per query.
    pub retrieval_top_k: u32,

    /// Seconds between availability probe ticks.
    pub probe_interval_secs: u64,

    /// Connect timeout for all outbound calls, seconds.
    pub connect_timeout_secs: u64,

    /// Read timeout for credential / validator / retrieval calls, seconds.
    pub short_timeout_secs: u64,

    /// Read timeout for moderation calls, seconds.
    pub moderation_timeout_secs: u64,

    /// Read timeout for generation calls, seconds.
    pub generation_timeout_secs: u64,

    /// Persona part of the system prompt; the security preamble is prepended.
    pub system_prompt: String,

    /// Path to the SQLite audit log. Empty disables auditing.
    pub audit_db_path: String,

    /// Log level (debug, info, warn, error).
    pub log_level: String,
}

impl Default for PalisadeConfig {
    fn default() -> Self {
        Self {
            name: String::new(),
            iam_url: "https://iam.api.cloud.yandex.net/iam/v1/tokens".into(),
            completion_url: "https://llm.api.cloud.yandex.net/foundationModels/v1/completion"
                .into(),
            validator_url: "http://localhost:8080/api/val".into(),
            retriever_url: "http://localhost:8082".into(),
            folder_id: String::new(),
            service_account_id: String::new(),
            key_id: String::new(),
            private_key_path: "~/.palisade/authorized_key.pem".into(),
            generation_model: String::new(),
            moderation_model: String::new(),
            moderation_enabled: true,
            detector_threshold: 1,
            cooldown_secs: 15.0,
            heavy_concurrency: 4,
            history_cap: 10,
            retrieval_top_k: 3,
            probe_interval_secs: 60,
            connect_timeout_secs: 3,
            short_timeout_secs: 7,
            moderation_timeout_secs: 15,
            generation_timeout_secs: 30,
            system_prompt: DEFAULT_PERSONA.trim().into(),
            audit_db_path: "~/.palisade/audit.db".into(),
            log_level: "info".into(),
        }
    }
}

impl PalisadeConfig {
    /// Resolve a path that may contain `~` to an absolute path.
    pub fn resolve_path(&self, path: &str) -> String {
        shellexpand::tilde(path).into_owned()
    }

    /// Resolved private key path.
    pub fn resolved_private_key_path(&self) -> String {
        self.resolve_path(&self.private_key_path)
    }

    /// Resolved audit DB path, or None when auditing is disabled.
    pub fn resolved_audit_db_path(&self) -> Option<String> {
        if self.audit_db_path.is_empty() {
            None
        } else {
            Some(self.resolve_path(&self.audit_db_path))
        }
    }

    /// Model URI for generation within this tenant.
    pub fn generation_model_uri(&self) -> String {
        if self.generation_model.is_empty() {
            format!("gpt://{}/yandexgpt-lite", self.folder_id)
        } else {
            self.generation_model.clone()
        }
    }

    /// Model URI for moderation; falls back to the generation model.
    pub fn moderation_model_uri(&self) -> String {
        if self.moderation_model.is_empty() {
            self.generation_model_uri()
        } else {
            self.moderation_model.clone()
        }
    }
}

const DEFAULT_PERSONA: &str = "
Ты — виртуальный консультант-ассистент.
• Отвечай достоверно и по существу; если информации недостаточно — честно говори об этом.
• Используй предоставленный контекст из документов как приоритетный источник.
• Объясняй сложные вещи простым языком.
";
