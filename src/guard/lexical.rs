//! Rule-based threat detector for known prompt-injection phrasings.
//!
//! Runs entirely locally over normalized text. The rule corpus is bilingual
//! (English and Russian) and covers role override, instruction override,
//! secret exfiltration, safety bypass, encoding markers, delimiter injection,
//! training-data extraction and output-constraint manipulation.
//!
//! Scoring: every regex rule match weighs 1 point, every exact-phrase match
//! weighs 2. A message is suspicious once the weighted score reaches the
//! configured threshold: 1 blocks on any hit, 3 requires corroborating
//! signals.

use crate::guard::normalize;
use crate::types::Detection;
use regex::Regex;
use std::sync::LazyLock;
use tracing::warn;

/// Weight of a single regex rule match.
const REGEX_WEIGHT: u32 = 1;
/// Weight of an exact-phrase match.
const PHRASE_WEIGHT: u32 = 2;

/// Rule corpus, applied to normalized (lowercased) text.
const INJECTION_PATTERNS: &[&str] = &[
    // Role override
    r"\byou are\b.*?\b(an?|the)\b.*?\b(assistant|ai|bot|llm|model|hacker|friend|god|master)\b",
    r"\bact\s+as\s+(if\s+you\s+are|a)\b",
    r"\bas\s+a\s+(friend|developer|admin|god|expert|hacker)\b",
    r"\bpretend\s+to\s+be\b",
    r"\breset\s+your\s+identity\b",
    r"\bfrom\s+now\s+on\b",
    r"\bты\s+должен\b.*?\b(игнорировать|забыть|сменить)\b",
    r"\bстань\s+(хакером|админом|разработчиком)\b",
    r"\bизмени\s+поведение\b",
    // Instruction override
    r"\bignore\s+previous\s+instructions?\b",
    r"\bdisregard\s+all\s+prior\s+prompts?\b",
    r"\boverride\s+system\s+rules\b",
    r"\bnew\s+instructions?\b.*?\b(from|given|are)\b",
    r"\bstop\s+following\s+polic(y|ies)\b",
    r"\bне\s+следуй\s+предыдущим\s+инструкциям\b",
    r"\bзабудь\b(?:\s+\S+)*?\s+инструкции\b",
    r"\bигнорируй\s+политику\b",
    r"\bпроигнорируй\s+запрет\b",
    r"\bнарушь\s+правила\b",
    // System prompt / internal state disclosure
    r"\byour instructions\b",
    r"\byour prompt\b",
    r"\bsystem prompt\b",
    r"\bsystem\s*[:=]\s*",
    r"\bwhat\s+is\s+your\s+prompt\b",
    r"\bshow\s+internal\b",
    r"\binternal\s+state\b",
    r"\bhidden\s+instructions\b",
    r"\bconversation\s+log\b",
    r"\bshow\s+your\s+chain\s+of\s+thought\b",
    r"\bвыведи\s+весь\s+промпт\b",
    r"\bпокажи\s+системный\s+промпт\b",
    r"\bпокажи\s+историю\s+диалога\b",
    r"\bраскрой\s+свою\s+цепочку\s+мыслей\b",
    r"\bпокажи\s+исходный\s+код\b",
    r"\bвыведи\s+конфигурацию\b",
    // Secret / credential exfiltration
    r"\b(api[_\s-]?key|ssh[-_]?key|private[_\s-]?key)\b",
    r"\bpassword\b",
    r"\bpassphrase\b",
    r"\bsecret\s+word\b",
    r"\bcredit\s+card\b",
    r"\bcard\s+number\b",
    r"\bвыведи\s+api[-_\s]?ключ\b",
    r"\bотдай\s+токен\b",
    r"\bдай\s+пароль\b",
    r"\bраскрой\s+секрет(ы)?\b",
    // Safety bypass / privileged modes
    r"\bdisable\s+(safety|filters|moderation|policy|guardrails)\b",
    r"\bturn\s+off\s+(safety|filters|moderation)\b",
    r"\bno\s+safety\b",
    r"\bdeveloper\s+mode\b",
    r"\bjailbreak\b",
    r"\broot\s+mode\b",
    r"\bsuperuser\b",
    r"\bunlock\s+hidden\s+features\b",
    r"\bвключи\s+режим\s+(разработчика|администратора|хакера)\b",
    r"\bотключи\s+ограничения\b",
    r"\bобход\s+фильтров\b",
    r"\bобойди\s+защиту\b",
    r"\bзабудь\s+про\s+безопасность\b",
    // Encoding / obfuscation markers
    r"\bbase64\b",
    r"\brot13\b",
    r"\b0x[0-9a-f]{8,}\b",
    r"\b0b[01]{8,}\b",
    r"\bdecode\s+this\b",
    r"\bпереведи\s+из\s+base64\b",
    r"\bраскодируй\s+это\b",
    r"data:text/\S+;base64,",
    // Delimiter injection
    r"----+",
    r"#####",
    r"~{3,}",
    r"<!--.*?-->",
    r"\[hidden\]",
    r"\[system\]",
    r"\[instructions\]",
    r"\bignore\s+all\s+text\s+before\b",
    r"\btake\s+only\s+the\s+text\s+between\b",
    r"\bигнорируй\s+всё\s+до\b",
    r"\bбери\s+только\s+текст\s+между\b",
    // Training-data extraction
    r"\bprovide\s+training\s+data\b",
    r"\bshow\s+examples\s+from\s+your\s+training\b",
    r"\bпокажи\s+данные\s+обучения\b",
    r"\bвыведи\s+примеры\s+из\s+обучения\b",
    // Output-constraint manipulation
    r"\boutput\s+only\b",
    r"\bonly\s+output\b",
    r"\breturn\s+only\b",
    r"\bdo\s+not\s+say\b",
    r"\brepeat\s+after\s+me\b",
    r"\bне\s+говори\b.*?\b(это|что|никому)\b",
    r"\bбез\s+объяснений\b",
    r"\bтолько\s+выведи\b",
    r"\bне\s+объясняй\b",
    r"\bповтори\s+за\s+мной\b",
];

/// High-confidence exact phrases (substring match on normalized text).
const BLOCKED_PHRASES: &[&str] = &[
    "ignore previous instructions",
    "disregard all prior prompts",
    "enable developer mode",
    "не следуй предыдущим инструкциям",
    "забудь все инструкции",
    "включи режим разработчика",
];

static COMPILED_PATTERNS: LazyLock<Vec<Regex>> = LazyLock::new(|| {
    INJECTION_PATTERNS
        .iter()
        .map(|p| Regex::new(p).expect("injection pattern must compile"))
        .collect()
});

/// Offline lexical threat detector.
///
/// All patterns are compiled once per process; `detect` is pure CPU with
/// bounded cost and no failure mode beyond "no match".
#[derive(Debug, Clone)]
pub struct LexicalFilter {
    threshold: u32,
}

impl LexicalFilter {
    pub fn new(threshold: u32) -> Self {
        // Force compilation at construction rather than first detection.
        let _ = COMPILED_PATTERNS.len();
        Self {
            threshold: threshold.max(1),
        }
    }

    /// Run one detection pass over raw input.
    pub fn detect(&self, raw: &str) -> Detection {
        let text = normalize(raw);

        let regex_hits: Vec<String> = COMPILED_PATTERNS
            .iter()
            .filter(|p| p.is_match(&text))
            .map(|p| p.as_str().to_string())
            .collect();

        let phrase_hits: Vec<String> = BLOCKED_PHRASES
            .iter()
            .filter(|phrase| text.contains(*phrase))
            .map(|phrase| phrase.to_string())
            .collect();

        let score =
            regex_hits.len() as u32 * REGEX_WEIGHT + phrase_hits.len() as u32 * PHRASE_WEIGHT;
        let is_suspicious = score >= self.threshold;

        if is_suspicious {
            warn!(
                score,
                threshold = self.threshold,
                ?regex_hits,
                ?phrase_hits,
                "lexical detector flagged message"
            );
        }

        Detection {
            is_suspicious,
            score,
            regex_hits,
            phrase_hits,
        }
    }
}
