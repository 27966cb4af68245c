//! Content bouncer: rule checks on generated text.
//!
//! Hard violations are a fixed set of patterns (formal address, apology or
//! meta talk) that warrant a rewrite by the model. Soft violations are
//! caller-supplied word stems that are simply cut out of the text.

use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use strum_macros::{Display, EnumString};
use tracing::warn;

static FORMAL_ADDRESS_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"\b(?:Sie|Ihnen|Ihr|Ihre|Ihrem|Ihren|Ihrer|Ihres)\b")
        .expect("formal address pattern is valid")
});

static APOLOGY_OR_META_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"(?i)(tut mir leid|sorry|ich kann nicht|kann ich nicht|ben[oö]tig|brauche.*info|bitte gib|mehr information|i'm sorry|can't comply|cannot comply|als ki)",
    )
    .expect("apology pattern is valid")
});

static HORIZONTAL_WS_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"[ \t]{2,}").expect("whitespace pattern is valid"));
static BLANK_LINES_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\n{3,}").expect("newline pattern is valid"));
static SPACE_BEFORE_PUNCT_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\s+([,.;:!?])").expect("punctuation pattern is valid"));

#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, EnumString, Display,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum ViolationKind {
    FormalAddress,
    ApologyOrMeta,
}

impl ViolationKind {
    /// Detection order used by [`scan`].
    pub const ALL: [ViolationKind; 2] = [ViolationKind::FormalAddress, ViolationKind::ApologyOrMeta];

    pub fn detect(&self, text: &str) -> bool {
        match self {
            ViolationKind::FormalAddress => FORMAL_ADDRESS_RE.is_match(text),
            ViolationKind::ApologyOrMeta => APOLOGY_OR_META_RE.is_match(text),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ViolationReport {
    pub hard: Vec<ViolationKind>,
    pub soft: Vec<String>,
}

impl ViolationReport {
    pub fn is_clean(&self) -> bool {
        self.hard.is_empty() && self.soft.is_empty()
    }

    pub fn has_hard(&self) -> bool {
        !self.hard.is_empty()
    }
}

/// Whole letter run containing `stem`, case-insensitive. `None` for blank stems.
fn stem_regex(stem: &str) -> Option<Regex> {
    let stem = stem.trim();
    if stem.is_empty() {
        return None;
    }
    let pattern = format!(r"(?i)\p{{L}}*{}\p{{L}}*", regex::escape(stem));
    match Regex::new(&pattern) {
        Ok(re) => Some(re),
        Err(e) => {
            warn!(stem_len = stem.len(), error = %e, "Skipping soft stem that does not compile");
            None
        }
    }
}

pub fn scan<S: AsRef<str>>(text: &str, soft_stems: &[S]) -> ViolationReport {
    let hard = ViolationKind::ALL
        .into_iter()
        .filter(|kind| kind.detect(text))
        .collect();

    let soft = soft_stems
        .iter()
        .map(|s| s.as_ref())
        .filter(|stem| stem_regex(stem).is_some_and(|re| re.is_match(text)))
        .map(str::to_string)
        .collect();

    ViolationReport { hard, soft }
}

fn normalize_whitespace(text: &str) -> String {
    let out = HORIZONTAL_WS_RE.replace_all(text, " ");
    let out = BLANK_LINES_RE.replace_all(&out, "\n\n");
    let out = SPACE_BEFORE_PUNCT_RE.replace_all(&out, "$1");
    out.trim().to_string()
}

pub fn strip_stems<S: AsRef<str>>(text: &str, stems: &[S]) -> String {
    let patterns: Vec<Regex> = stems.iter().filter_map(|s| stem_regex(s.as_ref())).collect();

    let mut current = text.to_string();
    // Normalizing can line up a new match (stems containing spaces), so repeat
    // until the text settles. Each changing pass makes the text shorter.
    loop {
        let mut next = current.clone();
        for re in &patterns {
            next = re.replace_all(&next, "").into_owned();
        }
        let next = normalize_whitespace(&next);
        if next == current {
            return next;
        }
        current = next;
    }
}

pub fn build_repair_prompt(text: &str, hard: &[ViolationKind]) -> String {
    let issues = hard
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join(", ");

    format!(
        r#"Du bist ein erfahrener Redakteur. Korrigiere den folgenden Text strikt.

HARD-RULES:
- Ausschließlich Du-Form (kein "Sie", kein "Ihnen", kein "Ihr/Ihre").
- Keine Entschuldigungen, kein "ich kann nicht", keine Meta-Kommentare.
- Keine Rückfragen nach mehr Informationen.

FORMAT:
- Gib NUR den korrigierten Text aus. Keine Einleitung, keine Erklärungen.

HINWEIS (Probleme gefunden): {issues}

TEXT:
{text}"#
    )
}
