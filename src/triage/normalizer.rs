//! Text normalizer: the seam to the text-analysis toolkit.
//!
//! `TextAnalyzer` turns subject + body into a `NormalizedDocument`
//! (sentences + named entities). `RuleAnalyzer` is the built-in
//! implementation: stopword removal for one language, punctuation-based
//! sentence segmentation and regex entity extraction. No learned model.

use std::str::FromStr;
use std::sync::LazyLock;

use regex::Regex;

use crate::error::NormalizeError;
use crate::triage::types::{Entity, EntityTag, NormalizedDocument, Sentence};
use crate::triage::vocabulary::RELATIVE_DATE_TERMS;

/// Language whose stopwords are removed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Language {
    Portuguese,
    English,
}

impl Language {
    pub fn code(self) -> &'static str {
        match self {
            Self::Portuguese => "pt",
            Self::English => "en",
        }
    }

    fn stopwords(self) -> &'static [&'static str] {
        match self {
            Self::Portuguese => PORTUGUESE_STOPWORDS,
            Self::English => ENGLISH_STOPWORDS,
        }
    }
}

impl FromStr for Language {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "pt" | "pt-br" | "pt_br" | "portuguese" => Ok(Self::Portuguese),
            "en" | "en-us" | "en_us" | "english" => Ok(Self::English),
            other => Err(format!("unsupported language: {other}")),
        }
    }
}

/// Text-analysis toolkit contract.
pub trait TextAnalyzer: Send + Sync {
    /// Normalize `text` into a document. Failure aborts only the current message.
    fn normalize(&self, text: &str) -> Result<NormalizedDocument, NormalizeError>;
}

// Never list a word used by a classification vocabulary here: stripping it
// would hide a match ("por favor", "semana que vem", "can you").
static PORTUGUESE_STOPWORDS: &[&str] = &[
    "a", "à", "ao", "aos", "as", "às", "o", "os", "um", "uma", "uns", "umas", "de", "do", "da",
    "dos", "das", "no", "na", "nos", "nas", "em", "num", "numa", "pelo", "pela", "pelos",
    "pelas", "para", "pra", "com", "sem", "sob", "e", "é", "ou", "mas", "se", "como", "mais",
    "muito", "já", "também", "só", "eu", "tu", "ele", "ela", "nós", "eles", "elas", "me", "te",
    "lhe", "lhes", "meu", "minha", "meus", "minhas", "seu", "sua", "seus", "suas", "nosso",
    "nossa", "este", "esta", "isto", "esse", "essa", "isso", "aquele", "aquela", "aquilo",
    "foi", "era", "ser", "está", "estão", "são", "tem", "há", "quando", "onde", "até", "sobre",
    "entre", "depois", "antes", "ainda", "então", "não",
];

static ENGLISH_STOPWORDS: &[&str] = &[
    "a", "an", "the", "and", "or", "but", "of", "to", "in", "on", "at", "by", "for", "with",
    "from", "as", "is", "are", "was", "were", "be", "been", "it", "its", "this", "that",
    "these", "those", "i", "we", "they", "he", "she", "me", "us", "them", "my", "our", "your",
    "his", "her", "their", "so", "if", "then", "than", "there", "here", "about", "into", "over",
    "also", "just", "very", "do", "does", "did", "have", "has", "had",
];

/// Words ending in '.' that do not close a sentence.
static ABBREVIATIONS: &[&str] = &[
    "sr", "sra", "dr", "dra", "mr", "mrs", "ms", "prof", "av", "st", "ave", "etc", "ex",
];

static DATE_PATTERNS: LazyLock<Vec<Regex>> = LazyLock::new(|| {
    let relative = RELATIVE_DATE_TERMS
        .iter()
        .map(|(term, _)| regex::escape(term))
        .collect::<Vec<_>>()
        .join("|");
    vec![
        Regex::new(r"\b\d{1,2}[/.\-]\d{1,2}[/.\-](?:\d{4}|\d{2})\b").expect("valid numeric date regex"),
        Regex::new(r"\b\d{4}[/\-]\d{2}[/\-]\d{2}\b").expect("valid iso date regex"),
        Regex::new(&format!(r"(?i)\b(?:{relative})\b")).expect("valid relative date regex"),
        Regex::new(r"(?i)\b(?:day|dia)\s+\d{1,2}\b").expect("valid day marker regex"),
    ]
});

static TIME_PATTERNS: LazyLock<Vec<Regex>> = LazyLock::new(|| {
    vec![
        Regex::new(r"(?i)\b\d{1,2}:\d{2}(?:\s?[ap]m)?\b").expect("valid clock regex"),
        Regex::new(r"(?i)\b\d{1,2}\s?[ap]m\b").expect("valid am/pm regex"),
        Regex::new(r"\b\d{1,2}h(?:\d{2})?\b").expect("valid hour regex"),
    ]
});

static PERSON_PATTERNS: LazyLock<Vec<Regex>> = LazyLock::new(|| {
    vec![
        Regex::new(r"\b(?:Sr|Sra|Dr|Dra|Mr|Mrs|Ms|Prof)\.?\s+\p{Lu}\p{Ll}+(?:\s+\p{Lu}\p{Ll}+)*")
            .expect("valid person regex"),
    ]
});

static ORGANIZATION_PATTERNS: LazyLock<Vec<Regex>> = LazyLock::new(|| {
    vec![
        Regex::new(
            r"\b\p{Lu}[\p{L}&]*(?:\s+\p{Lu}[\p{L}&]*)*\s+(?:Ltda|S\.A|S/A|Inc|Corp|LLC|Ltd|GmbH)\b\.?",
        )
        .expect("valid organization regex"),
    ]
});

static LOCATION_PATTERNS: LazyLock<Vec<Regex>> = LazyLock::new(|| {
    vec![
        Regex::new(
            r"\b(?:Rua|Avenida|Av\.|Praça|Alameda|Rodovia)\s+\p{Lu}\p{L}*(?:\s+\p{Lu}\p{L}*)*(?:,?\s+\d+)?",
        )
        .expect("valid pt address regex"),
        Regex::new(r"\b(?:\d+\s+)?\p{Lu}\p{L}*(?:\s+\p{Lu}\p{L}*)*\s+(?:Street|Avenue|Road|Boulevard)\b")
            .expect("valid en address regex"),
    ]
});

static PRODUCT_PATTERNS: LazyLock<Vec<Regex>> = LazyLock::new(|| {
    vec![
        Regex::new(r"\b\p{Ll}?\p{Lu}\p{L}+\s+(?:v\d+(?:\.\d+)*|\d+\.\d+(?:\.\d+)*)\b")
            .expect("valid versioned product regex"),
        Regex::new(r"\b\p{Ll}?\p{Lu}\p{L}+\s+\d+\s+(?:Pro|Plus|Max|Ultra|Mini)\b")
            .expect("valid product line regex"),
    ]
});

/// Built-in rule-based analyzer.
#[derive(Debug, Clone)]
pub struct RuleAnalyzer {
    language: Language,
    max_input_chars: usize,
}

impl RuleAnalyzer {
    pub fn new(language: Language, max_input_chars: usize) -> Self {
        Self {
            language,
            max_input_chars,
        }
    }

    pub fn language(&self) -> Language {
        self.language
    }

    fn is_stopword(&self, word: &str) -> bool {
        self.language.stopwords().contains(&word)
    }

    /// Remove stopwords, keeping case, line breaks and sentence punctuation.
    pub fn strip_stopwords(&self, text: &str) -> String {
        text.lines()
            .map(|line| self.strip_line(line))
            .collect::<Vec<_>>()
            .join("\n")
    }

    fn strip_line(&self, line: &str) -> String {
        let mut out = String::with_capacity(line.len());
        for token in line.split_whitespace() {
            let core = token.trim_matches(|c: char| !c.is_alphanumeric());
            if !core.is_empty() && self.is_stopword(&core.to_lowercase()) {
                let kept = token.trim_end_matches(['.', '!', '?']);
                out.push_str(&token[kept.len()..]);
                continue;
            }
            if !out.is_empty() {
                out.push(' ');
            }
            out.push_str(token);
        }
        out
    }
}

impl Default for RuleAnalyzer {
    fn default() -> Self {
        Self::new(Language::Portuguese, 200_000)
    }
}

impl TextAnalyzer for RuleAnalyzer {
    fn normalize(&self, text: &str) -> Result<NormalizedDocument, NormalizeError> {
        let len = text.chars().count();
        if len > self.max_input_chars {
            return Err(NormalizeError::InputTooLarge {
                len,
                max: self.max_input_chars,
            });
        }
        if text.contains('\0') {
            return Err(NormalizeError::Malformed("input contains NUL bytes".into()));
        }

        let cleaned = self.strip_stopwords(text);
        let sentences = split_sentences(&cleaned);
        let entities = extract_entities(&cleaned);
        Ok(NormalizedDocument::new(cleaned, sentences, entities))
    }
}

/// Split on `.`, `!`, `?` (followed by whitespace or end) and line breaks.
pub fn split_sentences(text: &str) -> Vec<Sentence> {
    let mut sentences = Vec::new();
    let mut start = 0;

    for (idx, ch) in text.char_indices() {
        let end = idx + ch.len_utf8();
        let followed_by_space = text[end..].chars().next().is_none_or(char::is_whitespace);
        let boundary = match ch {
            '\n' => true,
            '!' | '?' => followed_by_space,
            '.' => followed_by_space && !ends_with_abbreviation(&text[start..idx]),
            _ => false,
        };
        if boundary {
            push_sentence(text, start, end, &mut sentences);
            start = end;
        }
    }
    push_sentence(text, start, text.len(), &mut sentences);
    sentences
}

fn push_sentence(text: &str, start: usize, end: usize, out: &mut Vec<Sentence>) {
    let slice = &text[start..end];
    let trimmed = slice.trim();
    if trimmed.is_empty() {
        return;
    }
    let offset = start + (slice.len() - slice.trim_start().len());
    out.push(Sentence {
        text: trimmed.to_string(),
        start: offset,
        end: offset + trimmed.len(),
    });
}

fn ends_with_abbreviation(prefix: &str) -> bool {
    let Some(word) = prefix.split_whitespace().last() else {
        return false;
    };
    let word = word.trim_start_matches(|c: char| !c.is_alphanumeric());
    if word.contains('.') {
        // Initials such as "S.A."
        return true;
    }
    let mut chars = word.chars();
    if let (Some(first), None) = (chars.next(), chars.next()) {
        return first.is_uppercase();
    }
    ABBREVIATIONS.contains(&word.to_lowercase().as_str())
}

/// Extract non-overlapping entities in document order.
pub fn extract_entities(text: &str) -> Vec<Entity> {
    let groups: [(EntityTag, &[Regex]); 6] = [
        (EntityTag::Date, DATE_PATTERNS.as_slice()),
        (EntityTag::Time, TIME_PATTERNS.as_slice()),
        (EntityTag::Person, PERSON_PATTERNS.as_slice()),
        (EntityTag::Organization, ORGANIZATION_PATTERNS.as_slice()),
        (EntityTag::Location, LOCATION_PATTERNS.as_slice()),
        (EntityTag::Product, PRODUCT_PATTERNS.as_slice()),
    ];

    // (start, end, group rank, tag)
    let mut candidates: Vec<(usize, usize, usize, EntityTag)> = Vec::new();
    for (rank, (tag, patterns)) in groups.iter().enumerate() {
        for pattern in patterns.iter() {
            for m in pattern.find_iter(text) {
                candidates.push((m.start(), m.end(), rank, *tag));
            }
        }
    }

    // Leftmost first, then longest, then group rank.
    candidates.sort_by(|a, b| a.0.cmp(&b.0).then(b.1.cmp(&a.1)).then(a.2.cmp(&b.2)));

    let mut entities = Vec::new();
    let mut covered_until = 0;
    for (start, end, _, tag) in candidates {
        if start < covered_until {
            continue;
        }
        entities.push(Entity {
            text: text[start..end].to_string(),
            tag,
            start,
            end,
        });
        covered_until = end;
    }
    entities
}
