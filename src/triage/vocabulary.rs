//! Fixed vocabularies for rule-based classification.
//!
//! Every table is an explicitly ordered slice. Where iteration order affects
//! output (category tie-break, label order) the slice order is the contract.

use super::types::{Category, EntityTag};

/// Urgency terms (Portuguese + English). Matched as substrings.
pub static URGENCY_TERMS: &[&str] = &[
    "urgente",
    "importante",
    "crítico",
    "emergência",
    "imediato",
    "prazo",
    "deadline",
    "urgent",
    "asap",
];

/// Category dictionary. Order is the tie-break order.
pub static CATEGORY_TERMS: &[(Category, &[&str])] = &[
    (
        Category::Financial,
        &["pagamento", "fatura", "cobrança", "orçamento", "invoice", "payment"],
    ),
    (
        Category::Support,
        &["problema", "erro", "bug", "ajuda", "support", "help"],
    ),
    (
        Category::Sales,
        &["proposta", "venda", "cliente", "reunião", "meeting", "sales"],
    ),
    (
        Category::Hr,
        &["férias", "contrato", "ponto", "vacation", "contract", "hr"],
    ),
    (
        Category::It,
        &["sistema", "acesso", "senha", "system", "password", "access"],
    ),
];

/// Reduced dictionary (five terms per category) used for the confidence factor.
pub static CONFIDENCE_CATEGORY_TERMS: &[(Category, &[&str])] = &[
    (
        Category::Financial,
        &["pagamento", "fatura", "cobrança", "orçamento", "invoice"],
    ),
    (
        Category::Support,
        &["problema", "erro", "bug", "ajuda", "support"],
    ),
    (
        Category::Sales,
        &["proposta", "venda", "cliente", "reunião", "meeting"],
    ),
    (
        Category::Hr,
        &["férias", "contrato", "ponto", "vacation", "contract"],
    ),
    (
        Category::It,
        &["sistema", "acesso", "senha", "system", "password"],
    ),
];

/// Topic labels matched against the lower-cased body.
pub static TOPIC_TERMS: &[(&str, &[&str])] = &[
    (
        "project",
        &["projeto", "project", "desenvolvimento", "development"],
    ),
    ("meeting", &["reunião", "meeting", "agenda", "scheduling"]),
    ("document", &["documento", "document", "contrato", "contract"]),
    ("training", &["treinamento", "training", "curso", "course"]),
];

/// Labels derived from entity tags. DATE and TIME produce no label.
pub static ENTITY_LABELS: &[(EntityTag, &str)] = &[
    (EntityTag::Person, "person"),
    (EntityTag::Organization, "organization"),
    (EntityTag::Location, "location"),
    (EntityTag::Product, "product"),
];

/// Phrases that turn a sentence into a candidate task.
pub static ACTION_PHRASES: &[&str] = &[
    "por favor",
    "preciso",
    "necessário",
    "favor",
    "please",
    "need",
    "deve",
    "should",
    "must",
    "poderia",
    "could",
    "can you",
];

/// Relative date terms, in match order, with their day/month offsets.
pub static RELATIVE_DATE_TERMS: &[(&str, RelativeOffset)] = &[
    ("today", RelativeOffset::Days(0)),
    ("hoje", RelativeOffset::Days(0)),
    ("tomorrow", RelativeOffset::Days(1)),
    ("amanhã", RelativeOffset::Days(1)),
    ("amanha", RelativeOffset::Days(1)),
    ("next week", RelativeOffset::Days(7)),
    ("próxima semana", RelativeOffset::Days(7)),
    ("semana que vem", RelativeOffset::Days(7)),
    ("next month", RelativeOffset::Months(1)),
    ("próximo mês", RelativeOffset::Months(1)),
    ("mês que vem", RelativeOffset::Months(1)),
];

/// Offset applied to "now" for a relative date term.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RelativeOffset {
    Days(i64),
    Months(u32),
}

/// Number of distinct `terms` occurring in `text` (substring match).
pub fn count_matches(text: &str, terms: &[&str]) -> usize {
    terms.iter().filter(|term| text.contains(*term)).count()
}

/// Whether any of `terms` occurs in `text`.
pub fn any_match(text: &str, terms: &[&str]) -> bool {
    terms.iter().any(|term| text.contains(term))
}

/// Every lower-cased word appearing in a classification vocabulary.
pub fn vocabulary_words() -> impl Iterator<Item = &'static str> {
    let categories = CATEGORY_TERMS
        .iter()
        .chain(CONFIDENCE_CATEGORY_TERMS)
        .flat_map(|(_, terms)| terms.iter());
    let topics = TOPIC_TERMS.iter().flat_map(|(_, terms)| terms.iter());
    let relative = RELATIVE_DATE_TERMS.iter().map(|(term, _)| term);

    URGENCY_TERMS
        .iter()
        .chain(categories)
        .chain(topics)
        .chain(ACTION_PHRASES)
        .chain(relative)
        .flat_map(|phrase| phrase.split_whitespace())
        .chain(["day", "dia"])
}
