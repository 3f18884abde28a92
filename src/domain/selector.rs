//! Selector expressions and candidates
//!
//! Extraction rules are modeled as a tagged enum rather than opaque query
//! strings. Discovery, scoring and mutation all operate on the variants
//! directly, which keeps the generator portable across extraction backends:
//! each backend only needs one evaluator per variant.

use std::fmt;

use serde::{Deserialize, Serialize};

/// What kind of value a selector is expected to yield
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DataType {
    Price,
    Title,
    Multiple,
    Revenue,
    Status,
}

impl DataType {
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Price => "price",
            Self::Title => "title",
            Self::Multiple => "multiple",
            Self::Revenue => "revenue",
            Self::Status => "status",
        }
    }
}

impl fmt::Display for DataType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// How an attribute predicate matches its value
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AttrMatch {
    /// Attribute equals the value exactly
    Exact(String),
    /// Attribute contains the value as a substring
    Partial(String),
    /// Attribute merely exists
    Exists,
}

/// Structural relation between two expression halves
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Combinator {
    Descendant,
    Child,
    Sibling,
}

/// An extraction rule identifying where a data value lives on a page.
///
/// One evaluator per variant lives in `selector::page`; everything else in
/// the generator manipulates these values symbolically.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "by", rename_all = "snake_case")]
pub enum SelectorExpression {
    /// Element with a specific id attribute
    ById { id: String },
    /// Element carrying all listed classes, optionally narrowed by tag.
    /// An empty class list with a tag is a bare tag selector.
    ByClass {
        tag: Option<String>,
        classes: Vec<String>,
    },
    /// Element with an attribute predicate, optionally narrowed by tag
    ByAttribute {
        tag: Option<String>,
        name: String,
        matcher: AttrMatch,
    },
    /// N-th element of a tag among its siblings (zero-based)
    ByPosition { tag: String, nth: usize },
    /// Target expression constrained by an ancestor/sibling context
    ByRelation {
        anchor: Box<SelectorExpression>,
        combinator: Combinator,
        target: Box<SelectorExpression>,
    },
    /// Element whose trimmed text contains the pattern
    ByText { pattern: String },
}

impl SelectorExpression {
    /// Convenience constructor for a class selector with sorted classes,
    /// keeping structural comparison order-insensitive.
    #[must_use]
    pub fn classes(tag: Option<&str>, classes: &[&str]) -> Self {
        let mut cs: Vec<String> = classes.iter().map(|c| (*c).to_string()).collect();
        cs.sort();
        Self::ByClass {
            tag: tag.map(str::to_string),
            classes: cs,
        }
    }

    /// True when the expression (or any nested part) relies on sibling
    /// position; positional anchors are brittle against markup drift.
    #[must_use]
    pub fn is_positional(&self) -> bool {
        match self {
            Self::ByPosition { .. } => true,
            Self::ByRelation { anchor, target, .. } => {
                anchor.is_positional() || target.is_positional()
            }
            _ => false,
        }
    }

    /// True when anchored on an element id anywhere in the expression
    #[must_use]
    pub fn is_id_based(&self) -> bool {
        match self {
            Self::ById { .. } => true,
            Self::ByRelation { anchor, target, .. } => anchor.is_id_based() || target.is_id_based(),
            _ => false,
        }
    }

    /// True for a compound class selector (two or more classes)
    #[must_use]
    pub fn is_compound_class(&self) -> bool {
        match self {
            Self::ByClass { classes, .. } => classes.len() >= 2,
            Self::ByRelation { target, .. } => target.is_compound_class(),
            _ => false,
        }
    }

    /// True when any attribute predicate targets a data-* attribute
    #[must_use]
    pub fn has_data_attribute(&self) -> bool {
        match self {
            Self::ByAttribute { name, .. } => name.starts_with("data-"),
            Self::ByRelation { anchor, target, .. } => {
                anchor.has_data_attribute() || target.has_data_attribute()
            }
            _ => false,
        }
    }

    /// True for a selector that matches on tag name alone
    #[must_use]
    pub fn is_bare_tag(&self) -> bool {
        matches!(
            self,
            Self::ByClass { tag: Some(_), classes } if classes.is_empty()
        )
    }

    /// Human-readable form for logs and reports
    #[must_use]
    pub fn describe(&self) -> String {
        match self {
            Self::ById { id } => format!("#{id}"),
            Self::ByClass { tag, classes } => {
                let tag = tag.as_deref().unwrap_or("");
                if classes.is_empty() {
                    tag.to_string()
                } else {
                    format!("{tag}.{}", classes.join("."))
                }
            }
            Self::ByAttribute { tag, name, matcher } => {
                let tag = tag.as_deref().unwrap_or("");
                match matcher {
                    AttrMatch::Exact(v) => format!("{tag}[{name}=\"{v}\"]"),
                    AttrMatch::Partial(v) => format!("{tag}[{name}*=\"{v}\"]"),
                    AttrMatch::Exists => format!("{tag}[{name}]"),
                }
            }
            Self::ByPosition { tag, nth } => format!("{tag}:nth({nth})"),
            Self::ByRelation {
                anchor,
                combinator,
                target,
            } => {
                let sep = match combinator {
                    Combinator::Descendant => " ",
                    Combinator::Child => " > ",
                    Combinator::Sibling => " ~ ",
                };
                format!("{}{sep}{}", anchor.describe(), target.describe())
            }
            Self::ByText { pattern } => format!(":text(\"{pattern}\")"),
        }
    }
}

impl fmt::Display for SelectorExpression {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.describe())
    }
}

/// A scored selector produced by discovery or evolution
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SelectorCandidate {
    pub expression: SelectorExpression,
    pub data_type: DataType,
    /// 0-100, clamped; recomputed every time the candidate is tested
    pub confidence: u8,
    pub match_count: usize,
    pub is_unique: bool,
    /// Which discovery/mutation strategy produced this candidate
    pub strategy: String,
    /// Consecutive test failures; candidates are discarded when this
    /// stays high while confidence stays low
    pub consecutive_failures: u32,
}

impl SelectorCandidate {
    #[must_use]
    pub fn new(expression: SelectorExpression, data_type: DataType, strategy: impl Into<String>) -> Self {
        Self {
            expression,
            data_type,
            confidence: 0,
            match_count: 0,
            is_unique: false,
            strategy: strategy.into(),
            consecutive_failures: 0,
        }
    }

    /// Discard rule: repeatedly failing with low confidence
    #[must_use]
    pub fn should_discard(&self) -> bool {
        self.consecutive_failures >= 3 && self.confidence < 40
    }
}
