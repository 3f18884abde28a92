//! Heuristic discovery of new selector candidates
//!
//! When no working selector exists for a data type (or evolution ran out of
//! repairs), the page is scanned element by element for values that look
//! like the wanted data. Every hit is turned into candidate expressions,
//! which are kept only when they match uniquely or sit inside a structurally
//! repeating pattern - the shape listing grids have.

use once_cell::sync::Lazy;
use regex::Regex;

use crate::domain::listing::ListingStatus;
use crate::domain::selector::{AttrMatch, Combinator, DataType, SelectorCandidate, SelectorExpression};
use crate::selector::generator::confidence_score;
use crate::selector::page::{PageElement, PageSnapshot};

static CURRENCY_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"[$€£]\s*([\d,]+(?:\.\d+)?)").expect("currency regex"));
static MULTIPLE_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)\b(\d+(?:\.\d+)?)\s*x\b").expect("multiple regex"));

/// Minimum magnitude for a currency value to count as an asking price;
/// filters shipping fees and badges out of the candidate pool
const MIN_PRICE_MAGNITUDE: f64 = 1_000.0;
const MIN_REVENUE_MAGNITUDE: f64 = 50.0;

/// Parses the numeric part of a currency-like string
#[must_use]
pub fn parse_currency(text: &str) -> Option<f64> {
    let captures = CURRENCY_RE.captures(text)?;
    captures[1].replace(',', "").parse::<f64>().ok()
}

/// Parses a numeric-with-suffix multiple like "3.2x"
#[must_use]
pub fn parse_multiple(text: &str) -> Option<f64> {
    let captures = MULTIPLE_RE.captures(text)?;
    captures[1].parse::<f64>().ok()
}

/// Markup hint that a currency value is a revenue figure rather than an
/// asking price; keeps the two data types from adopting each other's
/// selectors on pages where both render as plain currency.
fn has_revenue_hint(el: &PageElement) -> bool {
    el.classes.iter().any(|c| c.contains("rev"))
        || el.id.as_deref().is_some_and(|id| id.contains("rev"))
        || el.attributes.iter().any(|(name, _)| name.contains("rev"))
}

/// Data-type specific signature: does this element's text look like the
/// wanted value?
fn signature_matches(data_type: DataType, el: &PageElement) -> bool {
    // Anchor on value nodes, not on wrapping containers
    if el.child_count > 1 || el.text.is_empty() {
        return false;
    }
    match data_type {
        DataType::Price => {
            parse_currency(&el.text).is_some_and(|v| v >= MIN_PRICE_MAGNITUDE)
                && !has_revenue_hint(el)
        }
        DataType::Revenue => {
            parse_currency(&el.text).is_some_and(|v| v >= MIN_REVENUE_MAGNITUDE)
                && has_revenue_hint(el)
        }
        DataType::Multiple => parse_multiple(&el.text).is_some(),
        DataType::Title => {
            let len = el.text.chars().count();
            (10..=120).contains(&len)
                && el.text.split_whitespace().count() >= 2
                && el.text.chars().next().is_some_and(char::is_alphanumeric)
        }
        DataType::Status => ListingStatus::parse_lenient(&el.text).is_some(),
    }
}

/// True when the element - or any ancestor - has a sibling with an
/// identical structural signature. Listing values usually live inside
/// repeated cards, so repetition anywhere up the chain qualifies.
fn in_repeating_pattern(page: &PageSnapshot, el: &PageElement) -> bool {
    let mut cursor = Some(el.index);
    while let Some(idx) = cursor {
        let current = &page.elements()[idx];
        let repeated = page.elements().iter().any(|other| {
            other.index != current.index
                && other.parent == current.parent
                && other.structural_signature() == current.structural_signature()
        });
        if repeated {
            return true;
        }
        cursor = current.parent;
    }
    false
}

/// Candidate expressions for one matched element, tagged by strategy
pub(crate) fn candidate_expressions(page: &PageSnapshot, el: &PageElement) -> Vec<(SelectorExpression, &'static str)> {
    let mut out = Vec::new();

    if let Some(id) = &el.id {
        out.push((SelectorExpression::ById { id: id.clone() }, "id-anchor"));
    }
    if !el.classes.is_empty() {
        out.push((
            SelectorExpression::ByClass {
                tag: Some(el.tag.clone()),
                classes: el.classes.clone(),
            },
            "class-pattern",
        ));
        out.push((
            SelectorExpression::ByClass {
                tag: None,
                classes: el.classes.clone(),
            },
            "class-pattern",
        ));
    }
    for (name, _) in &el.attributes {
        if name.starts_with("data-") {
            out.push((
                SelectorExpression::ByAttribute {
                    tag: Some(el.tag.clone()),
                    name: name.clone(),
                    matcher: AttrMatch::Exists,
                },
                "data-attribute",
            ));
        }
    }
    // Parent container context disambiguates generic value markup
    if let Some(parent) = el.parent.map(|p| &page.elements()[p]) {
        if !parent.classes.is_empty() {
            let target = if el.classes.is_empty() {
                SelectorExpression::ByClass {
                    tag: Some(el.tag.clone()),
                    classes: Vec::new(),
                }
            } else {
                SelectorExpression::ByClass {
                    tag: Some(el.tag.clone()),
                    classes: el.classes.clone(),
                }
            };
            out.push((
                SelectorExpression::ByRelation {
                    anchor: Box::new(SelectorExpression::ByClass {
                        tag: None,
                        classes: parent.classes.clone(),
                    }),
                    combinator: Combinator::Child,
                    target: Box::new(target),
                },
                "container-relation",
            ));
        }
    }
    out
}

/// Scans the page for elements matching the data type's heuristic
/// signature and returns ranked selector candidates: uniqueness first,
/// confidence second.
#[must_use]
pub fn discover_patterns(page: &PageSnapshot, data_type: DataType) -> Vec<SelectorCandidate> {
    let mut candidates: Vec<SelectorCandidate> = Vec::new();
    let mut seen = std::collections::HashSet::new();

    for el in page.elements() {
        if !signature_matches(data_type, el) {
            continue;
        }
        let repeating = in_repeating_pattern(page, el);

        for (expr, strategy) in candidate_expressions(page, el) {
            if !seen.insert(expr.clone()) {
                continue;
            }
            let match_count = page.select(&expr).len();
            let is_unique = match_count == 1;
            if !is_unique && !repeating {
                continue;
            }
            let mut candidate = SelectorCandidate::new(expr.clone(), data_type, strategy);
            candidate.match_count = match_count;
            candidate.is_unique = is_unique;
            candidate.confidence = confidence_score(&expr, is_unique);
            candidates.push(candidate);
        }
    }

    candidates.sort_by(|a, b| {
        b.is_unique
            .cmp(&a.is_unique)
            .then(b.confidence.cmp(&a.confidence))
            .then_with(|| a.expression.describe().cmp(&b.expression.describe()))
    });
    candidates
}
