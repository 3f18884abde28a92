//! Selector evolution: score, repair, simplify
//!
//! Selectors degrade as the site's markup drifts. Each currently-used
//! selector is scored against data the last healthy run produced; broken
//! ones are repaired along one of two paths (structural similarity search
//! when nothing matches anymore, re-specialization when the selector
//! over-matches) and healthy ones are opportunistically simplified when a
//! simpler form provably matches the same elements.

use std::collections::HashSet;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::domain::selector::{DataType, SelectorCandidate, SelectorExpression};
use crate::selector::discovery::candidate_expressions;
use crate::selector::generator::{confidence_score, simplify, specialize};
use crate::selector::page::{PageElement, PageSnapshot};

/// Quality threshold below which a selector is repaired instead of kept
const QUALITY_FLOOR: f64 = 0.8;

/// How many structurally similar elements are considered for regeneration
const SIMILARITY_POOL: usize = 5;

/// One currently-used selector plus what it just extracted
#[derive(Debug, Clone)]
pub struct CurrentResult {
    pub data_type: DataType,
    pub expression: SelectorExpression,
    pub extracted: Vec<String>,
}

/// What happened to one selector during evolution
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EvolutionAction {
    /// Quality fine, no safe simplification available
    Kept,
    /// Quality fine and a simpler equivalent form was adopted
    Simplified,
    /// Over-matching selector narrowed back to a single match
    Respecialized,
    /// Dead selector rebuilt from structurally similar elements
    Regenerated,
    /// No repair found; caller should fall back to discovery
    NoCandidate,
}

/// Evolution verdict for one selector
#[derive(Debug, Clone)]
pub struct EvolutionReport {
    pub data_type: DataType,
    pub original: SelectorExpression,
    pub quality: f64,
    pub action: EvolutionAction,
    pub replacement: Option<SelectorCandidate>,
}

/// Extraction-quality score in [0,1]: the fraction of expected values the
/// selector still finds. With no expectations, any output counts as good.
#[must_use]
pub fn extraction_quality(extracted: &[String], expected: &[String]) -> f64 {
    if expected.is_empty() {
        return if extracted.is_empty() { 0.0 } else { 1.0 };
    }
    let normalized: HashSet<String> = extracted.iter().map(|s| s.trim().to_string()).collect();
    let found = expected
        .iter()
        .filter(|want| normalized.contains(want.trim()))
        .count();
    found as f64 / expected.len() as f64
}

/// Residual fragments of a selector: the structural bits a repair search
/// can still anchor on after the exact match died.
#[derive(Debug, Default)]
struct Fragments {
    tags: Vec<String>,
    classes: Vec<String>,
    attr_names: Vec<String>,
    id_stems: Vec<String>,
}

fn collect_fragments(expr: &SelectorExpression, out: &mut Fragments) {
    match expr {
        SelectorExpression::ById { id } => {
            let stem = id.trim_end_matches(|c: char| c.is_ascii_digit() || c == '-' || c == '_');
            out.id_stems.push(stem.to_string());
        }
        SelectorExpression::ByClass { tag, classes } => {
            if let Some(t) = tag {
                out.tags.push(t.clone());
            }
            out.classes.extend(classes.iter().cloned());
        }
        SelectorExpression::ByAttribute { tag, name, .. } => {
            if let Some(t) = tag {
                out.tags.push(t.clone());
            }
            out.attr_names.push(name.clone());
        }
        SelectorExpression::ByPosition { tag, .. } => out.tags.push(tag.clone()),
        SelectorExpression::ByRelation { anchor, target, .. } => {
            collect_fragments(anchor, out);
            collect_fragments(target, out);
        }
        SelectorExpression::ByText { .. } => {}
    }
}

/// Scores how structurally similar an element is to the dead selector's
/// residual fragments: shared classes weigh most, then attribute names,
/// then tag, then id stems.
fn similarity(el: &PageElement, fragments: &Fragments) -> u32 {
    let mut score = 0;
    if fragments.tags.iter().any(|t| *t == el.tag) {
        score += 1;
    }
    for class in &fragments.classes {
        if el.classes.iter().any(|c| c == class || c.contains(class.as_str())) {
            score += 3;
        }
    }
    for name in &fragments.attr_names {
        if el.attr(name).is_some() {
            score += 2;
        }
    }
    if let Some(id) = &el.id {
        if fragments
            .id_stems
            .iter()
            .any(|stem| !stem.is_empty() && id.starts_with(stem.as_str()))
        {
            score += 3;
        }
    }
    score
}

fn candidate_from(
    page: &PageSnapshot,
    expr: SelectorExpression,
    data_type: DataType,
    strategy: &str,
) -> SelectorCandidate {
    let match_count = page.select(&expr).len();
    let is_unique = match_count == 1;
    let mut candidate = SelectorCandidate::new(expr.clone(), data_type, strategy);
    candidate.match_count = match_count;
    candidate.is_unique = is_unique;
    candidate.confidence = confidence_score(&expr, is_unique);
    candidate
}

/// Repairs a selector that matches nothing anymore: find the elements most
/// similar to its residual fragments and regenerate candidates from them.
fn regenerate_from_similar(
    page: &PageSnapshot,
    current: &CurrentResult,
    expected: &[String],
) -> Option<SelectorCandidate> {
    let mut fragments = Fragments::default();
    collect_fragments(&current.expression, &mut fragments);

    let mut scored: Vec<(&PageElement, u32)> = page
        .elements()
        .iter()
        .map(|el| (el, similarity(el, &fragments)))
        .filter(|(_, s)| *s > 0)
        .collect();
    scored.sort_by(|a, b| b.1.cmp(&a.1).then(a.0.index.cmp(&b.0.index)));
    scored.truncate(SIMILARITY_POOL);

    let mut best: Option<(SelectorCandidate, f64)> = None;
    for (el, _) in scored {
        for (expr, strategy) in candidate_expressions(page, el) {
            let extracted = page.select_text(&expr);
            let quality = extraction_quality(&extracted, expected);
            let candidate = candidate_from(page, expr, current.data_type, strategy);
            if candidate.match_count == 0 {
                continue;
            }
            let better = match &best {
                None => true,
                Some((best_candidate, best_quality)) => {
                    quality > *best_quality
                        || (quality == *best_quality && candidate.confidence > best_candidate.confidence)
                }
            };
            if better {
                best = Some((candidate, quality));
            }
        }
    }
    best.map(|(candidate, _)| candidate)
}

/// Narrows an over-matching selector back towards a single match
fn respecialize(page: &PageSnapshot, current: &CurrentResult, expected: &[String]) -> Option<SelectorCandidate> {
    let mut best: Option<(SelectorCandidate, f64)> = None;
    for expr in specialize(&current.expression) {
        let matches = page.select(&expr);
        if matches.is_empty() {
            continue;
        }
        let quality = extraction_quality(&page.select_text(&expr), expected);
        let candidate = candidate_from(page, expr, current.data_type, "respecialize");
        let better = match &best {
            None => true,
            Some((best_candidate, best_quality)) => {
                (candidate.match_count < best_candidate.match_count && quality >= *best_quality)
                    || quality > *best_quality
            }
        };
        if better {
            best = Some((candidate, quality));
        }
    }
    best.map(|(candidate, _)| candidate)
}

/// A simplification is only adopted when it provably changes nothing:
/// same match count, same uniqueness.
fn no_risk_simplification(page: &PageSnapshot, current: &CurrentResult) -> Option<SelectorCandidate> {
    let original_matches = page.select(&current.expression).len();
    for expr in simplify(&current.expression) {
        let count = page.select(&expr).len();
        if count == original_matches && count > 0 {
            return Some(candidate_from(page, expr, current.data_type, "simplify"));
        }
    }
    None
}

/// Evolves every currently-used selector against the live page and the
/// expected data from the last healthy extraction.
#[must_use]
pub fn evolve_selectors(
    current_results: &[CurrentResult],
    expected_data: &[(DataType, Vec<String>)],
    page: &PageSnapshot,
) -> Vec<EvolutionReport> {
    let expected_for = |dt: DataType| -> &[String] {
        expected_data
            .iter()
            .find(|(d, _)| *d == dt)
            .map_or(&[], |(_, v)| v.as_slice())
    };

    current_results
        .iter()
        .map(|current| {
            let expected = expected_for(current.data_type);
            let quality = extraction_quality(&current.extracted, expected);
            let match_count = page.select(&current.expression).len();

            if quality >= QUALITY_FLOOR {
                return match no_risk_simplification(page, current) {
                    Some(candidate) => EvolutionReport {
                        data_type: current.data_type,
                        original: current.expression.clone(),
                        quality,
                        action: EvolutionAction::Simplified,
                        replacement: Some(candidate),
                    },
                    None => EvolutionReport {
                        data_type: current.data_type,
                        original: current.expression.clone(),
                        quality,
                        action: EvolutionAction::Kept,
                        replacement: None,
                    },
                };
            }

            debug!(
                data_type = %current.data_type,
                selector = %current.expression,
                quality,
                match_count,
                "selector below quality floor, repairing"
            );

            let (action, replacement) = if match_count == 0 {
                match regenerate_from_similar(page, current, expected) {
                    Some(candidate) => (EvolutionAction::Regenerated, Some(candidate)),
                    None => (EvolutionAction::NoCandidate, None),
                }
            } else if match_count > 1 {
                match respecialize(page, current, expected) {
                    Some(candidate) => (EvolutionAction::Respecialized, Some(candidate)),
                    None => (EvolutionAction::NoCandidate, None),
                }
            } else {
                // Matches exactly one element but extracts the wrong value;
                // structural search has the best shot at relocating the data
                match regenerate_from_similar(page, current, expected) {
                    Some(candidate) => (EvolutionAction::Regenerated, Some(candidate)),
                    None => (EvolutionAction::NoCandidate, None),
                }
            };

            EvolutionReport {
                data_type: current.data_type,
                original: current.expression.clone(),
                quality,
                action,
                replacement,
            }
        })
        .collect()
}
