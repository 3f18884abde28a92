//! Deterministic selector mutation and confidence scoring
//!
//! Six mutation strategies turn one selector expression into a bounded,
//! duplicate-free candidate list. The same selector always yields the same
//! variations in the same order, so repair runs are reproducible.

use std::collections::HashSet;

use crate::domain::selector::{AttrMatch, Combinator, SelectorExpression};

/// Container classes commonly wrapping listing markup; used by the
/// relational strategy when adding ancestor context.
const CONTAINER_CLASSES: &[&str] = &["container", "content", "results", "listings", "card"];

/// Tags worth trying when a class selector gains tag context
const COMMON_TAGS: &[&str] = &["div", "span", "a", "h2", "h3", "td", "li"];

/// Sibling positions probed by the positional strategy
const PROBE_POSITIONS: &[usize] = &[0, 1, 2];

/// Deterministic confidence estimate for a selector, in [0,100].
///
/// Base 50, +30 when the match is unique, +20 for an id anchor, +15 for a
/// compound class selector, +15 for a data-attribute predicate, -20 for a
/// bare tag selector, -10 for positional predicates.
#[must_use]
pub fn confidence_score(expr: &SelectorExpression, is_unique: bool) -> u8 {
    let mut score: i32 = 50;
    if is_unique {
        score += 30;
    }
    if expr.is_id_based() {
        score += 20;
    }
    if expr.is_compound_class() {
        score += 15;
    }
    if expr.has_data_attribute() {
        score += 15;
    }
    if expr.is_bare_tag() {
        score -= 20;
    }
    if expr.is_positional() {
        score -= 10;
    }
    score.clamp(0, 100) as u8
}

/// Emits up to `max_variations` unique candidates for `selector`.
///
/// The original selector is always first. Strategies run in a fixed order
/// (simplify, specialize, generalize, attribute-swap, positional,
/// relational) and duplicates are dropped, so the output is deterministic.
#[must_use]
pub fn generate_variations(selector: &SelectorExpression, max_variations: usize) -> Vec<SelectorExpression> {
    let mut seen: HashSet<SelectorExpression> = HashSet::new();
    let mut out: Vec<SelectorExpression> = Vec::new();

    let mut push = |expr: SelectorExpression, out: &mut Vec<SelectorExpression>| {
        if seen.insert(expr.clone()) {
            out.push(expr);
        }
    };

    push(selector.clone(), &mut out);

    for variant in simplify(selector)
        .into_iter()
        .chain(specialize(selector))
        .chain(generalize(selector))
        .chain(attribute_swap(selector))
        .chain(positional(selector))
        .chain(relational(selector))
    {
        if out.len() >= max_variations {
            break;
        }
        push(variant, &mut out);
    }

    out.truncate(max_variations.max(1));
    out
}

/// Drop redundant ancestors and narrowing context
pub(crate) fn simplify(expr: &SelectorExpression) -> Vec<SelectorExpression> {
    let mut out = Vec::new();
    match expr {
        SelectorExpression::ByRelation { target, .. } => {
            out.push((**target).clone());
            out.extend(simplify(target));
        }
        SelectorExpression::ByClass { tag: Some(_), classes } if !classes.is_empty() => {
            out.push(SelectorExpression::ByClass {
                tag: None,
                classes: classes.clone(),
            });
        }
        SelectorExpression::ByAttribute {
            tag: Some(_),
            name,
            matcher,
        } => {
            out.push(SelectorExpression::ByAttribute {
                tag: None,
                name: name.clone(),
                matcher: matcher.clone(),
            });
        }
        _ => {}
    }
    out
}

/// Add tag or ancestor context; the repair path for over-matching selectors
pub(crate) fn specialize(expr: &SelectorExpression) -> Vec<SelectorExpression> {
    let mut out = Vec::new();
    match expr {
        SelectorExpression::ByClass { tag: None, classes } if !classes.is_empty() => {
            for tag in COMMON_TAGS {
                out.push(SelectorExpression::ByClass {
                    tag: Some((*tag).to_string()),
                    classes: classes.clone(),
                });
            }
        }
        SelectorExpression::ByAttribute {
            tag: None,
            name,
            matcher,
        } => {
            for tag in COMMON_TAGS {
                out.push(SelectorExpression::ByAttribute {
                    tag: Some((*tag).to_string()),
                    name: name.clone(),
                    matcher: matcher.clone(),
                });
            }
        }
        // Narrow an over-matching relation by tightening the combinator
        SelectorExpression::ByRelation {
            anchor,
            combinator: Combinator::Descendant,
            target,
        } => {
            out.push(SelectorExpression::ByRelation {
                anchor: anchor.clone(),
                combinator: Combinator::Child,
                target: target.clone(),
            });
        }
        _ => {}
    }
    out
}

/// Strip positional and attribute specifics
pub(crate) fn generalize(expr: &SelectorExpression) -> Vec<SelectorExpression> {
    let mut out = Vec::new();
    match expr {
        SelectorExpression::ByPosition { tag, .. } => {
            out.push(SelectorExpression::ByClass {
                tag: Some(tag.clone()),
                classes: Vec::new(),
            });
        }
        SelectorExpression::ByAttribute { tag, name, .. } => {
            out.push(SelectorExpression::ByAttribute {
                tag: tag.clone(),
                name: name.clone(),
                matcher: AttrMatch::Exists,
            });
            if let Some(t) = tag {
                out.push(SelectorExpression::ByClass {
                    tag: Some(t.clone()),
                    classes: Vec::new(),
                });
            }
        }
        SelectorExpression::ByClass { tag, classes } if classes.len() >= 2 => {
            for class in classes {
                out.push(SelectorExpression::ByClass {
                    tag: tag.clone(),
                    classes: vec![class.clone()],
                });
            }
        }
        // Generated ids often carry numeric suffixes; fall back to a
        // prefix match on the stable part
        SelectorExpression::ById { id } => {
            let stem = id.trim_end_matches(|c: char| c.is_ascii_digit() || c == '-' || c == '_');
            if !stem.is_empty() && stem.len() < id.len() {
                out.push(SelectorExpression::ByAttribute {
                    tag: None,
                    name: "id".to_string(),
                    matcher: AttrMatch::Partial(stem.to_string()),
                });
            }
        }
        _ => {}
    }
    out
}

/// Partial-match and existence-only variants of any attribute predicate
pub(crate) fn attribute_swap(expr: &SelectorExpression) -> Vec<SelectorExpression> {
    let mut out = Vec::new();
    match expr {
        SelectorExpression::ByAttribute { tag, name, matcher } => match matcher {
            AttrMatch::Exact(v) => {
                out.push(SelectorExpression::ByAttribute {
                    tag: tag.clone(),
                    name: name.clone(),
                    matcher: AttrMatch::Partial(v.clone()),
                });
                out.push(SelectorExpression::ByAttribute {
                    tag: tag.clone(),
                    name: name.clone(),
                    matcher: AttrMatch::Exists,
                });
            }
            AttrMatch::Partial(_) => {
                out.push(SelectorExpression::ByAttribute {
                    tag: tag.clone(),
                    name: name.clone(),
                    matcher: AttrMatch::Exists,
                });
            }
            AttrMatch::Exists => {}
        },
        SelectorExpression::ByRelation {
            anchor,
            combinator,
            target,
        } => {
            for swapped in attribute_swap(target) {
                out.push(SelectorExpression::ByRelation {
                    anchor: anchor.clone(),
                    combinator: *combinator,
                    target: Box::new(swapped),
                });
            }
        }
        _ => {}
    }
    out
}

/// Probe sibling positions for selectors that carry tag information
pub(crate) fn positional(expr: &SelectorExpression) -> Vec<SelectorExpression> {
    let tag = match expr {
        SelectorExpression::ByClass { tag: Some(t), .. }
        | SelectorExpression::ByAttribute { tag: Some(t), .. }
        | SelectorExpression::ByPosition { tag: t, .. } => t.clone(),
        _ => return Vec::new(),
    };
    PROBE_POSITIONS
        .iter()
        .filter(|&&nth| !matches!(expr, SelectorExpression::ByPosition { nth: n, .. } if *n == nth))
        .map(|&nth| SelectorExpression::ByPosition {
            tag: tag.clone(),
            nth,
        })
        .collect()
}

/// Swap combinators and add container-class ancestors
pub(crate) fn relational(expr: &SelectorExpression) -> Vec<SelectorExpression> {
    let mut out = Vec::new();
    if let SelectorExpression::ByRelation {
        anchor,
        combinator,
        target,
    } = expr
    {
        for other in [Combinator::Descendant, Combinator::Child, Combinator::Sibling] {
            if other != *combinator {
                out.push(SelectorExpression::ByRelation {
                    anchor: anchor.clone(),
                    combinator: other,
                    target: target.clone(),
                });
            }
        }
    } else {
        for class in CONTAINER_CLASSES {
            out.push(SelectorExpression::ByRelation {
                anchor: Box::new(SelectorExpression::ByClass {
                    tag: None,
                    classes: vec![(*class).to_string()],
                }),
                combinator: Combinator::Descendant,
                target: Box::new(expr.clone()),
            });
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    fn price_class() -> SelectorExpression {
        SelectorExpression::classes(Some("span"), &["price"])
    }

    #[test]
    fn variations_contain_original_first() {
        let sel = price_class();
        let vars = generate_variations(&sel, 8);
        assert_eq!(vars[0], sel);
    }

    #[rstest]
    #[case(1)]
    #[case(5)]
    #[case(50)]
    fn variations_respect_cap(#[case] max: usize) {
        let vars = generate_variations(&price_class(), max);
        assert!(vars.len() <= max);
        assert!(!vars.is_empty());
    }

    #[test]
    fn variations_have_no_duplicates() {
        let vars = generate_variations(&price_class(), 64);
        let unique: std::collections::HashSet<_> = vars.iter().collect();
        assert_eq!(unique.len(), vars.len());
    }

    #[test]
    fn variations_are_deterministic() {
        let sel = SelectorExpression::ByAttribute {
            tag: Some("span".into()),
            name: "data-price".into(),
            matcher: AttrMatch::Exact("120000".into()),
        };
        assert_eq!(generate_variations(&sel, 16), generate_variations(&sel, 16));
    }

    #[test]
    fn attribute_swap_emits_partial_and_exists() {
        let sel = SelectorExpression::ByAttribute {
            tag: None,
            name: "data-price".into(),
            matcher: AttrMatch::Exact("120000".into()),
        };
        let swapped = attribute_swap(&sel);
        assert!(swapped.contains(&SelectorExpression::ByAttribute {
            tag: None,
            name: "data-price".into(),
            matcher: AttrMatch::Partial("120000".into()),
        }));
        assert!(swapped.contains(&SelectorExpression::ByAttribute {
            tag: None,
            name: "data-price".into(),
            matcher: AttrMatch::Exists,
        }));
    }

    #[test]
    fn relation_simplifies_to_its_target() {
        let target = price_class();
        let sel = SelectorExpression::ByRelation {
            anchor: Box::new(SelectorExpression::ById { id: "main".into() }),
            combinator: Combinator::Descendant,
            target: Box::new(target.clone()),
        };
        assert!(simplify(&sel).contains(&target));
    }

    #[test]
    fn confidence_stacks_and_clamps() {
        // id + unique: 50 + 30 + 20 = 100
        let id_sel = SelectorExpression::ById { id: "price".into() };
        assert_eq!(confidence_score(&id_sel, true), 100);

        // everything positive at once still clamps at 100
        let stacked = SelectorExpression::ByRelation {
            anchor: Box::new(SelectorExpression::ById { id: "main".into() }),
            combinator: Combinator::Child,
            target: Box::new(SelectorExpression::ByAttribute {
                tag: None,
                name: "data-price".into(),
                matcher: AttrMatch::Exists,
            }),
        };
        assert_eq!(confidence_score(&stacked, true), 100);

        // bare tag, non-unique, positional floor stays >= 0
        let weak = SelectorExpression::ByPosition {
            tag: "div".into(),
            nth: 3,
        };
        let score = confidence_score(&weak, false);
        assert!(score <= 50);
    }

    #[test]
    fn bare_tag_scores_below_class_anchor() {
        let bare = SelectorExpression::classes(Some("div"), &[]);
        let classed = SelectorExpression::classes(Some("div"), &["price", "amount"]);
        assert!(confidence_score(&bare, false) < confidence_score(&classed, false));
    }
}
