//! Backend-neutral page model and selector evaluation
//!
//! Fetched HTML is lowered once into a flat [`PageSnapshot`] - a table of
//! elements with structural indices. Selector evaluation, discovery and
//! evolution all run against the snapshot, never against the raw markup,
//! so the generator stays portable across extraction backends.

use std::collections::HashMap;

use scraper::{ElementRef, Html};
use serde::{Deserialize, Serialize};

use crate::domain::selector::{AttrMatch, Combinator, SelectorExpression};

/// One element row in a page snapshot
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PageElement {
    pub index: usize,
    pub parent: Option<usize>,
    pub tag: String,
    pub id: Option<String>,
    /// Sorted for stable structural comparison
    pub classes: Vec<String>,
    pub attributes: Vec<(String, String)>,
    /// Collapsed subtree text
    pub text: String,
    /// Number of element children
    pub child_count: usize,
    /// Position among all element siblings
    pub sibling_index: usize,
    /// Position among same-tag element siblings
    pub tag_sibling_index: usize,
    pub depth: usize,
}

impl PageElement {
    /// Attribute lookup by name
    #[must_use]
    pub fn attr(&self, name: &str) -> Option<&str> {
        self.attributes
            .iter()
            .find(|(n, _)| n == name)
            .map(|(_, v)| v.as_str())
    }

    /// Structural signature used to detect repeating patterns:
    /// {tag, sorted class set, child count}
    #[must_use]
    pub fn structural_signature(&self) -> (String, Vec<String>, usize) {
        (self.tag.clone(), self.classes.clone(), self.child_count)
    }
}

/// A flat, indexed view of one fetched page
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PageSnapshot {
    pub source_url: Option<String>,
    elements: Vec<PageElement>,
}

fn collapse_whitespace(s: &str) -> String {
    s.split_whitespace().collect::<Vec<_>>().join(" ")
}

impl PageSnapshot {
    /// Lowers parsed HTML into the flat element table
    #[must_use]
    pub fn from_html(html: &str) -> Self {
        fn walk(el: ElementRef<'_>, parent: Option<usize>, depth: usize, out: &mut Vec<PageElement>) {
            let index = out.len();
            let mut classes: Vec<String> = el.value().classes().map(str::to_string).collect();
            classes.sort();
            classes.dedup();

            out.push(PageElement {
                index,
                parent,
                tag: el.value().name().to_string(),
                id: el.value().attr("id").map(str::to_string),
                classes,
                attributes: el
                    .value()
                    .attrs()
                    .map(|(n, v)| (n.to_string(), v.to_string()))
                    .collect(),
                text: collapse_whitespace(&el.text().collect::<Vec<_>>().join(" ")),
                child_count: 0,
                sibling_index: 0,
                tag_sibling_index: 0,
                depth,
            });
            for child in el.children().filter_map(ElementRef::wrap) {
                walk(child, Some(index), depth + 1, out);
            }
        }

        let doc = Html::parse_document(html);
        let mut elements: Vec<PageElement> = Vec::new();
        walk(doc.root_element(), None, 0, &mut elements);

        let mut snapshot = Self {
            source_url: None,
            elements,
        };
        snapshot.rebuild_structure();
        snapshot
    }

    /// Builds a snapshot from pre-constructed elements (test fixtures and
    /// non-HTML backends). Structural indices are recomputed.
    #[must_use]
    pub fn from_elements(elements: Vec<PageElement>) -> Self {
        let mut snapshot = Self {
            source_url: None,
            elements,
        };
        snapshot.rebuild_structure();
        snapshot
    }

    fn rebuild_structure(&mut self) {
        for el in &mut self.elements {
            el.classes.sort();
            el.classes.dedup();
        }
        let mut children: HashMap<Option<usize>, Vec<usize>> = HashMap::new();
        for el in &self.elements {
            children.entry(el.parent).or_default().push(el.index);
        }
        for siblings in children.values() {
            let mut tag_counts: HashMap<String, usize> = HashMap::new();
            for (pos, &idx) in siblings.iter().enumerate() {
                let tag_pos = tag_counts
                    .entry(self.elements[idx].tag.clone())
                    .or_insert(0);
                self.elements[idx].sibling_index = pos;
                self.elements[idx].tag_sibling_index = *tag_pos;
                *tag_pos += 1;
            }
        }
        for idx in 0..self.elements.len() {
            let count = children.get(&Some(idx)).map_or(0, Vec::len);
            self.elements[idx].child_count = count;
        }
    }

    #[must_use]
    pub fn elements(&self) -> &[PageElement] {
        &self.elements
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.elements.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.elements.is_empty()
    }

    /// Evaluates a selector expression, returning matching elements in
    /// document order
    #[must_use]
    pub fn select(&self, expr: &SelectorExpression) -> Vec<&PageElement> {
        self.elements
            .iter()
            .filter(|el| self.matches(el, expr))
            .collect()
    }

    /// Extracts the collapsed text of every match
    #[must_use]
    pub fn select_text(&self, expr: &SelectorExpression) -> Vec<String> {
        self.select(expr).into_iter().map(|el| el.text.clone()).collect()
    }

    /// One evaluator per selector variant
    fn matches(&self, el: &PageElement, expr: &SelectorExpression) -> bool {
        match expr {
            SelectorExpression::ById { id } => el.id.as_deref() == Some(id.as_str()),
            SelectorExpression::ByClass { tag, classes } => {
                if let Some(t) = tag {
                    if el.tag != *t {
                        return false;
                    }
                } else if classes.is_empty() {
                    // neither tag nor classes matches nothing
                    return false;
                }
                classes.iter().all(|c| el.classes.binary_search(c).is_ok())
            }
            SelectorExpression::ByAttribute { tag, name, matcher } => {
                if let Some(t) = tag {
                    if el.tag != *t {
                        return false;
                    }
                }
                match (el.attr(name), matcher) {
                    (Some(v), AttrMatch::Exact(want)) => v == want,
                    (Some(v), AttrMatch::Partial(want)) => v.contains(want.as_str()),
                    (Some(_), AttrMatch::Exists) => true,
                    (None, _) => false,
                }
            }
            SelectorExpression::ByPosition { tag, nth } => {
                el.tag == *tag && el.tag_sibling_index == *nth
            }
            SelectorExpression::ByRelation {
                anchor,
                combinator,
                target,
            } => {
                if !self.matches(el, target) {
                    return false;
                }
                match combinator {
                    Combinator::Child => el
                        .parent
                        .is_some_and(|p| self.matches(&self.elements[p], anchor)),
                    Combinator::Descendant => {
                        let mut cursor = el.parent;
                        while let Some(p) = cursor {
                            if self.matches(&self.elements[p], anchor) {
                                return true;
                            }
                            cursor = self.elements[p].parent;
                        }
                        false
                    }
                    Combinator::Sibling => self.elements.iter().any(|other| {
                        other.index != el.index
                            && other.parent == el.parent
                            && other.sibling_index < el.sibling_index
                            && self.matches(other, anchor)
                    }),
                }
            }
            SelectorExpression::ByText { pattern } => el.text.contains(pattern.as_str()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::selector::SelectorExpression as Expr;

    const PAGE: &str = r#"
        <html><body>
          <div id="listings">
            <div class="listing-card featured">
              <h3 class="listing-title">Profitable SaaS tool</h3>
              <span class="price" data-price="120000">$120,000</span>
            </div>
            <div class="listing-card">
              <h3 class="listing-title">Content site</h3>
              <span class="price" data-price="45000">$45,000</span>
            </div>
          </div>
          <div class="sidebar"><span class="price">$1</span></div>
        </body></html>
    "#;

    #[test]
    fn by_id_matches_single_element() {
        let page = PageSnapshot::from_html(PAGE);
        let hits = page.select(&Expr::ById { id: "listings".into() });
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].tag, "div");
    }

    #[test]
    fn by_class_with_tag_narrowing() {
        let page = PageSnapshot::from_html(PAGE);
        let hits = page.select(&Expr::classes(Some("span"), &["price"]));
        assert_eq!(hits.len(), 3);
        let compound = page.select(&Expr::classes(Some("div"), &["featured", "listing-card"]));
        assert_eq!(compound.len(), 1);
    }

    #[test]
    fn by_attribute_modes() {
        let page = PageSnapshot::from_html(PAGE);
        let exists = Expr::ByAttribute {
            tag: None,
            name: "data-price".into(),
            matcher: AttrMatch::Exists,
        };
        assert_eq!(page.select(&exists).len(), 2);
        let exact = Expr::ByAttribute {
            tag: None,
            name: "data-price".into(),
            matcher: AttrMatch::Exact("45000".into()),
        };
        assert_eq!(page.select(&exact).len(), 1);
        let partial = Expr::ByAttribute {
            tag: None,
            name: "data-price".into(),
            matcher: AttrMatch::Partial("000".into()),
        };
        assert_eq!(page.select(&partial).len(), 2);
    }

    #[test]
    fn by_position_counts_same_tag_siblings() {
        let page = PageSnapshot::from_html(PAGE);
        let second_card = Expr::ByRelation {
            anchor: Box::new(Expr::ById { id: "listings".into() }),
            combinator: Combinator::Child,
            target: Box::new(Expr::ByPosition {
                tag: "div".into(),
                nth: 1,
            }),
        };
        let hits = page.select(&second_card);
        assert_eq!(hits.len(), 1);
        assert!(hits[0].text.contains("Content site"));
    }

    #[test]
    fn descendant_relation_excludes_sidebar() {
        let page = PageSnapshot::from_html(PAGE);
        let expr = Expr::ByRelation {
            anchor: Box::new(Expr::ById { id: "listings".into() }),
            combinator: Combinator::Descendant,
            target: Box::new(Expr::classes(Some("span"), &["price"])),
        };
        assert_eq!(page.select(&expr).len(), 2);
    }

    #[test]
    fn by_text_substring() {
        let page = PageSnapshot::from_html(PAGE);
        let hits = page.select(&Expr::ByText {
            pattern: "Content site".into(),
        });
        assert!(!hits.is_empty());
        assert!(hits.iter().any(|el| el.tag == "h3"));
    }

    #[test]
    fn structural_signature_repeats_across_cards() {
        let page = PageSnapshot::from_html(PAGE);
        let titles: Vec<_> = page
            .elements()
            .iter()
            .filter(|el| el.tag == "h3")
            .collect();
        assert_eq!(titles.len(), 2);
        assert_eq!(
            titles[0].structural_signature(),
            titles[1].structural_signature()
        );
    }
}
