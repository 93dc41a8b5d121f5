//! Turns a selector graph into extraction trees and runs them against a
//! parsed document.
//!
//! A selector is *common to all trees* when neither it nor any descendant
//! can fan one parent element out into multiple records (and it is not a
//! link scope with children, which belongs to another page). Everything
//! else splits the graph: each splitting child yields its own tree carrying
//! the common selectors along, and Item scopes are flattened recursively.

use std::collections::HashSet;

use tracing::trace;

use crate::document::Elem;
use crate::selector::{Record, Selector};
use crate::sitemap::Sitemap;

/// One extraction tree: the subset of selectors feeding a single record
/// stream. A mini-sitemap in its own right.
#[derive(Debug, Clone)]
pub struct Tree {
    selectors: Vec<Selector>,
}

impl Tree {
    fn new() -> Tree {
        Tree { selectors: vec![] }
    }

    fn add(&mut self, selector: &Selector) {
        if self.get(&selector.id).is_none() {
            self.selectors.push(selector.clone());
        }
    }

    pub fn ids(&self) -> Vec<&str> {
        self.selectors.iter().map(|s| s.id.as_str()).collect()
    }

    fn get(&self, selector_id: &str) -> Option<&Selector> {
        self.selectors.iter().find(|s| s.id == selector_id)
    }

    fn direct_childs(&self, parent_id: &str) -> Vec<&Selector> {
        self.selectors
            .iter()
            .filter(|s| s.has_parent(parent_id))
            .collect()
    }

    /// Transitive within the tree: the selector or anything below it
    /// produces multiple records.
    fn will_return_many(&self, selector_id: &str) -> bool {
        let mut seen = HashSet::new();
        self.will_return_many_inner(selector_id, &mut seen)
    }

    fn will_return_many_inner<'a>(
        &'a self,
        selector_id: &'a str,
        seen: &mut HashSet<&'a str>,
    ) -> bool {
        if !seen.insert(selector_id) {
            return false;
        }
        let selector = match self.get(selector_id) {
            Some(selector) => selector,
            None => return false,
        };
        if selector.will_return_many() {
            return true;
        }
        self.direct_childs(selector_id)
            .iter()
            .any(|child| self.will_return_many_inner(&child.id, seen))
    }

    /// Records for one scope of this tree. `common` carries the scalar
    /// context collected on the way down; every multi-record child merges
    /// it into its own records, child fields winning.
    fn extract<'a>(
        &self,
        parent_id: &str,
        parent: Elem<'a>,
        mut common: Record,
        path: &mut Vec<(String, Elem<'a>)>,
    ) -> Vec<Record> {
        common.extend(self.common_data(parent_id, parent));

        let mut records = vec![];
        for child in self.direct_childs(parent_id) {
            if !self.will_return_many(&child.id) {
                continue;
            }
            if child.kind.will_return_items() {
                for element in child.get_items(parent) {
                    let frame = (child.id.clone(), element);
                    if path.contains(&frame) {
                        continue;
                    }
                    path.push(frame);
                    records.extend(self.extract(&child.id, element, common.clone(), path));
                    path.pop();
                }
            } else {
                for mut record in child.get_data(parent) {
                    for (key, value) in &common {
                        record.entry(key.clone()).or_insert_with(|| value.clone());
                    }
                    records.push(record);
                }
            }
        }

        if records.is_empty() && !common.is_empty() {
            records.push(common);
        }
        records
    }

    /// Scalar context of one scope: every direct child that cannot fan out
    /// merged into a single map, Item scopes flattened recursively.
    fn common_data(&self, parent_id: &str, parent: Elem<'_>) -> Record {
        let mut common = Record::new();
        for child in self.direct_childs(parent_id) {
            if self.will_return_many(&child.id) {
                continue;
            }
            if child.kind.will_return_items() {
                for element in child.get_items(parent) {
                    common.extend(self.common_data(&child.id, element));
                }
            } else {
                for record in child.get_data(parent) {
                    common.extend(record);
                }
            }
        }
        common
    }
}

impl Sitemap {
    /// True when the selector can ride along in every extraction tree
    /// instead of splitting the graph.
    pub fn selector_is_common_to_all_trees(&self, selector_id: &str) -> bool {
        self.is_common(selector_id, &mut HashSet::new())
    }

    fn is_common(&self, selector_id: &str, visiting: &mut HashSet<String>) -> bool {
        let selector = match self.get(selector_id) {
            Some(selector) => selector,
            None => return false,
        };
        if !visiting.insert(selector_id.to_string()) {
            // a cycle brings no new fan-out of its own
            return true;
        }
        !selector.will_return_many()
            && !(selector.kind.can_create_new_jobs()
                && !self.get_direct_childs(selector_id).is_empty())
            && self
                .get_direct_childs(selector_id)
                .iter()
                .all(|child| self.is_common(&child.id, visiting))
    }

    /// The common direct children of `parent_id`, each expanded with all of
    /// its transitive descendants.
    fn selectors_common_to_all_trees(&self, parent_id: &str) -> Vec<&Selector> {
        let mut result = vec![];
        for child in self.get_direct_childs(parent_id) {
            if self.selector_is_common_to_all_trees(&child.id) {
                result.push(child);
                result.extend(self.get_all(Some(&child.id)));
            }
        }
        result
    }

    /// Splits the graph under `parent_id` into extraction trees.
    pub fn find_trees(&self, parent_id: &str) -> Vec<Tree> {
        self.find_trees_inner(parent_id, &Tree::new(), &mut vec![])
    }

    fn find_trees_inner(
        &self,
        parent_id: &str,
        inherited: &Tree,
        path: &mut Vec<String>,
    ) -> Vec<Tree> {
        let mut locals = inherited.clone();
        for selector in self.selectors_common_to_all_trees(parent_id) {
            locals.add(selector);
        }

        let mut trees = vec![];
        let mut split = false;
        for child in self.get_direct_childs(parent_id) {
            if self.selector_is_common_to_all_trees(&child.id) {
                continue;
            }
            split = true;
            let mut provisional = locals.clone();
            provisional.add(child);
            if child.kind.can_have_local_childs() && !path.contains(&child.id) {
                path.push(child.id.clone());
                trees.extend(self.find_trees_inner(&child.id, &provisional, path));
                path.pop();
            } else {
                trees.push(provisional);
            }
        }
        if !split {
            trees.push(locals);
        }
        trees
    }

    /// All records one document yields under `parent_id`: depth-first by
    /// extraction tree, then in DOM order under the current element. Never
    /// fails; unmatched selectors degrade to their no-item records.
    pub fn extract(&self, parent_id: &str, root: Elem<'_>) -> Vec<Record> {
        let trees = self.find_trees(parent_id);
        trace!("extracting {} tree(s) under {}", trees.len(), parent_id);

        let mut records = vec![];
        for tree in &trees {
            records.extend(tree.extract(parent_id, root, Record::new(), &mut vec![]));
        }
        records
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::document::Doc;
    use crate::selector::Kind;
    use crate::sitemap::ROOT_ID;
    use serde_json::{json, Value};

    fn extract(sitemap: &Sitemap, html: &str) -> Vec<Value> {
        let doc = Doc::parse_str(html);
        sitemap
            .extract(ROOT_ID, doc.root())
            .into_iter()
            .map(Value::Object)
            .collect()
    }

    #[test]
    fn single_common_selector_yields_one_record() {
        let sitemap = Sitemap::with_selectors(
            "m",
            vec![Selector::new(Kind::Text, "a").css("p").many(false)],
        )
        .unwrap();
        assert_eq!(extract(&sitemap, "<p>a</p><p>b</p>"), vec![json!({"a": "a"})]);
    }

    #[test]
    fn common_data_joins_into_every_record() {
        let sitemap = Sitemap::with_selectors(
            "m",
            vec![
                Selector::new(Kind::Text, "a").css("a"),
                Selector::new(Kind::Text, "c").css(".c").many(false),
            ],
        )
        .unwrap();
        assert_eq!(
            extract(
                &sitemap,
                r#"<a href="x">A</a><a>B</a><span class="c">C</span>"#
            ),
            vec![json!({"a": "A", "c": "C"}), json!({"a": "B", "c": "C"})]
        );
    }

    #[test]
    fn chained_item_scopes_flatten_in_dom_order() {
        let sitemap = Sitemap::with_selectors(
            "m",
            vec![
                Selector::new(Kind::Item, "div").css("div").many(false),
                Selector::new(Kind::Item, "table").css("table").parents(&["div"]),
                Selector::new(Kind::Item, "tr").css("tr").parents(&["table"]),
                Selector::new(Kind::Text, "td").css("td").parents(&["tr"]).many(false),
            ],
        )
        .unwrap();
        let html = "<div>\
            <table><tr><td>result1</td></tr><tr><td>result2</td></tr></table>\
            <table><tr><td>result3</td></tr><tr><td>result4</td></tr></table>\
            </div>";
        assert_eq!(
            extract(&sitemap, html),
            vec![
                json!({"td": "result1"}),
                json!({"td": "result2"}),
                json!({"td": "result3"}),
                json!({"td": "result4"}),
            ]
        );
    }

    #[test]
    fn item_scope_context_joins_nested_records() {
        let sitemap = Sitemap::with_selectors(
            "m",
            vec![
                Selector::new(Kind::Item, "row").css("tr"),
                Selector::new(Kind::Text, "name").css(".name").parents(&["row"]).many(false),
                Selector::new(Kind::Text, "tag").css(".tag").parents(&["row"]),
            ],
        )
        .unwrap();
        let html = "<table>\
            <tr><td class=\"name\">n1</td><td class=\"tag\">t1</td><td class=\"tag\">t2</td></tr>\
            <tr><td class=\"name\">n2</td><td class=\"tag\">t3</td></tr>\
            </table>";
        assert_eq!(
            extract(&sitemap, html),
            vec![
                json!({"name": "n1", "tag": "t1"}),
                json!({"name": "n1", "tag": "t2"}),
                json!({"name": "n2", "tag": "t3"}),
            ]
        );
    }

    #[test]
    fn link_records_keep_control_fields() {
        let sitemap = Sitemap::with_selectors(
            "m",
            vec![
                Selector::new(Kind::Link, "more").css("a"),
                Selector::new(Kind::Text, "title").css("h1").many(false),
                Selector::new(Kind::Text, "detail").css("p").parents(&["more"]).many(false),
            ],
        )
        .unwrap();
        let records = extract(
            &sitemap,
            r#"<h1>T</h1><a href="/1">one</a><a href="/2">two</a>"#,
        );
        assert_eq!(
            records,
            vec![
                json!({"more": "one", "more-href": "/1", "title": "T",
                       "_follow": "/1", "_follow_id": "more"}),
                json!({"more": "two", "more-href": "/2", "title": "T",
                       "_follow": "/2", "_follow_id": "more"}),
            ]
        );
    }

    #[test]
    fn base_scope_extraction_for_followed_pages() {
        // records on the followed page are rooted at the link selector
        let sitemap = Sitemap::with_selectors(
            "m",
            vec![
                Selector::new(Kind::Link, "more").css("a"),
                Selector::new(Kind::Text, "detail").css("p").parents(&["more"]).many(false),
            ],
        )
        .unwrap();
        assert_eq!(
            extract_under(&sitemap, "more", "<p>d</p>"),
            vec![json!({"detail": "d"})]
        );
    }

    fn extract_under(sitemap: &Sitemap, parent_id: &str, html: &str) -> Vec<Value> {
        let doc = Doc::parse_str(html);
        sitemap
            .extract(parent_id, doc.root())
            .into_iter()
            .map(Value::Object)
            .collect()
    }

    #[test]
    fn no_matches_yield_null_records() {
        let sitemap = Sitemap::with_selectors(
            "m",
            vec![Selector::new(Kind::Text, "a").css("p").many(false)],
        )
        .unwrap();
        assert_eq!(extract(&sitemap, "<b>x</b>"), vec![json!({"a": null})]);
        assert_eq!(extract(&sitemap, ""), vec![json!({"a": null})]);
    }

    #[test]
    fn splitting_children_produce_separate_trees() {
        let sitemap = Sitemap::with_selectors(
            "m",
            vec![
                Selector::new(Kind::Text, "title").css("h1").many(false),
                Selector::new(Kind::Text, "rows").css("li"),
                Selector::new(Kind::Image, "pics").css("img"),
            ],
        )
        .unwrap();
        let trees = sitemap.find_trees(ROOT_ID);
        assert_eq!(trees.len(), 2);
        assert_eq!(trees[0].ids(), vec!["title", "rows"]);
        assert_eq!(trees[1].ids(), vec!["title", "pics"]);

        // each tree yields its own stream, commons joined into both
        let records = extract(
            &sitemap,
            r#"<h1>T</h1><li>x</li><img src="http://a"/>"#,
        );
        assert_eq!(
            records,
            vec![
                json!({"rows": "x", "title": "T"}),
                json!({"pics-src": "http://a", "title": "T"}),
            ]
        );
    }

    #[test]
    fn item_scopes_recurse_during_the_split() {
        let sitemap = Sitemap::with_selectors(
            "m",
            vec![
                Selector::new(Kind::Item, "row").css("tr"),
                Selector::new(Kind::Text, "name").css(".name").parents(&["row"]).many(false),
                Selector::new(Kind::Text, "tags").css(".tag").parents(&["row"]),
                Selector::new(Kind::Image, "pics").css("img").parents(&["row"]),
            ],
        )
        .unwrap();
        let trees = sitemap.find_trees(ROOT_ID);
        assert_eq!(trees.len(), 2);
        assert_eq!(trees[0].ids(), vec!["row", "name", "tags"]);
        assert_eq!(trees[1].ids(), vec!["row", "name", "pics"]);
    }

    #[test]
    fn tree_union_covers_every_selector() {
        let sitemap = Sitemap::with_selectors(
            "m",
            vec![
                Selector::new(Kind::Item, "row").css("tr"),
                Selector::new(Kind::Text, "name").css(".name").parents(&["row"]).many(false),
                Selector::new(Kind::Text, "tags").css(".tag").parents(&["row"]),
                Selector::new(Kind::Text, "title").css("h1").many(false),
            ],
        )
        .unwrap();
        let trees = sitemap.find_trees(ROOT_ID);
        let mut seen: Vec<String> = trees
            .iter()
            .flat_map(|t| t.ids())
            .map(|id| id.to_string())
            .collect();
        seen.sort();
        seen.dedup();
        assert_eq!(seen, vec!["name", "row", "tags", "title"]);
    }

    #[test]
    fn self_referencing_item_terminates() {
        let mut sitemap = Sitemap::new("m");
        sitemap
            .push(Selector::new(Kind::Item, "a").parents(&["_root", "a"]))
            .unwrap();
        sitemap
            .push(Selector::new(Kind::Text, "t").css("p").parents(&["a"]).many(false))
            .unwrap();
        assert!(sitemap.has_recursive_selectors());
        // empty css makes the scope select its own parent element; the
        // engine must still come back
        let records = extract(&sitemap, "<p>x</p>");
        assert!(!records.is_empty());
    }
}
