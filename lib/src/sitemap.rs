use std::collections::{BTreeSet, HashSet};

use lazy_static::lazy_static;
use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::error::SitemapError;
use crate::selector::{Kind, Record, Selector};

/// Reserved id for the document root; never names a selector.
pub const ROOT_ID: &str = "_root";

lazy_static! {
    static ref START_URL_RANGE: Regex =
        Regex::new(r"^(.*?)\[(\d+)-(\d+)(?::(\d+))?\](.*)$").unwrap();
}

/// An ordered collection of selectors plus the start-URL patterns that seed
/// a scrape. Declaration order is preserved across serialization and decides
/// output ordering everywhere.
#[derive(Debug, Clone, PartialEq)]
pub struct Sitemap {
    pub id: String,
    selectors: Vec<Selector>,
    start_urls: Vec<String>,
}

impl Sitemap {
    pub fn new(id: &str) -> Sitemap {
        Sitemap {
            id: id.to_string(),
            selectors: vec![],
            start_urls: vec![],
        }
    }

    pub fn with_selectors(id: &str, selectors: Vec<Selector>) -> Result<Sitemap, SitemapError> {
        let mut sitemap = Sitemap::new(id);
        for selector in selectors {
            sitemap.push(selector)?;
        }
        Ok(sitemap)
    }

    pub fn set_start_urls<S: Into<String>>(&mut self, urls: impl IntoIterator<Item = S>) {
        self.start_urls = urls.into_iter().map(Into::into).collect();
    }

    pub fn len(&self) -> usize {
        self.selectors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.selectors.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Selector> {
        self.selectors.iter()
    }

    pub fn get(&self, selector_id: &str) -> Option<&Selector> {
        self.selectors.iter().find(|s| s.id == selector_id)
    }

    pub fn position(&self, selector_id: &str) -> Option<usize> {
        self.selectors.iter().position(|s| s.id == selector_id)
    }

    pub fn at(&self, index: usize) -> &Selector {
        &self.selectors[index]
    }

    /// `_root` plus every selector id, in declaration order.
    pub fn ids(&self) -> Vec<&str> {
        std::iter::once(ROOT_ID)
            .chain(self.selectors.iter().map(|s| s.id.as_str()))
            .collect()
    }

    /// Ids a new selector may name as parent: `_root` plus every selector
    /// whose kind accepts children.
    pub fn possible_parent_ids(&self) -> Vec<&str> {
        std::iter::once(ROOT_ID)
            .chain(
                self.selectors
                    .iter()
                    .filter(|s| s.kind.can_have_childs())
                    .map(|s| s.id.as_str()),
            )
            .collect()
    }

    /// Output schema: every selector's columns in declaration order.
    pub fn columns(&self) -> Vec<String> {
        self.selectors.iter().flat_map(|s| s.columns()).collect()
    }

    /// All selectors, or every transitive child of `parent_id`, yielded in
    /// declaration order. Unknown ids yield nothing.
    pub fn get_all(&self, parent_id: Option<&str>) -> Vec<&Selector> {
        let parent_id = match parent_id {
            None => return self.selectors.iter().collect(),
            Some(parent_id) => parent_id,
        };
        let mut found = BTreeSet::new();
        self.collect_childs(parent_id, &mut found);
        found.into_iter().map(|pos| &self.selectors[pos]).collect()
    }

    fn collect_childs(&self, parent_id: &str, found: &mut BTreeSet<usize>) {
        for (pos, selector) in self.selectors.iter().enumerate() {
            if !found.contains(&pos) && selector.has_parent(parent_id) {
                found.insert(pos);
                self.collect_childs(&selector.id, found);
            }
        }
    }

    /// Selectors directly under `parent_id`, in declaration order.
    pub fn get_direct_childs(&self, parent_id: &str) -> Vec<&Selector> {
        self.selectors
            .iter()
            .filter(|s| s.has_parent(parent_id))
            .collect()
    }

    /// True when the selector itself or any transitive descendant produces
    /// multiple records.
    pub fn will_return_many(&self, selector_id: &str) -> bool {
        let selector = match self.get(selector_id) {
            Some(selector) => selector,
            None => return false,
        };
        if selector.will_return_many() {
            return true;
        }
        self.get_all(Some(selector_id))
            .iter()
            .any(|child| child.will_return_many())
    }

    /// True when some path through Item-scope edges revisits a selector.
    /// Link selectors break cycles: they spawn new jobs instead of nesting,
    /// so a link self-loop is not recursive.
    pub fn has_recursive_selectors(&self) -> bool {
        self.selectors.iter().any(|top| {
            let mut path = vec![];
            self.check_recursion(top, &mut path)
        })
    }

    fn check_recursion<'a>(&'a self, selector: &'a Selector, path: &mut Vec<&'a str>) -> bool {
        if path.contains(&selector.id.as_str()) {
            return true;
        }
        if !selector.kind.will_return_items() {
            return false;
        }
        path.push(&selector.id);
        for child in self.get_direct_childs(&selector.id) {
            if self.check_recursion(child, path) {
                return true;
            }
        }
        path.pop();
        false
    }

    /// The selectors reachable on the same page as `selector_id`: the
    /// selector itself, its Item-scope ancestors, and its one-page childs.
    pub fn get_one_page_selectors(&self, selector_id: &str) -> Vec<&Selector> {
        let selector = match self.get(selector_id) {
            Some(selector) => selector,
            None => return vec![],
        };
        let mut found = BTreeSet::new();
        found.insert(self.position(selector_id).unwrap());
        self.find_page_parents(selector, &mut found);
        for child in self.get_one_page_childs(selector_id) {
            found.insert(self.position(&child.id).unwrap());
        }
        found.into_iter().map(|pos| &self.selectors[pos]).collect()
    }

    fn find_page_parents(&self, selector: &Selector, found: &mut BTreeSet<usize>) {
        for parent_id in &selector.parents {
            if parent_id == ROOT_ID {
                return;
            }
            let (pos, parent) = match self.position(parent_id) {
                Some(pos) => (pos, &self.selectors[pos]),
                None => continue,
            };
            if !found.contains(&pos) && parent.kind.will_return_items() {
                found.insert(pos);
                self.find_page_parents(parent, found);
            }
        }
    }

    /// Child selectors usable within one page: the walk descends only
    /// through selectors that keep the engine on the same page.
    pub fn get_one_page_childs(&self, parent_id: &str) -> Vec<&Selector> {
        let mut found = BTreeSet::new();
        if let Some(parent) = self.get(parent_id) {
            self.add_page_childs(parent, &mut found, &mut HashSet::new());
        }
        found.into_iter().map(|pos| &self.selectors[pos]).collect()
    }

    fn add_page_childs(
        &self,
        parent: &Selector,
        found: &mut BTreeSet<usize>,
        seen: &mut HashSet<String>,
    ) {
        if !parent.kind.will_return_items() || !seen.insert(parent.id.clone()) {
            return;
        }
        for (pos, child) in self.selectors.iter().enumerate() {
            if child.has_parent(&parent.id) {
                found.insert(pos);
                self.add_page_childs(child, found, seen);
            }
        }
    }

    /// Page-local CSS query for an element: the css of every breadcrumb
    /// entry that stays on the page, then the target's own css.
    pub fn get_one_page_css(&self, selector_id: &str, breadcrumb: &[&str]) -> String {
        let css = self
            .get(selector_id)
            .map(|s| s.css.clone())
            .unwrap_or_default();
        let parent_css = self.get_one_page_parent_css(breadcrumb);
        [parent_css, css]
            .iter()
            .filter(|s| !s.is_empty())
            .cloned()
            .collect::<Vec<_>>()
            .join(" ")
    }

    pub fn get_one_page_parent_css(&self, breadcrumb: &[&str]) -> String {
        breadcrumb
            .iter()
            .filter_map(|parent_id| self.get(parent_id))
            .filter(|parent| parent.kind.will_return_items())
            .map(|parent| parent.css.as_str())
            .filter(|css| !css.is_empty())
            .collect::<Vec<_>>()
            .join(" ")
    }

    pub fn push(&mut self, selector: Selector) -> Result<(), SitemapError> {
        self.insert(self.selectors.len(), selector)
    }

    pub fn insert(&mut self, index: usize, selector: Selector) -> Result<(), SitemapError> {
        self.check_new(&selector)?;
        if self.position(&selector.id).is_some() {
            return Err(SitemapError::DuplicateId(selector.id));
        }
        self.selectors.insert(index, selector);
        Ok(())
    }

    /// Replaces the selector at `index`. A changed id is rejected when taken
    /// and otherwise rewritten through every `parents` list, the
    /// replacement's own self-edge included.
    pub fn set(&mut self, index: usize, selector: Selector) -> Result<(), SitemapError> {
        self.check_new(&selector)?;
        let current_id = self.selectors[index].id.clone();
        if current_id != selector.id && self.position(&selector.id).is_some() {
            return Err(SitemapError::DuplicateId(selector.id));
        }
        let new_id = selector.id.clone();
        self.selectors[index] = selector;
        if current_id != new_id {
            for selector in &mut self.selectors {
                selector.rename_parent(&current_id, &new_id);
            }
        }
        Ok(())
    }

    fn check_new(&self, selector: &Selector) -> Result<(), SitemapError> {
        if selector.id == ROOT_ID {
            return Err(SitemapError::ReservedRootId);
        }
        if selector.parents.is_empty() {
            return Err(SitemapError::EmptyParents(selector.id.clone()));
        }
        Ok(())
    }

    /// Removes the selector at `index`, strips its id from every `parents`
    /// list and transitively deletes selectors left without parents. A
    /// self-edge counts as a parent and keeps a selector alive.
    pub fn remove(&mut self, index: usize) {
        let selector_id = self.selectors[index].id.clone();
        let mut unlinked = vec![];
        for selector in &mut self.selectors {
            selector.remove_parent(&selector_id);
            if selector.parents.is_empty() && selector.id != selector_id {
                unlinked.push(selector.id.clone());
            }
        }
        self.selectors.remove(index);
        for unlinked_id in unlinked {
            if let Some(pos) = self.position(&unlinked_id) {
                self.remove(pos);
            }
        }
    }

    pub fn remove_id(&mut self, selector_id: &str) -> Result<(), SitemapError> {
        match self.position(selector_id) {
            Some(pos) => {
                self.remove(pos);
                Ok(())
            }
            None => Err(SitemapError::UnknownId(selector_id.to_string())),
        }
    }

    /// Seed URLs with `[start-stop]` / `[start-stop:step]` ranges expanded.
    /// The counter is zero-padded when both bounds are written equally wide.
    pub fn start_urls(&self) -> Vec<String> {
        let mut urls = vec![];
        for url in &self.start_urls {
            let caps = match START_URL_RANGE.captures(url) {
                Some(caps) => caps,
                None => {
                    urls.push(url.clone());
                    continue;
                }
            };
            let (start_str, stop_str) = (&caps[2], &caps[3]);
            let bounds = (start_str.parse::<u64>(), stop_str.parse::<u64>());
            let (start, stop) = match bounds {
                (Ok(start), Ok(stop)) => (start, stop),
                _ => {
                    urls.push(url.clone());
                    continue;
                }
            };
            let step = caps
                .get(4)
                .and_then(|m| m.as_str().parse::<u64>().ok())
                .unwrap_or(1)
                .max(1);
            let width = if start_str.len() == stop_str.len() {
                start_str.len()
            } else {
                1
            };
            let mut i = start;
            while i <= stop {
                urls.push(format!("{}{:0w$}{}", &caps[1], i, &caps[5], w = width));
                i += step;
            }
        }
        urls
    }

    /// CSV export: a header row built from `columns`, then one row per
    /// record. Cells that are not plain strings are JSON encoded.
    pub fn csv_rows(&self, records: &[Record]) -> Vec<Vec<String>> {
        let headers = self.columns();
        let mut rows = vec![headers.clone()];
        for record in records {
            rows.push(
                headers
                    .iter()
                    .map(|header| match record.get(header) {
                        None => String::new(),
                        Some(serde_json::Value::String(cell)) => cell.clone(),
                        Some(cell) => cell.to_string(),
                    })
                    .collect(),
            );
        }
        rows
    }

    /// Loads the browser-extension interchange format (see `SitemapDoc`).
    pub fn from_json(raw: &str) -> Result<Sitemap, SitemapError> {
        let doc: SitemapDoc = serde_json::from_str(raw)?;
        doc.try_into()
    }

    pub fn to_json(&self) -> Result<String, SitemapError> {
        Ok(serde_json::to_string(&SitemapDoc::from(self))?)
    }
}

/// The interchange schema shared with the browser extension:
/// `_id` / `startUrl` / `selectors[]` with `selector`, `parentSelectors`
/// and `multiple` spellings. Fields at their defaults are omitted on output.
#[derive(Debug, Serialize, Deserialize)]
pub(crate) struct SitemapDoc {
    #[serde(rename = "_id")]
    id: String,
    #[serde(
        rename = "startUrl",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    start_url: Option<OneOrMany>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    selectors: Vec<SelectorDoc>,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(untagged)]
enum OneOrMany {
    One(String),
    Many(Vec<String>),
}

#[derive(Debug, Serialize, Deserialize)]
struct SelectorDoc {
    id: String,
    #[serde(rename = "type")]
    kind: Kind,
    #[serde(rename = "selector", default, skip_serializing_if = "String::is_empty")]
    css: String,
    #[serde(rename = "parentSelectors")]
    parents: Vec<String>,
    #[serde(rename = "multiple", default = "many_default", skip_serializing_if = "is_many_default")]
    many: bool,
    #[serde(default, skip_serializing_if = "is_zero")]
    delay: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    regex: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    extract: Option<String>,
    #[serde(
        rename = "downloadImage",
        default,
        skip_serializing_if = "is_false"
    )]
    download_image: bool,
}

fn many_default() -> bool {
    true
}

fn is_many_default(many: &bool) -> bool {
    *many
}

fn is_zero(delay: &u64) -> bool {
    *delay == 0
}

fn is_false(flag: &bool) -> bool {
    !*flag
}

impl TryFrom<SitemapDoc> for Sitemap {
    type Error = SitemapError;

    fn try_from(doc: SitemapDoc) -> Result<Sitemap, SitemapError> {
        let mut sitemap = Sitemap::new(&doc.id);
        sitemap.start_urls = match doc.start_url {
            None => vec![],
            Some(OneOrMany::One(url)) => vec![url],
            Some(OneOrMany::Many(urls)) => urls,
        };
        validate_start_urls(&sitemap.start_urls)?;
        for s in doc.selectors {
            if let Some(pattern) = &s.regex {
                if Regex::new(pattern).is_err() {
                    return Err(SitemapError::InvalidRegex {
                        id: s.id,
                        pattern: pattern.clone(),
                    });
                }
            }
            sitemap.push(Selector {
                id: s.id,
                kind: s.kind,
                css: s.css,
                parents: s.parents,
                many: s.many,
                delay: s.delay,
                regex: s.regex,
                extract: s.extract,
                download_image: s.download_image,
            })?;
        }
        Ok(sitemap)
    }
}

fn validate_start_urls(urls: &[String]) -> Result<(), SitemapError> {
    for url in urls {
        if let Some(caps) = START_URL_RANGE.captures(url) {
            let step_is_zero = caps
                .get(4)
                .map(|m| m.as_str().chars().all(|c| c == '0'))
                .unwrap_or(false);
            if step_is_zero {
                return Err(SitemapError::MalformedStartUrl(url.clone()));
            }
        }
    }
    Ok(())
}

impl From<&Sitemap> for SitemapDoc {
    fn from(sitemap: &Sitemap) -> SitemapDoc {
        let start_url = match sitemap.start_urls.len() {
            0 => None,
            1 => Some(OneOrMany::One(sitemap.start_urls[0].clone())),
            _ => Some(OneOrMany::Many(sitemap.start_urls.clone())),
        };
        SitemapDoc {
            id: sitemap.id.clone(),
            start_url,
            selectors: sitemap
                .selectors
                .iter()
                .map(|s| SelectorDoc {
                    id: s.id.clone(),
                    kind: s.kind,
                    css: s.css.clone(),
                    parents: s.parents.clone(),
                    many: s.many,
                    delay: s.delay,
                    regex: s.regex.clone(),
                    extract: s.extract.clone(),
                    download_image: s.download_image,
                })
                .collect(),
        }
    }
}
