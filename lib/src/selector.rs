use std::{thread, time::Duration};

use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tracing::warn;

use crate::document::Elem;

/// One extracted row. Keys are column names; control fields (`_follow`,
/// `_follow_id`, `_image_base64`) ride along until the scraper consumes them.
pub type Record = Map<String, Value>;

/// Control field carrying the URL a link record wants followed.
pub const FOLLOW: &str = "_follow";
/// Control field naming the selector that produced a follow URL.
pub const FOLLOW_ID: &str = "_follow_id";
/// Base64 payload added by the image download pass.
pub const IMAGE_BASE64: &str = "_image_base64";

/// The closed family of selector kinds. Capabilities are fixed per kind;
/// everything configurable lives on [`Selector`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Kind {
    Text,
    Html,
    Image,
    Link,
    Group,
    Item,
}

impl Kind {
    pub fn can_return_many(self) -> bool {
        !matches!(self, Kind::Group)
    }

    /// Group selectors fold all per-item records into one row.
    pub fn inline_many(self) -> bool {
        matches!(self, Kind::Group)
    }

    pub fn can_have_childs(self) -> bool {
        matches!(self, Kind::Link | Kind::Item)
    }

    /// Only Item selectors open a nested scope on the same page.
    pub fn can_have_local_childs(self) -> bool {
        matches!(self, Kind::Item)
    }

    pub fn can_create_new_jobs(self) -> bool {
        matches!(self, Kind::Link)
    }

    /// Item selectors yield elements for their children rather than records.
    pub fn will_return_items(self) -> bool {
        matches!(self, Kind::Item)
    }
}

/// One node of the sitemap graph: locates elements under a parent element
/// and turns each into zero or more records.
#[derive(Debug, Clone, PartialEq)]
pub struct Selector {
    pub id: String,
    pub kind: Kind,
    /// CSS query run against the parent element; empty means the parent
    /// itself is the item.
    pub css: String,
    /// Incoming edges; `_root` and the selector's own id are both legal.
    pub parents: Vec<String>,
    /// When false only the first matched item produces records.
    pub many: bool,
    /// Milliseconds slept before extraction.
    pub delay: u64,
    /// Applied to the extracted value under `id`; no match turns it null.
    pub regex: Option<String>,
    /// Group only: also extract this attribute per item.
    pub extract: Option<String>,
    /// Image only: fetch the image and record it base64 encoded.
    pub download_image: bool,
}

impl Selector {
    pub fn new(kind: Kind, id: &str) -> Selector {
        Selector {
            id: id.to_string(),
            kind,
            css: String::new(),
            parents: vec![crate::sitemap::ROOT_ID.to_string()],
            many: true,
            delay: 0,
            regex: None,
            extract: None,
            download_image: false,
        }
    }

    pub fn css(mut self, css: &str) -> Self {
        self.css = css.to_string();
        self
    }

    pub fn parents(mut self, parents: &[&str]) -> Self {
        self.parents = parents.iter().map(|p| p.to_string()).collect();
        self
    }

    pub fn many(mut self, many: bool) -> Self {
        self.many = many;
        self
    }

    pub fn delay(mut self, millis: u64) -> Self {
        self.delay = millis;
        self
    }

    pub fn regex(mut self, pattern: &str) -> Self {
        self.regex = Some(pattern.to_string());
        self
    }

    pub fn extract(mut self, attr: &str) -> Self {
        self.extract = Some(attr.to_string());
        self
    }

    pub fn download_image(mut self, download: bool) -> Self {
        self.download_image = download;
        self
    }

    pub fn will_return_many(&self) -> bool {
        self.kind.can_return_many() && self.many
    }

    /// The column names this selector contributes to the output schema.
    pub fn columns(&self) -> Vec<String> {
        match self.kind {
            Kind::Item => vec![],
            Kind::Image => vec![format!("{}-src", self.id)],
            Kind::Link => vec![self.id.clone(), format!("{}-href", self.id)],
            _ => vec![self.id.clone()],
        }
    }

    pub fn has_parent(&self, parent_id: &str) -> bool {
        self.parents.iter().any(|p| p == parent_id)
    }

    pub fn remove_parent(&mut self, parent_id: &str) {
        if let Some(pos) = self.parents.iter().position(|p| p == parent_id) {
            self.parents.remove(pos);
        }
    }

    pub fn rename_parent(&mut self, parent_id: &str, new_id: &str) {
        if let Some(pos) = self.parents.iter().position(|p| p == parent_id) {
            self.parents[pos] = new_id.to_string();
        }
    }

    /// Elements matched under `parent`. With `many == false` at most one is
    /// returned; an empty css query selects the parent itself.
    pub fn get_items<'a>(&self, parent: Elem<'a>) -> Vec<Elem<'a>> {
        let mut items = if self.css.trim().is_empty() {
            vec![parent]
        } else {
            parent.select(&self.css)
        };
        if !self.many {
            items.truncate(1);
        }
        items
    }

    /// Records produced under `parent`. Item selectors yield no records here;
    /// the engine walks into their elements via [`Selector::get_items`].
    pub fn get_data(&self, parent: Elem<'_>) -> Vec<Record> {
        if self.delay > 0 {
            thread::sleep(Duration::from_millis(self.delay));
        }
        if self.kind.will_return_items() {
            return vec![];
        }

        let regex = self.compiled_regex();
        let mut records = vec![];
        let mut inlined = vec![];
        let mut yielded = false;
        for item in self.get_items(parent) {
            for mut record in self.item_data(item) {
                if let Some(regex) = &regex {
                    self.apply_regex(&mut record, regex);
                }
                if self.kind.inline_many() {
                    inlined.push(Value::Object(record));
                } else {
                    records.push(record);
                    yielded = true;
                }
            }
            if yielded && !self.many {
                break;
            }
        }

        if self.kind.inline_many() {
            let mut record = Record::new();
            record.insert(self.id.clone(), Value::Array(inlined));
            records.push(record);
        } else if !yielded {
            records.extend(self.noitems_data());
        }
        records
    }

    fn item_data(&self, item: Elem<'_>) -> Vec<Record> {
        let mut record = Record::new();
        match self.kind {
            Kind::Text => {
                record.insert(self.id.clone(), Value::String(item.text_with_breaks()));
            }
            Kind::Html => {
                record.insert(self.id.clone(), Value::String(item.inner_html()));
            }
            Kind::Image => {
                record.insert(format!("{}-src", self.id), attr_value(item, "src"));
            }
            Kind::Link => {
                let href = attr_value(item, "href");
                record.insert(self.id.clone(), Value::String(item.text()));
                record.insert(format!("{}-href", self.id), href.clone());
                record.insert(FOLLOW.to_string(), href);
                record.insert(FOLLOW_ID.to_string(), Value::String(self.id.clone()));
            }
            Kind::Group => {
                record.insert(self.id.clone(), Value::String(item.text()));
                if let Some(attr) = &self.extract {
                    record.insert(format!("{}-{}", self.id, attr), attr_value(item, attr));
                }
            }
            Kind::Item => unreachable!("item selectors never produce records"),
        }
        vec![record]
    }

    /// The record emitted when nothing matched. Link and Item selectors
    /// emit nothing; the rest report their columns as null.
    fn noitems_data(&self) -> Vec<Record> {
        let mut record = Record::new();
        match self.kind {
            Kind::Link | Kind::Item => return vec![],
            Kind::Image => {
                record.insert(format!("{}-src", self.id), Value::Null);
            }
            _ => {
                record.insert(self.id.clone(), Value::Null);
            }
        }
        vec![record]
    }

    fn compiled_regex(&self) -> Option<Regex> {
        let pattern = self.regex.as_deref()?;
        match Regex::new(pattern) {
            Ok(regex) => Some(regex),
            Err(_) => {
                warn!("selector {}: ignoring invalid regex {:?}", self.id, pattern);
                None
            }
        }
    }

    fn apply_regex(&self, record: &mut Record, regex: &Regex) {
        let value = match record.get(&self.id) {
            Some(Value::String(value)) => value.clone(),
            _ => return,
        };
        let found = regex
            .find(&value)
            .map(|m| Value::String(m.as_str().to_string()))
            .unwrap_or(Value::Null);
        record.insert(self.id.clone(), found);
    }
}

fn attr_value(item: Elem<'_>, name: &str) -> Value {
    item.attr(name)
        .map(|v| Value::String(v.to_string()))
        .unwrap_or(Value::Null)
}
