use scraper::{node::Node, ElementRef, Html, Selector};
use tracing::warn;

/// A parsed HTML page. Thin wrapper around the `scraper` crate so the rest
/// of the engine never touches the parser API directly. Parsing never fails;
/// malformed input simply produces a tree in which selectors match nothing.
pub struct Doc {
    html: Html,
}

impl Doc {
    /// Parses a response body. Invalid UTF-8 is replaced lossily.
    pub fn parse(body: &[u8]) -> Doc {
        Doc::parse_str(&String::from_utf8_lossy(body))
    }

    pub fn parse_str(body: &str) -> Doc {
        Doc {
            html: Html::parse_document(body),
        }
    }

    /// The element all `_root` selectors are evaluated against.
    pub fn root(&self) -> Elem<'_> {
        Elem(self.html.root_element())
    }
}

/// A handle on one element of a parsed document.
#[derive(Debug, Clone, Copy)]
pub struct Elem<'a>(ElementRef<'a>);

impl PartialEq for Elem<'_> {
    fn eq(&self, other: &Self) -> bool {
        std::ptr::eq(self.0.tree(), other.0.tree()) && self.0.id() == other.0.id()
    }
}

impl<'a> Elem<'a> {
    /// Runs a CSS query against this element's descendants. An invalid query
    /// matches nothing.
    pub fn select(&self, css: &str) -> Vec<Elem<'a>> {
        let query = match Selector::parse(css) {
            Ok(query) => query,
            Err(_) => {
                warn!("ignoring invalid css query: {}", css);
                return vec![];
            }
        };
        self.0.select(&query).map(Elem).collect()
    }

    /// The element's text content with all whitespace runs collapsed.
    pub fn text(&self) -> String {
        normalize(&self.0.text().collect::<String>())
    }

    /// Text content for `Text` selectors: `<script>` and `<style>` subtrees
    /// are ignored and every `<br>` becomes a newline, with runs of breaks
    /// collapsing into one.
    pub fn text_with_breaks(&self) -> String {
        let mut parts = vec![];
        let mut current = String::new();
        collect_text(self.0, &mut parts, &mut current);
        parts.push(current);

        let lines: Vec<String> = parts
            .iter()
            .map(|p| normalize(p))
            .filter(|p| !p.is_empty())
            .collect();
        lines.join("\n")
    }

    pub fn inner_html(&self) -> String {
        self.0.inner_html()
    }

    /// The element's own markup, descendants included.
    pub fn outer_html(&self) -> String {
        self.0.html()
    }

    pub fn attr(&self, name: &str) -> Option<&'a str> {
        self.0.value().attr(name)
    }

    pub fn tag_name(&self) -> &'a str {
        self.0.value().name()
    }
}

fn collect_text(el: ElementRef, parts: &mut Vec<String>, current: &mut String) {
    for child in el.children() {
        match child.value() {
            Node::Text(t) => current.push_str(&t.text),
            Node::Element(e) => match e.name() {
                "script" | "style" => {}
                "br" => parts.push(std::mem::take(current)),
                _ => {
                    if let Some(child) = ElementRef::wrap(child) {
                        collect_text(child, parts, current);
                    }
                }
            },
            _ => {}
        }
    }
}

fn normalize(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}
