use base64::{engine::general_purpose::STANDARD as BASE64, Engine as _};
use serde_json::Value;
use tracing::warn;
use url::Url;

use crate::document::Doc;
use crate::error::FetchError;
use crate::fetch::Fetcher;
use crate::selector::{Kind, Record, IMAGE_BASE64};
use crate::sitemap::Sitemap;

/// One unit of work: a URL to fetch plus the scalar context inherited from
/// the page where the link was found.
#[derive(Debug)]
pub struct Job {
    pub url: String,
    /// The selector this job was spawned under; `_root` for seeds.
    pub parent_id: String,
    /// Values carried over from the parent page. They win over anything the
    /// new page extracts: they are the link context the user already chose.
    pub base_data: Record,
}

impl Job {
    pub fn new(url: &str, parent_id: &str) -> Job {
        Job {
            url: url.to_string(),
            parent_id: parent_id.to_string(),
            base_data: Record::new(),
        }
    }

    /// A follow job. The URL is resolved against the parent job's URL, so
    /// relative hrefs work the way they do in the browser.
    pub fn child_of(url: &str, parent_id: &str, base_data: Record, parent: &Job) -> Job {
        Job {
            url: combine_urls(&parent.url, url),
            parent_id: parent_id.to_string(),
            base_data,
        }
    }

    /// Fetches the page and runs extraction rooted at this job's parent
    /// selector. Base data is merged into every record afterwards.
    pub async fn execute(
        &self,
        sitemap: &Sitemap,
        fetcher: &dyn Fetcher,
    ) -> Result<Vec<Record>, FetchError> {
        let body = fetcher.get(&self.url).await?;

        let mut records = {
            let doc = Doc::parse(&body);
            sitemap.extract(&self.parent_id, doc.root())
        };
        for record in &mut records {
            for (key, value) in &self.base_data {
                record.insert(key.clone(), value.clone());
            }
        }

        self.download_images(sitemap, fetcher, &mut records).await;
        Ok(records)
    }

    /// Post-pass for image selectors configured with `download_image`:
    /// fetch each recorded src and attach the payload base64 encoded.
    async fn download_images(
        &self,
        sitemap: &Sitemap,
        fetcher: &dyn Fetcher,
        records: &mut [Record],
    ) {
        let src_keys: Vec<String> = sitemap
            .get_all(Some(&self.parent_id))
            .iter()
            .filter(|s| s.kind == Kind::Image && s.download_image)
            .map(|s| format!("{}-src", s.id))
            .collect();
        if src_keys.is_empty() {
            return;
        }

        for record in records.iter_mut() {
            for key in &src_keys {
                let src = match record.get(key) {
                    Some(Value::String(src)) => combine_urls(&self.url, src),
                    _ => continue,
                };
                match fetcher.get(&src).await {
                    Ok(body) => {
                        record.insert(IMAGE_BASE64.to_string(), Value::String(BASE64.encode(&body)));
                    }
                    Err(err) => warn!("image download for {} failed: {}", src, err),
                }
            }
        }
    }
}

/// Standard URL-join semantics; an unresolvable pair falls back to the
/// child URL untouched.
fn combine_urls(parent_url: &str, child_url: &str) -> String {
    match Url::parse(parent_url) {
        Ok(base) => base
            .join(child_url)
            .map(|url| url.to_string())
            .unwrap_or_else(|_| child_url.to_string()),
        Err(_) => child_url.to_string(),
    }
}
