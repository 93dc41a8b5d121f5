use std::sync::Arc;
use std::time::Duration;

use color_eyre::Result;
use serde_json::Value;
use tokio::time::{sleep, Instant};
use tracing::{info, warn};

use crate::fetch::Fetcher;
use crate::job::Job;
use crate::queue::Queue;
use crate::selector::{Record, FOLLOW, FOLLOW_ID};
use crate::sitemap::{Sitemap, ROOT_ID};
use crate::store::Store;

/// Pacing knobs for one scrape run.
#[derive(Debug, Clone)]
pub struct ScrapeConfig {
    /// Minimum wall-clock gap between two fetches.
    pub request_interval: Duration,
    /// Extra wait after each fetch, for sites that deserve gentleness.
    pub pageload_delay: Duration,
}

impl Default for ScrapeConfig {
    fn default() -> ScrapeConfig {
        ScrapeConfig {
            request_interval: Duration::from_millis(2000),
            pageload_delay: Duration::ZERO,
        }
    }
}

/// Drives one sitemap end-to-end: seeds the queue from the start URLs,
/// drains it serially and routes every record either to the store or into
/// a new follow job.
pub struct Scraper {
    sitemap: Sitemap,
    queue: Queue,
    fetcher: Arc<dyn Fetcher>,
    store: Arc<dyn Store>,
    config: ScrapeConfig,
}

impl Scraper {
    pub fn new(
        sitemap: Sitemap,
        fetcher: Arc<dyn Fetcher>,
        store: Arc<dyn Store>,
        config: ScrapeConfig,
    ) -> Scraper {
        Scraper {
            sitemap,
            queue: Queue::new(),
            fetcher,
            store,
            config,
        }
    }

    pub async fn run(&mut self) -> Result<()> {
        if self.sitemap.has_recursive_selectors() {
            warn!(
                "sitemap {} has recursive selectors; relying on url dedup to terminate",
                self.sitemap.id
            );
        }
        self.init_first_jobs();

        let mut last_fetch: Option<Instant> = None;
        let mut pages = 0usize;
        while let Some(job) = self.queue.get_next_job() {
            if let Some(at) = last_fetch {
                let since = at.elapsed();
                if since < self.config.request_interval {
                    sleep(self.config.request_interval - since).await;
                }
            }
            last_fetch = Some(Instant::now());

            match job.execute(&self.sitemap, self.fetcher.as_ref()).await {
                Err(err) => {
                    // the url stays marked scraped, so a broken page is
                    // never retried within this run
                    warn!("job for {} terminated: {}", job.url, err);
                }
                Ok(records) => {
                    pages += 1;
                    if !self.config.pageload_delay.is_zero() {
                        sleep(self.config.pageload_delay).await;
                    }
                    for record in records {
                        self.route_record(record, &job).await?;
                    }
                }
            }
        }
        info!("finished scraping {} ({} pages)", self.sitemap.id, pages);
        Ok(())
    }

    /// Expands the sitemap's start URLs into seed jobs under `_root`.
    pub fn init_first_jobs(&mut self) {
        for url in self.sitemap.start_urls() {
            self.queue.add(Job::new(&url, ROOT_ID));
        }
    }

    pub fn queue_size(&self) -> usize {
        self.queue.len()
    }

    /// A record asks for a follow job when it carries the control fields
    /// and the link selector that produced it has children to extract.
    pub fn record_can_have_child_jobs(&self, record: &Record) -> bool {
        if !record.contains_key(FOLLOW) {
            return false;
        }
        match record.get(FOLLOW_ID) {
            Some(Value::String(follow_id)) => !self.sitemap.get_direct_childs(follow_id).is_empty(),
            _ => false,
        }
    }

    /// Follow records spawn a child job and are dropped (the child records
    /// represent them); everything else is saved.
    async fn route_record(&mut self, mut record: Record, job: &Job) -> Result<()> {
        if self.record_can_have_child_jobs(&record) {
            let follow_id = record.remove(FOLLOW_ID);
            let follow_url = record.remove(FOLLOW);
            if let (Some(Value::String(follow_url)), Some(Value::String(follow_id))) =
                (follow_url, follow_id)
            {
                let child = Job::child_of(&follow_url, &follow_id, record.clone(), job);
                if self.queue.can_be_added(&child) {
                    self.queue.add(child);
                    return Ok(());
                }
            }
        }
        self.store.save_record(&self.sitemap.id, &record).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fetch::MemoryFetcher;
    use crate::selector::{Kind, Selector};
    use crate::store::MemoryStore;
    use serde_json::json;

    fn quick_config() -> ScrapeConfig {
        ScrapeConfig {
            request_interval: Duration::ZERO,
            pageload_delay: Duration::ZERO,
        }
    }

    fn scraper_for(sitemap: Sitemap, fetcher: MemoryFetcher) -> (Scraper, Arc<MemoryStore>) {
        let store = Arc::new(MemoryStore::new());
        let scraper = Scraper::new(
            sitemap,
            Arc::new(fetcher),
            store.clone(),
            quick_config(),
        );
        (scraper, store)
    }

    #[tokio::test]
    async fn scrapes_one_page() {
        let mut sitemap = Sitemap::with_selectors(
            "test",
            vec![Selector::new(Kind::Text, "a").css("a").many(false)],
        )
        .unwrap();
        sitemap.set_start_urls(["http://test.lv/"]);

        let mut fetcher = MemoryFetcher::new();
        fetcher.insert("http://test.lv/", "<a>a</a>");

        let (mut scraper, store) = scraper_for(sitemap, fetcher);
        scraper.run().await.unwrap();

        let records = store.records("test").await.unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(serde_json::Value::Object(records[0].clone()), json!({"a": "a"}));
    }

    #[tokio::test]
    async fn follows_links_into_child_pages() {
        let mut sitemap = Sitemap::with_selectors(
            "test",
            vec![
                Selector::new(Kind::Link, "link").css("a"),
                Selector::new(Kind::Text, "b")
                    .css("b")
                    .parents(&["link"])
                    .many(false),
            ],
        )
        .unwrap();
        sitemap.set_start_urls(["http://test.lv/"]);

        let mut fetcher = MemoryFetcher::new();
        fetcher.insert(
            "http://test.lv/",
            r#"<a href="http://test.lv/1/">test</a>"#,
        );
        fetcher.insert("http://test.lv/1/", "<b>b</b>");

        let (mut scraper, store) = scraper_for(sitemap, fetcher);
        scraper.run().await.unwrap();

        let records = store.records("test").await.unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(
            serde_json::Value::Object(records[0].clone()),
            json!({"link": "test", "link-href": "http://test.lv/1/", "b": "b"})
        );
    }

    #[tokio::test]
    async fn link_without_childs_is_saved_not_followed() {
        let mut sitemap = Sitemap::with_selectors(
            "test",
            vec![Selector::new(Kind::Link, "link").css("a")],
        )
        .unwrap();
        sitemap.set_start_urls(["http://test.lv/"]);

        let mut fetcher = MemoryFetcher::new();
        fetcher.insert(
            "http://test.lv/",
            r#"<a href="http://test.lv/1/">test</a>"#,
        );

        let (mut scraper, store) = scraper_for(sitemap, fetcher);
        scraper.run().await.unwrap();

        let records = store.records("test").await.unwrap();
        assert_eq!(records.len(), 1);
        // control fields are stripped on save
        assert_eq!(
            serde_json::Value::Object(records[0].clone()),
            json!({"link": "test", "link-href": "http://test.lv/1/"})
        );
    }

    #[tokio::test]
    async fn record_can_have_child_jobs_requires_direct_childs() {
        let sitemap = Sitemap::with_selectors(
            "test",
            vec![
                Selector::new(Kind::Link, "link_with_childs").css("a"),
                Selector::new(Kind::Link, "link_without_childs").css("a"),
                Selector::new(Kind::Text, "b")
                    .css("b")
                    .parents(&["link_with_childs"])
                    .many(false),
            ],
        )
        .unwrap();
        let (scraper, _) = scraper_for(sitemap, MemoryFetcher::new());

        let record = json!({"_follow": "http://example.com/",
                            "_follow_id": "link_with_childs"});
        assert!(scraper.record_can_have_child_jobs(record.as_object().unwrap()));

        let record = json!({"_follow": "http://example.com/",
                            "_follow_id": "link_without_childs"});
        assert!(!scraper.record_can_have_child_jobs(record.as_object().unwrap()));
    }

    #[tokio::test]
    async fn start_url_ranges_seed_multiple_jobs() {
        let mut sitemap = Sitemap::new("test");
        sitemap.set_start_urls(["http://test.lv/[1-100].html"]);
        let (mut scraper, _) = scraper_for(sitemap, MemoryFetcher::new());
        scraper.init_first_jobs();
        assert_eq!(scraper.queue_size(), 100);

        let mut sitemap = Sitemap::new("test");
        sitemap.set_start_urls([
            "http://example.com/1",
            "http://example.com/2",
            "http://example.com/3",
        ]);
        let (mut scraper, _) = scraper_for(sitemap, MemoryFetcher::new());
        scraper.init_first_jobs();
        assert_eq!(scraper.queue_size(), 3);
    }

    #[tokio::test]
    async fn failed_fetches_do_not_end_the_run() {
        let mut sitemap = Sitemap::with_selectors(
            "test",
            vec![Selector::new(Kind::Text, "a").css("a").many(false)],
        )
        .unwrap();
        sitemap.set_start_urls(["http://gone.lv/", "http://test.lv/"]);

        let mut fetcher = MemoryFetcher::new();
        fetcher.insert("http://test.lv/", "<a>a</a>");

        let (mut scraper, store) = scraper_for(sitemap, fetcher);
        scraper.run().await.unwrap();

        assert_eq!(store.records("test").await.unwrap().len(), 1);
    }
}
