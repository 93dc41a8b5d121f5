use std::collections::{HashSet, VecDeque};

use lazy_static::lazy_static;
use regex::Regex;

use crate::job::Job;

lazy_static! {
    static ref DOCUMENT_URL: Regex = Regex::new(r"(?i)\.(doc|docx|pdf|ppt|pptx|odt)$").unwrap();
}

/// Deduplicating FIFO of jobs. A URL is marked scraped the moment its job
/// is accepted, so re-adding it later is a no-op (first wins).
#[derive(Default)]
pub struct Queue {
    jobs: VecDeque<Job>,
    scraped_urls: HashSet<String>,
}

impl Queue {
    pub fn new() -> Queue {
        Queue::default()
    }

    /// Returns false when the job's URL was already scraped or points at a
    /// document download.
    pub fn add(&mut self, job: Job) -> bool {
        if !self.can_be_added(&job) {
            return false;
        }
        self.scraped_urls.insert(job.url.clone());
        self.jobs.push_back(job);
        true
    }

    /// Mirrors the rejection rules of [`Queue::add`] without side effects.
    pub fn can_be_added(&self, job: &Job) -> bool {
        !self.is_scraped(&job.url) && !DOCUMENT_URL.is_match(&job.url)
    }

    pub fn is_scraped(&self, url: &str) -> bool {
        self.scraped_urls.contains(url)
    }

    pub fn len(&self) -> usize {
        self.jobs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.jobs.is_empty()
    }

    pub fn get_next_job(&mut self) -> Option<Job> {
        self.jobs.pop_front()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn added_jobs_come_back_in_fifo_order() {
        let mut queue = Queue::new();
        assert!(queue.add(Job::new("http://test.lv/", "_root")));
        assert!(queue.add(Job::new("http://test.lv/2", "_root")));
        assert_eq!(queue.len(), 2);
        assert_eq!(queue.get_next_job().unwrap().url, "http://test.lv/");
        assert_eq!(queue.get_next_job().unwrap().url, "http://test.lv/2");
        assert!(queue.get_next_job().is_none());
    }

    #[test]
    fn popped_urls_stay_scraped() {
        let mut queue = Queue::new();
        queue.add(Job::new("http://test.lv/", "_root"));
        queue.get_next_job();
        assert_eq!(queue.len(), 0);

        assert!(!queue.add(Job::new("http://test.lv/", "_root")));
        assert_eq!(queue.len(), 0);
    }

    #[test]
    fn adding_twice_equals_adding_once() {
        let mut queue = Queue::new();
        assert!(queue.add(Job::new("http://x/a", "_root")));
        assert!(!queue.add(Job::new("http://x/a", "_root")));
        assert_eq!(queue.len(), 1);
    }

    #[test]
    fn document_urls_are_rejected() {
        let mut queue = Queue::new();
        assert!(!queue.add(Job::new("http://test.lv/test.doc", "_root")));
        assert!(!queue.add(Job::new("http://test.lv/test.PDF", "_root")));
        assert!(!queue.add(Job::new("http://x/b.pdf", "_root")));
        assert_eq!(queue.len(), 0);

        // the extension has to terminate the path
        assert!(queue.add(Job::new("http://test.lv/doc.html", "_root")));
    }

    #[test]
    fn can_be_added_has_no_side_effects() {
        let mut queue = Queue::new();
        let job = Job::new("http://test.lv/", "_root");
        assert!(queue.can_be_added(&job));
        assert!(queue.can_be_added(&job));
        assert!(queue.add(job));
        assert!(!queue.can_be_added(&Job::new("http://test.lv/", "_root")));
    }
}
