//! Headless sitemap scraper: extracts structured records from HTML pages by
//! walking a user-defined *sitemap*, a directed graph of selectors that
//! describe how to locate elements, what to read from them and when to
//! follow links to new pages.
//!
//! The pieces compose bottom-up:
//!
//! - [`document`] wraps HTML parsing and CSS queries,
//! - [`selector`] turns one parent element into records,
//! - [`sitemap`] holds the graph and [`extract`] interprets it,
//! - [`job`], [`queue`] and [`scraper`] drive the fetch loop,
//! - [`fetch`] and [`store`] are the seams to the outside world.

pub mod document;
pub mod error;
pub mod extract;
pub mod fetch;
pub mod job;
pub mod queue;
pub mod scraper;
pub mod selector;
pub mod sitemap;
pub mod store;

pub use document::{Doc, Elem};
pub use error::{FetchError, SitemapError};
pub use extract::Tree;
pub use fetch::{Fetcher, HttpFetcher, MemoryFetcher};
pub use job::Job;
pub use queue::Queue;
pub use scraper::{ScrapeConfig, Scraper};
pub use selector::{Kind, Record, Selector};
pub use sitemap::{Sitemap, ROOT_ID};
pub use store::{JsonStore, MemoryStore, Store};
