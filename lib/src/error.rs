use thiserror::Error;
use url::ParseError;

/// Errors surfaced when loading or mutating a sitemap. The extraction
/// pipeline itself never fails; bad HTML degrades to null records.
#[derive(Error, Debug)]
pub enum SitemapError {
    #[error("selector id {0:?} is already taken")]
    DuplicateId(String),

    #[error("the id \"_root\" is reserved for the document root")]
    ReservedRootId,

    #[error("selector {0:?} has no parents")]
    EmptyParents(String),

    #[error("no selector with id {0:?}")]
    UnknownId(String),

    #[error("selector {id:?} has an invalid regex {pattern:?}")]
    InvalidRegex { id: String, pattern: String },

    #[error("start url {0:?} has a malformed range")]
    MalformedStartUrl(String),

    #[error("the sitemap definition could not be parsed")]
    MalformedDefinition(#[from] serde_json::Error),

    #[error("the URL was not able to be parsed")]
    InvalidUrl(#[from] ParseError),
}

/// Errors raised by a `Fetcher` implementation. A failed fetch terminates
/// the job that requested it; the scrape run continues.
#[derive(Error, Debug)]
pub enum FetchError {
    #[error("request for {url} failed")]
    Request {
        url: String,
        #[source]
        source: reqwest::Error,
    },

    #[error("request for {url} returned status {status}")]
    Status { url: String, status: u16 },

    #[error("no response recorded for {0}")]
    NotFound(String),
}
