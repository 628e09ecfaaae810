//! The contract over the external HTTP fetcher.
//!
//! The engine never performs network I/O itself; it hands absolute
//! URLs to a [`Fetcher`] along with a completion callback. Completions
//! may be invoked from any thread and are routed back onto the engine's
//! event loop by the callback the engine supplies.

pub mod memory;

use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use thiserror::Error;
use url::Url;

/// Request priority; lower values are served first. Metadata is fetched
/// ahead of content and bulk delta parts so the scanner can keep
/// expanding the graph while payloads download.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord)]
pub struct Priority(pub i32);

impl Priority {
    pub const DEFAULT: Self = Self(0);
    pub const METADATA: Self = Self(-100);
    pub const CONTENT: Self = Self::DEFAULT;
}

/// Cancellation token shared between the engine and in-flight
/// operations.
#[derive(Clone, Debug, Default)]
pub struct Cancel(Arc<AtomicBool>);

impl Cancel {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::Relaxed);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::Relaxed)
    }
}

#[derive(Debug, Error)]
#[non_exhaustive]
pub enum Error {
    #[error("resource not found: {0}")]
    NotFound(Url),

    #[error("resource {url} exceeds maximum size of {limit} bytes")]
    TooLarge { url: Url, limit: u64 },

    #[error("metalink resolution is not supported by this fetcher")]
    MetalinkUnsupported,

    #[error("fetch cancelled")]
    Cancelled,

    #[error("transport error fetching {url}: {reason}")]
    Transport { url: Url, reason: String },

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl Error {
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound(_))
    }
}

/// One fetch request.
#[derive(Clone, Debug)]
pub struct Request {
    pub url: Url,
    /// Fail the fetch if the resource exceeds this size; `None` is
    /// unbounded.
    pub max_size: Option<u64>,
    pub priority: Priority,
    pub cancel: Cancel,
}

/// TLS and proxy settings derived from the remote configuration.
#[derive(Clone, Debug, Default)]
pub struct FetcherConfig {
    pub tls_permissive: bool,
    pub tls_client_cert_path: Option<PathBuf>,
    pub tls_client_key_path: Option<PathBuf>,
    pub tls_ca_path: Option<PathBuf>,
    pub proxy: Option<String>,
}

/// Result of resolving a metalink: the mirror that answered and the
/// summary payload the metalink vouched for.
#[derive(Clone, Debug)]
pub struct Metalink {
    pub target: Url,
    pub summary: Vec<u8>,
}

pub type OnStream = Box<dyn FnOnce(Result<Vec<u8>, Error>) + Send>;
pub type OnTemp = Box<dyn FnOnce(Result<PathBuf, Error>) + Send>;
pub type OnMetalink = Box<dyn FnOnce(Result<Metalink, Error>) + Send>;

pub trait Fetcher {
    /// Apply remote-derived TLS and proxy settings before any request
    /// is issued.
    fn configure(&mut self, config: FetcherConfig) {
        let _ = config;
    }

    /// Fetch a small resource entirely into memory.
    fn stream(&mut self, request: Request, on_complete: OnStream);

    /// Fetch a resource into a tempfile inside the fetcher's temp
    /// directory, resuming a partial download when possible. The
    /// completion receives the tempfile path; ownership of the file
    /// passes to the caller.
    fn fetch_to_temp(&mut self, request: Request, on_complete: OnTemp);

    /// Resolve a metalink to a mirror URL plus the summary it carries.
    fn resolve_metalink(&mut self, request: Request, on_complete: OnMetalink) {
        let _ = request;
        on_complete(Err(Error::MetalinkUnsupported));
    }

    /// Total bytes transferred by this fetcher so far; monotonic.
    fn bytes_transferred(&self) -> u64;
}
