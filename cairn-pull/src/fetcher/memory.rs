use std::collections::HashMap;
use std::io::Write as _;

use super::{Error, Fetcher, Metalink, OnMetalink, OnStream, OnTemp, Request};

/// A fetcher serving requests from an in-memory route table, keyed by
/// URL path. Completions are delivered synchronously, before the call
/// returns. Backs the test suite.
pub struct MemoryFetcher {
    routes: HashMap<String, Vec<u8>>,
    metalink: Option<Metalink>,
    tmp: tempfile::TempDir,
    transferred: u64,
    served: Vec<String>,
    /// Cancel every request's token the moment this path is served;
    /// simulates the user interrupting a pull mid-flight.
    cancel_after: Option<String>,
}

impl MemoryFetcher {
    pub fn new() -> std::io::Result<Self> {
        Ok(Self {
            routes: HashMap::new(),
            metalink: None,
            tmp: tempfile::tempdir()?,
            transferred: 0,
            served: Vec::new(),
            cancel_after: None,
        })
    }

    pub fn insert(&mut self, path: impl Into<String>, bytes: impl Into<Vec<u8>>) {
        self.routes.insert(path.into(), bytes.into());
    }

    pub fn remove(&mut self, path: &str) {
        self.routes.remove(path);
    }

    pub fn set_metalink(&mut self, metalink: Metalink) {
        self.metalink = Some(metalink);
    }

    pub fn cancel_after(&mut self, path: impl Into<String>) {
        self.cancel_after = Some(path.into());
    }

    /// Paths served so far, in order.
    pub fn served(&self) -> &[String] {
        &self.served
    }

    pub fn served_count(&self, path: &str) -> usize {
        self.served.iter().filter(|p| *p == path).count()
    }

    fn lookup(&mut self, request: &Request) -> Result<Vec<u8>, Error> {
        if request.cancel.is_cancelled() {
            return Err(Error::Cancelled);
        }
        let path = request.url.path().trim_start_matches('/').to_owned();
        self.served.push(path.clone());
        if self.cancel_after.as_deref() == Some(path.as_str()) {
            request.cancel.cancel();
        }
        let bytes = self
            .routes
            .get(&path)
            .cloned()
            .ok_or_else(|| Error::NotFound(request.url.clone()))?;
        if let Some(limit) = request.max_size {
            if bytes.len() as u64 > limit {
                return Err(Error::TooLarge {
                    url: request.url.clone(),
                    limit,
                });
            }
        }
        self.transferred += bytes.len() as u64;
        Ok(bytes)
    }
}

impl Fetcher for MemoryFetcher {
    fn stream(&mut self, request: Request, on_complete: OnStream) {
        on_complete(self.lookup(&request));
    }

    fn fetch_to_temp(&mut self, request: Request, on_complete: OnTemp) {
        let result = self.lookup(&request).and_then(|bytes| {
            let (mut file, path) = tempfile::NamedTempFile::new_in(self.tmp.path())?
                .keep()
                .map_err(|e| Error::Io(e.error))?;
            file.write_all(&bytes)?;
            Ok(path)
        });
        on_complete(result);
    }

    fn resolve_metalink(&mut self, request: Request, on_complete: OnMetalink) {
        if request.cancel.is_cancelled() {
            return on_complete(Err(Error::Cancelled));
        }
        on_complete(
            self.metalink
                .clone()
                .ok_or_else(|| Error::NotFound(request.url.clone())),
        );
    }

    fn bytes_transferred(&self) -> u64 {
        self.transferred
    }
}
