//! Sources of status documents.
//!
//! `HttpSource` talks to the nginx status server on the loopback interface;
//! `MockSource` serves canned documents to tests.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use parking_lot::Mutex;
use reqwest::blocking::Client;

use super::StatusError;

/// Fetches the body of a status location.
///
/// A source is moved into the scrape worker thread and only ever used from
/// there, so `fetch` takes `&mut self`.
pub trait StatusSource: Send + 'static {
    fn fetch(&mut self, path: &str) -> Result<String, StatusError>;
}

/// Blocking HTTP source for `http://127.0.0.1:<port>`.
pub struct HttpSource {
    base_url: String,
    timeout: Duration,
    client: Option<Client>,
}

impl HttpSource {
    pub fn new(port: u16, timeout: Duration) -> Self {
        Self {
            base_url: format!("http://127.0.0.1:{}", port),
            timeout,
            client: None,
        }
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }
}

impl StatusSource for HttpSource {
    fn fetch(&mut self, path: &str) -> Result<String, StatusError> {
        // The blocking client owns a runtime; build it on the worker thread.
        let client = match self.client.take() {
            Some(client) => client,
            None => Client::builder().timeout(self.timeout).build()?,
        };
        let client = self.client.insert(client);

        let url = format!("{}{}", self.base_url, path);
        let response = client.get(&url).send()?;
        let status = response.status();
        if !status.is_success() {
            return Err(StatusError::UnexpectedStatus {
                url,
                status: status.as_u16(),
            });
        }
        Ok(response.text()?)
    }
}

/// In-memory source for tests.
///
/// Clones share the same documents, so a test can keep a handle and change
/// what the collector's worker sees between scrapes.
#[derive(Debug, Clone, Default)]
pub struct MockSource {
    documents: Arc<Mutex<HashMap<String, String>>>,
    fetches: Arc<AtomicUsize>,
}

impl MockSource {
    pub fn new() -> Self {
        Self::default()
    }

    /// Serves `body` at `path`.
    pub fn with_document(self, path: &str, body: &str) -> Self {
        self.set_document(path, body);
        self
    }

    pub fn set_document(&self, path: &str, body: &str) {
        self.documents
            .lock()
            .insert(path.to_string(), body.to_string());
    }

    pub fn remove_document(&self, path: &str) {
        self.documents.lock().remove(path);
    }

    /// Number of fetches served so far, including failed ones.
    pub fn fetches(&self) -> usize {
        self.fetches.load(Ordering::SeqCst)
    }
}

impl StatusSource for MockSource {
    fn fetch(&mut self, path: &str) -> Result<String, StatusError> {
        self.fetches.fetch_add(1, Ordering::SeqCst);
        self.documents
            .lock()
            .get(path)
            .cloned()
            .ok_or_else(|| StatusError::NotFound(path.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_http_source_base_url() {
        let source = HttpSource::new(18080, Duration::from_secs(5));
        assert_eq!(source.base_url(), "http://127.0.0.1:18080");
    }

    #[test]
    fn test_mock_source_shares_documents() {
        let source = MockSource::new().with_document("/nginx_status", "a");
        let mut worker_side = source.clone();

        assert_eq!(worker_side.fetch("/nginx_status").unwrap(), "a");

        source.set_document("/nginx_status", "b");
        assert_eq!(worker_side.fetch("/nginx_status").unwrap(), "b");

        source.remove_document("/nginx_status");
        assert!(matches!(
            worker_side.fetch("/nginx_status"),
            Err(StatusError::NotFound(_))
        ));
        assert_eq!(source.fetches(), 3);
    }
}
