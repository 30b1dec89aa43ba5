//! Scrape worker thread shared by the status collectors.
//!
//! The worker owns the status source and serves one scrape request at a
//! time. Dropping the request sender ends the thread.

use std::sync::mpsc;
use std::thread::{self, JoinHandle};

use parking_lot::Mutex;
use tracing::{debug, warn};

use super::StatusError;
use super::source::StatusSource;

struct ScrapeRequest {
    reply: mpsc::SyncSender<Result<String, StatusError>>,
}

pub(crate) struct ScrapeWorker {
    requests: Mutex<Option<mpsc::Sender<ScrapeRequest>>>,
    handle: Mutex<Option<JoinHandle<()>>>,
}

impl ScrapeWorker {
    /// Spawns a worker fetching `path` from `source` on every request.
    pub(crate) fn spawn(
        name: &str,
        path: String,
        mut source: Box<dyn StatusSource>,
    ) -> Result<Self, StatusError> {
        let (tx, rx) = mpsc::channel::<ScrapeRequest>();

        let handle = thread::Builder::new()
            .name(format!("ngxmon-{}", name))
            .spawn(move || {
                for request in rx {
                    let result = source.fetch(&path);
                    // The requester may have given up; nothing to report then.
                    let _ = request.reply.send(result);
                }
                debug!(path = %path, "scrape worker finished");
            })
            .map_err(StatusError::Spawn)?;

        Ok(Self {
            requests: Mutex::new(Some(tx)),
            handle: Mutex::new(Some(handle)),
        })
    }

    /// Asks the worker for a fresh status document and waits for it.
    pub(crate) fn scrape(&self) -> Result<String, StatusError> {
        let sender = self.requests.lock().clone().ok_or(StatusError::Stopped)?;
        let (reply, response) = mpsc::sync_channel(1);
        sender
            .send(ScrapeRequest { reply })
            .map_err(|_| StatusError::Stopped)?;
        response.recv().map_err(|_| StatusError::Stopped)?
    }

    /// Closes the request channel and joins the worker thread.
    pub(crate) fn stop(&self) {
        drop(self.requests.lock().take());
        let handle = self.handle.lock().take();
        if let Some(handle) = handle
            && handle.join().is_err()
        {
            warn!("scrape worker panicked");
        }
    }

    pub(crate) fn is_stopped(&self) -> bool {
        self.requests.lock().is_none()
    }
}

impl Drop for ScrapeWorker {
    fn drop(&mut self) {
        self.stop();
    }
}
