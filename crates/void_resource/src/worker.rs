//! Resolve Worker - loads latent resources off the calling thread
//!
//! Resolving a latent resource blocks on file I/O. Threads that must not
//! block (connection receive loops, the render loop) submit hashes here and
//! poll for results.

use crate::blob::Blob;
use crate::hash::ContentHash;
use crate::store::ResourceStore;
use crate::{ResourceError, ResourceResult};
use crossbeam_channel::{unbounded, Receiver, RecvTimeoutError, Sender};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;

struct ResolveRequest {
    ticket: u64,
    hash: ContentHash,
}

/// Outcome of one resolve request
#[derive(Debug)]
pub struct ResolveResponse {
    /// Ticket returned by [`ResolveWorker::request`]
    pub ticket: u64,
    /// Requested hash
    pub hash: ContentHash,
    /// Loaded bytes or the failure
    pub result: ResourceResult<Arc<Blob>>,
}

/// Background thread resolving hashes against a store
pub struct ResolveWorker {
    requests: Option<Sender<ResolveRequest>>,
    responses: Receiver<ResolveResponse>,
    thread: Option<JoinHandle<()>>,
    next_ticket: u64,
}

impl ResolveWorker {
    /// Spawn a worker for a store
    pub fn spawn(store: Arc<ResourceStore>) -> ResourceResult<Self> {
        let (request_tx, request_rx) = unbounded::<ResolveRequest>();
        let (response_tx, response_rx) = unbounded();

        let thread = std::thread::Builder::new()
            .name("void-resource-resolve".into())
            .spawn(move || {
                for request in request_rx {
                    let result = store.resolve(request.hash);
                    let response = ResolveResponse {
                        ticket: request.ticket,
                        hash: request.hash,
                        result,
                    };
                    if response_tx.send(response).is_err() {
                        break;
                    }
                }
                log::debug!("Resolve worker stopped");
            })?;

        Ok(Self {
            requests: Some(request_tx),
            responses: response_rx,
            thread: Some(thread),
            next_ticket: 1,
        })
    }

    /// Queue a hash for resolution, returning its ticket
    pub fn request(&mut self, hash: ContentHash) -> ResourceResult<u64> {
        let sender = self.requests.as_ref().ok_or(ResourceError::WorkerUnavailable)?;
        let ticket = self.next_ticket;
        sender
            .send(ResolveRequest { ticket, hash })
            .map_err(|_| ResourceError::WorkerUnavailable)?;
        self.next_ticket += 1;
        Ok(ticket)
    }

    /// Take a finished response without blocking
    pub fn try_recv(&self) -> Option<ResolveResponse> {
        self.responses.try_recv().ok()
    }

    /// Wait up to `timeout` for a finished response
    pub fn recv_timeout(&self, timeout: Duration) -> ResourceResult<Option<ResolveResponse>> {
        match self.responses.recv_timeout(timeout) {
            Ok(response) => Ok(Some(response)),
            Err(RecvTimeoutError::Timeout) => Ok(None),
            Err(RecvTimeoutError::Disconnected) => Err(ResourceError::WorkerUnavailable),
        }
    }

    /// Stop accepting requests and wait for queued ones to finish
    pub fn shutdown(&mut self) {
        self.requests.take();
        if let Some(thread) = self.thread.take() {
            if thread.join().is_err() {
                log::error!("Resolve worker panicked");
            }
        }
    }
}

impl Drop for ResolveWorker {
    fn drop(&mut self) {
        self.shutdown();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hash::ResourceKind;

    #[test]
    fn test_resolves_resident_resource() {
        let store = Arc::new(ResourceStore::new());
        let handle = store.put(ResourceKind::GeometryArray, "g", vec![1, 2, 3]);

        let mut worker = ResolveWorker::spawn(store).unwrap();
        let ticket = worker.request(handle.hash()).unwrap();

        let response = worker.recv_timeout(Duration::from_secs(5)).unwrap().unwrap();
        assert_eq!(response.ticket, ticket);
        assert_eq!(response.result.unwrap().data(), &[1, 2, 3]);
    }

    #[test]
    fn test_reports_not_found() {
        let store = Arc::new(ResourceStore::new());
        let mut worker = ResolveWorker::spawn(store).unwrap();
        worker.request(ContentHash::new(7, 7)).unwrap();

        let response = worker.recv_timeout(Duration::from_secs(5)).unwrap().unwrap();
        assert!(matches!(response.result, Err(ResourceError::NotFound(_))));
    }

    #[test]
    fn test_request_after_shutdown() {
        let mut worker = ResolveWorker::spawn(Arc::new(ResourceStore::new())).unwrap();
        worker.shutdown();
        assert!(matches!(
            worker.request(ContentHash::new(1, 1)),
            Err(ResourceError::WorkerUnavailable)
        ));
    }
}
