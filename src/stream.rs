//! Callback-driven streaming sessions and the registry of live sessions.
//!
//! A [`StreamingSession`] owns one streaming connection's decoder and its
//! three callbacks. It is driven by a single task, so chunks are decoded
//! strictly in arrival order and callbacks never run concurrently for the
//! same session. The [`SessionRegistry`] keeps every running session
//! reachable (for cancellation and bookkeeping) until it completes.

use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use futures::StreamExt;
use serde::de::DeserializeOwned;
use tokio::sync::oneshot;
use tracing::debug;

use crate::client::ClientError;
use crate::http::ByteStream;
use crate::sse::StreamDecoder;

pub type EventCallback<T> = Box<dyn FnMut(T) + Send>;
pub type ErrorCallback = Box<dyn FnMut(ClientError) + Send>;
pub type CompleteCallback = Box<dyn FnOnce(Option<ClientError>) + Send>;

/// Identity of a session within a [`SessionRegistry`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SessionId(u64);

impl std::fmt::Display for SessionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "session-{}", self.0)
    }
}

/// One in-flight streamed request.
///
/// `on_complete` fires exactly once; afterwards the session is terminated
/// and ignores any further input.
///
/// # Example
/// ```
/// use aiclient::stream::{SessionRegistry, StreamingSession};
/// use serde_json::Value;
/// use std::sync::{Arc, Mutex};
///
/// let registry = SessionRegistry::new();
/// let (id, _cancel) = registry.register();
/// let seen = Arc::new(Mutex::new(Vec::new()));
///
/// let sink = seen.clone();
/// let mut session = StreamingSession::<Value>::new(id)
///     .on_event(move |event| sink.lock().unwrap().push(event));
///
/// session.receive(b"data: {\"id\":\"1\"}\n\ndata: [DONE]\n");
/// session.complete(None);
///
/// assert_eq!(seen.lock().unwrap().len(), 1);
/// assert!(session.is_terminated());
/// ```
pub struct StreamingSession<T> {
    id: SessionId,
    decoder: StreamDecoder<T>,
    on_event: Option<EventCallback<T>>,
    on_error: Option<ErrorCallback>,
    on_complete: Option<CompleteCallback>,
    terminated: bool,
}

impl<T> std::fmt::Debug for StreamingSession<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StreamingSession")
            .field("id", &self.id)
            .field("decoder", &self.decoder)
            .field("terminated", &self.terminated)
            .finish()
    }
}

impl<T: DeserializeOwned> StreamingSession<T> {
    pub fn new(id: SessionId) -> Self {
        Self {
            id,
            decoder: StreamDecoder::new(),
            on_event: None,
            on_error: None,
            on_complete: None,
            terminated: false,
        }
    }

    /// Called with every successfully decoded event.
    pub fn on_event(mut self, callback: impl FnMut(T) + Send + 'static) -> Self {
        self.on_event = Some(Box::new(callback));
        self
    }

    /// Called with every non-terminal error: undecodable chunks, API error
    /// payloads and malformed payloads.
    pub fn on_error(mut self, callback: impl FnMut(ClientError) + Send + 'static) -> Self {
        self.on_error = Some(Box::new(callback));
        self
    }

    /// Called once when the connection ends, with the transport error if it
    /// did not close cleanly.
    pub fn on_complete(
        mut self,
        callback: impl FnOnce(Option<ClientError>) + Send + 'static,
    ) -> Self {
        self.on_complete = Some(Box::new(callback));
        self
    }

    pub fn id(&self) -> SessionId {
        self.id
    }

    pub fn is_terminated(&self) -> bool {
        self.terminated
    }

    /// Feed one chunk of the response body through the decoder.
    pub fn receive(&mut self, chunk: &[u8]) {
        if self.terminated {
            return;
        }
        for result in self.decoder.decode(chunk) {
            match result {
                Ok(event) => {
                    if let Some(callback) = self.on_event.as_mut() {
                        callback(event);
                    }
                }
                Err(error) => {
                    if let Some(callback) = self.on_error.as_mut() {
                        callback(error);
                    }
                }
            }
        }
    }

    /// Terminate the session. Only the first call has any effect.
    pub fn complete(&mut self, error: Option<ClientError>) {
        if self.terminated {
            return;
        }
        self.terminated = true;

        std::mem::take(&mut self.decoder).finish();
        self.on_event = None;
        self.on_error = None;

        match &error {
            Some(error) => debug!(session = %self.id, %error, "stream session failed"),
            None => debug!(session = %self.id, "stream session finished"),
        }
        if let Some(callback) = self.on_complete.take() {
            callback(error);
        }
    }

    /// Open the connection and pump its chunks through the session until
    /// the connection ends or `cancel` fires.
    ///
    /// A cancelled session still completes, with
    /// [`ClientError::StreamCancelled`].
    pub async fn run<F>(mut self, open: F, mut cancel: oneshot::Receiver<()>)
    where
        F: Future<Output = Result<ByteStream, ClientError>>,
    {
        debug!(session = %self.id, "stream session started");

        let mut chunks = tokio::select! {
            biased;
            _ = &mut cancel => {
                self.complete(Some(ClientError::StreamCancelled));
                return;
            }
            opened = open => match opened {
                Ok(chunks) => chunks,
                Err(error) => {
                    self.complete(Some(error));
                    return;
                }
            },
        };

        loop {
            tokio::select! {
                biased;
                _ = &mut cancel => {
                    self.complete(Some(ClientError::StreamCancelled));
                    return;
                }
                next = chunks.next() => match next {
                    Some(Ok(chunk)) => self.receive(&chunk),
                    Some(Err(error)) => {
                        self.complete(Some(error));
                        return;
                    }
                    None => {
                        self.complete(None);
                        return;
                    }
                },
            }
        }
    }
}

#[derive(Debug)]
struct SessionEntry {
    id: SessionId,
    cancel: Option<oneshot::Sender<()>>,
}

#[derive(Debug, Default)]
struct RegistryInner {
    next_id: AtomicU64,
    sessions: Mutex<Vec<SessionEntry>>,
}

/// Thread-safe, insertion-ordered set of live sessions.
///
/// Cloning is cheap and every clone refers to the same registry.
#[derive(Debug, Clone, Default)]
pub struct SessionRegistry {
    inner: Arc<RegistryInner>,
}

impl SessionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    fn sessions(&self) -> MutexGuard<'_, Vec<SessionEntry>> {
        // Entries stay consistent even if a holder panicked.
        self.inner
            .sessions
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    /// Add a new session and return its id together with the receiving end
    /// of its cancellation signal.
    pub fn register(&self) -> (SessionId, oneshot::Receiver<()>) {
        let id = SessionId(self.inner.next_id.fetch_add(1, Ordering::Relaxed));
        let (sender, receiver) = oneshot::channel();
        self.sessions().push(SessionEntry {
            id,
            cancel: Some(sender),
        });
        (id, receiver)
    }

    /// Drop a session. Returns `false` if it was not registered.
    pub fn remove(&self, id: SessionId) -> bool {
        let mut sessions = self.sessions();
        match sessions.iter().position(|entry| entry.id == id) {
            Some(index) => {
                sessions.remove(index);
                true
            }
            None => false,
        }
    }

    /// Ask a live session to stop. The session stays registered until its
    /// completion callback has run.
    pub fn cancel(&self, id: SessionId) -> bool {
        let sender = self
            .sessions()
            .iter_mut()
            .find(|entry| entry.id == id)
            .and_then(|entry| entry.cancel.take());
        match sender {
            Some(sender) => sender.send(()).is_ok(),
            None => false,
        }
    }

    pub fn contains(&self, id: SessionId) -> bool {
        self.sessions().iter().any(|entry| entry.id == id)
    }

    /// Ids of live sessions, oldest first.
    pub fn ids(&self) -> Vec<SessionId> {
        self.sessions().iter().map(|entry| entry.id).collect()
    }

    pub fn len(&self) -> usize {
        self.sessions().len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions().is_empty()
    }
}

/// Handle to a streaming session started by the client.
///
/// Dropping the handle does not stop the stream.
#[derive(Debug, Clone)]
pub struct StreamHandle {
    id: SessionId,
    registry: SessionRegistry,
}

impl StreamHandle {
    pub(crate) fn new(id: SessionId, registry: SessionRegistry) -> Self {
        Self { id, registry }
    }

    pub fn id(&self) -> SessionId {
        self.id
    }

    /// Whether the session has not completed yet.
    pub fn is_active(&self) -> bool {
        self.registry.contains(self.id)
    }

    /// Request cancellation. The completion callback still runs, with
    /// [`ClientError::StreamCancelled`]. Returns `false` if the session has
    /// already finished or was cancelled before.
    pub fn cancel(&self) -> bool {
        self.registry.cancel(self.id)
    }
}
