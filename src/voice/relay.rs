//! Speech capabilities delegated to the connected front end
//!
//! The daemon has no audio stack of its own. Requests are published as
//! events carrying a correlation id; the front end performs the work and
//! reports back over IPC, which resolves the waiting future.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::{broadcast, oneshot};
use tracing::{debug, info, warn};

use crate::events::TutorEvent;

use super::{Recognition, SpeechError, SpeechRecognizer, SpeechSynthesizer, Utterance};

type Pending<T> = Mutex<HashMap<u64, oneshot::Sender<Result<T, SpeechError>>>>;

/// Bridges speech requests to the front end over the event bus
pub struct ClientRelay {
    event_tx: broadcast::Sender<TutorEvent>,
    next_id: AtomicU64,
    /// Front ends currently able to service requests
    listeners: AtomicUsize,
    speech: Pending<()>,
    captures: Pending<Recognition>,
    /// How long a request may go unanswered
    answer_timeout: Duration,
}

/// Keeps a front end registered with the relay while alive
pub struct ListenerGuard {
    relay: Arc<ClientRelay>,
}

impl Drop for ListenerGuard {
    fn drop(&mut self) {
        if self.relay.listeners.fetch_sub(1, Ordering::SeqCst) == 1 {
            info!("last front end detached, failing pending speech requests");
            self.relay.fail_all(SpeechError::Unavailable);
        }
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

impl ClientRelay {
    pub fn new(event_tx: broadcast::Sender<TutorEvent>, answer_timeout: Duration) -> Self {
        Self {
            event_tx,
            next_id: AtomicU64::new(1),
            listeners: AtomicUsize::new(0),
            speech: Mutex::new(HashMap::new()),
            captures: Mutex::new(HashMap::new()),
            answer_timeout,
        }
    }

    /// Register a front end that will service speech requests
    pub fn attach(self: &Arc<Self>) -> ListenerGuard {
        self.listeners.fetch_add(1, Ordering::SeqCst);
        ListenerGuard {
            relay: Arc::clone(self),
        }
    }

    pub fn has_listeners(&self) -> bool {
        self.listeners.load(Ordering::SeqCst) > 0
    }

    /// Front end finished (or failed) speaking request `id`
    pub fn complete_speech(&self, id: u64, outcome: Result<(), SpeechError>) {
        match lock(&self.speech).remove(&id) {
            Some(tx) => {
                let _ = tx.send(outcome);
            }
            None => debug!(id, "speech completion for unknown request"),
        }
    }

    /// Front end finished (or failed) capturing request `id`
    pub fn complete_recognition(&self, id: u64, outcome: Result<Recognition, SpeechError>) {
        match lock(&self.captures).remove(&id) {
            Some(tx) => {
                let _ = tx.send(outcome);
            }
            None => debug!(id, "recognition result for unknown request"),
        }
    }

    fn fail_all(&self, error: SpeechError) {
        for (_, tx) in lock(&self.speech).drain() {
            let _ = tx.send(Err(error.clone()));
        }
        for (_, tx) in lock(&self.captures).drain() {
            let _ = tx.send(Err(error.clone()));
        }
    }

    /// Publish a request and wait for its matching completion
    async fn request<T>(
        &self,
        pending: &Pending<T>,
        make_event: impl FnOnce(u64) -> TutorEvent,
    ) -> Result<T, SpeechError> {
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        let (tx, rx) = oneshot::channel();
        {
            // Checked under the lock: a detach after this drains the entry
            let mut pending = lock(pending);
            if !self.has_listeners() {
                return Err(SpeechError::Unavailable);
            }
            pending.insert(id, tx);
        }

        if self.event_tx.send(make_event(id)).is_err() {
            lock(pending).remove(&id);
            return Err(SpeechError::Unavailable);
        }

        match tokio::time::timeout(self.answer_timeout, rx).await {
            Ok(outcome) => outcome.unwrap_or(Err(SpeechError::Cancelled)),
            Err(_) => {
                lock(pending).remove(&id);
                warn!(id, timeout = ?self.answer_timeout, "front end never answered");
                Err(SpeechError::Failed("no answer from front end".into()))
            }
        }
    }
}

#[async_trait]
impl SpeechSynthesizer for ClientRelay {
    async fn speak(&self, utterance: Utterance) -> Result<(), SpeechError> {
        self.request(&self.speech, |id| TutorEvent::SpeakRequested {
            id,
            text: utterance.text,
            locale: utterance.locale,
            rate: utterance.rate,
        })
        .await
    }

    fn stop(&self) {
        let in_flight = lock(&self.speech).len();
        if in_flight > 0 {
            warn!(in_flight, "cancelling speech in flight");
        }
        self.fail_all(SpeechError::Cancelled);
        let _ = self.event_tx.send(TutorEvent::AudioStopped);
    }
}

#[async_trait]
impl SpeechRecognizer for ClientRelay {
    async fn recognize(&self, locale: &str) -> Result<Recognition, SpeechError> {
        let locale = locale.to_string();
        self.request(&self.captures, |id| TutorEvent::CaptureRequested { id, locale })
            .await
    }
}
