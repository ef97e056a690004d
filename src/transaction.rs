//! Transaction registry
//!
//! Correlates outbound requests with the gateway's responses by transaction
//! token. Entries are inserted from the processing context and resolved from the
//! network context, so the map sits behind a mutex. Critical sections are short
//! and never span an `.await`.
//!
//! ```text
//!   processing context                 network context
//!   ──────────────────                 ───────────────
//!   begin(id, ctx) ──► Mutex<HashMap> ◄── resolve(id, kind, frame)
//!                          │                     │
//!                          │                     └─► Resolved { ctx, frame } ──► bridge
//!   expire(now) ◄──────────┘
//! ```

use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

use rand::distributions::Alphanumeric;
use rand::Rng;
use tracing::{debug, warn};

use crate::error::{ClientError, Result};
use crate::model::frame::Frame;
use crate::model::handle::HandleId;
use crate::model::TxContext;

/// Length of generated transaction tokens
pub const TRANSACTION_ID_LEN: usize = 12;

/// Generate a fresh random alphanumeric transaction token
pub fn new_transaction_id() -> String {
    rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(TRANSACTION_ID_LEN)
        .map(char::from)
        .collect()
}

/// Which response a frame is for a pending transaction
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResponseKind {
    /// Terminal
    Success,
    /// Non-terminal, may arrive any number of times
    Event,
    /// Terminal
    Error,
}

impl ResponseKind {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, ResponseKind::Event)
    }
}

/// A response matched to its transaction
#[derive(Debug, Clone)]
pub struct Resolved<C> {
    pub id: String,
    pub kind: ResponseKind,
    pub context: C,
    pub frame: Frame,
}

/// A transaction that got no response in time
#[derive(Debug, Clone)]
pub struct Expired<C> {
    pub id: String,
    pub context: C,
}

#[derive(Debug)]
struct Pending<C> {
    context: C,
    started: Instant,
    /// Set once an event carrying the outcome arrived; answered entries no
    /// longer time out
    answered: bool,
}

/// Registry of pending transactions keyed by token
#[derive(Debug)]
pub struct TransactionRegistry<C> {
    pending: Mutex<HashMap<String, Pending<C>>>,
    timeout: Duration,
}

impl<C: Clone> TransactionRegistry<C> {
    /// Create a registry whose entries expire after `timeout` without a response
    pub fn new(timeout: Duration) -> Self {
        Self {
            pending: Mutex::new(HashMap::new()),
            timeout,
        }
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<String, Pending<C>>> {
        self.pending.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Register a pending transaction.
    ///
    /// Returns `false` and leaves the existing entry untouched if `id` is
    /// already pending.
    pub fn begin(&self, id: &str, context: C) -> bool {
        self.begin_at(id, context, Instant::now())
    }

    fn begin_at(&self, id: &str, context: C, now: Instant) -> bool {
        let mut pending = self.lock();

        if pending.contains_key(id) {
            warn!(transaction = id, "Duplicate transaction id, request not registered");
            return false;
        }

        pending.insert(
            id.to_string(),
            Pending {
                context,
                started: now,
                answered: false,
            },
        );
        true
    }

    /// Match a response to its transaction.
    ///
    /// Success and error responses remove the entry; events leave it in
    /// place, and one that settles the request exempts it from the timeout
    /// until the caller completes it. An unknown id is a correlation error:
    /// it is logged here and returned so the caller can drop the frame.
    pub fn resolve(&self, id: &str, kind: ResponseKind, frame: Frame) -> Result<Resolved<C>> {
        let settles = frame.settles_request();
        let mut pending = self.lock();

        let context = if kind.is_terminal() {
            pending.remove(id).map(|entry| entry.context)
        } else {
            pending.get_mut(id).map(|entry| {
                entry.answered |= settles;
                entry.context.clone()
            })
        };
        drop(pending);

        let Some(context) = context else {
            warn!(transaction = id, kind = ?kind, "Response for unknown transaction, dropped");
            return Err(ClientError::Correlation(id.to_string()));
        };

        Ok(Resolved {
            id: id.to_string(),
            kind,
            context,
            frame,
        })
    }

    /// Remove an entry whose exchange finished with an event.
    pub fn complete(&self, id: &str) -> Option<C> {
        self.lock().remove(id).map(|entry| entry.context)
    }

    /// Remove and return unanswered entries older than the timeout.
    pub fn expire(&self, now: Instant) -> Vec<Expired<C>> {
        let mut pending = self.lock();

        let ids: Vec<String> = pending
            .iter()
            .filter(|(_, entry)| {
                !entry.answered && now.saturating_duration_since(entry.started) >= self.timeout
            })
            .map(|(id, _)| id.clone())
            .collect();

        ids.into_iter()
            .filter_map(|id| {
                pending.remove(&id).map(|entry| {
                    debug!(transaction = %id, "Transaction timed out");
                    Expired {
                        id,
                        context: entry.context,
                    }
                })
            })
            .collect()
    }

    /// Drop every entry. Returns how many were pending.
    pub fn clear(&self) -> usize {
        let mut pending = self.lock();
        let count = pending.len();
        pending.clear();
        count
    }

    pub fn contains(&self, id: &str) -> bool {
        self.lock().contains_key(id)
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }
}

impl TransactionRegistry<TxContext> {
    /// Drop every entry that belongs to `handle`. Returns how many were removed.
    pub fn forget_handle(&self, handle: HandleId) -> usize {
        let mut pending = self.lock();
        let before = pending.len();
        pending.retain(|_, entry| entry.context.handle() != Some(handle));
        before - pending.len()
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    fn frame(kind: &str, id: &str) -> Frame {
        Frame::parse(&json!({ "janus": kind, "transaction": id }).to_string()).unwrap()
    }

    fn joined(id: &str) -> Frame {
        let text = json!({
            "janus": "event",
            "transaction": id,
            "plugindata": { "data": { "videoroom": "joined", "id": 1 } }
        });
        Frame::parse(&text.to_string()).unwrap()
    }

    fn registry() -> TransactionRegistry<TxContext> {
        TransactionRegistry::new(Duration::from_secs(10))
    }

    #[test]
    fn test_transaction_ids() {
        let a = new_transaction_id();
        let b = new_transaction_id();

        assert_eq!(a.len(), TRANSACTION_ID_LEN);
        assert!(a.chars().all(|c| c.is_ascii_alphanumeric()));
        assert_ne!(a, b);
    }

    #[test]
    fn test_duplicate_begin_is_noop() {
        let registry = registry();

        assert!(registry.begin("abc", TxContext::CreateSession));
        assert!(!registry.begin("abc", TxContext::Destroy));
        assert_eq!(registry.len(), 1);

        let resolved = registry
            .resolve("abc", ResponseKind::Success, frame("success", "abc"))
            .unwrap();
        assert_eq!(resolved.context, TxContext::CreateSession);
    }

    #[test]
    fn test_at_most_one_terminal_resolution() {
        let registry = registry();
        registry.begin("t", TxContext::Join { handle: HandleId(1) });

        let mut delivered = 0;
        for kind in [ResponseKind::Success, ResponseKind::Error, ResponseKind::Success] {
            let name = if kind == ResponseKind::Error { "error" } else { "success" };
            if registry.resolve("t", kind, frame(name, "t")).is_ok() {
                delivered += 1;
            }
        }

        assert_eq!(delivered, 1);
        assert!(registry.is_empty());
    }

    #[test]
    fn test_events_do_not_remove() {
        let registry = registry();
        registry.begin("t", TxContext::Join { handle: HandleId(1) });

        for _ in 0..3 {
            let resolved = registry
                .resolve("t", ResponseKind::Event, frame("event", "t"))
                .unwrap();
            assert_eq!(resolved.kind, ResponseKind::Event);
        }
        assert!(registry.contains("t"));

        assert!(registry
            .resolve("t", ResponseKind::Error, frame("error", "t"))
            .is_ok());
        assert!(!registry.contains("t"));
    }

    #[test]
    fn test_unknown_id_is_correlation_error() {
        let registry = registry();

        let result = registry.resolve("nope", ResponseKind::Success, frame("success", "nope"));
        assert!(matches!(result, Err(ClientError::Correlation(id)) if id == "nope"));
    }

    #[test]
    fn test_expire_skips_answered_entries() {
        let registry = TransactionRegistry::new(Duration::from_secs(10));
        let start = Instant::now();

        registry.begin_at("silent", TxContext::CreateSession, start);
        registry.begin_at("answered", TxContext::Join { handle: HandleId(3) }, start);
        registry
            .resolve("answered", ResponseKind::Event, joined("answered"))
            .unwrap();

        assert!(registry.expire(start + Duration::from_secs(5)).is_empty());

        let expired = registry.expire(start + Duration::from_secs(11));
        assert_eq!(expired.len(), 1);
        assert_eq!(expired[0].id, "silent");
        assert_eq!(expired[0].context, TxContext::CreateSession);
        assert!(registry.contains("answered"));
        assert!(!registry.contains("silent"));
    }

    #[test]
    fn test_intermediate_event_keeps_timeout() {
        let registry = TransactionRegistry::new(Duration::from_secs(10));
        let start = Instant::now();

        registry.begin_at("t", TxContext::Join { handle: HandleId(3) }, start);
        registry
            .resolve("t", ResponseKind::Event, frame("event", "t"))
            .unwrap();

        let expired = registry.expire(start + Duration::from_secs(11));
        assert_eq!(expired.len(), 1);
        assert_eq!(expired[0].id, "t");
    }

    #[test]
    fn test_complete_and_forget_handle() {
        let registry = registry();
        registry.begin("a", TxContext::Join { handle: HandleId(1) });
        registry.begin("b", TxContext::Publish { handle: HandleId(1) });
        registry.begin("c", TxContext::Join { handle: HandleId(2) });

        assert_eq!(registry.complete("c"), Some(TxContext::Join { handle: HandleId(2) }));
        assert_eq!(registry.complete("c"), None);

        assert_eq!(registry.forget_handle(HandleId(1)), 2);
        assert!(registry.is_empty());
    }

    #[test]
    fn test_concurrent_resolution_delivers_once() {
        use std::sync::Arc;

        let registry = Arc::new(registry());
        registry.begin("race", TxContext::CreateSession);

        let workers: Vec<_> = (0..8)
            .map(|_| {
                let registry = Arc::clone(&registry);
                std::thread::spawn(move || {
                    registry
                        .resolve("race", ResponseKind::Success, frame("success", "race"))
                        .is_ok()
                })
            })
            .collect();

        let delivered = workers
            .into_iter()
            .map(|w| w.join().unwrap())
            .filter(|ok| *ok)
            .count();
        assert_eq!(delivered, 1);
    }
}
