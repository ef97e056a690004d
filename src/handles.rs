//! Handle registry
//!
//! Arena of the plugin handles owned by the current session, keyed by the
//! gateway-assigned id, plus the set of remote feeds already being subscribed
//! to. A feed is claimed when its attach request goes out, before a handle id
//! exists, so a repeated publisher list never attaches the same feed twice.

use std::collections::HashMap;

use tracing::{debug, info};

use crate::model::{Handle, HandleId, Role};

/// Feed claim: attach in flight, or bound to a handle
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum FeedClaim {
    Attaching,
    Bound(HandleId),
}

#[derive(Debug, Default)]
pub struct HandleRegistry {
    handles: HashMap<HandleId, Handle>,
    feeds: HashMap<u64, FeedClaim>,
}

impl HandleRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a freshly attached handle, binding its feed claim
    pub fn insert(&mut self, handle: Handle) {
        if handle.role == Role::Subscriber {
            self.feeds.insert(handle.feed_id, FeedClaim::Bound(handle.id));
        }
        debug!(handle = *handle.id, feed = handle.feed_id, "Handle inserted");
        self.handles.insert(handle.id, handle);
    }

    pub fn get(&self, id: HandleId) -> Option<&Handle> {
        self.handles.get(&id)
    }

    /// A handle that exists and is not closed
    pub fn live(&mut self, id: HandleId) -> Option<&mut Handle> {
        self.handles.get_mut(&id).filter(|h| !h.is_closed())
    }

    pub fn is_live(&self, id: HandleId) -> bool {
        self.handles.get(&id).is_some_and(|h| !h.is_closed())
    }

    /// Whether a feed is attaching or subscribed
    pub fn is_known_feed(&self, feed_id: u64) -> bool {
        self.feeds.contains_key(&feed_id)
    }

    /// Claim a feed before attaching to it. Returns `false` if already known.
    pub fn claim_feed(&mut self, feed_id: u64) -> bool {
        if self.feeds.contains_key(&feed_id) {
            return false;
        }
        self.feeds.insert(feed_id, FeedClaim::Attaching);
        true
    }

    /// Forget a feed. Returns the handle subscribed to it, if one was bound.
    pub fn release_feed(&mut self, feed_id: u64) -> Option<HandleId> {
        match self.feeds.remove(&feed_id)? {
            FeedClaim::Bound(handle) => Some(handle),
            FeedClaim::Attaching => None,
        }
    }

    /// Subscribers attached or attaching, closed ones excluded
    pub fn subscriber_count(&self) -> usize {
        self.feeds
            .values()
            .filter(|claim| match claim {
                FeedClaim::Attaching => true,
                FeedClaim::Bound(id) => self.is_live(*id),
            })
            .count()
    }

    /// Close one handle and drop its feed claim. Returns whether it was live.
    ///
    /// The record stays in the arena as `Closed` so late responses for it can
    /// be recognised and dropped.
    pub fn close(&mut self, id: HandleId) -> bool {
        let Some(handle) = self.handles.get_mut(&id) else {
            return false;
        };
        if handle.is_closed() {
            return false;
        }

        handle.close();
        if handle.role == Role::Subscriber {
            let feed = handle.feed_id;
            if self.feeds.get(&feed) == Some(&FeedClaim::Bound(id)) {
                self.feeds.remove(&feed);
            }
        }

        info!(handle = *id, "Handle closed");
        true
    }

    /// Close every handle and empty the arena. Returns how many were live.
    pub fn close_all(&mut self) -> usize {
        let mut closed = 0;
        for handle in self.handles.values_mut() {
            if !handle.is_closed() {
                handle.close();
                closed += 1;
            }
        }

        self.handles.clear();
        self.feeds.clear();
        closed
    }

    /// Number of handles that are not closed
    pub fn active_count(&self) -> usize {
        self.handles.values().filter(|h| !h.is_closed()).count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::HandleState;

    #[test]
    fn test_feed_claims_are_idempotent() {
        let mut registry = HandleRegistry::new();

        assert!(registry.claim_feed(5));
        assert!(!registry.claim_feed(5));
        assert!(registry.is_known_feed(5));
        assert_eq!(registry.subscriber_count(), 1);

        registry.insert(Handle::attached(HandleId(100), 5, "A"));
        assert!(!registry.claim_feed(5));
        assert_eq!(registry.subscriber_count(), 1);
    }

    #[test]
    fn test_close_releases_feed() {
        let mut registry = HandleRegistry::new();
        registry.claim_feed(9);
        registry.insert(Handle::attached(HandleId(200), 9, "B"));

        assert!(registry.close(HandleId(200)));
        assert!(!registry.close(HandleId(200)));
        assert!(!registry.is_known_feed(9));
        assert!(!registry.is_live(HandleId(200)));
        assert_eq!(
            registry.get(HandleId(200)).map(|h| h.state()),
            Some(HandleState::Closed)
        );
    }

    #[test]
    fn test_release_feed_reports_bound_handle() {
        let mut registry = HandleRegistry::new();
        registry.claim_feed(1);
        assert_eq!(registry.release_feed(1), None);

        registry.claim_feed(2);
        registry.insert(Handle::attached(HandleId(20), 2, "C"));
        assert_eq!(registry.release_feed(2), Some(HandleId(20)));
        assert_eq!(registry.release_feed(2), None);
    }

    #[test]
    fn test_close_all() {
        let mut registry = HandleRegistry::new();
        registry.insert(Handle::attached(HandleId(1), 0, "me"));
        registry.claim_feed(5);
        registry.insert(Handle::attached(HandleId(2), 5, "A"));
        registry.claim_feed(9);
        registry.insert(Handle::attached(HandleId(3), 9, "B"));
        registry.close(HandleId(3));

        assert_eq!(registry.active_count(), 2);
        assert_eq!(registry.close_all(), 2);
        assert_eq!(registry.active_count(), 0);
        assert!(registry.get(HandleId(1)).is_none());
        assert!(!registry.is_known_feed(5));
    }
}
