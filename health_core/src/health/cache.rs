//! Status cache shared by every cached check, across concurrent runs.

use crate::error::CheckError;
use crate::health::status::CheckStatus;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::time::Instant;
use tracing::debug;

/// Outcome of one populate call, as seen by every caller that waited on it.
type SharedOutcome = Result<CheckStatus, Arc<CheckError>>;

#[derive(Debug, Clone, Copy)]
struct CachedStatus {
    status: CheckStatus,
    expires_at: Instant,
}

#[derive(Debug)]
enum Slot {
    Ready(CachedStatus),
    /// A populate call is in flight. The sender is dropped without a value
    /// when that call is abandoned or cancelled.
    Pending {
        generation: u64,
        outcome: watch::Receiver<Option<SharedOutcome>>,
    },
}

#[derive(Debug, Default)]
struct Slots {
    entries: HashMap<String, Slot>,
    next_generation: u64,
}

enum Role {
    Leader {
        generation: u64,
        outcome: watch::Sender<Option<SharedOutcome>>,
    },
    Follower(watch::Receiver<Option<SharedOutcome>>),
}

#[derive(Debug, Clone, Default)]
pub struct HealthCheckCache {
    slots: Arc<Mutex<Slots>>,
}

impl HealthCheckCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the cached status for `key`, or runs `populate` and caches its
    /// result for `expiration`. Concurrent callers for the same key share a
    /// single `populate` call and all receive its outcome, errors included.
    /// Errors are not cached: the first caller after a failure populates again.
    pub async fn get_or_populate<F, Fut>(
        &self,
        key: &str,
        expiration: Duration,
        populate: F,
    ) -> Result<CheckStatus, CheckError>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<CheckStatus, CheckError>>,
    {
        let (generation, sender) = loop {
            match self.role(key) {
                Ok(status) => return Ok(status),
                Err(Role::Leader { generation, outcome }) => break (generation, outcome),
                Err(Role::Follower(mut receiver)) => {
                    let shared = match receiver.wait_for(Option::is_some).await {
                        Ok(outcome) => outcome.clone(),
                        // The populating caller went away; take over.
                        Err(_) => continue,
                    };
                    if let Some(outcome) = shared {
                        return outcome.map_err(CheckError::Shared);
                    }
                }
            }
        };

        debug!(key, ?expiration, "Cache miss, populating status");
        let result = populate().await;

        let mut slots = self.slots.lock();
        let ours = matches!(
            slots.entries.get(key),
            Some(Slot::Pending { generation: current, .. }) if *current == generation
        );

        match result {
            Ok(status) => {
                if ours {
                    slots.entries.insert(
                        key.to_string(),
                        Slot::Ready(CachedStatus {
                            status,
                            expires_at: Instant::now() + expiration,
                        }),
                    );
                }
                sender.send_replace(Some(Ok(status)));
                Ok(status)
            }
            // Waiters retry on their own token rather than inherit this cancellation.
            Err(e) if e.is_cancelled() => {
                if ours {
                    slots.entries.remove(key);
                }
                Err(e)
            }
            Err(e) => {
                if ours {
                    slots.entries.remove(key);
                }
                let shared = Arc::new(e);
                sender.send_replace(Some(Err(Arc::clone(&shared))));
                Err(CheckError::Shared(shared))
            }
        }
    }

    /// Current, unexpired status for `key`, if any.
    pub fn get(&self, key: &str) -> Option<CheckStatus> {
        let now = Instant::now();
        match self.slots.lock().entries.get(key) {
            Some(Slot::Ready(cached)) if now < cached.expires_at => Some(cached.status),
            _ => None,
        }
    }

    pub fn invalidate(&self, key: &str) -> bool {
        self.slots.lock().entries.remove(key).is_some()
    }

    pub fn clear(&self) {
        self.slots.lock().entries.clear();
    }

    pub fn len(&self) -> usize {
        self.slots.lock().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// A fresh status, or this caller's part in populating one.
    fn role(&self, key: &str) -> Result<CheckStatus, Role> {
        let now = Instant::now();
        let mut slots = self.slots.lock();

        match slots.entries.get(key) {
            Some(Slot::Ready(cached)) if now < cached.expires_at => return Ok(cached.status),
            Some(Slot::Pending { outcome, .. }) if outcome.has_changed().is_ok() => {
                return Err(Role::Follower(outcome.clone()));
            }
            _ => {}
        }

        let generation = slots.next_generation;
        slots.next_generation += 1;
        let (sender, receiver) = watch::channel(None);
        slots.entries.insert(
            key.to_string(),
            Slot::Pending {
                generation,
                outcome: receiver,
            },
        );

        Err(Role::Leader {
            generation,
            outcome: sender,
        })
    }
}
