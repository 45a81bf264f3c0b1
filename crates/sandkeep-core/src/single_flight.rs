// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Keyed single-flight registry with TTL-based staleness.
//!
//! At most one slot exists per key. The first caller gets a [`Permit`] and
//! runs the operation; callers arriving while the slot is live get an
//! [`Attach`] that resolves to the leader's outcome. A completed slot lingers
//! for a short cooldown, during which new callers receive the cached outcome
//! instead of starting a duplicate run.
//!
//! A slot that was never released is reclaimable once it is older than the
//! registry TTL, so a crashed holder cannot deadlock its key forever.
//!
//! Locks are process-local and advisory: there is no mutual exclusion across
//! instances.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use thiserror::Error;
use tokio::sync::watch;
use tokio::time::Instant;
use tracing::{debug, warn};

/// The leader released its permit without publishing an outcome.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("in-flight {registry} operation for {key} was abandoned")]
pub struct FlightAbandoned {
    /// Registry name.
    pub registry: &'static str,
    /// Key of the abandoned slot.
    pub key: String,
}

struct Slot<T> {
    id: u64,
    acquired_at: Instant,
    released_at: Option<Instant>,
    outcome: watch::Receiver<Option<T>>,
}

enum Liveness {
    Live,
    Stale,
    Expired,
}

impl<T> Slot<T> {
    fn liveness(&self, now: Instant, ttl: Duration, cooldown: Duration) -> Liveness {
        match self.released_at {
            Some(released) if now.duration_since(released) < cooldown => Liveness::Live,
            Some(_) => Liveness::Expired,
            None if now.duration_since(self.acquired_at) < ttl => Liveness::Live,
            None => Liveness::Stale,
        }
    }
}

struct Inner<T> {
    name: &'static str,
    ttl: Duration,
    cooldown: Duration,
    slots: Mutex<HashMap<String, Slot<T>>>,
    next_id: AtomicU64,
}

impl<T> Inner<T> {
    fn slots(&self) -> MutexGuard<'_, HashMap<String, Slot<T>>> {
        self.slots.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Lock the slots, dropping released slots whose cooldown has passed.
    fn swept(&self, now: Instant) -> MutexGuard<'_, HashMap<String, Slot<T>>> {
        let mut slots = self.slots();
        slots.retain(|_, slot| {
            !matches!(
                slot.liveness(now, self.ttl, self.cooldown),
                Liveness::Expired
            )
        });
        slots
    }

    fn release(&self, key: &str, id: u64, completed: bool) {
        let mut slots = self.slots();
        // A reclaimed key belongs to someone else now.
        let Some(slot) = slots.get_mut(key).filter(|s| s.id == id) else {
            return;
        };
        if completed && !self.cooldown.is_zero() {
            slot.released_at = Some(Instant::now());
        } else {
            slots.remove(key);
        }
        debug!(registry = self.name, key = %key, completed, "Released single-flight slot");
    }
}

/// Result of [`SingleFlight::acquire`].
pub enum Acquire<T> {
    /// No live slot existed; the caller owns the new one.
    New(Permit<T>),
    /// A live slot exists; the caller can wait for its outcome.
    InFlight(Attach<T>),
}

impl<T> Acquire<T> {
    /// True for [`Acquire::New`].
    pub fn is_new(&self) -> bool {
        matches!(self, Acquire::New(_))
    }
}

/// Ownership of a slot. Dropping it without [`complete`](Permit::complete)
/// frees the slot immediately and wakes followers with [`FlightAbandoned`].
pub struct Permit<T> {
    inner: Arc<Inner<T>>,
    key: String,
    id: u64,
    tx: watch::Sender<Option<T>>,
    finished: bool,
}

impl<T> Permit<T> {
    /// Publish the outcome to followers and release the slot (subject to the
    /// registry cooldown).
    pub fn complete(mut self, value: T) {
        self.tx.send_replace(Some(value));
        self.finished = true;
        self.inner.release(&self.key, self.id, true);
    }
}

impl<T> Drop for Permit<T> {
    fn drop(&mut self) {
        if !self.finished {
            self.inner.release(&self.key, self.id, false);
        }
    }
}

/// Handle on someone else's in-flight operation.
pub struct Attach<T> {
    registry: &'static str,
    key: String,
    held_for: Duration,
    outcome: watch::Receiver<Option<T>>,
}

impl<T: Clone> Attach<T> {
    /// Age of the slot when this handle was taken.
    pub fn held_for(&self) -> Duration {
        self.held_for
    }

    /// Wait for the leader's outcome.
    pub async fn wait(mut self) -> Result<T, FlightAbandoned> {
        let abandoned = FlightAbandoned {
            registry: self.registry,
            key: self.key.clone(),
        };
        match self.outcome.wait_for(Option::is_some).await {
            Ok(value) => Option::clone(&value).ok_or(abandoned),
            Err(_) => Err(abandoned),
        }
    }
}

/// Keyed single-flight registry.
///
/// Cheap to clone; clones share the same slots.
pub struct SingleFlight<T> {
    inner: Arc<Inner<T>>,
}

impl<T> Clone for SingleFlight<T> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
        }
    }
}

impl<T: Clone + Send + Sync + 'static> SingleFlight<T> {
    /// Create a registry. `name` only appears in logs and errors.
    pub fn new(name: &'static str, ttl: Duration, cooldown: Duration) -> Self {
        Self {
            inner: Arc::new(Inner {
                name,
                ttl,
                cooldown,
                slots: Mutex::new(HashMap::new()),
                next_id: AtomicU64::new(1),
            }),
        }
    }

    /// Staleness threshold.
    pub fn ttl(&self) -> Duration {
        self.inner.ttl
    }

    /// Longest a holder may run and still release before its slot can be
    /// reclaimed as stale. Callers cap their operation budgets at this.
    pub fn hold_limit(&self) -> Duration {
        self.inner.ttl - self.inner.ttl / 10
    }

    /// Take the slot for `key`, or a handle on the live one.
    pub fn acquire(&self, key: &str) -> Acquire<T> {
        let now = Instant::now();
        let mut slots = self.inner.swept(now);

        if let Some(slot) = slots.get(key) {
            match slot.liveness(now, self.inner.ttl, self.inner.cooldown) {
                Liveness::Live => {
                    return Acquire::InFlight(Attach {
                        registry: self.inner.name,
                        key: key.to_string(),
                        held_for: now.duration_since(slot.acquired_at),
                        outcome: slot.outcome.clone(),
                    });
                }
                Liveness::Stale => {
                    warn!(
                        registry = self.inner.name,
                        key = %key,
                        age_secs = now.duration_since(slot.acquired_at).as_secs(),
                        ttl_secs = self.inner.ttl.as_secs(),
                        "Reclaiming stale single-flight slot"
                    );
                }
                Liveness::Expired => {}
            }
        }

        let id = self.inner.next_id.fetch_add(1, Ordering::Relaxed);
        let (tx, rx) = watch::channel(None);
        slots.insert(
            key.to_string(),
            Slot {
                id,
                acquired_at: now,
                released_at: None,
                outcome: rx,
            },
        );

        Acquire::New(Permit {
            inner: self.inner.clone(),
            key: key.to_string(),
            id,
            tx,
            finished: false,
        })
    }

    /// Age of the live slot for `key`, if any.
    pub fn slot_age(&self, key: &str) -> Option<Duration> {
        let now = Instant::now();
        let slots = self.inner.swept(now);
        let slot = slots.get(key)?;
        match slot.liveness(now, self.inner.ttl, self.inner.cooldown) {
            Liveness::Live => Some(now.duration_since(slot.acquired_at)),
            Liveness::Stale | Liveness::Expired => None,
        }
    }

    /// True if `key` has a live slot.
    pub fn is_held(&self, key: &str) -> bool {
        self.slot_age(key).is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn test_second_acquire_attaches() {
        let registry: SingleFlight<u32> =
            SingleFlight::new("test", Duration::from_secs(60), Duration::ZERO);

        let Acquire::New(permit) = registry.acquire("tenant-a") else {
            panic!("first acquire should be new");
        };
        let Acquire::InFlight(attach) = registry.acquire("tenant-a") else {
            panic!("second acquire should attach");
        };
        assert!(registry.acquire("tenant-b").is_new());

        permit.complete(7);
        assert_eq!(attach.wait().await, Ok(7));
        assert!(registry.acquire("tenant-a").is_new());
    }

    #[tokio::test(start_paused = true)]
    async fn test_stale_slot_is_reclaimed() {
        let registry: SingleFlight<()> =
            SingleFlight::new("replication", Duration::from_secs(60), Duration::ZERO);

        let Acquire::New(old_permit) = registry.acquire("tenant-a") else {
            panic!("first acquire should be new");
        };

        tokio::time::advance(Duration::from_secs(59)).await;
        assert!(!registry.acquire("tenant-a").is_new());

        tokio::time::advance(Duration::from_secs(2)).await;
        let Acquire::New(new_permit) = registry.acquire("tenant-a") else {
            panic!("stale slot should be reclaimable");
        };

        // The crashed holder finishing late must not free the new slot.
        drop(old_permit);
        assert!(registry.is_held("tenant-a"));
        drop(new_permit);
        assert!(!registry.is_held("tenant-a"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_cooldown_serves_cached_outcome() {
        let registry: SingleFlight<&'static str> =
            SingleFlight::new("wake", Duration::from_secs(300), Duration::from_secs(1));

        let Acquire::New(permit) = registry.acquire("t") else {
            panic!("first acquire should be new");
        };
        permit.complete("ready");

        let Acquire::InFlight(attach) = registry.acquire("t") else {
            panic!("slot should linger during cooldown");
        };
        assert_eq!(attach.wait().await, Ok("ready"));

        tokio::time::advance(Duration::from_secs(1)).await;
        assert!(registry.acquire("t").is_new());
    }

    #[tokio::test(start_paused = true)]
    async fn test_dropped_permit_abandons_followers() {
        let registry: SingleFlight<u32> =
            SingleFlight::new("wake", Duration::from_secs(300), Duration::from_secs(1));

        let Acquire::New(permit) = registry.acquire("t") else {
            panic!("first acquire should be new");
        };
        let Acquire::InFlight(attach) = registry.acquire("t") else {
            panic!("second acquire should attach");
        };

        drop(permit);

        let err = attach.wait().await.unwrap_err();
        assert_eq!(err.key, "t");
        assert!(registry.acquire("t").is_new());
    }

    #[test]
    fn test_hold_limit_is_below_ttl() {
        let registry: SingleFlight<()> =
            SingleFlight::new("replication", Duration::from_secs(60), Duration::ZERO);
        assert_eq!(registry.hold_limit(), Duration::from_secs(54));
    }

    #[tokio::test(start_paused = true)]
    async fn test_expired_slots_are_swept() {
        let registry: SingleFlight<u32> =
            SingleFlight::new("wake", Duration::from_secs(300), Duration::from_secs(1));

        for i in 0..50 {
            let Acquire::New(permit) = registry.acquire(&format!("tenant-{}", i)) else {
                panic!("fresh key should be new");
            };
            permit.complete(i);
        }
        assert_eq!(registry.inner.slots().len(), 50);

        tokio::time::advance(Duration::from_secs(2)).await;
        assert!(!registry.is_held("tenant-0"));
        assert!(registry.inner.slots().is_empty());

        let Acquire::New(_held) = registry.acquire("tenant-a") else {
            panic!("fresh key should be new");
        };
        tokio::time::advance(Duration::from_secs(2)).await;
        let second = registry.acquire("tenant-b");
        assert!(second.is_new());
        // An unreleased slot is only reclaimed on its own key, after the TTL.
        assert!(registry.is_held("tenant-a"));
        assert_eq!(registry.inner.slots().len(), 2);
    }
}
