//! Readiness events and the notifier capability.
//!
//! Every primitive in this crate reports its state as an [`EventMask`] and
//! pushes state *transitions* to registered [`Notifier`]s. A notifier is a
//! callback owned (shared) by the channel that invokes it; the callback
//! itself typically holds only a `Weak` reference back to whatever logical
//! owner (a monitor, an aggregator) it feeds, so it expires safely when that
//! owner is gone.
//!
//! The notifier contract:
//!
//! - `notify` is invoked **after** the originating channel lock has been
//!   released. A notifier may therefore lock its own state, but must never
//!   call back into the channel that is notifying it from within `notify`.
//! - The return value means "keep me registered". Returning `false` removes
//!   the registration lazily, with no separate unsubscribe round-trip.

use std::fmt;
use std::ops::{BitAnd, BitOr, BitOrAssign};
use std::sync::Arc;

use crate::error::{TryRecvError, TrySendError};

/// A bit set of readiness conditions.
#[derive(Clone, Copy, PartialEq, Eq, Default, Hash)]
pub struct EventMask(u32);

impl EventMask {
  /// No condition.
  pub const EMPTY: EventMask = EventMask(0);
  /// At least one item (or one queued sender) is available to read.
  pub const READABLE: EventMask = EventMask(1 << 0);
  /// A write would be accepted right now.
  pub const WRITABLE: EventMask = EventMask(1 << 1);
  /// The source has been closed. Permanent.
  pub const CLOSED: EventMask = EventMask(1 << 2);

  #[inline]
  pub fn is_empty(self) -> bool {
    self.0 == 0
  }

  #[inline]
  pub fn contains(self, other: EventMask) -> bool {
    self.0 & other.0 == other.0
  }

  #[inline]
  pub fn intersects(self, other: EventMask) -> bool {
    self.0 & other.0 != 0
  }

  #[inline]
  pub fn remove(&mut self, other: EventMask) {
    self.0 &= !other.0;
  }

  #[inline]
  pub fn insert(&mut self, other: EventMask) {
    self.0 |= other.0;
  }
}

impl BitOr for EventMask {
  type Output = EventMask;
  #[inline]
  fn bitor(self, rhs: EventMask) -> EventMask {
    EventMask(self.0 | rhs.0)
  }
}

impl BitOrAssign for EventMask {
  #[inline]
  fn bitor_assign(&mut self, rhs: EventMask) {
    self.0 |= rhs.0;
  }
}

impl BitAnd for EventMask {
  type Output = EventMask;
  #[inline]
  fn bitand(self, rhs: EventMask) -> EventMask {
    EventMask(self.0 & rhs.0)
  }
}

impl fmt::Debug for EventMask {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    let mut parts = Vec::new();
    if self.contains(EventMask::READABLE) {
      parts.push("READABLE");
    }
    if self.contains(EventMask::WRITABLE) {
      parts.push("WRITABLE");
    }
    if self.contains(EventMask::CLOSED) {
      parts.push("CLOSED");
    }
    if parts.is_empty() {
      f.write_str("EMPTY")
    } else {
      f.write_str(&parts.join("|"))
    }
  }
}

/// Whether the reported events became active or ceased to be active.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NotifyAction {
  /// The events in the mask just became active (rising edge).
  Set,
  /// The events in the mask just ceased to be active (falling edge).
  Clear,
}

/// A callback capability invoked by a channel on a readiness transition.
pub trait Notifier: Send + Sync {
  /// Reports a transition. Returns `true` to stay registered, `false` to be
  /// removed from the source's watcher list.
  fn notify(&self, events: EventMask, action: NotifyAction) -> bool;
}

/// Anything whose readiness transitions can be observed.
pub trait Watchable {
  /// Registers a notifier for the given interest set and returns the
  /// source's *current* state, so a transition that happened just before
  /// registration can be folded in by the caller instead of being lost.
  fn add_watcher(&self, notifier: Arc<dyn Notifier>, interest: EventMask) -> EventMask;
}

/// The read-only narrowing of a channel-like surface.
pub trait Source<T>: Watchable {
  /// Attempts to take the oldest available item without blocking.
  fn try_recv(&self) -> Result<T, TryRecvError>;

  fn is_closed(&self) -> bool;
}

/// The write-only narrowing of a channel-like surface.
pub trait Sink<T> {
  /// Attempts to deliver an item without blocking. A failed delivery hands
  /// the caller's own item back.
  fn try_send(&self, item: T) -> Result<(), TrySendError<T>>;

  fn is_closed(&self) -> bool;
}

// --- Watcher bookkeeping shared by Channel, Rendezvous and Aggregator ---

/// A single pending callback, captured under the source's lock and fired
/// after it is released.
pub(crate) struct Pending {
  pub(crate) notifier: Arc<dyn Notifier>,
  pub(crate) events: EventMask,
  pub(crate) action: NotifyAction,
}

impl Pending {
  /// Invokes the callback. Returns the notifier if it asked to be removed.
  fn fire(self) -> Option<Arc<dyn Notifier>> {
    if self.notifier.notify(self.events, self.action) {
      None
    } else {
      Some(self.notifier)
    }
  }
}

/// Fires a batch of captured notifications. Must be called with no channel
/// lock held. Returns the notifiers that asked to be removed, for pruning
/// on the next lock acquisition.
pub(crate) fn fire_all(batch: Vec<Pending>) -> Vec<Arc<dyn Notifier>> {
  let mut dead = Vec::new();
  for pending in batch {
    if let Some(notifier) = pending.fire() {
      dead.push(notifier);
    }
  }
  dead
}

/// One interest list (read side or write side) of a source.
pub(crate) struct Watchers {
  entries: Vec<Arc<dyn Notifier>>,
}

impl Watchers {
  pub(crate) fn new() -> Self {
    Self { entries: Vec::new() }
  }

  pub(crate) fn register(&mut self, notifier: Arc<dyn Notifier>) {
    self.entries.push(notifier);
  }

  /// Captures a transition of a single bit for every registered notifier.
  pub(crate) fn capture(&self, events: EventMask, action: NotifyAction, out: &mut Vec<Pending>) {
    for notifier in &self.entries {
      out.push(Pending {
        notifier: notifier.clone(),
        events,
        action,
      });
    }
  }

  /// Removes registrations whose callback previously returned `false`.
  pub(crate) fn prune(&mut self, dead: &[Arc<dyn Notifier>]) {
    if dead.is_empty() {
      return;
    }
    self
      .entries
      .retain(|n| !dead.iter().any(|d| Arc::ptr_eq(n, d)));
  }

  /// Takes every registration, leaving the list empty. Used on close.
  pub(crate) fn drain(&mut self) -> Vec<Arc<dyn Notifier>> {
    std::mem::take(&mut self.entries)
  }

  pub(crate) fn is_empty(&self) -> bool {
    self.entries.is_empty()
  }
}

/// Merges the read and write lists for a close broadcast, deduplicating
/// notifiers registered on both sides so each one sees CLOSED exactly once.
pub(crate) fn drain_for_close(read: &mut Watchers, write: &mut Watchers) -> Vec<Arc<dyn Notifier>> {
  let mut all = read.drain();
  for notifier in write.drain() {
    if !all.iter().any(|n| Arc::ptr_eq(n, &notifier)) {
      all.push(notifier);
    }
  }
  all
}
