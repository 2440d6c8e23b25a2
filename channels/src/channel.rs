//! A bounded, mutex-protected FIFO channel with optional ring-buffer
//! (lossy-overwrite) semantics.
//!
//! `Channel` only offers non-blocking operations; blocking hand-off is the
//! job of [`crate::rendezvous::Rendezvous`], and blocking on readiness of
//! *many* channels is the job of [`crate::monitor::Monitor`].
//!
//! ## Behavior
//!
//! - **Bounded**: `try_send` on a full non-circular channel fails and hands
//!   the caller's own item back.
//! - **Ring**: a full circular channel evicts its oldest item instead;
//!   `try_send` never fails while the channel is open.
//! - **Sticky close**: `close()` is permanent and idempotent. It drops every
//!   buffered item and broadcasts `CLOSED` to all registered notifiers.
//! - **Edge notifications**: after every mutation, READABLE and WRITABLE are
//!   re-derived independently; watchers see a notification only on a
//!   false→true (`Set`) or true→false (`Clear`) transition.
//!
//! # Examples
//!
//! ```
//! use strand::channel;
//!
//! let chan = channel::bounded::<u32>(2);
//! chan.try_send(1).unwrap();
//! chan.try_send(2).unwrap();
//! // Full: the undelivered item comes back.
//! assert_eq!(chan.try_send(3).unwrap_err().into_inner(), 3);
//! assert_eq!(chan.try_recv().unwrap(), 1);
//! chan.try_send(3).unwrap();
//! ```

use std::collections::VecDeque;
use std::sync::Arc;

use parking_lot::Mutex;

use crate::error::{TryRecvError, TrySendError};
use crate::event::{
  drain_for_close, fire_all, EventMask, Notifier, NotifyAction, Pending, Sink, Source, Watchable,
  Watchers,
};

/// Creates a bounded channel. `try_send` fails once `capacity` items are
/// buffered.
///
/// # Panics
///
/// Panics if `capacity` is zero. A zero-capacity exchange is a rendezvous,
/// not a buffer; use [`crate::rendezvous::Rendezvous`] for that.
pub fn bounded<T>(capacity: usize) -> Arc<Channel<T>> {
  Channel::new(capacity, false)
}

/// Creates a ring-buffer channel. A send past `capacity` evicts the oldest
/// buffered item rather than failing.
///
/// # Panics
///
/// Panics if `capacity` is zero.
pub fn ring<T>(capacity: usize) -> Arc<Channel<T>> {
  Channel::new(capacity, true)
}

struct Core<T> {
  queue: VecDeque<T>,
  capacity: usize,
  circular: bool,
  closed: bool,
  state: EventMask,
  read_watchers: Watchers,
  write_watchers: Watchers,
}

impl<T> Core<T> {
  /// Re-derives READABLE and WRITABLE and captures one notification per bit
  /// that actually transitioned. CLOSED is handled by `close` alone.
  fn refresh_state(&mut self, batch: &mut Vec<Pending>) {
    let readable = !self.queue.is_empty();
    let writable = !self.closed && (self.circular || self.queue.len() < self.capacity);

    let was_readable = self.state.contains(EventMask::READABLE);
    let was_writable = self.state.contains(EventMask::WRITABLE);

    if readable != was_readable {
      let action = if readable {
        NotifyAction::Set
      } else {
        NotifyAction::Clear
      };
      self.read_watchers.capture(EventMask::READABLE, action, batch);
      if readable {
        self.state.insert(EventMask::READABLE);
      } else {
        self.state.remove(EventMask::READABLE);
      }
    }

    if writable != was_writable {
      let action = if writable {
        NotifyAction::Set
      } else {
        NotifyAction::Clear
      };
      self
        .write_watchers
        .capture(EventMask::WRITABLE, action, batch);
      if writable {
        self.state.insert(EventMask::WRITABLE);
      } else {
        self.state.remove(EventMask::WRITABLE);
      }
    }
  }
}

/// A bounded, thread-safe FIFO with optional lossy-overwrite semantics.
pub struct Channel<T> {
  core: Mutex<Core<T>>,
}

impl<T> Channel<T> {
  fn new(capacity: usize, circular: bool) -> Arc<Self> {
    assert!(capacity > 0, "channel capacity must be greater than zero");
    Arc::new(Self {
      core: Mutex::new(Core {
        queue: VecDeque::with_capacity(capacity),
        capacity,
        circular,
        closed: false,
        state: EventMask::WRITABLE,
        read_watchers: Watchers::new(),
        write_watchers: Watchers::new(),
      }),
    })
  }

  /// Attempts to buffer an item without blocking.
  ///
  /// On a circular channel this evicts the oldest item when full and only
  /// ever fails with [`TrySendError::Closed`]. On a non-circular channel a
  /// full buffer yields [`TrySendError::Full`] carrying the caller's own
  /// item back.
  pub fn try_send(&self, item: T) -> Result<(), TrySendError<T>> {
    let mut batch = Vec::new();
    let result = {
      let mut core = self.core.lock();
      if core.closed {
        return Err(TrySendError::Closed(item));
      }
      if core.queue.len() >= core.capacity {
        if !core.circular {
          return Err(TrySendError::Full(item));
        }
        // Lossy overwrite: the oldest item is evicted in favor of the new one.
        core.queue.pop_front();
      }
      core.queue.push_back(item);
      debug_assert!(
        core.queue.len() <= core.capacity,
        "channel buffer exceeded its capacity"
      );
      core.refresh_state(&mut batch);
      Ok(())
    };
    self.finish(batch);
    result
  }

  /// Attempts to take the oldest buffered item without blocking.
  pub fn try_recv(&self) -> Result<T, TryRecvError> {
    let mut batch = Vec::new();
    let result = {
      let mut core = self.core.lock();
      if core.closed {
        return Err(TryRecvError::Closed);
      }
      match core.queue.pop_front() {
        Some(item) => {
          core.refresh_state(&mut batch);
          Ok(item)
        }
        None => Err(TryRecvError::Empty),
      }
    };
    self.finish(batch);
    result
  }

  /// Closes the channel. Permanent and idempotent.
  ///
  /// Buffered items are dropped, `CLOSED` is broadcast once to every
  /// registered notifier, and both watcher lists are cleared.
  pub fn close(&self) {
    let notifiers = {
      let mut core = self.core.lock();
      let core = &mut *core;
      if core.closed {
        return;
      }
      core.closed = true;
      let dropped = core.queue.len();
      core.queue.clear();
      core.state = EventMask::CLOSED;
      if dropped > 0 {
        log::trace!("channel closed, dropping {} buffered item(s)", dropped);
      }
      drain_for_close(&mut core.read_watchers, &mut core.write_watchers)
    };
    for notifier in notifiers {
      // The registration is gone either way; the return value is moot.
      let _ = notifier.notify(EventMask::CLOSED, NotifyAction::Set);
    }
  }

  pub fn is_closed(&self) -> bool {
    self.core.lock().closed
  }

  pub fn len(&self) -> usize {
    self.core.lock().queue.len()
  }

  pub fn is_empty(&self) -> bool {
    self.len() == 0
  }

  pub fn is_full(&self) -> bool {
    let core = self.core.lock();
    !core.circular && core.queue.len() >= core.capacity
  }

  pub fn capacity(&self) -> usize {
    self.core.lock().capacity
  }

  pub fn is_circular(&self) -> bool {
    self.core.lock().circular
  }

  /// Returns the current readiness mask.
  pub fn state(&self) -> EventMask {
    self.core.lock().state
  }

  /// Fires a captured notification batch with the lock released, then prunes
  /// registrations whose callback asked to be removed.
  fn finish(&self, batch: Vec<Pending>) {
    if batch.is_empty() {
      return;
    }
    let dead = fire_all(batch);
    if !dead.is_empty() {
      let mut core = self.core.lock();
      core.read_watchers.prune(&dead);
      core.write_watchers.prune(&dead);
    }
  }
}

impl<T> Watchable for Channel<T> {
  /// Registers a notifier under READABLE and/or WRITABLE interest.
  ///
  /// # Panics
  ///
  /// Panics if `interest` is empty or carries bits other than READABLE and
  /// WRITABLE; that is a defect in the calling code, not a runtime
  /// condition.
  fn add_watcher(&self, notifier: Arc<dyn Notifier>, interest: EventMask) -> EventMask {
    assert!(
      !interest.is_empty() && (EventMask::READABLE | EventMask::WRITABLE).contains(interest),
      "watcher interest must be a non-empty subset of READABLE|WRITABLE"
    );
    let mut core = self.core.lock();
    if interest.contains(EventMask::READABLE) {
      core.read_watchers.register(notifier.clone());
    }
    if interest.contains(EventMask::WRITABLE) {
      core.write_watchers.register(notifier);
    }
    core.state
  }
}

impl<T> Source<T> for Channel<T> {
  fn try_recv(&self) -> Result<T, TryRecvError> {
    Channel::try_recv(self)
  }

  fn is_closed(&self) -> bool {
    Channel::is_closed(self)
  }
}

impl<T> Sink<T> for Channel<T> {
  fn try_send(&self, item: T) -> Result<(), TrySendError<T>> {
    Channel::try_send(self, item)
  }

  fn is_closed(&self) -> bool {
    Channel::is_closed(self)
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use std::sync::atomic::{AtomicUsize, Ordering};
  use std::sync::Mutex as StdMutex;

  struct RecordingNotifier {
    hits: StdMutex<Vec<(EventMask, NotifyAction)>>,
    keep: bool,
  }

  impl RecordingNotifier {
    fn new(keep: bool) -> Arc<Self> {
      Arc::new(Self {
        hits: StdMutex::new(Vec::new()),
        keep,
      })
    }

    fn hits(&self) -> Vec<(EventMask, NotifyAction)> {
      self.hits.lock().unwrap().clone()
    }
  }

  impl Notifier for RecordingNotifier {
    fn notify(&self, events: EventMask, action: NotifyAction) -> bool {
      self.hits.lock().unwrap().push((events, action));
      self.keep
    }
  }

  #[test]
  fn bounded_fill_and_fail() {
    let chan = bounded::<u32>(3);
    for i in 0..3 {
      chan.try_send(i).unwrap();
    }
    assert_eq!(chan.len(), 3);
    assert!(chan.is_full());
    match chan.try_send(99) {
      Err(TrySendError::Full(v)) => assert_eq!(v, 99),
      other => panic!("expected Full, got {:?}", other),
    }
  }

  #[test]
  fn bounded_fifo_order() {
    let chan = bounded::<u32>(4);
    for i in 0..4 {
      chan.try_send(i).unwrap();
    }
    for i in 0..4 {
      assert_eq!(chan.try_recv().unwrap(), i);
    }
    assert_eq!(chan.try_recv(), Err(TryRecvError::Empty));
  }

  #[test]
  fn ring_overwrites_oldest() {
    let chan = ring::<u32>(3);
    for i in 0..10 {
      chan.try_send(i).unwrap();
    }
    assert_eq!(chan.len(), 3);
    assert_eq!(chan.try_recv().unwrap(), 7);
    assert_eq!(chan.try_recv().unwrap(), 8);
    assert_eq!(chan.try_recv().unwrap(), 9);
  }

  #[test]
  fn ring_never_reports_full() {
    let chan = ring::<u32>(1);
    assert!(!chan.is_full());
    chan.try_send(0).unwrap();
    assert!(!chan.is_full());
    assert!(chan.state().contains(EventMask::WRITABLE));
  }

  #[test]
  fn close_is_sticky_and_idempotent() {
    let chan = bounded::<u32>(2);
    chan.try_send(1).unwrap();
    chan.close();
    chan.close();
    assert!(chan.is_closed());
    assert_eq!(chan.len(), 0);
    assert_eq!(chan.try_recv(), Err(TryRecvError::Closed));
    match chan.try_send(2) {
      Err(TrySendError::Closed(v)) => assert_eq!(v, 2),
      other => panic!("expected Closed, got {:?}", other),
    }
    assert_eq!(chan.state(), EventMask::CLOSED);
  }

  #[test]
  #[should_panic(expected = "capacity must be greater than zero")]
  fn zero_capacity_panics() {
    let _ = bounded::<u32>(0);
  }

  #[test]
  #[should_panic(expected = "non-empty subset")]
  fn closed_interest_panics() {
    let chan = bounded::<u32>(1);
    chan.add_watcher(RecordingNotifier::new(true), EventMask::CLOSED);
  }

  #[test]
  fn readable_edge_fires_once() {
    let chan = bounded::<u32>(4);
    let watcher = RecordingNotifier::new(true);
    let state = chan.add_watcher(watcher.clone(), EventMask::READABLE);
    assert_eq!(state, EventMask::WRITABLE);

    chan.try_send(1).unwrap();
    chan.try_send(2).unwrap();
    // One rising edge, no repeat while the level holds.
    assert_eq!(watcher.hits(), vec![(EventMask::READABLE, NotifyAction::Set)]);

    chan.try_recv().unwrap();
    assert_eq!(watcher.hits().len(), 1);
    chan.try_recv().unwrap();
    assert_eq!(
      watcher.hits(),
      vec![
        (EventMask::READABLE, NotifyAction::Set),
        (EventMask::READABLE, NotifyAction::Clear),
      ]
    );
  }

  #[test]
  fn writable_edge_fires_on_full_and_drain() {
    let chan = bounded::<u32>(1);
    let watcher = RecordingNotifier::new(true);
    chan.add_watcher(watcher.clone(), EventMask::WRITABLE);

    chan.try_send(1).unwrap();
    assert_eq!(
      watcher.hits(),
      vec![(EventMask::WRITABLE, NotifyAction::Clear)]
    );
    chan.try_recv().unwrap();
    assert_eq!(
      watcher.hits(),
      vec![
        (EventMask::WRITABLE, NotifyAction::Clear),
        (EventMask::WRITABLE, NotifyAction::Set),
      ]
    );
  }

  #[test]
  fn close_notifies_dual_interest_once() {
    let chan = bounded::<u32>(1);
    let watcher = RecordingNotifier::new(true);
    chan.add_watcher(watcher.clone(), EventMask::READABLE | EventMask::WRITABLE);
    chan.close();
    assert_eq!(watcher.hits(), vec![(EventMask::CLOSED, NotifyAction::Set)]);
  }

  #[test]
  fn notifier_returning_false_is_pruned() {
    let chan = bounded::<u32>(2);
    let quitter = RecordingNotifier::new(false);
    chan.add_watcher(quitter.clone(), EventMask::READABLE);

    chan.try_send(1).unwrap();
    assert_eq!(quitter.hits().len(), 1);

    // Drained and refilled: a pruned notifier sees no further edges.
    chan.try_recv().unwrap();
    chan.try_send(2).unwrap();
    assert_eq!(quitter.hits().len(), 1);
  }

  #[test]
  fn notifier_runs_without_channel_lock() {
    // A notifier that pokes the channel that is notifying it. Allowed by the
    // contract only because notifications fire after the lock is released;
    // this would deadlock otherwise.
    struct Reentrant {
      chan: StdMutex<Option<Arc<Channel<u32>>>>,
      observed_len: AtomicUsize,
    }
    impl Notifier for Reentrant {
      fn notify(&self, _events: EventMask, _action: NotifyAction) -> bool {
        if let Some(chan) = self.chan.lock().unwrap().as_ref() {
          self.observed_len.store(chan.len(), Ordering::SeqCst);
        }
        true
      }
    }

    let chan = bounded::<u32>(2);
    let notifier = Arc::new(Reentrant {
      chan: StdMutex::new(Some(chan.clone())),
      observed_len: AtomicUsize::new(usize::MAX),
    });
    chan.add_watcher(notifier.clone(), EventMask::READABLE);
    chan.try_send(7).unwrap();
    assert_eq!(notifier.observed_len.load(Ordering::SeqCst), 1);
  }
}
