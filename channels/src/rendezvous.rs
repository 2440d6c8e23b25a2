//! An unbuffered rendezvous exchange.
//!
//! A sender and a receiver must both be present for an item to move; nothing
//! is ever buffered. Whichever side arrives first parks on a wait slot that
//! owns its own wakeup signal, so a hand-off wakes exactly one thread.
//!
//! ## Behavior
//!
//! - **FIFO fairness**: a hand-off always serves the oldest queued
//!   counterpart; each direction keeps its own strict FIFO queue.
//! - **Readiness**: the exchange is READABLE while senders are queued and
//!   WRITABLE while receivers are queued. Enqueuing and dequeuing fire the
//!   same edge notifications a [`crate::channel::Channel`] fires.
//! - **try_ operations never enqueue**: `try_send` succeeds only if a
//!   receiver is *already* parked, and vice versa. Two sides polling each
//!   other with try_ calls alone will never meet; at least one side has to
//!   block.
//! - **Timeouts hand the payload back**: a timed-out `send` removes its own
//!   wait slot and returns the caller's item in the error.
//!
//! Lock order is always the exchange lock before a slot lock; every slot
//! completion happens with the exchange lock held, which is what makes the
//! timeout-versus-hand-off race resolvable.

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::Mutex;

use crate::error::{
  RecvError, RecvTimeoutError, SendError, SendTimeoutError, TryRecvError, TrySendError,
};
use crate::event::{
  drain_for_close, fire_all, EventMask, Notifier, NotifyAction, Pending, Sink, Source, Watchable,
  Watchers,
};
use crate::internal::signal::Signal;

struct SlotState<T> {
  item: Option<T>,
  done: bool,
  closed: bool,
}

/// One queued blocking operation. The slot leaves its queue exactly once:
/// via hand-off, closure, or its owner's timeout removal.
struct Slot<T> {
  state: Mutex<SlotState<T>>,
  signal: Signal,
}

impl<T> Slot<T> {
  fn new(item: Option<T>) -> Arc<Self> {
    Arc::new(Self {
      state: Mutex::new(SlotState {
        item,
        done: false,
        closed: false,
      }),
      signal: Signal::new(),
    })
  }
}

struct Core<T> {
  closed: bool,
  senders: VecDeque<Arc<Slot<T>>>,
  receivers: VecDeque<Arc<Slot<T>>>,
  state: EventMask,
  read_watchers: Watchers,
  write_watchers: Watchers,
}

impl<T> Core<T> {
  fn refresh_state(&mut self, batch: &mut Vec<Pending>) {
    let readable = !self.senders.is_empty();
    let writable = !self.receivers.is_empty();

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

/// An unbuffered, thread-safe rendezvous point.
pub struct Rendezvous<T> {
  core: Mutex<Core<T>>,
}

impl<T> Rendezvous<T> {
  pub fn new() -> Arc<Self> {
    Arc::new(Self {
      core: Mutex::new(Core {
        closed: false,
        senders: VecDeque::new(),
        receivers: VecDeque::new(),
        state: EventMask::EMPTY,
        read_watchers: Watchers::new(),
        write_watchers: Watchers::new(),
      }),
    })
  }

  /// Sends an item, blocking until a receiver takes it or the exchange is
  /// closed.
  pub fn send(&self, item: T) -> Result<(), SendError<T>> {
    match self.send_inner(item, None) {
      Ok(()) => Ok(()),
      Err(SendTimeoutError::Closed(v)) => Err(SendError(v)),
      // No deadline was given, so the wait cannot time out.
      Err(SendTimeoutError::Timeout(_)) => unreachable!("untimed send timed out"),
    }
  }

  /// Sends an item, blocking no later than `deadline`.
  pub fn send_deadline(&self, item: T, deadline: Instant) -> Result<(), SendTimeoutError<T>> {
    self.send_inner(item, Some(deadline))
  }

  /// Sends an item, blocking at most `timeout`.
  pub fn send_timeout(&self, item: T, timeout: Duration) -> Result<(), SendTimeoutError<T>> {
    self.send_inner(item, Some(Instant::now() + timeout))
  }

  /// Hands an item off only if a receiver is already parked. Never enqueues.
  pub fn try_send(&self, item: T) -> Result<(), TrySendError<T>> {
    let mut batch = Vec::new();
    let result = {
      let mut core = self.core.lock();
      if core.closed {
        return Err(TrySendError::Closed(item));
      }
      match core.receivers.pop_front() {
        Some(receiver) => {
          let mut state = receiver.state.lock();
          state.item = Some(item);
          state.done = true;
          drop(state);
          receiver.signal.set();
          core.refresh_state(&mut batch);
          Ok(())
        }
        None => return Err(TrySendError::Full(item)),
      }
    };
    self.finish(batch);
    result
  }

  /// Receives an item, blocking until a sender provides one or the exchange
  /// is closed.
  pub fn recv(&self) -> Result<T, RecvError> {
    match self.recv_inner(None) {
      Ok(item) => Ok(item),
      Err(RecvTimeoutError::Closed) => Err(RecvError::Closed),
      Err(RecvTimeoutError::Timeout) => unreachable!("untimed recv timed out"),
    }
  }

  /// Receives an item, blocking no later than `deadline`.
  pub fn recv_deadline(&self, deadline: Instant) -> Result<T, RecvTimeoutError> {
    self.recv_inner(Some(deadline))
  }

  /// Receives an item, blocking at most `timeout`.
  pub fn recv_timeout(&self, timeout: Duration) -> Result<T, RecvTimeoutError> {
    self.recv_inner(Some(Instant::now() + timeout))
  }

  /// Takes an item only if a sender is already parked. Never enqueues.
  pub fn try_recv(&self) -> Result<T, TryRecvError> {
    let mut batch = Vec::new();
    let result = {
      let mut core = self.core.lock();
      if core.closed {
        return Err(TryRecvError::Closed);
      }
      match core.senders.pop_front() {
        Some(sender) => {
          let mut state = sender.state.lock();
          let item = state.item.take().expect("queued sender slot without item");
          state.done = true;
          drop(state);
          sender.signal.set();
          core.refresh_state(&mut batch);
          Ok(item)
        }
        None => return Err(TryRecvError::Empty),
      }
    };
    self.finish(batch);
    result
  }

  /// Closes the exchange. Permanent and idempotent.
  ///
  /// Every queued sender and receiver is woken in FIFO order; blocked
  /// senders get their item back through the error they observe.
  pub fn close(&self) {
    let notifiers = {
      let mut core = self.core.lock();
      let core = &mut *core;
      if core.closed {
        return;
      }
      core.closed = true;
      let woken = core.senders.len() + core.receivers.len();
      for slot in core.senders.drain(..).chain(core.receivers.drain(..)) {
        slot.state.lock().closed = true;
        slot.signal.set();
      }
      if woken > 0 {
        log::trace!("rendezvous closed, waking {} parked operation(s)", woken);
      }
      core.state = EventMask::CLOSED;
      drain_for_close(&mut core.read_watchers, &mut core.write_watchers)
    };
    for notifier in notifiers {
      let _ = notifier.notify(EventMask::CLOSED, NotifyAction::Set);
    }
  }

  pub fn is_closed(&self) -> bool {
    self.core.lock().closed
  }

  /// Number of senders currently parked with an item to hand off.
  pub fn pending_senders(&self) -> usize {
    self.core.lock().senders.len()
  }

  /// Number of receivers currently parked waiting for an item.
  pub fn pending_receivers(&self) -> usize {
    self.core.lock().receivers.len()
  }

  /// Returns the current readiness mask.
  pub fn state(&self) -> EventMask {
    self.core.lock().state
  }

  fn send_inner(&self, item: T, deadline: Option<Instant>) -> Result<(), SendTimeoutError<T>> {
    let slot = {
      let mut batch = Vec::new();
      let mut core = self.core.lock();
      if core.closed {
        return Err(SendTimeoutError::Closed(item));
      }
      // Fast path: the oldest parked receiver takes the item synchronously.
      if let Some(receiver) = core.receivers.pop_front() {
        let mut state = receiver.state.lock();
        state.item = Some(item);
        state.done = true;
        drop(state);
        receiver.signal.set();
        core.refresh_state(&mut batch);
        drop(core);
        self.finish(batch);
        return Ok(());
      }
      // Slow path: park on our own slot. Queuing makes the exchange READABLE.
      let slot = Slot::new(Some(item));
      core.senders.push_back(slot.clone());
      core.refresh_state(&mut batch);
      drop(core);
      self.finish(batch);
      slot
    };

    match deadline {
      None => slot.signal.wait(),
      Some(at) => {
        slot.signal.wait_deadline(at);
      }
    }

    self.resolve_send(&slot)
  }

  /// Decides the outcome of a woken (or timed-out) send slot.
  fn resolve_send(&self, slot: &Arc<Slot<T>>) -> Result<(), SendTimeoutError<T>> {
    let mut batch = Vec::new();
    let result = {
      let mut core = self.core.lock();
      if let Some(pos) = core.senders.iter().position(|s| Arc::ptr_eq(s, slot)) {
        // Still queued: nobody took the item, this is a timeout. Reclaim it.
        core.senders.remove(pos);
        core.refresh_state(&mut batch);
        let item = slot
          .state
          .lock()
          .item
          .take()
          .expect("queued sender slot without item");
        Err(SendTimeoutError::Timeout(item))
      } else {
        // Removed by a hand-off or by close; the slot state is final.
        let mut state = slot.state.lock();
        if state.done {
          Ok(())
        } else {
          debug_assert!(state.closed, "sender slot left queue without outcome");
          let item = state.item.take().expect("closed sender slot without item");
          Err(SendTimeoutError::Closed(item))
        }
      }
    };
    self.finish(batch);
    result
  }

  fn recv_inner(&self, deadline: Option<Instant>) -> Result<T, RecvTimeoutError> {
    let slot = {
      let mut batch = Vec::new();
      let mut core = self.core.lock();
      if core.closed {
        return Err(RecvTimeoutError::Closed);
      }
      // Fast path: take from the oldest parked sender synchronously.
      if let Some(sender) = core.senders.pop_front() {
        let mut state = sender.state.lock();
        let item = state.item.take().expect("queued sender slot without item");
        state.done = true;
        drop(state);
        sender.signal.set();
        core.refresh_state(&mut batch);
        drop(core);
        self.finish(batch);
        return Ok(item);
      }
      // Slow path: park. Queuing makes the exchange WRITABLE.
      let slot = Slot::new(None);
      core.receivers.push_back(slot.clone());
      core.refresh_state(&mut batch);
      drop(core);
      self.finish(batch);
      slot
    };

    match deadline {
      None => slot.signal.wait(),
      Some(at) => {
        slot.signal.wait_deadline(at);
      }
    }

    self.resolve_recv(&slot)
  }

  fn resolve_recv(&self, slot: &Arc<Slot<T>>) -> Result<T, RecvTimeoutError> {
    let mut batch = Vec::new();
    let result = {
      let mut core = self.core.lock();
      if let Some(pos) = core.receivers.iter().position(|s| Arc::ptr_eq(s, slot)) {
        core.receivers.remove(pos);
        core.refresh_state(&mut batch);
        Err(RecvTimeoutError::Timeout)
      } else {
        let mut state = slot.state.lock();
        if state.done {
          Ok(state.item.take().expect("completed receiver slot without item"))
        } else {
          debug_assert!(state.closed, "receiver slot left queue without outcome");
          Err(RecvTimeoutError::Closed)
        }
      }
    };
    self.finish(batch);
    result
  }

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

impl<T> Watchable for Rendezvous<T> {
  /// Registers a notifier under READABLE and/or WRITABLE interest.
  ///
  /// # Panics
  ///
  /// Panics if `interest` is empty or carries bits other than READABLE and
  /// WRITABLE.
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

impl<T> Source<T> for Rendezvous<T> {
  fn try_recv(&self) -> Result<T, TryRecvError> {
    Rendezvous::try_recv(self)
  }

  fn is_closed(&self) -> bool {
    Rendezvous::is_closed(self)
  }
}

impl<T> Sink<T> for Rendezvous<T> {
  fn try_send(&self, item: T) -> Result<(), TrySendError<T>> {
    Rendezvous::try_send(self, item)
  }

  fn is_closed(&self) -> bool {
    Rendezvous::is_closed(self)
  }
}
