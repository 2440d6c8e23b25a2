//! A readiness multiplexer.
//!
//! A `Monitor` aggregates the edge notifications of many watchable sources
//! (channels, rendezvous points, aggregators) into one blocking wait call,
//! in the select style. Each watched source is identified by a caller-chosen
//! `u64` id.
//!
//! Results are level-triggered: `wait` reports every source whose observed
//! readiness is currently non-empty, regardless of when it became so. Edge
//! bookkeeping exists internally to cheapen wakeups but is not exposed.
//!
//! ## Catch-up
//!
//! Registration returns the source's current state and [`Monitor::watch`]
//! folds it in immediately, so an event that fired just before the watch was
//! installed is reported by the very next `wait` call instead of being lost.
//!
//! # Examples
//!
//! ```
//! use strand::channel;
//! use strand::event::EventMask;
//! use strand::monitor::Monitor;
//!
//! let chan = channel::bounded::<u32>(4);
//! let monitor = Monitor::new();
//! monitor.watch(&*chan, EventMask::READABLE, 1);
//!
//! chan.try_send(10).unwrap();
//! let ready = monitor.wait();
//! assert_eq!(ready.len(), 1);
//! assert_eq!(ready[0].id, 1);
//! assert!(ready[0].events.contains(EventMask::READABLE));
//! ```

use std::collections::{BTreeSet, HashMap};
use std::sync::{Arc, Weak};
use std::time::{Duration, Instant};

use parking_lot::Mutex;

use crate::event::{EventMask, Notifier, NotifyAction, Watchable};
use crate::internal::signal::Signal;

/// One source reported ready by a wait call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReadyEvent {
  /// The id the source was watched under.
  pub id: u64,
  /// The readiness currently observed for that source.
  pub events: EventMask,
}

struct Entry {
  interest: EventMask,
  seen: EventMask,
}

struct State {
  entries: HashMap<u64, Entry>,
  // Ids whose observed readiness is currently non-empty (level).
  ready: BTreeSet<u64>,
  // Ids with an unread rising edge. Drained by collect; internal only.
  edges: BTreeSet<u64>,
}

struct Shared {
  state: Mutex<State>,
  signal: Signal,
}

/// The detached callback a watched source holds. It reaches the monitor
/// state only through a `Weak`, so it expires silently once the monitor is
/// dropped or the id is unwatched.
struct MonitorNotifier {
  shared: Weak<Shared>,
  id: u64,
}

impl Notifier for MonitorNotifier {
  fn notify(&self, events: EventMask, action: NotifyAction) -> bool {
    let Some(shared) = self.shared.upgrade() else {
      // Monitor is gone; ask the source to drop this registration.
      return false;
    };
    let mut state = shared.state.lock();
    let Some(entry) = state.entries.get_mut(&self.id) else {
      // Unwatched; self-remove at the source.
      return false;
    };

    match action {
      // CLOSED is always folded in, whatever the interest set.
      NotifyAction::Set => entry.seen |= events & (entry.interest | EventMask::CLOSED),
      NotifyAction::Clear => entry.seen.remove(events),
    }

    if entry.seen.is_empty() {
      state.ready.remove(&self.id);
    } else if state.ready.insert(self.id) {
      state.edges.insert(self.id);
      drop(state);
      shared.signal.set();
    }
    true
  }
}

/// A blocking readiness multiplexer over many watchable sources.
pub struct Monitor {
  shared: Arc<Shared>,
}

impl Monitor {
  pub fn new() -> Self {
    Self {
      shared: Arc::new(Shared {
        state: Mutex::new(State {
          entries: HashMap::new(),
          ready: BTreeSet::new(),
          edges: BTreeSet::new(),
        }),
        signal: Signal::new(),
      }),
    }
  }

  /// Watches `source` for the given interest under `id`.
  ///
  /// Ids must be unique per monitor; watching a second source under a live
  /// id conflates their bookkeeping.
  ///
  /// # Panics
  ///
  /// Panics if `interest` does not intersect READABLE|WRITABLE.
  pub fn watch(&self, source: &dyn Watchable, interest: EventMask, id: u64) {
    assert!(
      interest.intersects(EventMask::READABLE | EventMask::WRITABLE),
      "watch interest must include READABLE and/or WRITABLE"
    );
    {
      let mut state = self.shared.state.lock();
      let previous = state.entries.insert(
        id,
        Entry {
          interest,
          seen: EventMask::EMPTY,
        },
      );
      debug_assert!(previous.is_none(), "monitor id watched twice");
    }

    let notifier: Arc<dyn Notifier> = Arc::new(MonitorNotifier {
      shared: Arc::downgrade(&self.shared),
      id,
    });
    let current = source.add_watcher(
      notifier.clone(),
      interest & (EventMask::READABLE | EventMask::WRITABLE),
    );

    // Catch-up: fold the state returned by registration in as a rising
    // edge, so a transition from just before the watch is not lost.
    let missed = current & (interest | EventMask::CLOSED);
    if !missed.is_empty() {
      let _ = notifier.notify(missed, NotifyAction::Set);
    }
  }

  /// Stops tracking `id`. The registration at the source removes itself the
  /// next time it fires and finds the id gone.
  pub fn unwatch(&self, id: u64) {
    let mut state = self.shared.state.lock();
    state.entries.remove(&id);
    state.ready.remove(&id);
    state.edges.remove(&id);
  }

  /// Returns the currently ready sources without blocking. May be empty.
  pub fn poll(&self) -> Vec<ReadyEvent> {
    let mut state = self.shared.state.lock();
    Self::collect(&mut state)
  }

  /// Blocks until at least one watched source is ready, then reports every
  /// ready source. Returns immediately if one already is.
  pub fn wait(&self) -> Vec<ReadyEvent> {
    loop {
      {
        let mut state = self.shared.state.lock();
        if !state.ready.is_empty() {
          return Self::collect(&mut state);
        }
      }
      self.shared.signal.wait();
    }
  }

  /// Like [`Monitor::wait`], but gives up at `deadline` and returns whatever
  /// is ready then — possibly nothing.
  pub fn wait_deadline(&self, deadline: Instant) -> Vec<ReadyEvent> {
    loop {
      {
        let mut state = self.shared.state.lock();
        if !state.ready.is_empty() {
          return Self::collect(&mut state);
        }
      }
      if !self.shared.signal.wait_deadline(deadline) {
        let mut state = self.shared.state.lock();
        return Self::collect(&mut state);
      }
    }
  }

  /// Like [`Monitor::wait`], bounded by a relative timeout.
  pub fn wait_timeout(&self, timeout: Duration) -> Vec<ReadyEvent> {
    self.wait_deadline(Instant::now() + timeout)
  }

  /// Number of ids currently watched.
  pub fn watched(&self) -> usize {
    self.shared.state.lock().entries.len()
  }

  /// Drains the internal edge set and snapshots the level-ready sources.
  fn collect(state: &mut State) -> Vec<ReadyEvent> {
    state.edges.clear();
    let entries = &state.entries;
    state
      .ready
      .iter()
      .filter_map(|id| {
        entries.get(id).and_then(|entry| {
          if entry.seen.is_empty() {
            None
          } else {
            Some(ReadyEvent {
              id: *id,
              events: entry.seen,
            })
          }
        })
      })
      .collect()
  }
}

impl Default for Monitor {
  fn default() -> Self {
    Self::new()
  }
}
