//! A keyed fan-in over per-key child channels.
//!
//! An `Aggregator` owns one ring [`Channel`] per key and presents the whole
//! collection as a single logical read endpoint. Reads are round-robin
//! across children so no producer can starve the others, and the aggregator
//! is itself [`Watchable`]: it raises a READABLE rising edge when its set of
//! readable children goes empty→non-empty and the falling edge on the way
//! back — the channel edge pattern, one layer up.
//!
//! Internally each child carries a notifier that holds only a `Weak` back to
//! the aggregator state, plus the child's id; a notifier whose child was
//! removed (or whose aggregator is gone) detects that on its next firing and
//! unregisters itself.
//!
//! # Examples
//!
//! ```
//! use strand::aggregate::Aggregator;
//!
//! let agg = Aggregator::<&str, u32>::new();
//! let metrics = agg.channel("metrics", 8);
//! let health = agg.channel("health", 8);
//!
//! metrics.try_send(1).unwrap();
//! health.try_send(2).unwrap();
//! metrics.try_send(3).unwrap();
//!
//! // Round-robin across children, not FIFO across arrival.
//! assert_eq!(agg.recv_all(), vec![1, 2, 3]);
//! assert!(agg.try_recv().is_err());
//! ```

use std::collections::{BTreeSet, HashMap};
use std::hash::Hash;
use std::sync::{Arc, Weak};

use parking_lot::Mutex;

use crate::channel::{self, Channel};
use crate::error::{TryRecvError, TrySendError};
use crate::event::{
  fire_all, EventMask, Notifier, NotifyAction, Pending, Source, Watchable, Watchers,
};

struct ChildEntry<K, T> {
  key: K,
  chan: Arc<Channel<T>>,
}

struct State<K, T> {
  children: HashMap<u64, ChildEntry<K, T>>,
  index: HashMap<K, u64>,
  // Round-robin order: child ids in insertion order.
  order: Vec<u64>,
  // Child ids with at least one buffered item.
  readable: BTreeSet<u64>,
  cursor: usize,
  next_id: u64,
  closed: bool,
  state: EventMask,
  watchers: Watchers,
}

impl<K: Eq + Hash, T> State<K, T> {
  fn mark_readable(&mut self, id: u64, batch: &mut Vec<Pending>) {
    if self.readable.insert(id) && self.readable.len() == 1 {
      self.state.insert(EventMask::READABLE);
      self
        .watchers
        .capture(EventMask::READABLE, NotifyAction::Set, batch);
    }
  }

  fn mark_unreadable(&mut self, id: u64, batch: &mut Vec<Pending>) {
    if self.readable.remove(&id) && self.readable.is_empty() {
      self.state.remove(EventMask::READABLE);
      self
        .watchers
        .capture(EventMask::READABLE, NotifyAction::Clear, batch);
    }
  }

  fn remove_child(&mut self, id: u64, batch: &mut Vec<Pending>) -> Option<Arc<Channel<T>>> {
    let entry = self.children.remove(&id)?;
    self.index.remove(&entry.key);
    if let Some(pos) = self.order.iter().position(|o| *o == id) {
      self.order.remove(pos);
      // Keep the cursor pointing at the same next child.
      if pos < self.cursor {
        self.cursor -= 1;
      }
      if self.order.is_empty() {
        self.cursor = 0;
      } else {
        self.cursor %= self.order.len();
      }
    }
    self.mark_unreadable(id, batch);
    Some(entry.chan)
  }

  /// Child handles in round-robin order, starting at the cursor.
  fn snapshot(&self) -> Vec<(u64, Arc<Channel<T>>)> {
    let mut out = Vec::with_capacity(self.order.len());
    for offset in 0..self.order.len() {
      let id = self.order[(self.cursor + offset) % self.order.len()];
      if let Some(entry) = self.children.get(&id) {
        out.push((id, entry.chan.clone()));
      }
    }
    out
  }
}

struct Shared<K, T> {
  state: Mutex<State<K, T>>,
}

/// The per-child callback. Keeps the aggregator's readable-children set in
/// sync with the child's READABLE edges.
struct ChildNotifier<K, T> {
  shared: Weak<Shared<K, T>>,
  id: u64,
}

impl<K: Eq + Hash + Send, T: Send> Notifier for ChildNotifier<K, T> {
  fn notify(&self, events: EventMask, action: NotifyAction) -> bool {
    let Some(shared) = self.shared.upgrade() else {
      return false;
    };
    let mut batch = Vec::new();
    let keep = {
      let mut state = shared.state.lock();
      if events.contains(EventMask::CLOSED) {
        // The child was closed out from under us; drop its contribution
        // and let the registration die with the child's watcher lists.
        state.remove_child(self.id, &mut batch);
        false
      } else if !state.children.contains_key(&self.id) {
        // Removed child; stale registration.
        false
      } else if events.intersects(EventMask::READABLE) {
        match action {
          NotifyAction::Set => state.mark_readable(self.id, &mut batch),
          NotifyAction::Clear => state.mark_unreadable(self.id, &mut batch),
        }
        true
      } else {
        true
      }
    };
    // Propagate the aggregate edge with the aggregator lock released.
    let dead = fire_all(batch);
    if !dead.is_empty() {
      shared.state.lock().watchers.prune(&dead);
    }
    keep
  }
}

/// A keyed collection of ring channels behind one round-robin-fair read
/// endpoint.
pub struct Aggregator<K, T> {
  shared: Arc<Shared<K, T>>,
}

impl<K, T> Aggregator<K, T>
where
  K: Eq + Hash + Clone + Send + 'static,
  T: Send + 'static,
{
  pub fn new() -> Self {
    Self {
      shared: Arc::new(Shared {
        state: Mutex::new(State {
          children: HashMap::new(),
          index: HashMap::new(),
          order: Vec::new(),
          readable: BTreeSet::new(),
          cursor: 0,
          next_id: 0,
          closed: false,
          state: EventMask::EMPTY,
          watchers: Watchers::new(),
        }),
      }),
    }
  }

  /// Gets or creates the ring child channel for `key` and returns it for
  /// producers to write to. `capacity` applies only on creation.
  ///
  /// A child created after [`Aggregator::close`] is handed out already
  /// closed, so producers observe `Closed` as a result value rather than a
  /// panic.
  ///
  /// # Panics
  ///
  /// Panics if a new child would be created with zero capacity.
  pub fn channel(&self, key: K, capacity: usize) -> Arc<Channel<T>> {
    let (chan, id, closed) = {
      let mut state = self.shared.state.lock();
      if let Some(id) = state.index.get(&key) {
        return state.children[id].chan.clone();
      }
      let id = state.next_id;
      state.next_id += 1;
      let chan = channel::ring::<T>(capacity);
      state.index.insert(key.clone(), id);
      state.order.push(id);
      state.children.insert(
        id,
        ChildEntry {
          key,
          chan: chan.clone(),
        },
      );
      (chan, id, state.closed)
    };

    if closed {
      chan.close();
      let mut batch = Vec::new();
      self.shared.state.lock().remove_child(id, &mut batch);
      debug_assert!(batch.is_empty());
      return chan;
    }

    log::trace!("aggregator created child {}", id);
    let notifier: Arc<dyn Notifier> = Arc::new(ChildNotifier {
      shared: Arc::downgrade(&self.shared),
      id,
    });
    let current = chan.add_watcher(notifier.clone(), EventMask::READABLE);
    // Catch-up: a producer may have written between the insert above and
    // the registration.
    if current.contains(EventMask::READABLE) {
      let _ = notifier.notify(EventMask::READABLE, NotifyAction::Set);
    }
    chan
  }

  /// Removes the child for `key`, dropping its readability contribution.
  /// Returns `true` if a child existed. Producers still holding the child
  /// can keep writing into it, but nothing reads it any more.
  pub fn remove(&self, key: &K) -> bool {
    let mut batch = Vec::new();
    let removed = {
      let mut state = self.shared.state.lock();
      match state.index.get(key).copied() {
        Some(id) => {
          state.remove_child(id, &mut batch);
          log::trace!("aggregator removed child {}", id);
          true
        }
        None => false,
      }
    };
    self.finish(batch);
    removed
  }

  /// Takes one item, round-robin across readable children.
  ///
  /// Child channels are polled with the aggregator lock released, so a
  /// child's notifier firing back into this aggregator cannot deadlock.
  pub fn try_recv(&self) -> Result<T, TryRecvError> {
    let targets = {
      let state = self.shared.state.lock();
      if state.closed {
        return Err(TryRecvError::Closed);
      }
      state.snapshot()
    };

    for (id, chan) in targets {
      match chan.try_recv() {
        Ok(item) => {
          let mut state = self.shared.state.lock();
          if let Some(pos) = state.order.iter().position(|o| *o == id) {
            state.cursor = (pos + 1) % state.order.len();
          }
          return Ok(item);
        }
        // Closed children are cleaned up lazily by their notifier.
        Err(TryRecvError::Closed) | Err(TryRecvError::Empty) => continue,
      }
    }
    Err(TryRecvError::Empty)
  }

  /// Drains every child and interleaves the results round-robin: one item
  /// per child per round, starting at the cursor.
  pub fn recv_all(&self) -> Vec<T> {
    let targets = {
      let state = self.shared.state.lock();
      if state.closed {
        return Vec::new();
      }
      state.snapshot()
    };

    // Drain without holding the aggregator lock.
    let drained: Vec<Vec<T>> = targets
      .iter()
      .map(|(_, chan)| {
        let mut items = Vec::new();
        while let Ok(item) = chan.try_recv() {
          items.push(item);
        }
        items
      })
      .collect();

    let total = drained.iter().map(Vec::len).sum();
    let mut rounds: Vec<std::vec::IntoIter<T>> = drained.into_iter().map(Vec::into_iter).collect();
    let mut out = Vec::with_capacity(total);
    loop {
      let mut took_any = false;
      for items in &mut rounds {
        if let Some(item) = items.next() {
          out.push(item);
          took_any = true;
        }
      }
      if !took_any {
        break;
      }
    }
    out
  }

  /// Closes the aggregator: atomically detaches every child, closes each,
  /// and broadcasts `CLOSED` to external observers. Idempotent.
  pub fn close(&self) {
    let (chans, notifiers) = {
      let mut state = self.shared.state.lock();
      if state.closed {
        return;
      }
      state.closed = true;
      state.state = EventMask::CLOSED;
      state.index.clear();
      state.order.clear();
      state.readable.clear();
      state.cursor = 0;
      let chans: Vec<_> = state
        .children
        .drain()
        .map(|(_, entry)| entry.chan)
        .collect();
      (chans, state.watchers.drain())
    };

    log::trace!("aggregator closed with {} child(ren)", chans.len());
    for chan in chans {
      // Each child's ChildNotifier fires, fails to find its id, and
      // self-removes; the child broadcast stays a no-op here.
      chan.close();
    }
    for notifier in notifiers {
      let _ = notifier.notify(EventMask::CLOSED, NotifyAction::Set);
    }
  }

  pub fn is_closed(&self) -> bool {
    self.shared.state.lock().closed
  }

  /// Number of live children.
  pub fn child_count(&self) -> usize {
    self.shared.state.lock().children.len()
  }

  /// Returns the current aggregate readiness mask.
  pub fn state(&self) -> EventMask {
    self.shared.state.lock().state
  }

  fn finish(&self, batch: Vec<Pending>) {
    if batch.is_empty() {
      return;
    }
    let dead = fire_all(batch);
    if !dead.is_empty() {
      self.shared.state.lock().watchers.prune(&dead);
    }
  }
}

impl<K, T> Default for Aggregator<K, T>
where
  K: Eq + Hash + Clone + Send + 'static,
  T: Send + 'static,
{
  fn default() -> Self {
    Self::new()
  }
}

impl<K, T> Watchable for Aggregator<K, T>
where
  K: Eq + Hash + Clone + Send + 'static,
  T: Send + 'static,
{
  /// Registers an external observer. The aggregator is a read endpoint, so
  /// only READABLE interest is meaningful.
  ///
  /// # Panics
  ///
  /// Panics unless `interest` is exactly READABLE.
  fn add_watcher(&self, notifier: Arc<dyn Notifier>, interest: EventMask) -> EventMask {
    assert!(
      interest == EventMask::READABLE,
      "aggregator watchers take READABLE interest only"
    );
    let mut state = self.shared.state.lock();
    state.watchers.register(notifier);
    state.state
  }
}

impl<K, T> Source<T> for Aggregator<K, T>
where
  K: Eq + Hash + Clone + Send + 'static,
  T: Send + 'static,
{
  fn try_recv(&self) -> Result<T, TryRecvError> {
    Aggregator::try_recv(self)
  }

  fn is_closed(&self) -> bool {
    Aggregator::is_closed(self)
  }
}

/// Writing into a child obtained from [`Aggregator::channel`] goes through
/// the child directly; the aggregator itself is never a sink.
impl<K, T> Aggregator<K, T>
where
  K: Eq + Hash + Clone + Send + 'static,
  T: Send + 'static,
{
  /// Convenience: sends into the child for `key`, creating it with
  /// `capacity` if needed.
  pub fn send_to(&self, key: K, capacity: usize, item: T) -> Result<(), TrySendError<T>> {
    self.channel(key, capacity).try_send(item)
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use std::sync::Mutex as StdMutex;

  struct RecordingNotifier {
    hits: StdMutex<Vec<(EventMask, NotifyAction)>>,
  }

  impl RecordingNotifier {
    fn new() -> Arc<Self> {
      Arc::new(Self {
        hits: StdMutex::new(Vec::new()),
      })
    }

    fn hits(&self) -> Vec<(EventMask, NotifyAction)> {
      self.hits.lock().unwrap().clone()
    }
  }

  impl Notifier for RecordingNotifier {
    fn notify(&self, events: EventMask, action: NotifyAction) -> bool {
      self.hits.lock().unwrap().push((events, action));
      true
    }
  }

  #[test]
  fn channel_is_get_or_create() {
    let agg = Aggregator::<&str, u32>::new();
    let first = agg.channel("a", 4);
    let again = agg.channel("a", 16);
    assert!(Arc::ptr_eq(&first, &again));
    assert_eq!(again.capacity(), 4);
    assert_eq!(agg.child_count(), 1);
  }

  #[test]
  fn round_robin_across_children() {
    let agg = Aggregator::<&str, u32>::new();
    let a = agg.channel("a", 8);
    let b = agg.channel("b", 8);
    let c = agg.channel("c", 8);

    for i in 0..3 {
      a.try_send(10 + i).unwrap();
      b.try_send(20 + i).unwrap();
      c.try_send(30 + i).unwrap();
    }

    // Cycles a, b, c, a, b, c, ... — never exhausts one child first.
    let mut got = Vec::new();
    while let Ok(item) = agg.try_recv() {
      got.push(item);
    }
    assert_eq!(got, vec![10, 20, 30, 11, 21, 31, 12, 22, 32]);
  }

  #[test]
  fn recv_all_interleaves_and_empties() {
    let agg = Aggregator::<&str, u32>::new();
    let a = agg.channel("a", 8);
    let b = agg.channel("b", 8);
    a.try_send(1).unwrap();
    a.try_send(3).unwrap();
    b.try_send(2).unwrap();

    assert_eq!(agg.recv_all(), vec![1, 2, 3]);
    assert!(agg.try_recv().is_err());
    assert_eq!(agg.recv_all(), Vec::<u32>::new());
  }

  #[test]
  fn readable_edges_propagate_upward() {
    let agg = Aggregator::<&str, u32>::new();
    let child = agg.channel("a", 4);
    let watcher = RecordingNotifier::new();
    agg.add_watcher(watcher.clone(), EventMask::READABLE);

    child.try_send(1).unwrap();
    child.try_send(2).unwrap();
    assert_eq!(watcher.hits(), vec![(EventMask::READABLE, NotifyAction::Set)]);

    agg.try_recv().unwrap();
    assert_eq!(watcher.hits().len(), 1);
    agg.try_recv().unwrap();
    assert_eq!(
      watcher.hits(),
      vec![
        (EventMask::READABLE, NotifyAction::Set),
        (EventMask::READABLE, NotifyAction::Clear),
      ]
    );
  }

  #[test]
  fn watch_after_fill_catches_up() {
    let agg = Aggregator::<&str, u32>::new();
    let child = agg.channel("a", 4);
    child.try_send(9).unwrap();

    // State handed back at registration carries the level.
    let watcher = RecordingNotifier::new();
    let state = agg.add_watcher(watcher.clone(), EventMask::READABLE);
    assert!(state.contains(EventMask::READABLE));
  }

  #[test]
  fn remove_last_readable_child_fires_falling_edge() {
    let agg = Aggregator::<&str, u32>::new();
    let child = agg.channel("a", 4);
    let watcher = RecordingNotifier::new();
    agg.add_watcher(watcher.clone(), EventMask::READABLE);

    child.try_send(1).unwrap();
    assert!(agg.remove(&"a"));
    assert_eq!(
      watcher.hits(),
      vec![
        (EventMask::READABLE, NotifyAction::Set),
        (EventMask::READABLE, NotifyAction::Clear),
      ]
    );
    assert_eq!(agg.child_count(), 0);
    assert!(agg.try_recv().is_err());
  }

  #[test]
  fn removed_child_notifier_self_expires() {
    let agg = Aggregator::<&str, u32>::new();
    let child = agg.channel("a", 4);
    agg.remove(&"a");

    // Producers can still write into the detached child; the stale
    // notifier unregisters on its first firing and nothing propagates.
    child.try_send(5).unwrap();
    assert_eq!(agg.state(), EventMask::EMPTY);
  }

  #[test]
  fn directly_closed_child_is_dropped() {
    let agg = Aggregator::<&str, u32>::new();
    let child = agg.channel("a", 4);
    child.try_send(1).unwrap();
    child.close();
    assert_eq!(agg.child_count(), 0);
    assert_eq!(agg.state(), EventMask::EMPTY);
  }

  #[test]
  fn close_fires_closed_upward_and_closes_children() {
    let agg = Aggregator::<&str, u32>::new();
    let child = agg.channel("a", 4);
    let watcher = RecordingNotifier::new();
    agg.add_watcher(watcher.clone(), EventMask::READABLE);

    agg.close();
    agg.close();
    assert!(agg.is_closed());
    assert!(child.is_closed());
    assert_eq!(agg.child_count(), 0);
    assert_eq!(watcher.hits(), vec![(EventMask::CLOSED, NotifyAction::Set)]);
    assert_eq!(agg.try_recv(), Err(TryRecvError::Closed));
  }

  #[test]
  fn child_created_after_close_is_closed() {
    let agg = Aggregator::<&str, u32>::new();
    agg.close();
    let child = agg.channel("late", 4);
    assert!(child.is_closed());
    assert_eq!(agg.child_count(), 0);
  }

  #[test]
  fn send_to_creates_on_demand() {
    let agg = Aggregator::<String, u32>::new();
    agg.send_to("k".to_string(), 4, 11).unwrap();
    assert_eq!(agg.try_recv().unwrap(), 11);
  }
}
