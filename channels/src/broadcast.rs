//! A single-producer, multi-consumer fan-out.
//!
//! A `Broadcaster` holds a staging ring buffer and a list of *weakly held*
//! subscriber channels: connecting a subscriber never keeps it alive, and a
//! dropped subscriber is purged lazily on the next dispatch.
//!
//! Delivery is best-effort. One logical event is independently `try_send`-ed
//! into every live subscriber channel, which is why `T: Clone` is required;
//! a full non-circular subscriber, a closed subscriber, or no subscribers at
//! all silently drop the event for that subscriber only. The broadcaster
//! never blocks and never retries.
//!
//! # Examples
//!
//! ```
//! use strand::broadcast::Broadcaster;
//! use strand::channel;
//!
//! let fanout = Broadcaster::new(8, false);
//! let sub_a = channel::ring::<u32>(4);
//! let sub_b = channel::ring::<u32>(4);
//! fanout.connect(&sub_a);
//! fanout.connect(&sub_b);
//!
//! fanout.send(1);
//! fanout.send(2);
//! fanout.dispatch();
//!
//! assert_eq!(sub_a.try_recv().unwrap(), 1);
//! assert_eq!(sub_b.try_recv().unwrap(), 1);
//! ```

use std::sync::{Arc, Weak};

use parking_lot::Mutex;

use crate::channel::{self, Channel};

struct Core<T> {
  // Staged events awaiting an explicit dispatch. In autodispatch mode the
  // stage is bypassed entirely.
  stage: Arc<Channel<T>>,
  subscribers: Vec<Weak<Channel<T>>>,
}

/// A single-producer fan-out over weakly-held subscriber channels.
pub struct Broadcaster<T: Clone> {
  core: Mutex<Core<T>>,
  autodispatch: bool,
}

impl<T: Clone> Broadcaster<T> {
  /// Creates a broadcaster whose stage holds up to `capacity` undispatched
  /// events; staging past that evicts the oldest. With `autodispatch`, each
  /// `send` is delivered immediately and `dispatch` is a no-op.
  ///
  /// # Panics
  ///
  /// Panics if `capacity` is zero.
  pub fn new(capacity: usize, autodispatch: bool) -> Self {
    Self {
      core: Mutex::new(Core {
        stage: channel::ring(capacity),
        subscribers: Vec::new(),
      }),
      autodispatch,
    }
  }

  /// Adds a subscriber. Only a weak reference is kept.
  pub fn connect(&self, subscriber: &Arc<Channel<T>>) {
    let mut core = self.core.lock();
    core.subscribers.push(Arc::downgrade(subscriber));
  }

  /// Publishes one event: immediately in autodispatch mode, otherwise onto
  /// the stage for a later [`Broadcaster::dispatch`].
  pub fn send(&self, event: T) {
    if self.autodispatch {
      let targets = self.live_subscribers();
      Self::deliver(&targets, std::iter::once(event));
    } else {
      let stage = self.core.lock().stage.clone();
      // The stage is a ring: staging cannot fail while the stage is open.
      let _ = stage.try_send(event);
    }
  }

  /// Delivers every staged event to every live subscriber, oldest event
  /// first, purging dead subscriber references on the way.
  pub fn dispatch(&self) {
    let (stage, targets) = {
      let mut core = self.core.lock();
      core.subscribers.retain(|weak| weak.strong_count() > 0);
      (core.stage.clone(), Self::upgrade(&core.subscribers))
    };

    // Drain and deliver with the broadcaster lock released; subscriber
    // notifiers may lock monitors or aggregators of their own.
    let mut staged = Vec::new();
    while let Ok(event) = stage.try_recv() {
      staged.push(event);
    }
    Self::deliver(&targets, staged.into_iter());
  }

  /// Number of subscribers still alive.
  pub fn subscriber_count(&self) -> usize {
    self
      .core
      .lock()
      .subscribers
      .iter()
      .filter(|weak| weak.strong_count() > 0)
      .count()
  }

  /// Number of events currently staged.
  pub fn staged(&self) -> usize {
    self.core.lock().stage.len()
  }

  fn live_subscribers(&self) -> Vec<Arc<Channel<T>>> {
    let mut core = self.core.lock();
    core.subscribers.retain(|weak| weak.strong_count() > 0);
    Self::upgrade(&core.subscribers)
  }

  fn upgrade(subscribers: &[Weak<Channel<T>>]) -> Vec<Arc<Channel<T>>> {
    subscribers.iter().filter_map(Weak::upgrade).collect()
  }

  fn deliver(targets: &[Arc<Channel<T>>], events: impl Iterator<Item = T>) {
    for event in events {
      for target in targets {
        // Best-effort: full or closed subscribers drop this event only.
        let _ = target.try_send(event.clone());
      }
    }
  }
}
