//! Single-role wrappers around one shared backing channel.
//!
//! A [`Producer`] binds the write role: it holds only a `Weak` to the
//! backing channel, so the pipeline lives exactly as long as some consumer
//! keeps the channel alive. A [`Consumer`] binds the read role and owns the
//! backing ring channel eagerly from construction.
//!
//! # Examples
//!
//! ```
//! use strand::stream::{Consumer, Producer};
//!
//! let consumer = Consumer::<u32>::new(8);
//! let writer = consumer.writer();
//! writer.try_send(1).unwrap();
//! assert_eq!(consumer.try_recv().unwrap(), 1);
//!
//! let producer = Producer::<u32>::new(8, true);
//! let reader = producer.channel();
//! producer.send(2);
//! assert_eq!(reader.try_recv().unwrap(), 2);
//! ```

use std::sync::{Arc, Weak};

use parking_lot::Mutex;

use crate::channel::{self, Channel};
use crate::error::TryRecvError;
use crate::event::{EventMask, Notifier, Source, Watchable};

struct ProducerInner<T> {
  target: Weak<Channel<T>>,
  pending: Vec<T>,
}

/// The producer role over a lazily created shared backing channel.
///
/// With autoflush every [`Producer::send`] writes straight through while a
/// consumer still holds the backing channel, and silently drops otherwise.
/// Without it, sends accumulate locally until an explicit
/// [`Producer::flush`].
pub struct Producer<T> {
  inner: Mutex<ProducerInner<T>>,
  capacity: usize,
  autoflush: bool,
}

impl<T> Producer<T> {
  /// # Panics
  ///
  /// Panics if `capacity` is zero.
  pub fn new(capacity: usize, autoflush: bool) -> Self {
    assert!(capacity > 0, "stream capacity must be greater than zero");
    Self {
      inner: Mutex::new(ProducerInner {
        target: Weak::new(),
        pending: Vec::new(),
      }),
      capacity,
      autoflush,
    }
  }

  /// Returns the backing channel, creating it on first use (or recreating
  /// it if every previous holder dropped it). The returned `Arc` is what
  /// keeps the pipeline alive; the producer itself holds only a `Weak`.
  pub fn channel(&self) -> Arc<Channel<T>> {
    let mut inner = self.inner.lock();
    if let Some(chan) = inner.target.upgrade() {
      return chan;
    }
    let chan = channel::ring::<T>(self.capacity);
    inner.target = Arc::downgrade(&chan);
    chan
  }

  /// Attaches to an existing backing channel instead of creating one.
  pub fn attach(&self, chan: &Arc<Channel<T>>) {
    let mut inner = self.inner.lock();
    inner.target = Arc::downgrade(chan);
  }

  /// Publishes one item per the flush mode. Never blocks, never fails:
  /// with no live consumer the item is silently dropped (autoflush) or
  /// parked locally (manual flush).
  pub fn send(&self, item: T) {
    if self.autoflush {
      let target = self.inner.lock().target.upgrade();
      if let Some(chan) = target {
        let _ = chan.try_send(item);
      }
      // No live consumer: drop silently.
    } else {
      self.inner.lock().pending.push(item);
    }
  }

  /// Pushes everything buffered locally into the backing channel,
  /// best-effort. With no live consumer the buffer is discarded.
  pub fn flush(&self) {
    let (target, pending) = {
      let mut inner = self.inner.lock();
      (inner.target.upgrade(), std::mem::take(&mut inner.pending))
    };
    let Some(chan) = target else {
      if !pending.is_empty() {
        log::trace!("stream flush with no consumer, dropping {} item(s)", pending.len());
      }
      return;
    };
    for item in pending {
      let _ = chan.try_send(item);
    }
  }

  /// Number of items parked locally awaiting a flush.
  pub fn pending(&self) -> usize {
    self.inner.lock().pending.len()
  }

  /// Whether some consumer still holds the backing channel.
  pub fn is_connected(&self) -> bool {
    self.inner.lock().target.strong_count() > 0
  }
}

/// The consumer role: eagerly owns one shared ring channel and exposes only
/// the read view plus monitorability.
pub struct Consumer<T> {
  chan: Arc<Channel<T>>,
}

impl<T> Consumer<T> {
  /// # Panics
  ///
  /// Panics if `capacity` is zero.
  pub fn new(capacity: usize) -> Self {
    Self {
      chan: channel::ring::<T>(capacity),
    }
  }

  pub fn try_recv(&self) -> Result<T, TryRecvError> {
    self.chan.try_recv()
  }

  /// Hands out the write view for producers.
  pub fn writer(&self) -> Arc<Channel<T>> {
    self.chan.clone()
  }

  pub fn len(&self) -> usize {
    self.chan.len()
  }

  pub fn is_empty(&self) -> bool {
    self.chan.is_empty()
  }

  pub fn close(&self) {
    self.chan.close()
  }

  pub fn is_closed(&self) -> bool {
    self.chan.is_closed()
  }
}

impl<T> Watchable for Consumer<T> {
  fn add_watcher(&self, notifier: Arc<dyn Notifier>, interest: EventMask) -> EventMask {
    self.chan.add_watcher(notifier, interest)
  }
}

impl<T> Source<T> for Consumer<T> {
  fn try_recv(&self) -> Result<T, TryRecvError> {
    Consumer::try_recv(self)
  }

  fn is_closed(&self) -> bool {
    Consumer::is_closed(self)
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn producer_creates_channel_lazily() {
    let producer = Producer::<u32>::new(4, true);
    assert!(!producer.is_connected());

    let reader = producer.channel();
    assert!(producer.is_connected());
    assert!(Arc::ptr_eq(&reader, &producer.channel()));

    producer.send(7);
    assert_eq!(reader.try_recv().unwrap(), 7);
  }

  #[test]
  fn autoflush_drops_without_consumer() {
    let producer = Producer::<u32>::new(4, true);
    {
      let reader = producer.channel();
      producer.send(1);
      assert_eq!(reader.len(), 1);
    }
    // Consumer gone; the weak target is dead and sends vanish.
    assert!(!producer.is_connected());
    producer.send(2);

    let reader = producer.channel();
    assert!(reader.is_empty());
  }

  #[test]
  fn manual_mode_buffers_until_flush() {
    let producer = Producer::<u32>::new(8, false);
    let reader = producer.channel();

    producer.send(1);
    producer.send(2);
    assert_eq!(producer.pending(), 2);
    assert!(reader.is_empty());

    producer.flush();
    assert_eq!(producer.pending(), 0);
    assert_eq!(reader.try_recv().unwrap(), 1);
    assert_eq!(reader.try_recv().unwrap(), 2);
  }

  #[test]
  fn flush_without_consumer_discards() {
    let producer = Producer::<u32>::new(8, false);
    producer.send(1);
    producer.flush();
    assert_eq!(producer.pending(), 0);
    assert!(producer.channel().is_empty());
  }

  #[test]
  fn consumer_owns_ring_eagerly() {
    let consumer = Consumer::<u32>::new(2);
    let writer = consumer.writer();

    writer.try_send(1).unwrap();
    writer.try_send(2).unwrap();
    // Ring semantics: overflowing evicts the oldest.
    writer.try_send(3).unwrap();
    assert_eq!(consumer.try_recv().unwrap(), 2);
    assert_eq!(consumer.try_recv().unwrap(), 3);
  }

  #[test]
  fn attach_binds_to_external_channel() {
    let shared = channel::ring::<u32>(4);
    let producer = Producer::<u32>::new(4, true);
    producer.attach(&shared);

    producer.send(5);
    assert_eq!(shared.try_recv().unwrap(), 5);
  }

  #[test]
  fn consumer_close_propagates_to_writers() {
    let consumer = Consumer::<u32>::new(4);
    let writer = consumer.writer();
    consumer.close();
    assert!(writer.try_send(1).is_err());
  }
}
