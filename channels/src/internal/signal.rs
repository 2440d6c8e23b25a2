//! A one-permit binary semaphore used for blocking wakeups.
//!
//! Each queued rendezvous operation owns its own `Signal`, so a hand-off
//! wakes exactly one party instead of a herd on a shared condvar. The
//! monitor owns a single `Signal` released at most meaningfully once per
//! actionable transition batch: `set` on an already-set signal saturates.

use std::time::Instant;

use parking_lot::{Condvar, Mutex};

pub(crate) struct Signal {
  permit: Mutex<bool>,
  cond: Condvar,
}

impl Signal {
  pub(crate) fn new() -> Self {
    Self {
      permit: Mutex::new(false),
      cond: Condvar::new(),
    }
  }

  /// Releases the permit. Idempotent while the permit is unconsumed.
  pub(crate) fn set(&self) {
    let mut permit = self.permit.lock();
    if !*permit {
      *permit = true;
      self.cond.notify_one();
    }
  }

  /// Blocks until the permit is available, then consumes it.
  pub(crate) fn wait(&self) {
    let mut permit = self.permit.lock();
    while !*permit {
      self.cond.wait(&mut permit);
    }
    *permit = false;
  }

  /// Blocks until the permit is available or the deadline passes.
  /// Returns `true` if the permit was acquired.
  pub(crate) fn wait_deadline(&self, deadline: Instant) -> bool {
    let mut permit = self.permit.lock();
    while !*permit {
      if self.cond.wait_until(&mut permit, deadline).timed_out() {
        break;
      }
    }
    if *permit {
      *permit = false;
      true
    } else {
      false
    }
  }

  /// Consumes the permit if it is available, without blocking.
  pub(crate) fn try_wait(&self) -> bool {
    let mut permit = self.permit.lock();
    std::mem::replace(&mut *permit, false)
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use std::sync::Arc;
  use std::thread;
  use std::time::{Duration, Instant};

  #[test]
  fn set_then_wait_does_not_block() {
    let signal = Signal::new();
    signal.set();
    signal.wait();
    assert!(!signal.try_wait());
  }

  #[test]
  fn set_saturates_at_one_permit() {
    let signal = Signal::new();
    signal.set();
    signal.set();
    assert!(signal.try_wait());
    assert!(!signal.try_wait());
  }

  #[test]
  fn wait_deadline_times_out() {
    let signal = Signal::new();
    let start = Instant::now();
    assert!(!signal.wait_deadline(start + Duration::from_millis(50)));
    assert!(start.elapsed() >= Duration::from_millis(50));
  }

  #[test]
  fn cross_thread_wakeup() {
    let signal = Arc::new(Signal::new());
    let waker = signal.clone();
    let handle = thread::spawn(move || {
      thread::sleep(Duration::from_millis(20));
      waker.set();
    });
    assert!(signal.wait_deadline(Instant::now() + Duration::from_secs(5)));
    handle.join().unwrap();
  }
}
