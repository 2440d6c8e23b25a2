// src/error.rs

use core::fmt;

/// Error returned by `try_send` operations when the item could not be
/// delivered immediately. The item being sent is always returned to the
/// caller, so the caller decides whether to retry, redirect, or drop.
#[derive(PartialEq, Eq, Clone)]
pub enum TrySendError<T> {
  /// The channel is full (or, for a rendezvous, no receiver is currently
  /// waiting) and cannot accept the item at this time.
  Full(T),
  /// The channel has been closed.
  Closed(T),
}

impl<T> TrySendError<T> {
  /// Consumes the error, returning the undelivered item.
  #[inline]
  pub fn into_inner(self) -> T {
    match self {
      TrySendError::Full(v) => v,
      TrySendError::Closed(v) => v,
    }
  }
}

impl<T> fmt::Debug for TrySendError<T> {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    match self {
      TrySendError::Full(_) => write!(f, "TrySendError::Full(..)"),
      TrySendError::Closed(_) => write!(f, "TrySendError::Closed(..)"),
    }
  }
}

impl<T> fmt::Display for TrySendError<T> {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    match self {
      TrySendError::Full(_) => f.write_str("channel full"),
      TrySendError::Closed(_) => f.write_str("channel closed"),
    }
  }
}

impl<T: fmt::Debug> std::error::Error for TrySendError<T> {}

/// Error returned by blocking `send` operations. The undelivered item is
/// returned to the caller.
#[derive(PartialEq, Eq, Clone)]
pub struct SendError<T>(pub T);

impl<T> SendError<T> {
  /// Consumes the error, returning the undelivered item.
  #[inline]
  pub fn into_inner(self) -> T {
    self.0
  }
}

impl<T> fmt::Debug for SendError<T> {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    write!(f, "SendError(..)")
  }
}

impl<T> fmt::Display for SendError<T> {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.write_str("channel closed")
  }
}

impl<T: fmt::Debug> std::error::Error for SendError<T> {}

/// Error returned by deadlined `send` operations. The undelivered item is
/// returned to the caller in either case.
#[derive(PartialEq, Eq, Clone)]
pub enum SendTimeoutError<T> {
  /// The deadline elapsed before a counterpart appeared.
  Timeout(T),
  /// The channel has been closed.
  Closed(T),
}

impl<T> SendTimeoutError<T> {
  /// Consumes the error, returning the undelivered item.
  #[inline]
  pub fn into_inner(self) -> T {
    match self {
      SendTimeoutError::Timeout(v) => v,
      SendTimeoutError::Closed(v) => v,
    }
  }

  #[inline]
  pub fn is_timeout(&self) -> bool {
    matches!(self, SendTimeoutError::Timeout(_))
  }
}

impl<T> fmt::Debug for SendTimeoutError<T> {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    match self {
      SendTimeoutError::Timeout(_) => write!(f, "SendTimeoutError::Timeout(..)"),
      SendTimeoutError::Closed(_) => write!(f, "SendTimeoutError::Closed(..)"),
    }
  }
}

impl<T> fmt::Display for SendTimeoutError<T> {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    match self {
      SendTimeoutError::Timeout(_) => f.write_str("send operation timed out"),
      SendTimeoutError::Closed(_) => f.write_str("channel closed"),
    }
  }
}

impl<T: fmt::Debug> std::error::Error for SendTimeoutError<T> {}

/// Error returned by `try_recv` operations when an item could not be
/// received immediately.
#[derive(Debug, PartialEq, Eq, Clone, Copy)]
pub enum TryRecvError {
  /// The channel is empty (or, for a rendezvous, no sender is waiting).
  Empty,
  /// The channel has been closed and holds no items.
  Closed,
}

impl std::error::Error for TryRecvError {}
impl fmt::Display for TryRecvError {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    match self {
      TryRecvError::Empty => write!(f, "channel empty"),
      TryRecvError::Closed => write!(f, "channel closed"),
    }
  }
}

/// Error returned by blocking `recv` operations.
#[derive(Debug, PartialEq, Eq, Clone, Copy)]
pub enum RecvError {
  Closed,
}

impl std::error::Error for RecvError {}
impl fmt::Display for RecvError {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    match self {
      RecvError::Closed => write!(f, "channel closed"),
    }
  }
}

/// Error returned by deadlined `recv` operations.
#[derive(Debug, PartialEq, Eq, Clone, Copy)]
pub enum RecvTimeoutError {
  /// The deadline elapsed before an item could be received.
  Timeout,
  /// The channel has been closed and holds no items.
  Closed,
}

impl std::error::Error for RecvTimeoutError {}
impl fmt::Display for RecvTimeoutError {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    match self {
      RecvTimeoutError::Timeout => write!(f, "receive operation timed out"),
      RecvTimeoutError::Closed => write!(f, "channel closed"),
    }
  }
}
