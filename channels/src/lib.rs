//! Thread-safe in-process channels and the composition layers above them.
//!
//! Strand provides two payload-moving primitives — a bounded/ring-buffer
//! [`channel::Channel`] and an unbuffered blocking [`rendezvous::Rendezvous`]
//! — plus a select-style [`monitor::Monitor`] that multiplexes their
//! readiness transitions, and three composition layers built on top:
//! fan-out ([`broadcast::Broadcaster`]), keyed fan-in
//! ([`aggregate::Aggregator`]), and single-role stream wrappers
//! ([`stream::Producer`] / [`stream::Consumer`]).

pub mod error;
pub mod event;

// Primitive modules
pub mod channel;
pub mod rendezvous;
pub mod monitor;

// Composition layers
pub mod aggregate;
pub mod broadcast;
pub mod stream;

// Internal utilities - not part of public API but exposed for crate use
mod internal;

// Public re-exports for convenience
pub use error::{
  RecvError, RecvTimeoutError, SendError, SendTimeoutError, TryRecvError, TrySendError,
};
pub use event::{EventMask, Notifier, NotifyAction, Sink, Source, Watchable};
