//! GATT attribute object model over a vendor BLE host stack.
//!
//! The vendor stack (NimBLE, Bluedroid, or a test double) is consumed through
//! the [`host::Transport`] trait as a set of asynchronous request/callback
//! pairs. This crate turns those callbacks into an application-facing object
//! model: thread-safe attribute values, a local read/write event protocol,
//! blocking remote read/write with long-read/long-write chaining, and a
//! per-connection service discovery cache.

pub mod att;
pub mod client;
pub mod gap;
pub mod gatt;
pub mod host;

mod util;

pub(crate) type SyncMutex<T> = parking_lot::Mutex<T>;
pub(crate) type SyncMutexGuard<'a, T> = parking_lot::MutexGuard<'a, T>;
