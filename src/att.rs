//! Attribute Protocol types ([Vol 3] Part F).

use crate::host::Status;

pub use {consts::*, handle::*, value::*};

mod consts;
mod handle;
mod value;

/// Error type returned by attribute operations.
#[derive(Clone, Copy, Debug, Eq, PartialEq, thiserror::Error)]
#[non_exhaustive]
pub enum Error {
    /// Peer rejected the operation with an ATT error code.
    #[error(transparent)]
    Att(#[from] ErrorCode),
    /// No connection, or the connection dropped mid-operation.
    #[error("not connected")]
    NotConnected,
    /// The operation did not complete within the transaction timeout.
    #[error("timeout waiting for completion")]
    Timeout,
    /// Opaque failure reported by the host stack.
    #[error("host stack error ({0:#04X})")]
    Host(u8),
}

impl From<Status> for Error {
    #[inline]
    fn from(s: Status) -> Self {
        match s {
            Status::Ok | Status::Done => Self::Host(0), // Should never happen
            Status::Att(e) => Self::Att(e),
            Status::NotConnected => Self::NotConnected,
            Status::Timeout => Self::Timeout,
            Status::Host(c) => Self::Host(c),
        }
    }
}

/// Common attribute result type.
pub type Result<T> = std::result::Result<T, Error>;
