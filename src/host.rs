//! Vendor host stack interface.
//!
//! The host stack owns the radio, the ATT bearer, and the event thread.
//! Everything above it talks to the controller through the [`Transport`]
//! trait, which submits asynchronous operations and reports their outcomes
//! through callbacks invoked on the host event thread.

use std::fmt::{Debug, Display, Formatter};
use std::time::Duration;

use crate::att::ErrorCode;
use crate::att::Handle;
use crate::att::HandleRange;
use crate::gap::Addr;
use crate::gap::Uuid;
use crate::gatt::Prop;

/// Connection handle assigned by the host stack.
#[derive(Clone, Copy, Eq, Hash, Ord, PartialEq, PartialOrd)]
#[repr(transparent)]
pub struct ConnHandle(u16);

impl ConnHandle {
    /// Wraps a raw connection handle.
    #[inline(always)]
    #[must_use]
    pub const fn new(h: u16) -> Self {
        Self(h)
    }
}

impl Debug for ConnHandle {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "ConnHandle({:#06X})", self.0)
    }
}

impl Display for ConnHandle {
    #[inline]
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        Debug::fmt(self, f)
    }
}

impl From<ConnHandle> for u16 {
    #[inline]
    fn from(h: ConnHandle) -> Self {
        h.0
    }
}

/// Outcome of a host stack operation.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum Status {
    /// Operation completed successfully.
    Ok,
    /// Multi-part operation delivered all parts.
    Done,
    /// Peer returned an ATT error response.
    Att(ErrorCode),
    /// No connection to the peer.
    NotConnected,
    /// Operation timed out.
    Timeout,
    /// Vendor-specific host stack error.
    Host(u8),
}

impl Status {
    /// Returns whether the status represents success.
    #[inline]
    #[must_use]
    pub const fn is_ok(self) -> bool {
        matches!(self, Self::Ok | Self::Done)
    }

    /// Returns whether the status is an ATT error that a security upgrade
    /// may resolve.
    #[inline]
    #[must_use]
    pub const fn needs_security(self) -> bool {
        matches!(self, Self::Att(e) if e.needs_security())
    }
}

/// GAP-level connection event delivered on the host event thread.
#[derive(Clone, Debug)]
#[non_exhaustive]
pub enum GapEvent {
    /// Connection to the peer was established.
    Connected { conn: ConnHandle },
    /// Connection attempt failed before a link was established.
    ConnectFailed { status: Status },
    /// Established connection was terminated.
    Disconnected { conn: ConnHandle, reason: Status },
    /// Peer sent a notification or indication.
    NotifyRx {
        conn: ConnHandle,
        handle: Handle,
        value: Vec<u8>,
        indicate: bool,
    },
    /// ATT bearer MTU was (re)negotiated.
    MtuChanged { conn: ConnHandle, mtu: u16 },
    /// Link encryption state changed after a security procedure.
    EncChange { conn: ConnHandle, status: Status },
}

/// Sink for [`GapEvent`]s, invoked on the host event thread.
pub type GapSink = Box<dyn FnMut(GapEvent) + Send>;

/// Service discovered on a peer.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct ServiceInfo {
    pub uuid: Uuid,
    /// Service declaration handle.
    pub start: Handle,
    /// Last handle in the service definition.
    pub end: Handle,
}

/// Characteristic discovered on a peer.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct CharacteristicInfo {
    pub uuid: Uuid,
    /// Characteristic declaration handle.
    pub decl: Handle,
    /// Characteristic value handle.
    pub value: Handle,
    pub props: Prop,
}

/// Descriptor discovered on a peer.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct DescriptorInfo {
    pub uuid: Uuid,
    pub handle: Handle,
}

/// Connection parameters reported by the host stack.
#[derive(Clone, Copy, Debug)]
pub struct ConnInfo {
    pub handle: ConnHandle,
    pub mtu: u16,
    pub encrypted: bool,
    pub authenticated: bool,
    pub bonded: bool,
}

/// One item of a multi-part discovery or read result.
#[derive(Debug)]
pub enum Discovered<T> {
    /// Next discovered item.
    Item(T),
    /// End of the result stream with the final status. [`Status::Done`]
    /// with prior items means success; an error with no prior items means
    /// nothing matched or the procedure failed.
    Complete(Status),
}

/// Sink for multi-part discovery results, invoked once per item and once
/// for completion on the host event thread.
pub type DiscoverySink<T> = Box<dyn FnMut(Discovered<T>) + Send>;

/// Sink for read data. Invoked once per fragment with the attribute offset
/// and data, then once with [`Discovered::Complete`]. Returning an error
/// from a fragment stops the read and reports that error to the peer
/// protocol layer.
pub type ReadSink = Box<dyn FnMut(Discovered<(u16, Vec<u8>)>) -> Result<(), ErrorCode> + Send>;

/// Sink for single-shot operation outcomes.
pub type StatusSink = Box<dyn FnOnce(Status) + Send>;

/// Asynchronous interface to the vendor host stack.
///
/// Submission methods return `Err` when the operation cannot be queued at
/// all. Once a submission is accepted, its outcome is always delivered
/// through the provided sink on the host event thread. Implementations must
/// never invoke a sink while the submitting call is still holding locks the
/// sink needs, but may invoke it before the submitting call returns.
pub trait Transport: Debug + Send + Sync {
    /// Initiates a connection to `peer`. Events for the resulting link are
    /// delivered to `sink` until disconnection.
    fn connect(&self, peer: Addr, timeout: Duration, sink: GapSink) -> Result<(), Status>;

    /// Cancels an in-progress connection attempt.
    fn cancel_connect(&self) -> Result<(), Status>;

    /// Terminates an established connection.
    fn terminate(&self, conn: ConnHandle) -> Result<(), Status>;

    /// Returns the current ATT bearer MTU.
    fn mtu(&self, conn: ConnHandle) -> u16;

    /// Initiates an MTU exchange.
    fn exchange_mtu(&self, conn: ConnHandle, sink: StatusSink) -> Result<(), Status>;

    /// Returns connection parameters, or [`None`] if the handle is stale.
    fn conn_info(&self, conn: ConnHandle) -> Option<ConnInfo>;

    /// Discovers primary services, optionally filtered by UUID.
    fn discover_services(
        &self,
        conn: ConnHandle,
        uuid: Option<Uuid>,
        sink: DiscoverySink<ServiceInfo>,
    ) -> Result<(), Status>;

    /// Discovers characteristics within `range`, optionally filtered by
    /// UUID.
    fn discover_characteristics(
        &self,
        conn: ConnHandle,
        range: HandleRange,
        uuid: Option<Uuid>,
        sink: DiscoverySink<CharacteristicInfo>,
    ) -> Result<(), Status>;

    /// Discovers descriptors within `range`.
    fn discover_descriptors(
        &self,
        conn: ConnHandle,
        range: HandleRange,
        sink: DiscoverySink<DescriptorInfo>,
    ) -> Result<(), Status>;

    /// Reads the attribute value with a single read request. The sink gets
    /// at most one fragment, then completion.
    fn read(&self, conn: ConnHandle, handle: Handle, sink: ReadSink) -> Result<(), Status>;

    /// Reads the attribute value starting at `offset`, chaining read blob
    /// requests as long as each response fills the bearer and the sink
    /// keeps accepting fragments.
    fn read_long(
        &self,
        conn: ConnHandle,
        handle: Handle,
        offset: u16,
        sink: ReadSink,
    ) -> Result<(), Status>;

    /// Writes the attribute value with a single write request. The value
    /// must fit in `MTU - 3` bytes.
    fn write(
        &self,
        conn: ConnHandle,
        handle: Handle,
        value: Vec<u8>,
        sink: StatusSink,
    ) -> Result<(), Status>;

    /// Writes the attribute value using the prepare/execute write
    /// procedure.
    fn write_long(
        &self,
        conn: ConnHandle,
        handle: Handle,
        value: Vec<u8>,
        sink: StatusSink,
    ) -> Result<(), Status>;

    /// Writes the attribute value without response. The value must fit in
    /// `MTU - 3` bytes. No outcome is reported.
    fn write_no_rsp(&self, conn: ConnHandle, handle: Handle, value: Vec<u8>)
        -> Result<(), Status>;

    /// Initiates pairing or encryption with the peer. The outcome arrives
    /// as [`GapEvent::EncChange`].
    fn start_security(&self, conn: ConnHandle) -> Result<(), Status>;

    /// Sends a notification or indication for a local attribute.
    fn notify(
        &self,
        conn: ConnHandle,
        handle: Handle,
        value: Vec<u8>,
        indicate: bool,
        sink: StatusSink,
    ) -> Result<(), Status>;
}
