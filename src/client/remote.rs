use std::sync::Arc;
use std::time::SystemTime;

use tracing::{debug, warn};

use crate::att::{AttValue, Error, ErrorCode, Handle, Result, MAX_VAL_LEN};
use crate::gap::Uuid;
use crate::host::{ConnHandle, Discovered, Status, Transport};
use crate::util::{task_slot, TaskNotifier};
use crate::{SyncMutex, SyncMutexGuard};

use super::ATT_TIMEOUT;

/// Connection state shared between the client and its remote attributes.
///
/// This is the only piece of the client that remote attributes hold on to,
/// so a cached service or characteristic kept alive by the application does
/// not keep the whole discovery cache alive with it.
#[derive(Debug)]
pub(super) struct Conn {
    transport: Arc<dyn Transport>,
    handle: SyncMutex<Option<ConnHandle>>,
    /// Serializes ATT transactions and discovery procedures on this bearer.
    op: SyncMutex<()>,
    /// Pending security upgrade, released by the encryption change event.
    sec: SyncMutex<Option<TaskNotifier<()>>>,
    last_err: SyncMutex<Status>,
}

impl Conn {
    pub fn new(transport: Arc<dyn Transport>) -> Self {
        Self {
            transport,
            handle: SyncMutex::new(None),
            op: SyncMutex::new(()),
            sec: SyncMutex::new(None),
            last_err: SyncMutex::new(Status::Ok),
        }
    }

    #[inline]
    pub fn transport(&self) -> &dyn Transport {
        self.transport.as_ref()
    }

    #[inline]
    pub fn handle(&self) -> Option<ConnHandle> {
        *self.handle.lock()
    }

    pub fn set_handle(&self, h: ConnHandle) {
        *self.handle.lock() = Some(h);
    }

    pub fn clear_handle(&self) {
        *self.handle.lock() = None;
        // A security upgrade can no longer complete.
        drop(self.sec.lock().take());
    }

    /// Acquires the per-connection operation lock.
    #[inline]
    pub fn begin_op(&self) -> SyncMutexGuard<'_, ()> {
        self.op.lock()
    }

    #[inline]
    pub fn last_error(&self) -> Status {
        *self.last_err.lock()
    }

    /// Records a failed operation status and converts it to an error.
    pub fn fail(&self, st: Status) -> Error {
        *self.last_err.lock() = st;
        st.into()
    }

    /// Initiates pairing or encryption and blocks until the encryption
    /// change event arrives.
    pub fn upgrade_security(&self, conn: ConnHandle) -> Result<()> {
        let (waiter, notifier) = task_slot();
        *self.sec.lock() = Some(notifier);
        (self.transport.start_security(conn)).map_err(|st| self.fail(st))?;
        let (st, ()) = waiter.wait(ATT_TIMEOUT).ok_or_else(|| self.fail(Status::Timeout))?;
        if st.is_ok() {
            Ok(())
        } else {
            Err(self.fail(st))
        }
    }

    /// Releases a pending security upgrade. Called on the host event thread
    /// when the encryption change event arrives.
    pub fn security_done(&self, st: Status) {
        if let Some(n) = self.sec.lock().take() {
            n.notify(st, ());
        }
    }
}

/// Outcome of a characteristic or descriptor write.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
#[must_use]
pub enum WriteOutcome {
    /// The peer accepted the full value.
    Written,
    /// The peer does not support long writes; only the first `n` bytes
    /// were written.
    Truncated(usize),
}

impl WriteOutcome {
    /// Returns whether the full value was written.
    #[inline]
    #[must_use]
    pub const fn is_written(self) -> bool {
        matches!(self, Self::Written)
    }
}

/// State shared by remote characteristics and descriptors: the attribute
/// identity and a local copy of the last value read, written, or received
/// in a notification.
#[derive(Debug)]
pub struct RemoteValue {
    uuid: Uuid,
    handle: Handle,
    conn: Arc<Conn>,
    value: AttValue,
}

impl RemoteValue {
    pub(super) fn new(conn: Arc<Conn>, uuid: Uuid, handle: Handle) -> Self {
        Self {
            uuid,
            handle,
            conn,
            value: AttValue::with_max(),
        }
    }

    #[inline(always)]
    pub(super) fn conn(&self) -> &Arc<Conn> {
        &self.conn
    }

    /// Returns the attribute UUID.
    #[inline(always)]
    #[must_use]
    pub const fn uuid(&self) -> Uuid {
        self.uuid
    }

    /// Returns the attribute value handle.
    #[inline(always)]
    #[must_use]
    pub const fn handle(&self) -> Handle {
        self.handle
    }

    /// Returns a copy of the locally cached value without touching the
    /// peer.
    #[must_use]
    pub fn cached_value(&self) -> Vec<u8> {
        self.value.value()
    }

    /// Returns the time the cached value was last updated.
    #[inline]
    #[must_use]
    pub fn cached_at(&self) -> Option<SystemTime> {
        self.value.timestamp()
    }

    pub(super) fn update_cached(&self, v: &[u8]) {
        if !self.value.set_value(v) {
            debug!("Not caching {} byte value for {:?}", v.len(), self.uuid);
        }
    }

    /// Reads the attribute value from the peer, blocking until the value is
    /// received or the ATT transaction times out.
    ///
    /// The read is performed as a long read, chaining blob requests while
    /// each response fills the bearer, bounded by [`MAX_VAL_LEN`]. A peer
    /// that rejects blob requests with "attribute not long" is retried once
    /// with a plain read. A peer that demands security is retried once
    /// after a security upgrade.
    pub fn read_value(&self) -> Result<Vec<u8>> {
        let _op = self.conn.begin_op();
        let mut plain = false;
        let mut secured = false;
        loop {
            let conn = (self.conn.handle()).ok_or_else(|| self.conn.fail(Status::NotConnected))?;
            let (st, val) = self.read_once(conn, plain)?;
            if st.is_ok() {
                self.update_cached(&val);
                return Ok(val);
            }
            if st == Status::Att(ErrorCode::AttributeNotLong) && !plain {
                debug!("{:?} does not support long reads", self.uuid);
                plain = true;
                continue;
            }
            if st.needs_security() && !secured {
                debug!("Upgrading security to read {:?}", self.uuid);
                self.conn.upgrade_security(conn)?;
                secured = true;
                continue;
            }
            return Err(self.conn.fail(st));
        }
    }

    /// Submits one read and waits for its completion. The fragment sink
    /// accumulates data, stopping the chain if the total would exceed
    /// [`MAX_VAL_LEN`].
    fn read_once(&self, conn: ConnHandle, plain: bool) -> Result<(Status, Vec<u8>)> {
        let (waiter, notifier) = task_slot();
        let mut notifier = Some(notifier);
        let mut acc: Vec<u8> = Vec::new();
        let sink = Box::new(move |d: Discovered<(u16, Vec<u8>)>| match d {
            Discovered::Item((off, data)) => {
                if usize::from(off) != acc.len() {
                    warn!("Read fragment at offset {off}, expected {}", acc.len());
                    return Err(ErrorCode::InvalidOffset);
                }
                if acc.len() + data.len() > MAX_VAL_LEN {
                    return Err(ErrorCode::InvalidAttributeValueLength);
                }
                acc.extend_from_slice(&data);
                Ok(())
            }
            Discovered::Complete(st) => {
                if let Some(n) = notifier.take() {
                    n.notify(st, std::mem::take(&mut acc));
                }
                Ok(())
            }
        });
        let t = self.conn.transport();
        let submit = if plain {
            t.read(conn, self.handle, sink)
        } else {
            t.read_long(conn, self.handle, 0, sink)
        };
        submit.map_err(|st| self.conn.fail(st))?;
        waiter.wait(ATT_TIMEOUT).ok_or_else(|| self.conn.fail(Status::Timeout))
    }

    /// Writes `v` to the attribute, blocking for the peer's response when
    /// `response` is set.
    ///
    /// A write without response must fit in `MTU - 3` bytes and returns as
    /// soon as the host stack accepts it. Longer values, and any write with
    /// response, wait for the outcome. Values that do not fit in one
    /// request use the prepare/execute write procedure; if the peer rejects
    /// it with "attribute not long", the write is retried once with the
    /// value truncated to `MTU - 3` bytes, reported as
    /// [`WriteOutcome::Truncated`].
    pub fn write_value(&self, v: &[u8], response: bool) -> Result<WriteOutcome> {
        let _op = self.conn.begin_op();
        let conn = (self.conn.handle()).ok_or_else(|| self.conn.fail(Status::NotConnected))?;
        let fit = usize::from(self.conn.transport().mtu(conn).saturating_sub(3));
        if !response && v.len() <= fit {
            (self.conn.transport().write_no_rsp(conn, self.handle, v.to_vec()))
                .map_err(|st| self.conn.fail(st))?;
            self.update_cached(v);
            return Ok(WriteOutcome::Written);
        }
        let mut data = v;
        let mut secured = false;
        loop {
            let conn = (self.conn.handle()).ok_or_else(|| self.conn.fail(Status::NotConnected))?;
            let st = self.write_once(conn, data, data.len() > fit)?;
            if st.is_ok() {
                self.update_cached(data);
                return Ok(if data.len() == v.len() {
                    WriteOutcome::Written
                } else {
                    WriteOutcome::Truncated(data.len())
                });
            }
            if st == Status::Att(ErrorCode::AttributeNotLong) && data.len() > fit {
                debug!("{:?} does not support long writes", self.uuid);
                data = &v[..fit];
                continue;
            }
            if st.needs_security() && !secured {
                debug!("Upgrading security to write {:?}", self.uuid);
                self.conn.upgrade_security(conn)?;
                secured = true;
                continue;
            }
            return Err(self.conn.fail(st));
        }
    }

    fn write_once(&self, conn: ConnHandle, v: &[u8], long: bool) -> Result<Status> {
        let (waiter, notifier) = task_slot();
        let sink = Box::new(move |st| notifier.notify(st, ()));
        let t = self.conn.transport();
        let submit = if long {
            t.write_long(conn, self.handle, v.to_vec(), sink)
        } else {
            t.write(conn, self.handle, v.to_vec(), sink)
        };
        submit.map_err(|st| self.conn.fail(st))?;
        let (st, ()) = waiter.wait(ATT_TIMEOUT).ok_or_else(|| self.conn.fail(Status::Timeout))?;
        Ok(st)
    }
}
