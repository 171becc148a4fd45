use std::fmt::Debug;
use std::sync::Arc;

use structbuf::{Pack, StructBuf};
use tracing::debug;

use crate::att::{Error, ErrorCode, Handle, HandleRange, Result};
use crate::gap::Uuid;
use crate::gatt::{Cccd, Prop, CCCD_UUID};
use crate::host::{CharacteristicInfo, DescriptorInfo, Discovered, Status};
use crate::util::task_slot;
use crate::SyncMutex;

use super::{uuid_candidates, Conn, RemoteDescriptor, RemoteValue, ATT_TIMEOUT};

/// Callback for notifications and indications, invoked on the host event
/// thread. The `bool` argument distinguishes indications. The callback may
/// replace or clear itself via [`RemoteCharacteristic::subscribe`] and
/// [`RemoteCharacteristic::unsubscribe`], but must not block on other
/// operations of the same connection, which complete on the thread it runs
/// on.
pub type NotifyCallback = Box<dyn FnMut(&RemoteCharacteristic, &[u8], bool) + Send>;

/// Notification callback slot. The epoch changes on every
/// subscribe/unsubscribe so that a callback taken out for dispatch is not
/// restored over a concurrent replacement.
#[derive(Default)]
struct NotifySlot {
    cb: Option<NotifyCallback>,
    epoch: u32,
}

impl NotifySlot {
    fn set(&mut self, cb: Option<NotifyCallback>) {
        self.cb = cb;
        self.epoch = self.epoch.wrapping_add(1);
    }
}

/// Characteristic discovered on the peer.
pub struct RemoteCharacteristic {
    val: RemoteValue,
    props: Prop,
    /// Last handle of the characteristic definition.
    end: Handle,
    descs: SyncMutex<Vec<Arc<RemoteDescriptor>>>,
    retrieved: SyncMutex<bool>,
    notify_cb: SyncMutex<NotifySlot>,
}

impl RemoteCharacteristic {
    pub(super) fn new(conn: Arc<Conn>, info: CharacteristicInfo, end: Handle) -> Self {
        Self {
            val: RemoteValue::new(conn, info.uuid, info.value),
            props: info.props,
            end,
            descs: SyncMutex::new(Vec::new()),
            retrieved: SyncMutex::new(false),
            notify_cb: SyncMutex::new(NotifySlot::default()),
        }
    }

    /// Returns the characteristic properties.
    #[inline(always)]
    #[must_use]
    pub const fn props(&self) -> Prop {
        self.props
    }

    /// Returns the descriptor with the specified UUID, or [`None`] if the
    /// characteristic does not have one.
    pub fn descriptor(&self, uuid: Uuid) -> Result<Option<Arc<RemoteDescriptor>>> {
        for cand in uuid_candidates(uuid) {
            if let Some(d) = self.find_descriptor(cand) {
                return Ok(Some(d));
            }
            self.retrieve_descriptors()?;
            if let Some(d) = self.find_descriptor(cand) {
                return Ok(Some(d));
            }
        }
        Ok(None)
    }

    /// Returns all descriptors of the characteristic, discovering them if
    /// the cache is incomplete.
    pub fn descriptors(&self) -> Result<Vec<Arc<RemoteDescriptor>>> {
        self.retrieve_descriptors()?;
        Ok(self.descs.lock().clone())
    }

    /// Subscribes to notifications or indications by writing the Client
    /// Characteristic Configuration descriptor. `cb` replaces any previous
    /// callback and receives each incoming value.
    pub fn subscribe(&self, cccd: Cccd, cb: Option<NotifyCallback>) -> Result<()> {
        if cccd.contains(Cccd::NOTIFY) && !self.props.contains(Prop::NOTIFY)
            || cccd.contains(Cccd::INDICATE) && !self.props.contains(Prop::INDICATE)
        {
            return Err(Error::Att(ErrorCode::RequestNotSupported));
        }
        self.notify_cb.lock().set(cb);
        self.write_cccd(cccd)
    }

    /// Unsubscribes from notifications and indications and clears the
    /// callback.
    pub fn unsubscribe(&self) -> Result<()> {
        self.notify_cb.lock().set(None);
        self.write_cccd(Cccd::empty())
    }

    /// Updates the cached value and invokes the notification callback.
    /// Called on the host event thread. The callback runs with the slot
    /// unlocked so it can resubscribe or unsubscribe.
    pub(super) fn handle_notify(&self, v: &[u8], indicate: bool) {
        debug!(
            "{} from {:?} ({} bytes)",
            if indicate { "Indication" } else { "Notification" },
            self.uuid(),
            v.len()
        );
        self.val.update_cached(v);
        let (cb, epoch) = {
            let mut slot = self.notify_cb.lock();
            (slot.cb.take(), slot.epoch)
        };
        if let Some(mut cb) = cb {
            cb(self, v, indicate);
            let mut slot = self.notify_cb.lock();
            if slot.epoch == epoch {
                slot.cb = Some(cb);
            }
        }
    }

    fn write_cccd(&self, cccd: Cccd) -> Result<()> {
        let Some(d) = self.descriptor(CCCD_UUID)? else {
            debug!("{:?} has no CCCD", self.uuid());
            return Err(Error::Att(ErrorCode::AttributeNotFound));
        };
        let mut v = StructBuf::new(2);
        v.append().u16(cccd.bits());
        d.write_value(v.as_ref(), true).map(|_| ())
    }

    fn find_descriptor(&self, uuid: Uuid) -> Option<Arc<RemoteDescriptor>> {
        (self.descs.lock().iter()).find(|d| d.uuid() == uuid).map(Arc::clone)
    }

    /// Performs descriptor discovery over the handles between the value
    /// and the end of the characteristic definition.
    fn retrieve_descriptors(&self) -> Result<()> {
        if *self.retrieved.lock() {
            return Ok(());
        }
        let Some(start) = (self.handle().next()).filter(|&s| s <= self.end) else {
            *self.retrieved.lock() = true;
            return Ok(());
        };
        let conn = self.val.conn();
        let h = conn.handle().ok_or_else(|| conn.fail(Status::NotConnected))?;
        let _op = conn.begin_op();
        let (waiter, notifier) = task_slot();
        let mut notifier = Some(notifier);
        let mut found: Vec<DescriptorInfo> = Vec::new();
        let sink = Box::new(move |d: Discovered<DescriptorInfo>| match d {
            Discovered::Item(info) => found.push(info),
            Discovered::Complete(st) => {
                if let Some(n) = notifier.take() {
                    n.notify(st, std::mem::take(&mut found));
                }
            }
        });
        (conn.transport().discover_descriptors(h, HandleRange::new(start, self.end), sink))
            .map_err(|st| conn.fail(st))?;
        let (st, found) = waiter.wait(ATT_TIMEOUT).ok_or_else(|| conn.fail(Status::Timeout))?;
        if !st.is_ok() {
            return Err(conn.fail(st));
        }
        let mut descs = self.descs.lock();
        for info in found {
            if descs.iter().any(|d| d.handle() == info.handle) {
                continue;
            }
            descs.push(Arc::new(RemoteDescriptor::new(Arc::clone(conn), info)));
        }
        *self.retrieved.lock() = true;
        Ok(())
    }
}

impl Debug for RemoteCharacteristic {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RemoteCharacteristic")
            .field("uuid", &self.uuid())
            .field("handle", &self.handle())
            .field("props", &self.props)
            .field("end", &self.end)
            .finish()
    }
}

impl std::ops::Deref for RemoteCharacteristic {
    type Target = RemoteValue;

    #[inline(always)]
    fn deref(&self) -> &RemoteValue {
        &self.val
    }
}
