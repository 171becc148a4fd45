use std::fmt::Debug;
use std::sync::Arc;
use std::time::Duration;

use once_cell::sync::OnceCell;
use tracing::{debug, warn};

use crate::att::{AttValue, ErrorCode, Handle, MAX_VAL_LEN};
use crate::gap::Uuid;
use crate::host::{ConnHandle, Transport};
use crate::util::task_slot;

use super::Prop;

/// Application hooks for peer access to a local attribute, invoked on the
/// host event thread.
pub trait AccessCallbacks: Debug + Send + Sync {
    /// Called once per logical read, before the stored value is returned.
    /// Long reads invoke this for the initial request only, not for the
    /// follow-up blob requests.
    fn on_read(&self, _att: &LocalAttribute, _conn: Option<ConnHandle>) {}

    /// Called after a peer write was accepted and the stored value updated.
    fn on_write(&self, _att: &LocalAttribute, _conn: Option<ConnHandle>) {}
}

/// No-op [`AccessCallbacks`] implementation.
#[derive(Debug, Default)]
struct NoAccessCallbacks;

impl AccessCallbacks for NoAccessCallbacks {}

/// Local GATT attribute with a stored value that peers read and write.
#[derive(Debug)]
pub struct LocalAttribute {
    uuid: Uuid,
    handle: OnceCell<Handle>,
    value: AttValue,
    cb: Arc<dyn AccessCallbacks>,
}

impl LocalAttribute {
    /// Creates a new attribute with an empty value bounded by `max_len`.
    #[must_use]
    pub fn new(uuid: Uuid, max_len: usize) -> Self {
        Self {
            uuid,
            handle: OnceCell::new(),
            value: AttValue::new(max_len),
            cb: Arc::new(NoAccessCallbacks),
        }
    }

    /// Replaces the access callbacks. Only valid before the attribute is
    /// registered with the host stack.
    pub fn set_callbacks(&mut self, cb: Arc<dyn AccessCallbacks>) {
        self.cb = cb;
    }

    /// Returns the attribute UUID.
    #[inline(always)]
    #[must_use]
    pub const fn uuid(&self) -> Uuid {
        self.uuid
    }

    /// Returns the attribute handle once registration has assigned it.
    #[inline]
    #[must_use]
    pub fn handle(&self) -> Option<Handle> {
        self.handle.get().copied()
    }

    /// Records the handle assigned during registration. Later calls with a
    /// different handle are ignored with a warning.
    pub fn set_handle(&self, hdl: Handle) {
        if let Err(prev) = self.handle.try_insert(hdl) {
            if *prev.0 != hdl {
                warn!("Ignoring handle reassignment {} -> {hdl}", prev.0);
            }
        }
    }

    /// Returns the stored value.
    #[inline(always)]
    #[must_use]
    pub const fn value(&self) -> &AttValue {
        &self.value
    }

    /// Handles a peer read at `offset`. Invokes the read callback for
    /// logical reads (offset 0) and returns a snapshot of the value from
    /// `offset` to the end.
    pub fn read_access(
        &self,
        conn: Option<ConnHandle>,
        offset: u16,
    ) -> Result<Vec<u8>, ErrorCode> {
        if offset == 0 {
            self.cb.on_read(self, conn);
        }
        let v = self.value.value();
        let offset = usize::from(offset);
        if offset > v.len() {
            return Err(ErrorCode::InvalidOffset);
        }
        Ok(v[offset..].to_vec())
    }

    /// Handles a peer write delivered as one or more fragments. The
    /// fragments are accumulated and applied atomically: if the combined
    /// length exceeds the maximum value length, the stored value is left
    /// untouched and the peer gets an error response. The write callback
    /// runs only after the value was updated.
    pub fn write_access<'a, I>(
        &self,
        conn: Option<ConnHandle>,
        frags: I,
    ) -> Result<(), ErrorCode>
    where
        I: IntoIterator<Item = &'a [u8]>,
    {
        let mut buf = Vec::new();
        for frag in frags {
            if buf.len() + frag.len() > self.value.max_len() {
                debug!("Rejecting oversized write to {:?}", self.uuid);
                return Err(ErrorCode::InvalidAttributeValueLength);
            }
            buf.extend_from_slice(frag);
        }
        if !self.value.set_value(&buf) {
            return Err(ErrorCode::InvalidAttributeValueLength);
        }
        self.cb.on_write(self, conn);
        Ok(())
    }
}

/// Local characteristic definition.
#[derive(Debug)]
pub struct LocalCharacteristic {
    att: LocalAttribute,
    props: Prop,
}

impl LocalCharacteristic {
    /// ATT transaction timeout ([Vol 3] Part F, Section 3.3.3).
    const INDICATE_TIMEOUT: Duration = Duration::from_secs(30);

    /// Creates a new characteristic with an empty value bounded by
    /// [`MAX_VAL_LEN`].
    #[must_use]
    pub fn new(uuid: Uuid, props: Prop) -> Self {
        Self::with_max_len(uuid, props, MAX_VAL_LEN)
    }

    /// Creates a new characteristic with an empty value bounded by
    /// `max_len`.
    #[must_use]
    pub fn with_max_len(uuid: Uuid, props: Prop, max_len: usize) -> Self {
        Self {
            att: LocalAttribute::new(uuid, max_len),
            props,
        }
    }

    /// Returns the characteristic properties.
    #[inline(always)]
    #[must_use]
    pub const fn props(&self) -> Prop {
        self.props
    }

    /// Returns the underlying attribute.
    #[inline(always)]
    #[must_use]
    pub const fn att(&self) -> &LocalAttribute {
        &self.att
    }

    /// Sends the current value as a notification. Returns without error if
    /// the characteristic does not support notifications.
    pub fn notify(&self, t: &dyn Transport, conn: ConnHandle) -> crate::att::Result<()> {
        self.send(t, conn, false)
    }

    /// Sends the current value as an indication and waits for the peer's
    /// confirmation.
    pub fn indicate(&self, t: &dyn Transport, conn: ConnHandle) -> crate::att::Result<()> {
        self.send(t, conn, true)
    }

    fn send(&self, t: &dyn Transport, conn: ConnHandle, ind: bool) -> crate::att::Result<()> {
        let want = if ind { Prop::INDICATE } else { Prop::NOTIFY };
        if !self.props.contains(want) {
            debug!("{:?} does not support {want:?}", self.att.uuid);
            return Ok(());
        }
        let Some(hdl) = self.att.handle() else {
            return Err(crate::att::Error::NotConnected);
        };
        let (waiter, notifier) = task_slot();
        t.notify(
            conn,
            hdl,
            self.att.value.value(),
            ind,
            Box::new(move |st| notifier.notify(st, ())),
        )
        .map_err(crate::att::Error::from)?;
        let (st, ()) = waiter
            .wait(Self::INDICATE_TIMEOUT)
            .ok_or(crate::att::Error::Timeout)?;
        if st.is_ok() {
            Ok(())
        } else {
            Err(st.into())
        }
    }
}

impl std::ops::Deref for LocalCharacteristic {
    type Target = LocalAttribute;

    #[inline(always)]
    fn deref(&self) -> &LocalAttribute {
        &self.att
    }
}

impl std::ops::DerefMut for LocalCharacteristic {
    #[inline(always)]
    fn deref_mut(&mut self) -> &mut LocalAttribute {
        &mut self.att
    }
}

/// Local descriptor definition.
#[derive(Debug)]
pub struct LocalDescriptor {
    att: LocalAttribute,
}

impl LocalDescriptor {
    /// Creates a new descriptor with an empty value bounded by `max_len`.
    #[must_use]
    pub fn new(uuid: Uuid, max_len: usize) -> Self {
        Self {
            att: LocalAttribute::new(uuid, max_len),
        }
    }
}

impl std::ops::Deref for LocalDescriptor {
    type Target = LocalAttribute;

    #[inline(always)]
    fn deref(&self) -> &LocalAttribute {
        &self.att
    }
}

impl std::ops::DerefMut for LocalDescriptor {
    #[inline(always)]
    fn deref_mut(&mut self) -> &mut LocalAttribute {
        &mut self.att
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use super::*;

    #[derive(Debug, Default)]
    struct Counter {
        reads: AtomicUsize,
        writes: AtomicUsize,
    }

    impl AccessCallbacks for Counter {
        fn on_read(&self, _att: &LocalAttribute, _conn: Option<ConnHandle>) {
            self.reads.fetch_add(1, Ordering::SeqCst);
        }

        fn on_write(&self, _att: &LocalAttribute, _conn: Option<ConnHandle>) {
            self.writes.fetch_add(1, Ordering::SeqCst);
        }
    }

    fn attr(max_len: usize) -> (LocalAttribute, Arc<Counter>) {
        let cb = Arc::new(Counter::default());
        let mut att = LocalAttribute::new(Uuid::U16(0x2A00), max_len);
        att.set_callbacks(Arc::clone(&cb) as _);
        (att, cb)
    }

    #[test]
    fn read_callback_once_per_logical_read() {
        let (att, cb) = attr(512);
        assert!(att.value().set_value(&[0; 100]));
        assert_eq!(att.read_access(None, 0).unwrap().len(), 100);
        assert_eq!(att.read_access(None, 22).unwrap().len(), 78);
        assert_eq!(att.read_access(None, 44).unwrap().len(), 56);
        assert_eq!(cb.reads.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn read_past_end() {
        let (att, _) = attr(16);
        assert!(att.value().set_value(b"abc"));
        assert_eq!(att.read_access(None, 3).unwrap(), b"");
        assert_eq!(att.read_access(None, 4), Err(ErrorCode::InvalidOffset));
    }

    #[test]
    fn fragmented_write_applies_atomically() {
        let (att, cb) = attr(8);
        att.write_access(None, [&b"abcd"[..], &b"efgh"[..]]).unwrap();
        assert_eq!(att.value().value(), b"abcdefgh");
        assert_eq!(cb.writes.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn oversized_write_leaves_value_untouched() {
        let (att, cb) = attr(8);
        assert!(att.value().set_value(b"old"));
        assert_eq!(
            att.write_access(None, [&b"abcdef"[..], &b"ghi"[..]]),
            Err(ErrorCode::InvalidAttributeValueLength)
        );
        assert_eq!(att.value().value(), b"old");
        assert_eq!(cb.writes.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn handle_set_once() {
        let (att, _) = attr(4);
        assert_eq!(att.handle(), None);
        att.set_handle(Handle::new(7).unwrap());
        att.set_handle(Handle::new(9).unwrap());
        assert_eq!(att.handle(), Handle::new(7));
    }
}
