use std::time::SystemTime;

use smallvec::SmallVec;
use tracing::warn;

use crate::SyncMutex;

use super::MAX_VAL_LEN;

/// Values at or below this length are stored inline without a heap
/// allocation.
const INLINE_CAP: usize = 32;

/// Attribute value container with interior mutability.
///
/// The value is a byte buffer bounded by a per-attribute maximum length,
/// which is itself capped at [`MAX_VAL_LEN`]. All mutations are atomic: a
/// write that would exceed the maximum is rejected in full, leaving the
/// previous contents untouched. Each successful mutation records a
/// timestamp of when it happened.
#[derive(Debug)]
pub struct AttValue {
    max_len: u16,
    inner: SyncMutex<Inner>,
}

#[derive(Clone, Debug, Default)]
struct Inner {
    buf: SmallVec<[u8; INLINE_CAP]>,
    time: Option<SystemTime>,
}

impl AttValue {
    /// Creates an empty value bounded by `max_len` bytes. Maximum lengths
    /// above [`MAX_VAL_LEN`] are clamped.
    #[inline]
    #[must_use]
    pub fn new(max_len: usize) -> Self {
        Self {
            max_len: max_len.min(MAX_VAL_LEN) as u16,
            inner: SyncMutex::new(Inner::default()),
        }
    }

    /// Creates a value bounded by [`MAX_VAL_LEN`].
    #[inline]
    #[must_use]
    pub fn with_max() -> Self {
        Self::new(MAX_VAL_LEN)
    }

    /// Returns the maximum value length in bytes.
    #[inline(always)]
    #[must_use]
    pub const fn max_len(&self) -> usize {
        self.max_len as usize
    }

    /// Returns the current value length in bytes.
    #[inline]
    #[must_use]
    pub fn len(&self) -> usize {
        self.inner.lock().buf.len()
    }

    /// Returns whether the value is empty.
    #[inline]
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Returns a copy of the current value.
    #[must_use]
    pub fn value(&self) -> Vec<u8> {
        self.inner.lock().buf.to_vec()
    }

    /// Returns the time of the last successful mutation, or [`None`] if the
    /// value was never set.
    #[inline]
    #[must_use]
    pub fn timestamp(&self) -> Option<SystemTime> {
        self.inner.lock().time
    }

    /// Returns the byte at `pos`, or 0 if `pos` is out of bounds.
    #[must_use]
    pub fn byte_at(&self, pos: usize) -> u8 {
        let inner = self.inner.lock();
        match inner.buf.get(pos) {
            Some(&b) => b,
            None => {
                warn!("Out-of-bounds read at {pos} (len {})", inner.buf.len());
                0
            }
        }
    }

    /// Replaces the value with `v`. Returns `false` without modifying the
    /// value if `v` exceeds the maximum length.
    pub fn set_value(&self, v: &[u8]) -> bool {
        if v.len() > self.max_len() {
            warn!("Rejecting {} byte value (max {})", v.len(), self.max_len);
            return false;
        }
        let mut inner = self.inner.lock();
        inner.buf.clear();
        inner.buf.extend_from_slice(v);
        inner.time = Some(SystemTime::now());
        true
    }

    /// Appends `v` to the value. Returns `false` without modifying the value
    /// if the combined length exceeds the maximum length.
    pub fn append(&self, v: &[u8]) -> bool {
        let mut inner = self.inner.lock();
        if inner.buf.len() + v.len() > self.max_len() {
            warn!(
                "Rejecting append of {} bytes to {} (max {})",
                v.len(),
                inner.buf.len(),
                self.max_len
            );
            return false;
        }
        inner.buf.extend_from_slice(v);
        inner.time = Some(SystemTime::now());
        true
    }

    /// Empties the value and returns its previous contents. The timestamp is
    /// cleared as well.
    #[must_use]
    pub fn take(&self) -> Vec<u8> {
        let mut inner = self.inner.lock();
        inner.time = None;
        std::mem::take(&mut inner.buf).into_vec()
    }
}

impl Clone for AttValue {
    /// Creates an independent deep copy of the value.
    fn clone(&self) -> Self {
        Self {
            max_len: self.max_len,
            inner: SyncMutex::new(self.inner.lock().clone()),
        }
    }
}

impl Default for AttValue {
    #[inline]
    fn default() -> Self {
        Self::with_max()
    }
}

impl PartialEq for AttValue {
    fn eq(&self, rhs: &Self) -> bool {
        if std::ptr::eq(self, rhs) {
            return true;
        }
        *self.inner.lock().buf == *rhs.inner.lock().buf
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn length_invariant() {
        let v = AttValue::new(4);
        assert!(v.set_value(&[1, 2, 3, 4]));
        assert!(!v.set_value(&[1, 2, 3, 4, 5]));
        assert_eq!(v.value(), [1, 2, 3, 4]);
        assert!(!v.append(&[5]));
        assert_eq!(v.len(), 4);
    }

    #[test]
    fn clamp_max_len() {
        let v = AttValue::new(MAX_VAL_LEN + 1);
        assert_eq!(v.max_len(), MAX_VAL_LEN);
    }

    #[test]
    fn atomic_rejection_keeps_old_value() {
        let v = AttValue::new(8);
        assert!(v.set_value(b"old"));
        let t = v.timestamp();
        assert!(!v.set_value(b"way too long"));
        assert_eq!(v.value(), b"old");
        assert_eq!(v.timestamp(), t);
    }

    #[test]
    fn deep_copy_is_independent() {
        let a = AttValue::new(16);
        assert!(a.set_value(b"shared"));
        let b = a.clone();
        assert!(a.set_value(b"changed"));
        assert_eq!(b.value(), b"shared");
        assert_eq!(a, a.clone());
    }

    #[test]
    fn take_empties_source() {
        let v = AttValue::new(16);
        assert!(v.set_value(b"gone"));
        assert_eq!(v.take(), b"gone");
        assert!(v.is_empty());
        assert_eq!(v.timestamp(), None);
    }

    #[test]
    fn byte_at_sentinel() {
        let v = AttValue::new(16);
        assert!(v.set_value(&[0xAB]));
        assert_eq!(v.byte_at(0), 0xAB);
        assert_eq!(v.byte_at(1), 0);
    }

    #[test]
    fn append_accumulates() {
        let v = AttValue::new(8);
        assert!(v.append(&[1, 2]));
        assert!(v.append(&[3]));
        assert_eq!(v.value(), [1, 2, 3]);
    }
}
