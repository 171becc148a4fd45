use std::fmt::{Debug, Display, Formatter};
use std::num::NonZeroU16;

/// Attribute handle ([Vol 3] Part F, Section 3.2.2).
#[derive(
    Clone, Copy, Eq, Hash, Ord, PartialEq, PartialOrd, serde::Deserialize, serde::Serialize,
)]
#[repr(transparent)]
#[serde(transparent)]
pub struct Handle(NonZeroU16);

impl Handle {
    /// Smallest valid handle.
    pub const MIN: Self = match Self::new(0x0001) {
        Some(h) => h,
        None => unreachable!(),
    };

    /// Largest valid handle.
    pub const MAX: Self = match Self::new(0xFFFF) {
        Some(h) => h,
        None => unreachable!(),
    };

    /// Wraps a raw handle. Returns [`None`] if the handle is invalid.
    #[inline]
    #[must_use]
    pub const fn new(h: u16) -> Option<Self> {
        match NonZeroU16::new(h) {
            Some(nz) => Some(Self(nz)),
            None => None,
        }
    }

    /// Returns the next handle or [`None`] if the maximum handle was reached.
    #[inline]
    #[must_use]
    pub(crate) const fn next(self) -> Option<Self> {
        Self::new(self.0.get().wrapping_add(1))
    }

    /// Returns the preceding handle or [`None`] for the minimum handle.
    #[inline]
    #[must_use]
    pub(crate) const fn prev(self) -> Option<Self> {
        Self::new(self.0.get().wrapping_sub(1))
    }
}

impl Debug for Handle {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "Handle({:#06X})", self.0.get())
    }
}

impl Display for Handle {
    #[inline]
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        Debug::fmt(self, f)
    }
}

impl From<Handle> for u16 {
    #[inline]
    fn from(h: Handle) -> Self {
        h.0.get()
    }
}

impl From<Handle> for usize {
    #[inline]
    fn from(h: Handle) -> Self {
        Self::from(h.0.get())
    }
}

/// Inclusive range of attribute handles. This is a `Copy` version of
/// `RangeInclusive<Handle>`.
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
#[must_use]
pub struct HandleRange {
    start: Handle,
    end: Handle,
}

impl HandleRange {
    /// Handle range covering all possible handles.
    pub const ALL: Self = Self {
        start: Handle::MIN,
        end: Handle::MAX,
    };

    /// Creates a new handle range `start..=end`.
    ///
    /// # Panics
    ///
    /// Panics if `start > end`.
    #[inline]
    pub const fn new(start: Handle, end: Handle) -> Self {
        assert!(start.0.get() <= end.0.get());
        Self { start, end }
    }

    /// Returns the starting handle.
    #[inline(always)]
    #[must_use]
    pub const fn start(self) -> Handle {
        self.start
    }

    /// Returns the ending handle.
    #[inline(always)]
    #[must_use]
    pub const fn end(self) -> Handle {
        self.end
    }

    /// Returns whether `hdl` lies within the range.
    #[inline]
    #[must_use]
    pub const fn contains(self, hdl: Handle) -> bool {
        self.start.0.get() <= hdl.0.get() && hdl.0.get() <= self.end.0.get()
    }
}

impl Default for HandleRange {
    /// Returns a handle range covering all possible handles.
    #[inline(always)]
    fn default() -> Self {
        Self::ALL
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn handle_bounds() {
        assert_eq!(Handle::new(0), None);
        assert_eq!(Handle::MAX.next(), None);
        assert_eq!(Handle::MIN.prev(), None);
        assert_eq!(Handle::MIN.next(), Handle::new(2));
        assert_eq!(std::mem::size_of::<Option<Handle>>(), 2);
    }

    #[test]
    fn range_contains() {
        let r = HandleRange::new(Handle::new(5).unwrap(), Handle::new(9).unwrap());
        assert!(r.contains(Handle::new(5).unwrap()));
        assert!(r.contains(Handle::new(9).unwrap()));
        assert!(!r.contains(Handle::new(4).unwrap()));
        assert!(!r.contains(Handle::new(10).unwrap()));
    }
}
