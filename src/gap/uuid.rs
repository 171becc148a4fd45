use std::fmt::{Debug, Display, Formatter};
use std::hash::{Hash, Hasher};

const SHIFT: u32 = u128::BITS - u32::BITS;
const BASE: u128 = 0x00000000_0000_1000_8000_00805F9B34FB;
const MASK_32: u128 = !((u32::MAX as u128) << SHIFT);

/// 16-, 32-, or 128-bit UUID ([Vol 3] Part B, Section 2.5.1).
///
/// The wire width is preserved because some peers only answer discovery
/// requests for the exact form they registered, even when two forms are
/// equivalent under the Bluetooth base UUID. Equality and hashing compare the
/// canonical 128-bit expansion, so a [`Uuid::U16`] and its promoted
/// [`Uuid::U128`] form are the same key in a cache lookup.
#[derive(Clone, Copy, Eq)]
pub enum Uuid {
    U16(u16),
    U32(u32),
    U128(u128),
}

impl Uuid {
    /// Returns the canonical 128-bit expansion
    /// (`xxxxxxxx-0000-1000-8000-00805F9B34FB` for short forms).
    #[inline]
    #[must_use]
    pub const fn as_u128(self) -> u128 {
        match self {
            Self::U16(v) => (v as u128) << SHIFT | BASE,
            Self::U32(v) => (v as u128) << SHIFT | BASE,
            Self::U128(v) => v,
        }
    }

    /// Returns the 128-bit form of the same UUID.
    #[inline]
    #[must_use]
    pub const fn to_128(self) -> Self {
        Self::U128(self.as_u128())
    }

    /// Returns the 16-bit form, or [`None`] if the UUID is not derived from
    /// the Bluetooth base UUID or does not fit in 16 bits.
    #[inline]
    #[must_use]
    pub fn to_16(self) -> Option<Self> {
        let v = self.as_u128();
        let short = (v >> SHIFT) as u32;
        ((v & MASK_32) == BASE && short != 0 && short <= u32::from(u16::MAX))
            .then_some(Self::U16(short as u16))
    }

    /// Returns the wire width in bits (16, 32, or 128).
    #[inline]
    #[must_use]
    pub const fn width(self) -> u32 {
        match self {
            Self::U16(_) => 16,
            Self::U32(_) => 32,
            Self::U128(_) => 128,
        }
    }

    /// Returns the canonical UUID as a little-endian byte array.
    #[inline]
    #[must_use]
    pub const fn to_bytes(self) -> [u8; 16] {
        self.as_u128().to_le_bytes()
    }
}

impl PartialEq for Uuid {
    #[inline]
    fn eq(&self, rhs: &Self) -> bool {
        self.as_u128() == rhs.as_u128()
    }
}

impl Hash for Uuid {
    #[inline]
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.as_u128().hash(state);
    }
}

impl From<u16> for Uuid {
    #[inline]
    fn from(v: u16) -> Self {
        Self::U16(v)
    }
}

impl From<u32> for Uuid {
    #[inline]
    fn from(v: u32) -> Self {
        Self::U32(v)
    }
}

impl From<u128> for Uuid {
    #[inline]
    fn from(v: u128) -> Self {
        Self::U128(v)
    }
}

impl TryFrom<&[u8]> for Uuid {
    type Error = ();

    /// Converts a little-endian 2-, 4-, or 16-byte representation.
    fn try_from(v: &[u8]) -> Result<Self, Self::Error> {
        match *v {
            [a, b] => Ok(Self::U16(u16::from_le_bytes([a, b]))),
            [a, b, c, d] => Ok(Self::U32(u32::from_le_bytes([a, b, c, d]))),
            _ => match <[u8; 16]>::try_from(v) {
                Ok(b) => Ok(Self::U128(u128::from_le_bytes(b))),
                Err(_) => Err(()),
            },
        }
    }
}

impl Debug for Uuid {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        #[allow(clippy::cast_possible_truncation)]
        match *self {
            Self::U16(v) => write!(f, "{v:#06X}"),
            Self::U32(v) => write!(f, "{v:#010X}"),
            Self::U128(v) => write!(
                f,
                "{:08X}-{:04X}-{:04X}-{:04X}-{:012X}",
                (v >> 96) as u32,
                (v >> 80) as u16,
                (v >> 64) as u16,
                (v >> 48) as u16,
                (v & ((1 << 48) - 1)) as u64
            ),
        }
    }
}

impl Display for Uuid {
    #[inline]
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        Debug::fmt(self, f)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn width_round_trip() {
        let short = Uuid::U16(0x180F);
        let long = short.to_128();
        assert_eq!(long.width(), 128);
        assert_eq!(short, long);
        assert_eq!(long.to_16(), Some(short));
    }

    #[test]
    fn vendor_uuid_does_not_demote() {
        let vendor = Uuid::U128(0x6E400001_B5A3_F393_E0A9_E50E24DCCA9E);
        assert_eq!(vendor.to_16(), None);
        assert_eq!(vendor.to_128(), vendor);
    }

    #[test]
    fn byte_parse() {
        assert_eq!(Uuid::try_from(&[0x0F, 0x18][..]), Ok(Uuid::U16(0x180F)));
        assert_eq!(
            Uuid::try_from(&[1, 2, 3, 4][..]),
            Ok(Uuid::U32(0x0403_0201))
        );
        assert_eq!(Uuid::try_from(&[0u8; 3][..]), Err(()));
        let b = Uuid::U16(0x2902).to_bytes();
        assert_eq!(Uuid::try_from(&b[..]), Ok(Uuid::U16(0x2902)));
    }
}
