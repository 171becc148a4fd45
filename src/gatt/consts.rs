use crate::gap::Uuid;

/// Client Characteristic Configuration descriptor UUID
/// ([Vol 3] Part G, Section 3.3.3.3).
pub const CCCD_UUID: Uuid = Uuid::U16(0x2902);

bitflags::bitflags! {
    /// Characteristic properties ([Vol 3] Part G, Section 3.3.1.1).
    #[derive(Clone, Copy, Debug, Default, Eq, Hash, Ord, PartialEq, PartialOrd)]
    #[repr(transparent)]
    pub struct Prop: u8 {
        const BROADCAST = 1 << 0;
        const READ = 1 << 1;
        const WRITE_NO_RSP = 1 << 2;
        const WRITE = 1 << 3;
        const NOTIFY = 1 << 4;
        const INDICATE = 1 << 5;
        const SIGNED_WRITE = 1 << 6;
        const EXT_PROPS = 1 << 7;
    }
}

impl Prop {
    /// Returns whether the characteristic value can be read.
    #[inline]
    #[must_use]
    pub const fn can_read(self) -> bool {
        self.contains(Self::READ)
    }

    /// Returns whether the characteristic value can be written, with or
    /// without response.
    #[inline]
    #[must_use]
    pub const fn can_write(self) -> bool {
        self.intersects(Self::WRITE.union(Self::WRITE_NO_RSP))
    }
}

bitflags::bitflags! {
    /// Client Characteristic Configuration descriptor value
    /// ([Vol 3] Part G, Section 3.3.3.3).
    #[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
    #[repr(transparent)]
    pub struct Cccd: u16 {
        const NOTIFY = 1 << 0;
        const INDICATE = 1 << 1;
    }
}

impl From<Prop> for Cccd {
    /// Converts notify/indicate properties to the matching CCCD bits.
    fn from(p: Prop) -> Self {
        let mut cccd = Self::empty();
        cccd.set(Self::NOTIFY, p.contains(Prop::NOTIFY));
        cccd.set(Self::INDICATE, p.contains(Prop::INDICATE));
        cccd
    }
}
