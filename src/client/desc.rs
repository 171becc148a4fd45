use std::sync::Arc;

use crate::host::DescriptorInfo;

use super::{Conn, RemoteValue};

/// Descriptor discovered on the peer.
#[derive(Debug)]
pub struct RemoteDescriptor {
    val: RemoteValue,
}

impl RemoteDescriptor {
    pub(super) fn new(conn: Arc<Conn>, info: DescriptorInfo) -> Self {
        Self {
            val: RemoteValue::new(conn, info.uuid, info.handle),
        }
    }
}

impl std::ops::Deref for RemoteDescriptor {
    type Target = RemoteValue;

    #[inline(always)]
    fn deref(&self) -> &RemoteValue {
        &self.val
    }
}
