use std::sync::Arc;

use crate::att::{Handle, HandleRange, Result};
use crate::gap::Uuid;
use crate::host::{CharacteristicInfo, Discovered, ServiceInfo, Status};
use crate::util::task_slot;
use crate::SyncMutex;

use super::{uuid_candidates, Conn, RemoteCharacteristic, ATT_TIMEOUT};

/// Service discovered on the peer.
#[derive(Debug)]
pub struct RemoteService {
    uuid: Uuid,
    start: Handle,
    end: Handle,
    conn: Arc<Conn>,
    chars: SyncMutex<Vec<Arc<RemoteCharacteristic>>>,
    retrieved: SyncMutex<bool>,
}

impl RemoteService {
    pub(super) fn new(conn: Arc<Conn>, info: ServiceInfo) -> Self {
        Self {
            uuid: info.uuid,
            start: info.start,
            end: info.end,
            conn,
            chars: SyncMutex::new(Vec::new()),
            retrieved: SyncMutex::new(false),
        }
    }

    /// Returns the service UUID.
    #[inline(always)]
    #[must_use]
    pub const fn uuid(&self) -> Uuid {
        self.uuid
    }

    /// Returns the service declaration handle.
    #[inline(always)]
    #[must_use]
    pub const fn decl(&self) -> Handle {
        self.start
    }

    /// Returns the handle range of the service definition.
    #[inline]
    #[must_use]
    pub fn range(&self) -> HandleRange {
        HandleRange::new(self.start, self.end)
    }

    /// Returns the characteristic with the specified UUID, or [`None`] if
    /// the service does not have one. Uses the same cache-then-discover
    /// width fallback as [`super::Client::service`].
    pub fn characteristic(&self, uuid: Uuid) -> Result<Option<Arc<RemoteCharacteristic>>> {
        for cand in uuid_candidates(uuid) {
            if let Some(c) = self.find_characteristic(cand) {
                return Ok(Some(c));
            }
            self.retrieve_characteristics(Some(cand))?;
            if let Some(c) = self.find_characteristic(cand) {
                return Ok(Some(c));
            }
        }
        Ok(None)
    }

    /// Returns all characteristics of the service, discovering them if the
    /// cache is incomplete.
    pub fn characteristics(&self) -> Result<Vec<Arc<RemoteCharacteristic>>> {
        if !*self.retrieved.lock() {
            self.retrieve_characteristics(None)?;
            *self.retrieved.lock() = true;
        }
        Ok(self.chars.lock().clone())
    }

    pub(super) fn characteristic_by_handle(&self, hdl: Handle) -> Option<Arc<RemoteCharacteristic>> {
        (self.chars.lock().iter()).find(|c| c.handle() == hdl).map(Arc::clone)
    }

    fn find_characteristic(&self, uuid: Uuid) -> Option<Arc<RemoteCharacteristic>> {
        (self.chars.lock().iter()).find(|c| c.uuid() == uuid).map(Arc::clone)
    }

    /// Performs characteristic discovery over the service range and merges
    /// the results into the cache. Each characteristic's end handle is the
    /// handle before the next declaration, or the service end for the last
    /// one.
    fn retrieve_characteristics(&self, uuid: Option<Uuid>) -> Result<()> {
        let h = (self.conn.handle()).ok_or_else(|| self.conn.fail(Status::NotConnected))?;
        let _op = self.conn.begin_op();
        let (waiter, notifier) = task_slot();
        let mut notifier = Some(notifier);
        let mut found: Vec<CharacteristicInfo> = Vec::new();
        let sink = Box::new(move |d: Discovered<CharacteristicInfo>| match d {
            Discovered::Item(info) => found.push(info),
            Discovered::Complete(st) => {
                if let Some(n) = notifier.take() {
                    n.notify(st, std::mem::take(&mut found));
                }
            }
        });
        (self.conn.transport().discover_characteristics(h, self.range(), uuid, sink))
            .map_err(|st| self.conn.fail(st))?;
        let (st, mut found) =
            waiter.wait(ATT_TIMEOUT).ok_or_else(|| self.conn.fail(Status::Timeout))?;
        if !st.is_ok() {
            return Err(self.conn.fail(st));
        }
        found.sort_unstable_by_key(|c| c.decl);
        let mut chars = self.chars.lock();
        for (i, info) in found.iter().enumerate() {
            if chars.iter().any(|c| c.handle() == info.value) {
                continue;
            }
            let end = match found.get(i + 1).and_then(|next| next.decl.prev()) {
                Some(end) => end,
                None => self.end,
            };
            chars.push(Arc::new(RemoteCharacteristic::new(
                Arc::clone(&self.conn),
                *info,
                end.max(info.value),
            )));
        }
        Ok(())
    }
}
