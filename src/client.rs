//! GATT client ([Vol 3] Part G, Section 4).
//!
//! A [`Client`] owns one connection to a peer and a cache of the services,
//! characteristics, and descriptors discovered on it. Blocking operations
//! submit work to the host stack and park the calling thread on a
//! single-use rendezvous that the host event thread releases.

use std::fmt::Debug;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use smallvec::SmallVec;
use tracing::{debug, warn};

use crate::att::{Error, Result};
use crate::gap::{Addr, Uuid};
use crate::host::{ConnHandle, ConnInfo, Discovered, GapEvent, ServiceInfo, Status, Transport};
use crate::util::{task_slot, TaskNotifier};
use crate::SyncMutex;

pub use {chr::*, desc::*, remote::*, service::*};

mod chr;
mod desc;
mod remote;
mod service;


/// ATT transaction timeout ([Vol 3] Part F, Section 3.3.3).
pub(crate) const ATT_TIMEOUT: Duration = Duration::from_secs(30);

/// Client configuration.
#[derive(Clone, Copy, Debug)]
pub struct Config {
    /// Time to wait for a connection attempt to complete.
    pub connect_timeout: Duration,
    /// Whether to negotiate the ATT bearer MTU right after connecting.
    pub exchange_mtu: bool,
}

impl Default for Config {
    #[inline]
    fn default() -> Self {
        Self {
            connect_timeout: Duration::from_secs(30),
            exchange_mtu: true,
        }
    }
}

/// Application hooks for connection lifecycle events, invoked on the host
/// event thread.
pub trait ClientCallbacks: Debug + Send + Sync {
    /// Called when the connection to the peer is established.
    fn on_connect(&self, _conn: ConnHandle) {}

    /// Called when a connection attempt fails before a link is established.
    fn on_connect_fail(&self, _status: Status) {}

    /// Called when the connection is terminated.
    fn on_disconnect(&self, _reason: Status) {}

    /// Called when the ATT bearer MTU changes.
    fn on_mtu_change(&self, _mtu: u16) {}

    /// Called when a pairing or encryption procedure completes.
    fn on_auth_complete(&self, _status: Status) {}
}

#[derive(Debug, Default)]
struct NoClientCallbacks;

impl ClientCallbacks for NoClientCallbacks {}

/// GATT client for one peer device.
#[derive(Clone, Debug)]
pub struct Client {
    inner: Arc<ClientInner>,
}

impl Client {
    /// Creates a new client for `peer`. No connection is attempted until
    /// [`Self::connect`] is called.
    #[must_use]
    pub fn new(transport: Arc<dyn Transport>, peer: Addr, config: Config) -> Self {
        Self {
            inner: Arc::new(ClientInner {
                peer,
                config,
                conn: Arc::new(Conn::new(transport)),
                services: SyncMutex::new(Vec::new()),
                all_retrieved: AtomicBool::new(false),
                cb: SyncMutex::new(Arc::new(NoClientCallbacks)),
                connect_slot: SyncMutex::new(None),
            }),
        }
    }

    /// Replaces the connection lifecycle callbacks.
    pub fn set_callbacks(&self, cb: Arc<dyn ClientCallbacks>) {
        *self.inner.cb.lock() = cb;
    }

    /// Returns the peer address.
    #[inline(always)]
    #[must_use]
    pub fn peer(&self) -> Addr {
        self.inner.peer
    }

    /// Returns whether the client is connected.
    #[inline]
    #[must_use]
    pub fn is_connected(&self) -> bool {
        self.inner.conn.handle().is_some()
    }

    /// Returns the current ATT bearer MTU, or 0 when disconnected.
    #[must_use]
    pub fn mtu(&self) -> u16 {
        (self.inner.conn.handle()).map_or(0, |h| self.inner.conn.transport().mtu(h))
    }

    /// Returns the connection parameters, or [`None`] when disconnected.
    #[must_use]
    pub fn conn_info(&self) -> Option<ConnInfo> {
        (self.inner.conn.handle()).and_then(|h| self.inner.conn.transport().conn_info(h))
    }

    /// Returns the status of the most recent failed operation.
    #[inline]
    #[must_use]
    pub fn last_error(&self) -> Status {
        self.inner.conn.last_error()
    }

    /// Connects to the peer, blocking until the link is established or the
    /// configured timeout expires. A timed-out attempt is cancelled.
    pub fn connect(&self) -> Result<()> {
        if self.is_connected() {
            return Ok(());
        }
        let (waiter, notifier) = task_slot();
        *self.inner.connect_slot.lock() = Some(notifier);
        let weak = Arc::downgrade(&self.inner);
        let sink = Box::new(move |ev| {
            if let Some(inner) = weak.upgrade() {
                inner.gap_event(ev);
            }
        });
        let timeout = self.inner.config.connect_timeout;
        (self.inner.conn.transport())
            .connect(self.inner.peer, timeout, sink)
            .map_err(|st| self.inner.conn.fail(st))?;
        // The extra second gives the host stack time to report its own
        // timeout before we cancel.
        match waiter.wait(timeout + Duration::from_secs(1)) {
            Some((st, ())) if st.is_ok() => {}
            Some((st, ())) => return Err(self.inner.conn.fail(st)),
            None => {
                // The connection may have landed between the timeout and
                // slot abandonment.
                if !self.is_connected() {
                    let _ = self.inner.conn.transport().cancel_connect();
                    return Err(self.inner.conn.fail(Status::Timeout));
                }
            }
        }
        if self.inner.config.exchange_mtu {
            if let Err(e) = self.exchange_mtu() {
                warn!("MTU exchange with {} failed: {e}", self.inner.peer);
            }
        }
        Ok(())
    }

    /// Cancels an in-progress connection attempt.
    pub fn cancel_connect(&self) -> Result<()> {
        (self.inner.conn.transport().cancel_connect()).map_err(|st| self.inner.conn.fail(st))
    }

    /// Terminates the connection. Cached services remain valid until the
    /// disconnection event arrives.
    pub fn disconnect(&self) -> Result<()> {
        let Some(h) = self.inner.conn.handle() else {
            return Ok(());
        };
        (self.inner.conn.transport().terminate(h)).map_err(|st| self.inner.conn.fail(st))
    }

    /// Initiates pairing or encryption with the peer and blocks until the
    /// procedure completes.
    pub fn secure_connection(&self) -> Result<()> {
        let h = self.inner.conn.handle().ok_or(Error::NotConnected)?;
        self.inner.conn.upgrade_security(h)
    }

    /// Discovers the peer's complete attribute table: every service, its
    /// characteristics, and their descriptors. Any failure clears the cache
    /// so it is never left partially populated.
    pub fn discover_attributes(&self) -> Result<()> {
        self.inner.clear_cache();
        let r = self.try_discover_attributes();
        if r.is_err() {
            self.inner.clear_cache();
        }
        r
    }

    fn try_discover_attributes(&self) -> Result<()> {
        for s in self.services(false)? {
            for c in s.characteristics()? {
                c.descriptors()?;
            }
        }
        Ok(())
    }

    fn exchange_mtu(&self) -> Result<()> {
        let h = self.inner.conn.handle().ok_or(Error::NotConnected)?;
        let (waiter, notifier) = task_slot();
        (self.inner.conn.transport())
            .exchange_mtu(h, Box::new(move |st| notifier.notify(st, ())))
            .map_err(Error::from)?;
        let (st, ()) = waiter.wait(ATT_TIMEOUT).ok_or(Error::Timeout)?;
        if st.is_ok() {
            Ok(())
        } else {
            Err(st.into())
        }
    }

    /// Returns the service with the specified UUID, or [`None`] if the peer
    /// does not have one.
    ///
    /// The cache is consulted first. On a miss, a filtered discovery is
    /// performed for the UUID as given, then for its alternate
    /// representation: 16- and 32-bit UUIDs are retried in 128-bit form,
    /// and 128-bit UUIDs built from the Bluetooth base are retried in
    /// 16-bit form. Some peers only match one width.
    pub fn service(&self, uuid: Uuid) -> Result<Option<Arc<RemoteService>>> {
        for cand in uuid_candidates(uuid) {
            if let Some(s) = self.inner.find_service(cand) {
                return Ok(Some(s));
            }
            self.inner.retrieve_services(Some(cand))?;
            if let Some(s) = self.inner.find_service(cand) {
                return Ok(Some(s));
            }
        }
        Ok(None)
    }

    /// Returns all services on the peer, discovering them if the cache is
    /// empty. `refresh` discards the cache and rediscovers.
    pub fn services(&self, refresh: bool) -> Result<Vec<Arc<RemoteService>>> {
        if refresh {
            self.inner.clear_cache();
        }
        if !self.inner.all_retrieved.load(Ordering::Acquire) {
            self.inner.retrieve_services(None)?;
            self.inner.all_retrieved.store(true, Ordering::Release);
        }
        Ok(self.inner.services.lock().clone())
    }

    /// Reads the value of the characteristic identified by service and
    /// characteristic UUID.
    pub fn read_value(&self, service: Uuid, characteristic: Uuid) -> Result<Vec<u8>> {
        match self.characteristic(service, characteristic)? {
            Some(c) => c.read_value(),
            None => Err(Error::Att(crate::att::ErrorCode::AttributeNotFound)),
        }
    }

    /// Writes the value of the characteristic identified by service and
    /// characteristic UUID, waiting for the peer's response.
    pub fn write_value(
        &self,
        service: Uuid,
        characteristic: Uuid,
        v: &[u8],
    ) -> Result<WriteOutcome> {
        match self.characteristic(service, characteristic)? {
            Some(c) => c.write_value(v, true),
            None => Err(Error::Att(crate::att::ErrorCode::AttributeNotFound)),
        }
    }

    fn characteristic(
        &self,
        service: Uuid,
        characteristic: Uuid,
    ) -> Result<Option<Arc<RemoteCharacteristic>>> {
        match self.service(service)? {
            Some(s) => s.characteristic(characteristic),
            None => Ok(None),
        }
    }
}

#[derive(Debug)]
struct ClientInner {
    peer: Addr,
    config: Config,
    conn: Arc<Conn>,
    services: SyncMutex<Vec<Arc<RemoteService>>>,
    all_retrieved: AtomicBool,
    cb: SyncMutex<Arc<dyn ClientCallbacks>>,
    connect_slot: SyncMutex<Option<TaskNotifier<()>>>,
}

impl ClientInner {
    /// Handles a GAP event on the host event thread.
    fn gap_event(&self, ev: GapEvent) {
        match ev {
            GapEvent::Connected { conn } => {
                debug!("Connected to {} ({conn})", self.peer);
                self.conn.set_handle(conn);
                if let Some(n) = self.connect_slot.lock().take() {
                    n.notify(Status::Ok, ());
                }
                self.cb.lock().on_connect(conn);
            }
            GapEvent::ConnectFailed { status } => {
                debug!("Connection to {} failed: {status:?}", self.peer);
                if let Some(n) = self.connect_slot.lock().take() {
                    n.notify(status, ());
                }
                self.cb.lock().on_connect_fail(status);
            }
            GapEvent::Disconnected { conn, reason } => {
                debug!("Disconnected from {} ({conn}): {reason:?}", self.peer);
                self.conn.clear_handle();
                self.clear_cache();
                self.cb.lock().on_disconnect(reason);
            }
            GapEvent::NotifyRx {
                handle,
                value,
                indicate,
                ..
            } => {
                let services = self.services.lock().clone();
                for s in services {
                    if !s.range().contains(handle) {
                        continue;
                    }
                    if let Some(c) = s.characteristic_by_handle(handle) {
                        c.handle_notify(&value, indicate);
                    }
                    break;
                }
            }
            GapEvent::MtuChanged { conn, mtu } => {
                debug!("{conn} MTU is now {mtu}");
                self.cb.lock().on_mtu_change(mtu);
            }
            GapEvent::EncChange { status, .. } => {
                self.conn.security_done(status);
                self.cb.lock().on_auth_complete(status);
            }
        }
    }

    fn find_service(&self, uuid: Uuid) -> Option<Arc<RemoteService>> {
        (self.services.lock().iter()).find(|s| s.uuid() == uuid).map(Arc::clone)
    }

    /// Performs service discovery, optionally filtered by UUID, and merges
    /// the results into the cache. A failed discovery leaves the cache
    /// unchanged.
    fn retrieve_services(&self, uuid: Option<Uuid>) -> Result<()> {
        let h = self.conn.handle().ok_or_else(|| self.conn.fail(Status::NotConnected))?;
        let _op = self.conn.begin_op();
        let (waiter, notifier) = task_slot();
        let mut notifier = Some(notifier);
        let mut found: Vec<ServiceInfo> = Vec::new();
        let sink = Box::new(move |d: Discovered<ServiceInfo>| match d {
            Discovered::Item(info) => found.push(info),
            Discovered::Complete(st) => {
                if let Some(n) = notifier.take() {
                    n.notify(st, std::mem::take(&mut found));
                }
            }
        });
        (self.conn.transport().discover_services(h, uuid, sink))
            .map_err(|st| self.conn.fail(st))?;
        let (st, found) = waiter.wait(ATT_TIMEOUT).ok_or_else(|| self.conn.fail(Status::Timeout))?;
        if !st.is_ok() {
            return Err(self.conn.fail(st));
        }
        let mut services = self.services.lock();
        for info in found {
            if services.iter().any(|s| s.decl() == info.start) {
                continue;
            }
            services.push(Arc::new(RemoteService::new(Arc::clone(&self.conn), info)));
        }
        Ok(())
    }

    fn clear_cache(&self) {
        self.all_retrieved.store(false, Ordering::Release);
        self.services.lock().clear();
    }
}

/// UUID search order for discovery: the UUID as given, then its alternate
/// width if one exists.
fn uuid_candidates(uuid: Uuid) -> SmallVec<[Uuid; 2]> {
    let mut v = SmallVec::new();
    v.push(uuid);
    match uuid {
        Uuid::U16(_) | Uuid::U32(_) => v.push(uuid.to_128()),
        Uuid::U128(_) => {
            if let Some(short) = uuid.to_16() {
                v.push(short);
            }
        }
    }
    v
}
