// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 tapmesh.dev

//! Host/link registry: the shared topology the four workers operate on.
//!
//! Hosts live in an arena indexed directly by 16-bit node id, plus an
//! insertion-order list for snapshot iteration, so lookup is O(1) and
//! iteration is stable. One `parking_lot::RwLock` around the whole
//! registry (owned by the engine) serializes structural changes against
//! the data plane; the per-host mutable clusters that the data plane
//! writes *under the read lock* (active link vector, duplicate windows)
//! sit behind small per-host mutexes, and per-link liveness fields are
//! atomics.
//!
//! # Locking layers
//!
//! ```text
//! RwLock<HostRegistry>            structural: add/remove host, configure
//!   |                            link, timing/priority/policy writes,
//!   |                            active-vector rebuild (write lock)
//!   +- Host.active: Mutex        forwarder rotation vs. rebuild
//!   +- Host.rx: Mutex            receiver dedup vs. idle reset
//!   +- Link atomics              configured/connected/latency/timestamps
//! ```

/// Duplicate suppression windows.
pub mod dedup;

use crate::config::{
    DEFAULT_PING_INTERVAL_MS, DEFAULT_PONG_TIMEOUT_MS, DEFAULT_PRECISION, MAX_HOST, MAX_LINK,
};
use crate::error::{Error, Result};
use crate::liveness::LinkTiming;
use dedup::SeqWindow;
use mio::unix::SourceFd;
use mio::{Interest, Registry, Token};
use parking_lot::Mutex;
use socket2::{Domain, Protocol, Socket, Type};
use std::collections::HashMap;
use std::net::{SocketAddr, UdpSocket};
use std::os::unix::io::{AsRawFd, RawFd};
use std::sync::atomic::{AtomicBool, AtomicU16, AtomicU64, Ordering};

// =======================================================================
// Policy
// =======================================================================

/// Link-selection policy of a host.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LinkPolicy {
    /// Use only the highest-priority live link; fail over on loss.
    #[default]
    Passive,
    /// Rotate every frame across all live links.
    RoundRobin,
    /// Replicate every frame on all live links.
    Active,
}

// =======================================================================
// Link
// =======================================================================

/// Point-in-time view of a link, for introspection and tests.
#[derive(Debug, Clone)]
pub struct LinkStatus {
    /// Operator-controlled participation flag.
    pub configured: bool,
    /// Liveness-controlled up/down state.
    pub connected: bool,
    /// Local bound address of the link socket.
    pub local: SocketAddr,
    /// Remote peer address.
    pub remote: SocketAddr,
    /// Administrative priority (higher preferred under `Passive`).
    pub priority: u8,
    /// Smoothed round-trip latency estimate in microseconds.
    pub latency_us: u64,
    /// Microseconds between PING emissions.
    pub ping_interval_us: u64,
    /// Microseconds of PONG silence before the link is declared down.
    pub pong_timeout_us: u64,
    /// Monotonic microsecond stamp of the last PING sent (0 = never).
    pub ping_last_us: u64,
    /// Monotonic microsecond stamp of the last PONG seen (0 = never).
    pub pong_last_us: u64,
}

/// One UDP path to one host.
///
/// The socket is connected, non-blocking, and close-on-exec. Liveness
/// fields are atomics because the receiver and heartbeat workers update
/// them under the *read* lock; each field has a single writing worker and
/// every transition is followed by a notification to the link-handler,
/// which re-reads authoritative state under the write lock.
pub(crate) struct Link {
    link_id: u8,
    socket: UdpSocket,
    local: SocketAddr,
    remote: SocketAddr,
    priority: u8,
    timing: LinkTiming,
    configured: AtomicBool,
    connected: AtomicBool,
    latency_us: AtomicU64,
    ping_last_us: AtomicU64,
    pong_last_us: AtomicU64,
}

impl Link {
    fn new(link_id: u8, bind: SocketAddr, remote: SocketAddr) -> Result<Self> {
        // socket2 creates the fd with SOCK_CLOEXEC; connecting pins the
        // peer so the data plane can use plain send/recv.
        let socket = Socket::new(Domain::for_address(remote), Type::DGRAM, Some(Protocol::UDP))?;
        socket.set_nonblocking(true)?;
        socket.bind(&bind.into())?;
        socket.connect(&remote.into())?;
        let socket: UdpSocket = socket.into();
        let local = socket.local_addr()?;

        Ok(Self {
            link_id,
            socket,
            local,
            remote,
            priority: 0,
            timing: LinkTiming::new(
                DEFAULT_PING_INTERVAL_MS,
                DEFAULT_PONG_TIMEOUT_MS,
                DEFAULT_PRECISION,
            ),
            configured: AtomicBool::new(false),
            connected: AtomicBool::new(false),
            latency_us: AtomicU64::new(0),
            ping_last_us: AtomicU64::new(0),
            pong_last_us: AtomicU64::new(0),
        })
    }

    pub(crate) fn link_id(&self) -> u8 {
        self.link_id
    }

    pub(crate) fn raw_fd(&self) -> RawFd {
        self.socket.as_raw_fd()
    }

    pub(crate) fn priority(&self) -> u8 {
        self.priority
    }

    pub(crate) fn timing(&self) -> LinkTiming {
        self.timing
    }

    /// Send one datagram to the pinned peer. Non-blocking.
    pub(crate) fn send(&self, buf: &[u8]) -> std::io::Result<usize> {
        self.socket.send(buf)
    }

    /// Receive one datagram from the pinned peer. Non-blocking.
    pub(crate) fn recv(&self, buf: &mut [u8]) -> std::io::Result<usize> {
        self.socket.recv(buf)
    }

    pub(crate) fn is_configured(&self) -> bool {
        self.configured.load(Ordering::Relaxed)
    }

    pub(crate) fn set_configured(&self, configured: bool) {
        self.configured.store(configured, Ordering::Relaxed);
    }

    pub(crate) fn is_connected(&self) -> bool {
        self.connected.load(Ordering::Relaxed)
    }

    pub(crate) fn set_connected(&self, connected: bool) {
        self.connected.store(connected, Ordering::Relaxed);
    }

    pub(crate) fn latency_us(&self) -> u64 {
        self.latency_us.load(Ordering::Relaxed)
    }

    pub(crate) fn set_latency_us(&self, latency: u64) {
        self.latency_us.store(latency, Ordering::Relaxed);
    }

    pub(crate) fn ping_last_us(&self) -> u64 {
        self.ping_last_us.load(Ordering::Relaxed)
    }

    pub(crate) fn set_ping_last_us(&self, micros: u64) {
        self.ping_last_us.store(micros, Ordering::Relaxed);
    }

    pub(crate) fn pong_last_us(&self) -> u64 {
        self.pong_last_us.load(Ordering::Relaxed)
    }

    pub(crate) fn set_pong_last_us(&self, micros: u64) {
        self.pong_last_us.store(micros, Ordering::Relaxed);
    }

    fn status(&self) -> LinkStatus {
        LinkStatus {
            configured: self.is_configured(),
            connected: self.is_connected(),
            local: self.local,
            remote: self.remote,
            priority: self.priority,
            latency_us: self.latency_us(),
            ping_interval_us: self.timing.ping_interval_us,
            pong_timeout_us: self.timing.pong_timeout_us,
            ping_last_us: self.ping_last_us(),
            pong_last_us: self.pong_last_us(),
        }
    }
}

// =======================================================================
// Host
// =======================================================================

/// Active link vector: the ordered prefix of link indices eligible for
/// sending right now.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub(crate) struct ActiveLinks {
    pub entries: u8,
    pub order: [u8; MAX_LINK],
}

impl ActiveLinks {
    /// Rotate the active prefix left by one, moving the just-used link to
    /// the tail. Slots beyond `entries` are never touched.
    pub(crate) fn rotate(&mut self) {
        let n = usize::from(self.entries);
        if n > 1 {
            let first = self.order[0];
            self.order.copy_within(1..n, 0);
            self.order[n - 1] = first;
        }
    }

    pub(crate) fn as_slice(&self) -> &[u8] {
        &self.order[..usize::from(self.entries)]
    }
}

/// Receive-side duplicate suppression state, one window per stream.
pub(crate) struct RxWindows {
    pub ucast: SeqWindow,
    pub bcast: SeqWindow,
}

impl RxWindows {
    fn new() -> Self {
        Self {
            ucast: SeqWindow::new(),
            bcast: SeqWindow::new(),
        }
    }

    pub(crate) fn window(&mut self, bcast: bool) -> &mut SeqWindow {
        if bcast {
            &mut self.bcast
        } else {
            &mut self.ucast
        }
    }
}

/// One peer node and its links.
pub(crate) struct Host {
    node_id: u16,
    name: String,
    policy: LinkPolicy,
    links: [Option<Link>; MAX_LINK],
    ucast_seq_tx: AtomicU16,
    active: Mutex<ActiveLinks>,
    rx: Mutex<RxWindows>,
}

impl Host {
    fn new(node_id: u16, name: String) -> Self {
        Self {
            node_id,
            name,
            policy: LinkPolicy::default(),
            links: Default::default(),
            ucast_seq_tx: AtomicU16::new(0),
            active: Mutex::new(ActiveLinks::default()),
            rx: Mutex::new(RxWindows::new()),
        }
    }

    pub(crate) fn node_id(&self) -> u16 {
        self.node_id
    }

    pub(crate) fn name(&self) -> &str {
        &self.name
    }

    pub(crate) fn policy(&self) -> LinkPolicy {
        self.policy
    }

    pub(crate) fn link(&self, link_id: u8) -> Option<&Link> {
        self.links.get(usize::from(link_id)).and_then(Option::as_ref)
    }

    pub(crate) fn links(&self) -> impl Iterator<Item = &Link> {
        self.links.iter().flatten()
    }

    /// Next unicast TX sequence number (pre-increment semantics: the
    /// first frame carries 1).
    pub(crate) fn next_ucast_seq(&self) -> u16 {
        self.ucast_seq_tx.fetch_add(1, Ordering::Relaxed).wrapping_add(1)
    }

    pub(crate) fn active(&self) -> &Mutex<ActiveLinks> {
        &self.active
    }

    pub(crate) fn rx(&self) -> &Mutex<RxWindows> {
        &self.rx
    }

    /// Rebuild the active link vector from scratch out of the links that
    /// are configured and connected.
    ///
    /// `Passive` keeps only the highest-priority eligible link (zero
    /// entries when none is eligible); `RoundRobin` and `Active` keep
    /// every eligible index in ascending order. When the vector comes out
    /// empty, both duplicate windows are zeroed so stale in-flight state
    /// cannot shadow frames after a later reconnect.
    pub(crate) fn recompute_active(&self) {
        let mut fresh = ActiveLinks::default();
        let mut best_priority: i32 = -1;

        for (idx, slot) in self.links.iter().enumerate() {
            let Some(link) = slot else { continue };
            if !link.is_configured() || !link.is_connected() {
                continue;
            }
            match self.policy {
                LinkPolicy::Passive => {
                    if i32::from(link.priority()) > best_priority {
                        fresh.order[0] = idx as u8;
                        best_priority = i32::from(link.priority());
                        fresh.entries = 1;
                    }
                }
                LinkPolicy::RoundRobin | LinkPolicy::Active => {
                    fresh.order[usize::from(fresh.entries)] = idx as u8;
                    fresh.entries += 1;
                }
            }
        }

        let went_idle = fresh.entries == 0;
        *self.active.lock() = fresh;

        if went_idle {
            let mut rx = self.rx.lock();
            rx.ucast.reset();
            rx.bcast.reset();
        }
    }
}

// =======================================================================
// Registry
// =======================================================================

/// The host arena plus the fd dispatch index for the receiver poller.
pub(crate) struct HostRegistry {
    /// Arena indexed by node id; `index[id]` is `None` or a host whose
    /// `node_id` equals `id`.
    index: Vec<Option<Box<Host>>>,
    /// Node ids in insertion order, for snapshot iteration.
    order: Vec<u16>,
    /// Raw fd -> (node id, link id) for receiver event dispatch.
    fd_index: HashMap<RawFd, (u16, u8)>,
    /// Handle onto the receiver poller; link sockets are (de)registered
    /// here as they are configured and removed.
    poller: Registry,
}

impl HostRegistry {
    pub(crate) fn new(poller: Registry) -> Self {
        Self {
            index: (0..MAX_HOST).map(|_| None).collect(),
            order: Vec::new(),
            fd_index: HashMap::new(),
            poller,
        }
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.order.is_empty()
    }

    pub(crate) fn add_host(&mut self, node_id: u16, name: &str) -> Result<()> {
        if self.index[usize::from(node_id)].is_some() {
            return Err(Error::InvalidState("host already registered"));
        }
        self.index[usize::from(node_id)] = Some(Box::new(Host::new(node_id, name.to_owned())));
        self.order.push(node_id);
        log::debug!("[registry] host added id={} name={}", node_id, name);
        Ok(())
    }

    /// Remove a host. Refused while any of its links is still configured;
    /// unconfigured link sockets are deregistered and closed here.
    pub(crate) fn remove_host(&mut self, node_id: u16) -> Result<()> {
        let host = self.index[usize::from(node_id)]
            .as_ref()
            .ok_or(Error::UnknownHost(node_id))?;
        if host.links().any(Link::is_configured) {
            return Err(Error::Busy);
        }
        for link in host.links() {
            self.fd_index.remove(&link.raw_fd());
            let _ = self.poller.deregister(&mut SourceFd(&link.raw_fd()));
        }
        self.index[usize::from(node_id)] = None;
        self.order.retain(|id| *id != node_id);
        log::debug!("[registry] host removed id={}", node_id);
        Ok(())
    }

    pub(crate) fn host(&self, node_id: u16) -> Option<&Host> {
        self.index[usize::from(node_id)].as_deref()
    }

    fn host_mut(&mut self, node_id: u16) -> Option<&mut Host> {
        self.index[usize::from(node_id)].as_deref_mut()
    }

    /// Snapshot iteration in insertion order.
    pub(crate) fn iter(&self) -> impl Iterator<Item = &Host> {
        self.order
            .iter()
            .filter_map(move |id| self.index[usize::from(*id)].as_deref())
    }

    pub(crate) fn host_ids(&self) -> Vec<u16> {
        self.order.clone()
    }

    pub(crate) fn set_policy(&mut self, node_id: u16, policy: LinkPolicy) -> Result<()> {
        let host = self.host_mut(node_id).ok_or(Error::UnknownHost(node_id))?;
        host.policy = policy;
        // the vector shape depends on the policy, so rebuild immediately
        host.recompute_active();
        Ok(())
    }

    /// Create a link socket (bind + connect) and wire it into the
    /// receiver poller. The new link starts unconfigured and down.
    pub(crate) fn configure_link(
        &mut self,
        node_id: u16,
        link_id: u8,
        bind: SocketAddr,
        remote: SocketAddr,
    ) -> Result<()> {
        if usize::from(link_id) >= MAX_LINK {
            return Err(Error::InvalidLink(link_id));
        }
        if self.host(node_id).is_none() {
            return Err(Error::UnknownHost(node_id));
        }

        let link = Link::new(link_id, bind, remote)?;
        let fd = link.raw_fd();
        self.poller
            .register(&mut SourceFd(&fd), Token(fd as usize), Interest::READABLE)?;

        // direct arena access keeps the host borrow disjoint from the
        // poller and fd_index fields used below
        let host = self.index[usize::from(node_id)]
            .as_deref_mut()
            .ok_or(Error::UnknownHost(node_id))?;
        let slot = &mut host.links[usize::from(link_id)];
        if let Some(old) = slot.take() {
            if old.is_configured() {
                *slot = Some(old);
                // roll back the registration of the replacement socket
                let _ = self.poller.deregister(&mut SourceFd(&fd));
                return Err(Error::Busy);
            }
            self.fd_index.remove(&old.raw_fd());
            let _ = self.poller.deregister(&mut SourceFd(&old.raw_fd()));
        }
        *slot = Some(link);
        self.fd_index.insert(fd, (node_id, link_id));
        log::debug!(
            "[registry] link configured host={} link={} remote={}",
            node_id,
            link_id,
            remote
        );
        Ok(())
    }

    pub(crate) fn set_link_timeouts(
        &mut self,
        node_id: u16,
        link_id: u8,
        interval_ms: u64,
        timeout_ms: u64,
        precision: u64,
    ) -> Result<()> {
        if precision == 0 {
            return Err(Error::InvalidConfig("precision must be > 0"));
        }
        if interval_ms == 0 || timeout_ms == 0 {
            return Err(Error::InvalidConfig("interval and timeout must be > 0"));
        }
        let link = self.link_mut(node_id, link_id)?;
        link.timing = LinkTiming::new(interval_ms, timeout_ms, precision);
        Ok(())
    }

    pub(crate) fn set_link_priority(
        &mut self,
        node_id: u16,
        link_id: u8,
        priority: u8,
    ) -> Result<()> {
        self.link_mut(node_id, link_id)?.priority = priority;
        let host = self.host(node_id).ok_or(Error::UnknownHost(node_id))?;
        // a priority change can re-rank the passive selection
        host.recompute_active();
        Ok(())
    }

    pub(crate) fn link_status(&self, node_id: u16, link_id: u8) -> Result<LinkStatus> {
        let host = self.host(node_id).ok_or(Error::UnknownHost(node_id))?;
        host.link(link_id)
            .map(Link::status)
            .ok_or(Error::InvalidLink(link_id))
    }

    pub(crate) fn fd_lookup(&self, fd: RawFd) -> Option<(u16, u8)> {
        self.fd_index.get(&fd).copied()
    }

    fn link_mut(&mut self, node_id: u16, link_id: u8) -> Result<&mut Link> {
        let host = self.host_mut(node_id).ok_or(Error::UnknownHost(node_id))?;
        host.links
            .get_mut(usize::from(link_id))
            .and_then(Option::as_mut)
            .ok_or(Error::InvalidLink(link_id))
    }
}
