// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 tapmesh.dev

//! Process-wide runtime context and worker lifecycle.
//!
//! [`Handle::new`] wires the pollers, the notification channel, and the
//! scratch buffers, then starts the four workers in order: link-handler,
//! tap-to-links, recv-from-links, heartbeat. A failure while starting
//! unwinds everything already acquired in reverse. [`Handle::free`]
//! refuses while hosts remain and otherwise stops and joins the workers
//! in reverse start order.

use crate::config::{HandleConfig, NOTIFY_CHANNEL_CAPACITY};
use crate::crypto::CryptoTransform;
use crate::engine::fd;
use crate::engine::heartbeat::HeartbeatWorker;
use crate::engine::link_handler::LinkHandlerWorker;
use crate::engine::link_rx::LinkRxWorker;
use crate::engine::metrics::{EngineMetrics, MetricsSnapshot};
use crate::engine::notify::Notifier;
use crate::engine::tap_tx::TapTxWorker;
use crate::error::{Error, Result};
use crate::filter::DstFilter;
use crate::registry::{HostRegistry, LinkPolicy, LinkStatus};
use crossbeam::channel;
use mio::unix::SourceFd;
use mio::{Interest, Poll, Token};
use parking_lot::RwLock;
use std::net::SocketAddr;
use std::os::unix::io::RawFd;
use std::sync::atomic::{AtomicBool, AtomicU16, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};

/// State shared by the four workers and the operator API.
pub(crate) struct Shared {
    pub(crate) node_id: u16,
    pub(crate) tap_fd: RawFd,
    /// Gates data forwarding in both directions.
    pub(crate) enabled: AtomicBool,
    /// Cleared once to stop the workers.
    pub(crate) running: AtomicBool,
    pub(crate) registry: RwLock<HostRegistry>,
    /// Optional symmetric transform, a single shared `Arc` swapped under
    /// its own lock while forwarding is disabled.
    pub(crate) crypto: RwLock<Option<Arc<dyn CryptoTransform>>>,
    /// Optional destination filter, fixed at handle creation.
    pub(crate) filter: Option<Arc<dyn DstFilter>>,
    /// Broadcast TX sequence counter (pre-increment semantics).
    pub(crate) bcast_seq_tx: AtomicU16,
    pub(crate) metrics: EngineMetrics,
    pub(crate) notifier: Notifier,
}

impl Shared {
    #[inline]
    pub(crate) fn is_running(&self) -> bool {
        self.running.load(Ordering::Relaxed)
    }

    #[inline]
    pub(crate) fn is_enabled(&self) -> bool {
        self.enabled.load(Ordering::Relaxed)
    }

    pub(crate) fn next_bcast_seq(&self) -> u16 {
        self.bcast_seq_tx
            .fetch_add(1, Ordering::Relaxed)
            .wrapping_add(1)
    }
}

/// The engine instance: four worker threads around a shared registry.
///
/// Dropping a handle stops the workers unconditionally; [`Handle::free`]
/// is the checked variant that refuses while hosts are registered.
pub struct Handle {
    shared: Arc<Shared>,
    /// Join handles in start order; joined in reverse.
    workers: Vec<(&'static str, JoinHandle<()>)>,
    freed: bool,
}

impl Handle {
    /// Validate the config, build the runtime context, and start the
    /// worker threads.
    pub fn new(cfg: HandleConfig) -> Result<Self> {
        if cfg.tap_fd <= 0 {
            return Err(Error::InvalidConfig("tap fd must be > 0"));
        }
        fd::set_nonblocking(cfg.tap_fd)?;

        let tap_poll = Poll::new()?;
        tap_poll.registry().register(
            &mut SourceFd(&cfg.tap_fd),
            Token(cfg.tap_fd as usize),
            Interest::READABLE,
        )?;
        let rx_poll = Poll::new()?;
        let rx_registry = rx_poll.registry().try_clone()?;

        let (notify_tx, notify_rx) = channel::bounded(NOTIFY_CHANNEL_CAPACITY);

        let shared = Arc::new(Shared {
            node_id: cfg.node_id,
            tap_fd: cfg.tap_fd,
            enabled: AtomicBool::new(false),
            running: AtomicBool::new(true),
            registry: RwLock::new(HostRegistry::new(rx_registry)),
            crypto: RwLock::new(None),
            filter: cfg.dst_filter,
            bcast_seq_tx: AtomicU16::new(0),
            metrics: EngineMetrics::new(),
            notifier: Notifier::new(notify_tx),
        });

        // workers own their scratch buffers; everything is allocated here,
        // before the first frame moves
        let link_handler = LinkHandlerWorker::new(Arc::clone(&shared), notify_rx);
        let tap_tx = TapTxWorker::new(Arc::clone(&shared), tap_poll);
        let link_rx = LinkRxWorker::new(Arc::clone(&shared), rx_poll);
        let heartbeat = HeartbeatWorker::new(Arc::clone(&shared));

        let mut workers: Vec<(&'static str, JoinHandle<()>)> = Vec::with_capacity(4);
        let spawned = (|| -> Result<()> {
            workers.push((
                "linkhdl",
                thread::Builder::new()
                    .name("tapmesh-linkhdl".to_string())
                    .spawn(move || link_handler.run())?,
            ));
            workers.push((
                "taptx",
                thread::Builder::new()
                    .name("tapmesh-taptx".to_string())
                    .spawn(move || tap_tx.run())?,
            ));
            workers.push((
                "rx",
                thread::Builder::new()
                    .name("tapmesh-rx".to_string())
                    .spawn(move || link_rx.run())?,
            ));
            workers.push((
                "hb",
                thread::Builder::new()
                    .name("tapmesh-hb".to_string())
                    .spawn(move || heartbeat.run())?,
            ));
            Ok(())
        })();

        if let Err(err) = spawned {
            // unwind the partially started set in reverse order
            shared.running.store(false, Ordering::Relaxed);
            while let Some((_, handle)) = workers.pop() {
                let _ = handle.join();
            }
            return Err(err);
        }

        log::debug!("[handle] engine started node_id={}", cfg.node_id);
        Ok(Self {
            shared,
            workers,
            freed: false,
        })
    }

    /// Tear the engine down.
    ///
    /// Refuses with [`Error::Busy`] while hosts remain registered; a
    /// handle freed this way releases every worker, poller, and buffer.
    /// Idempotent after the first success.
    pub fn free(&mut self) -> Result<()> {
        if self.freed {
            return Ok(());
        }
        if !self.shared.registry.read().is_empty() {
            return Err(Error::Busy);
        }
        self.stop_workers();
        self.freed = true;
        log::debug!("[handle] engine stopped node_id={}", self.shared.node_id);
        Ok(())
    }

    fn stop_workers(&mut self) {
        self.shared.running.store(false, Ordering::Relaxed);
        while let Some((name, handle)) = self.workers.pop() {
            if handle.join().is_err() {
                log::warn!("[handle] worker {} panicked during shutdown", name);
            }
        }
    }

    /// Local node id.
    #[must_use]
    pub fn node_id(&self) -> u16 {
        self.shared.node_id
    }

    /// Gate data forwarding (both directions). Off at creation.
    pub fn set_forwarding(&self, enabled: bool) {
        self.shared.enabled.store(enabled, Ordering::Relaxed);
        log::debug!("[handle] forwarding enabled={}", enabled);
    }

    /// Install or remove the cryptographic transform.
    ///
    /// Refused while forwarding is enabled: frames in flight must never
    /// straddle a transform change.
    pub fn set_crypto(&self, crypto: Option<Arc<dyn CryptoTransform>>) -> Result<()> {
        if self.shared.is_enabled() {
            return Err(Error::InvalidState(
                "disable forwarding before changing the crypto transform",
            ));
        }
        *self.shared.crypto.write() = crypto;
        Ok(())
    }

    /// Engine counters.
    #[must_use]
    pub fn metrics(&self) -> MetricsSnapshot {
        self.shared.metrics.snapshot()
    }

    // ===== Host/link registry operations =====

    /// Register a peer host.
    pub fn add_host(&self, node_id: u16, name: &str) -> Result<()> {
        self.shared.registry.write().add_host(node_id, name)
    }

    /// Remove a peer host. Refused while any of its links is enabled.
    pub fn remove_host(&self, node_id: u16) -> Result<()> {
        self.shared.registry.write().remove_host(node_id)
    }

    /// Node ids of all registered hosts, in insertion order.
    #[must_use]
    pub fn host_ids(&self) -> Vec<u16> {
        self.shared.registry.read().host_ids()
    }

    /// Human-readable name of a host.
    pub fn host_name(&self, node_id: u16) -> Result<String> {
        self.shared
            .registry
            .read()
            .host(node_id)
            .map(|host| host.name().to_owned())
            .ok_or(Error::UnknownHost(node_id))
    }

    /// Set a host's link-selection policy.
    pub fn set_policy(&self, node_id: u16, policy: LinkPolicy) -> Result<()> {
        self.shared.registry.write().set_policy(node_id, policy)
    }

    /// Create a link: bind a local UDP socket, pin the peer address, and
    /// wire the socket into the receiver poller. The link starts
    /// disabled and down.
    pub fn configure_link(
        &self,
        node_id: u16,
        link_id: u8,
        bind: SocketAddr,
        remote: SocketAddr,
    ) -> Result<()> {
        self.shared
            .registry
            .write()
            .configure_link(node_id, link_id, bind, remote)
    }

    /// Set a link's ping interval, pong timeout, and EWMA precision.
    pub fn set_link_timeouts(
        &self,
        node_id: u16,
        link_id: u8,
        interval_ms: u64,
        timeout_ms: u64,
        precision: u64,
    ) -> Result<()> {
        self.shared
            .registry
            .write()
            .set_link_timeouts(node_id, link_id, interval_ms, timeout_ms, precision)
    }

    /// Set a link's administrative priority (Passive policy ranking).
    pub fn set_link_priority(&self, node_id: u16, link_id: u8, priority: u8) -> Result<()> {
        self.shared
            .registry
            .write()
            .set_link_priority(node_id, link_id, priority)
    }

    /// Enable or disable a link's participation in the data plane.
    ///
    /// This is the one registry operation that runs concurrently with the
    /// data plane: it only flips the link's flag, and on disable posts a
    /// recompute notification for the owning host.
    pub fn set_link_enabled(&self, node_id: u16, link_id: u8, enabled: bool) -> Result<()> {
        let registry = self.shared.registry.read();
        let host = registry.host(node_id).ok_or(Error::UnknownHost(node_id))?;
        let link = host.link(link_id).ok_or(Error::InvalidLink(link_id))?;
        if link.is_configured() == enabled {
            return Ok(());
        }
        link.set_configured(enabled);
        if !enabled {
            // operator path: a persistently full channel is surfaced
            self.shared.notifier.post(node_id)?;
        }
        Ok(())
    }

    /// Point-in-time view of a link.
    pub fn link_status(&self, node_id: u16, link_id: u8) -> Result<LinkStatus> {
        self.shared.registry.read().link_status(node_id, link_id)
    }
}

impl Drop for Handle {
    fn drop(&mut self) {
        if !self.freed {
            self.stop_workers();
        }
    }
}
