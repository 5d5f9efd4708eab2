//! Receive path interception
//!
//! The shim takes the host's receive entry point out of its
//! [`ReceiveHookSlot`], keeps it as the original, and puts its own entry in
//! its place. Every datagram the host receives then runs through
//! [`Interceptor::on_datagram_received`]:
//!
//! 1. poison packets are dropped,
//! 2. info queries are answered from the cache,
//! 3. everything else reaches the host untouched.
//!
//! Dropped and answered datagrams look like a timed-out receive to the host,
//! which already knows how to shrug those off.

use crate::cache::SharedState;
use crate::host::{DatagramSocket, HostInfo, ReceiveHookSlot, RecvFn};
use log::{info, trace, warn};
use qcache_shared::{classify, DatagramKind};
use std::io;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;

/// How an answered query is hidden from the host
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SuppressMode {
    /// Report a timed-out receive
    #[default]
    TimedOut,
    /// Report the query as a normal receive, so the host sees it as well
    ReportLength,
}

/// What the shim did with one datagram
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Disposition {
    Rejected,
    Served,
    PassedThrough,
}

/// Per-disposition datagram counts
#[derive(Debug, Default)]
pub struct InterceptStats {
    rejected: AtomicU64,
    served: AtomicU64,
    passed_through: AtomicU64,
}

impl InterceptStats {
    fn record(&self, disposition: Disposition) {
        let counter = match disposition {
            Disposition::Rejected => &self.rejected,
            Disposition::Served => &self.served,
            Disposition::PassedThrough => &self.passed_through,
        };
        counter.fetch_add(1, Ordering::Relaxed);
    }

    pub fn rejected(&self) -> u64 {
        self.rejected.load(Ordering::Relaxed)
    }

    pub fn served(&self) -> u64 {
        self.served.load(Ordering::Relaxed)
    }

    pub fn passed_through(&self) -> u64 {
        self.passed_through.load(Ordering::Relaxed)
    }
}

fn intercepted() -> io::Error {
    io::Error::from(io::ErrorKind::TimedOut)
}

/// The entry point body that sits in front of the original receive function
pub struct Interceptor {
    state: SharedState,
    host: Arc<dyn HostInfo>,
    original: RecvFn,
    mode: SuppressMode,
    stats: Arc<InterceptStats>,
}

impl Interceptor {
    /// Receives through the original entry, then classifies and dispatches
    pub fn on_datagram_received(
        &self,
        socket: &dyn DatagramSocket,
        buf: &mut [u8],
    ) -> io::Result<(usize, SocketAddr)> {
        let (len, sender) = (self.original)(socket, buf)?;

        match self.dispatch(&buf[..len], sender, socket) {
            Disposition::Rejected => Err(intercepted()),
            Disposition::Served => match self.mode {
                SuppressMode::TimedOut => Err(intercepted()),
                SuppressMode::ReportLength => Ok((len, sender)),
            },
            Disposition::PassedThrough => Ok((len, sender)),
        }
    }

    fn dispatch(
        &self,
        datagram: &[u8],
        sender: SocketAddr,
        socket: &dyn DatagramSocket,
    ) -> Disposition {
        let disposition = match classify(datagram) {
            DatagramKind::Poison => {
                warn!("Dropped null entity packet from {}", sender);
                Disposition::Rejected
            }
            DatagramKind::InfoQuery => {
                let result =
                    self.state
                        .lock()
                        .serve(self.host.as_ref(), socket, sender, Instant::now());
                if let Err(e) = result {
                    warn!("Failed to send cached info reply to {}: {}", sender, e);
                }
                Disposition::Served
            }
            DatagramKind::PassThrough => {
                trace!("Passing {} bytes from {} to host", datagram.len(), sender);
                Disposition::PassedThrough
            }
        };
        self.stats.record(disposition);
        disposition
    }
}

struct Installed {
    slot: Arc<ReceiveHookSlot>,
    original: RecvFn,
    entry: RecvFn,
}

/// Installs and removes the [`Interceptor`] in a host's receive slot
pub struct ReceiveShim {
    state: SharedState,
    host: Arc<dyn HostInfo>,
    mode: SuppressMode,
    stats: Arc<InterceptStats>,
    installed: Option<Installed>,
}

impl ReceiveShim {
    pub fn new(state: SharedState, host: Arc<dyn HostInfo>) -> Self {
        Self::with_mode(state, host, SuppressMode::default())
    }

    pub fn with_mode(state: SharedState, host: Arc<dyn HostInfo>, mode: SuppressMode) -> Self {
        Self {
            state,
            host,
            mode,
            stats: Arc::new(InterceptStats::default()),
            installed: None,
        }
    }

    pub fn is_installed(&self) -> bool {
        self.installed.is_some()
    }

    pub fn stats(&self) -> Arc<InterceptStats> {
        Arc::clone(&self.stats)
    }

    /// Hooks the slot's receive path; a no-op when already installed
    ///
    /// Returns whether this call installed the hook.
    pub fn install(&mut self, slot: &Arc<ReceiveHookSlot>) -> bool {
        if self.installed.is_some() {
            return false;
        }

        let original = slot.current();
        let interceptor = Interceptor {
            state: Arc::clone(&self.state),
            host: Arc::clone(&self.host),
            original: Arc::clone(&original),
            mode: self.mode,
            stats: Arc::clone(&self.stats),
        };
        let entry: RecvFn = Arc::new(move |socket: &dyn DatagramSocket, buf: &mut [u8]| {
            interceptor.on_datagram_received(socket, buf)
        });

        slot.replace(Arc::clone(&entry));
        self.installed = Some(Installed {
            slot: Arc::clone(slot),
            original,
            entry,
        });
        info!("Receive hook installed");
        true
    }

    /// Restores the original receive path; a no-op when not installed
    ///
    /// The slot is only written back if it still holds this shim's entry.
    /// Returns whether the original was restored.
    pub fn uninstall(&mut self) -> bool {
        let Some(installed) = self.installed.take() else {
            return false;
        };

        if !installed
            .slot
            .restore_if(&installed.entry, installed.original)
        {
            warn!("Receive hook was replaced by someone else, leaving it in place");
            return false;
        }
        info!("Receive hook removed");
        true
    }
}

impl Drop for ReceiveShim {
    fn drop(&mut self) {
        self.uninstall();
    }
}
