//! Stand-in game server host
//!
//! A minimal UDP server that performs every receive through a
//! [`ReceiveHookSlot`], the way the real host routes its socket reads through
//! a swappable entry point. Without the query cache installed it answers
//! every info query itself, reading all host state each time.

use crate::host::{HostInfo, ReceiveHookSlot};
use crate::snapshot::StatusSnapshot;
use log::{debug, error, info, trace, warn};
use qcache_shared::{classify, DatagramKind, ReplyBuffer};
use std::future::Future;
use std::io;
use std::net::{SocketAddr, UdpSocket};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// How long one receive may block before the shutdown flag is rechecked
const POLL_INTERVAL: Duration = Duration::from_millis(100);

/// Datagrams that reached the host's own handling
#[derive(Debug, Default)]
pub struct HostStats {
    info_queries: AtomicU64,
    other_packets: AtomicU64,
}

impl HostStats {
    pub fn info_queries(&self) -> u64 {
        self.info_queries.load(Ordering::Relaxed)
    }

    pub fn other_packets(&self) -> u64 {
        self.other_packets.load(Ordering::Relaxed)
    }
}

pub struct HostServer {
    socket: UdpSocket,
    slot: Arc<ReceiveHookSlot>,
    host: Arc<dyn HostInfo>,
    shutdown: Arc<AtomicBool>,
    stats: Arc<HostStats>,
}

impl HostServer {
    pub fn bind(addr: &str, host: Arc<dyn HostInfo>) -> io::Result<Self> {
        let socket = UdpSocket::bind(addr)?;
        socket.set_read_timeout(Some(POLL_INTERVAL))?;
        info!("Host listening on {}", socket.local_addr()?);

        Ok(Self {
            socket,
            slot: Arc::new(ReceiveHookSlot::new()),
            host,
            shutdown: Arc::new(AtomicBool::new(false)),
            stats: Arc::new(HostStats::default()),
        })
    }

    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.socket.local_addr()
    }

    pub fn hook_slot(&self) -> Arc<ReceiveHookSlot> {
        Arc::clone(&self.slot)
    }

    /// Setting the flag makes [`HostServer::run`] return
    pub fn shutdown_handle(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.shutdown)
    }

    pub fn stats(&self) -> Arc<HostStats> {
        Arc::clone(&self.stats)
    }

    /// Blocking receive loop
    pub fn run(&self) -> io::Result<()> {
        let mut buffer = [0u8; 2048];

        while !self.shutdown.load(Ordering::Relaxed) {
            match self.slot.recv_from(&self.socket, &mut buffer) {
                Ok((len, addr)) => self.handle_datagram(&buffer[..len], addr),
                Err(e)
                    if matches!(
                        e.kind(),
                        io::ErrorKind::TimedOut | io::ErrorKind::WouldBlock
                    ) => {}
                Err(e) => {
                    error!("Error receiving packet: {}", e);
                }
            }
        }

        info!("Host shutting down");
        Ok(())
    }

    /// Runs the receive loop on a blocking thread until `stop` completes
    ///
    /// Returns only after the loop itself has returned, so callers may tear
    /// down hooks and persist state without a receive in flight.
    pub async fn serve_until(self: Arc<Self>, stop: impl Future<Output = ()>) -> io::Result<()> {
        let shutdown = self.shutdown_handle();
        let mut handle = tokio::task::spawn_blocking(move || self.run());

        let finished = tokio::select! {
            result = &mut handle => Some(result),
            _ = stop => {
                shutdown.store(true, Ordering::Relaxed);
                None
            }
        };
        // The loop notices the flag within one poll interval
        let joined = match finished {
            Some(result) => result,
            None => handle.await,
        };
        joined.map_err(|e| io::Error::new(io::ErrorKind::Other, e))?
    }

    fn handle_datagram(&self, datagram: &[u8], addr: SocketAddr) {
        match classify(datagram) {
            DatagramKind::InfoQuery => {
                self.stats.info_queries.fetch_add(1, Ordering::Relaxed);
                if let Err(e) = self.answer_info_query(addr) {
                    warn!("Failed to answer info query from {}: {}", addr, e);
                }
            }
            _ => {
                self.stats.other_packets.fetch_add(1, Ordering::Relaxed);
                trace!("Ignoring {} byte packet from {}", datagram.len(), addr);
            }
        }
    }

    /// The host's own uncached reply
    fn answer_info_query(&self, addr: SocketAddr) -> io::Result<()> {
        let host = self.host.as_ref();
        let reply = StatusSnapshot::initialize_static(host).to_reply(host);
        let mut buf = ReplyBuffer::default();
        reply
            .encode(&mut buf)
            .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;
        self.socket.send_to(buf.as_bytes(), addr)?;
        debug!("Host answered info query from {}", addr);
        Ok(())
    }
}
