//! Interfaces of the host process the query cache plugs into
//!
//! The cache never owns the host. It reads status through [`HostInfo`],
//! answers through a [`DatagramSocket`], and hooks itself into the host's
//! receive path by swapping the entry held in a [`ReceiveHookSlot`].

use parking_lot::{Mutex, RwLock};
use std::io;
use std::net::{SocketAddr, UdpSocket};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use thiserror::Error;

/// Synchronous, side-effect free status reads offered by the host
pub trait HostInfo: Send + Sync {
    fn host_name(&self) -> String;
    fn map_name(&self) -> String;
    /// Full path of the game directory as the host reports it
    fn game_dir(&self) -> String;
    fn game_description(&self) -> String;
    fn app_id(&self) -> u32;
    fn max_clients(&self) -> u32;
    fn num_clients(&self) -> u32;
    fn num_bots(&self) -> u32;
    fn is_passworded(&self) -> bool;
}

/// The socket operations a receive entry point works with
pub trait DatagramSocket {
    fn recv_from(&self, buf: &mut [u8]) -> io::Result<(usize, SocketAddr)>;
    fn send_to(&self, buf: &[u8], target: SocketAddr) -> io::Result<usize>;
}

impl DatagramSocket for UdpSocket {
    fn recv_from(&self, buf: &mut [u8]) -> io::Result<(usize, SocketAddr)> {
        UdpSocket::recv_from(self, buf)
    }

    fn send_to(&self, buf: &[u8], target: SocketAddr) -> io::Result<usize> {
        UdpSocket::send_to(self, buf, target)
    }
}

/// A receive entry point: fills `buf` and reports the length and sender
pub type RecvFn =
    Arc<dyn Fn(&dyn DatagramSocket, &mut [u8]) -> io::Result<(usize, SocketAddr)> + Send + Sync>;

/// The host's stock receive entry point
pub fn socket_recv() -> RecvFn {
    Arc::new(|socket: &dyn DatagramSocket, buf: &mut [u8]| socket.recv_from(buf))
}

/// Whether two entries are the same function object
pub fn same_entry(a: &RecvFn, b: &RecvFn) -> bool {
    std::ptr::eq(Arc::as_ptr(a) as *const (), Arc::as_ptr(b) as *const ())
}

/// The global slot through which the host performs every datagram receive
pub struct ReceiveHookSlot {
    entry: RwLock<RecvFn>,
}

impl ReceiveHookSlot {
    pub fn new() -> Self {
        Self::with_entry(socket_recv())
    }

    pub fn with_entry(entry: RecvFn) -> Self {
        Self {
            entry: RwLock::new(entry),
        }
    }

    pub fn current(&self) -> RecvFn {
        Arc::clone(&self.entry.read())
    }

    /// Swaps in `entry` and hands back the previous one
    pub fn replace(&self, entry: RecvFn) -> RecvFn {
        std::mem::replace(&mut *self.entry.write(), entry)
    }

    /// Puts `original` back only while `expected` is still installed
    ///
    /// The check and the swap happen under one write guard.
    pub fn restore_if(&self, expected: &RecvFn, original: RecvFn) -> bool {
        let mut entry = self.entry.write();
        if !same_entry(&entry, expected) {
            return false;
        }
        *entry = original;
        true
    }

    /// Receives one datagram through whatever entry is installed
    pub fn recv_from(
        &self,
        socket: &dyn DatagramSocket,
        buf: &mut [u8],
    ) -> io::Result<(usize, SocketAddr)> {
        // Release the lock before calling so an entry may swap the slot
        let entry = self.current();
        entry(socket, buf)
    }
}

impl Default for ReceiveHookSlot {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Debug, Error)]
pub enum HostError {
    #[error("host networking unavailable: {0}")]
    NetworkUnavailable(String),
}

/// Plain status values for a host whose state is driven from outside
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct HostStatus {
    pub host_name: String,
    pub map_name: String,
    pub game_dir: String,
    pub game_description: String,
    pub app_id: u32,
    pub max_clients: u32,
    pub num_clients: u32,
    pub num_bots: u32,
    pub password: Option<String>,
}

/// [`HostInfo`] backed by a mutable [`HostStatus`]
///
/// Used by the stand-in server binary and by tests. Counts live counter
/// reads so callers can see how often the host was actually queried.
#[derive(Debug, Default)]
pub struct StaticHost {
    status: Mutex<HostStatus>,
    live_reads: AtomicU64,
}

impl StaticHost {
    pub fn new(status: HostStatus) -> Self {
        Self {
            status: Mutex::new(status),
            live_reads: AtomicU64::new(0),
        }
    }

    pub fn update(&self, f: impl FnOnce(&mut HostStatus)) {
        f(&mut self.status.lock());
    }

    pub fn status(&self) -> HostStatus {
        self.status.lock().clone()
    }

    /// Number of times the connected player count was read
    pub fn live_reads(&self) -> u64 {
        self.live_reads.load(Ordering::Relaxed)
    }
}

impl HostInfo for StaticHost {
    fn host_name(&self) -> String {
        self.status.lock().host_name.clone()
    }

    fn map_name(&self) -> String {
        self.status.lock().map_name.clone()
    }

    fn game_dir(&self) -> String {
        self.status.lock().game_dir.clone()
    }

    fn game_description(&self) -> String {
        self.status.lock().game_description.clone()
    }

    fn app_id(&self) -> u32 {
        self.status.lock().app_id
    }

    fn max_clients(&self) -> u32 {
        self.status.lock().max_clients
    }

    fn num_clients(&self) -> u32 {
        self.live_reads.fetch_add(1, Ordering::Relaxed);
        self.status.lock().num_clients
    }

    fn num_bots(&self) -> u32 {
        self.status.lock().num_bots
    }

    fn is_passworded(&self) -> bool {
        self.status.lock().password.is_some()
    }
}
