//! Cached info reply with a time-to-live refresh policy
//!
//! The cache is `Stale` until first built and again once `TTL` has passed
//! since the last build. Staleness is checked lazily when a query arrives,
//! there is no background timer.

use crate::host::{DatagramSocket, HostInfo};
use crate::snapshot::StatusSnapshot;
use log::{debug, error};
use parking_lot::Mutex;
use qcache_shared::ReplyBuffer;
use std::io;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Maximum age of a served reply
pub const QUERY_CACHE_TTL: Duration = Duration::from_secs(5);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheState {
    Stale,
    Fresh,
}

/// The serialized reply and the time it was built
#[derive(Debug)]
pub struct ReplyCache {
    buffer: ReplyBuffer,
    built_at: Option<Instant>,
    ttl: Duration,
    rebuilds: u64,
}

impl ReplyCache {
    pub fn new(ttl: Duration) -> Self {
        Self {
            buffer: ReplyBuffer::default(),
            built_at: None,
            ttl,
            rebuilds: 0,
        }
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    pub fn state(&self, now: Instant) -> CacheState {
        match self.built_at {
            Some(built_at) if now.saturating_duration_since(built_at) < self.ttl => {
                CacheState::Fresh
            }
            _ => CacheState::Stale,
        }
    }

    /// Rebuilds the reply if it is stale at `now`
    ///
    /// Returns whether a rebuild happened. A failed encode leaves the buffer
    /// empty and still stamps the build time, so a broken reply is retried
    /// once per TTL rather than on every query.
    pub fn refresh(&mut self, snapshot: &StatusSnapshot, host: &dyn HostInfo, now: Instant) -> bool {
        if self.state(now) == CacheState::Fresh {
            return false;
        }

        let reply = snapshot.to_reply(host);
        if let Err(e) = reply.encode(&mut self.buffer) {
            error!("Failed to build info reply: {}", e);
        }
        self.built_at = Some(now);
        self.rebuilds += 1;

        debug!(
            "Rebuilt info reply ({} bytes, {} players, {} bots)",
            self.buffer.as_bytes().len(),
            reply.players,
            reply.bots
        );
        true
    }

    /// Refreshes if needed and sends the reply to `sender`
    ///
    /// Returns the number of bytes sent; nothing is sent while the buffer is
    /// empty.
    pub fn serve(
        &mut self,
        snapshot: &StatusSnapshot,
        host: &dyn HostInfo,
        socket: &dyn DatagramSocket,
        sender: SocketAddr,
        now: Instant,
    ) -> io::Result<usize> {
        self.refresh(snapshot, host, now);

        if self.buffer.is_empty() {
            return Ok(0);
        }
        socket.send_to(self.buffer.as_bytes(), sender)
    }

    pub fn bytes(&self) -> &[u8] {
        self.buffer.as_bytes()
    }

    pub fn built_at(&self) -> Option<Instant> {
        self.built_at
    }

    /// Number of rebuilds since creation
    pub fn rebuilds(&self) -> u64 {
        self.rebuilds
    }
}

impl Default for ReplyCache {
    fn default() -> Self {
        Self::new(QUERY_CACHE_TTL)
    }
}

/// Everything the receive path and the console variables share
#[derive(Debug)]
pub struct QueryCacheState {
    pub snapshot: StatusSnapshot,
    pub cache: ReplyCache,
}

impl QueryCacheState {
    pub fn new(snapshot: StatusSnapshot, cache: ReplyCache) -> Self {
        Self { snapshot, cache }
    }

    pub fn serve(
        &mut self,
        host: &dyn HostInfo,
        socket: &dyn DatagramSocket,
        sender: SocketAddr,
        now: Instant,
    ) -> io::Result<usize> {
        self.cache.serve(&self.snapshot, host, socket, sender, now)
    }
}

/// One lock covers check, rebuild and send so a reply is never served half built
pub type SharedState = Arc<Mutex<QueryCacheState>>;

pub fn shared_state(snapshot: StatusSnapshot, cache: ReplyCache) -> SharedState {
    Arc::new(Mutex::new(QueryCacheState::new(snapshot, cache)))
}
