//! # Info Query Client
//!
//! Sends server-browser info queries (`A2S_INFO`) to a game server and
//! decodes the replies. Used to watch the query cache from the outside:
//! replies inside one TTL window are byte-identical, and a poison packet
//! gets no answer at all.

use log::{debug, info};
use qcache_shared::{info_request, poison_packet, InfoReply};
use std::net::SocketAddr;
use std::time::{Duration, Instant};
use tokio::net::UdpSocket;
use tokio::time::timeout;

/// One answered query
#[derive(Debug, Clone)]
pub struct QueryResult {
    pub reply: InfoReply,
    /// Raw reply bytes as received
    pub raw: Vec<u8>,
    pub latency: Duration,
}

pub struct QueryClient {
    socket: UdpSocket,
    server_addr: SocketAddr,
    timeout: Duration,
}

impl QueryClient {
    pub async fn new(
        server_addr: &str,
        timeout: Duration,
    ) -> Result<Self, Box<dyn std::error::Error>> {
        let server_addr: SocketAddr = server_addr.parse()?;
        let bind_addr = if server_addr.is_ipv6() {
            "[::]:0"
        } else {
            "0.0.0.0:0"
        };
        let socket = UdpSocket::bind(bind_addr).await?;
        debug!("Client socket bound to {}", socket.local_addr()?);

        Ok(Self {
            socket,
            server_addr,
            timeout,
        })
    }

    pub fn server_addr(&self) -> SocketAddr {
        self.server_addr
    }

    /// Sends one info query and waits for the reply
    pub async fn query_info(&self) -> Result<QueryResult, Box<dyn std::error::Error>> {
        let start = Instant::now();
        self.socket
            .send_to(&info_request(), self.server_addr)
            .await?;

        let mut buf = [0u8; 2048];
        let (len, from) = timeout(self.timeout, self.socket.recv_from(&mut buf)).await??;
        let latency = start.elapsed();
        debug!("{} byte reply from {} in {:?}", len, from, latency);

        let raw = buf[..len].to_vec();
        let reply = InfoReply::decode(&raw)?;
        Ok(QueryResult {
            reply,
            raw,
            latency,
        })
    }

    /// Sends the null-entity packet
    ///
    /// Returns `true` if the server answered within the timeout, which a
    /// protected server never does.
    pub async fn send_poison(&self) -> Result<bool, Box<dyn std::error::Error>> {
        self.socket
            .send_to(&poison_packet(), self.server_addr)
            .await?;
        info!("Sent null entity packet to {}", self.server_addr);

        let mut buf = [0u8; 2048];
        Ok(timeout(self.timeout, self.socket.recv_from(&mut buf))
            .await
            .is_ok())
    }
}

/// Multi-line human readable summary of a reply
pub fn describe(reply: &InfoReply) -> String {
    format!(
        "{}\n  map:      {}\n  game:     {} ({})\n  app id:   {}\n  players:  {}/{} ({} bots)\n  password: {}\n  version:  {} (protocol {})",
        reply.name,
        reply.map,
        reply.game,
        reply.folder,
        reply.app_id,
        reply.players,
        reply.max_players,
        reply.bots,
        if reply.passworded { "yes" } else { "no" },
        reply.version,
        reply.protocol
    )
}
