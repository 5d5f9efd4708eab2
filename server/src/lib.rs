//! # Query Cache Server Library
//!
//! Shields a game server from floods of the server-browser info query
//! (`A2S_INFO`). The host answers that query by reading its full status on
//! every packet; under a flood this alone can saturate the server. The query
//! cache sits in the host's UDP receive path instead and answers from a
//! serialized reply that is rebuilt at most once per TTL.
//!
//! ## Data Flow
//!
//! ```text
//! datagram ─► hook (classify) ─┬─ poison ──────► dropped, host sees a timeout
//!                              ├─ info query ──► cache (rebuild if stale) ─► reply sent
//!                              │                                            host sees a timeout
//!                              └─ other ───────► host, untouched
//! ```
//!
//! ## Module Organization
//!
//! ### Host Module (`host`)
//! The seams to the host process: status accessors, the socket, and the
//! swappable receive entry point.
//!
//! ### Snapshot Module (`snapshot`)
//! Game directory, description, version, protocol, app id and capacity as
//! reported to browsers.
//!
//! ### Cache Module (`cache`)
//! The serialized reply, its build time, and the TTL policy.
//!
//! ### Hook Module (`hook`)
//! Installs itself into the receive path and dispatches each datagram.
//!
//! ### Config Module (`config`)
//! Console variables `qcache_gameversion`, `qcache_gamedesc`,
//! `qcache_protoversion` and `qcache_maxclients`.
//!
//! ### Extension Module (`extension`)
//! Load and unload glue tying the pieces together.
//!
//! ### Network Module (`network`)
//! A stand-in UDP game server host for running the cache outside a real
//! game server.
//!
//! ## Usage Example
//!
//! ```rust,no_run
//! use qcache_server::config::ConVarRegistry;
//! use qcache_server::extension::QueryCache;
//! use qcache_server::host::{HostStatus, StaticHost};
//! use qcache_server::network::HostServer;
//! use std::sync::Arc;
//!
//! fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let host = Arc::new(StaticHost::new(HostStatus {
//!         host_name: "My Server".to_string(),
//!         map_name: "emp_district".to_string(),
//!         game_dir: "/srv/srcds/empires".to_string(),
//!         max_clients: 32,
//!         ..HostStatus::default()
//!     }));
//!     let server = HostServer::bind("0.0.0.0:27015", host.clone())?;
//!
//!     let mut registry = ConVarRegistry::new();
//!     let _qcache = QueryCache::load(host, Ok(server.hook_slot()), &mut registry)?;
//!
//!     server.run()?;
//!     Ok(())
//! }
//! ```

pub mod cache;
pub mod config;
pub mod extension;
pub mod hook;
pub mod host;
pub mod network;
pub mod snapshot;
