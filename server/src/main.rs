use clap::Parser;
use log::{error, info, warn};
use qcache_server::cache::ReplyCache;
use qcache_server::config::ConVarRegistry;
use qcache_server::extension::QueryCache;
use qcache_server::hook::SuppressMode;
use qcache_server::host::{HostStatus, StaticHost};
use qcache_server::network::HostServer;
use std::path::PathBuf;
use std::sync::Arc;

#[derive(Parser, Debug)]
#[command(author, version, about = "Game server stand-in with the A2S_INFO query cache")]
struct Args {
    /// Server IP address to bind to
    #[arg(short = 'H', long, default_value = "0.0.0.0")]
    host: String,

    /// Server port to listen on
    #[arg(short, long, default_value = "27015")]
    port: u16,

    /// Host name reported to server browsers
    #[arg(long, default_value = "Query Cache Test Server")]
    name: String,

    /// Current map
    #[arg(short, long, default_value = "emp_canyon")]
    map: String,

    /// Game directory path
    #[arg(long, default_value = "empires")]
    game_dir: String,

    /// Game description as the game reports it
    #[arg(long, default_value = "Empires")]
    description: String,

    /// Steam application id
    #[arg(long, default_value = "17740")]
    app_id: u32,

    /// Real player capacity
    #[arg(long, default_value = "32")]
    max_clients: u32,

    /// Connected players to report
    #[arg(long, default_value = "0")]
    players: u32,

    /// Connected bots to report
    #[arg(long, default_value = "0")]
    bots: u32,

    /// Server password
    #[arg(long)]
    password: Option<String>,

    /// JSON file holding console variable values, loaded at start and saved on exit
    #[arg(long)]
    cvar_file: Option<PathBuf>,

    /// Console variable assignment, e.g. --set qcache_maxclients=16
    #[arg(long = "set", value_name = "NAME=VALUE")]
    sets: Vec<String>,

    /// Report answered queries as normal receives instead of timeouts
    #[arg(long)]
    report_length: bool,

    /// Run without the query cache
    #[arg(long)]
    no_cache: bool,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let args = Args::parse();

    let host = Arc::new(StaticHost::new(HostStatus {
        host_name: args.name,
        map_name: args.map,
        game_dir: args.game_dir,
        game_description: args.description,
        app_id: args.app_id,
        max_clients: args.max_clients,
        num_clients: args.players,
        num_bots: args.bots,
        password: args.password,
    }));

    let address = format!("{}:{}", args.host, args.port);
    let server = Arc::new(HostServer::bind(&address, host.clone())?);
    let mut registry = ConVarRegistry::new();

    let qcache = if args.no_cache {
        info!("Query cache disabled");
        None
    } else {
        let mode = if args.report_length {
            SuppressMode::ReportLength
        } else {
            SuppressMode::TimedOut
        };
        Some(QueryCache::load_with(
            host,
            Ok(server.hook_slot()),
            &mut registry,
            ReplyCache::default(),
            mode,
        )?)
    };

    if let Some(path) = &args.cvar_file {
        if path.exists() {
            registry.load(path)?;
        }
    }

    for assignment in &args.sets {
        match assignment.split_once('=') {
            Some((name, value)) => {
                if let Err(e) = registry.set(name.trim(), value.trim()) {
                    warn!("{}", e);
                }
            }
            None => warn!("Ignoring malformed assignment '{}'", assignment),
        }
    }

    let stop = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!("Failed to listen for Ctrl+C: {}", e);
            std::future::pending::<()>().await;
        }
        info!("Received Ctrl+C, shutting down gracefully...");
    };
    if let Err(e) = Arc::clone(&server).serve_until(stop).await {
        error!("Host loop failed: {}", e);
    }

    if let Some(qcache) = qcache {
        let stats = qcache.stats();
        info!(
            "Served {} queries from cache, dropped {} poison packets, passed {} packets",
            stats.served(),
            stats.rejected(),
            stats.passed_through()
        );
        if let Some(path) = &args.cvar_file {
            registry.save(path)?;
        }
        qcache.unload(&mut registry);
    }

    Ok(())
}
