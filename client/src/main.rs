use clap::Parser;
use log::{info, warn};
use qcache_client::{describe, QueryClient};
use std::time::Duration;
use tokio::time::sleep;

#[derive(Parser, Debug)]
#[command(author, version, about = "Sends A2S_INFO queries and prints the replies")]
struct Args {
    /// Server address to query
    #[arg(short = 's', long, default_value = "127.0.0.1:27015")]
    server: String,

    /// Number of queries to send
    #[arg(short = 'n', long, default_value = "1")]
    count: u32,

    /// Delay between queries in milliseconds
    #[arg(short = 'i', long, default_value = "1000")]
    interval: u64,

    /// Reply timeout in milliseconds
    #[arg(short = 't', long, default_value = "2000")]
    timeout: u64,

    /// Send the null entity packet instead of queries
    #[arg(long)]
    poison: bool,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::init();

    if std::env::var("RUST_LOG").is_err() {
        eprintln!("Set RUST_LOG=info for detailed logging");
    }

    let args = Args::parse();
    let client = QueryClient::new(&args.server, Duration::from_millis(args.timeout)).await?;

    if args.poison {
        if client.send_poison().await? {
            warn!("Server answered the null entity packet");
        } else {
            println!("No answer to the null entity packet");
        }
        return Ok(());
    }

    let mut previous: Option<Vec<u8>> = None;
    for i in 0..args.count {
        if i > 0 {
            sleep(Duration::from_millis(args.interval)).await;
        }

        match client.query_info().await {
            Ok(result) => {
                let unchanged = previous.as_deref() == Some(result.raw.as_slice());
                println!(
                    "[{}] {:?}{}",
                    i + 1,
                    result.latency,
                    if unchanged { " (identical to previous)" } else { "" }
                );
                if !unchanged {
                    println!("{}", describe(&result.reply));
                }
                previous = Some(result.raw);
            }
            Err(e) => warn!("Query {} to {} failed: {}", i + 1, client.server_addr(), e),
        }
    }

    info!("Done");
    Ok(())
}
