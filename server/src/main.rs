use clap::Parser;
use env_logger::Env;
use log::{error, info};
use server::network::{NetworkServer, ServerConfig};
use std::time::Duration;

/// Lobby and match server for the bomb arena game
#[derive(Parser, Debug)]
#[clap(author, version, about)]
struct Args {
    /// Server IP address to bind to
    #[clap(short = 'H', long, default_value = "127.0.0.1")]
    host: String,
    /// Server port to listen on
    #[clap(short, long, default_value = "8080")]
    port: u16,
    /// Side length of the generated map
    #[clap(short, long, default_value = "15")]
    map_size: usize,
    /// Length of one countdown step in milliseconds
    #[clap(long, default_value = "1000")]
    countdown_ms: u64,
    /// Outbound frames buffered per connection
    #[clap(long, default_value = "256")]
    send_queue: usize,
    /// Milliseconds a new connection gets to finish the upgrade request
    #[clap(long, default_value = "10000")]
    handshake_timeout_ms: u64,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::Builder::from_env(Env::default().default_filter_or("info")).init();

    let args = Args::parse();

    let config = ServerConfig {
        map_size: args.map_size.max(1),
        countdown_interval: Duration::from_millis(args.countdown_ms.max(1)),
        send_queue: args.send_queue.max(1),
        handshake_timeout: Duration::from_millis(args.handshake_timeout_ms.max(1)),
    };

    let address = format!("{}:{}", args.host, args.port);
    let mut server = NetworkServer::bind(&address, config).await?;

    tokio::select! {
        result = server.run() => {
            if let Err(e) = result {
                error!("Server error: {}", e);
            }
        }
        _ = tokio::signal::ctrl_c() => {
            info!("Received Ctrl+C, shutting down gracefully...");
        }
    }

    Ok(())
}
