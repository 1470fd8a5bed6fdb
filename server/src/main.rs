use clap::Parser;
use log::info;
use server::config::ServerConfig;
use server::network::Server;
use std::time::Duration;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Address to bind both channels to
    #[arg(short = 'H', long, default_value = "127.0.0.1")]
    host: String,

    /// Port of the reliable handshake channel
    #[arg(short = 't', long, default_value_t = shared::protocol::DEFAULT_TCP_PORT)]
    tcp_port: u16,

    /// Port of the fast-path gameplay channel
    #[arg(short = 'u', long, default_value_t = shared::protocol::DEFAULT_UDP_PORT)]
    udp_port: u16,

    /// Maximum concurrent sessions, pending ones included
    #[arg(short = 'm', long, default_value = "4")]
    max_clients: usize,

    /// Simulation tick length in milliseconds
    #[arg(long, default_value = "16")]
    tick_ms: u64,

    /// Silence in milliseconds after which a session is evicted
    #[arg(long, default_value = "3000")]
    timeout_ms: u64,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    env_logger::init();

    if std::env::var("RUST_LOG").is_err() {
        eprintln!("Set RUST_LOG=info for detailed logging");
    }

    let args = Args::parse();

    let config = ServerConfig {
        host: args.host,
        tcp_port: args.tcp_port,
        udp_port: args.udp_port,
        max_clients: args.max_clients,
        tick_duration: Duration::from_millis(args.tick_ms.max(1)),
        session_timeout: Duration::from_millis(args.timeout_ms),
        ..ServerConfig::default()
    };

    info!("Starting server...");
    info!(
        "Handshake on {}, gameplay on {}",
        config.tcp_addr(),
        config.udp_addr()
    );
    info!("Max clients: {}", config.max_clients);

    let mut server = Server::bind(config).await?;
    server.run().await?;

    Ok(())
}
