use clap::Parser;
use client::game::ClientWorld;
use client::network::{FastClient, ReliableClient};
use log::{error, info, warn};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use shared::{Clock, InputFlags};
use std::net::{SocketAddr, ToSocketAddrs};
use tokio::time::{interval, sleep, Duration};

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Server host to connect to
    #[arg(short = 's', long, default_value = "127.0.0.1")]
    server: String,

    /// Port of the server's handshake channel
    #[arg(short = 't', long, default_value_t = shared::protocol::DEFAULT_TCP_PORT)]
    tcp_port: u16,

    /// Name sent in the handshake (at most 31 bytes are kept)
    #[arg(short = 'n', long, default_value = "bot")]
    username: String,

    /// Heartbeat interval in milliseconds
    #[arg(long, default_value = "1000")]
    ping_ms: u64,

    /// Stop after this many seconds, 0 runs until the session ends
    #[arg(short = 'd', long, default_value = "30")]
    duration_secs: u64,

    /// Seed for the random input generator
    #[arg(long)]
    seed: Option<u64>,
}

fn random_inputs(rng: &mut StdRng) -> InputFlags {
    let mut inputs = InputFlags::from_bits_truncate(rng.gen::<u8>() & 0x0f);
    // opposite directions cancel out
    if inputs.contains(InputFlags::LEFT | InputFlags::RIGHT) {
        inputs.remove(InputFlags::LEFT);
    }
    if inputs.contains(InputFlags::UP | InputFlags::DOWN) {
        inputs.remove(InputFlags::DOWN);
    }
    if rng.gen_bool(0.1) {
        inputs |= InputFlags::SHOOT;
    }
    inputs
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::init();

    if std::env::var("RUST_LOG").is_err() {
        eprintln!("Set RUST_LOG=info for detailed logging");
    }

    let args = Args::parse();
    let server_addr: SocketAddr = (args.server.as_str(), args.tcp_port)
        .to_socket_addrs()?
        .next()
        .ok_or("server address did not resolve")?;

    info!("Starting client...");
    info!("Connecting to: {}", server_addr);

    let mut control = ReliableClient::connect(server_addr).await?;
    let session = control.handshake(&args.username).await?;
    let mut fast = FastClient::connect(server_addr, &session, Clock::shared()).await?;

    let mut rng = match args.seed {
        Some(seed) => StdRng::seed_from_u64(seed),
        None => StdRng::from_entropy(),
    };
    let mut world = ClientWorld::new();
    let mut input_interval = interval(Duration::from_millis(16));
    let mut ping_interval = interval(Duration::from_millis(args.ping_ms.max(1)));
    let mut report_interval = interval(Duration::from_secs(5));
    let run_for = if args.duration_secs > 0 {
        Duration::from_secs(args.duration_secs)
    } else {
        Duration::from_secs(365 * 24 * 60 * 60)
    };
    let run_until = sleep(run_for);
    tokio::pin!(run_until);

    // reads on the control stream must not be cancelled mid-frame
    let mut control_task = tokio::spawn(async move { control.wait_for_close().await });

    loop {
        tokio::select! {
            packets = fast.recv() => {
                for packet in &packets {
                    world.apply(packet);
                }
                if fast.is_closed() {
                    warn!("Session ended by server");
                    break;
                }
            },

            _ = input_interval.tick() => {
                if let Err(e) = fast.send_input(random_inputs(&mut rng)).await {
                    error!("Error sending input: {}", e);
                }
            },

            _ = ping_interval.tick() => {
                if let Err(e) = fast.ping().await {
                    error!("Error sending ping: {}", e);
                }
            },

            _ = report_interval.tick() => {
                info!(
                    "RTT: {} ms, players: {}, entities: {}",
                    fast.rtt_ms().map_or_else(|| "-".to_string(), |rtt| rtt.to_string()),
                    world.player_count(),
                    world.entity_count()
                );
            },

            notice = &mut control_task => {
                match notice {
                    Ok(Ok(Some(reason))) => warn!("Disconnected: {}", reason),
                    Ok(Ok(None)) => warn!("Control channel closed"),
                    Ok(Err(e)) => error!("Control channel error: {}", e),
                    Err(e) => error!("Control task failed: {}", e),
                }
                break;
            },

            _ = &mut run_until => {
                info!("Run time elapsed, disconnecting");
                fast.disconnect().await?;
                break;
            },
        }
    }

    control_task.abort();
    Ok(())
}
