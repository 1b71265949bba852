//! Live session server entry point
//!
//! Runs the AudioLMS live audio coordinator: a WebSocket signaling endpoint
//! backed by webrtc-rs peer connections that relay one teacher's audio to
//! every student in the session.
//!
//! # Usage
//!
//! ```bash
//! # Listen on the default address (0.0.0.0:8080) with public STUN servers
//! cargo run -p audiolms-live-server
//!
//! # Custom bind address and ICE servers
//! cargo run -p audiolms-live-server -- \
//!   --bind-address 127.0.0.1:9000 \
//!   --stun-servers stun:stun.example.org:3478 \
//!   --turn-servers 'turn:turn.example.org:3478|alice|secret'
//! ```

use audiolms_webrtc::{
    IceConfig, LiveConfig, RtcEngine, SignalingDispatcher, TurnServerConfig,
    WebSocketSignalingServer, DEFAULT_STUN_SERVERS,
};
use clap::Parser;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// AudioLMS live session server
///
/// Signals WebRTC audio sessions between one teacher and many students.
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// WebSocket signaling listen address
    #[arg(long, default_value = "0.0.0.0:8080", env = "LIVE_BIND_ADDRESS")]
    bind_address: SocketAddr,

    /// STUN servers (comma-separated); public servers when omitted
    #[arg(long, value_delimiter = ',', env = "LIVE_STUN_SERVERS")]
    stun_servers: Vec<String>,

    /// TURN servers as url|username|credential (comma-separated)
    #[arg(
        long,
        value_delimiter = ',',
        value_parser = parse_turn_server,
        env = "LIVE_TURN_SERVERS"
    )]
    turn_servers: Vec<TurnServerConfig>,

    /// Outbound signaling messages queued per client
    #[arg(long, default_value_t = 128, env = "LIVE_OUTBOUND_BUFFER")]
    outbound_buffer: usize,

    /// Negotiation events queued per connection
    #[arg(long, default_value_t = 64, env = "LIVE_EVENT_BUFFER")]
    event_buffer: usize,

    /// RTP packets buffered per student before packets are skipped
    #[arg(long, default_value_t = 256, env = "LIVE_RELAY_BUFFER")]
    relay_buffer: usize,
}

impl Args {
    fn live_config(&self) -> LiveConfig {
        let stun_servers = if self.stun_servers.is_empty() {
            DEFAULT_STUN_SERVERS.iter().map(|s| s.to_string()).collect()
        } else {
            self.stun_servers.clone()
        };

        LiveConfig {
            ice: IceConfig {
                stun_servers,
                turn_servers: self.turn_servers.clone(),
            },
            outbound_buffer: self.outbound_buffer,
            event_buffer: self.event_buffer,
            relay_buffer: self.relay_buffer,
        }
    }
}

/// Parse `url|username|credential`
fn parse_turn_server(value: &str) -> Result<TurnServerConfig, String> {
    let mut parts = value.splitn(3, '|');
    match (parts.next(), parts.next(), parts.next()) {
        (Some(url), Some(username), Some(credential)) if !url.is_empty() => {
            Ok(TurnServerConfig {
                url: url.to_string(),
                username: username.to_string(),
                credential: credential.to_string(),
            })
        }
        _ => Err(format!(
            "expected url|username|credential, got '{}'",
            value
        )),
    }
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();

    let shutdown_flag = Arc::new(AtomicBool::new(false));
    let shutdown_flag_handler = Arc::clone(&shutdown_flag);

    ctrlc::set_handler(move || {
        eprintln!("\n[SIGNAL] Ctrl+C received, shutting down");

        if shutdown_flag_handler.swap(true, Ordering::SeqCst) {
            eprintln!("[SIGNAL] Shutdown already in progress, forcing exit");
            std::process::exit(0);
        }

        std::thread::spawn(move || {
            std::thread::sleep(std::time::Duration::from_secs(3));
            eprintln!("[WATCHDOG] Graceful shutdown timeout (3s), forcing exit");
            std::process::exit(0);
        });
    })?;

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .worker_threads(num_cpus::get())
        .thread_name("live-worker")
        .enable_all()
        .build()?;

    runtime.block_on(async_main(args, shutdown_flag))
}

async fn async_main(
    args: Args,
    shutdown_flag: Arc<AtomicBool>,
) -> Result<(), Box<dyn std::error::Error>> {
    init_tracing()?;

    info!(
        version = env!("CARGO_PKG_VERSION"),
        "AudioLMS live server starting"
    );

    let config = args.live_config();
    config.validate()?;

    info!(
        bind_address = %args.bind_address,
        stun_servers = config.ice.stun_servers.len(),
        turn_servers = config.ice.turn_servers.len(),
        outbound_buffer = config.outbound_buffer,
        event_buffer = config.event_buffer,
        relay_buffer = config.relay_buffer,
        "Configuration loaded"
    );

    let engine = Arc::new(RtcEngine::new(config.relay_buffer)?);
    let dispatcher = SignalingDispatcher::new(config, engine);

    let server = WebSocketSignalingServer::new(args.bind_address, Arc::clone(&dispatcher));
    let handle = server.start().await?;
    info!("Server running on ws://{}. Press Ctrl+C to shutdown.", handle.local_addr());

    while !shutdown_flag.load(Ordering::SeqCst) {
        tokio::time::sleep(tokio::time::Duration::from_millis(100)).await;
    }

    info!("Shutdown signal received, cleaning up...");
    handle.shutdown().await;
    dispatcher.connections().clear().await;
    info!("Live server shut down gracefully");

    Ok(())
}

fn init_tracing() -> Result<(), Box<dyn std::error::Error>> {
    let env_filter = EnvFilter::try_from_default_env().or_else(|_| EnvFilter::try_new("info"))?;

    tracing_subscriber::registry()
        .with(env_filter)
        .with(tracing_subscriber::fmt::layer())
        .try_init()?;
    Ok(())
}
