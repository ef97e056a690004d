use std::time::Duration;

use clap::Parser;
use janus_rtc::{ClientConfig, ClientEvent, PluginFlow, Str0mFactory};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

/// Janus gateway signaling client
#[derive(Parser, Debug)]
#[command(name = "janus-rtc")]
#[command(version, about = "Join a Janus video room and subscribe to its publishers", long_about = None)]
struct Args {
    /// Gateway WebSocket URL
    #[arg(short, long, env = "JANUS_URL", default_value = janus_rtc::config::DEFAULT_GATEWAY_URL)]
    url: String,

    /// Video room to join
    #[arg(short, long, env = "JANUS_ROOM", default_value_t = 1234)]
    room: u64,

    /// Display name of the local publisher
    #[arg(short, long, env = "JANUS_DISPLAY", default_value = "janus-rtc")]
    display: String,

    /// Run the echo test instead of joining a room
    #[arg(long)]
    echo_test: bool,

    /// Seconds between session keepalives
    #[arg(long, default_value_t = 25)]
    keepalive_secs: u64,

    /// Seconds a request may wait for its first response
    #[arg(long, default_value_t = 10)]
    timeout_secs: u64,

    /// Maximum remote feeds to subscribe to (0 = unlimited)
    #[arg(long, default_value_t = 5)]
    max_subscribers: usize,

    /// Publisher bitrate cap in bits per second
    #[arg(long, default_value_t = janus_rtc::config::DEFAULT_BITRATE)]
    bitrate: u32,
}

impl Args {
    fn config(&self) -> ClientConfig {
        let flow = if self.echo_test {
            PluginFlow::EchoTest
        } else {
            PluginFlow::VideoRoom { room: self.room }
        };

        ClientConfig::new(&self.url)
            .flow(flow)
            .display(&self.display)
            .keepalive_interval(Duration::from_secs(self.keepalive_secs))
            .transaction_timeout(Duration::from_secs(self.timeout_secs))
            .max_subscribers(self.max_subscribers)
            .bitrate(self.bitrate)
    }
}

fn init_log() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).init();
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    init_log();

    let config = args.config();
    info!(url = %config.gateway_url, flow = ?config.flow, "Starting janus-rtc");

    let mut client = janus_rtc::start(config, Box::new(Str0mFactory)).await?;

    loop {
        tokio::select! {
            event = client.next_event() => match event {
                Some(ClientEvent::SessionClosed { reason }) => {
                    warn!(%reason, "Session closed");
                    break;
                }
                Some(event) => info!(?event, "Client event"),
                None => break,
            },
            _ = tokio::signal::ctrl_c() => {
                info!("Interrupted, shutting down");
                client.shutdown().await;
                return Ok(());
            }
        }
    }

    client.shutdown().await;
    Ok(())
}
