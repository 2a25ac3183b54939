//! STUN responder for federation connectivity checks.
//!
//! Binds a UDP socket, answers binding requests through a
//! [`Participant`], and logs everything else it receives.

use anyhow::Context;
use bytes::Bytes;
use clap::Parser;
use federation_stun::{
    Disposition, Message, Participant, ParticipantConfig, StunError, StunObserver, StunSender,
};
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::UdpSocket;
use tokio::sync::mpsc;
use tracing::info;
use tracing_subscriber::EnvFilter;

mod config;
mod logging;

use config::ResponderConfig;
use logging::FederationLogFormatter;

/// Largest datagram accepted
const MAX_DATAGRAM_SIZE: usize = 65_535;

/// STUN binding responder
#[derive(Parser, Debug)]
#[command(name = "stun-responder", version, about = "STUN binding responder for repository federation")]
struct Args {
    /// Configuration file path
    #[arg(long, default_value = "config.yaml")]
    config: PathBuf,

    /// Listen address, e.g. 0.0.0.0:3478
    #[arg(long)]
    listen: Option<SocketAddr>,

    /// Local short-term credential username
    #[arg(long)]
    username: Option<String>,

    /// Local short-term credential password
    #[arg(long)]
    password: Option<String>,

    /// Statistics interval, e.g. 30s
    #[arg(long)]
    stats_interval: Option<humantime::Duration>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "info")]
    log_level: String,
}

impl Args {
    /// Command line flags take precedence over file and environment
    fn apply(&self, config: &mut ResponderConfig) {
        if let Some(listen) = self.listen {
            config.listen_addr = listen.to_string();
        }
        if self.username.is_some() {
            config.username = self.username.clone();
        }
        if self.password.is_some() {
            config.password = self.password.clone();
        }
        if let Some(interval) = &self.stats_interval {
            config.stats_interval = **interval;
        }
    }
}

/// Responder counters
#[derive(Debug, Default)]
struct Stats {
    received: AtomicU64,
    dropped: AtomicU64,
    answered: AtomicU64,
    rejected: AtomicU64,
    observed: AtomicU64,
}

impl Stats {
    fn record(&self, disposition: &Disposition) {
        let counter = match disposition {
            Disposition::Answered => &self.answered,
            Disposition::Rejected(_) => &self.rejected,
            Disposition::Observed(_) => &self.observed,
        };
        counter.fetch_add(1, Ordering::Relaxed);
    }

    fn log(&self) {
        component_info!(
            "stats",
            "received={} dropped={} answered={} rejected={} observed={}",
            self.received.load(Ordering::Relaxed),
            self.dropped.load(Ordering::Relaxed),
            self.answered.load(Ordering::Relaxed),
            self.rejected.load(Ordering::Relaxed),
            self.observed.load(Ordering::Relaxed)
        );
    }
}

/// Serializes messages and hands them to the socket writer task
struct ChannelSender {
    tx: mpsc::UnboundedSender<(SocketAddr, Bytes)>,
}

impl StunSender for ChannelSender {
    fn send(&self, destination: SocketAddr, mut message: Message) -> Result<(), StunError> {
        let bytes = message.serialize()?;
        self.tx
            .send((destination, bytes))
            .map_err(|e| StunError::Send(e.to_string()))
    }
}

/// Logs inbound indications and responses
struct LoggingObserver;

impl StunObserver for LoggingObserver {
    fn indication(&self, remote: SocketAddr, message: &Message) {
        component_debug!(
            "ice",
            "Indication {} from {}",
            message.transaction_id(),
            remote
        );
    }

    fn success_response(&self, remote: SocketAddr, message: &Message) {
        component_info!(
            "ice",
            "Binding success {} from {}, mapped address {:?}",
            message.transaction_id(),
            remote,
            message.get_mapped_address()
        );
    }

    fn error_response(&self, remote: SocketAddr, message: &Message) {
        component_warn!(
            "ice",
            "Error response {} from {}: {:?} {}",
            message.transaction_id(),
            remote,
            message.get_error_code(),
            message.get_error_reason().unwrap_or_default()
        );
    }
}

/// Bound responder, ready to run
struct Responder {
    socket: Arc<UdpSocket>,
    participant: Participant<ChannelSender, LoggingObserver>,
    outbound: mpsc::UnboundedReceiver<(SocketAddr, Bytes)>,
    stats: Arc<Stats>,
}

impl Responder {
    async fn bind(addr: SocketAddr, config: ParticipantConfig) -> anyhow::Result<Self> {
        let socket = UdpSocket::bind(addr)
            .await
            .with_context(|| format!("failed to bind {}", addr))?;
        let (tx, outbound) = mpsc::unbounded_channel();

        Ok(Self {
            socket: Arc::new(socket),
            participant: Participant::with_observer(config, ChannelSender { tx }, LoggingObserver),
            outbound,
            stats: Arc::new(Stats::default()),
        })
    }

    fn local_addr(&self) -> anyhow::Result<SocketAddr> {
        Ok(self.socket.local_addr()?)
    }

    fn stats(&self) -> Arc<Stats> {
        self.stats.clone()
    }

    /// Receive until the socket fails
    async fn run(self) -> anyhow::Result<()> {
        let Responder {
            socket,
            participant,
            outbound,
            stats,
        } = self;

        tokio::spawn(write_outbound(socket.clone(), outbound));

        let mut buf = vec![0u8; MAX_DATAGRAM_SIZE];
        loop {
            let (len, remote) = socket
                .recv_from(&mut buf)
                .await
                .context("receive failed")?;
            stats.received.fetch_add(1, Ordering::Relaxed);

            let message = match Message::deserialize(Bytes::copy_from_slice(&buf[..len])) {
                Ok(message) => message,
                Err(e) => {
                    component_debug!("udp", "Dropping {} bytes from {}: {}", len, remote, e);
                    stats.dropped.fetch_add(1, Ordering::Relaxed);
                    continue;
                }
            };

            match participant.receive(remote, &message) {
                Ok(disposition) => stats.record(&disposition),
                Err(e) => component_warn!("udp", "Failed to answer {}: {}", remote, e),
            }
        }
    }
}

/// Owns the send side of the socket
async fn write_outbound(
    socket: Arc<UdpSocket>,
    mut outbound: mpsc::UnboundedReceiver<(SocketAddr, Bytes)>,
) {
    while let Some((destination, bytes)) = outbound.recv().await {
        if let Err(e) = socket.send_to(&bytes, destination).await {
            component_warn!("udp", "Send to {} failed: {}", destination, e);
        }
    }
}

async fn log_stats(stats: Arc<Stats>, period: Duration) {
    let mut interval = tokio::time::interval(period.max(Duration::from_secs(1)));
    // first tick completes immediately
    interval.tick().await;
    loop {
        interval.tick().await;
        stats.log();
    }
}

#[tokio::main(flavor = "multi_thread")]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info"))
        .add_directive(format!("stun_responder={}", args.log_level).parse()?)
        .add_directive(format!("federation_stun={}", args.log_level).parse()?);

    tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_target(false)
        .event_format(FederationLogFormatter::new("stun"))
        .init();

    info!("Starting STUN responder v{}", env!("CARGO_PKG_VERSION"));

    let mut config = ResponderConfig::load_from_file(&args.config);
    args.apply(&mut config);

    let listen_addr = config.listen_addr()?;
    let participant_config = config.participant_config();
    info!(
        "Final responder configuration: listen={}, credentials={}, stats_interval={}",
        listen_addr,
        participant_config.credentials.is_some(),
        humantime::format_duration(config.stats_interval)
    );

    let responder = Responder::bind(listen_addr, participant_config).await?;
    component_info!("udp", "Listening on {}", responder.local_addr()?);

    let stats = responder.stats();
    tokio::spawn(log_stats(stats.clone(), config.stats_interval));

    tokio::select! {
        result = responder.run() => result?,
        _ = tokio::signal::ctrl_c() => {
            info!("Shutting down");
            stats.log();
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use federation_stun::{Attribute, Class, Credentials};

    async fn spawn_responder(config: ParticipantConfig) -> (SocketAddr, Arc<Stats>) {
        let responder = Responder::bind("127.0.0.1:0".parse().unwrap(), config)
            .await
            .unwrap();
        let addr = responder.local_addr().unwrap();
        let stats = responder.stats();
        tokio::spawn(responder.run());
        (addr, stats)
    }

    async fn exchange(server: SocketAddr, payload: &[u8]) -> (UdpSocket, Message) {
        let client = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        client.send_to(payload, server).await.unwrap();

        let mut buf = vec![0u8; MAX_DATAGRAM_SIZE];
        let (len, _) = tokio::time::timeout(Duration::from_secs(5), client.recv_from(&mut buf))
            .await
            .unwrap()
            .unwrap();
        let message = Message::deserialize(Bytes::copy_from_slice(&buf[..len])).unwrap();
        (client, message)
    }

    /// Counters are bumped after the response is queued
    async fn settle(counter: &AtomicU64, expected: u64) {
        for _ in 0..100 {
            if counter.load(Ordering::Relaxed) == expected {
                return;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert_eq!(counter.load(Ordering::Relaxed), expected);
    }

    #[tokio::test]
    async fn test_binding_over_udp() {
        let (server, stats) = spawn_responder(ParticipantConfig::default()).await;

        let mut request = Message::binding_request();
        request.append_attribute(Attribute::fingerprint());
        let (client, response) = exchange(server, &request.serialize().unwrap()).await;

        assert_eq!(response.class(), Class::SuccessResponse);
        assert_eq!(response.transaction_id(), request.transaction_id());
        assert_eq!(response.get_mapped_address(), Some(client.local_addr().unwrap()));
        settle(&stats.answered, 1).await;
    }

    #[tokio::test]
    async fn test_garbage_dropped_then_credentials_enforced() {
        let config = ParticipantConfig {
            credentials: Some(Credentials {
                username: "repo1".to_string(),
                password: "pw".to_string(),
            }),
        };
        let (server, stats) = spawn_responder(config).await;

        let garbage = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        garbage.send_to(b"not stun at all", server).await.unwrap();

        let mut request = Message::binding_request();
        request.append_attribute(Attribute::fingerprint());
        let (_, response) = exchange(server, &request.serialize().unwrap()).await;

        assert_eq!(response.class(), Class::ErrorResponse);
        assert_eq!(response.get_error_code(), Some(400));
        settle(&stats.rejected, 1).await;
        settle(&stats.dropped, 1).await;
    }

    #[test]
    fn test_flags_override_config() {
        let args = Args::parse_from([
            "stun-responder",
            "--listen",
            "127.0.0.1:4000",
            "--username",
            "repo9",
            "--stats-interval",
            "5s",
        ]);

        let mut config = ResponderConfig::default();
        args.apply(&mut config);
        assert_eq!(config.listen_addr, "127.0.0.1:4000");
        assert_eq!(config.username.as_deref(), Some("repo9"));
        assert_eq!(config.password, None);
        assert_eq!(config.stats_interval, Duration::from_secs(5));
    }
}
