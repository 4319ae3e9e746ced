//! # ev-sender
//!
//! Mock emergency-vehicle producer for exercising a running relay. `send`
//! pushes one priority request over HTTP or WebSocket and prints the reply;
//! `simulate` posts a request with a random ETA at a fixed interval.

use anyhow::{Context, Result, anyhow, bail};
use chrono::Utc;
use clap::{Parser, Subcommand, ValueEnum};
use futures_util::{SinkExt, StreamExt};
use lib_rsu::retrieve::RelayClient;
use rand::Rng;
use serde_json::{Value, json};
use std::time::Duration;
use tokio::net::TcpStream;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async, tungstenite::Message};
use url::Url;

#[derive(Parser, Debug)]
#[command(version, about = "Sends mock EV priority requests to an RSU relay.")]
struct Cli {
    /// Base URL of the relay.
    #[arg(long, global = true, default_value = "http://localhost:3000/")]
    url: String,

    /// Vehicle id.
    #[arg(long, global = true, default_value = "EV_1")]
    ev_id: String,

    /// Target traffic light.
    #[arg(long, global = true, default_value = "tls_1")]
    tls: String,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Send a single priority request and print the response.
    Send {
        /// How to reach the relay.
        #[arg(long, value_enum, default_value_t = Transport::Http)]
        transport: Transport,

        /// Estimated seconds to the signal.
        #[arg(long, default_value_t = 12.0)]
        eta: f64,
    },
    /// Post requests with a random ETA at a fixed interval.
    Simulate {
        /// Seconds between requests.
        #[arg(long, default_value_t = 5)]
        interval: u64,

        /// Stop after this many requests (runs until interrupted otherwise).
        #[arg(long)]
        count: Option<u64>,

        /// Smallest ETA sent.
        #[arg(long, default_value_t = 10)]
        min_eta: u32,

        /// Largest ETA sent.
        #[arg(long, default_value_t = 45)]
        max_eta: u32,
    },
}

#[derive(ValueEnum, Clone, Copy, Debug, PartialEq, Eq)]
enum Transport {
    Http,
    Ws,
}

fn priority_request(ev_id: &str, tls: &str, eta: f64) -> Value {
    let mut rng = rand::rng();
    json!({
        "type": "EV_PRIORITY_REQ",
        "ev_id": ev_id,
        "timestamp": Utc::now().timestamp_millis() as f64 / 1000.0,
        "position": {
            "lat": 34.0 + rng.random::<f64>() * 0.01,
            "lon": -118.2 + rng.random::<f64>() * 0.01,
        },
        "current_edge": "edgeX",
        "next_tls": tls,
        "eta_seconds": eta,
        "speed": 12.5,
        "urgency": "CODE3",
    })
}

async fn send_http(client: &RelayClient, message: &Value) -> Result<()> {
    let response = client.send_priority(message).await?;
    match (response.success, response.data) {
        (true, Some(decision)) => {
            println!("HTTP send => status: {} decision: {}", response.status, serde_json::to_string(&decision)?);
        }
        _ => {
            println!(
                "HTTP send => status: {} error: {}",
                response.status,
                response.error_body.unwrap_or_default()
            );
        }
    }
    Ok(())
}

fn ws_url(base: &str) -> Result<Url> {
    let mut url = Url::parse(base)?;
    let scheme = match url.scheme() {
        "http" | "ws" => "ws",
        "https" | "wss" => "wss",
        other => bail!("Unsupported scheme '{}'", other),
    };
    url.set_scheme(scheme).map_err(|_| anyhow!("Cannot use scheme {} for {}", scheme, base))?;
    Ok(url.join("ws")?)
}

async fn send_ws(base: &str, message: Value) -> Result<()> {
    let url = ws_url(base)?;
    let (mut socket, _) = connect_async(url.as_str())
        .await
        .with_context(|| format!("Cannot connect to {}", url))?;
    println!("Socket connected: {}", url);

    let envelope = json!({ "event": "ev_priority", "data": message });
    socket.send(Message::Text(envelope.to_string().into())).await?;

    let reply = tokio::time::timeout(Duration::from_secs(5), wait_for_reply(&mut socket))
        .await
        .map_err(|_| anyhow!("No reply from the relay within 5s"))??;

    println!("WS send => {}", reply);
    socket.close(None).await.ok();
    Ok(())
}

// Broadcasts (including our own) arrive on the same socket; skip them.
async fn wait_for_reply(socket: &mut WebSocketStream<MaybeTlsStream<TcpStream>>) -> Result<Value> {
    while let Some(frame) = socket.next().await {
        if let Message::Text(text) = frame? {
            let value: Value = serde_json::from_str(text.as_str())?;
            if matches!(value["event"].as_str(), Some("rsu_response" | "rsu_error")) {
                return Ok(value);
            }
        }
    }
    bail!("Socket closed before the relay replied")
}

async fn simulate(client: &RelayClient, cli: &Cli, interval: u64, count: Option<u64>, min_eta: u32, max_eta: u32) -> Result<()> {
    if min_eta > max_eta {
        bail!("--min-eta must not exceed --max-eta");
    }
    let mut ticker = tokio::time::interval(Duration::from_secs(interval.max(1)));
    let mut sent = 0u64;

    while count.is_none_or(|limit| sent < limit) {
        ticker.tick().await;
        let eta = rand::rng().random_range(min_eta..=max_eta);
        let message = json!({
            "ev_id": cli.ev_id,
            "eta": eta,
            "position": {"lat": 34.00477, "lon": -118.19741},
            "next_tls": cli.tls,
        });
        println!("Sending: {}", message);
        if let Err(e) = send_http(client, &message).await {
            eprintln!("Send failed: {:#}", e);
        }
        sent += 1;
    }
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    // wss:// handshakes go through rustls
    let _ = rustls::crypto::ring::default_provider().install_default();

    let cli = Cli::parse();
    let client = RelayClient::new(&cli.url, 3)?;

    match &cli.command {
        Command::Send { transport, eta } => {
            let message = priority_request(&cli.ev_id, &cli.tls, *eta);
            println!("Sending EV message: {}", serde_json::to_string_pretty(&message)?);
            match transport {
                Transport::Http => send_http(&client, &message).await?,
                Transport::Ws => send_ws(&cli.url, message).await?,
            }
        }
        Command::Simulate { interval, count, min_eta, max_eta } => {
            simulate(&client, &cli, *interval, *count, *min_eta, *max_eta).await?;
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ws_url_follows_http_scheme() {
        assert_eq!(ws_url("http://localhost:3000/").unwrap().as_str(), "ws://localhost:3000/ws");
        assert_eq!(ws_url("https://rsu.example:8443/").unwrap().as_str(), "wss://rsu.example:8443/ws");
        assert!(ws_url("ftp://rsu.example/").is_err());
    }

    #[tokio::test]
    async fn wss_is_reachable_over_tls() {
        use tokio_tungstenite::tungstenite::{Error, error::UrlError};

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        drop(listener);

        let url = ws_url(&format!("https://127.0.0.1:{port}/")).unwrap();
        assert_eq!(url.scheme(), "wss");
        let err = connect_async(url.as_str()).await.unwrap_err();
        // Nothing listens, so the attempt must fail on the socket, not on the scheme.
        assert!(!matches!(err, Error::Url(UrlError::TlsFeatureNotEnabled)), "{err}");
        assert!(matches!(err, Error::Io(_)), "{err}");
    }

    #[test]
    fn request_matches_relay_fields() {
        let message = priority_request("EV_7", "J4", 22.0);
        assert_eq!(message["ev_id"], "EV_7");
        assert_eq!(message["next_tls"], "J4");
        assert_eq!(message["eta_seconds"], 22.0);
    }

    #[test]
    fn parses_subcommands() {
        let cli = Cli::parse_from(["ev-sender", "send", "--transport", "ws", "--eta", "30"]);
        assert!(matches!(cli.command, Command::Send { transport: Transport::Ws, eta } if eta == 30.0));

        let cli = Cli::parse_from(["ev-sender", "--ev-id", "EV_9", "simulate", "--count", "3"]);
        assert_eq!(cli.ev_id, "EV_9");
        assert!(matches!(cli.command, Command::Simulate { count: Some(3), min_eta: 10, max_eta: 45, .. }));
    }
}
