use chrono::{Duration, Utc};
use clap::Parser;
use futures_util::StreamExt;
use serde::Deserialize;
use serde_json::Value;
use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};
use tokio::time::sleep;
use tokio_tungstenite::{connect_async, tungstenite::protocol::Message};

#[derive(Parser, Debug)]
#[clap(author, version, about = "Subscribes to a running relay and reports frame rates per EV.", long_about = None)]
struct Args {
    /// Relay WebSocket endpoint
    #[clap(short, long, default_value = "ws://localhost:3000/ws")]
    url: String,

    /// Report interval in seconds
    #[clap(short, long, default_value_t = 60)]
    report_interval_seconds: u64,
}

#[derive(Debug, Deserialize)]
struct Envelope {
    event: String,
    data: Value,
}

#[derive(Default)]
struct Stats {
    events: VecDeque<chrono::DateTime<Utc>>,
    decisions: VecDeque<chrono::DateTime<Utc>>,
    per_ev: HashMap<String, VecDeque<chrono::DateTime<Utc>>>,
}

fn prune(queue: &mut VecDeque<chrono::DateTime<Utc>>, cutoff: chrono::DateTime<Utc>) {
    while queue.front().is_some_and(|&t| t < cutoff) {
        queue.pop_front();
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    let stats = Arc::new(Mutex::new(Stats::default()));

    let stats_reporter = Arc::clone(&stats);
    let interval = args.report_interval_seconds.max(1);
    tokio::spawn(async move {
        loop {
            sleep(std::time::Duration::from_secs(interval)).await;
            let one_minute_ago = Utc::now() - Duration::minutes(1);

            let Ok(mut data) = stats_reporter.lock() else { return };
            prune(&mut data.events, one_minute_ago);
            prune(&mut data.decisions, one_minute_ago);

            let mut rates: Vec<(String, usize)> = Vec::new();
            for (ev_id, dq) in data.per_ev.iter_mut() {
                prune(dq, one_minute_ago);
                if !dq.is_empty() {
                    rates.push((ev_id.clone(), dq.len()));
                }
            }
            rates.sort_by(|a, b| b.1.cmp(&a.1));

            let report = rates
                .iter()
                .map(|(ev, r)| format!("{}: {} msg/min", ev, r))
                .collect::<Vec<_>>()
                .join(", ");

            println!("\n----- 1-Minute Summary -----");
            println!("ev_event: {} msg/min", data.events.len());
            println!("rsu_decision: {} msg/min", data.decisions.len());
            println!("EVs: {}", if report.is_empty() { "No data" } else { &report });
            println!("----------------------------\n");
        }
    });

    println!("Connecting to {}...", args.url);
    let (ws_stream, _) = connect_async(args.url.as_str()).await?;
    let (_write, mut read) = ws_stream.split();
    println!("Subscribed. Press Ctrl+C to stop.");

    while let Some(Ok(msg)) = read.next().await {
        let Message::Text(text) = msg else { continue };
        let Ok(envelope) = serde_json::from_str::<Envelope>(text.as_str()) else { continue };
        let now = Utc::now();
        let Ok(mut data) = stats.lock() else { break };
        match envelope.event.as_str() {
            "ev_event" => {
                data.events.push_back(now);
                if let Some(ev_id) = envelope.data["ev_id"].as_str() {
                    data.per_ev.entry(ev_id.to_string()).or_default().push_back(now);
                }
            }
            "rsu_decision" => data.decisions.push_back(now),
            _ => {}
        }
    }
    println!("Relay closed the connection.");
    Ok(())
}
