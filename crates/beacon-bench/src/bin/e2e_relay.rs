//! End-to-end relay benchmark for Beacon.
//!
//! Clients connect in pairs and fire offers at each other through a running
//! server, counting every forwarded frame that comes back over the socket.

use futures_util::{SinkExt, StreamExt};
use serde_json::json;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Barrier;
use tokio_tungstenite::{connect_async, tungstenite::Message};

const SERVER_URL: &str = "ws://127.0.0.1:8080/ws/signal";
const WARMUP_SECS: u64 = 2;
const BENCH_SECS: u64 = 10;

#[tokio::main]
async fn main() {
    let args: Vec<String> = std::env::args().collect();
    let num_pairs: usize = args.get(1).and_then(|s| s.parse().ok()).unwrap_or(8);
    let base_url = args.get(2).cloned().unwrap_or_else(|| SERVER_URL.to_string());

    println!("╔══════════════════════════════════════════════════════════════╗");
    println!("║           Beacon End-to-End Relay Benchmark                  ║");
    println!("╠══════════════════════════════════════════════════════════════╣");
    println!("║  Make sure the server is running: cargo run --release        ║");
    println!("╚══════════════════════════════════════════════════════════════╝");
    println!();

    run_relay_benchmark(num_pairs, base_url).await;
}

fn address(client_id: usize) -> String {
    format!("+1555{client_id:07}")
}

async fn run_relay_benchmark(num_pairs: usize, base_url: String) {
    let num_clients = num_pairs * 2;
    println!("📊 Relay Benchmark: {} pairs ({} clients)", num_pairs, num_clients);
    println!("   Target: {}", base_url);
    println!("   Warmup: {}s, Measurement: {}s", WARMUP_SECS, BENCH_SECS);
    println!();

    let message_count = Arc::new(AtomicU64::new(0));
    let barrier = Arc::new(Barrier::new(num_clients + 1));

    let mut handles = Vec::new();

    for client_id in 0..num_clients {
        let msg_count = Arc::clone(&message_count);
        let barrier = Arc::clone(&barrier);
        let url = format!("{}/{}", base_url, address(client_id));
        // Partners are adjacent ids: 0<->1, 2<->3, ...
        let partner = address(client_id ^ 1);

        let handle = tokio::spawn(async move {
            if let Err(e) = run_client(url, partner, msg_count, barrier).await {
                eprintln!("Client {} error: {}", client_id, e);
            }
        });
        handles.push(handle);
    }

    // Wait for all clients to connect
    barrier.wait().await;
    println!("✓ All {} clients connected", num_clients);

    println!("⏳ Warming up for {}s...", WARMUP_SECS);
    tokio::time::sleep(Duration::from_secs(WARMUP_SECS)).await;

    message_count.store(0, Ordering::SeqCst);
    let start = Instant::now();

    println!("📈 Measuring for {}s...", BENCH_SECS);
    tokio::time::sleep(Duration::from_secs(BENCH_SECS)).await;

    let elapsed = start.elapsed();
    let total_messages = message_count.load(Ordering::SeqCst);

    let msgs_per_sec = total_messages as f64 / elapsed.as_secs_f64();
    let msgs_per_sec_per_client = msgs_per_sec / num_clients as f64;

    println!();
    println!("╔══════════════════════════════════════════════════════════════╗");
    println!("║                         RESULTS                              ║");
    println!("╠══════════════════════════════════════════════════════════════╣");
    println!(
        "║  Clients:              {:>10}                           ║",
        num_clients
    );
    println!(
        "║  Duration:             {:>10.2}s                          ║",
        elapsed.as_secs_f64()
    );
    println!(
        "║  Relayed Signals:      {:>10}                           ║",
        total_messages
    );
    println!(
        "║  Throughput:           {:>10.0} msg/s                    ║",
        msgs_per_sec
    );
    println!(
        "║  Per-Client:           {:>10.0} msg/s                    ║",
        msgs_per_sec_per_client
    );
    println!("╚══════════════════════════════════════════════════════════════╝");

    for handle in handles {
        handle.abort();
    }
}

async fn run_client(
    url: String,
    partner: String,
    message_count: Arc<AtomicU64>,
    barrier: Arc<Barrier>,
) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let (ws, _) = connect_async(url.as_str()).await?;
    let (mut sender, mut receiver) = ws.split();

    // Canonical addresses resolve without registration, so no setup beyond
    // the upgrade is needed before signaling.
    barrier.wait().await;

    let offer = json!({
        "type": "offer",
        "target": partner,
        "payload": { "sdp": "v=0\r\no=- 0 0 IN IP4 127.0.0.1\r\ns=-\r\n" },
    });
    let offer_msg = Message::Text(offer.to_string());

    let recv_count = message_count.clone();
    let recv_task = tokio::spawn(async move {
        while let Some(result) = receiver.next().await {
            match result {
                Ok(Message::Text(_)) | Ok(Message::Binary(_)) => {
                    recv_count.fetch_add(1, Ordering::Relaxed);
                }
                Ok(Message::Close(_)) | Err(_) => break,
                Ok(_) => {}
            }
        }
    });

    loop {
        if sender.send(offer_msg.clone()).await.is_err() {
            break;
        }
        // Small yield to not starve the receiver task
        tokio::task::yield_now().await;
    }

    recv_task.abort();
    Ok(())
}
