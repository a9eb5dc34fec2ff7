//! End-to-end throughput benchmark for Lobby.
//!
//! Drives a running server with real WebSocket clients chatting in one
//! room, counting `newMessage` deliveries.
//!
//! ```bash
//! LOBBY_AUTH__JWT_SECRET=change-me e2e_throughput [clients] [url]
//! ```

use bytes::BytesMut;
use futures_util::{SinkExt, StreamExt};
use jsonwebtoken::{encode, EncodingKey, Header};
use lobby_protocol::{codec, ClientEvent, ServerEvent, PROTOCOL_VERSION};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Barrier;
use tokio_tungstenite::{connect_async, tungstenite::Message};

const DEFAULT_URL: &str = "ws://127.0.0.1:8080/ws";
const ROOM: &str = "general";
const WARMUP_SECS: u64 = 2;
const BENCH_SECS: u64 = 10;

type BoxError = Box<dyn std::error::Error + Send + Sync>;

#[derive(Default)]
struct Counters {
    messages: AtomicU64,
    presence: AtomicU64,
    errors: AtomicU64,
}

#[tokio::main]
async fn main() {
    let args: Vec<String> = std::env::args().collect();
    let num_clients = args.get(1).and_then(|s| s.parse().ok()).unwrap_or(16);
    let url = args.get(2).cloned().unwrap_or_else(|| DEFAULT_URL.to_string());

    let Ok(secret) = std::env::var("LOBBY_AUTH__JWT_SECRET") else {
        eprintln!("Set LOBBY_AUTH__JWT_SECRET to the server's signing secret");
        std::process::exit(2);
    };

    println!("╔══════════════════════════════════════════════════════════════╗");
    println!("║         Lobby End-to-End Throughput Benchmark                ║");
    println!("╠══════════════════════════════════════════════════════════════╣");
    println!("║  Make sure the server is running: cargo run --release        ║");
    println!("╚══════════════════════════════════════════════════════════════╝");
    println!();

    run_chat_benchmark(num_clients, &url, &secret).await;
}

async fn run_chat_benchmark(num_clients: usize, url: &str, secret: &str) {
    println!("📊 Chat Benchmark: {} clients in '{}'", num_clients, ROOM);
    println!("   Warmup: {}s, Measurement: {}s", WARMUP_SECS, BENCH_SECS);
    println!();

    let counters = Arc::new(Counters::default());
    let barrier = Arc::new(Barrier::new(num_clients + 1));

    let mut handles = Vec::new();

    for client_id in 0..num_clients {
        let counters = Arc::clone(&counters);
        let barrier = Arc::clone(&barrier);
        let url = url.to_string();
        let token = match sign_token(client_id, secret) {
            Ok(token) => token,
            Err(e) => {
                eprintln!("Failed to sign token: {}", e);
                return;
            }
        };

        let handle = tokio::spawn(async move {
            if let Err(e) = run_client(&url, &token, counters, barrier).await {
                eprintln!("Client {} error: {}", client_id, e);
            }
        });
        handles.push(handle);
    }

    // Wait for all clients to join
    barrier.wait().await;
    println!("✓ All {} clients joined", num_clients);

    println!("⏳ Warming up for {}s...", WARMUP_SECS);
    tokio::time::sleep(Duration::from_secs(WARMUP_SECS)).await;

    counters.messages.store(0, Ordering::SeqCst);
    counters.presence.store(0, Ordering::SeqCst);
    let start = Instant::now();

    println!("📈 Measuring for {}s...", BENCH_SECS);
    tokio::time::sleep(Duration::from_secs(BENCH_SECS)).await;

    let elapsed = start.elapsed();
    let total_messages = counters.messages.load(Ordering::SeqCst);
    let msgs_per_sec = total_messages as f64 / elapsed.as_secs_f64();

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
        "║  Messages Delivered:   {:>10}                           ║",
        total_messages
    );
    println!(
        "║  Presence Events:      {:>10}                           ║",
        counters.presence.load(Ordering::SeqCst)
    );
    println!(
        "║  Error Events:         {:>10}                           ║",
        counters.errors.load(Ordering::SeqCst)
    );
    println!(
        "║  Throughput:           {:>10.0} msg/s                    ║",
        msgs_per_sec
    );
    println!(
        "║  Per-Client:           {:>10.0} msg/s                    ║",
        msgs_per_sec / num_clients as f64
    );
    println!("╚══════════════════════════════════════════════════════════════╝");

    for handle in handles {
        handle.abort();
    }
}

fn sign_token(client_id: usize, secret: &str) -> Result<String, BoxError> {
    let claims = serde_json::json!({
        "userId": client_id,
        "username": format!("bench-{client_id}"),
    });
    Ok(encode(
        &Header::default(),
        &claims,
        &EncodingKey::from_secret(secret.as_bytes()),
    )?)
}

async fn run_client(
    url: &str,
    token: &str,
    counters: Arc<Counters>,
    barrier: Arc<Barrier>,
) -> Result<(), BoxError> {
    let (ws, _) = connect_async(url).await?;
    let (mut sender, mut receiver) = ws.split();

    // The handshake is always JSON
    match receiver.next().await {
        Some(Ok(Message::Text(text))) => {
            if let ServerEvent::Connected { version, .. } = codec::decode_text(&text)? {
                if !PROTOCOL_VERSION.is_compatible_with(&version) {
                    return Err(format!("incompatible server protocol {version}").into());
                }
            }
        }
        other => return Err(format!("expected connected event, got {other:?}").into()),
    }

    // From here on everything is binary
    for event in [ClientEvent::authenticate(token), ClientEvent::join_room(ROOM)] {
        let data = codec::encode(&event)?;
        sender.send(Message::Binary(data.to_vec())).await?;
    }

    let mut recv_buf = BytesMut::with_capacity(65536);
    wait_for_room(&mut receiver, &mut recv_buf).await?;

    barrier.wait().await;

    let message = codec::encode(&ClientEvent::send_message("benchmark payload"))?;
    let message = Message::Binary(message.to_vec());

    let recv_task = tokio::spawn(async move {
        while let Some(result) = receiver.next().await {
            if let Ok(Message::Binary(data)) = result {
                recv_buf.extend_from_slice(&data);
                while let Ok(Some(event)) = codec::decode_from::<ServerEvent>(&mut recv_buf) {
                    let counter = match &event {
                        ServerEvent::NewMessage(_) => &counters.messages,
                        event if event.is_presence() => &counters.presence,
                        ServerEvent::Error(_) => &counters.errors,
                        _ => continue,
                    };
                    counter.fetch_add(1, Ordering::Relaxed);
                }
            }
        }
    });

    // Send loop - no waiting, just blast messages
    loop {
        if sender.send(message.clone()).await.is_err() {
            break;
        }
        // Small yield to not starve the receiver task
        tokio::task::yield_now().await;
    }

    recv_task.abort();
    Ok(())
}

/// Read until the roster snapshot for the joined room arrives.
async fn wait_for_room<S>(receiver: &mut S, buf: &mut BytesMut) -> Result<(), BoxError>
where
    S: futures_util::Stream<Item = Result<Message, tokio_tungstenite::tungstenite::Error>>
        + Unpin,
{
    while let Some(result) = receiver.next().await {
        let Message::Binary(data) = result? else {
            continue;
        };
        buf.extend_from_slice(&data);
        while let Some(event) = codec::decode_from::<ServerEvent>(buf)? {
            match event {
                ServerEvent::RoomUsers(_) => return Ok(()),
                ServerEvent::Error(reason) => return Err(reason.into()),
                _ => {}
            }
        }
    }
    Err("connection closed before joining".into())
}
