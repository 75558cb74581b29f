//! Live status feed.
//!
//! Demonstrates:
//! - Sharing the global multiplexer between several independent views
//! - Type-filtered registration
//! - Views detaching while others stay connected
//! - Watching the link status while the backend drops and comes back
//!
//! Usage:
//!   OVERLAY_ORIGIN=http://localhost:5173 cargo run --example status_feed
//!   cargo run --example status_feed -- --debug
//!   cargo run --example status_feed -- --no-wait

// ============================================================================
// Imports
// ============================================================================

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use anyhow::Context;
use overlay_link::{InboundMessage, Multiplexer};
use tracing_subscriber::EnvFilter;

// ============================================================================
// Args
// ============================================================================

/// Command-line flags.
struct Args {
    debug: bool,
    no_wait: bool,
}

impl Args {
    fn parse() -> Self {
        let args: Vec<String> = std::env::args().collect();
        Self {
            debug: args.iter().any(|a| a == "--debug"),
            no_wait: args.iter().any(|a| a == "--no-wait"),
        }
    }
}

// ============================================================================
// Main
// ============================================================================

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    init_logging(args.debug);

    println!("=== Status Feed ===\n");

    let mux = Multiplexer::global();
    let received = Arc::new(AtomicUsize::new(0));

    // ========================================================================
    // Attach Views
    // ========================================================================

    let counter = Arc::clone(&received);
    let _feed = mux
        .register(move |message: &InboundMessage| {
            counter.fetch_add(1, Ordering::Relaxed);
            println!("[feed]   {}", message.kind().unwrap_or("<untyped>"));
        })
        .context("register feed view")?;

    let _queue = mux
        .register_for("tts.queued", |message: &InboundMessage| {
            let text = message.get("text").and_then(|v| v.as_str()).unwrap_or("");
            println!("[queue]  {text}");
        })
        .context("register queue view")?;

    let avatar = mux
        .register_for("avatar.changed", |_: &InboundMessage| {
            println!("[avatar] refresh");
        })
        .context("register avatar view")?;

    println!("[Setup] 3 views attached, one shared connection");

    // ========================================================================
    // Detach One View
    // ========================================================================

    tokio::time::sleep(Duration::from_secs(2)).await;
    avatar.unregister();
    println!("[Setup] avatar view detached, link stays up\n");

    // ========================================================================
    // Watch Status
    // ========================================================================

    if args.no_wait {
        println!("[--no-wait] {:?}", mux.status());
        return Ok(());
    }

    println!("Press Ctrl+C to exit...");
    let mut ticker = tokio::time::interval(Duration::from_secs(5));
    loop {
        tokio::select! {
            _ = ticker.tick() => {
                let status = mux.status();
                println!(
                    "[status] {} | listeners={} reconnect_pending={} received={}",
                    status.state,
                    status.listeners,
                    status.reconnect_pending,
                    received.load(Ordering::Relaxed),
                );
            }
            _ = tokio::signal::ctrl_c() => break,
        }
    }

    Ok(())
}

/// Initialize tracing/logging.
fn init_logging(debug: bool) {
    let filter = if debug {
        "overlay_link=debug"
    } else {
        "overlay_link=info"
    };

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::new(filter))
        .with_target(false)
        .init();
}
