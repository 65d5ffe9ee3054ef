//! Countdown example: trip the limit, then watch the block run out.
//!
//! Uses a short block so the whole cycle finishes in a few seconds:
//!
//! ```text
//! cargo run --example countdown
//! ```

use std::time::Duration;
use tracing_subscriber::prelude::*;
use visit_throttle::{
    AdmissionController, Clock, CountdownTicker, MemoryStore, TickerConfig, VisitKind,
    VisitObserver, VisitRecord,
};

#[tokio::main]
async fn main() {
    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer())
        .init();

    println!("=== Countdown Example ===\n");
    println!("Policy: 5 visits per minute, 5 second block\n");

    let store = MemoryStore::new();
    let controller = AdmissionController::builder()
        .with_max_requests_per_minute(5)
        .with_block_duration(Duration::from_secs(5))
        .build(store.clone())
        .expect("valid policy");
    let observer = VisitObserver::builder()
        .build(store, controller.clone())
        .expect("valid observer config");

    for i in 1..=6 {
        let now = controller.clock().now_millis();
        let kind = VisitKind::from_navigation_type(Some("reload"));
        let result = observer.record_visit(VisitRecord::new("/feed", kind, now));
        println!(
            "Visit {}: {}",
            i,
            if result.allowed { "admitted" } else { "blocked" }
        );
    }

    let snapshot = observer.visit_stats(controller.clock().now_millis());
    println!(
        "\nVisits in the last 5 minutes: {} (suspicious: {})\n",
        snapshot.recent_visits, snapshot.suspicious
    );

    let (done_tx, done_rx) = tokio::sync::oneshot::channel();
    let mut done_tx = Some(done_tx);
    let handle = CountdownTicker::new(controller.clone(), TickerConfig::default()).start(
        move |result| {
            if result.allowed {
                println!("Block over, admission reopened");
                if let Some(tx) = done_tx.take() {
                    let _ = tx.send(());
                }
            } else {
                println!(
                    "Blocked, {} remaining ({:.0}% served)",
                    result.formatted_remaining(),
                    result.progress(5_000) * 100.0
                );
            }
        },
    );

    let _ = done_rx.await;
    handle.shutdown().await.expect("countdown task failed");

    let metrics = controller.metrics().snapshot();
    println!("\n=== Example Complete ===");
    println!(
        "Admitted: {}, denied: {}, blocks: {}",
        metrics.admitted, metrics.denied, metrics.blocks_started
    );
}
