//! Minimal end-to-end bridge: connect to a local endpoint, register a gift
//! mapping, and print status pushes.
//!
//! Run with: `cargo run -p pulsebridge-gateway --example bridge`

use pulsebridge_core::{BridgeConfig, Condition, CompareOp, Mapping};
use pulsebridge_gateway::Bridge;
use serde_json::json;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,pulsebridge_client=debug".into()),
        )
        .init();

    let bridge = Bridge::builder()
        .with_config(BridgeConfig::default())
        .build()?;

    bridge.engine().register(
        Mapping::new(
            "gift",
            "vibrate",
            "pulse",
            json!({"level": "${min(coins / 10, 20)}", "from": "{user}"}),
        )
        .with_name("gift-pulse")
        .with_condition(Condition::Threshold {
            field: "coins".into(),
            op: CompareOp::Ge,
            value: 10.0,
        })
        .with_cooldown_ms(2_000),
    )?;

    bridge.start();

    let mut status = bridge.subscribe_status();
    while let Ok(snapshot) = status.recv().await {
        println!(
            "[{}] queue={} dlq={} rate={:.1}/s ok={} failed={}",
            snapshot.connection_state,
            snapshot.queue_depth,
            snapshot.dead_letter_depth,
            snapshot.current_rate,
            snapshot.stats.total_success,
            snapshot.stats.total_failed,
        );
    }
    Ok(())
}
