//! cluster-router - Gossip Membership Node
//!
//! This is the composition root that wires together all the components.

use cluster_router::adapters::outbound::{HostPreparer, MemoryNetwork, SystemClock};
use cluster_router::config::load_config;
use cluster_router::infrastructure::{shutdown_signal, ShutdownController};
use cluster_router::routing::{Index, Router, Selector, View};
use cluster_router::Clock;
use std::sync::Arc;
use tokio::sync::broadcast::error::RecvError;
use tracing_subscriber::fmt::format::FmtSpan;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load configuration from environment
    let cfg = load_config()?;

    // Setup logging
    let log_level = if cfg.debug {
        tracing::Level::DEBUG
    } else {
        tracing::Level::INFO
    };

    tracing_subscriber::fmt()
        .with_max_level(log_level)
        .with_span_events(FmtSpan::CLOSE)
        .init();

    tracing::info!(
        "starting cluster-router peer={} topic={} ttl={}ms",
        cfg.peer_id,
        cfg.topic,
        cfg.ttl_ms
    );

    // ===== COMPOSITION ROOT =====

    // 1. Outbound adapters
    let network = MemoryNetwork::new();
    let topic = Arc::new(network.join(&cfg.topic, cfg.peer()));
    let router_cfg = cfg.router();
    let clock = Arc::new(SystemClock::new(router_cfg.tick_interval));
    let preparer = Arc::new(HostPreparer::new(cfg.hostname.clone(), cfg.meta()));

    // 2. Router
    let router = Router::builder(topic)
        .clock(clock.clone())
        .preparer(preparer)
        .config(router_cfg)
        .build()?;
    router.bootstrap().await?;
    tracing::info!("instance {} bootstrapped", router.instance_id());

    // 3. Report the view until asked to stop
    let shutdown = ShutdownController::new();
    tokio::spawn(shutdown_signal(shutdown.clone()));

    let mut ticks = clock.subscribe();
    let view = router.view();
    loop {
        tokio::select! {
            _ = shutdown.cancelled() => break,
            tick = ticks.recv() => {
                if let Err(RecvError::Closed) = tick {
                    break;
                }
                report(&view);
            }
        }
    }

    router.close().await;
    Ok(())
}

fn report(view: &View) {
    let records = match view.iter(Selector::select(Index::peer_prefix("")), &[]) {
        Ok(iter) => iter,
        Err(e) => {
            tracing::error!("query failed: {}", e);
            return;
        }
    };

    let peers: Vec<serde_json::Value> = records
        .map(|rec| {
            serde_json::json!({
                "peer": rec.peer().to_string(),
                "server": rec.server().to_string(),
                "seq": rec.seq(),
                "ttl_ms": rec.ttl().as_millis() as u64,
                "host": rec.host().unwrap_or_default(),
                "meta": rec.meta().map(|m| m.into_inner()).unwrap_or_default(),
            })
        })
        .collect();

    tracing::info!("view: {}", serde_json::Value::Array(peers));
}
