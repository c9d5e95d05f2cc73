use std::sync::Arc;

use axum::Router;
use axum::routing::get;
use parkbeat_relay_appstate::AppState;
use parkbeat_relay_cleanup::spawn_cleanup_loop;
use parkbeat_relay_cli::CliArgs;
use parkbeat_relay_kv::{KvStore, MemoryKvStore, RedisKvStore};
use parkbeat_relay_sockets::spawn_heartbeat;
use parkbeat_relay_store::MemoryProjectStore;
use parkbeat_relay_types::RelayResult;
use parkbeat_relay_types::errors::RelayError;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::{info, warn};

pub mod backstage;
pub mod telemetry;

/// Builds the shared state and the full router, and spawns the instance's
/// background tasks (heartbeat sweeper, cleanup drain loop).
pub fn configure_server(args: &CliArgs) -> RelayResult<(Router, AppState)> {
    let kv = build_kv(args)?;
    let state = AppState::builder()
        .with_kv(kv)
        .with_store(Arc::new(MemoryProjectStore::new()))
        .with_outbound_capacity(args.tuning.outbound_channel_capacity)
        .with_recency_window_ms(args.tuning.recency_window_ms)
        .build();

    if args.database_url.is_some() && !args.memory {
        // the relational backend plugs into the same ProjectStore seam; this
        // build ships the reference in-process store
        warn!("DATABASE_URL is set but this build uses the in-process project store");
    }

    spawn_heartbeat(
        state.connections.clone(),
        state.cleanup.clone(),
        args.tuning.heartbeat_interval(),
    );
    spawn_cleanup_loop(state.cleanup.clone(), args.tuning.cleanup_drain_interval());

    let router = Router::new()
        .merge(parkbeat_relay_handlers::router())
        .nest(
            "/internal-backstage",
            Router::new().route("/metrics", get(backstage::render_prometheus_metrics)),
        )
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state.clone());

    Ok((router, state))
}

fn build_kv(args: &CliArgs) -> RelayResult<Arc<dyn KvStore>> {
    if args.memory {
        info!("Running with the in-process KV store (single instance mode)");
        return Ok(Arc::new(MemoryKvStore::new()));
    }
    match (args.redis.cluster_urls(), args.redis.to_url()) {
        (Some(urls), _) => Ok(Arc::new(RedisKvStore::new_with_cluster(
            urls,
            args.redis.read_timeout(),
            args.redis.write_timeout(),
        )?)),
        (None, Some(url)) => Ok(Arc::new(RedisKvStore::new(
            &url,
            args.redis.read_timeout(),
            args.redis.write_timeout(),
        )?)),
        (None, None) => Err(RelayError::KvError(
            "no Redis configured; pass --redis-url or run with --memory".into(),
        )),
    }
}
