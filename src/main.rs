//! civic-pulse - issue aggregate engine and real-time gateway

use clap::Parser;
use std::sync::Arc;
use tracing::{error, info, warn};

use civic_pulse::{
    config::Args,
    db::MongoClient,
    logging,
    server::{self, AppState},
    store::{AggregateStore, MemoryStore, MongoStore},
};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load environment variables from .env file if present
    let _ = dotenvy::dotenv();

    let args = Args::parse();
    logging::init(&args.log_level, args.json_logs());

    if let Err(e) = args.validate() {
        error!("Configuration error: {}", e);
        std::process::exit(1);
    }

    info!("======================================");
    info!("  civic-pulse");
    info!("  commit {} built {}", env!("GIT_COMMIT_SHORT"), env!("BUILD_TIMESTAMP"));
    info!("======================================");
    info!("Node ID: {}", args.node_id);
    info!("Listen: {}", args.listen);
    info!("Mode: {}", if args.dev_mode { "DEVELOPMENT" } else { "PRODUCTION" });
    info!("MongoDB: {} / {}", args.mongodb_uri, args.mongodb_db);
    info!("Nearby radius: {} km", args.nearby_radius_km);
    info!(
        "Store timeout: {} ms, request timeout: {} ms, CAS retries: {}",
        args.store_timeout_ms, args.request_timeout_ms, args.max_cas_retries
    );
    info!("======================================");

    // MongoDB is optional in dev mode
    let connected = MongoClient::new(&args.mongodb_uri, &args.mongodb_db).await;
    let store: Arc<dyn AggregateStore> = match connected {
        Ok(client) => {
            info!("MongoDB connected successfully");
            Arc::new(MongoStore::new(client).await?)
        }
        Err(e) => {
            if args.dev_mode {
                warn!("MongoDB connection failed (dev mode, using in-memory store): {}", e);
                Arc::new(MemoryStore::new())
            } else {
                error!("MongoDB connection failed: {}", e);
                std::process::exit(1);
            }
        }
    };

    let state = Arc::new(AppState::new(args, store)?);
    server::run(state).await?;

    Ok(())
}
