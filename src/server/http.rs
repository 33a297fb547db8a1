//! HTTP server implementation
//!
//! Uses hyper http1 with TokioIo for async handling. Routes are thin call
//! sites over the engine; the only long-lived connections are channel
//! WebSockets at `/ws`.

use bytes::Bytes;
use http_body_util::Full;
use hyper::body::Incoming;
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper::{Method, Request, Response};
use hyper_util::rt::TokioIo;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Instant;
use tokio::net::TcpListener;
use tracing::{debug, error, info, warn};

use crate::auth::JwtValidator;
use crate::channel::{self, EventEmitter, RoomHub};
use crate::config::Args;
use crate::engine::{EngineConfig, IssueEngine};
use crate::notifier::ProximityNotifier;
use crate::routes;
use crate::server::response::{not_found_response, preflight_response, to_boxed, BoxBody};
use crate::store::AggregateStore;
use crate::types::{PulseError, Result};

/// Shared application state
pub struct AppState {
    pub args: Args,
    pub store: Arc<dyn AggregateStore>,
    pub hub: Arc<RoomHub>,
    pub engine: Arc<IssueEngine>,
    pub jwt: Arc<JwtValidator>,
    pub started_at: Instant,
}

impl AppState {
    /// Wire the hub, notifier and engine around `store`
    pub fn new(args: Args, store: Arc<dyn AggregateStore>) -> Result<Self> {
        let jwt = match args.jwt_secret() {
            Some(secret) => JwtValidator::new(secret, args.jwt_expiry_seconds)?,
            None => {
                return Err(PulseError::Config(
                    "JWT_SECRET is required in production mode".into(),
                ))
            }
        };

        let hub = Arc::new(RoomHub::new(args.connection_buffer));
        let emitter = EventEmitter::new(hub.clone());
        let config = EngineConfig::from(&args);
        let notifier = Arc::new(ProximityNotifier::new(
            Arc::clone(&store),
            emitter.clone(),
            config.nearby_radius_km,
            config.store_timeout,
        ));
        let engine = Arc::new(IssueEngine::new(
            Arc::clone(&store),
            emitter,
            notifier,
            config,
        ));

        Ok(Self {
            args,
            store,
            hub,
            engine,
            jwt: Arc::new(jwt),
            started_at: Instant::now(),
        })
    }
}

pub async fn run(state: Arc<AppState>) -> Result<()> {
    let listener = TcpListener::bind(state.args.listen).await?;

    info!(
        "civic-pulse listening on {} as node {} (store: {})",
        state.args.listen,
        state.args.node_id,
        state.store.backend()
    );

    if state.args.dev_mode {
        warn!("Development mode enabled - default JWT secret may be in use");
    }

    loop {
        match listener.accept().await {
            Ok((stream, addr)) => {
                let state = Arc::clone(&state);
                tokio::spawn(async move {
                    let io = TokioIo::new(stream);

                    let service = service_fn(move |req| {
                        let state = Arc::clone(&state);
                        async move { handle_request(state, addr, req).await }
                    });

                    if let Err(err) = http1::Builder::new()
                        .preserve_header_case(true)
                        .title_case_headers(true)
                        .serve_connection(io, service)
                        .with_upgrades()
                        .await
                    {
                        error!("Error serving connection from {}: {:?}", addr, err);
                    }
                });
            }
            Err(e) => {
                error!("Error accepting connection: {:?}", e);
            }
        }
    }
}

/// Route incoming HTTP requests
async fn handle_request(
    state: Arc<AppState>,
    addr: SocketAddr,
    req: Request<Incoming>,
) -> std::result::Result<Response<BoxBody>, hyper::Error> {
    let method = req.method().clone();
    let path = req.uri().path().to_string();
    debug!("[{}] {} {}", addr, method, path);

    let segments: Vec<&str> = path
        .trim_matches('/')
        .split('/')
        .filter(|s| !s.is_empty())
        .collect();

    let response: Response<Full<Bytes>> = match (&method, segments.as_slice()) {
        (&Method::OPTIONS, _) => preflight_response(),

        (&Method::GET, ["health"]) | (&Method::GET, ["healthz"]) => {
            routes::health_check(Arc::clone(&state)).await
        }

        (&Method::GET, ["ws"]) => {
            channel::handle_channel_upgrade(Arc::clone(&state.hub), Arc::clone(&state.jwt), req)
                .await
        }

        (&Method::POST, ["api", "issues"]) => routes::issues::create(req, &state).await,
        (&Method::GET, ["api", "issues", id]) => routes::issues::get(&state, id).await,
        (&Method::POST, ["api", "issues", id, "verifications"]) => {
            routes::issues::verify(req, &state, id).await
        }
        (&Method::POST, ["api", "issues", id, "like"]) => {
            routes::issues::like(req, &state, id).await
        }
        (&Method::PUT, ["api", "issues", id, "status"]) => {
            routes::issues::set_status(req, &state, id).await
        }

        (&Method::GET, ["api", "notifications"]) => routes::notifications::list(req, &state).await,
        (&Method::POST, ["api", "notifications", id, "read"]) => {
            routes::notifications::mark_read(req, &state, id).await
        }

        _ => not_found_response(&path),
    };

    Ok(to_boxed(response))
}
