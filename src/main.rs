use std::net::SocketAddr;
use std::path::Path;
use std::sync::Arc;

use axum::extract::State;
use axum::http::{HeaderMap, StatusCode};
use axum::{Router, routing::get, routing::post};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use hookrunner::report::{Reporter, TracingSink};
use hookrunner::{Dispatcher, Event, load_rules};

#[tokio::main]
async fn main() {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "hookrunner=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let rules_path = std::env::var("RULES_FILE").unwrap_or_else(|_| "rules.json".to_string());
    let rules = match load_rules(Path::new(&rules_path)) {
        Ok(rules) => rules,
        Err(err) => {
            tracing::error!(%err, path = %rules_path, "could not load rules");
            std::process::exit(1);
        }
    };
    for rule in &rules {
        tracing::info!("loaded {}", rule.name());
    }

    let dispatcher = Arc::new(Dispatcher::new(rules));

    let hostname = std::env::var("HOSTNAME").unwrap_or_else(|_| "localhost".to_string());
    let reporter = Reporter::new(TracingSink, hostname);
    tokio::spawn(reporter.run(dispatcher.subscribe()));

    let app = Router::new()
        .route("/webhook", post(webhook_handler))
        .route("/ping", get(|| async { "OK" }))
        .with_state(dispatcher);

    let port = std::env::var("PORT")
        .ok()
        .and_then(|p| p.parse().ok())
        .unwrap_or(5757);
    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    tracing::info!("listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await.unwrap();
    axum::serve(listener, app).await.unwrap();
}

/// Decodes the delivery into an [`Event`] and routes it.
///
/// Signature verification belongs to a fronting proxy; this handler trusts
/// its input.
async fn webhook_handler(
    State(dispatcher): State<Arc<Dispatcher>>,
    headers: HeaderMap,
    body: axum::body::Bytes,
) -> StatusCode {
    let Some(kind) = headers.get("x-github-event").and_then(|v| v.to_str().ok()) else {
        tracing::warn!("missing x-github-event header");
        return StatusCode::BAD_REQUEST;
    };

    let payload: serde_json::Value = match serde_json::from_slice(&body) {
        Ok(payload) => payload,
        Err(err) => {
            tracing::warn!(%err, "invalid JSON body");
            return StatusCode::BAD_REQUEST;
        }
    };

    match Event::from_payload(kind, payload) {
        Ok(event) => {
            dispatcher.route(&event);
            StatusCode::ACCEPTED
        }
        Err(err) => {
            tracing::warn!(%err, "could not decode event");
            StatusCode::BAD_REQUEST
        }
    }
}
