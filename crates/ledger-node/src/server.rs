//! Read-only HTTP view over the local chain. There is no peer networking.

use crate::view::{BlockView, Head};
use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::routing::get;
use axum::{Json, Router};
use ledger_core::Chain;
use ledger_storage::SledStore;
use serde::Serialize;
use std::net::SocketAddr;
use std::sync::Arc;
use tower_http::trace::TraceLayer;
use tracing::{info, warn};

#[derive(Clone)]
struct AppState {
    chain: Arc<Chain<SledStore>>,
}

#[derive(Serialize)]
struct Health {
    status: &'static str,
}

async fn head(State(state): State<AppState>) -> Json<Head> {
    let (height, hash) = state
        .chain
        .tip()
        .map(|t| (t.height, hex::encode(t.hash)))
        .unwrap_or_default();
    Json(Head { height, hash })
}

async fn block(
    State(state): State<AppState>,
    Path(height): Path<u64>,
) -> Result<Json<BlockView>, (StatusCode, String)> {
    match state.chain.get_block(height) {
        Ok(block) => Ok(Json(BlockView::from(&block))),
        Err(e) if e.is_not_found() => Err((StatusCode::NOT_FOUND, e.to_string())),
        Err(e) => {
            warn!(height, error = %e, "block lookup failed");
            Err((StatusCode::INTERNAL_SERVER_ERROR, e.to_string()))
        }
    }
}

fn router(chain: Arc<Chain<SledStore>>) -> Router {
    Router::new()
        .route("/health", get(|| async { Json(Health { status: "ok" }) }))
        .route("/chain/head", get(head))
        .route("/blocks/{height}", get(block))
        .layer(TraceLayer::new_for_http())
        .with_state(AppState { chain })
}

pub(crate) async fn serve(chain: Arc<Chain<SledStore>>, port: u16) -> anyhow::Result<()> {
    let addr = SocketAddr::from(([127, 0, 0, 1], port));
    let listener = tokio::net::TcpListener::bind(addr).await?;
    info!("ledger-node listening on http://{addr}");
    axum::serve(listener, router(chain))
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
            info!("shutting down");
        })
        .await?;
    Ok(())
}
