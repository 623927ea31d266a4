//! Cache operations: InvalidateCache, PrePopulateCache, CancelPrePopulate

use crate::board::ItemId;
use log::info;
use serde::Deserialize;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::TryRecvError;
use std::sync::Arc;
use std::thread;
use std::time::Instant;

use super::parse_params;
use crate::server::protocol::{error_codes, Response};
use crate::server::state::{PopulateAsyncResult, ServerState};

/// Handle InvalidateCache - forget cached clearances of edited items
pub fn handle_invalidate_cache(
    state: &ServerState,
    id: Option<serde_json::Value>,
    params: Option<serde_json::Value>,
) -> Response {
    #[derive(Deserialize)]
    struct InvalidateParams {
        items: Vec<ItemId>,
    }

    let params: InvalidateParams = match parse_params(&id, params, "{items: [id, ...]}") {
        Ok(p) => p,
        Err(response) => return response,
    };

    let removed: usize = params
        .items
        .iter()
        .map(|item| state.engine.invalidate_cache(*item))
        .sum();
    Response::success(id, serde_json::json!({ "removed": removed }))
}

/// Handle PrePopulateCache - fill the clearance cache for all loaded items
///
/// With `wait: true` the request blocks until population finishes. Otherwise
/// the work runs on a background thread and a `prePopulateComplete`
/// notification follows (see `poll_background`).
pub fn handle_pre_populate_cache(
    state: &mut ServerState,
    id: Option<serde_json::Value>,
    params: Option<serde_json::Value>,
) -> Response {
    #[derive(Deserialize)]
    struct PopulateParams {
        #[serde(default)]
        wait: bool,
    }

    let params: PopulateParams = match parse_params(&id, params, "{wait?}") {
        Ok(p) => p,
        Err(response) => return response,
    };

    if state.populate_running {
        return Response::error(
            id,
            error_codes::INVALID_REQUEST,
            "Pre-population already running".to_string(),
        );
    }

    state.cancel = Arc::new(AtomicBool::new(false));
    let items = state.item_list();

    if params.wait {
        let stats = state.engine.pre_populate_cache(&items, &state.cancel);
        return Response::from_result(id, &stats);
    }

    let session = state.engine.session();
    let options = state.engine.options();
    let cancel = Arc::clone(&state.cancel);
    let tx = state.populate_tx.clone();
    state.populate_running = true;

    info!("[Server] Starting background pre-population for {} items", items.len());
    thread::spawn(move || {
        let start = Instant::now();
        let stats = session.pre_populate(options, &items, &cancel);
        // Receiver lives as long as the server state
        let _ = tx.send(PopulateAsyncResult {
            stats,
            elapsed_ms: start.elapsed().as_secs_f64() * 1000.0,
        });
    });

    Response::success(id, serde_json::json!({ "status": "started" }))
}

/// Handle CancelPrePopulate - stop scheduling further population blocks
pub fn handle_cancel_pre_populate(state: &ServerState, id: Option<serde_json::Value>) -> Response {
    state.cancel.store(true, Ordering::Relaxed);
    Response::success(
        id,
        serde_json::json!({ "cancelled": state.populate_running }),
    )
}

/// Check for a finished background pre-population (non-blocking)
///
/// Returns the notification to send to the client, if any.
pub fn poll_background(state: &mut ServerState) -> Option<serde_json::Value> {
    match state.populate_rx.try_recv() {
        Ok(result) => {
            state.populate_running = false;
            info!(
                "[Server] Background pre-population completed: {} computed in {:.2}ms",
                result.stats.computed, result.elapsed_ms
            );
            Some(serde_json::json!({
                "id": null,
                "method": "prePopulateComplete",
                "result": {
                    "stats": result.stats,
                    "elapsed_ms": result.elapsed_ms,
                }
            }))
        }
        Err(TryRecvError::Empty) | Err(TryRecvError::Disconnected) => None,
    }
}
