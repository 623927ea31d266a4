//! Session operations: InitializeSession, LoadItems, SetOptions, GetStats

use crate::board::{BoardConfig, BoardItem};
use crate::engine::EngineOptions;
use crate::rules::RuleDocument;
use log::{info, warn};
use serde::Deserialize;
use std::sync::atomic::Ordering;
use std::time::Instant;

use super::parse_params;
use crate::server::protocol::{error_codes, Response};
use crate::server::state::ServerState;

/// Handle InitializeSession - compile a configuration snapshot and rule
/// document into a fresh session
///
/// Configuration and rules can each be given inline or as a file path.
/// Items passed along replace the loaded item set.
pub fn handle_initialize_session(
    state: &mut ServerState,
    id: Option<serde_json::Value>,
    params: Option<serde_json::Value>,
) -> Response {
    #[derive(Deserialize)]
    struct InitializeParams {
        #[serde(default)]
        config: Option<serde_json::Value>,
        #[serde(default)]
        config_path: Option<String>,
        #[serde(default)]
        rules: Option<serde_json::Value>,
        #[serde(default)]
        rules_path: Option<String>,
        #[serde(default)]
        items: Option<Vec<BoardItem>>,
    }

    let params: InitializeParams = match parse_params(
        &id,
        params,
        "{config?, config_path?, rules?, rules_path?, items?}",
    ) {
        Ok(p) => p,
        Err(response) => return response,
    };

    let start = Instant::now();

    let config = match (params.config, params.config_path) {
        (Some(inline), _) => BoardConfig::from_json_str(&inline.to_string()),
        (None, Some(path)) => {
            info!("[Server] Loading board configuration: {}", path);
            BoardConfig::from_json_file(&path)
        }
        (None, None) => Ok(BoardConfig::default()),
    };
    let config = match config {
        Ok(config) => config,
        Err(e) => return Response::error(id, error_codes::CONFIG_FAILED, format!("{:#}", e)),
    };

    let document = match (params.rules, params.rules_path) {
        (Some(inline), _) => RuleDocument::from_json_str(&inline.to_string()).map_err(anyhow::Error::from),
        (None, Some(path)) => {
            info!("[Server] Loading rule document: {}", path);
            RuleDocument::from_json_file(&path)
        }
        (None, None) => Ok(RuleDocument {
            version: crate::rules::RULE_DOCUMENT_VERSION,
            rules: Vec::new(),
        }),
    };
    let document = match document {
        Ok(document) => document,
        Err(e) => return Response::document_error(id, &e),
    };

    if let Some(items) = params.items {
        state.items = items.into_iter().map(|item| (item.id, item)).collect();
    }

    // A running pre-population fills the old session's cache; stop it
    state.cancel.store(true, Ordering::Relaxed);

    let result = state
        .engine
        .initialize_session(document.into_rules(), config);
    let stats = state.engine.stats();

    match result {
        Ok(()) => {
            state.last_compile_error = None;
            info!("[Server] Session ready in {:?}", start.elapsed());
            Response::success(
                id,
                serde_json::json!({
                    "status": "ok",
                    "items": state.items.len(),
                    "stats": stats,
                }),
            )
        }
        Err(e) => {
            warn!("[Server] {}", e);
            let response = Response::compile_error(id, &e);
            state.last_compile_error = Some(e);
            response
        }
    }
}

/// Handle LoadItems - add or replace board items by id
pub fn handle_load_items(
    state: &mut ServerState,
    id: Option<serde_json::Value>,
    params: Option<serde_json::Value>,
) -> Response {
    #[derive(Deserialize)]
    struct LoadItemsParams {
        items: Vec<BoardItem>,
        #[serde(default)]
        replace: bool,
    }

    let params: LoadItemsParams = match parse_params(&id, params, "{items: [...], replace?}") {
        Ok(p) => p,
        Err(response) => return response,
    };

    if params.replace {
        state.items.clear();
    }

    // Edited items must not keep answering with stale clearances
    let mut invalidated = 0;
    let loaded = params.items.len();
    for item in params.items {
        invalidated += state.engine.invalidate_cache(item.id);
        state.items.insert(item.id, item);
    }

    Response::success(
        id,
        serde_json::json!({
            "status": "ok",
            "loaded": loaded,
            "total": state.items.len(),
            "invalidated": invalidated,
        }),
    )
}

/// Handle SetOptions - change engine switches without rebuilding the session
pub fn handle_set_options(
    state: &mut ServerState,
    id: Option<serde_json::Value>,
    params: Option<serde_json::Value>,
) -> Response {
    let options: EngineOptions = match parse_params(&id, params, "{netclass_fast_path?}") {
        Ok(p) => p,
        Err(response) => return response,
    };
    state.engine.set_options(options);
    Response::from_result(id, &options)
}

/// Handle GetStats - session diagnostics
pub fn handle_get_stats(state: &ServerState, id: Option<serde_json::Value>) -> Response {
    let stats = state.engine.stats();
    Response::success(
        id,
        serde_json::json!({
            "stats": stats,
            "items": state.items.len(),
            "pre_populate_running": state.populate_running,
            "last_compile_error": state.last_compile_error.as_ref().map(|e| e.to_string()),
        }),
    )
}
