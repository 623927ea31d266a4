//! Resolution queries: Resolve, ResolveTraced, GetClearance, CheckAssertions,
//! ZoneConnection

use crate::board::{ItemId, LayerId};
use crate::rules::ConstraintKind;
use crate::units::to_mm;
use serde::Deserialize;

use super::{lookup_item, parse_params};
use crate::server::protocol::Response;
use crate::server::state::ServerState;

#[derive(Deserialize)]
struct PairParams {
    #[serde(default)]
    kind: Option<ConstraintKind>,
    a: ItemId,
    #[serde(default)]
    b: Option<ItemId>,
    #[serde(default)]
    layer: Option<LayerId>,
}

const PAIR_PARAMS: &str = "{kind, a, b?, layer?}";

/// Handle Resolve - winning constraint of one category for an item pair
pub fn handle_resolve(
    state: &ServerState,
    id: Option<serde_json::Value>,
    params: Option<serde_json::Value>,
) -> Response {
    let params: PairParams = match parse_params(&id, params, PAIR_PARAMS) {
        Ok(p) => p,
        Err(response) => return response,
    };
    let kind = params.kind.unwrap_or(ConstraintKind::Clearance);

    let a = match lookup_item(state, &id, params.a) {
        Ok(item) => item,
        Err(response) => return response,
    };
    let b = match params.b.map(|b| lookup_item(state, &id, b)).transpose() {
        Ok(item) => item,
        Err(response) => return response,
    };

    let resolved = state.engine.resolve(kind, a, b, params.layer);
    Response::from_result(id, &resolved)
}

/// Handle ResolveTraced - like Resolve, plus a human readable step log
pub fn handle_resolve_traced(
    state: &ServerState,
    id: Option<serde_json::Value>,
    params: Option<serde_json::Value>,
) -> Response {
    let params: PairParams = match parse_params(&id, params, PAIR_PARAMS) {
        Ok(p) => p,
        Err(response) => return response,
    };
    let kind = params.kind.unwrap_or(ConstraintKind::Clearance);

    let a = match lookup_item(state, &id, params.a) {
        Ok(item) => item,
        Err(response) => return response,
    };
    let b = match params.b.map(|b| lookup_item(state, &id, b)).transpose() {
        Ok(item) => item,
        Err(response) => return response,
    };

    let (resolved, trace) = state.engine.resolve_traced(kind, a, b, params.layer);
    Response::success(
        id,
        serde_json::json!({
            "constraint": resolved,
            "trace": trace,
        }),
    )
}

/// Handle GetClearance - cached clearance an item demands on a layer
pub fn handle_get_clearance(
    state: &ServerState,
    id: Option<serde_json::Value>,
    params: Option<serde_json::Value>,
) -> Response {
    #[derive(Deserialize)]
    struct ClearanceParams {
        item: ItemId,
        layer: LayerId,
    }

    let params: ClearanceParams = match parse_params(&id, params, "{item, layer}") {
        Ok(p) => p,
        Err(response) => return response,
    };
    let item = match lookup_item(state, &id, params.item) {
        Ok(item) => item,
        Err(response) => return response,
    };

    let clearance = state.engine.get_or_compute(item, params.layer);
    Response::success(
        id,
        serde_json::json!({
            "clearance_nm": clearance,
            "clearance_mm": to_mm(clearance),
        }),
    )
}

/// Handle CheckAssertions - evaluate every applicable assertion constraint
pub fn handle_check_assertions(
    state: &ServerState,
    id: Option<serde_json::Value>,
    params: Option<serde_json::Value>,
) -> Response {
    let params: PairParams = match parse_params(&id, params, "{a, b?, layer?}") {
        Ok(p) => p,
        Err(response) => return response,
    };
    let a = match lookup_item(state, &id, params.a) {
        Ok(item) => item,
        Err(response) => return response,
    };
    let b = match params.b.map(|b| lookup_item(state, &id, b)).transpose() {
        Ok(item) => item,
        Err(response) => return response,
    };

    let outcomes = state.engine.check_assertions(a, b, params.layer);
    let failed = outcomes.iter().filter(|o| !o.passed).count();
    Response::success(
        id,
        serde_json::json!({
            "outcomes": outcomes,
            "failed": failed,
        }),
    )
}

/// Handle ZoneConnection - effective pad-to-zone connection style
pub fn handle_zone_connection(
    state: &ServerState,
    id: Option<serde_json::Value>,
    params: Option<serde_json::Value>,
) -> Response {
    #[derive(Deserialize)]
    struct ZoneParams {
        pad: ItemId,
        zone: ItemId,
        #[serde(default)]
        layer: Option<LayerId>,
    }

    let params: ZoneParams = match parse_params(&id, params, "{pad, zone, layer?}") {
        Ok(p) => p,
        Err(response) => return response,
    };
    let pad = match lookup_item(state, &id, params.pad) {
        Ok(item) => item,
        Err(response) => return response,
    };
    let zone = match lookup_item(state, &id, params.zone) {
        Ok(item) => item,
        Err(response) => return response,
    };

    let connection = state.engine.zone_connection(pad, zone, params.layer);
    Response::success(id, serde_json::json!({ "zone_connection": connection }))
}
