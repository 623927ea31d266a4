//! Handler module declarations and request dispatch

pub mod cache;
pub mod query;
pub mod session;

pub use cache::*;
pub use query::*;
pub use session::*;

use crate::board::{BoardItem, ItemId};
use serde::de::DeserializeOwned;

use super::protocol::{error_codes, Request, Response};
use super::state::ServerState;

/// Route one request to its handler
pub fn dispatch(state: &mut ServerState, request: Request) -> Response {
    let Request { id, method, params } = request;
    match method.as_str() {
        "InitializeSession" => handle_initialize_session(state, id, params),
        "LoadItems" => handle_load_items(state, id, params),
        "SetOptions" => handle_set_options(state, id, params),
        "GetStats" => handle_get_stats(state, id),
        "Resolve" => handle_resolve(state, id, params),
        "ResolveTraced" => handle_resolve_traced(state, id, params),
        "GetClearance" => handle_get_clearance(state, id, params),
        "CheckAssertions" => handle_check_assertions(state, id, params),
        "ZoneConnection" => handle_zone_connection(state, id, params),
        "InvalidateCache" => handle_invalidate_cache(state, id, params),
        "PrePopulateCache" => handle_pre_populate_cache(state, id, params),
        "CancelPrePopulate" => handle_cancel_pre_populate(state, id),
        _ => Response::error(
            id,
            error_codes::METHOD_NOT_FOUND,
            format!("Unknown method: {}", method),
        ),
    }
}

/// Deserialize request params, answering INVALID_PARAMS on failure
///
/// Missing params are treated as an empty object so handlers whose fields
/// all have defaults accept a bare request.
pub(crate) fn parse_params<T: DeserializeOwned>(
    id: &Option<serde_json::Value>,
    params: Option<serde_json::Value>,
    expected: &str,
) -> Result<T, Response> {
    let value = params.unwrap_or_else(|| serde_json::json!({}));
    serde_json::from_value(value).map_err(|e| {
        Response::error(
            id.clone(),
            error_codes::INVALID_PARAMS,
            format!("Invalid params: expected {}: {}", expected, e),
        )
    })
}

/// Look up a loaded item, answering ITEM_NOT_FOUND when it's unknown
pub(crate) fn lookup_item<'s>(
    state: &'s ServerState,
    id: &Option<serde_json::Value>,
    item: ItemId,
) -> Result<&'s BoardItem, Response> {
    state.item(item).ok_or_else(|| {
        Response::error(
            id.clone(),
            error_codes::ITEM_NOT_FOUND,
            format!("Item {} not loaded. Call LoadItems first.", item),
        )
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn request(method: &str, params: serde_json::Value) -> Request {
        Request {
            id: Some(json!(1)),
            method: method.to_string(),
            params: Some(params),
        }
    }

    fn initialized() -> ServerState {
        let mut state = ServerState::new();
        let response = dispatch(
            &mut state,
            request(
                "InitializeSession",
                json!({
                    "config": {
                        "design": {"min_clearance": 150000},
                        "netclasses": {"Power": {"clearance": 300000}}
                    },
                    "rules": {
                        "rules": [{
                            "name": "hv",
                            "condition": "A.NetClass == 'HV'",
                            "constraints": [{"type": "clearance", "min": 0.5}]
                        }]
                    },
                    "items": [
                        {"id": 1, "kind": "track", "layers": ["F.Cu"], "net": "VCC", "netclass": "Power"},
                        {"id": 2, "kind": "track", "layers": ["F.Cu"], "net": "GND", "netclass": "Default"},
                        {"id": 3, "kind": "track", "layers": ["F.Cu"], "net": "HV1", "netclass": "HV"}
                    ]
                }),
            ),
        );
        assert!(!response.is_error(), "{:?}", response.error);
        state
    }

    #[test]
    fn test_resolve_reports_provenance() {
        let mut state = initialized();

        let response = dispatch(
            &mut state,
            request("Resolve", json!({"kind": "clearance", "a": 1, "b": 2, "layer": "F.Cu"})),
        );
        let result = response.result.unwrap();
        assert_eq!(result["provenance"], "netclass 'Power'");
        assert_eq!(result["constraint"]["value"]["min"], 300000);

        let response = dispatch(&mut state, request("Resolve", json!({"a": 3, "b": 2})));
        assert_eq!(response.result.unwrap()["provenance"], "hv");
    }

    #[test]
    fn test_get_clearance_and_invalidate() {
        let mut state = initialized();

        let response = dispatch(&mut state, request("GetClearance", json!({"item": 1, "layer": "F.Cu"})));
        assert_eq!(response.result.unwrap()["clearance_nm"], 300000);

        let response = dispatch(&mut state, request("InvalidateCache", json!({"items": [1, 2]})));
        assert_eq!(response.result.unwrap()["removed"], 1);
    }

    #[test]
    fn test_pre_populate_blocking() {
        let mut state = initialized();
        let response = dispatch(&mut state, request("PrePopulateCache", json!({"wait": true})));
        let result = response.result.unwrap();
        assert_eq!(result["requested"], 3);
        assert_eq!(result["cancelled"], false);
        assert_eq!(state.engine.stats().cached_clearances, 3);
    }

    #[test]
    fn test_errors() {
        let mut state = initialized();

        let response = dispatch(&mut state, request("Frobnicate", json!({})));
        assert_eq!(response.error.unwrap().code, error_codes::METHOD_NOT_FOUND);

        let response = dispatch(&mut state, request("Resolve", json!({"a": 42})));
        assert_eq!(response.error.unwrap().code, error_codes::ITEM_NOT_FOUND);

        let response = dispatch(&mut state, request("Resolve", json!({"kind": "wobble", "a": 1})));
        assert_eq!(response.error.unwrap().code, error_codes::INVALID_PARAMS);
    }

    #[test]
    fn test_compile_failure_falls_back() {
        let mut state = initialized();
        let response = dispatch(
            &mut state,
            request(
                "InitializeSession",
                json!({"rules": {"rules": [{
                    "name": "broken",
                    "condition": "A.NetClass ==",
                    "constraints": [{"type": "clearance", "min": 1.0}]
                }]}}),
            ),
        );
        let error = serde_json::to_value(response.error.unwrap()).unwrap();
        assert_eq!(error["code"], error_codes::RULE_COMPILE_FAILED);
        assert_eq!(error["data"]["rule"], "broken");
        assert_eq!(error["data"]["expression"], "A.NetClass ==");
        assert_eq!(error["data"]["offset"], 13);
        assert_eq!(error["data"]["fallback"], true);
        assert!(state.last_compile_error.is_some());

        let stats = dispatch(&mut state, request("GetStats", json!({}))).result.unwrap();
        assert_eq!(stats["stats"]["authored_rules"], 0);
        assert_eq!(stats["items"], 3);
    }

    #[test]
    fn test_rule_document_errors_carry_location() {
        let mut state = initialized();

        let response = dispatch(
            &mut state,
            request(
                "InitializeSession",
                json!({"rules": {"rules": [{"name": "w", "constraints": [{"type": "wobble"}]}]}}),
            ),
        );
        let error = serde_json::to_value(response.error.unwrap()).unwrap();
        assert_eq!(error["code"], error_codes::RULES_FAILED);
        assert_eq!(error["data"]["kind"], "document_syntax");
        assert_eq!(error["data"]["line"], 1);
        assert!(error["data"]["column"].as_u64().unwrap() > 0);

        let response = dispatch(
            &mut state,
            request(
                "InitializeSession",
                json!({"rules": {"rules": [{"name": "w", "constraints": [{"type": "track_width", "min": 2, "max": 1}]}]}}),
            ),
        );
        let error = serde_json::to_value(response.error.unwrap()).unwrap();
        assert_eq!(error["data"]["kind"], "invalid_rule");
        assert_eq!(error["data"]["rule"], "w");

        // The earlier session survives a rejected document
        let stats = dispatch(&mut state, request("GetStats", json!({}))).result.unwrap();
        assert_eq!(stats["stats"]["authored_rules"], 1);
    }
}
