//! Picks the state a suspended conversation resumes into.

use std::collections::BTreeMap;

use saga::SagaOutcome;

use crate::model::END_STATE;

pub const CRAFT_PREFIX: &str = "craftAction_";
pub const TRANSPORT_PREFIX: &str = "transportAction_";
pub const GACHAPON_PREFIX: &str = "gachaponAction_";

pub const CRAFT_SUCCESS: &str = "craftAction_successState";
pub const CRAFT_FAILURE: &str = "craftAction_failureState";
pub const CRAFT_MISSING_MATERIALS: &str = "craftAction_missingMaterialsState";
pub const TRANSPORT_FAILURE: &str = "transportAction_failureState";
pub const TRANSPORT_CAPACITY_FULL: &str = "transportAction_capacityFullState";
pub const TRANSPORT_ALREADY_IN_TRANSIT: &str = "transportAction_alreadyInTransitState";
pub const TRANSPORT_ROUTE_NOT_FOUND: &str = "transportAction_routeNotFoundState";
pub const TRANSPORT_SERVICE_ERROR: &str = "transportAction_serviceErrorState";
pub const GACHAPON_FAILURE: &str = "gachaponAction_failureState";

const TRANSPORT_CODES: [(&str, &str); 4] = [
    ("TRANSPORT_CAPACITY_FULL", TRANSPORT_CAPACITY_FULL),
    ("TRANSPORT_ALREADY_IN_TRANSIT", TRANSPORT_ALREADY_IN_TRANSIT),
    ("TRANSPORT_ROUTE_NOT_FOUND", TRANSPORT_ROUTE_NOT_FOUND),
    ("TRANSPORT_SERVICE_ERROR", TRANSPORT_SERVICE_ERROR),
];

/// Next state for a conversation resuming from `outcome`; `end` when no
/// scratch key applies.
///
/// A completed transport ends silently because the character has already
/// left the map, and a completed gachapon ends once the reward is awarded.
pub fn resolve(outcome: &SagaOutcome, scratch: &BTreeMap<String, String>) -> String {
    let lookup = |key: &str| scratch.get(key).filter(|v| !v.is_empty()).cloned();

    if outcome.is_completed() {
        if scratch.contains_key(TRANSPORT_FAILURE) || scratch.contains_key(GACHAPON_FAILURE) {
            return END_STATE.to_string();
        }
        return lookup(CRAFT_SUCCESS).unwrap_or_else(|| END_STATE.to_string());
    }

    if let Some(code) = outcome.error_code.as_deref()
        && code.starts_with("TRANSPORT_")
    {
        let specific = TRANSPORT_CODES
            .iter()
            .find(|(candidate, _)| *candidate == code)
            .and_then(|(_, key)| lookup(key));
        if let Some(state) = specific.or_else(|| lookup(TRANSPORT_FAILURE)) {
            return state;
        }
    }

    if outcome.reason.as_deref() == Some(saga::model::VALIDATION_FAILED)
        && let Some(state) = lookup(CRAFT_MISSING_MATERIALS)
    {
        return state;
    }

    [CRAFT_FAILURE, GACHAPON_FAILURE, TRANSPORT_FAILURE]
        .into_iter()
        .find_map(lookup)
        .unwrap_or_else(|| END_STATE.to_string())
}

/// Drops every action scratch key once the outcome has been routed.
pub fn purge(scratch: &mut BTreeMap<String, String>) {
    scratch.retain(|key, _| {
        !(key.starts_with(CRAFT_PREFIX)
            || key.starts_with(TRANSPORT_PREFIX)
            || key.starts_with(GACHAPON_PREFIX))
    });
}
