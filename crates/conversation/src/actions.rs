//! Saga requests and local branching for action states.

use std::collections::BTreeMap;

use common::{MapId, TransactionId};
use saga::action::{
    AdjustCurrencyPayload, AmountPayload, ChangeMapPayload, GachaponPayload, ItemPayload,
    ValidatePayload, ValidationCondition,
};
use saga::{Action, CreateSagaRequest, Payload, SagaType};
use serde_json::{Map, Value};

use crate::context::ConversationContext;
use crate::error::{ConversationError, Result};
use crate::model::{CraftAction, GachaponAction, Condition, Operation, TransportAction};
use crate::placeholder;
use crate::resolver::{
    CRAFT_FAILURE, CRAFT_MISSING_MATERIALS, CRAFT_SUCCESS, GACHAPON_FAILURE,
    TRANSPORT_ALREADY_IN_TRANSIT, TRANSPORT_CAPACITY_FULL, TRANSPORT_FAILURE,
    TRANSPORT_ROUTE_NOT_FOUND, TRANSPORT_SERVICE_ERROR,
};

/// Prefix of operations executed inside the runtime.
pub const LOCAL_PREFIX: &str = "local:";

/// A saga request together with the scratch routing it resolves through.
pub struct Suspension {
    pub request: CreateSagaRequest,
    pub scratch: Vec<(&'static str, String)>,
}

fn initiator(ctx: &ConversationContext, suffix: &str) -> String {
    if suffix.is_empty() {
        format!("NPC_{}", ctx.npc_id)
    } else {
        format!("NPC_{}_{suffix}", ctx.npc_id)
    }
}

/// Scratch `quantity` multiplies every craft amount; absent or unparsable
/// means one.
fn multiplier(ctx: &ConversationContext) -> u32 {
    ctx.scratch
        .get("quantity")
        .and_then(|q| q.parse::<u32>().ok())
        .filter(|q| *q > 0)
        .unwrap_or(1)
}

/// Validate, destroy materials, charge mesos, award the crafted item.
pub fn craft(ctx: &ConversationContext, action: &CraftAction, transaction_id: TransactionId) -> Result<Suspension> {
    let item = placeholder::substitute(&action.item_id, &ctx.scratch)
        .map_err(|e| ConversationError::InvalidDefinition(e.to_string()))?;
    let item_id = item
        .trim()
        .parse::<u32>()
        .map_err(|_| ConversationError::InvalidDefinition(format!("invalid item id '{item}'")))?;
    if action.materials.len() != action.quantities.len() {
        return Err(ConversationError::InvalidDefinition(
            "craft materials and quantities differ in length".into(),
        ));
    }

    let times = multiplier(ctx);
    let meso_cost = action.meso_cost.saturating_mul(times);
    let materials: Vec<(u32, u32)> = action
        .materials
        .iter()
        .zip(&action.quantities)
        .map(|(id, qty)| (*id, qty.saturating_mul(times)))
        .collect();

    let mut conditions = Vec::new();
    if meso_cost > 0 {
        conditions.push(ValidationCondition {
            condition_type: "meso".into(),
            operator: ">=".into(),
            value: i64::from(meso_cost),
            reference_id: None,
        });
    }
    for (id, qty) in &materials {
        conditions.push(ValidationCondition {
            condition_type: "item".into(),
            operator: ">=".into(),
            value: i64::from(*qty),
            reference_id: Some(*id),
        });
    }

    let character_id = ctx.character_id;
    let mut request = CreateSagaRequest::new(SagaType::CraftTransaction, initiator(ctx, ""))
        .with_transaction_id(transaction_id);
    if !conditions.is_empty() {
        request = request.step(
            "validate_resources",
            Payload::ValidateCharacterState(ValidatePayload {
                character_id,
                conditions,
            }),
        )?;
    }
    for (id, qty) in &materials {
        request = request.step(
            format!("destroy_material_{id}"),
            Payload::DestroyInventory(ItemPayload {
                character_id,
                template_id: *id,
                quantity: *qty,
            }),
        )?;
    }
    if meso_cost > 0 {
        let amount = i32::try_from(meso_cost)
            .map_err(|_| ConversationError::InvalidDefinition(format!("meso cost {meso_cost} too large")))?;
        request = request.step(
            "deduct_mesos",
            Payload::AwardMesos(AmountPayload {
                character_id,
                amount: -amount,
            }),
        )?;
    }
    request = request.step(
        "award_crafted_item",
        Payload::AwardInventory(ItemPayload {
            character_id,
            template_id: item_id,
            quantity: times,
        }),
    )?;

    Ok(Suspension {
        request,
        scratch: vec![
            (CRAFT_SUCCESS, action.success_state.clone()),
            (CRAFT_FAILURE, action.failure_state.clone()),
            (CRAFT_MISSING_MATERIALS, action.missing_materials_state.clone()),
        ],
    })
}

/// Charge the fare, then warp.
pub fn transport(
    ctx: &ConversationContext,
    action: &TransportAction,
    transaction_id: TransactionId,
) -> Result<Suspension> {
    let character_id = ctx.character_id;
    let mut request = CreateSagaRequest::new(SagaType::TransportTransaction, initiator(ctx, "transport"))
        .with_transaction_id(transaction_id);
    if action.fare > 0 {
        let fare = i32::try_from(action.fare)
            .map_err(|_| ConversationError::InvalidDefinition(format!("fare {} too large", action.fare)))?;
        request = request.step(
            "charge_fare",
            Payload::AdjustCurrency(AdjustCurrencyPayload {
                character_id,
                account_id: ctx.account_id,
                currency_type: action.currency_type,
                amount: -fare,
            }),
        )?;
    }
    request = request.step(
        "warp",
        Payload::ChangeMap(ChangeMapPayload {
            character_id,
            field: ctx.field.with_map(MapId(action.map_id)),
            portal_id: action.portal_id,
        }),
    )?;

    let mut scratch = vec![(TRANSPORT_FAILURE, action.failure_state.clone())];
    for (key, state) in [
        (TRANSPORT_CAPACITY_FULL, &action.capacity_full_state),
        (TRANSPORT_ALREADY_IN_TRANSIT, &action.already_in_transit_state),
        (TRANSPORT_ROUTE_NOT_FOUND, &action.route_not_found_state),
        (TRANSPORT_SERVICE_ERROR, &action.service_error_state),
    ] {
        if let Some(state) = state {
            scratch.push((key, state.clone()));
        }
    }
    Ok(Suspension { request, scratch })
}

/// Consume one ticket, then draw a reward.
pub fn gachapon(
    ctx: &ConversationContext,
    action: &GachaponAction,
    transaction_id: TransactionId,
) -> Result<Suspension> {
    let character_id = ctx.character_id;
    let request = CreateSagaRequest::new(SagaType::GachaponTransaction, initiator(ctx, "gachapon"))
        .with_transaction_id(transaction_id)
        .step(
            "destroy_ticket",
            Payload::DestroyInventory(ItemPayload {
                character_id,
                template_id: action.ticket_item_id,
                quantity: 1,
            }),
        )?
        .step(
            "select_gachapon_reward",
            Payload::SelectGachaponReward(GachaponPayload {
                character_id,
                gachapon_id: action.gachapon_id.clone(),
            }),
        )?;
    Ok(Suspension {
        request,
        scratch: vec![(GACHAPON_FAILURE, action.failure_state.clone())],
    })
}

/// Applies a `local:` operation to the scratch map.
pub fn apply_local(ctx: &mut ConversationContext, operation: &Operation) -> Result<()> {
    let kind = operation
        .operation_type
        .strip_prefix(LOCAL_PREFIX)
        .unwrap_or(&operation.operation_type);
    let param = |name: &str| {
        operation.params.get(name).ok_or_else(|| {
            ConversationError::InvalidDefinition(format!(
                "operation '{}' needs parameter '{name}'",
                operation.operation_type
            ))
        })
    };

    match kind {
        "set_context" => {
            let key = param("key")?.clone();
            let value = substitute_lenient(param("value")?, &ctx.scratch);
            ctx.scratch.insert(key, value);
        }
        "clear_context" => {
            ctx.scratch.remove(param("key")?);
        }
        "log" => {
            let message = substitute_lenient(param("message")?, &ctx.scratch);
            tracing::info!(character_id = %ctx.character_id, npc_id = %ctx.npc_id, "{message}");
        }
        "debug" => {
            let message = substitute_lenient(param("message")?, &ctx.scratch);
            tracing::debug!(character_id = %ctx.character_id, npc_id = %ctx.npc_id, "{message}");
        }
        other => {
            return Err(ConversationError::InvalidDefinition(format!(
                "unknown local operation '{other}'"
            )));
        }
    }
    Ok(())
}

/// Builds the payload of a remote operation. The operation type is the
/// action label (`award_mesos`) and params carry the payload fields;
/// numeric strings become numbers and the character, account and field
/// come from the conversation when absent.
pub fn remote_payload(ctx: &ConversationContext, operation: &Operation) -> Result<Payload> {
    let action: Action = serde_json::from_value(Value::String(operation.operation_type.clone()))
        .map_err(|_| {
            ConversationError::InvalidDefinition(format!(
                "unknown operation '{}'",
                operation.operation_type
            ))
        })?;

    let mut body = Map::new();
    body.insert("characterId".into(), Value::from(ctx.character_id.0));
    body.insert("accountId".into(), Value::from(ctx.account_id.0));
    for (key, raw) in &operation.params {
        let value = substitute_lenient(raw, &ctx.scratch);
        let value = match value.parse::<i64>() {
            Ok(n) => Value::from(n),
            Err(_) => Value::String(value),
        };
        body.insert(key.clone(), value);
    }
    if action == Action::ChangeMap {
        let map_id = body
            .remove("mapId")
            .and_then(|v| v.as_u64())
            .and_then(|v| u32::try_from(v).ok())
            .ok_or_else(|| ConversationError::InvalidDefinition("change_map needs mapId".into()))?;
        body.insert(
            "field".into(),
            serde_json::to_value(ctx.field.with_map(MapId(map_id)))?,
        );
        body.entry("portalId").or_insert(Value::from(0));
    }

    Payload::from_parts(action, &Value::Object(body)).map_err(|e| {
        ConversationError::InvalidDefinition(format!(
            "operation '{}' has invalid params: {e}",
            operation.operation_type
        ))
    })
}

/// Whether every condition holds against the scratch map. Only `context`
/// conditions are evaluated locally.
pub fn conditions_hold(conditions: &[Condition], scratch: &BTreeMap<String, String>) -> Result<bool> {
    for condition in conditions {
        if !condition_holds(condition, scratch)? {
            return Ok(false);
        }
    }
    Ok(true)
}

fn condition_holds(condition: &Condition, scratch: &BTreeMap<String, String>) -> Result<bool> {
    if condition.condition_type != "context" {
        return Err(ConversationError::InvalidDefinition(format!(
            "unsupported condition type '{}'",
            condition.condition_type
        )));
    }
    let key = condition.reference_id.as_deref().ok_or_else(|| {
        ConversationError::InvalidDefinition("context condition needs referenceId".into())
    })?;
    let expected = substitute_lenient(&condition.value, scratch);
    let Some(actual) = scratch.get(key) else {
        return Ok(condition.operator == "!=");
    };

    let ordering = match (actual.parse::<i64>(), expected.parse::<i64>()) {
        (Ok(a), Ok(b)) => a.cmp(&b),
        _ => actual.as_str().cmp(expected.as_str()),
    };
    use std::cmp::Ordering::*;
    Ok(match condition.operator.as_str() {
        "=" | "==" => ordering == Equal,
        "!=" => ordering != Equal,
        ">" => ordering == Greater,
        ">=" => ordering != Less,
        "<" => ordering == Less,
        "<=" => ordering != Greater,
        other => {
            return Err(ConversationError::InvalidDefinition(format!(
                "unknown operator '{other}'"
            )));
        }
    })
}

/// Placeholder substitution that keeps the raw text when a key is missing.
pub fn substitute_lenient(text: &str, scratch: &BTreeMap<String, String>) -> String {
    placeholder::substitute(text, scratch).unwrap_or_else(|e| {
        tracing::warn!(error = %e, "placeholder left unresolved");
        text.to_string()
    })
}
