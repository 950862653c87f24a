//! Closed set of step actions and their payloads.

use common::{AccountId, CharacterId, Field, NpcId};
use serde::{Deserialize, Serialize};

/// Label of a step action. Serialized in snake_case (`award_inventory`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Action {
    AwardInventory,
    DestroyInventory,
    EquipAsset,
    UnequipAsset,
    TransferAsset,
    AwardMesos,
    AwardExperience,
    AwardLevel,
    AwardFame,
    AdjustCurrency,
    AcceptCashItem,
    ReleaseCashItem,
    ChangeMap,
    ChangeJob,
    AwardSkill,
    StartQuest,
    CompleteQuest,
    AdvanceQuestProgress,
    ValidateCharacterState,
    SelectGachaponReward,
    SendMessage,
}

impl Action {
    pub const ALL: [Action; 21] = [
        Action::AwardInventory,
        Action::DestroyInventory,
        Action::EquipAsset,
        Action::UnequipAsset,
        Action::TransferAsset,
        Action::AwardMesos,
        Action::AwardExperience,
        Action::AwardLevel,
        Action::AwardFame,
        Action::AdjustCurrency,
        Action::AcceptCashItem,
        Action::ReleaseCashItem,
        Action::ChangeMap,
        Action::ChangeJob,
        Action::AwardSkill,
        Action::StartQuest,
        Action::CompleteQuest,
        Action::AdvanceQuestProgress,
        Action::ValidateCharacterState,
        Action::SelectGachaponReward,
        Action::SendMessage,
    ];
}

impl std::fmt::Display for Action {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let label = serde_json::to_value(self)
            .ok()
            .and_then(|v| v.as_str().map(str::to_string))
            .unwrap_or_default();
        f.write_str(&label)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ItemPayload {
    pub character_id: CharacterId,
    pub template_id: u32,
    pub quantity: u32,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SlotMovePayload {
    pub character_id: CharacterId,
    pub source: i16,
    pub destination: i16,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TransferAssetPayload {
    pub character_id: CharacterId,
    pub template_id: u32,
    pub quantity: u32,
    /// Source container, e.g. `inventory` or `storage`.
    pub from: String,
    pub to: String,
}

/// Signed change of a character counter (mesos, fame).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AmountPayload {
    pub character_id: CharacterId,
    pub amount: i32,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AdjustCurrencyPayload {
    pub character_id: CharacterId,
    pub account_id: AccountId,
    pub currency_type: u32,
    pub amount: i32,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CashItemPayload {
    pub character_id: CharacterId,
    pub account_id: AccountId,
    pub serial_number: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChangeMapPayload {
    pub character_id: CharacterId,
    pub field: Field,
    #[serde(default)]
    pub portal_id: u32,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChangeJobPayload {
    pub character_id: CharacterId,
    pub job_id: u16,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AwardSkillPayload {
    pub character_id: CharacterId,
    pub skill_id: u32,
    pub level: u8,
    pub master_level: u8,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QuestPayload {
    pub character_id: CharacterId,
    pub quest_id: u32,
    #[serde(default)]
    pub npc_id: NpcId,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QuestProgressPayload {
    pub character_id: CharacterId,
    pub quest_id: u32,
    pub info_number: u32,
    pub progress: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ValidationCondition {
    /// What is checked, e.g. `item`, `meso`, `level`.
    pub condition_type: String,
    pub operator: String,
    pub value: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reference_id: Option<u32>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ValidatePayload {
    pub character_id: CharacterId,
    pub conditions: Vec<ValidationCondition>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GachaponPayload {
    pub character_id: CharacterId,
    pub gachapon_id: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SendMessagePayload {
    pub character_id: CharacterId,
    pub message_type: String,
    pub message: String,
}

/// Action payload, discriminated by action label.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "action", content = "payload", rename_all = "snake_case")]
pub enum Payload {
    AwardInventory(ItemPayload),
    DestroyInventory(ItemPayload),
    EquipAsset(SlotMovePayload),
    UnequipAsset(SlotMovePayload),
    TransferAsset(TransferAssetPayload),
    AwardMesos(AmountPayload),
    AwardExperience(AmountPayload),
    AwardLevel(AmountPayload),
    AwardFame(AmountPayload),
    AdjustCurrency(AdjustCurrencyPayload),
    AcceptCashItem(CashItemPayload),
    ReleaseCashItem(CashItemPayload),
    ChangeMap(ChangeMapPayload),
    ChangeJob(ChangeJobPayload),
    AwardSkill(AwardSkillPayload),
    StartQuest(QuestPayload),
    CompleteQuest(QuestPayload),
    AdvanceQuestProgress(QuestProgressPayload),
    ValidateCharacterState(ValidatePayload),
    SelectGachaponReward(GachaponPayload),
    SendMessage(SendMessagePayload),
}

impl Payload {
    pub fn action(&self) -> Action {
        match self {
            Payload::AwardInventory(_) => Action::AwardInventory,
            Payload::DestroyInventory(_) => Action::DestroyInventory,
            Payload::EquipAsset(_) => Action::EquipAsset,
            Payload::UnequipAsset(_) => Action::UnequipAsset,
            Payload::TransferAsset(_) => Action::TransferAsset,
            Payload::AwardMesos(_) => Action::AwardMesos,
            Payload::AwardExperience(_) => Action::AwardExperience,
            Payload::AwardLevel(_) => Action::AwardLevel,
            Payload::AwardFame(_) => Action::AwardFame,
            Payload::AdjustCurrency(_) => Action::AdjustCurrency,
            Payload::AcceptCashItem(_) => Action::AcceptCashItem,
            Payload::ReleaseCashItem(_) => Action::ReleaseCashItem,
            Payload::ChangeMap(_) => Action::ChangeMap,
            Payload::ChangeJob(_) => Action::ChangeJob,
            Payload::AwardSkill(_) => Action::AwardSkill,
            Payload::StartQuest(_) => Action::StartQuest,
            Payload::CompleteQuest(_) => Action::CompleteQuest,
            Payload::AdvanceQuestProgress(_) => Action::AdvanceQuestProgress,
            Payload::ValidateCharacterState(_) => Action::ValidateCharacterState,
            Payload::SelectGachaponReward(_) => Action::SelectGachaponReward,
            Payload::SendMessage(_) => Action::SendMessage,
        }
    }

    pub fn character_id(&self) -> CharacterId {
        match self {
            Payload::AwardInventory(p) | Payload::DestroyInventory(p) => p.character_id,
            Payload::EquipAsset(p) | Payload::UnequipAsset(p) => p.character_id,
            Payload::TransferAsset(p) => p.character_id,
            Payload::AwardMesos(p)
            | Payload::AwardExperience(p)
            | Payload::AwardLevel(p)
            | Payload::AwardFame(p) => p.character_id,
            Payload::AdjustCurrency(p) => p.character_id,
            Payload::AcceptCashItem(p) | Payload::ReleaseCashItem(p) => p.character_id,
            Payload::ChangeMap(p) => p.character_id,
            Payload::ChangeJob(p) => p.character_id,
            Payload::AwardSkill(p) => p.character_id,
            Payload::StartQuest(p) | Payload::CompleteQuest(p) => p.character_id,
            Payload::AdvanceQuestProgress(p) => p.character_id,
            Payload::ValidateCharacterState(p) => p.character_id,
            Payload::SelectGachaponReward(p) => p.character_id,
            Payload::SendMessage(p) => p.character_id,
        }
    }

    /// Partition key of the command: the account for cash-shop traffic,
    /// otherwise the character.
    pub fn partition_key(&self) -> String {
        match self {
            Payload::AdjustCurrency(p) => p.account_id.to_string(),
            Payload::AcceptCashItem(p) | Payload::ReleaseCashItem(p) => p.account_id.to_string(),
            other => other.character_id().to_string(),
        }
    }

    /// The action that undoes this one, if any.
    pub fn inverse(&self) -> Option<Payload> {
        match self {
            Payload::AwardInventory(p) => Some(Payload::DestroyInventory(p.clone())),
            Payload::DestroyInventory(p) => Some(Payload::AwardInventory(p.clone())),
            Payload::EquipAsset(p) => Some(Payload::UnequipAsset(SlotMovePayload {
                character_id: p.character_id,
                source: p.destination,
                destination: p.source,
            })),
            Payload::UnequipAsset(p) => Some(Payload::EquipAsset(SlotMovePayload {
                character_id: p.character_id,
                source: p.destination,
                destination: p.source,
            })),
            Payload::TransferAsset(p) => Some(Payload::TransferAsset(TransferAssetPayload {
                from: p.to.clone(),
                to: p.from.clone(),
                ..p.clone()
            })),
            Payload::AwardMesos(p) => Some(Payload::AwardMesos(AmountPayload {
                character_id: p.character_id,
                amount: -p.amount,
            })),
            Payload::AwardFame(p) => Some(Payload::AwardFame(AmountPayload {
                character_id: p.character_id,
                amount: -p.amount,
            })),
            Payload::AdjustCurrency(p) => Some(Payload::AdjustCurrency(AdjustCurrencyPayload {
                amount: -p.amount,
                ..p.clone()
            })),
            Payload::AcceptCashItem(p) => Some(Payload::ReleaseCashItem(p.clone())),
            Payload::ReleaseCashItem(p) => Some(Payload::AcceptCashItem(p.clone())),
            Payload::AwardExperience(_)
            | Payload::AwardLevel(_)
            | Payload::ChangeMap(_)
            | Payload::ChangeJob(_)
            | Payload::AwardSkill(_)
            | Payload::StartQuest(_)
            | Payload::CompleteQuest(_)
            | Payload::AdvanceQuestProgress(_)
            | Payload::ValidateCharacterState(_)
            | Payload::SelectGachaponReward(_)
            | Payload::SendMessage(_) => None,
        }
    }

    /// Splits into the label and the bare payload document stored on a step.
    pub fn into_parts(self) -> serde_json::Result<(Action, serde_json::Value)> {
        let action = self.action();
        let mut tagged = serde_json::to_value(self)?;
        let body = tagged
            .get_mut("payload")
            .map(serde_json::Value::take)
            .unwrap_or(serde_json::Value::Null);
        Ok((action, body))
    }

    /// Reassembles a payload from its stored parts. Fails when the document
    /// does not match the shape the action requires.
    pub fn from_parts(action: Action, body: &serde_json::Value) -> serde_json::Result<Payload> {
        serde_json::from_value(serde_json::json!({ "action": action, "payload": body }))
    }
}
