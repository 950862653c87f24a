//! The action table: where each action's command goes, where its status
//! event comes back, and which status kinds count as success or failure.

use std::time::Duration;

use message_bus::Topic;

use crate::Action;

pub const INVENTORY_COMMAND: Topic = Topic::new("COMMAND_TOPIC_INVENTORY", "inventory.command");
pub const INVENTORY_STATUS: Topic = Topic::new("EVENT_TOPIC_INVENTORY_STATUS", "inventory.status");
pub const TRANSFER_COMMAND: Topic = Topic::new("COMMAND_TOPIC_TRANSFER", "transfer.command");
pub const TRANSFER_STATUS: Topic = Topic::new("EVENT_TOPIC_TRANSFER_STATUS", "transfer.status");
pub const CHARACTER_COMMAND: Topic = Topic::new("COMMAND_TOPIC_CHARACTER", "character.command");
pub const CHARACTER_STATUS: Topic = Topic::new("EVENT_TOPIC_CHARACTER_STATUS", "character.status");
pub const MAP_COMMAND: Topic = Topic::new("COMMAND_TOPIC_MAP", "map.command");
pub const CASH_SHOP_COMMAND: Topic = Topic::new("COMMAND_TOPIC_CASH_SHOP", "cashshop.command");
pub const CASH_SHOP_STATUS: Topic = Topic::new("EVENT_TOPIC_CASH_SHOP_STATUS", "cashshop.status");
pub const SKILL_COMMAND: Topic = Topic::new("COMMAND_TOPIC_SKILL", "skill.command");
pub const SKILL_STATUS: Topic = Topic::new("EVENT_TOPIC_SKILL_STATUS", "skill.status");
pub const QUEST_COMMAND: Topic = Topic::new("COMMAND_TOPIC_QUEST", "quest.command");
pub const QUEST_STATUS: Topic = Topic::new("EVENT_TOPIC_QUEST_STATUS", "quest.status");
pub const VALIDATION_COMMAND: Topic = Topic::new("COMMAND_TOPIC_VALIDATION", "validation.command");
pub const VALIDATION_STATUS: Topic = Topic::new("EVENT_TOPIC_VALIDATION_STATUS", "validation.status");
pub const GACHAPON_COMMAND: Topic = Topic::new("COMMAND_TOPIC_GACHAPON", "gachapon.command");
pub const GACHAPON_STATUS: Topic = Topic::new("EVENT_TOPIC_GACHAPON_STATUS", "gachapon.status");
pub const MESSAGE_COMMAND: Topic = Topic::new("COMMAND_TOPIC_MESSAGE", "message.command");
pub const MESSAGE_STATUS: Topic = Topic::new("EVENT_TOPIC_MESSAGE_STATUS", "message.status");

/// Saga creation requests.
pub const SAGA_COMMAND: Topic = Topic::new("COMMAND_TOPIC_SAGA", "saga.command");
/// Terminal saga broadcasts.
pub const SAGA_STATUS: Topic = Topic::new("EVENT_TOPIC_SAGA_STATUS", "saga.status");

/// How a status event relates to the step awaiting it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verdict {
    Success,
    Failure,
}

/// One row of the action table.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ActionSpec {
    pub command_topic: Topic,
    pub status_topic: Topic,
    /// `type` of the command message.
    pub command_type: &'static str,
    pub success: &'static str,
    pub failure: &'static str,
    /// Overrides the orchestrator's default step deadline.
    pub timeout: Option<Duration>,
}

impl ActionSpec {
    const fn new(
        command_topic: Topic,
        status_topic: Topic,
        command_type: &'static str,
        success: &'static str,
        failure: &'static str,
    ) -> Self {
        Self {
            command_topic,
            status_topic,
            command_type,
            success,
            failure,
            timeout: None,
        }
    }

    const fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Classifies a status event by its `type`. Kinds matching neither
    /// predicate are progress notices and are ignored.
    pub fn classify(&self, kind: &str) -> Option<Verdict> {
        if kind.eq_ignore_ascii_case(self.success) {
            Some(Verdict::Success)
        } else if kind.eq_ignore_ascii_case(self.failure) {
            Some(Verdict::Failure)
        } else {
            None
        }
    }
}

const MOVEMENT_TIMEOUT: Duration = Duration::from_secs(60);

/// Looks up the table row for `action`. The table is closed: every action
/// has exactly one row.
pub fn spec(action: Action) -> ActionSpec {
    use Action::*;
    match action {
        AwardInventory => ActionSpec::new(INVENTORY_COMMAND, INVENTORY_STATUS, "create", "created", "error"),
        DestroyInventory => ActionSpec::new(INVENTORY_COMMAND, INVENTORY_STATUS, "destroy", "destroyed", "error"),
        EquipAsset => ActionSpec::new(INVENTORY_COMMAND, INVENTORY_STATUS, "equip", "equipped", "error"),
        UnequipAsset => ActionSpec::new(INVENTORY_COMMAND, INVENTORY_STATUS, "unequip", "unequipped", "error"),
        TransferAsset => ActionSpec::new(TRANSFER_COMMAND, TRANSFER_STATUS, "transfer", "completed", "failed")
            .with_timeout(MOVEMENT_TIMEOUT),
        AwardMesos => ActionSpec::new(CHARACTER_COMMAND, CHARACTER_STATUS, "change_mesos", "mesos_changed", "error"),
        AwardExperience => ActionSpec::new(CHARACTER_COMMAND, CHARACTER_STATUS, "award_experience", "experience_changed", "error"),
        AwardLevel => ActionSpec::new(CHARACTER_COMMAND, CHARACTER_STATUS, "award_level", "level_changed", "error"),
        AwardFame => ActionSpec::new(CHARACTER_COMMAND, CHARACTER_STATUS, "change_fame", "fame_changed", "error"),
        ChangeJob => ActionSpec::new(CHARACTER_COMMAND, CHARACTER_STATUS, "change_job", "job_changed", "error"),
        ChangeMap => ActionSpec::new(MAP_COMMAND, CHARACTER_STATUS, "change_map", "map_changed", "error")
            .with_timeout(MOVEMENT_TIMEOUT),
        AdjustCurrency => ActionSpec::new(CASH_SHOP_COMMAND, CASH_SHOP_STATUS, "adjust_currency", "currency_adjusted", "error"),
        AcceptCashItem => ActionSpec::new(CASH_SHOP_COMMAND, CASH_SHOP_STATUS, "accept", "accepted", "error"),
        ReleaseCashItem => ActionSpec::new(CASH_SHOP_COMMAND, CASH_SHOP_STATUS, "release", "released", "error"),
        AwardSkill => ActionSpec::new(SKILL_COMMAND, SKILL_STATUS, "create", "created", "error"),
        StartQuest => ActionSpec::new(QUEST_COMMAND, QUEST_STATUS, "start", "started", "error"),
        CompleteQuest => ActionSpec::new(QUEST_COMMAND, QUEST_STATUS, "complete", "completed", "error"),
        AdvanceQuestProgress => ActionSpec::new(QUEST_COMMAND, QUEST_STATUS, "set_progress", "progress_updated", "error"),
        ValidateCharacterState => ActionSpec::new(VALIDATION_COMMAND, VALIDATION_STATUS, "validate", "passed", "failed"),
        SelectGachaponReward => ActionSpec::new(GACHAPON_COMMAND, GACHAPON_STATUS, "select_reward", "reward_selected", "error"),
        SendMessage => ActionSpec::new(MESSAGE_COMMAND, MESSAGE_STATUS, "send", "sent", "error"),
    }
}

/// Every distinct status topic in the table. The orchestrator's correlation
/// group subscribes to all of them.
pub fn status_topics() -> Vec<Topic> {
    let mut topics: Vec<Topic> = Vec::new();
    for action in Action::ALL {
        let topic = spec(action).status_topic;
        if !topics.contains(&topic) {
            topics.push(topic);
        }
    }
    topics
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn predicates_match_case_insensitively() {
        let row = spec(Action::AwardInventory);
        assert_eq!(row.classify("created"), Some(Verdict::Success));
        assert_eq!(row.classify("CREATED"), Some(Verdict::Success));
        assert_eq!(row.classify("error"), Some(Verdict::Failure));
        assert_eq!(row.classify("quantity_changed"), None);
    }

    #[test]
    fn change_map_reports_on_character_status() {
        let row = spec(Action::ChangeMap);
        assert_eq!(row.command_topic.semantic_name(), "map.command");
        assert_eq!(row.status_topic.semantic_name(), "character.status");
        assert_eq!(row.timeout, Some(MOVEMENT_TIMEOUT));
    }

    #[test]
    fn status_topics_are_deduplicated() {
        let topics = status_topics();
        let names: Vec<_> = topics.iter().map(|t| t.semantic_name()).collect();
        assert_eq!(
            names.iter().filter(|n| **n == "character.status").count(),
            1
        );
        assert!(names.contains(&"transfer.status"));
        assert!(names.contains(&"validation.status"));
        assert!(!names.contains(&"saga.status"));
    }
}
