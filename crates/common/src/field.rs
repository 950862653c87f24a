use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct WorldId(pub u8);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ChannelId(pub u8);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct MapId(pub u32);

/// Addressing tuple for world simulation: `(world, channel, map, instance)`.
///
/// `instance` is nil for the shared copy of a map and a generated id for
/// instanced content (transport rides, party quests).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Field {
    pub world_id: WorldId,
    pub channel_id: ChannelId,
    pub map_id: MapId,
    #[serde(default)]
    pub instance: Uuid,
}

impl Field {
    pub fn new(world_id: WorldId, channel_id: ChannelId, map_id: MapId) -> Self {
        Self {
            world_id,
            channel_id,
            map_id,
            instance: Uuid::nil(),
        }
    }

    pub fn with_instance(mut self, instance: Uuid) -> Self {
        self.instance = instance;
        self
    }

    /// Same field with a different map, keeping world, channel and instance.
    pub fn with_map(mut self, map_id: MapId) -> Self {
        self.map_id = map_id;
        self
    }

    pub fn is_instanced(&self) -> bool {
        !self.instance.is_nil()
    }
}

impl std::fmt::Display for Field {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{}:{}:{}",
            self.world_id.0, self.channel_id.0, self.map_id.0
        )?;
        if self.is_instanced() {
            write!(f, ":{}", self.instance)?;
        }
        Ok(())
    }
}
