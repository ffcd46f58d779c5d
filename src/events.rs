use serde::Serialize;
use tokio::sync::broadcast;

use wardrobe_core::slots::Outfit;
use wardrobe_core::{CharacterId, InstanceId};

const EVENT_BUS_CAPACITY: usize = 256;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum OutfitOwner {
    Bot,
    User,
}

impl OutfitOwner {
    pub fn as_str(self) -> &'static str {
        match self {
            OutfitOwner::Bot => "bot",
            OutfitOwner::User => "user",
        }
    }
}

/// Notifications for panels and logging. `character_id` is `None` for user events.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum OutfitEvent {
    InstanceCreated {
        owner: OutfitOwner,
        character_id: Option<CharacterId>,
        instance_id: InstanceId,
    },
    InstanceDeleted {
        owner: OutfitOwner,
        character_id: Option<CharacterId>,
        instance_id: InstanceId,
    },
    InstanceAdopted {
        character_id: CharacterId,
        previous_instance_id: InstanceId,
        instance_id: InstanceId,
    },
    OutfitChanged {
        owner: OutfitOwner,
        character_id: Option<CharacterId>,
        instance_id: InstanceId,
        outfit: Outfit,
    },
    PresetSaved {
        owner: OutfitOwner,
        key: String,
        name: String,
    },
    PresetOverwritten {
        owner: OutfitOwner,
        key: String,
        name: String,
    },
    PresetLoaded {
        owner: OutfitOwner,
        key: String,
        name: String,
    },
    PresetDeleted {
        owner: OutfitOwner,
        key: String,
        name: String,
    },
    DefaultOutfitSet {
        owner: OutfitOwner,
        key: String,
        preset: Option<String>,
    },
    DefaultOutfitCleared {
        owner: OutfitOwner,
        key: String,
    },
    SettingsChanged,
    DataWiped,
}

/// Fire-and-forget fan-out of [`OutfitEvent`]s; publishing never waits on receivers.
#[derive(Clone)]
pub struct EventBus {
    sender: broadcast::Sender<OutfitEvent>,
}

impl EventBus {
    pub fn new() -> Self {
        let (sender, _) = broadcast::channel(EVENT_BUS_CAPACITY);
        EventBus { sender }
    }

    pub fn publish(&self, event: OutfitEvent) {
        let _ = self.sender.send(event);
    }

    pub fn subscribe(&self) -> broadcast::Receiver<OutfitEvent> {
        self.sender.subscribe()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}
