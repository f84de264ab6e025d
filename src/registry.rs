//! Allow-list of externally addressable entities and the storage collections
//! behind them.
//!
//! The generic sync route takes the entity name from the URL path, so the name
//! is resolved against a closed enumeration before any storage access. Names
//! outside the enumeration never reach the `Store`.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// Upper bound on the number of items a single batch upsert may carry.
pub const DEFAULT_MAX_BATCH: usize = 500;

/// Field that identifies the owning user of every tenant-scoped row.
pub const OWNER_FIELD: &str = "user_id";

/// Natural key used for idempotent upserts.
pub const ID_FIELD: &str = "id";

/// Storage collections known to the gateway. `Users` is internal and is only
/// written by identity webhooks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Collection {
    Habits,
    Dsa,
    Health,
    Journal,
    Tasks,
    Goals,
    Notifications,
    Users,
}

impl Collection {
    pub fn table_name(self) -> &'static str {
        match self {
            Collection::Habits => "habits",
            Collection::Dsa => "dsa",
            Collection::Health => "health",
            Collection::Journal => "journal",
            Collection::Tasks => "tasks",
            Collection::Goals => "goals",
            Collection::Notifications => "notifications",
            Collection::Users => "users",
        }
    }
}

impl fmt::Display for Collection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.table_name())
    }
}

/// Entities reachable through `/sync/:entity`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Entity {
    Habits,
    Dsa,
    Health,
    Journal,
    Tasks,
    Goals,
    Notifications,
}

impl Entity {
    pub const ALL: [Entity; 7] = [
        Entity::Habits,
        Entity::Dsa,
        Entity::Health,
        Entity::Journal,
        Entity::Tasks,
        Entity::Goals,
        Entity::Notifications,
    ];

    pub fn name(self) -> &'static str {
        self.collection().table_name()
    }

    pub fn collection(self) -> Collection {
        match self {
            Entity::Habits => Collection::Habits,
            Entity::Dsa => Collection::Dsa,
            Entity::Health => Collection::Health,
            Entity::Journal => Collection::Journal,
            Entity::Tasks => Collection::Tasks,
            Entity::Goals => Collection::Goals,
            Entity::Notifications => Collection::Notifications,
        }
    }

    pub fn resolve(name: &str) -> Result<Entity, UnknownEntity> {
        Entity::ALL
            .into_iter()
            .find(|entity| entity.name() == name)
            .ok_or_else(|| UnknownEntity(name.to_string()))
    }
}

impl FromStr for Entity {
    type Err = UnknownEntity;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Entity::resolve(s)
    }
}

impl fmt::Display for Entity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("Invalid entity \"{0}\". Allowed: {allowed}", allowed = allowed_names())]
pub struct UnknownEntity(pub String);

fn allowed_names() -> String {
    Entity::ALL
        .iter()
        .map(|entity| entity.name())
        .collect::<Vec<_>>()
        .join(", ")
}

/// Entities with a dedicated `/api/<entity>` REST family, plus the singular
/// noun used in their not-found messages.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RestEntity {
    Habits,
    Tasks,
    Goals,
    Health,
    Journal,
}

impl RestEntity {
    pub const ALL: [RestEntity; 5] = [
        RestEntity::Habits,
        RestEntity::Tasks,
        RestEntity::Goals,
        RestEntity::Health,
        RestEntity::Journal,
    ];

    pub fn entity(self) -> Entity {
        match self {
            RestEntity::Habits => Entity::Habits,
            RestEntity::Tasks => Entity::Tasks,
            RestEntity::Goals => Entity::Goals,
            RestEntity::Health => Entity::Health,
            RestEntity::Journal => Entity::Journal,
        }
    }

    pub fn collection(self) -> Collection {
        self.entity().collection()
    }

    pub fn path(self) -> &'static str {
        self.entity().name()
    }

    pub fn singular(self) -> &'static str {
        match self {
            RestEntity::Habits => "Habit",
            RestEntity::Tasks => "Task",
            RestEntity::Goals => "Goal",
            RestEntity::Health => "Health log",
            RestEntity::Journal => "Journal entry",
        }
    }

    pub fn not_found_message(self) -> String {
        format!("{} not found", self.singular())
    }
}
