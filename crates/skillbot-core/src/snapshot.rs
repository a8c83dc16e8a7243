//! Bot Snapshots
//!
//! Serializable captures of a bot's conversation state, and a store trait
//! for persisting them between process runs.

use std::collections::HashMap;
use std::sync::{PoisonError, RwLock};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::bot::{Bot, BotId};
use crate::error::{AgentError, Result};
use crate::message::History;
use crate::schema::StateMap;

/// Point-in-time copy of a bot's conversation state
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct BotSnapshot {
    pub id: BotId,

    pub persona: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub state: Option<StateMap>,

    /// State of the attached skill, if it tracks any
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub skill_state: Option<StateMap>,

    pub history: History,

    #[serde(default)]
    pub is_done: bool,

    pub created_at: DateTime<Utc>,

    pub updated_at: DateTime<Utc>,
}

impl Bot {
    pub fn snapshot(&self) -> BotSnapshot {
        BotSnapshot {
            id: self.id().clone(),
            persona: self.persona().to_string(),
            state: self.state().cloned(),
            skill_state: self
                .skill()
                .and_then(|s| s.state.as_ref())
                .map(|s| s.values().clone()),
            history: self.history().clone(),
            is_done: self.is_done(),
            created_at: self.created_at(),
            updated_at: self.updated_at(),
        }
    }

    /// Load a snapshot into this bot. State is re-validated against the
    /// bot's current schemas; on error the bot is unchanged.
    pub fn restore(&mut self, snapshot: BotSnapshot) -> Result<()> {
        if snapshot.persona != self.persona() {
            tracing::warn!(bot_id = %snapshot.id, "Restoring snapshot taken with a different persona");
        }

        if let Some(values) = &snapshot.state {
            let schema = self.state_schema().ok_or_else(|| {
                AgentError::Validation("snapshot has state but bot has no schema".into())
            })?;
            schema.validate(values)?;
        }
        if let Some(values) = &snapshot.skill_state {
            let schema = self.skill().and_then(|s| s.schema()).ok_or_else(|| {
                AgentError::Validation("snapshot has skill state but no skill schema is attached".into())
            })?;
            schema.validate(values)?;
        }

        if let (Some(values), Some(store)) = (&snapshot.state, self.state_store_mut()) {
            store.replace(values)?;
        }
        if let (Some(values), Some(store)) = (&snapshot.skill_state, self.skill_store_mut()) {
            store.replace(values)?;
        }

        let mut history = snapshot.history;
        history.set_memory_limit(self.history().memory_limit());
        self.restore_parts(snapshot.id, history, snapshot.is_done, snapshot.created_at);
        Ok(())
    }
}

/// Snapshot store trait for persistence
pub trait SnapshotStore: Send + Sync {
    fn save(&self, snapshot: &BotSnapshot) -> Result<()>;

    fn load(&self, id: &BotId) -> Result<Option<BotSnapshot>>;

    fn delete(&self, id: &BotId) -> Result<()>;

    /// Most recently updated first
    fn list(&self, limit: usize) -> Result<Vec<BotSnapshot>>;
}

/// In-memory snapshot store (for development/testing)
#[derive(Default)]
pub struct MemorySnapshotStore {
    snapshots: RwLock<HashMap<BotId, BotSnapshot>>,
}

impl MemorySnapshotStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl SnapshotStore for MemorySnapshotStore {
    fn save(&self, snapshot: &BotSnapshot) -> Result<()> {
        let mut snapshots = self.snapshots.write().unwrap_or_else(PoisonError::into_inner);
        snapshots.insert(snapshot.id.clone(), snapshot.clone());
        Ok(())
    }

    fn load(&self, id: &BotId) -> Result<Option<BotSnapshot>> {
        let snapshots = self.snapshots.read().unwrap_or_else(PoisonError::into_inner);
        Ok(snapshots.get(id).cloned())
    }

    fn delete(&self, id: &BotId) -> Result<()> {
        let mut snapshots = self.snapshots.write().unwrap_or_else(PoisonError::into_inner);
        snapshots.remove(id);
        Ok(())
    }

    fn list(&self, limit: usize) -> Result<Vec<BotSnapshot>> {
        let snapshots = self.snapshots.read().unwrap_or_else(PoisonError::into_inner);
        let mut result: Vec<_> = snapshots.values().cloned().collect();

        result.sort_by(|a, b| b.updated_at.cmp(&a.updated_at));
        result.truncate(limit);

        Ok(result)
    }
}
