//! Bot Conversation State
//!
//! A [`Bot`] is the single owner of everything a conversation carries
//! between turns: persona, schema-backed state, bounded history, the done
//! flag and the attached skill. Mutations go through the methods here and
//! are announced on a broadcast channel; observers cannot veto them.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use uuid::Uuid;

use crate::error::{AgentError, Result};
use crate::message::{History, ImageData, Turn, DEFAULT_MEMORY_LIMIT};
use crate::schema::{StateMap, StateSchema, StateStore};
use crate::skill::Skill;
use crate::template::RenderContext;

/// Unique bot identifier
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct BotId(String);

impl BotId {
    pub fn new() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    pub fn from_string(s: impl Into<String>) -> Self {
        Self(s.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for BotId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for BotId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Change notifications
#[derive(Clone, Debug, PartialEq)]
pub enum BotEvent {
    /// Validated updates about to be merged into the bot's or skill's state
    StateUpdating(StateMap),

    /// State committed; re-read it from the bot
    StateUpdated,

    /// A turn finished and the bot changed
    Changed,
}

const EVENT_CAPACITY: usize = 64;

#[derive(Clone, Copy)]
enum StateTarget {
    Bot,
    Skill,
}

impl StateTarget {
    fn missing_schema(self) -> &'static str {
        match self {
            StateTarget::Bot => "bot has no state schema",
            StateTarget::Skill => "no skill with a state schema attached",
        }
    }
}

/// Conversation state owned by one bot
#[derive(Debug)]
pub struct Bot {
    id: BotId,
    persona: String,
    state: Option<StateStore>,
    history: History,
    done: bool,
    skill: Option<Skill>,
    events: broadcast::Sender<BotEvent>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl Bot {
    pub fn builder(persona: impl Into<String>) -> BotBuilder {
        BotBuilder::new().persona(persona)
    }

    pub fn id(&self) -> &BotId {
        &self.id
    }

    pub fn persona(&self) -> &str {
        &self.persona
    }

    /// The bot's own state values, if it has a schema
    pub fn state(&self) -> Option<&StateMap> {
        self.state.as_ref().map(StateStore::values)
    }

    pub fn state_schema(&self) -> Option<&StateSchema> {
        self.state.as_ref().map(StateStore::schema)
    }

    /// State shown to the model: the bot's own, else the skill's
    pub fn tracked_state(&self) -> Option<&StateStore> {
        self.state
            .as_ref()
            .or_else(|| self.skill.as_ref().and_then(|s| s.state.as_ref()))
    }

    pub fn history(&self) -> &History {
        &self.history
    }

    pub fn is_done(&self) -> bool {
        self.done
    }

    pub fn set_done(&mut self, done: bool) {
        self.done = done;
        self.touch();
    }

    pub fn skill(&self) -> Option<&Skill> {
        self.skill.as_ref()
    }

    pub fn skill_mut(&mut self) -> Option<&mut Skill> {
        self.skill.as_mut()
    }

    /// Attach a skill, replacing any previous one; resets the done flag
    pub fn set_skill(&mut self, skill: Skill) -> Option<Skill> {
        tracing::debug!(bot_id = %self.id, objective = %skill.objective, "Skill attached");
        self.done = false;
        self.touch();
        self.skill.replace(skill)
    }

    pub fn clear_skill(&mut self) -> Option<Skill> {
        self.touch();
        self.skill.take()
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    pub fn updated_at(&self) -> DateTime<Utc> {
        self.updated_at
    }

    pub fn subscribe(&self) -> broadcast::Receiver<BotEvent> {
        self.events.subscribe()
    }

    fn emit(&self, event: BotEvent) {
        // No receivers is fine
        let _ = self.events.send(event);
    }

    fn touch(&mut self) {
        self.updated_at = Utc::now();
    }

    /// Append a turn, evicting the oldest past the memory limit
    pub fn push_turn(&mut self, turn: Turn) {
        self.history.push(turn);
        self.touch();
    }

    pub fn set_memory_limit(&mut self, limit: usize) {
        self.history.set_memory_limit(limit);
    }

    /// Validate, announce, merge and commit updates to the bot's own state
    pub fn update_state(&mut self, updates: &StateMap) -> Result<()> {
        self.commit_state(StateTarget::Bot, updates)
    }

    /// Same as [`Bot::update_state`], for the attached skill's state
    pub fn update_skill_state(&mut self, updates: &StateMap) -> Result<()> {
        self.commit_state(StateTarget::Skill, updates)
    }

    fn store(&self, target: StateTarget) -> Option<&StateStore> {
        match target {
            StateTarget::Bot => self.state.as_ref(),
            StateTarget::Skill => self.skill.as_ref().and_then(|s| s.state.as_ref()),
        }
    }

    fn commit_state(&mut self, target: StateTarget, updates: &StateMap) -> Result<()> {
        let pending = self
            .store(target)
            .ok_or_else(|| AgentError::Validation(target.missing_schema().into()))?
            .prepare(updates)?;

        self.emit(BotEvent::StateUpdating(pending.clone()));
        let store = match target {
            StateTarget::Bot => self.state_store_mut(),
            StateTarget::Skill => self.skill_store_mut(),
        };
        if let Some(store) = store {
            store.update(&pending)?;
        }

        self.touch();
        self.emit(BotEvent::StateUpdated);
        Ok(())
    }

    /// Route a state payload from a reply: the bot's schema wins, else the skill's.
    /// Returns false when neither has a schema and the payload was dropped.
    pub fn apply_reply_state(&mut self, updates: &StateMap) -> Result<bool> {
        if self.state.is_some() {
            self.update_state(updates)?;
            Ok(true)
        } else if self.skill.as_ref().is_some_and(|s| s.state.is_some()) {
            self.update_skill_state(updates)?;
            Ok(true)
        } else {
            tracing::warn!(bot_id = %self.id, "Reply carried state but nothing tracks it");
            Ok(false)
        }
    }

    pub(crate) fn notify_changed(&self) {
        self.emit(BotEvent::Changed);
    }

    /// Context for rendering, limited to the last `memory_limit` turns
    pub fn render_context(&self, memory_limit: Option<usize>) -> RenderContext<'_> {
        let window = memory_limit.unwrap_or(self.history.memory_limit());
        RenderContext {
            persona: &self.persona,
            state: self.tracked_state(),
            skill: self.skill.as_ref(),
            turns: self.history.window(window).collect(),
        }
    }

    /// Images carried by the turns that will be rendered
    pub fn prompt_images(&self, memory_limit: Option<usize>) -> Vec<ImageData> {
        let window = memory_limit.unwrap_or(self.history.memory_limit());
        self.history
            .window(window)
            .filter_map(|t| t.image.clone())
            .collect()
    }

    pub(crate) fn restore_parts(
        &mut self,
        id: BotId,
        history: History,
        done: bool,
        created_at: DateTime<Utc>,
    ) {
        self.id = id;
        self.history = history;
        self.done = done;
        self.created_at = created_at;
        self.touch();
    }

    pub(crate) fn state_store_mut(&mut self) -> Option<&mut StateStore> {
        self.state.as_mut()
    }

    pub(crate) fn skill_store_mut(&mut self) -> Option<&mut StateStore> {
        self.skill.as_mut().and_then(|s| s.state.as_mut())
    }
}

/// Builder for [`Bot`]
#[derive(Default)]
pub struct BotBuilder {
    persona: Option<String>,
    schema: Option<StateSchema>,
    memory_limit: Option<usize>,
    skill: Option<Skill>,
    id: Option<BotId>,
}

impl BotBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn persona(mut self, persona: impl Into<String>) -> Self {
        self.persona = Some(persona.into());
        self
    }

    pub fn schema(mut self, schema: StateSchema) -> Self {
        self.schema = Some(schema);
        self
    }

    pub fn memory_limit(mut self, limit: usize) -> Self {
        self.memory_limit = Some(limit);
        self
    }

    pub fn skill(mut self, skill: Skill) -> Self {
        self.skill = Some(skill);
        self
    }

    pub fn id(mut self, id: BotId) -> Self {
        self.id = Some(id);
        self
    }

    pub fn build(self) -> Result<Bot> {
        let persona = self
            .persona
            .filter(|p| !p.trim().is_empty())
            .ok_or_else(|| AgentError::missing_argument("persona"))?;

        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        let now = Utc::now();

        Ok(Bot {
            id: self.id.unwrap_or_default(),
            persona,
            state: self.schema.map(StateStore::new),
            history: History::with_memory_limit(self.memory_limit.unwrap_or(DEFAULT_MEMORY_LIMIT)),
            done: false,
            skill: self.skill,
            events,
            created_at: now,
            updated_at: now,
        })
    }
}
