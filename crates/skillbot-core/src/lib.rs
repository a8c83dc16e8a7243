//! # skillbot-core
//!
//! Conversational turn pipeline for text-protocol LLM bots: prompt rendering,
//! reply parsing, callback dispatch and schema-validated state.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────────┐
//! │                          Orchestrator                            │
//! │  ┌──────────────┐  ┌──────────────┐  ┌────────────────────────┐  │
//! │  │   Template   │  │  LlmAdapter  │  │    ResponseParser      │  │
//! │  │   Renderer   │──│  (Strategy)  │──│  done / state / calls  │  │
//! │  └──────────────┘  └──────────────┘  └────────────────────────┘  │
//! │          ▲                                       │               │
//! │          │            ┌──────────────┐           ▼               │
//! │          └────────────│     Bot      │◄── state merge, history   │
//! │                       └──────────────┘                           │
//! └──────────────────────────────────────────────────────────────────┘
//! ```
//!
//! Replies speak a plain-text protocol: a done token, a JSON state block
//! between boundary markers, and `<< name >>{args}<</ name >>` callback
//! markup. Callback results are sent back to the model as `Api` turns until
//! a reply requests no more.

pub mod bot;
pub mod error;
pub mod message;
pub mod orchestrator;
pub mod parser;
pub mod protocol;
pub mod provider;
pub mod schema;
pub mod skill;
pub mod snapshot;
pub mod template;

pub use bot::{Bot, BotBuilder, BotEvent, BotId};
pub use error::{AgentError, Result};
pub use message::{History, ImageData, Speaker, Turn};
pub use orchestrator::{Orchestrator, OrchestratorBuilder, OrchestratorConfig, TurnHandle};
pub use parser::{ParsedResponse, ResponseParser};
pub use protocol::Protocol;
pub use provider::{ChatRequest, ChatTransport, LlmAdapter, Prompt, ProviderAdapter, ReasoningEffort, SendOptions};
pub use schema::{FieldSpec, FieldType, StateMap, StateSchema, StateStore};
pub use skill::{Callback, CallbackHandler, CallbackOutput, CallbackRegistry, Skill};
pub use snapshot::{BotSnapshot, MemorySnapshotStore, SnapshotStore};
pub use template::TemplateRenderer;
