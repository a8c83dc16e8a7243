//! Conversation Turns
//!
//! Turns exchanged between the caller, the model and the callback layer,
//! plus the bounded history window a bot keeps of them.

use std::collections::VecDeque;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Default number of turns a bot remembers
pub const DEFAULT_MEMORY_LIMIT: usize = 10;

/// Who produced a turn
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum Speaker {
    /// The caller
    Me,
    /// The model
    You,
    /// Synthetic turn carrying callback results or errors
    Api,
}

impl std::fmt::Display for Speaker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Speaker::Me => write!(f, "Me"),
            Speaker::You => write!(f, "You"),
            Speaker::Api => write!(f, "Api"),
        }
    }
}

/// Base64 encoded image attached to a turn
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImageData {
    /// MIME type, e.g. "image/png"
    pub mime_type: String,

    /// Base64 payload without a data-URL prefix
    pub data: String,
}

impl ImageData {
    pub fn new(mime_type: impl Into<String>, data: impl Into<String>) -> Self {
        Self {
            mime_type: mime_type.into(),
            data: data.into(),
        }
    }

    /// `data:` URL form used by OpenAI-style image parts
    pub fn data_url(&self) -> String {
        format!("data:{};base64,{}", self.mime_type, self.data)
    }
}

/// A single turn in a conversation
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Turn {
    pub speaker: Speaker,

    pub text: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image: Option<ImageData>,

    #[serde(default = "Utc::now")]
    pub timestamp: DateTime<Utc>,
}

impl Turn {
    pub fn new(speaker: Speaker, text: impl Into<String>) -> Self {
        Self {
            speaker,
            text: text.into(),
            image: None,
            timestamp: Utc::now(),
        }
    }

    pub fn me(text: impl Into<String>) -> Self {
        Self::new(Speaker::Me, text)
    }

    pub fn you(text: impl Into<String>) -> Self {
        Self::new(Speaker::You, text)
    }

    pub fn api(text: impl Into<String>) -> Self {
        Self::new(Speaker::Api, text)
    }

    pub fn with_image(mut self, image: ImageData) -> Self {
        self.image = Some(image);
        self
    }
}

impl From<&str> for Turn {
    fn from(text: &str) -> Self {
        Turn::me(text)
    }
}

impl From<String> for Turn {
    fn from(text: String) -> Self {
        Turn::me(text)
    }
}

/// Bounded, oldest-first-evicted turn history
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct History {
    turns: VecDeque<Turn>,

    #[serde(default = "default_memory_limit")]
    memory_limit: usize,
}

fn default_memory_limit() -> usize {
    DEFAULT_MEMORY_LIMIT
}

impl Default for History {
    fn default() -> Self {
        Self::with_memory_limit(DEFAULT_MEMORY_LIMIT)
    }
}

impl History {
    pub fn new() -> Self {
        Self::default()
    }

    /// A limit of zero is treated as one; a bot always remembers the turn in flight.
    pub fn with_memory_limit(limit: usize) -> Self {
        let memory_limit = limit.max(1);
        Self {
            turns: VecDeque::with_capacity(memory_limit),
            memory_limit,
        }
    }

    pub fn memory_limit(&self) -> usize {
        self.memory_limit
    }

    /// Change the limit, evicting the oldest turns if the history is now too long
    pub fn set_memory_limit(&mut self, limit: usize) {
        self.memory_limit = limit.max(1);
        self.evict();
    }

    /// Append a turn, evicting the oldest past the limit
    pub fn push(&mut self, turn: Turn) {
        self.turns.push_back(turn);
        self.evict();
    }

    fn evict(&mut self) {
        while self.turns.len() > self.memory_limit {
            self.turns.pop_front();
        }
    }

    pub fn iter(&self) -> impl DoubleEndedIterator<Item = &Turn> + ExactSizeIterator {
        self.turns.iter()
    }

    /// The most recent `n` turns, oldest first
    pub fn window(&self, n: usize) -> impl Iterator<Item = &Turn> {
        let skip = self.turns.len().saturating_sub(n);
        self.turns.iter().skip(skip)
    }

    pub fn last(&self) -> Option<&Turn> {
        self.turns.back()
    }

    pub fn clear(&mut self) {
        self.turns.clear();
    }

    pub fn len(&self) -> usize {
        self.turns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.turns.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_turn_creation() {
        let turn = Turn::me("Hello");
        assert_eq!(turn.speaker, Speaker::Me);
        assert_eq!(turn.text, "Hello");
        assert!(turn.image.is_none());
    }

    #[test]
    fn test_history_evicts_oldest() {
        let mut history = History::new();
        for i in 1..=11 {
            history.push(Turn::me(format!("turn {}", i)));
        }

        assert_eq!(history.len(), 10);
        assert_eq!(history.iter().next().unwrap().text, "turn 2");
        assert!(history.iter().all(|t| t.text != "turn 1"));
        assert_eq!(history.last().unwrap().text, "turn 11");
    }

    #[test]
    fn test_shrinking_limit_trims() {
        let mut history = History::with_memory_limit(5);
        for i in 0..5 {
            history.push(Turn::you(i.to_string()));
        }
        history.set_memory_limit(2);

        let texts: Vec<_> = history.iter().map(|t| t.text.as_str()).collect();
        assert_eq!(texts, vec!["3", "4"]);
    }

    #[test]
    fn test_window() {
        let mut history = History::new();
        history.push(Turn::me("a"));
        history.push(Turn::you("b"));
        history.push(Turn::api("c"));

        let texts: Vec<_> = history.window(2).map(|t| t.text.as_str()).collect();
        assert_eq!(texts, vec!["b", "c"]);
        assert_eq!(history.window(10).count(), 3);
    }

    #[test]
    fn test_image_data_url() {
        let image = ImageData::new("image/png", "AAAA");
        assert_eq!(image.data_url(), "data:image/png;base64,AAAA");
    }
}
