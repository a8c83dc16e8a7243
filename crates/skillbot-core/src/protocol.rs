//! Reply Protocol Tokens
//!
//! The textual markers the prompt teaches the model and the parser reads back.

/// Signals the model considers the conversation finished
pub const DONE_TOKEN: &str = "DONE_DONE_DONE";

/// Repeated on both sides of an embedded JSON state object
pub const STATE_BOUNDARY: &str = "*****";

/// Repeated on both sides of a bare, zero-argument callback name
pub const CALLBACK_BOUNDARY: &str = "xxxxx";

/// Token set shared by the renderer and the parser
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Protocol {
    pub done_token: String,
    pub state_boundary: String,
    pub callback_boundary: String,
}

impl Default for Protocol {
    fn default() -> Self {
        Self {
            done_token: DONE_TOKEN.into(),
            state_boundary: STATE_BOUNDARY.into(),
            callback_boundary: CALLBACK_BOUNDARY.into(),
        }
    }
}

impl Protocol {
    /// `*****{"a":1}*****` style wrapping of a JSON payload
    pub fn wrap_state(&self, json: &str) -> String {
        format!("{b} {json} {b}", b = self.state_boundary)
    }

    /// Legacy `xxxxx name xxxxx` placeholder for a zero-argument callback
    pub fn legacy_placeholder(&self, name: &str) -> String {
        format!("{b} {name} {b}", b = self.callback_boundary)
    }

    /// `<< name >>{args}<</ name >>` invocation markup
    pub fn call_markup(name: &str, args: Option<&str>) -> String {
        match args {
            Some(args) => format!("<< {name} >>{args}<</ {name} >>"),
            None => format!("<< {name} />>"),
        }
    }
}
