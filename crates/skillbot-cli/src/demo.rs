//! Demo skill wired into the REPL

use skillbot_core::skill::{param_str, Callback, ParamSpec};
use skillbot_core::{FieldSpec, Result, Skill, StateSchema};

pub const PERSONA: &str = "You are Skillbot, a friendly assistant who keeps answers short.";

/// Answers date and time questions and remembers the user's name
pub fn time_concierge() -> Result<Skill> {
    Skill::builder("Answer the user's questions about the current date and time.")
        .done_when("the user says goodbye")
        .constraint("Always call current_time instead of guessing the time.")
        .constraint("Greet the user by name once you know it.")
        .callback("current_time", current_time())
        .schema(
            StateSchema::new()
                .field(FieldSpec::string("user_name").describe("The user's first name")),
        )
        .build()
}

fn current_time() -> Callback {
    Callback::new("Get the current date and time in UTC", |params| async move {
        let now = chrono::Utc::now();
        let output = match param_str(params.as_ref(), "format").unwrap_or("human") {
            "iso" => now.to_rfc3339(),
            "unix" => now.timestamp().to_string(),
            _ => now.format("%A, %B %d, %Y at %H:%M:%S UTC").to_string(),
        };
        Ok::<_, anyhow::Error>(output)
    })
    .param(
        ParamSpec::string("format")
            .describe("Output format: 'iso', 'human', or 'unix'")
            .default_value("human")
            .choices(["iso", "human", "unix"]),
    )
}
