//! Prompt Templates
//!
//! Renders the single textual prompt sent to the provider from the bot's
//! persona, tracked state, skill directives, callback directory and recent
//! turns. Two built-in phrasings exist:
//!
//! - **Transcript**: a speaker-labeled transcript ending in an open `You:` turn.
//! - **State boundary**: adds the schema and current state, and asks the model
//!   to echo the updated state between boundary tokens.
//!
//! A skill may replace both with its own template (see [`render_custom`]).

use std::collections::HashMap;
use std::fmt::Write as _;
use std::sync::LazyLock;

use regex::{Captures, Regex};
use serde_json::Value;

use crate::message::Turn;
use crate::protocol::Protocol;
use crate::schema::StateStore;
use crate::skill::{CallbackRegistry, Skill};

/// Which phrasing a prompt uses
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PromptStyle {
    Transcript,
    StateBoundary,
    Custom,
}

/// Everything a prompt is rendered from
#[derive(Clone, Debug)]
pub struct RenderContext<'a> {
    pub persona: &'a str,

    /// Tracked state: the bot's own, else the attached skill's
    pub state: Option<&'a StateStore>,

    pub skill: Option<&'a Skill>,

    /// Oldest first
    pub turns: Vec<&'a Turn>,
}

impl<'a> RenderContext<'a> {
    pub fn new(persona: &'a str) -> Self {
        Self {
            persona,
            state: None,
            skill: None,
            turns: Vec::new(),
        }
    }

    pub fn style(&self) -> PromptStyle {
        if self.skill.is_some_and(|s| s.template.is_some()) {
            PromptStyle::Custom
        } else if self.state.is_some() {
            PromptStyle::StateBoundary
        } else {
            PromptStyle::Transcript
        }
    }
}

/// Renders prompts for one protocol token set
#[derive(Clone, Debug, Default)]
pub struct TemplateRenderer {
    protocol: Protocol,
}

impl TemplateRenderer {
    pub fn new(protocol: Protocol) -> Self {
        Self { protocol }
    }

    pub fn protocol(&self) -> &Protocol {
        &self.protocol
    }

    /// Render the prompt text; pure apart from trace logging
    pub fn render(&self, ctx: &RenderContext<'_>) -> String {
        let style = ctx.style();
        let prompt = match (style, ctx.skill.and_then(|s| s.template.as_deref())) {
            (PromptStyle::Custom, Some(template)) => render_custom(template, &self.variables(ctx)),
            (PromptStyle::StateBoundary, _) => self.render_state_boundary(ctx),
            _ => self.render_transcript(ctx),
        };

        tracing::trace!(?style, prompt = %prompt, "Rendered prompt");
        prompt
    }

    fn render_transcript(&self, ctx: &RenderContext<'_>) -> String {
        let mut prompt = String::new();
        prompt.push_str(ctx.persona.trim());
        prompt.push_str("\n\n");

        if let Some(skill) = ctx.skill {
            prompt.push_str(&skill_directives(skill));
            prompt.push_str(&self.function_directory(&skill.callbacks));
        }

        let _ = writeln!(
            prompt,
            "When the conversation is complete, include {} in your reply.\n",
            self.protocol.done_token
        );

        prompt.push_str(
            "The conversation so far. Lines starting with \"Me:\" are mine, \"You:\" are yours \
             and \"Api:\" are results of functions you called.\n\n",
        );
        prompt.push_str(&transcript(&ctx.turns));
        prompt.push_str("You:");
        prompt
    }

    fn render_state_boundary(&self, ctx: &RenderContext<'_>) -> String {
        let mut prompt = String::new();
        prompt.push_str(ctx.persona.trim());
        prompt.push_str("\n\n");

        if let Some(skill) = ctx.skill {
            prompt.push_str(&skill_directives(skill));
        }

        if let Some(state) = ctx.state {
            let _ = writeln!(
                prompt,
                "We are tracking the following fields:\n{}\n",
                to_json(&state.schema().describe())
            );
            let _ = writeln!(
                prompt,
                "The current state is:\n{}\n",
                to_json(&Value::Object(state.rendered()))
            );
            let _ = writeln!(
                prompt,
                "After your reply, output the complete updated state as a single JSON object \
                 between {b} markers, for example:\n{example}\n",
                b = self.protocol.state_boundary,
                example = self.protocol.wrap_state("{\"field\": \"value\"}"),
            );
        }

        if let Some(skill) = ctx.skill {
            prompt.push_str(&self.function_directory(&skill.callbacks));
        }

        let done_when = ctx
            .skill
            .and_then(|s| s.done_condition.as_deref())
            .unwrap_or("every required field has a value and the user has confirmed it");
        let _ = writeln!(
            prompt,
            "When {}, include {} in your reply.\n",
            done_when.trim_end_matches('.'),
            self.protocol.done_token
        );

        prompt.push_str("Conversation:\n");
        prompt.push_str(&transcript(&ctx.turns));
        prompt.push_str("You:");
        prompt
    }

    /// `<functions>` tag block describing the callback directory
    pub fn function_directory(&self, callbacks: &CallbackRegistry) -> String {
        if callbacks.is_empty() {
            return String::new();
        }

        let mut block = String::from("You can call the following functions:\n<functions>\n");
        for (name, callback) in callbacks.iter() {
            let _ = writeln!(block, "<function name=\"{}\">", name);
            let _ = writeln!(block, "<usage>{}</usage>", callback.usage_hint);
            if !callback.parameters.is_empty() {
                block.push_str("<parameters>\n");
                for param in &callback.parameters {
                    let _ = writeln!(
                        block,
                        "<parameter name=\"{}\" type=\"{}\" required=\"{}\">{}</parameter>",
                        param.name, param.field_type, param.required, param.description
                    );
                }
                block.push_str("</parameters>\n");
            }
            block.push_str("</function>\n");
        }
        block.push_str("</functions>\n");

        let _ = writeln!(
            block,
            "To call a function, reply with {} or, for a function without parameters, {}. \
             Its result arrives in a turn starting with \"Api:\".\n",
            Protocol::call_markup("name", Some("{\"parameter\": \"value\"}")),
            Protocol::call_markup("name", None),
        );
        block
    }

    /// Variables available to custom templates
    fn variables(&self, ctx: &RenderContext<'_>) -> HashMap<&'static str, String> {
        let mut vars = HashMap::new();
        vars.insert("persona", ctx.persona.to_string());
        vars.insert("transcript", transcript(&ctx.turns));
        vars.insert("done_token", self.protocol.done_token.clone());
        vars.insert("state_boundary", self.protocol.state_boundary.clone());

        if let Some(state) = ctx.state {
            vars.insert("schema", to_json(&state.schema().describe()));
            vars.insert("state", to_json(&Value::Object(state.rendered())));
        }

        if let Some(skill) = ctx.skill {
            vars.insert("objective", skill.objective.clone());
            vars.insert("done_condition", skill.done_condition.clone().unwrap_or_default());
            vars.insert(
                "constraints",
                skill.constraints.iter().map(|c| format!("- {}\n", c)).collect(),
            );
            vars.insert("functions", self.function_directory(&skill.callbacks));
        }

        vars
    }
}

fn skill_directives(skill: &Skill) -> String {
    let mut out = String::new();
    let _ = writeln!(out, "Your job: {}", skill.objective.trim());
    if let Some(done) = &skill.done_condition {
        let _ = writeln!(out, "You are done when: {}", done.trim());
    }
    if !skill.constraints.is_empty() {
        out.push_str("Remember:\n");
        for constraint in &skill.constraints {
            let _ = writeln!(out, "- {}", constraint);
        }
    }
    out.push('\n');
    out
}

fn transcript(turns: &[&Turn]) -> String {
    let mut out = String::new();
    for turn in turns {
        let _ = write!(out, "{}: {}", turn.speaker, turn.text.trim());
        if turn.image.is_some() {
            out.push_str(" [image attached]");
        }
        out.push('\n');
    }
    out
}

fn to_json(value: &Value) -> String {
    serde_json::to_string(value).unwrap_or_else(|_| "null".into())
}

static IF_BLOCK: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?s)\{\{#if\s+(\w+)\s*\}\}(.*?)\{\{/if\}\}").expect("valid if-block pattern")
});

static VARIABLE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\{\{\s*(\w+)\s*\}\}").expect("valid variable pattern"));

/// Render a custom template.
///
/// `{{#if name}}...{{/if}}` keeps its body only when `name` is non-empty;
/// `{{name}}` is replaced by the variable's value, or nothing if unknown.
pub fn render_custom(template: &str, vars: &HashMap<&'static str, String>) -> String {
    let is_set = |name: &str| vars.get(name).is_some_and(|v| !v.trim().is_empty());

    let with_blocks = IF_BLOCK.replace_all(template, |caps: &Captures<'_>| {
        if is_set(&caps[1]) {
            caps[2].to_string()
        } else {
            String::new()
        }
    });

    VARIABLE
        .replace_all(&with_blocks, |caps: &Captures<'_>| {
            vars.get(&caps[1]).cloned().unwrap_or_default()
        })
        .into_owned()
}
