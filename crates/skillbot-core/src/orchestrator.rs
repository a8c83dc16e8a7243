//! Turn Orchestrator
//!
//! Drives one conversational turn: render the prompt, send it through the
//! adapter, parse the reply, merge state, and feed callback results back to
//! the model until a reply produces none.
//!
//! Follow-up turns are kept in a queue rather than recursing, so the bound on
//! callback round-trips is a plain counter ([`OrchestratorConfig::max_iterations`]).

use std::collections::VecDeque;
use std::sync::Arc;

use tokio_util::sync::CancellationToken;

use crate::bot::Bot;
use crate::error::{AgentError, Result};
use crate::message::Turn;
use crate::parser::{ParsedResponse, ResponseParser};
use crate::protocol::Protocol;
use crate::provider::{LlmAdapter, Prompt, SendOptions};
use crate::skill::CallbackOutput;
use crate::template::TemplateRenderer;

/// Orchestrator configuration
#[derive(Clone, Debug)]
pub struct OrchestratorConfig {
    /// Provider round-trips allowed per call to `send_message`
    pub max_iterations: usize,

    /// Options passed to the adapter on every send
    pub send_options: SendOptions,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            max_iterations: 10,
            send_options: SendOptions::default(),
        }
    }
}

/// Cancels a turn from another task. Cloning shares the same token.
#[derive(Clone, Debug, Default)]
pub struct TurnHandle {
    token: CancellationToken,
}

impl TurnHandle {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.token.cancel();
    }

    pub fn is_cancelled(&self) -> bool {
        self.token.is_cancelled()
    }
}

/// Called with the user-visible text of every parsed reply
pub type ResponseCallback<'a> = &'a mut (dyn FnMut(&str) + Send);

pub struct Orchestrator {
    adapter: Arc<dyn LlmAdapter>,
    parser: Arc<ResponseParser>,
    renderer: TemplateRenderer,
    config: OrchestratorConfig,
}

impl Orchestrator {
    pub fn builder() -> OrchestratorBuilder {
        OrchestratorBuilder::new()
    }

    pub fn adapter(&self) -> &Arc<dyn LlmAdapter> {
        &self.adapter
    }

    pub fn parser(&self) -> &Arc<ResponseParser> {
        &self.parser
    }

    pub fn config(&self) -> &OrchestratorConfig {
        &self.config
    }

    /// Run a turn to completion and return the final user-visible message
    pub async fn send_message(
        &self,
        bot: &mut Bot,
        input: impl Into<Turn>,
        on_response: Option<ResponseCallback<'_>>,
    ) -> Result<String> {
        self.send_message_with_handle(bot, input, on_response, &TurnHandle::new())
            .await
    }

    /// Like [`Orchestrator::send_message`], but stops early once `handle` is
    /// cancelled. A cancelled turn returns an empty string; turns already
    /// appended to history stay there.
    pub async fn send_message_with_handle(
        &self,
        bot: &mut Bot,
        input: impl Into<Turn>,
        mut on_response: Option<ResponseCallback<'_>>,
        handle: &TurnHandle,
    ) -> Result<String> {
        let mut pending = VecDeque::from([input.into()]);
        let mut last_message = String::new();
        let mut iterations = 0;

        while let Some(turn) = pending.pop_front() {
            iterations += 1;
            if iterations > self.config.max_iterations {
                return Err(AgentError::MaxIterations(self.config.max_iterations));
            }

            bot.push_turn(turn);

            if handle.is_cancelled() {
                return Ok(String::new());
            }

            let prompt = self.build_prompt(bot);
            let options = self.send_options(bot);

            let reply = tokio::select! {
                biased;
                () = handle.token.cancelled() => {
                    self.adapter.cancel();
                    None
                }
                reply = self.adapter.send_message(prompt, &options) => Some(reply?),
            };

            // Cancelled here, or superseded inside the adapter
            let Some(reply) = reply.filter(|r| !r.is_empty()) else {
                tracing::debug!(bot_id = %bot.id(), "Turn cancelled before parsing");
                return Ok(String::new());
            };
            if handle.is_cancelled() {
                return Ok(String::new());
            }

            let callbacks = bot.skill().map(|s| &s.callbacks);
            let parsed = match self.parser.parse(&reply, callbacks).await {
                Ok(parsed) => parsed,
                Err(err) if err.is_recoverable() => {
                    tracing::warn!(bot_id = %bot.id(), error = %err, "Reporting callback error to model");
                    bot.push_turn(Turn::you(reply));
                    pending.push_back(Turn::api(recovery_message(&err)));
                    continue;
                }
                Err(err) => return Err(err),
            };

            let ParsedResponse {
                is_done,
                state,
                message,
                callback_results,
            } = parsed;

            // State first: a rejected update must leave the done flag and
            // history as they were
            if let Some(state) = &state {
                bot.apply_reply_state(state)?;
            }
            bot.set_done(is_done);
            bot.push_turn(Turn::you(reply));

            if let Some(callback) = on_response.as_mut() {
                callback(&message);
            }

            pending.extend(callback_results.into_iter().map(result_turn));

            bot.notify_changed();
            last_message = message;
        }

        Ok(last_message)
    }

    fn build_prompt(&self, bot: &Bot) -> Prompt {
        let memory_limit = self.config.send_options.memory_limit;
        Prompt {
            text: self.renderer.render(&bot.render_context(memory_limit)),
            images: bot.prompt_images(memory_limit),
        }
    }

    /// Configured options, with the skill's model filling in when none is set
    fn send_options(&self, bot: &Bot) -> SendOptions {
        let mut options = self.config.send_options.clone();
        if options.model.is_none() {
            options.model = bot.skill().and_then(|s| s.model.clone());
        }
        options
    }
}

fn recovery_message(err: &AgentError) -> String {
    match err {
        AgentError::InvalidCallback {
            valid_callbacks,
            matched_callback,
        } => format!(
            "API Error: {} is not a valid callback. Valid callbacks are: {}",
            matched_callback,
            valid_callbacks.join(", ")
        ),
        other => format!("API Error: {}", other),
    }
}

fn result_turn(output: CallbackOutput) -> Turn {
    match output {
        CallbackOutput::Text(text) => Turn::api(format!("API Results: {}", text)),
        CallbackOutput::Image { description, image } => Turn::api(description).with_image(image),
    }
}

/// Builder for [`Orchestrator`]
#[derive(Default)]
pub struct OrchestratorBuilder {
    adapter: Option<Arc<dyn LlmAdapter>>,
    parser: Option<Arc<ResponseParser>>,
    protocol: Option<Protocol>,
    config: OrchestratorConfig,
}

impl OrchestratorBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn adapter(mut self, adapter: Arc<dyn LlmAdapter>) -> Self {
        self.adapter = Some(adapter);
        self
    }

    /// Defaults to [`ResponseParser::current`] at build time
    pub fn parser(mut self, parser: Arc<ResponseParser>) -> Self {
        self.parser = Some(parser);
        self
    }

    /// Tokens used when rendering prompts; defaults to the parser's
    pub fn protocol(mut self, protocol: Protocol) -> Self {
        self.protocol = Some(protocol);
        self
    }

    pub fn max_iterations(mut self, max: usize) -> Self {
        self.config.max_iterations = max;
        self
    }

    pub fn send_options(mut self, options: SendOptions) -> Self {
        self.config.send_options = options;
        self
    }

    pub fn memory_limit(mut self, limit: usize) -> Self {
        self.config.send_options.memory_limit = Some(limit);
        self
    }

    pub fn build(self) -> Result<Orchestrator> {
        let adapter = self
            .adapter
            .ok_or_else(|| AgentError::missing_argument("adapter"))?;
        let parser = self.parser.unwrap_or_else(ResponseParser::current);
        let protocol = self.protocol.unwrap_or_else(|| parser.protocol().clone());

        Ok(Orchestrator {
            adapter,
            parser,
            renderer: TemplateRenderer::new(protocol),
            config: self.config,
        })
    }
}
