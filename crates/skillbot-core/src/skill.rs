//! Skills and Callbacks
//!
//! A skill is a delegated objective attached to a bot: the job, an optional
//! done condition, constraints injected into the prompt, and a directory of
//! callbacks the model may ask to have invoked.

use std::future::Future;
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{AgentError, Result};
use crate::message::ImageData;
use crate::schema::{FieldSpec, StateMap, StateSchema, StateStore};

/// Parameter definition for a callback
pub type ParamSpec = FieldSpec;

/// What a callback hands back to the conversation
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CallbackOutput {
    Text(String),
    Image {
        /// Text shown alongside the image
        description: String,
        image: ImageData,
    },
}

impl CallbackOutput {
    pub fn image(description: impl Into<String>, image: ImageData) -> Self {
        CallbackOutput::Image {
            description: description.into(),
            image,
        }
    }

    /// Plain-text form, used when a result is inlined into a message
    pub fn as_text(&self) -> &str {
        match self {
            CallbackOutput::Text(text) => text,
            CallbackOutput::Image { description, .. } => description,
        }
    }
}

impl From<String> for CallbackOutput {
    fn from(text: String) -> Self {
        CallbackOutput::Text(text)
    }
}

impl From<&str> for CallbackOutput {
    fn from(text: &str) -> Self {
        CallbackOutput::Text(text.to_string())
    }
}

/// Callback handler - implement for stateful handlers, or use
/// [`Callback::new`] with an async closure
#[async_trait]
pub trait CallbackHandler: Send + Sync {
    async fn call(&self, params: Option<StateMap>) -> anyhow::Result<CallbackOutput>;
}

struct FnHandler<F>(F);

#[async_trait]
impl<F, Fut, R> CallbackHandler for FnHandler<F>
where
    F: Fn(Option<StateMap>) -> Fut + Send + Sync,
    Fut: Future<Output = anyhow::Result<R>> + Send,
    R: Into<CallbackOutput> + Send + 'static,
{
    async fn call(&self, params: Option<StateMap>) -> anyhow::Result<CallbackOutput> {
        (self.0)(params).await.map(Into::into)
    }
}

/// A named function the model may request
#[derive(Clone)]
pub struct Callback {
    handler: Arc<dyn CallbackHandler>,

    /// Shown to the model in the function directory
    pub usage_hint: String,

    /// Declared parameters, in prompt order
    pub parameters: Vec<ParamSpec>,
}

impl std::fmt::Debug for Callback {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Callback")
            .field("usage_hint", &self.usage_hint)
            .field("parameters", &self.parameters)
            .finish_non_exhaustive()
    }
}

impl Callback {
    /// Wrap an async closure
    pub fn new<F, Fut, R>(usage_hint: impl Into<String>, handler: F) -> Self
    where
        F: Fn(Option<StateMap>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<R>> + Send + 'static,
        R: Into<CallbackOutput> + Send + 'static,
    {
        Self::from_handler(usage_hint, Arc::new(FnHandler(handler)))
    }

    pub fn from_handler(usage_hint: impl Into<String>, handler: Arc<dyn CallbackHandler>) -> Self {
        Self {
            handler,
            usage_hint: usage_hint.into(),
            parameters: Vec::new(),
        }
    }

    pub fn param(mut self, spec: ParamSpec) -> Self {
        self.parameters.push(spec);
        self
    }

    /// Check declared parameters before the handler runs
    fn validate(&self, name: &str, params: Option<&StateMap>) -> Result<()> {
        for spec in &self.parameters {
            match params.and_then(|p| p.get(&spec.name)) {
                Some(value) => spec.check(value).map_err(|e| AgentError::CallbackExecution {
                    name: name.to_string(),
                    message: e.to_string(),
                })?,
                None if spec.required => {
                    return Err(AgentError::CallbackExecution {
                        name: name.to_string(),
                        message: format!("Missing required parameter: {}", spec.name),
                    });
                }
                None => {}
            }
        }
        Ok(())
    }
}

/// Callback directory, kept in registration order
#[derive(Clone, Debug, Default)]
pub struct CallbackRegistry {
    callbacks: Vec<(String, Callback)>,
}

impl CallbackRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a callback; a repeated name replaces the earlier handler in place
    pub fn register(&mut self, name: impl Into<String>, callback: Callback) {
        let name = name.into();
        match self.callbacks.iter_mut().find(|(n, _)| *n == name) {
            Some(slot) => slot.1 = callback,
            None => self.callbacks.push((name, callback)),
        }
    }

    pub fn get(&self, name: &str) -> Option<&Callback> {
        self.callbacks
            .iter()
            .find(|(n, _)| n == name)
            .map(|(_, c)| c)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.get(name).is_some()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &Callback)> {
        self.callbacks.iter().map(|(n, c)| (n.as_str(), c))
    }

    pub fn names(&self) -> Vec<String> {
        self.callbacks.iter().map(|(n, _)| n.clone()).collect()
    }

    pub fn len(&self) -> usize {
        self.callbacks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.callbacks.is_empty()
    }

    /// Look up and run a callback. Unknown names are always an error.
    pub async fn invoke(&self, name: &str, params: Option<StateMap>) -> Result<CallbackOutput> {
        let callback = self.get(name).ok_or_else(|| AgentError::InvalidCallback {
            valid_callbacks: self.names(),
            matched_callback: name.to_string(),
        })?;

        callback.validate(name, params.as_ref())?;

        tracing::debug!(callback = %name, has_params = params.is_some(), "Invoking callback");

        callback
            .handler
            .call(params)
            .await
            .map_err(|e| AgentError::CallbackExecution {
                name: name.to_string(),
                message: format!("{:#}", e),
            })
    }
}

/// A delegated goal with constraints and callable functions
#[derive(Clone, Debug)]
pub struct Skill {
    /// The job
    pub objective: String,

    /// Natural-language description of when the job is finished
    pub done_condition: Option<String>,

    /// Reminders injected into the prompt, in order
    pub constraints: Vec<String>,

    pub callbacks: CallbackRegistry,

    /// Model override passed to the adapter
    pub model: Option<String>,

    /// Skill-owned structured state, separate from the bot's
    pub state: Option<StateStore>,

    /// Custom prompt template replacing the built-in phrasings
    pub template: Option<String>,
}

impl Skill {
    pub fn builder(objective: impl Into<String>) -> SkillBuilder {
        SkillBuilder::new().objective(objective)
    }

    pub fn schema(&self) -> Option<&StateSchema> {
        self.state.as_ref().map(StateStore::schema)
    }
}

/// Builder for [`Skill`]
#[derive(Default)]
pub struct SkillBuilder {
    objective: Option<String>,
    done_condition: Option<String>,
    constraints: Vec<String>,
    callbacks: CallbackRegistry,
    model: Option<String>,
    schema: Option<StateSchema>,
    template: Option<String>,
}

impl SkillBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn objective(mut self, objective: impl Into<String>) -> Self {
        self.objective = Some(objective.into());
        self
    }

    pub fn done_when(mut self, condition: impl Into<String>) -> Self {
        self.done_condition = Some(condition.into());
        self
    }

    pub fn constraint(mut self, constraint: impl Into<String>) -> Self {
        self.constraints.push(constraint.into());
        self
    }

    pub fn callback(mut self, name: impl Into<String>, callback: Callback) -> Self {
        self.callbacks.register(name, callback);
        self
    }

    pub fn model(mut self, model: impl Into<String>) -> Self {
        self.model = Some(model.into());
        self
    }

    pub fn schema(mut self, schema: StateSchema) -> Self {
        self.schema = Some(schema);
        self
    }

    pub fn template(mut self, template: impl Into<String>) -> Self {
        self.template = Some(template.into());
        self
    }

    pub fn build(self) -> Result<Skill> {
        let objective = self
            .objective
            .filter(|o| !o.trim().is_empty())
            .ok_or_else(|| AgentError::missing_argument("objective"))?;

        Ok(Skill {
            objective,
            done_condition: self.done_condition,
            constraints: self.constraints,
            callbacks: self.callbacks,
            model: self.model,
            state: self.schema.map(StateStore::new),
            template: self.template,
        })
    }
}

/// Parameter value as a string, for handlers that take text
pub fn param_str<'a>(params: Option<&'a StateMap>, name: &str) -> Option<&'a str> {
    params.and_then(|p| p.get(name)).and_then(Value::as_str)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn registry() -> CallbackRegistry {
        let mut registry = CallbackRegistry::new();
        registry.register(
            "greet",
            Callback::new("Greets someone by name", |params: Option<StateMap>| async move {
                let name = param_str(params.as_ref(), "name").unwrap_or("stranger").to_string();
                Ok::<_, anyhow::Error>(format!("Hello, {}!", name))
            })
            .param(ParamSpec::string("name").required()),
        );
        registry.register(
            "explode",
            Callback::new("Always fails", |_| async { Err::<String, _>(anyhow::anyhow!("kaboom")) }),
        );
        registry
    }

    #[tokio::test]
    async fn test_invoke_with_params() {
        let params = json!({"name": "Ada"}).as_object().cloned();
        let out = registry().invoke("greet", params).await.unwrap();
        assert_eq!(out, CallbackOutput::Text("Hello, Ada!".into()));
    }

    #[tokio::test]
    async fn test_unknown_callback_is_error() {
        let err = registry().invoke("taco", None).await.unwrap_err();
        match err {
            AgentError::InvalidCallback { valid_callbacks, matched_callback } => {
                assert_eq!(valid_callbacks, vec!["greet", "explode"]);
                assert_eq!(matched_callback, "taco");
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[tokio::test]
    async fn test_missing_required_param() {
        let err = registry().invoke("greet", None).await.unwrap_err();
        assert!(matches!(err, AgentError::CallbackExecution { .. }));
    }

    #[tokio::test]
    async fn test_handler_error_wrapped() {
        let err = registry().invoke("explode", None).await.unwrap_err();
        match err {
            AgentError::CallbackExecution { name, message } => {
                assert_eq!(name, "explode");
                assert!(message.contains("kaboom"));
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[tokio::test]
    async fn test_stateful_handler() {
        struct Counter(AtomicUsize);

        #[async_trait]
        impl CallbackHandler for Counter {
            async fn call(&self, _params: Option<StateMap>) -> anyhow::Result<CallbackOutput> {
                let n = self.0.fetch_add(1, Ordering::SeqCst) + 1;
                Ok(CallbackOutput::Text(n.to_string()))
            }
        }

        let mut registry = CallbackRegistry::new();
        registry.register("count", Callback::from_handler("Counts calls", Arc::new(Counter(AtomicUsize::new(0)))));

        registry.invoke("count", None).await.unwrap();
        let out = registry.invoke("count", None).await.unwrap();
        assert_eq!(out.as_text(), "2");
    }

    #[test]
    fn test_register_replaces_in_place() {
        let mut registry = registry();
        registry.register("greet", Callback::new("Replaced", |_| async { Ok::<_, anyhow::Error>("hi") }));

        assert_eq!(registry.names(), vec!["greet", "explode"]);
        assert_eq!(registry.get("greet").unwrap().usage_hint, "Replaced");
    }

    #[test]
    fn test_skill_requires_objective() {
        let err = SkillBuilder::new().build().unwrap_err();
        assert!(err.to_string().contains("missing required argument: objective"));

        let skill = Skill::builder("Take a burrito order")
            .constraint("Be brief")
            .constraint("Confirm the order")
            .done_when("The order is confirmed")
            .model("gpt-4o-mini")
            .build()
            .unwrap();
        assert_eq!(skill.constraints, vec!["Be brief", "Confirm the order"]);
        assert_eq!(skill.model.as_deref(), Some("gpt-4o-mini"));
        assert!(skill.state.is_none());
    }
}
