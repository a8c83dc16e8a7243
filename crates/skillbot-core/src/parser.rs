//! Reply Parsing
//!
//! Decodes a raw model reply into the done signal, an embedded state
//! snapshot, the user-visible message and any callback results. Steps run
//! in a fixed order, each on the output of the previous one:
//!
//! 1. Done token anywhere in the reply: flag it, strip it, trim.
//! 2. Legacy `xxxxx name xxxxx` placeholders: invoke with no arguments and
//!    substitute the result inline.
//! 3. `<< name >>{json}<</ name >>` / `<< name />>` markup: invoke with the
//!    parsed arguments, remove the markup and surface the result.
//! 4. `***** {json} *****` state block: parse and remove.
//!
//! Handler failures are not swallowed here; they come back as
//! [`AgentError::CallbackExecution`] for the orchestrator to report.

use std::sync::{Arc, LazyLock, PoisonError, RwLock};

use regex::Regex;
use serde_json::Value;

use crate::error::{AgentError, Result};
use crate::protocol::Protocol;
use crate::schema::{as_state_map, StateMap};
use crate::skill::{CallbackOutput, CallbackRegistry};

/// Outcome of parsing one reply
#[derive(Clone, Debug, Default, PartialEq)]
pub struct ParsedResponse {
    pub is_done: bool,

    /// State snapshot found between boundary tokens
    pub state: Option<StateMap>,

    /// What the user gets to see
    pub message: String,

    /// Results of markup invocations, in order of appearance
    pub callback_results: Vec<CallbackOutput>,
}

/// Reply parser for one protocol token set
#[derive(Debug)]
pub struct ResponseParser {
    protocol: Protocol,
    markup: Regex,
    state_block: Regex,
}

/// Callback markup. The closing name is checked against the opening one
/// in code because the regex engine has no backreferences.
const MARKUP_PATTERN: &str =
    r"<<\s*([A-Za-z_][\w.-]*)\s*(?:/\s*>>|>>(?s:(.*?))<<\s*/\s*([A-Za-z_][\w.-]*)\s*>>)";

impl Default for ResponseParser {
    fn default() -> Self {
        Self::new(Protocol::default()).expect("default protocol tokens form valid patterns")
    }
}

static CURRENT: LazyLock<RwLock<Arc<ResponseParser>>> =
    LazyLock::new(|| RwLock::new(Arc::new(ResponseParser::default())));

impl ResponseParser {
    pub fn new(protocol: Protocol) -> Result<Self> {
        for (token, value) in [
            ("done token", &protocol.done_token),
            ("state boundary", &protocol.state_boundary),
            ("callback boundary", &protocol.callback_boundary),
        ] {
            if value.trim().is_empty() {
                return Err(AgentError::Config(format!("{} must not be empty", token)));
            }
        }

        let markup = Regex::new(MARKUP_PATTERN)
            .map_err(|e| AgentError::Config(format!("invalid callback markup pattern: {}", e)))?;

        let boundary = regex::escape(&protocol.state_boundary);
        let state_block = Regex::new(&format!(r"(?s){b}\s*(.*?)\s*{b}", b = boundary))
            .map_err(|e| AgentError::Config(format!("invalid state boundary: {}", e)))?;

        Ok(Self {
            protocol,
            markup,
            state_block,
        })
    }

    /// The process-wide default parser. Orchestrators capture it when they
    /// are built unless given one explicitly.
    pub fn current() -> Arc<ResponseParser> {
        CURRENT
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Replace the process-wide default, returning the previous one
    pub fn set_current(parser: Arc<ResponseParser>) -> Arc<ResponseParser> {
        let mut current = CURRENT.write().unwrap_or_else(PoisonError::into_inner);
        std::mem::replace(&mut *current, parser)
    }

    pub fn protocol(&self) -> &Protocol {
        &self.protocol
    }

    /// Parse a raw reply, invoking callbacks from `callbacks` as requested
    pub async fn parse(
        &self,
        reply: &str,
        callbacks: Option<&CallbackRegistry>,
    ) -> Result<ParsedResponse> {
        let (is_done, text) = self.strip_done(reply);
        let text = self.substitute_legacy(text, callbacks).await?;
        let (text, callback_results) = self.run_markup(text, callbacks).await?;
        let (message, state) = self.extract_state(&text)?;

        tracing::debug!(
            is_done,
            has_state = state.is_some(),
            callback_results = callback_results.len(),
            "Parsed reply"
        );

        Ok(ParsedResponse {
            is_done,
            state,
            message,
            callback_results,
        })
    }

    fn strip_done(&self, reply: &str) -> (bool, String) {
        let token = &self.protocol.done_token;
        if reply.contains(token.as_str()) {
            (true, reply.replace(token.as_str(), "").trim().to_string())
        } else {
            (false, reply.trim().to_string())
        }
    }

    async fn substitute_legacy(
        &self,
        mut text: String,
        callbacks: Option<&CallbackRegistry>,
    ) -> Result<String> {
        let Some(callbacks) = callbacks else {
            return Ok(text);
        };

        let boundary = regex::escape(&self.protocol.callback_boundary);
        for (name, _) in callbacks.iter() {
            let placeholder = Regex::new(&format!(
                r"{b}\s*{name}\s*{b}",
                b = boundary,
                name = regex::escape(name)
            ))
            .map_err(|e| AgentError::Other(format!("invalid placeholder pattern: {}", e)))?;

            if !placeholder.is_match(&text) {
                continue;
            }

            let output = callbacks.invoke(name, None).await?;
            text = placeholder
                .replace_all(&text, regex::NoExpand(output.as_text()))
                .trim()
                .to_string();
        }

        Ok(text)
    }

    async fn run_markup(
        &self,
        text: String,
        callbacks: Option<&CallbackRegistry>,
    ) -> Result<(String, Vec<CallbackOutput>)> {
        let calls: Vec<MarkupCall> = self
            .markup
            .captures_iter(&text)
            .filter_map(|caps| {
                let whole = caps.get(0)?;
                Some(MarkupCall {
                    start: whole.start(),
                    end: whole.end(),
                    name: caps[1].to_string(),
                    args: caps.get(2).map(|m| m.as_str().to_string()),
                    closing: caps.get(3).map(|m| m.as_str().to_string()),
                })
            })
            .collect();

        if calls.is_empty() {
            return Ok((text, Vec::new()));
        }

        // Every call is checked before any handler runs
        let mut checked = Vec::with_capacity(calls.len());
        for call in &calls {
            let registry = match callbacks {
                Some(registry) if registry.contains(&call.name) => registry,
                _ => {
                    return Err(AgentError::InvalidCallback {
                        valid_callbacks: callbacks.map(CallbackRegistry::names).unwrap_or_default(),
                        matched_callback: text[call.start..call.end].to_string(),
                    });
                }
            };

            if let Some(closing) = call.closing.as_deref().filter(|c| *c != call.name) {
                return Err(AgentError::CallbackExecution {
                    name: call.name.clone(),
                    message: format!("markup opened as '{}' but closed as '{}'", call.name, closing),
                });
            }

            let params = parse_arguments(&call.name, call.args.as_deref())?;
            checked.push((registry, params));
        }

        let mut results = Vec::with_capacity(calls.len());
        let mut remaining = String::with_capacity(text.len());
        let mut last = 0;

        for (call, (registry, params)) in calls.iter().zip(checked) {
            results.push(registry.invoke(&call.name, params).await?);

            remaining = join_around(&remaining, &text[last..call.start]);
            last = call.end;
        }

        remaining = join_around(&remaining, &text[last..]);
        Ok((remaining.trim().to_string(), results))
    }

    fn extract_state(&self, text: &str) -> Result<(String, Option<StateMap>)> {
        let Some(caps) = self.state_block.captures(text) else {
            return Ok((text.trim().to_string(), None));
        };

        let payload = caps.get(1).map_or("", |m| m.as_str());
        let value: Value = serde_json::from_str(payload).map_err(|e| {
            AgentError::Parse(format!("invalid state JSON between boundaries: {}", e))
        })?;
        let state = as_state_map(value)?;

        let (start, end) = caps.get(0).map_or((0, 0), |m| (m.start(), m.end()));
        let message = join_around(&text[..start], &text[end..]);

        Ok((message.trim().to_string(), Some(state)))
    }
}

/// One markup invocation found in a reply
struct MarkupCall {
    start: usize,
    end: usize,
    name: String,
    args: Option<String>,
    closing: Option<String>,
}

/// Markup arguments must be a JSON object, or absent
fn parse_arguments(name: &str, raw: Option<&str>) -> Result<Option<StateMap>> {
    let raw = match raw.map(str::trim) {
        Some(raw) if !raw.is_empty() => raw,
        _ => return Ok(None),
    };

    let invalid = |message: String| AgentError::CallbackExecution {
        name: name.to_string(),
        message,
    };

    match serde_json::from_str::<Value>(raw) {
        Ok(Value::Object(map)) => Ok(Some(map)),
        Ok(Value::Null) => Ok(None),
        Ok(other) => Err(invalid(format!("arguments must be a JSON object, got {}", other))),
        Err(e) => Err(invalid(format!("arguments are not valid JSON: {}", e))),
    }
}

/// Join the text either side of a removed span, trimming the whitespace
/// that surrounded it
fn join_around(before: &str, after: &str) -> String {
    let before = before.trim_end();
    let after = after.trim_start();
    match (before.is_empty(), after.is_empty()) {
        (true, _) => after.to_string(),
        (_, true) => before.to_string(),
        _ => format!("{}\n{}", before, after),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::ImageData;
    use crate::skill::{param_str, Callback, ParamSpec};
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn counting(counter: Arc<AtomicUsize>, reply: &'static str) -> Callback {
        Callback::new("counts", move |_| {
            let counter = counter.clone();
            async move {
                counter.fetch_add(1, Ordering::SeqCst);
                Ok::<_, anyhow::Error>(reply)
            }
        })
    }

    fn burrito_registry() -> CallbackRegistry {
        let mut registry = CallbackRegistry::new();
        registry.register(
            "burrito",
            Callback::new("Orders a burrito", |params: Option<StateMap>| async move {
                let filling = param_str(params.as_ref(), "filling").unwrap_or("beans").to_string();
                Ok::<_, anyhow::Error>(format!("one {} burrito", filling))
            })
            .param(ParamSpec::string("filling")),
        );
        registry
    }

    #[tokio::test]
    async fn test_done_token_stripped() {
        let parser = ResponseParser::default();
        for reply in ["hello DONE_DONE_DONE", "DONE_DONE_DONE hello", "hel DONE_DONE_DONE"] {
            let parsed = parser.parse(reply, None).await.unwrap();
            assert!(parsed.is_done);
            assert!(!parsed.message.contains("DONE_DONE_DONE"));
        }

        let parsed = parser.parse("hello DONE_DONE_DONE", None).await.unwrap();
        assert_eq!(parsed.message, "hello");

        let parsed = parser.parse("  still going  ", None).await.unwrap();
        assert!(!parsed.is_done);
        assert_eq!(parsed.message, "still going");
    }

    #[tokio::test]
    async fn test_state_extracted_and_removed() {
        let parser = ResponseParser::default();
        let reply = "Got it, a large one.\n***** {\"size\": \"large\", \"count\": 2} *****";
        let parsed = parser.parse(reply, None).await.unwrap();

        assert_eq!(
            parsed.state,
            Some(json!({"size": "large", "count": 2}).as_object().cloned().unwrap())
        );
        assert_eq!(parsed.message, "Got it, a large one.");
    }

    #[tokio::test]
    async fn test_state_in_middle_of_reply() {
        let parser = ResponseParser::default();
        let parsed = parser
            .parse("Before *****{\"a\":1}***** after", None)
            .await
            .unwrap();

        assert_eq!(parsed.message, "Before\nafter");
        assert_eq!(parsed.state.unwrap().get("a"), Some(&json!(1)));
    }

    #[tokio::test]
    async fn test_malformed_state_fails_loudly() {
        let parser = ResponseParser::default();
        let err = parser
            .parse("ok ***** {\"size\": } *****", None)
            .await
            .unwrap_err();
        assert!(matches!(err, AgentError::Parse(_)));
        assert!(!err.is_recoverable());
    }

    #[tokio::test]
    async fn test_done_and_state_together() {
        let parser = ResponseParser::default();
        let parsed = parser
            .parse("All set! DONE_DONE_DONE ***** {\"done\": true} *****", None)
            .await
            .unwrap();

        assert!(parsed.is_done);
        assert_eq!(parsed.message, "All set!");
        assert_eq!(parsed.state.unwrap().get("done"), Some(&json!(true)));
    }

    #[tokio::test]
    async fn test_legacy_placeholder_invoked_once() {
        let calls = Arc::new(AtomicUsize::new(0));
        let mut registry = CallbackRegistry::new();
        registry.register("time", counting(calls.clone(), "noon"));

        let parser = ResponseParser::default();
        let parsed = parser
            .parse("It is xxxxx time xxxxx right now", Some(&registry))
            .await
            .unwrap();

        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(parsed.message, "It is noon right now");
        assert!(parsed.callback_results.is_empty());
    }

    #[tokio::test]
    async fn test_markup_with_arguments() {
        let parser = ResponseParser::default();
        let registry = burrito_registry();
        let parsed = parser
            .parse(
                "Ordering now. << burrito >>{\"filling\": \"steak\"}<</ burrito >>",
                Some(&registry),
            )
            .await
            .unwrap();

        assert_eq!(parsed.message, "Ordering now.");
        assert_eq!(
            parsed.callback_results,
            vec![CallbackOutput::Text("one steak burrito".into())]
        );
    }

    #[tokio::test]
    async fn test_self_closing_markup_whitespace() {
        let parser = ResponseParser::default();
        let registry = burrito_registry();
        for reply in ["<< burrito />>", "<<burrito/>>", "<<  burrito  / >>"] {
            let parsed = parser.parse(reply, Some(&registry)).await.unwrap();
            assert_eq!(parsed.message, "");
            assert_eq!(parsed.callback_results.len(), 1);
        }
    }

    #[tokio::test]
    async fn test_unknown_markup_is_protocol_error() {
        let parser = ResponseParser::default();
        let registry = burrito_registry();
        let err = parser
            .parse("Let me check << taco />>", Some(&registry))
            .await
            .unwrap_err();

        match err {
            AgentError::InvalidCallback { valid_callbacks, matched_callback } => {
                assert_eq!(valid_callbacks, vec!["burrito".to_string()]);
                assert_eq!(matched_callback, "<< taco />>");
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[tokio::test]
    async fn test_markup_without_directory() {
        let parser = ResponseParser::default();
        let err = parser.parse("<< burrito />>", None).await.unwrap_err();
        assert!(matches!(err, AgentError::InvalidCallback { .. }));
    }

    #[tokio::test]
    async fn test_bad_markup_arguments_recoverable() {
        let parser = ResponseParser::default();
        let registry = burrito_registry();
        let err = parser
            .parse("<< burrito >>[1, 2]<</ burrito >>", Some(&registry))
            .await
            .unwrap_err();
        assert!(err.is_recoverable());
    }

    #[tokio::test]
    async fn test_handler_error_propagates() {
        let mut registry = CallbackRegistry::new();
        registry.register(
            "fail",
            Callback::new("fails", |_| async { Err::<String, _>(anyhow::anyhow!("no stock")) }),
        );

        let err = ResponseParser::default()
            .parse("<< fail />>", Some(&registry))
            .await
            .unwrap_err();
        assert!(matches!(err, AgentError::CallbackExecution { .. }));
    }

    #[tokio::test]
    async fn test_image_result_surfaces() {
        let mut registry = CallbackRegistry::new();
        registry.register(
            "draw",
            Callback::new("Draws a picture", |_| async {
                Ok::<_, anyhow::Error>(CallbackOutput::image("a cat", ImageData::new("image/png", "AAAA")))
            }),
        );

        let parsed = ResponseParser::default()
            .parse("Here you go << draw />>", Some(&registry))
            .await
            .unwrap();

        assert_eq!(parsed.message, "Here you go");
        assert!(matches!(
            &parsed.callback_results[0],
            CallbackOutput::Image { description, .. } if description == "a cat"
        ));
    }

    #[tokio::test]
    async fn test_multiple_markups_in_order() {
        let parser = ResponseParser::default();
        let registry = burrito_registry();
        let parsed = parser
            .parse(
                "<< burrito >>{\"filling\":\"fish\"}<</ burrito >> and << burrito />>",
                Some(&registry),
            )
            .await
            .unwrap();

        let texts: Vec<_> = parsed.callback_results.iter().map(CallbackOutput::as_text).collect();
        assert_eq!(texts, vec!["one fish burrito", "one beans burrito"]);
        assert_eq!(parsed.message, "and");
    }

    #[tokio::test]
    async fn test_state_not_mistaken_for_callback() {
        let parser = ResponseParser::default();
        let registry = burrito_registry();
        let parsed = parser
            .parse("Noted. ***** {\"note\": \"<< not a call\"} *****", Some(&registry))
            .await
            .unwrap();

        assert!(parsed.callback_results.is_empty());
        assert_eq!(parsed.state.unwrap().get("note"), Some(&json!("<< not a call")));
    }

    #[tokio::test]
    async fn test_mismatched_closing_tag_is_recoverable() {
        let calls = Arc::new(AtomicUsize::new(0));
        let mut registry = CallbackRegistry::new();
        registry.register("burrito", counting(calls.clone(), "ordered"));

        let err = ResponseParser::default()
            .parse("<< burrito >>{}<</ taco >>", Some(&registry))
            .await
            .unwrap_err();

        assert!(matches!(&err, AgentError::CallbackExecution { name, .. } if name == "burrito"));
        assert!(err.is_recoverable());
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_unknown_name_stops_earlier_calls() {
        let calls = Arc::new(AtomicUsize::new(0));
        let mut registry = CallbackRegistry::new();
        registry.register("burrito", counting(calls.clone(), "ordered"));

        let err = ResponseParser::default()
            .parse("<< burrito />> and << taco />>", Some(&registry))
            .await
            .unwrap_err();

        assert!(matches!(err, AgentError::InvalidCallback { .. }));
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_empty_protocol_tokens_rejected() {
        let empties = [
            Protocol { done_token: String::new(), ..Protocol::default() },
            Protocol { state_boundary: String::new(), ..Protocol::default() },
            Protocol { callback_boundary: "  ".into(), ..Protocol::default() },
        ];
        for protocol in empties {
            assert!(matches!(ResponseParser::new(protocol), Err(AgentError::Config(_))));
        }
        assert!(ResponseParser::new(Protocol::default()).is_ok());
    }

    #[test]
    fn test_current_is_swappable() {
        let custom = Arc::new(ResponseParser::default());

        let previous = ResponseParser::set_current(custom.clone());
        assert!(Arc::ptr_eq(&ResponseParser::current(), &custom));

        let swapped_out = ResponseParser::set_current(previous.clone());
        assert!(Arc::ptr_eq(&swapped_out, &custom));
        assert!(Arc::ptr_eq(&ResponseParser::current(), &previous));
    }
}
