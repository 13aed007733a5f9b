//! # Tool Dispatch Bridge
//!
//! The voice AI issues function-invocation requests mid-conversation; this
//! module turns each one into a backend operation and a structured result.
//!
//! ## Contract:
//! Every `tool_call` gets exactly one `tool_response` carrying the same
//! call id, no matter what happens in between. Unknown tool names, broken
//! parameters, and backend failures all become `{success: false}` results;
//! nothing here is allowed to raise past the bridge and stall the AI's
//! conversation turn.

pub mod backend;

use crate::context::CallerContext;
use crate::tools::backend::BackendClient;
use serde::Serialize;
use serde_json::{json, Value};
use tracing::{debug, warn};

/// Structured result returned for every tool invocation.
#[derive(Debug, Clone, Serialize)]
pub struct ToolOutcome {
    pub success: bool,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl ToolOutcome {
    fn ok(message: impl Into<String>, data: Option<Value>) -> Self {
        Self {
            success: true,
            message: message.into(),
            data,
            error: None,
        }
    }

    fn failed(message: impl Into<String>) -> Self {
        Self {
            success: false,
            message: message.into(),
            data: None,
            error: None,
        }
    }

    fn from_error(message: impl Into<String>, err: impl std::fmt::Display) -> Self {
        Self {
            success: false,
            message: message.into(),
            data: None,
            error: Some(err.to_string()),
        }
    }
}

/// Normalize the parameter payload of a tool call.
///
/// Parameters may arrive already structured or as a JSON-encoded string;
/// a string that fails to parse is treated as empty parameters rather than
/// aborting the call.
pub(crate) fn parse_parameters(parameters: Option<Value>) -> Value {
    match parameters {
        None => json!({}),
        Some(Value::String(raw)) => serde_json::from_str(&raw).unwrap_or_else(|err| {
            debug!(error = %err, "tool parameters did not parse as JSON, treating as empty");
            json!({})
        }),
        Some(value) => value,
    }
}

/// The phone number a tool should act on: explicit parameter first, then
/// the number already known from the call itself.
fn resolve_phone(params: &Value, caller: Option<&CallerContext>) -> Option<String> {
    params
        .get("phone_number")
        .and_then(Value::as_str)
        .map(str::to_string)
        .or_else(|| caller.and_then(|c| c.phone_number.clone()))
}

/// Execute one tool call and produce its outcome.
///
/// Dispatch is a closed set; anything else yields an "unimplemented"
/// failure so the AI can recover gracefully in conversation.
pub async fn dispatch(
    backend: &BackendClient,
    caller: Option<&CallerContext>,
    name: &str,
    parameters: Option<Value>,
) -> ToolOutcome {
    let params = parse_parameters(parameters);
    debug!(tool = name, "dispatching tool call");

    match name {
        "send_portal_link" => send_portal_link(backend, caller, &params).await,
        "check_caller_details" => check_caller_details(backend, caller, &params).await,
        "schedule_callback" => schedule_callback(backend, caller, &params).await,
        other => {
            warn!(tool = other, "AI requested a tool this gateway does not implement");
            ToolOutcome::failed(format!(
                "The tool '{other}' is not implemented; let the caller know you cannot \
                 perform that action right now."
            ))
        }
    }
}

async fn send_portal_link(
    backend: &BackendClient,
    caller: Option<&CallerContext>,
    params: &Value,
) -> ToolOutcome {
    let Some(phone) = resolve_phone(params, caller) else {
        return ToolOutcome::failed("No phone number available to send the portal link to.");
    };
    match backend.send_portal_link(&phone).await {
        Ok(()) => ToolOutcome::ok(
            format!("A portal link has been sent by SMS to {phone}."),
            None,
        ),
        Err(err) => ToolOutcome::from_error("Sending the portal link failed.", err),
    }
}

async fn check_caller_details(
    backend: &BackendClient,
    caller: Option<&CallerContext>,
    params: &Value,
) -> ToolOutcome {
    let Some(phone) = resolve_phone(params, caller) else {
        return ToolOutcome::failed("No phone number available to look up.");
    };
    match backend.lookup_caller(&phone).await {
        Ok(record) => {
            let found = record.found;
            let data = serde_json::to_value(record).ok();
            if found {
                ToolOutcome::ok("Caller record found.", data)
            } else {
                ToolOutcome::ok("No record exists for that phone number.", data)
            }
        }
        Err(err) => ToolOutcome::from_error("Caller lookup failed.", err),
    }
}

async fn schedule_callback(
    backend: &BackendClient,
    caller: Option<&CallerContext>,
    params: &Value,
) -> ToolOutcome {
    let Some(phone) = resolve_phone(params, caller) else {
        return ToolOutcome::failed("No phone number available to schedule a callback for.");
    };
    let name = params
        .get("name")
        .and_then(Value::as_str)
        .or_else(|| caller.and_then(|c| c.full_name.as_deref()));
    let preferred_time = params.get("preferred_time").and_then(Value::as_str);

    match backend.schedule_callback(&phone, name, preferred_time).await {
        Ok(()) => ToolOutcome::ok(
            match preferred_time {
                Some(time) => format!("A callback has been scheduled for {time}."),
                None => "A callback has been scheduled.".to_string(),
            },
            None,
        ),
        Err(err) => ToolOutcome::from_error("Scheduling the callback failed.", err),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ToolBackendConfig;

    fn test_backend() -> BackendClient {
        // Points at a closed local port; tests below never reach the network.
        BackendClient::new(ToolBackendConfig {
            base_url: "http://127.0.0.1:1".to_string(),
            ..ToolBackendConfig::default()
        })
        .unwrap()
    }

    #[test]
    fn test_parse_parameters_handles_all_arrival_shapes() {
        assert_eq!(parse_parameters(None), json!({}));
        assert_eq!(
            parse_parameters(Some(json!({"phone_number": "+44123"}))),
            json!({"phone_number": "+44123"})
        );
        assert_eq!(
            parse_parameters(Some(json!(r#"{"phone_number":"+44123"}"#))),
            json!({"phone_number": "+44123"})
        );
        // A broken JSON string means empty parameters, never a failure.
        assert_eq!(parse_parameters(Some(json!("{not json"))), json!({}));
    }

    #[tokio::test]
    async fn test_unknown_tool_yields_explanatory_failure() {
        let backend = test_backend();
        let outcome = dispatch(&backend, None, "nonexistent_tool", None).await;
        assert!(!outcome.success);
        assert!(outcome.message.contains("nonexistent_tool"));
        assert!(outcome.message.contains("not implemented"));
    }

    #[tokio::test]
    async fn test_portal_link_without_any_phone_number_fails_cleanly() {
        let backend = test_backend();
        let outcome = dispatch(&backend, None, "send_portal_link", Some(json!({}))).await;
        assert!(!outcome.success);
        assert!(outcome.message.contains("phone number"));
    }

    #[tokio::test]
    async fn test_caller_context_supplies_missing_phone_number() {
        let backend = test_backend();
        let caller = CallerContext {
            phone_number: Some("+447700900123".to_string()),
            ..CallerContext::default()
        };
        // The unreachable backend converts to a structured failure, proving
        // the number resolved and the error was caught rather than raised.
        let outcome = dispatch(&backend, Some(&caller), "send_portal_link", None).await;
        assert!(!outcome.success);
        assert!(outcome.error.is_some());
    }

    #[test]
    fn test_outcome_serialization_omits_empty_fields() {
        let json = serde_json::to_string(&ToolOutcome::failed("nope")).unwrap();
        assert!(json.contains(r#""success":false"#));
        assert!(!json.contains("data"));
        assert!(!json.contains("error"));
    }
}
