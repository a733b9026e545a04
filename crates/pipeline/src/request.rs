//! Chat request body parsing and validation.

use serde::Deserialize;
use turnstile_config::CompletionConfig;
use turnstile_core::{Message, Role};

use crate::error::PipelineError;

/// Wire shape of `POST /v1/chat`.
///
/// Either a single `message`, a `messages` history ending in a user turn,
/// or both (the history precedes `message`).
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatRequest {
    #[serde(default)]
    pub message: Option<String>,
    #[serde(default)]
    pub messages: Vec<ChatTurn>,
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default)]
    pub temperature: Option<f32>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ChatTurn {
    pub role: String,
    pub content: String,
}

/// A validated turn, ready for augmentation.
#[derive(Debug, Clone)]
pub struct ParsedTurn {
    /// Earlier turns, oldest first
    pub history: Vec<Message>,
    /// The user's latest message, trimmed
    pub latest: String,
    pub model: String,
    pub temperature: f32,
}

impl ParsedTurn {
    /// Content of the most recent assistant turn, if any.
    pub fn last_assistant(&self) -> Option<&str> {
        self.history
            .iter()
            .rev()
            .find(|m| m.role == Role::Assistant)
            .map(|m| m.content.as_str())
    }
}

/// Parse and validate a raw request body.
pub fn parse_chat_request(
    body: &[u8],
    completion: &CompletionConfig,
    max_input_chars: usize,
) -> Result<ParsedTurn, PipelineError> {
    if body.iter().all(u8::is_ascii_whitespace) {
        return Err(PipelineError::MalformedInput("request body is empty".into()));
    }
    let request: ChatRequest = serde_json::from_slice(body)
        .map_err(|e| PipelineError::MalformedInput(format!("invalid JSON: {e}")))?;

    let mut history = Vec::with_capacity(request.messages.len());
    for (i, turn) in request.messages.iter().enumerate() {
        let role = match turn.role.to_ascii_lowercase().as_str() {
            "user" => Role::User,
            "assistant" => Role::Assistant,
            other => {
                return Err(PipelineError::MalformedInput(format!(
                    "messages[{i}].role must be \"user\" or \"assistant\", got \"{other}\""
                )));
            }
        };
        history.push(Message {
            role,
            ..Message::user(turn.content.clone())
        });
    }

    let latest = match request.message {
        Some(message) => message,
        None => match history.pop() {
            Some(last) if last.role == Role::User => last.content,
            Some(_) => {
                return Err(PipelineError::MalformedInput(
                    "the last entry in messages must be a user turn".into(),
                ));
            }
            None => {
                return Err(PipelineError::MalformedInput(
                    "either message or messages is required".into(),
                ));
            }
        },
    };

    let latest = latest.trim().to_string();
    if latest.is_empty() {
        return Err(PipelineError::MalformedInput("message is empty".into()));
    }
    let chars = latest.chars().count();
    if chars > max_input_chars {
        return Err(PipelineError::MalformedInput(format!(
            "message is {chars} characters, the limit is {max_input_chars}"
        )));
    }

    let model = match request.model {
        Some(model) if !completion.allows_model(&model) => {
            return Err(PipelineError::MalformedInput(format!(
                "model \"{model}\" is not available"
            )));
        }
        Some(model) => model,
        None => completion.model.clone(),
    };

    let temperature = request.temperature.unwrap_or(completion.temperature);
    if !temperature.is_finite() || !(0.0..=2.0).contains(&temperature) {
        return Err(PipelineError::MalformedInput(
            "temperature must be between 0.0 and 2.0".into(),
        ));
    }

    Ok(ParsedTurn {
        history,
        latest,
        model,
        temperature,
    })
}
