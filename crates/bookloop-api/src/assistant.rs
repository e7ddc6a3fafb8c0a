use std::time::Duration;

use axum::{
    Json,
    extract::{State, rejection::JsonRejection},
    response::IntoResponse,
};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, warn};

use bookloop_types::api::{AiHelpRequest, AiHelpResponse};

use crate::error::ApiError;
use crate::state::AppState;

pub const OPENAI_CHAT_URL: &str = "https://api.openai.com/v1/chat/completions";

const SYSTEM_PROMPT: &str = "You are BookLoop assistant. Help users with concise actionable advice.";
const MAX_TOKENS: u32 = 800;

#[derive(Debug, Error)]
pub enum AssistantError {
    #[error("assistant dependency unavailable: {0}")]
    DependencyUnavailable(String),
}

impl From<reqwest::Error> for AssistantError {
    fn from(e: reqwest::Error) -> Self {
        Self::DependencyUnavailable(e.to_string())
    }
}

#[derive(Debug, Clone)]
pub struct AssistantConfig {
    /// No key means every question gets a canned answer.
    pub api_key: Option<String>,
    pub model: String,
    pub endpoint: String,
    pub timeout: Duration,
}

impl Default for AssistantConfig {
    fn default() -> Self {
        Self {
            api_key: None,
            model: "gpt-4o-mini".into(),
            endpoint: OPENAI_CHAT_URL.into(),
            timeout: Duration::from_secs(20),
        }
    }
}

/// Help-desk answers from a hosted model, with local keyword rules as the
/// fallback whenever the model cannot be reached.
#[derive(Clone)]
pub struct Assistant {
    client: reqwest::Client,
    config: AssistantConfig,
}

#[derive(Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: [ChatMessage<'a>; 2],
    max_tokens: u32,
}

#[derive(Serialize)]
struct ChatMessage<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Deserialize)]
struct ChatResponse {
    #[serde(default)]
    choices: Vec<Choice>,
}

#[derive(Deserialize)]
struct Choice {
    message: ChoiceMessage,
}

#[derive(Deserialize)]
struct ChoiceMessage {
    content: Option<String>,
}

impl Assistant {
    pub fn new(config: AssistantConfig) -> anyhow::Result<Self> {
        let client = reqwest::Client::builder().timeout(config.timeout).build()?;
        Ok(Self { client, config })
    }

    /// Always produces an answer.
    pub async fn answer(&self, question: &str) -> String {
        if self.config.api_key.is_none() {
            return canned_answer(question).to_string();
        }

        match self.ask_model(question).await {
            Ok(answer) => answer,
            Err(e) => {
                warn!("Assistant falling back to canned answer: {}", e);
                canned_answer(question).to_string()
            }
        }
    }

    async fn ask_model(&self, question: &str) -> Result<String, AssistantError> {
        let api_key = self
            .config
            .api_key
            .as_deref()
            .ok_or_else(|| AssistantError::DependencyUnavailable("no API key".into()))?;

        let body = ChatRequest {
            model: &self.config.model,
            messages: [
                ChatMessage {
                    role: "system",
                    content: SYSTEM_PROMPT,
                },
                ChatMessage {
                    role: "user",
                    content: question,
                },
            ],
            max_tokens: MAX_TOKENS,
        };

        let resp = self
            .client
            .post(&self.config.endpoint)
            .bearer_auth(api_key)
            .json(&body)
            .send()
            .await?
            .error_for_status()?;

        let data: ChatResponse = resp.json().await?;
        let answer = data
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .filter(|c| !c.trim().is_empty())
            .ok_or_else(|| AssistantError::DependencyUnavailable("empty completion".into()))?;

        debug!("Assistant answered with {} chars", answer.chars().count());
        Ok(answer)
    }
}

/// Keyword rules in priority order.
fn canned_answer(question: &str) -> &'static str {
    let q = question.to_lowercase();
    if q.contains("server") || q.contains("deploy") {
        return "BookLoop stores its data in a local SQLite file. For production, back that file up regularly and set BOOKLOOP_JWT_SECRET to a long random value.";
    }
    if q.contains("chat") || q.contains("message") {
        return "Private chat is available for exchanges: request a book to create a private conversation between you and the owner.";
    }
    if q.contains("signup") || q.contains("register") || q.contains("create account") {
        return "To create an account, click Sign Up, provide name, email and password. If email exists, use Sign In or reset password.";
    }
    "Sorry, I couldn't find an exact answer. Try checking your account > Profile or asking about books, exchanges, or chat issues."
}

pub async fn ai_help(
    State(state): State<AppState>,
    payload: Result<Json<AiHelpRequest>, JsonRejection>,
) -> Result<impl IntoResponse, ApiError> {
    let Json(req) = payload?;
    let question = req.question.trim();
    if question.is_empty() {
        return Err(ApiError::bad_request("Missing question"));
    }

    let answer = state.assistant.answer(question).await;
    Ok(Json(AiHelpResponse { answer }))
}
