use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::context::ContextPayload;
use crate::db::Role;
use crate::error::{PipelineError, PipelineResult};

/// The language-model backend. An empty string means "nothing to say".
#[async_trait]
pub trait GenerationApi: Send + Sync {
    async fn complete(&self, payload: &ContextPayload) -> PipelineResult<String>;
}

/// OpenAI-compatible `/chat/completions` client.
pub struct HttpGenerationClient {
    client: reqwest::Client,
    endpoint: String,
    model: String,
    api_key: Option<String>,
    system_prompt: String,
}

impl HttpGenerationClient {
    pub fn new(
        endpoint: impl Into<String>,
        model: impl Into<String>,
        api_key: Option<String>,
        system_prompt: impl Into<String>,
        timeout: Duration,
    ) -> PipelineResult<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|err| PipelineError::Other(anyhow::anyhow!("http client: {err}")))?;
        Ok(Self {
            client,
            endpoint: endpoint.into().trim_end_matches('/').to_string(),
            model: model.into(),
            api_key,
            system_prompt: system_prompt.into(),
        })
    }

    fn messages<'a>(&'a self, payload: &'a ContextPayload, context: &'a str) -> Vec<ChatMessage<'a>> {
        let mut messages = Vec::with_capacity(payload.conversation_turns.len() + 2);
        messages.push(ChatMessage {
            role: Role::System.as_str(),
            content: &self.system_prompt,
        });
        for turn in &payload.conversation_turns {
            messages.push(ChatMessage {
                role: turn.role.as_str(),
                content: &turn.content,
            });
        }
        messages.push(ChatMessage {
            role: Role::User.as_str(),
            content: context,
        });
        messages
    }
}

#[derive(Serialize)]
struct ChatMessage<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<ChatMessage<'a>>,
}

#[derive(Deserialize)]
struct ChatResponse {
    choices: Vec<ChatChoice>,
}

#[derive(Deserialize)]
struct ChatChoice {
    message: ChatReply,
}

#[derive(Deserialize)]
struct ChatReply {
    content: Option<String>,
}

#[async_trait]
impl GenerationApi for HttpGenerationClient {
    async fn complete(&self, payload: &ContextPayload) -> PipelineResult<String> {
        let context = payload.render_context();
        let request = ChatRequest {
            model: &self.model,
            messages: self.messages(payload, &context),
        };

        let mut builder = self
            .client
            .post(format!("{}/chat/completions", self.endpoint))
            .json(&request);
        if let Some(key) = &self.api_key {
            builder = builder.bearer_auth(key);
        }

        let response = builder.send().await?;
        let status = response.status();
        if !status.is_success() {
            return Err(PipelineError::transient(format!(
                "generation backend returned {status}"
            )));
        }

        let body: ChatResponse = response.json().await?;
        Ok(body
            .choices
            .into_iter()
            .next()
            .and_then(|choice| choice.message.content)
            .unwrap_or_default())
    }
}
