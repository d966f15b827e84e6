//! Tool-calling agent over an OpenAI-compatible chat completions API.

use crate::config::{AgentConfig, EndpointConfig};
use crate::models::RetrievedChunk;
use crate::retriever::Retriever;
use crate::{AgentError, ToolError};
use async_trait::async_trait;
use reqwest::header::{HeaderMap, HeaderValue, AUTHORIZATION, CONTENT_TYPE};
use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tracing::{debug, info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
    Tool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: Role,
    #[serde(default)]
    pub content: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tool_calls: Vec<ToolCall>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_call_id: Option<String>,
}

impl ChatMessage {
    fn text(role: Role, content: impl Into<String>) -> Self {
        Self {
            role,
            content: Some(content.into()),
            tool_calls: Vec::new(),
            tool_call_id: None,
        }
    }

    pub fn system(content: impl Into<String>) -> Self {
        Self::text(Role::System, content)
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self::text(Role::User, content)
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self::text(Role::Assistant, content)
    }

    pub fn tool(call_id: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            tool_call_id: Some(call_id.into()),
            ..Self::text(Role::Tool, content)
        }
    }

    pub fn tool_request(calls: Vec<ToolCall>) -> Self {
        Self {
            role: Role::Assistant,
            content: None,
            tool_calls: calls,
            tool_call_id: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolCall {
    pub id: String,
    #[serde(rename = "type", default = "function_kind")]
    pub kind: String,
    pub function: FunctionCall,
}

fn function_kind() -> String {
    "function".to_string()
}

impl ToolCall {
    pub fn function(
        id: impl Into<String>,
        name: impl Into<String>,
        arguments: impl Into<String>,
    ) -> Self {
        Self {
            id: id.into(),
            kind: function_kind(),
            function: FunctionCall {
                name: name.into(),
                arguments: arguments.into(),
            },
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FunctionCall {
    pub name: String,
    /// JSON-encoded argument object, as sent by the model.
    pub arguments: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ToolSpec {
    pub name: String,
    pub description: String,
    pub parameters: Value,
}

impl ToolSpec {
    fn to_wire(&self) -> Value {
        json!({
            "type": "function",
            "function": {
                "name": self.name,
                "description": self.description,
                "parameters": self.parameters,
            }
        })
    }
}

#[async_trait]
pub trait ChatModel: Send + Sync {
    /// One assistant turn for the conversation so far.
    async fn complete(
        &self,
        messages: &[ChatMessage],
        tools: &[ToolSpec],
    ) -> Result<ChatMessage, AgentError>;
}

#[derive(Debug, Clone, PartialEq)]
pub struct ToolOutput {
    pub query: String,
    pub content: String,
    pub hits: Vec<RetrievedChunk>,
}

#[async_trait]
pub trait Tool: Send + Sync {
    fn spec(&self) -> ToolSpec;

    async fn call(&self, arguments: &str) -> Result<ToolOutput, ToolError>;
}

#[derive(Debug, Clone, PartialEq)]
pub struct ToolInvocation {
    pub tool: String,
    pub query: String,
    pub hits: Vec<RetrievedChunk>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct AgentOutcome {
    pub answer: String,
    pub invocations: Vec<ToolInvocation>,
}

/// Exposes a [`Retriever`] to the model as a single-argument query tool.
pub struct RetrieverTool<'a> {
    retriever: Retriever<'a>,
    name: String,
    description: String,
}

impl<'a> RetrieverTool<'a> {
    pub fn new(
        retriever: Retriever<'a>,
        name: impl Into<String>,
        description: impl Into<String>,
    ) -> Self {
        Self {
            retriever,
            name: name.into(),
            description: description.into(),
        }
    }
}

#[derive(Deserialize)]
struct QueryArguments {
    #[serde(alias = "input")]
    query: String,
}

fn parse_query(arguments: &str) -> Result<String, ToolError> {
    let parsed: QueryArguments = serde_json::from_str(arguments)
        .map_err(|error| ToolError::InvalidArguments(format!("{error}: {arguments}")))?;
    let query = parsed.query.trim();
    if query.is_empty() {
        return Err(ToolError::InvalidArguments("query is empty".to_string()));
    }
    Ok(query.to_string())
}

/// Retrieved chunks as the text handed back to the model.
pub fn render_hits(hits: &[RetrievedChunk]) -> String {
    if hits.is_empty() {
        return "未检索到相关内容。".to_string();
    }
    hits.iter()
        .map(|hit| format!("[{} 第{}页]\n{}", hit.metadata.file, hit.metadata.page, hit.text))
        .collect::<Vec<_>>()
        .join("\n\n")
}

#[async_trait]
impl Tool for RetrieverTool<'_> {
    fn spec(&self) -> ToolSpec {
        ToolSpec {
            name: self.name.clone(),
            description: self.description.clone(),
            parameters: json!({
                "type": "object",
                "properties": {
                    "query": {
                        "type": "string",
                        "description": "Question to look up in the notes",
                    }
                },
                "required": ["query"],
            }),
        }
    }

    async fn call(&self, arguments: &str) -> Result<ToolOutput, ToolError> {
        let query = parse_query(arguments)?;
        let hits = self.retriever.retrieve(&query).await?;
        Ok(ToolOutput {
            content: render_hits(&hits),
            query,
            hits,
        })
    }
}

pub struct Agent<'a> {
    model: &'a dyn ChatModel,
    tools: Vec<Box<dyn Tool + 'a>>,
    config: &'a AgentConfig,
}

impl<'a> Agent<'a> {
    pub fn new(model: &'a dyn ChatModel, config: &'a AgentConfig) -> Self {
        Self {
            model,
            tools: Vec::new(),
            config,
        }
    }

    pub fn with_tool(mut self, tool: Box<dyn Tool + 'a>) -> Self {
        self.tools.push(tool);
        self
    }

    pub async fn run(&self, question: &str) -> Result<AgentOutcome, AgentError> {
        let specs = self.tools.iter().map(|tool| tool.spec()).collect::<Vec<_>>();
        let mut messages = vec![
            ChatMessage::system(self.config.system_prompt.clone()),
            ChatMessage::user(question),
        ];
        let mut invocations = Vec::new();

        for iteration in 0..self.config.max_iterations {
            let reply = self.model.complete(&messages, &specs).await?;

            if reply.tool_calls.is_empty() {
                let answer = reply.content.as_deref().unwrap_or_default().trim().to_string();
                if answer.is_empty() {
                    return Err(AgentError::EmptyAnswer);
                }
                info!(iterations = iteration + 1, tool_calls = invocations.len(), "agent answered");
                return Ok(AgentOutcome {
                    answer,
                    invocations,
                });
            }

            messages.push(reply.clone());
            for call in &reply.tool_calls {
                let name = call.function.name.as_str();
                let tool = self
                    .tools
                    .iter()
                    .zip(&specs)
                    .find(|(_, spec)| spec.name == name)
                    .map(|(tool, _)| tool)
                    .ok_or_else(|| AgentError::UnknownTool(name.to_string()))?;

                let output = tool
                    .call(&call.function.arguments)
                    .await
                    .map_err(|source| AgentError::Tool {
                        name: name.to_string(),
                        source,
                    })?;
                debug!(tool = name, query = %output.query, hits = output.hits.len(), "tool call");

                messages.push(ChatMessage::tool(call.id.clone(), output.content));
                invocations.push(ToolInvocation {
                    tool: name.to_string(),
                    query: output.query,
                    hits: output.hits,
                });
            }
        }

        Err(AgentError::IterationLimit(self.config.max_iterations))
    }
}

pub struct OpenAiChatModel {
    client: Client,
    endpoint: String,
    config: EndpointConfig,
    temperature: f32,
}

impl OpenAiChatModel {
    pub fn new(config: EndpointConfig, temperature: f32) -> Result<Self, AgentError> {
        if config.api_key.trim().is_empty() {
            return Err(AgentError::InvalidConfig("missing API key".to_string()));
        }
        if config.model.trim().is_empty() {
            return Err(AgentError::InvalidConfig("missing chat model name".to_string()));
        }

        let mut headers = HeaderMap::new();
        let auth = format!("Bearer {}", config.api_key.trim());
        headers.insert(
            AUTHORIZATION,
            HeaderValue::from_str(&auth)
                .map_err(|_| AgentError::InvalidConfig("invalid API key".to_string()))?,
        );
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));

        let client = Client::builder()
            .timeout(config.timeout)
            .default_headers(headers)
            .build()
            .map_err(|error| AgentError::InvalidConfig(error.to_string()))?;
        let endpoint = config
            .endpoint("chat/completions")
            .map_err(|error| AgentError::InvalidConfig(error.to_string()))?;

        Ok(Self {
            client,
            endpoint,
            config,
            temperature,
        })
    }
}

#[async_trait]
impl ChatModel for OpenAiChatModel {
    async fn complete(
        &self,
        messages: &[ChatMessage],
        tools: &[ToolSpec],
    ) -> Result<ChatMessage, AgentError> {
        let mut request = json!({
            "model": self.config.model,
            "messages": messages,
            "temperature": self.temperature,
        });
        if !tools.is_empty() {
            request["tools"] = Value::Array(tools.iter().map(ToolSpec::to_wire).collect());
        }

        let mut attempt = 0usize;
        loop {
            match self.client.post(&self.endpoint).json(&request).send().await {
                Ok(response) => {
                    let status = response.status();
                    if status.is_success() {
                        let parsed: CompletionResponse = response
                            .json()
                            .await
                            .map_err(|error| AgentError::MalformedResponse(error.to_string()))?;
                        return first_message(parsed);
                    }

                    let body = response
                        .text()
                        .await
                        .unwrap_or_else(|_| "<body unavailable>".to_string());
                    if should_retry(status) && attempt + 1 < self.config.max_retries {
                        attempt += 1;
                        warn!(%status, attempt, "chat request failed, retrying");
                        tokio::time::sleep(self.config.retry_backoff(attempt)).await;
                        continue;
                    }
                    return Err(AgentError::Backend {
                        status: status.as_u16(),
                        body,
                    });
                }
                Err(error) => {
                    if attempt + 1 < self.config.max_retries {
                        attempt += 1;
                        warn!(%error, attempt, "chat backend unreachable, retrying");
                        tokio::time::sleep(self.config.retry_backoff(attempt)).await;
                        continue;
                    }
                    return Err(AgentError::BackendUnavailable(format!(
                        "{}: {error}",
                        self.endpoint
                    )));
                }
            }
        }
    }
}

fn should_retry(status: StatusCode) -> bool {
    status == StatusCode::TOO_MANY_REQUESTS || status.is_server_error()
}

#[derive(Debug, Deserialize)]
struct CompletionResponse {
    choices: Vec<CompletionChoice>,
}

#[derive(Debug, Deserialize)]
struct CompletionChoice {
    message: ChatMessage,
}

fn first_message(parsed: CompletionResponse) -> Result<ChatMessage, AgentError> {
    parsed
        .choices
        .into_iter()
        .next()
        .map(|choice| choice.message)
        .ok_or_else(|| AgentError::MalformedResponse("response has no choices".to_string()))
}
