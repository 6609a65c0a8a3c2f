/// HTTP routes of the support assistant.
///
/// - `GET  /`                               liveness message
/// - `GET  /faq/search?q=&top_k=`           FAQ ranking without the model
/// - `POST /faq/reload`                     swap in a freshly loaded corpus
/// - `POST /support/chat`                   one assistant turn, optionally inside a conversation
/// - `POST /support/conversations`          start a conversation
/// - `DELETE /support/conversations/{id}`   end a conversation
/// - `GET  /support/tickets/{id}`           look up a ticket opened by the assistant
use std::sync::Arc;

use axum::{
    extract::{
        rejection::{JsonRejection, QueryRejection},
        Path, Query, State,
    },
    routing::{delete, get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tower_http::trace::TraceLayer;
use tracing::{info, warn};

use support_core::conversation::{ConversationId, ConversationStore};
use support_core::dispatch::{AgentReply, SupportAgent};
use support_core::faq::FaqEntry;
use support_core::loan::LoanResult;
use support_core::openai::{ChatModel, Message};
use support_core::ticket::Ticket;
use support_core::tools::{SearchFaqParams, SearchFaqResponse, ToolOutput};

use crate::config::Config;
use crate::error::AppError;
use crate::rate_limit::RateLimiter;

pub struct AppState<M> {
    agent: Arc<SupportAgent<M>>,
    conversations: ConversationStore,
    limiter: Option<RateLimiter>,
    config: Arc<Config>,
}

impl<M> Clone for AppState<M> {
    fn clone(&self) -> Self {
        Self {
            agent: Arc::clone(&self.agent),
            conversations: self.conversations.clone(),
            limiter: self.limiter.clone(),
            config: Arc::clone(&self.config),
        }
    }
}

impl<M: ChatModel> AppState<M> {
    pub fn new(
        agent: SupportAgent<M>,
        conversations: ConversationStore,
        limiter: Option<RateLimiter>,
        config: Config,
    ) -> Self {
        Self {
            agent: Arc::new(agent),
            conversations,
            limiter,
            config: Arc::new(config),
        }
    }
}

pub fn router<M: ChatModel + 'static>(state: AppState<M>) -> Router {
    Router::new()
        .route("/", get(root))
        .route("/faq/search", get(faq_search::<M>))
        .route("/faq/reload", post(faq_reload::<M>))
        .route("/support/chat", post(support_chat::<M>))
        .route("/support/conversations", post(start_conversation::<M>))
        .route("/support/conversations/{id}", delete(end_conversation::<M>))
        .route("/support/tickets/{id}", get(get_ticket::<M>))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

#[derive(Debug, Deserialize)]
struct FaqSearchQuery {
    q: String,
    top_k: Option<i64>,
}

#[derive(Debug, Deserialize)]
struct ChatRequest {
    message: String,
    conversation_id: Option<ConversationId>,
}

#[derive(Debug, Serialize)]
struct ToolCallSummary {
    tool: String,
    arguments: String,
    ok: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<String>,
}

#[derive(Debug, Serialize)]
struct ChatResponse {
    assistant_answer: String,
    tool_used: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    tool_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    tool_query: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    faq_results: Option<Vec<FaqEntry>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    calculation_result: Option<LoanResult>,
    #[serde(skip_serializing_if = "Option::is_none")]
    ticket: Option<Ticket>,
    tool_calls: Vec<ToolCallSummary>,
    #[serde(skip_serializing_if = "Option::is_none")]
    conversation_id: Option<ConversationId>,
}

impl ChatResponse {
    /// `tool_name` names the first tool the model called; the tool-specific
    /// fields carry the latest successful output of each tool.
    fn from_reply(reply: AgentReply, conversation_id: Option<ConversationId>) -> Self {
        let mut response = Self {
            tool_used: reply.tool_used(),
            tool_name: reply.invocations.first().map(|i| i.tool.clone()),
            assistant_answer: reply.answer,
            tool_query: None,
            faq_results: None,
            calculation_result: None,
            ticket: None,
            tool_calls: Vec::with_capacity(reply.invocations.len()),
            conversation_id,
        };

        for invocation in reply.invocations {
            let error = match invocation.outcome {
                Ok(ToolOutput::Faq { query, results }) => {
                    response.tool_query = Some(query);
                    response.faq_results = Some(results);
                    None
                }
                Ok(ToolOutput::Loan(result)) => {
                    response.calculation_result = Some(result);
                    None
                }
                Ok(ToolOutput::Ticket(ticket)) => {
                    response.ticket = Some(ticket);
                    None
                }
                Err(message) => Some(message),
            };
            response.tool_calls.push(ToolCallSummary {
                tool: invocation.tool,
                arguments: invocation.arguments,
                ok: error.is_none(),
                error,
            });
        }
        response
    }
}

async fn root() -> Json<Value> {
    Json(json!({ "message": "Support Assistant API is running" }))
}

async fn faq_search<M: ChatModel>(
    State(state): State<AppState<M>>,
    query: Result<Query<FaqSearchQuery>, QueryRejection>,
) -> Result<Json<SearchFaqResponse>, AppError> {
    let Query(params) = query?;
    let results = state.agent.toolkit().search_faq(&SearchFaqParams {
        query: params.q.clone(),
        top_k: params.top_k,
    });
    Ok(Json(SearchFaqResponse::new(params.q, results)))
}

async fn faq_reload<M: ChatModel>(
    State(state): State<AppState<M>>,
) -> Result<Json<Value>, AppError> {
    let corpus = state.config.load_corpus()?;
    let entries = corpus.len();
    state.agent.toolkit().faq().replace(corpus);
    info!(entries, "faq corpus reloaded");
    Ok(Json(json!({ "entries": entries })))
}

async fn support_chat<M: ChatModel>(
    State(state): State<AppState<M>>,
    body: Result<Json<ChatRequest>, JsonRejection>,
) -> Result<Json<ChatResponse>, AppError> {
    let Json(request) = body?;
    let message = request.message.trim();
    if message.is_empty() {
        return Err(AppError::BadRequest("message must not be empty".to_string()));
    }

    if let Some(limiter) = &state.limiter {
        limiter.check().await?;
    }

    let history = match &request.conversation_id {
        Some(id) => state
            .conversations
            .get(id)
            .await
            .ok_or_else(|| AppError::NotFound(format!("unknown conversation_id: {id}")))?,
        None => Vec::new(),
    };

    let reply = state.agent.respond(&history, message).await?;

    if let Some(id) = &request.conversation_id {
        let turn = [Message::user(message), Message::assistant(reply.answer.clone())];
        if !state.conversations.append(id, &turn).await {
            warn!(conversation_id = %id, "failed to persist conversation turn");
            return Err(AppError::Internal(
                "failed to persist conversation state".to_string(),
            ));
        }
    }

    Ok(Json(ChatResponse::from_reply(reply, request.conversation_id)))
}

async fn start_conversation<M: ChatModel>(
    State(state): State<AppState<M>>,
) -> Result<Json<Value>, AppError> {
    let id = state.conversations.start().await.ok_or_else(|| {
        AppError::Internal("failed to store new conversation".to_string())
    })?;
    info!(conversation_id = %id, "conversation started");
    Ok(Json(json!({ "conversation_id": id })))
}

async fn end_conversation<M: ChatModel>(
    State(state): State<AppState<M>>,
    Path(id): Path<ConversationId>,
) -> Result<Json<Value>, AppError> {
    if !state.conversations.end(&id).await {
        return Err(AppError::NotFound(format!("unknown conversation_id: {id}")));
    }
    Ok(Json(json!({ "ok": true })))
}

async fn get_ticket<M: ChatModel>(
    State(state): State<AppState<M>>,
    Path(id): Path<String>,
) -> Result<Json<Ticket>, AppError> {
    state
        .agent
        .toolkit()
        .tickets()
        .get(&id)
        .map(Json)
        .ok_or_else(|| AppError::NotFound(format!("unknown ticket: {id}")))
}
