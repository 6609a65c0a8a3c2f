/// The tool-call loop between the customer, the model and the support tools.
///
/// Each round sends the conversation plus the tool declarations to the model. If
/// the model asks for tools, they run in order, their results (or error strings)
/// are appended as `tool` messages and the model is asked again. The first reply
/// without tool calls is the answer.
use tracing::{info, warn};

use crate::openai::{ChatCompletionRequest, ChatModel, Message, ModelError};
use crate::tools::{SupportTool, ToolOutput, Toolkit};

pub const DEFAULT_MODEL: &str = "openai/gpt-4o-mini";
pub const DEFAULT_MAX_ROUNDS: usize = 5;

const SYSTEM_PROMPT: &str = "Ты ассистент службы поддержки банка. \
Твоя задача: помогать клиентам с вопросами про продукты, карты, переводы, лимиты, кредиты. \
Если вопрос про продукты банка, используй функцию search_faq. \
Если вопрос про расчёт кредита, используй функцию calculate_loan. \
Если проблему нельзя решить самостоятельно, создай обращение функцией create_ticket. \
Если общий вопрос (приветствие, благодарность), отвечай сам. \
Всегда отвечай на русском языке.";

#[derive(Debug, Clone)]
pub struct AgentConfig {
    pub model: String,
    pub max_rounds: usize,
    pub temperature: f32,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            model: DEFAULT_MODEL.to_string(),
            max_rounds: DEFAULT_MAX_ROUNDS,
            temperature: 0.0,
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum DispatchError {
    #[error("model request failed: {0}")]
    Model(#[from] ModelError),

    #[error("no final answer after {0} model rounds")]
    RoundLimit(usize),
}

#[derive(Debug, Clone, PartialEq)]
pub struct ToolInvocation {
    pub call_id: String,
    pub tool: String,
    pub arguments: String,
    /// The tool output, or the error text that was shown to the model.
    pub outcome: Result<ToolOutput, String>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct AgentReply {
    pub answer: String,
    pub invocations: Vec<ToolInvocation>,
}

impl AgentReply {
    pub fn tool_used(&self) -> bool {
        !self.invocations.is_empty()
    }
}

pub struct SupportAgent<M> {
    model: M,
    toolkit: Toolkit,
    config: AgentConfig,
}

impl<M: ChatModel> SupportAgent<M> {
    pub fn new(model: M, toolkit: Toolkit, config: AgentConfig) -> Self {
        Self {
            model,
            toolkit,
            config,
        }
    }

    pub fn toolkit(&self) -> &Toolkit {
        &self.toolkit
    }

    pub fn config(&self) -> &AgentConfig {
        &self.config
    }

    /// Answer `user_message` given the earlier turns in `history`.
    pub async fn respond(
        &self,
        history: &[Message],
        user_message: &str,
    ) -> Result<AgentReply, DispatchError> {
        let mut messages = Vec::with_capacity(history.len() + 2);
        messages.push(Message::system(SYSTEM_PROMPT));
        messages.extend(history.iter().cloned());
        messages.push(Message::user(user_message));

        let tools = SupportTool::definitions();
        let mut invocations = Vec::new();

        for round in 1..=self.config.max_rounds {
            let request = ChatCompletionRequest {
                model: self.config.model.clone(),
                messages: messages.clone(),
                tools: Some(tools.clone()),
                tool_choice: Some("auto".to_string()),
                temperature: Some(self.config.temperature),
                max_tokens: None,
            };
            let reply = self.model.complete(request).await?.into_message()?;

            let calls = reply.tool_calls.clone().unwrap_or_default();
            if calls.is_empty() {
                info!(round, tool_calls = invocations.len(), "assistant answered");
                return Ok(AgentReply {
                    answer: reply.content.unwrap_or_default(),
                    invocations,
                });
            }

            messages.push(reply);
            for call in calls {
                let outcome = self
                    .toolkit
                    .invoke(&call.function.name, &call.function.arguments);
                let content = match &outcome {
                    Ok(output) => {
                        info!(round, tool = %call.function.name, "tool call succeeded");
                        output.to_content()
                    }
                    Err(e) => {
                        warn!(round, tool = %call.function.name, error = %e, "tool call failed");
                        e.to_content()
                    }
                };
                messages.push(Message::tool_result(&call, content));
                invocations.push(ToolInvocation {
                    call_id: call.id,
                    tool: call.function.name,
                    arguments: call.function.arguments,
                    outcome: outcome.map_err(|e| e.to_string()),
                });
            }
        }

        warn!(
            max_rounds = self.config.max_rounds,
            "model kept requesting tools"
        );
        Err(DispatchError::RoundLimit(self.config.max_rounds))
    }
}
