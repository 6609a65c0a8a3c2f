/// The tools the assistant may call, and the bridge between the model's untyped
/// JSON and the typed functions behind them.
use schemars::JsonSchema;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{info, warn};

use crate::error::ToolError;
use crate::faq::{FaqEntry, FaqSnapshot, DEFAULT_TOP_K};
use crate::loan::{LoanRequest, LoanResult};
use crate::openai::{FunctionDefinition, ToolDefinition};
use crate::ticket::{Ticket, TicketRegistry};

#[derive(Debug, Clone, Deserialize, JsonSchema)]
pub struct SearchFaqParams {
    /// The customer's question in natural language, e.g. "как узнать баланс".
    pub query: String,
    /// Maximum number of FAQ entries to return (default: 3).
    pub top_k: Option<i64>,
}

#[derive(Debug, Clone, Deserialize, JsonSchema)]
pub struct CreateTicketParams {
    /// Description of the customer's problem.
    pub description: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SupportTool {
    SearchFaq,
    CalculateLoan,
    CreateTicket,
}

impl SupportTool {
    pub const ALL: [SupportTool; 3] = [
        SupportTool::SearchFaq,
        SupportTool::CalculateLoan,
        SupportTool::CreateTicket,
    ];

    pub fn name(self) -> &'static str {
        match self {
            SupportTool::SearchFaq => "search_faq",
            SupportTool::CalculateLoan => "calculate_loan",
            SupportTool::CreateTicket => "create_ticket",
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|tool| tool.name() == name)
    }

    pub fn description(self) -> &'static str {
        match self {
            SupportTool::SearchFaq => {
                "Поиск по базе знаний (FAQ) банка. Используй, когда клиент задаёт вопрос про \
                 продукты, лимиты, баланс, переводы, карты, кэшбэк."
            }
            SupportTool::CalculateLoan => {
                "Рассчитать ежемесячный платёж по кредиту, общую сумму выплат и переплату."
            }
            SupportTool::CreateTicket => {
                "Создать обращение в поддержку, когда проблему клиента нельзя решить самостоятельно."
            }
        }
    }

    /// JSON schema of the tool's arguments, derived from its parameter type.
    pub fn parameters_schema(self) -> Value {
        let schema = match self {
            SupportTool::SearchFaq => schemars::schema_for!(SearchFaqParams),
            SupportTool::CalculateLoan => schemars::schema_for!(LoanRequest),
            SupportTool::CreateTicket => schemars::schema_for!(CreateTicketParams),
        };
        let mut value = schema.to_value();
        if let Some(obj) = value.as_object_mut() {
            obj.remove("$schema");
            obj.remove("title");
        }
        value
    }

    pub fn definition(self) -> ToolDefinition {
        ToolDefinition {
            kind: "function".to_string(),
            function: FunctionDefinition {
                name: self.name().to_string(),
                description: self.description().to_string(),
                parameters: self.parameters_schema(),
            },
        }
    }

    pub fn definitions() -> Vec<ToolDefinition> {
        Self::ALL.into_iter().map(Self::definition).collect()
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum ToolOutput {
    Faq {
        query: String,
        results: Vec<FaqEntry>,
    },
    Loan(LoanResult),
    Ticket(Ticket),
}

impl ToolOutput {
    pub fn tool(&self) -> SupportTool {
        match self {
            ToolOutput::Faq { .. } => SupportTool::SearchFaq,
            ToolOutput::Loan(_) => SupportTool::CalculateLoan,
            ToolOutput::Ticket(_) => SupportTool::CreateTicket,
        }
    }

    /// The JSON text re-submitted to the model as the tool result.
    pub fn to_content(&self) -> String {
        let value = match self {
            ToolOutput::Faq { results, .. } => serde_json::to_value(results),
            ToolOutput::Loan(result) => serde_json::to_value(result),
            ToolOutput::Ticket(ticket) => Ok(Value::String(ticket.confirmation())),
        };
        value.map(|v| v.to_string()).unwrap_or_else(|e| {
            warn!(error = %e, "failed to serialize tool output");
            "null".to_string()
        })
    }
}

#[derive(Debug, Clone, Serialize, JsonSchema)]
pub struct SearchFaqResponse {
    pub query: String,
    pub results_count: usize,
    pub results: Vec<FaqEntry>,
}

impl SearchFaqResponse {
    pub fn new(query: String, results: Vec<FaqEntry>) -> Self {
        Self {
            query,
            results_count: results.len(),
            results,
        }
    }
}

/// Everything a tool needs at call time. Cloning is cheap and clones share state.
#[derive(Debug, Clone)]
pub struct Toolkit {
    faq: FaqSnapshot,
    tickets: TicketRegistry,
}

impl Toolkit {
    pub fn new(faq: FaqSnapshot, tickets: TicketRegistry) -> Self {
        Self { faq, tickets }
    }

    pub fn faq(&self) -> &FaqSnapshot {
        &self.faq
    }

    pub fn tickets(&self) -> &TicketRegistry {
        &self.tickets
    }

    pub fn search_faq(&self, params: &SearchFaqParams) -> Vec<FaqEntry> {
        let top_k = match params.top_k {
            None => DEFAULT_TOP_K,
            Some(k) => usize::try_from(k).unwrap_or(0),
        };
        let results = self.faq.current().search(&params.query, top_k);
        info!(query = %params.query, top_k, results = results.len(), "faq search");
        results
    }

    pub fn calculate_loan(&self, request: &LoanRequest) -> Result<LoanResult, ToolError> {
        request.calculate().map_err(|e| ToolError::InvalidArgument {
            tool: SupportTool::CalculateLoan.name(),
            message: e.to_string(),
        })
    }

    pub fn create_ticket(&self, params: &CreateTicketParams) -> Result<Ticket, ToolError> {
        self.tickets
            .create(&params.description)
            .map_err(|e| ToolError::InvalidArgument {
                tool: SupportTool::CreateTicket.name(),
                message: e.to_string(),
            })
    }

    /// Run the tool `name` with JSON-encoded `arguments` as produced by the model.
    pub fn invoke(&self, name: &str, arguments: &str) -> Result<ToolOutput, ToolError> {
        let tool =
            SupportTool::from_name(name).ok_or_else(|| ToolError::UnknownTool(name.to_string()))?;

        match tool {
            SupportTool::SearchFaq => {
                let params: SearchFaqParams = parse_arguments(tool, arguments)?;
                let results = self.search_faq(&params);
                Ok(ToolOutput::Faq {
                    query: params.query,
                    results,
                })
            }
            SupportTool::CalculateLoan => {
                let request: LoanRequest = parse_arguments(tool, arguments)?;
                self.calculate_loan(&request).map(ToolOutput::Loan)
            }
            SupportTool::CreateTicket => {
                let params: CreateTicketParams = parse_arguments(tool, arguments)?;
                self.create_ticket(&params).map(ToolOutput::Ticket)
            }
        }
    }
}

fn parse_arguments<T: DeserializeOwned>(tool: SupportTool, raw: &str) -> Result<T, ToolError> {
    let malformed = |message: String| ToolError::MalformedArguments {
        tool: tool.name(),
        message,
    };

    let raw = if raw.trim().is_empty() { "{}" } else { raw };
    let mut value: Value = serde_json::from_str(raw).map_err(|e| malformed(e.to_string()))?;
    // Some agent frameworks encode the argument object twice.
    if let Value::String(inner) = &value {
        value = serde_json::from_str(inner).map_err(|e| malformed(e.to_string()))?;
    }
    serde_json::from_value(value).map_err(|e| malformed(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::faq::FaqCorpus;

    fn toolkit() -> Toolkit {
        Toolkit::new(
            FaqSnapshot::new(FaqCorpus::builtin().unwrap()),
            TicketRegistry::new(),
        )
    }

    #[test]
    fn tool_names_round_trip() {
        for tool in SupportTool::ALL {
            assert_eq!(SupportTool::from_name(tool.name()), Some(tool));
        }
        assert_eq!(SupportTool::from_name("transfer_money"), None);
    }

    #[test]
    fn schemas_declare_required_fields() {
        let faq = SupportTool::SearchFaq.parameters_schema();
        assert_eq!(faq["type"], "object");
        assert_eq!(faq["required"], serde_json::json!(["query"]));
        assert!(faq["properties"]["top_k"].is_object());

        let loan = SupportTool::CalculateLoan.parameters_schema();
        let mut required: Vec<String> =
            serde_json::from_value(loan["required"].clone()).unwrap();
        required.sort();
        assert_eq!(required, vec!["amount", "months", "rate"]);
        assert_eq!(loan["properties"]["months"]["type"], "integer");

        let ticket = SupportTool::CreateTicket.parameters_schema();
        assert_eq!(ticket["required"], serde_json::json!(["description"]));
        assert!(ticket.get("$schema").is_none());
    }

    #[test]
    fn definitions_cover_every_tool() {
        let defs = SupportTool::definitions();
        let names: Vec<&str> = defs.iter().map(|d| d.function.name.as_str()).collect();
        assert_eq!(names, vec!["search_faq", "calculate_loan", "create_ticket"]);
        assert!(defs.iter().all(|d| d.kind == "function"));
    }

    #[test]
    fn search_faq_defaults_top_k() {
        let output = toolkit()
            .invoke("search_faq", r#"{"query": "Как узнать баланс карты?"}"#)
            .unwrap();
        let ToolOutput::Faq { query, results } = output else {
            panic!("expected faq output");
        };
        assert_eq!(query, "Как узнать баланс карты?");
        assert!(!results.is_empty() && results.len() <= DEFAULT_TOP_K);
        assert_eq!(results[0].question, "Как узнать баланс карты?");
    }

    #[test]
    fn non_positive_top_k_returns_nothing() {
        let kit = toolkit();
        for args in [
            r#"{"query": "баланс", "top_k": 0}"#,
            r#"{"query": "баланс", "top_k": -2}"#,
        ] {
            let output = kit.invoke("search_faq", args).unwrap();
            assert_eq!(
                output,
                ToolOutput::Faq {
                    query: "баланс".to_string(),
                    results: vec![]
                }
            );
            assert_eq!(output.to_content(), "[]");
        }
    }

    #[test]
    fn faq_content_lists_question_answer_pairs() {
        let output = toolkit()
            .invoke("search_faq", r#"{"query": "лимит", "top_k": 5}"#)
            .unwrap();
        let value: Value = serde_json::from_str(&output.to_content()).unwrap();
        let items = value.as_array().unwrap();
        assert_eq!(items.len(), 2);
        assert!(items.iter().all(|i| i["question"].is_string() && i["answer"].is_string()));
    }

    #[test]
    fn calculate_loan_returns_three_numbers() {
        let output = toolkit()
            .invoke("calculate_loan", r#"{"amount": 500000, "rate": 15, "months": 12}"#)
            .unwrap();
        let value: Value = serde_json::from_str(&output.to_content()).unwrap();
        assert_eq!(value["monthly_payment"], 45129.16);
        assert_eq!(value["total_payment"], 541549.87);
        assert_eq!(value["overpayment"], 41549.87);
    }

    #[test]
    fn double_encoded_arguments_are_accepted() {
        let args = serde_json::to_string(r#"{"amount": 120000, "rate": 0, "months": 12}"#).unwrap();
        let output = toolkit().invoke("calculate_loan", &args).unwrap();
        let ToolOutput::Loan(result) = output else {
            panic!("expected loan output");
        };
        assert_eq!(result.monthly_payment, 10_000.0);
    }

    #[test]
    fn missing_required_field_is_reported() {
        let err = toolkit()
            .invoke("calculate_loan", r#"{"amount": 500000, "rate": 15}"#)
            .unwrap_err();
        assert!(matches!(
            err,
            ToolError::MalformedArguments {
                tool: "calculate_loan",
                ..
            }
        ));
        assert!(err.to_content().contains("months"));
    }

    #[test]
    fn broken_json_is_reported() {
        let err = toolkit().invoke("search_faq", "{query: ").unwrap_err();
        assert!(matches!(err, ToolError::MalformedArguments { .. }));

        let err = toolkit().invoke("search_faq", "").unwrap_err();
        assert!(err.to_string().contains("query"));
    }

    #[test]
    fn invalid_loan_values_are_reported() {
        let err = toolkit()
            .invoke("calculate_loan", r#"{"amount": 1000, "rate": 10, "months": 0}"#)
            .unwrap_err();
        assert!(matches!(err, ToolError::InvalidArgument { .. }));
    }

    #[test]
    fn unknown_tool_is_reported() {
        let err = toolkit().invoke("wire_transfer", "{}").unwrap_err();
        assert!(matches!(err, ToolError::UnknownTool(name) if name == "wire_transfer"));
    }

    #[test]
    fn create_ticket_confirms_with_id() {
        let kit = toolkit();
        let output = kit
            .invoke("create_ticket", r#"{"description": "Не могу войти в приложение"}"#)
            .unwrap();
        let content: Value = serde_json::from_str(&output.to_content()).unwrap();
        assert!(content.as_str().unwrap().contains("TICKET-000001"));
        assert_eq!(kit.tickets().len(), 1);

        let err = kit
            .invoke("create_ticket", r#"{"description": "  "}"#)
            .unwrap_err();
        assert!(matches!(err, ToolError::InvalidArgument { .. }));
    }
}
