/// MCP server exposing the support assistant's tools directly.
///
/// Exposes three tools:
/// - `search_faq`: Keyword search over the bank FAQ
/// - `calculate_loan`: Annuity payment for a loan
/// - `create_ticket`: Open a support ticket for a specialist
use rmcp::{
    Json, ServerHandler,
    handler::server::router::tool::ToolRouter,
    handler::server::wrapper::Parameters,
    model::*,
    tool, tool_handler, tool_router,
};
use schemars::JsonSchema;
use serde::Serialize;
use tracing::info;

use support_core::loan::{LoanRequest, LoanResult};
use support_core::tools::{CreateTicketParams, SearchFaqParams, SearchFaqResponse, Toolkit};

#[derive(Debug, Serialize, JsonSchema)]
pub struct TicketResponse {
    pub ticket_id: String,
    /// Message to relay to the customer.
    pub confirmation: String,
}

#[derive(Clone)]
pub struct SupportToolsServer {
    toolkit: Toolkit,
    tool_router: ToolRouter<SupportToolsServer>,
}

impl SupportToolsServer {
    pub fn new(toolkit: Toolkit) -> Self {
        Self {
            toolkit,
            tool_router: Self::tool_router(),
        }
    }
}

#[tool_router]
impl SupportToolsServer {
    #[tool(description = "Search the bank FAQ by keywords. Returns the best matching questions with their answers, most relevant first.")]
    async fn search_faq(
        &self,
        Parameters(params): Parameters<SearchFaqParams>,
    ) -> Result<Json<SearchFaqResponse>, String> {
        let results = self.toolkit.search_faq(&params);
        info!(query = %params.query, results = results.len(), "search_faq");
        Ok(Json(SearchFaqResponse::new(params.query, results)))
    }

    #[tool(description = "Calculate the monthly annuity payment, total payment and overpayment for a loan.")]
    async fn calculate_loan(
        &self,
        Parameters(request): Parameters<LoanRequest>,
    ) -> Result<Json<LoanResult>, String> {
        self.toolkit
            .calculate_loan(&request)
            .map(Json)
            .map_err(|e| e.to_string())
    }

    #[tool(description = "Create a support ticket when the customer's problem needs a specialist. Returns the ticket id.")]
    async fn create_ticket(
        &self,
        Parameters(params): Parameters<CreateTicketParams>,
    ) -> Result<Json<TicketResponse>, String> {
        let ticket = self
            .toolkit
            .create_ticket(&params)
            .map_err(|e| e.to_string())?;
        info!(ticket_id = %ticket.id, "ticket created");
        Ok(Json(TicketResponse {
            confirmation: ticket.confirmation(),
            ticket_id: ticket.id,
        }))
    }
}

#[tool_handler]
impl ServerHandler for SupportToolsServer {
    fn get_info(&self) -> ServerInfo {
        ServerInfo {
            protocol_version: ProtocolVersion::V_2025_06_18,
            capabilities: ServerCapabilities::builder()
                .enable_tools()
                .build(),
            server_info: Implementation {
                name: "support-mcp".to_string(),
                version: env!("CARGO_PKG_VERSION").to_string(),
                title: None,
                icons: None,
                website_url: None,
            },
            instructions: Some(
                "Bank customer-support tools. Use search_faq for questions about cards, \
                 transfers, limits and the mobile app, calculate_loan for loan payment \
                 estimates, and create_ticket when the problem needs a human specialist."
                    .to_string(),
            ),
        }
    }
}
