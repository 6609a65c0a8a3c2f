/// Error types for the support core.
///
/// Ranking and normalization are total and have no error type. Everything that can
/// reject caller input or fail on I/O is described here, so the HTTP and MCP front
/// ends can map failures without string matching.
use std::path::PathBuf;

#[derive(Debug, thiserror::Error)]
pub enum LoanError {
    #[error("amount must be a positive finite number, got {0}")]
    InvalidAmount(f64),

    #[error("rate must be a non-negative finite number, got {0}")]
    InvalidRate(f64),

    #[error("months must be a positive integer, got {0}")]
    InvalidMonths(i64),

    #[error("loan term of {0} months is too long to compute")]
    TermTooLong(i64),

    #[error("payment overflowed for amount={amount} rate={rate} months={months}")]
    Overflow { amount: f64, rate: f64, months: i64 },
}

#[derive(Debug, thiserror::Error)]
pub enum TicketError {
    #[error("ticket description must not be empty")]
    EmptyDescription,
}

#[derive(Debug, thiserror::Error)]
pub enum CorpusError {
    #[error("failed to read FAQ corpus {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid FAQ corpus JSON: {0}")]
    Json(#[from] serde_json::Error),
}

#[derive(Debug, thiserror::Error)]
pub enum ToolError {
    #[error("unknown tool: {0}")]
    UnknownTool(String),

    #[error("malformed arguments for {tool}: {message}")]
    MalformedArguments { tool: &'static str, message: String },

    #[error("invalid argument for {tool}: {message}")]
    InvalidArgument { tool: &'static str, message: String },
}

impl ToolError {
    /// Text handed back to the model in place of a tool result.
    pub fn to_content(&self) -> String {
        format!("Ошибка: {self}")
    }
}
