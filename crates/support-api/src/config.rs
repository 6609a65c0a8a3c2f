use std::path::PathBuf;
use std::time::Duration;

use support_core::conversation::DEFAULT_CONVERSATION_TTL;
use support_core::dispatch::{DEFAULT_MAX_ROUNDS, DEFAULT_MODEL};
use support_core::error::CorpusError;
use support_core::faq::FaqCorpus;

use crate::error::AppError;

const DEFAULT_LISTEN_ADDR: &str = "0.0.0.0:8000";

/// HTTP server configuration, read from the environment.
///
/// Optional:
/// - `SUPPORT_LISTEN_ADDR` (default "0.0.0.0:8000")
/// - `SUPPORT_FAQ_PATH`: JSON FAQ corpus; the bundled bank FAQ is used when unset
/// - `SUPPORT_MODEL` (default "openai/gpt-4o-mini")
/// - `SUPPORT_MAX_TOOL_ROUNDS` (default 5)
/// - `REDIS_URL`: conversation persistence; in-memory when unset
/// - `CONVO_TTL_SECS`: idle conversations are forgotten after this long (default one day)
/// - `RATE_LIMIT_RPS`: chat requests per second; unlimited when unset
#[derive(Debug, Clone)]
pub struct Config {
    pub listen_addr: String,
    pub faq_path: Option<PathBuf>,
    pub model: String,
    pub max_tool_rounds: usize,
    pub redis_url: Option<String>,
    pub conversation_ttl: Duration,
    pub rate_limit_rps: Option<u32>,
}

impl Config {
    pub fn from_env() -> Result<Self, AppError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, AppError> {
        let var = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        let max_tool_rounds = match var("SUPPORT_MAX_TOOL_ROUNDS") {
            None => DEFAULT_MAX_ROUNDS,
            Some(raw) => raw
                .trim()
                .parse::<usize>()
                .ok()
                .filter(|&n| n > 0)
                .ok_or_else(|| {
                    AppError::Config(format!(
                        "SUPPORT_MAX_TOOL_ROUNDS must be a positive integer, got {raw:?}"
                    ))
                })?,
        };

        let conversation_ttl = match var("CONVO_TTL_SECS") {
            None => DEFAULT_CONVERSATION_TTL,
            Some(raw) => raw
                .trim()
                .parse::<u64>()
                .ok()
                .filter(|&n| n > 0)
                .map(Duration::from_secs)
                .ok_or_else(|| {
                    AppError::Config(format!(
                        "CONVO_TTL_SECS must be a positive integer, got {raw:?}"
                    ))
                })?,
        };

        let rate_limit_rps = match var("RATE_LIMIT_RPS") {
            None => None,
            Some(raw) => Some(
                raw.trim()
                    .parse::<u32>()
                    .ok()
                    .filter(|&n| n > 0)
                    .ok_or_else(|| {
                        AppError::Config(format!(
                            "RATE_LIMIT_RPS must be a positive integer, got {raw:?}"
                        ))
                    })?,
            ),
        };

        Ok(Self {
            listen_addr: var("SUPPORT_LISTEN_ADDR")
                .unwrap_or_else(|| DEFAULT_LISTEN_ADDR.to_string()),
            faq_path: var("SUPPORT_FAQ_PATH").map(PathBuf::from),
            model: var("SUPPORT_MODEL").unwrap_or_else(|| DEFAULT_MODEL.to_string()),
            max_tool_rounds,
            redis_url: var("REDIS_URL"),
            conversation_ttl,
            rate_limit_rps,
        })
    }

    /// Read the configured corpus, or the bundled one when no path is set.
    pub fn load_corpus(&self) -> Result<FaqCorpus, CorpusError> {
        match &self.faq_path {
            Some(path) => FaqCorpus::load(path),
            None => FaqCorpus::builtin(),
        }
    }
}
