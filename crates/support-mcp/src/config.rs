use std::path::PathBuf;

use support_core::faq::FaqCorpus;

use crate::error::AppError;

#[derive(Debug, Clone)]
pub struct Config {
    pub faq_path: Option<PathBuf>,
}

impl Config {
    /// Optional:
    /// - `SUPPORT_FAQ_PATH`: JSON FAQ corpus; the bundled bank FAQ is used when unset
    pub fn from_env() -> Result<Self, AppError> {
        let faq_path = match std::env::var("SUPPORT_FAQ_PATH") {
            Ok(raw) if raw.trim().is_empty() => {
                return Err(AppError::Config(
                    "SUPPORT_FAQ_PATH must not be empty".to_string(),
                ));
            }
            Ok(raw) => Some(PathBuf::from(raw)),
            Err(_) => None,
        };
        Ok(Self { faq_path })
    }

    pub fn load_corpus(&self) -> Result<FaqCorpus, AppError> {
        let corpus = match &self.faq_path {
            Some(path) => FaqCorpus::load(path)?,
            None => FaqCorpus::builtin()?,
        };
        Ok(corpus)
    }
}
