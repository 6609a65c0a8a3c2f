use support_core::error::CorpusError;

#[derive(Debug, thiserror::Error)]
pub enum AppError {
    #[error(transparent)]
    Corpus(#[from] CorpusError),

    #[error("config error: {0}")]
    Config(String),
}
