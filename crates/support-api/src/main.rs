mod config;
mod error;
mod rate_limit;
mod server;

use tracing::info;
use tracing_subscriber::EnvFilter;

use support_core::conversation::ConversationStore;
use support_core::dispatch::{AgentConfig, SupportAgent};
use support_core::faq::FaqSnapshot;
use support_core::openai::{ClientConfig, OpenAiClient};
use support_core::ticket::TicketRegistry;
use support_core::tools::Toolkit;

use config::Config;
use rate_limit::RateLimiter;
use server::AppState;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::from_default_env().add_directive(tracing::Level::INFO.into()),
        )
        .with_writer(std::io::stderr)
        .with_ansi(false)
        .init();

    info!("starting support assistant API");

    let config = Config::from_env()?;

    let corpus = config.load_corpus()?;
    info!(
        entries = corpus.len(),
        path = ?config.faq_path,
        "faq corpus loaded"
    );
    let toolkit = Toolkit::new(FaqSnapshot::new(corpus), TicketRegistry::new());

    let openai_config = ClientConfig::from_env();
    if openai_config.api_key.is_none() {
        tracing::warn!("no OPENAI_API_KEY or OPENROUTER_API_KEY set, chat requests will fail upstream");
    }
    info!(
        base_url = %openai_config.base_url,
        timeout_ms = openai_config.timeout.as_millis(),
        max_retries = openai_config.max_retries,
        model = %config.model,
        "openai client configured"
    );
    let openai = OpenAiClient::new(openai_config)?;

    let conversations =
        ConversationStore::connect(config.redis_url.as_deref(), config.conversation_ttl).await;
    if conversations.is_redis() {
        info!("redis connected");
    } else {
        info!("conversations kept in memory");
    }

    let limiter = config.rate_limit_rps.map(RateLimiter::new);

    let agent = SupportAgent::new(
        openai,
        toolkit,
        AgentConfig {
            model: config.model.clone(),
            max_rounds: config.max_tool_rounds,
            ..AgentConfig::default()
        },
    );

    let listener = tokio::net::TcpListener::bind(&config.listen_addr).await?;
    info!(addr = %config.listen_addr, "HTTP server listening");

    let app = server::router(AppState::new(agent, conversations, limiter, config));
    axum::serve(listener, app).await?;

    info!("HTTP server shut down");
    Ok(())
}
