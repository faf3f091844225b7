//! Conversation engine: session state, prompt assembly, the per-turn driver,
//! automode and the console loop.

pub mod automode;
pub mod conversation;
pub mod driver;
pub mod prompt;
pub mod repl;
pub mod session;

pub use automode::{run_automode, AutomodeReport, AutomodeStop};
pub use conversation::{Conversation, ConversationError, Turn};
pub use driver::{Driver, SilentObserver, TurnObserver, TurnReply};
pub use prompt::{AutomodeProgress, PromptSection, SystemPromptBuilder};
pub use session::Session;

use crate::config::Config;
use crate::providers::{self, Provider};
use crate::tools::{self, DependencyInstaller, ToolEnv, VenvInstaller};
use std::sync::Arc;

/// Start the agent: one turn when `message` is given, the console loop
/// otherwise. Background processes are stopped before returning.
pub async fn run(
    mut config: Config,
    message: Option<String>,
    provider_override: Option<String>,
    model_override: Option<String>,
    temperature: Option<f64>,
) -> anyhow::Result<()> {
    if let Some(provider) = provider_override {
        config.default_provider = provider;
    }
    if let Some(model) = model_override {
        config.default_model = model;
    }
    if let Some(temperature) = temperature {
        config.default_temperature = temperature;
    }
    config.validate()?;

    let provider: Arc<dyn Provider> = Arc::from(providers::create_provider(
        &config.default_provider,
        config.api_key.as_deref(),
        config.api_url.as_deref(),
    )?);
    tracing::info!(
        provider = provider.name(),
        model = %config.default_model,
        native_tools = provider.supports_native_tools(),
        "agent starting"
    );

    let config = Arc::new(config);
    let env = ToolEnv::new(Arc::clone(&config), Some(Arc::clone(&provider)));
    let installer = VenvInstaller {
        prompt: config.tools.prompt_install,
        ..VenvInstaller::default()
    };
    // A single message has nobody to answer an install prompt.
    let installer: Option<&dyn DependencyInstaller> = if message.is_none() || !installer.prompt {
        Some(&installer)
    } else {
        None
    };

    let mut registry = tools::default_registry();
    registry.discover(&env, installer).await;
    for failure in registry.failures() {
        tracing::warn!(tool = %failure.name, reason = %failure.reason, "tool unavailable");
    }

    let mut driver = Driver::new(
        provider,
        registry,
        config.default_model.clone(),
        config.default_temperature,
    )
    .with_completion_sentinel(config.agent.completion_sentinel.clone())
    .with_observer(Box::new(repl::ConsoleObserver::new(
        config.agent.show_tool_usage,
    )));
    let mut session = Session::from_config(&config);

    let result = match message {
        Some(message) => driver
            .run_turn(&mut session, &message, None)
            .await
            .map(|reply| repl::print_reply(&reply.text)),
        None => {
            let repl = repl::Repl {
                env,
                installer,
                default_automode_iterations: config.agent.max_automode_iterations,
            };
            repl.run(&mut driver, &mut session).await
        }
    };

    session.shutdown().await;
    result
}
