#![warn(clippy::all, clippy::pedantic)]
#![allow(
    clippy::assigning_clones,
    clippy::bool_to_int_with_if,
    clippy::case_sensitive_file_extension_comparisons,
    clippy::cast_possible_wrap,
    clippy::doc_markdown,
    clippy::field_reassign_with_default,
    clippy::float_cmp,
    clippy::implicit_clone,
    clippy::items_after_statements,
    clippy::map_unwrap_or,
    clippy::manual_let_else,
    clippy::missing_errors_doc,
    clippy::missing_panics_doc,
    clippy::module_name_repetitions,
    clippy::needless_pass_by_value,
    clippy::needless_raw_string_hashes,
    clippy::redundant_closure_for_method_calls,
    clippy::similar_names,
    clippy::single_match_else,
    clippy::struct_field_names,
    clippy::too_many_lines,
    clippy::uninlined_format_args,
    clippy::unused_self,
    clippy::cast_precision_loss,
    clippy::unnecessary_cast,
    clippy::unnecessary_lazy_evaluations,
    clippy::unnecessary_literal_bound,
    clippy::unnecessary_map_or,
    clippy::unnecessary_wraps
)]

use anyhow::{bail, Result};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use toolsmith::config::Config;
use toolsmith::{agent, providers, tools};
use tracing_subscriber::{fmt, EnvFilter};

fn parse_temperature(s: &str) -> std::result::Result<f64, String> {
    let t: f64 = s.parse().map_err(|e| format!("{e}"))?;
    if !(0.0..=2.0).contains(&t) {
        return Err("temperature must be between 0.0 and 2.0".to_string());
    }
    Ok(t)
}

/// `toolsmith` - a chat agent that works on your project with real tools.
#[derive(Parser, Debug)]
#[command(name = "toolsmith")]
#[command(version)]
#[command(about = "An engineering assistant with file, code and search tools.", long_about = None)]
struct Cli {
    /// Directory holding config.toml (default: ~/.toolsmith)
    #[arg(long, global = true)]
    config_dir: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Start the agent
    #[command(long_about = "\
Start the agent.

Launches an interactive chat session with the configured provider. \
Use --message for a single turn without entering interactive mode.

Inside the session:
  exit | quit     leave
  reset           clear history and file context
  refresh         rescan for tools and show new ones
  tools           list loaded and unavailable tools
  automode [N]    work autonomously for up to N iterations

Examples:
  toolsmith agent
  toolsmith agent -m \"Create a hello world script in demo/\"
  toolsmith agent --provider ollama --model llama3.1")]
    Agent {
        /// Single message mode (don't enter interactive mode)
        #[arg(short, long)]
        message: Option<String>,

        /// Provider to use (openai, ollama, custom:<url>)
        #[arg(short, long)]
        provider: Option<String>,

        /// Model to use
        #[arg(long)]
        model: Option<String>,

        /// Temperature (0.0 - 2.0)
        #[arg(short, long, value_parser = parse_temperature)]
        temperature: Option<f64>,
    },

    /// List tools and why any failed to load
    Tools,

    /// List supported AI providers
    Providers,

    /// Show effective configuration
    Status,

    /// Manage configuration
    #[command(long_about = "\
Manage toolsmith configuration.

Examples:
  toolsmith config schema              # print JSON Schema to stdout
  toolsmith config schema > schema.json")]
    Config {
        #[command(subcommand)]
        config_command: ConfigCommands,
    },
}

#[derive(Subcommand, Debug)]
enum ConfigCommands {
    /// Dump the full configuration JSON Schema to stdout
    Schema,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    if let Some(dir) = &cli.config_dir {
        if dir.as_os_str().is_empty() {
            bail!("--config-dir cannot be empty");
        }
    }

    // Chat output and log lines share the terminal, so the agent stays quiet
    // unless RUST_LOG asks otherwise.
    let default_level = match cli.command {
        Commands::Agent { .. } => "warn",
        _ => "info",
    };
    let subscriber = fmt::Subscriber::builder()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level)),
        )
        .with_writer(std::io::stderr)
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;

    if let Commands::Config {
        config_command: ConfigCommands::Schema,
    } = cli.command
    {
        let schema = schemars::schema_for!(Config);
        println!("{}", serde_json::to_string_pretty(&schema)?);
        return Ok(());
    }

    let config = Config::load_or_init(cli.config_dir.as_deref()).await?;

    match cli.command {
        Commands::Config { .. } => Ok(()),

        Commands::Agent {
            message,
            provider,
            model,
            temperature,
        } => agent::run(config, message, provider, model, temperature).await,

        Commands::Tools => {
            let workspace = config.workspace_dir();
            let env = tools::ToolEnv::new(std::sync::Arc::new(config), None);
            let mut registry = tools::default_registry();
            registry.discover(&env, None).await;
            println!("Tools ({} loaded):\n", registry.len());
            for spec in registry.specs() {
                println!("  {:<24} {}", spec.name, spec.description);
            }
            if !registry.failures().is_empty() {
                println!("\nUnavailable:");
                for failure in registry.failures() {
                    println!("  {:<24} {}", failure.name, failure.reason);
                }
            }
            println!("\nWorkspace: {}", workspace.display());
            Ok(())
        }

        Commands::Providers => {
            let current = config.default_provider.trim().to_ascii_lowercase();
            let providers = providers::list_providers();
            println!("Supported providers ({} total):\n", providers.len());
            println!("  ID (use in config)  DESCRIPTION");
            for p in &providers {
                let marker = if p.name.eq_ignore_ascii_case(&current) {
                    " (active)"
                } else {
                    ""
                };
                let local_tag = if p.local { " [local]" } else { "" };
                let tools_tag = if p.native_tools {
                    " [native tools]"
                } else {
                    " [tool markers]"
                };
                println!(
                    "  {:<19} {}{}{}{}",
                    p.name, p.display_name, local_tag, tools_tag, marker
                );
            }
            println!("\n  custom:<URL>        Any OpenAI-compatible endpoint");
            Ok(())
        }

        Commands::Status => {
            println!("toolsmith status");
            println!();
            println!("Version:      {}", env!("CARGO_PKG_VERSION"));
            println!("Workspace:    {}", config.workspace_dir().display());
            println!("Config:       {}", config.config_path.display());
            println!();
            println!("Provider:     {}", config.default_provider);
            println!("   Model:     {}", config.default_model);
            println!(
                "   Editor:    {}",
                config
                    .agent
                    .editor_model
                    .as_deref()
                    .unwrap_or(&config.default_model)
            );
            println!("   API key:   {}", if config.api_key.is_some() { "set" } else { "not set" });
            println!();
            println!(
                "Interpreter:  {}",
                config
                    .execution
                    .interpreter_path(&config.workspace_dir())
                    .display()
            );
            println!("   Timeout:   {}s", config.execution.timeout_secs);
            println!(
                "Search key:   {}",
                if config.search.api_key.is_some() { "set" } else { "not set" }
            );
            println!(
                "Budget:       {} tokens, automode up to {} iterations",
                config.agent.max_conversation_tokens, config.agent.max_automode_iterations
            );
            if !config.tools.disabled.is_empty() {
                println!("Disabled:     {}", config.tools.disabled.join(", "));
            }
            Ok(())
        }
    }
}
