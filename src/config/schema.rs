use anyhow::{Context, Result};
use directories::UserDirs;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tokio::fs::{self, OpenOptions};
use tokio::io::AsyncWriteExt;

// ── Top-level config ──────────────────────────────────────────────

/// Top-level toolsmith configuration, loaded from `config.toml`.
///
/// Resolution order: `--config-dir` → `TOOLSMITH_CONFIG_DIR` env →
/// `~/.toolsmith/config.toml`.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct Config {
    /// Path to config.toml - computed at load time, not serialized
    #[serde(skip)]
    pub config_path: PathBuf,
    /// API key for the selected provider. Overridden by `TOOLSMITH_API_KEY` or `OPENAI_API_KEY`.
    #[serde(default)]
    pub api_key: Option<String>,
    /// Base URL override for the provider API (e.g. `"http://10.0.0.1:11434/v1"` for remote Ollama).
    #[serde(default)]
    pub api_url: Option<String>,
    /// Provider key: `"openai"`, `"ollama"` or `"custom:<url>"`. Default: `"openai"`.
    #[serde(default = "default_provider")]
    pub default_provider: String,
    /// Model used for the main conversation. Default: `"gpt-4.1"`.
    #[serde(default = "default_model")]
    pub default_model: String,
    /// Sampling temperature (0.0–2.0). Default: `0.7`.
    #[serde(default = "default_temperature")]
    pub default_temperature: f64,

    /// Dialogue loop settings (`[agent]`).
    #[serde(default)]
    pub agent: AgentConfig,

    /// Code execution sandbox (`[execution]`).
    #[serde(default)]
    pub execution: ExecutionConfig,

    /// Web search backend (`[search]`).
    #[serde(default)]
    pub search: SearchConfig,

    /// Tool discovery (`[tools]`).
    #[serde(default)]
    pub tools: ToolsConfig,
}

fn default_provider() -> String {
    "openai".into()
}

fn default_model() -> String {
    "gpt-4.1".into()
}

fn default_temperature() -> f64 {
    0.7
}

fn default_true() -> bool {
    true
}

/// Dialogue loop configuration (`[agent]` section).
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct AgentConfig {
    /// Model for the code-editor role used by `edit_and_apply`. Falls back to `default_model`.
    #[serde(default)]
    pub editor_model: Option<String>,
    /// Propose/apply rounds per `edit_and_apply` call. Default: `3`.
    #[serde(default = "default_max_edit_attempts")]
    pub max_edit_attempts: usize,
    /// Turns run by `automode` when no count is given. Default: `25`.
    #[serde(default = "default_max_automode_iterations")]
    pub max_automode_iterations: usize,
    /// Token estimate above which the oldest turns are dropped. Default: `200000`.
    #[serde(default = "default_max_conversation_tokens")]
    pub max_conversation_tokens: u64,
    /// Phrase that ends automode when it appears in an answer. Default: `"AUTOMODE_COMPLETE"`.
    #[serde(default = "default_completion_sentinel")]
    pub completion_sentinel: String,
    /// Print each tool call and its result. Default: `true`.
    #[serde(default = "default_true")]
    pub show_tool_usage: bool,
}

fn default_max_edit_attempts() -> usize {
    3
}

fn default_max_automode_iterations() -> usize {
    25
}

fn default_max_conversation_tokens() -> u64 {
    200_000
}

fn default_completion_sentinel() -> String {
    "AUTOMODE_COMPLETE".into()
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            editor_model: None,
            max_edit_attempts: default_max_edit_attempts(),
            max_automode_iterations: default_max_automode_iterations(),
            max_conversation_tokens: default_max_conversation_tokens(),
            completion_sentinel: default_completion_sentinel(),
            show_tool_usage: true,
        }
    }
}

/// Code execution configuration (`[execution]` section).
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct ExecutionConfig {
    /// Python interpreter for `execute_code`. Default: the `code_execution_env`
    /// virtualenv inside the workspace.
    #[serde(default)]
    pub interpreter: Option<PathBuf>,
    /// Wall-clock ceiling for foreground runs, in seconds. Default: `30`.
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    /// Grace period between terminate and kill when stopping a background run. Default: `5`.
    #[serde(default = "default_stop_grace_secs")]
    pub stop_grace_secs: u64,
    /// Directory tools resolve relative paths against. Default: the current directory.
    #[serde(default)]
    pub working_dir: Option<PathBuf>,
}

fn default_timeout_secs() -> u64 {
    30
}

fn default_stop_grace_secs() -> u64 {
    5
}

impl Default for ExecutionConfig {
    fn default() -> Self {
        Self {
            interpreter: None,
            timeout_secs: default_timeout_secs(),
            stop_grace_secs: default_stop_grace_secs(),
            working_dir: None,
        }
    }
}

impl ExecutionConfig {
    /// Configured interpreter, or the venv interpreter under `workspace_dir`.
    pub fn interpreter_path(&self, workspace_dir: &Path) -> PathBuf {
        if let Some(path) = &self.interpreter {
            return crate::util::expand_path(&path.to_string_lossy());
        }
        let venv = workspace_dir.join("code_execution_env");
        if cfg!(windows) {
            venv.join("Scripts").join("python.exe")
        } else {
            venv.join("bin").join("python")
        }
    }
}

/// Web search configuration (`[search]` section).
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct SearchConfig {
    /// Tavily API key. Overridden by `TAVILY_API_KEY`.
    #[serde(default)]
    pub api_key: Option<String>,
    /// Tavily endpoint. Default: `"https://api.tavily.com"`.
    #[serde(default = "default_search_api_url")]
    pub api_url: String,
    /// Results per query. Default: `5`.
    #[serde(default = "default_search_max_results")]
    pub max_results: usize,
}

fn default_search_api_url() -> String {
    "https://api.tavily.com".into()
}

fn default_search_max_results() -> usize {
    5
}

impl Default for SearchConfig {
    fn default() -> Self {
        Self {
            api_key: None,
            api_url: default_search_api_url(),
            max_results: default_search_max_results(),
        }
    }
}

/// Tool discovery configuration (`[tools]` section).
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct ToolsConfig {
    /// Tool names skipped during discovery.
    #[serde(default)]
    pub disabled: Vec<String>,
    /// Ask before installing a missing tool dependency. Default: `true`.
    #[serde(default = "default_true")]
    pub prompt_install: bool,
}

impl Default for ToolsConfig {
    fn default() -> Self {
        Self {
            disabled: Vec::new(),
            prompt_install: true,
        }
    }
}

impl ToolsConfig {
    pub fn is_disabled(&self, name: &str) -> bool {
        self.disabled.iter().any(|d| d.trim() == name)
    }
}

// ── Config impl ──────────────────────────────────────────────────

impl Default for Config {
    fn default() -> Self {
        let config_dir = default_config_dir().unwrap_or_else(|_| PathBuf::from(".toolsmith"));

        Self {
            config_path: config_dir.join("config.toml"),
            api_key: None,
            api_url: None,
            default_provider: default_provider(),
            default_model: default_model(),
            default_temperature: default_temperature(),
            agent: AgentConfig::default(),
            execution: ExecutionConfig::default(),
            search: SearchConfig::default(),
            tools: ToolsConfig::default(),
        }
    }
}

fn default_config_dir() -> Result<PathBuf> {
    let home = UserDirs::new()
        .map(|u| u.home_dir().to_path_buf())
        .context("Could not find home directory")?;
    Ok(home.join(".toolsmith"))
}

/// `--config-dir` wins, then `TOOLSMITH_CONFIG_DIR`, then `~/.toolsmith`.
fn resolve_config_dir(explicit: Option<&Path>) -> Result<PathBuf> {
    if let Some(dir) = explicit {
        return Ok(dir.to_path_buf());
    }
    if let Ok(custom) = std::env::var("TOOLSMITH_CONFIG_DIR") {
        let custom = custom.trim();
        if !custom.is_empty() {
            return Ok(crate::util::expand_path(custom));
        }
    }
    default_config_dir()
}

fn env_nonempty(name: &str) -> Option<String> {
    std::env::var(name)
        .ok()
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

impl Config {
    /// Load `config.toml`, writing a default one on first run.
    pub async fn load_or_init(config_dir: Option<&Path>) -> Result<Self> {
        let config_dir = resolve_config_dir(config_dir)?;
        let config_path = config_dir.join("config.toml");

        fs::create_dir_all(&config_dir).await.with_context(|| {
            format!(
                "Failed to create config directory: {}",
                config_dir.display()
            )
        })?;

        let initialized = !config_path.exists();
        let mut config = if initialized {
            let config = Config {
                config_path: config_path.clone(),
                ..Config::default()
            };
            config.save().await?;

            // The file may later hold API keys.
            #[cfg(unix)]
            {
                use std::{fs::Permissions, os::unix::fs::PermissionsExt};
                let _ = fs::set_permissions(&config_path, Permissions::from_mode(0o600)).await;
            }
            config
        } else {
            #[cfg(unix)]
            {
                use std::os::unix::fs::PermissionsExt;
                if let Ok(meta) = fs::metadata(&config_path).await {
                    if meta.permissions().mode() & 0o004 != 0 {
                        tracing::warn!(
                            "Config file {:?} is world-readable (mode {:o}). \
                             Consider restricting with: chmod 600 {:?}",
                            config_path,
                            meta.permissions().mode() & 0o777,
                            config_path,
                        );
                    }
                }
            }

            let contents = fs::read_to_string(&config_path)
                .await
                .context("Failed to read config file")?;
            let mut config: Config =
                toml::from_str(&contents).context("Failed to parse config file")?;
            config.config_path = config_path;
            config
        };

        config.apply_env_overrides();
        config.validate()?;
        tracing::info!(
            path = %config.config_path.display(),
            provider = %config.default_provider,
            model = %config.default_model,
            initialized,
            "Config loaded"
        );
        Ok(config)
    }

    /// Directory tools operate in: `[execution] working_dir`, else the
    /// current directory.
    pub fn workspace_dir(&self) -> PathBuf {
        match &self.execution.working_dir {
            Some(dir) => crate::util::expand_path(&dir.to_string_lossy()),
            None => std::env::current_dir().unwrap_or_else(|_| PathBuf::from(".")),
        }
    }

    /// Validate configuration values that would cause runtime failures.
    pub fn validate(&self) -> Result<()> {
        if self.default_model.trim().is_empty() {
            anyhow::bail!("default_model must not be empty");
        }
        if !(0.0..=2.0).contains(&self.default_temperature) {
            anyhow::bail!(
                "default_temperature must be within 0.0..=2.0 (got {})",
                self.default_temperature
            );
        }
        if self.execution.timeout_secs == 0 {
            anyhow::bail!("execution.timeout_secs must be greater than 0");
        }
        if self.agent.max_edit_attempts == 0 {
            anyhow::bail!("agent.max_edit_attempts must be greater than 0");
        }
        if self.agent.max_automode_iterations == 0 {
            anyhow::bail!("agent.max_automode_iterations must be greater than 0");
        }
        if self.agent.completion_sentinel.trim().is_empty() {
            anyhow::bail!("agent.completion_sentinel must not be empty");
        }
        if self.search.max_results == 0 {
            anyhow::bail!("search.max_results must be greater than 0");
        }
        Ok(())
    }

    /// Apply environment variable overrides to config
    pub fn apply_env_overrides(&mut self) {
        // API key: TOOLSMITH_API_KEY, then OPENAI_API_KEY
        if let Some(key) = env_nonempty("TOOLSMITH_API_KEY").or_else(|| env_nonempty("OPENAI_API_KEY")) {
            self.api_key = Some(key);
        }

        if let Some(provider) = env_nonempty("TOOLSMITH_PROVIDER") {
            self.default_provider = provider;
        }

        // Model: TOOLSMITH_MODEL or MODEL
        if let Some(model) = env_nonempty("TOOLSMITH_MODEL").or_else(|| env_nonempty("MODEL")) {
            self.default_model = model;
        }

        // Base URL: TOOLSMITH_API_URL, or OLLAMA_BASE_URL when running against Ollama
        if let Some(url) = env_nonempty("TOOLSMITH_API_URL") {
            self.api_url = Some(url);
        } else if self.default_provider == "ollama" {
            if let Some(url) = env_nonempty("OLLAMA_BASE_URL") {
                self.api_url = Some(url);
            }
        }

        if let Some(temp_str) = env_nonempty("TOOLSMITH_TEMPERATURE") {
            match temp_str.parse::<f64>() {
                Ok(temp) if (0.0..=2.0).contains(&temp) => self.default_temperature = temp,
                _ => tracing::warn!(value = %temp_str, "Ignoring invalid TOOLSMITH_TEMPERATURE"),
            }
        }

        if let Some(key) = env_nonempty("TAVILY_API_KEY") {
            self.search.api_key = Some(key);
        }
    }

    /// Write the config atomically: temp file, fsync, rename.
    pub async fn save(&self) -> Result<()> {
        let toml_str = toml::to_string_pretty(self).context("Failed to serialize config")?;

        let parent_dir = self
            .config_path
            .parent()
            .context("Config path must have a parent directory")?;

        fs::create_dir_all(parent_dir).await.with_context(|| {
            format!(
                "Failed to create config directory: {}",
                parent_dir.display()
            )
        })?;

        let file_name = self
            .config_path
            .file_name()
            .and_then(|v| v.to_str())
            .unwrap_or("config.toml");
        let temp_path = parent_dir.join(format!(".{file_name}.tmp-{}", uuid::Uuid::new_v4()));

        let mut temp_file = OpenOptions::new()
            .create_new(true)
            .write(true)
            .open(&temp_path)
            .await
            .with_context(|| {
                format!(
                    "Failed to create temporary config file: {}",
                    temp_path.display()
                )
            })?;
        temp_file
            .write_all(toml_str.as_bytes())
            .await
            .context("Failed to write temporary config contents")?;
        temp_file
            .sync_all()
            .await
            .context("Failed to fsync temporary config file")?;
        drop(temp_file);

        if let Err(e) = fs::rename(&temp_path, &self.config_path).await {
            let _ = fs::remove_file(&temp_path).await;
            anyhow::bail!("Failed to atomically replace config file: {e}");
        }
        Ok(())
    }
}
