//! Tool discovery.
//!
//! Tools are registered at startup as named factories. [`ToolRegistry::discover`]
//! instantiates every factory, tolerating individual failures, and
//! [`ToolRegistry::refresh`] repeats the scan to pick up tools whose
//! dependencies have since appeared.

use super::traits::{Tool, ToolSpec};
use crate::config::Config;
use crate::providers::Provider;
use async_trait::async_trait;
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use thiserror::Error;

/// Shared handles a factory may capture when building its tool.
#[derive(Clone)]
pub struct ToolEnv {
    pub config: Arc<Config>,
    /// Model used by tools that call back into an LLM (the edit flow).
    pub provider: Option<Arc<dyn Provider>>,
    pub http: reqwest::Client,
}

impl ToolEnv {
    pub fn new(config: Arc<Config>, provider: Option<Arc<dyn Provider>>) -> Self {
        Self {
            config,
            provider,
            http: reqwest::Client::builder()
                .timeout(std::time::Duration::from_secs(60))
                .build()
                .unwrap_or_else(|_| reqwest::Client::new()),
        }
    }
}

/// A runtime prerequisite a tool could not find.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Dependency {
    /// Python interpreter of the code execution environment.
    Interpreter(PathBuf),
    /// An API credential, named by its config key.
    Credential(String),
    /// A chat model for tools that delegate to one.
    Model,
}

impl fmt::Display for Dependency {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Interpreter(path) => write!(f, "interpreter {}", path.display()),
            Self::Credential(key) => write!(f, "credential {key}"),
            Self::Model => f.write_str("chat model"),
        }
    }
}

#[derive(Debug, Error)]
pub enum LoadError {
    #[error("missing dependency: {0}")]
    MissingDependency(Dependency),
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

pub type ToolFactory = Box<dyn Fn(&ToolEnv) -> Result<Box<dyn Tool>, LoadError> + Send + Sync>;

struct Registration {
    name: String,
    factory: ToolFactory,
}

/// A registration that produced no tool during the last discovery.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoadFailure {
    pub name: String,
    pub reason: String,
}

/// Offered a chance to satisfy a missing dependency before discovery gives up
/// on a tool.
#[async_trait]
pub trait DependencyInstaller: Send + Sync {
    /// Returns `Ok(true)` when the dependency should now be available.
    async fn install(&self, tool: &str, dependency: &Dependency) -> anyhow::Result<bool>;
}

#[derive(Default)]
pub struct ToolRegistry {
    registrations: Vec<Registration>,
    tools: Vec<Box<dyn Tool>>,
    failures: Vec<LoadFailure>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a factory. Registration order is load order.
    pub fn register<F>(&mut self, name: impl Into<String>, factory: F)
    where
        F: Fn(&ToolEnv) -> Result<Box<dyn Tool>, LoadError> + Send + Sync + 'static,
    {
        self.registrations.push(Registration {
            name: name.into(),
            factory: Box::new(factory),
        });
    }

    /// Instantiate every registered tool and return the resulting catalogue.
    ///
    /// A factory reporting a missing dependency is offered to `installer`
    /// (when given) and retried exactly once if the install succeeds. Any
    /// other failure is recorded and discovery moves on. Tools named in
    /// `[tools] disabled` are skipped. When two tools share a name the one
    /// loaded last replaces the earlier one.
    pub async fn discover(
        &mut self,
        env: &ToolEnv,
        installer: Option<&dyn DependencyInstaller>,
    ) -> Vec<ToolSpec> {
        let mut tools: Vec<Box<dyn Tool>> = Vec::with_capacity(self.registrations.len());
        let mut failures = Vec::new();

        for registration in &self.registrations {
            if env.config.tools.is_disabled(&registration.name) {
                tracing::debug!(tool = %registration.name, "tool disabled in config");
                continue;
            }

            match load_one(registration, env, installer).await {
                Ok(tool) => {
                    tools.retain(|existing| existing.name() != tool.name());
                    tools.push(tool);
                }
                Err(err) => {
                    tracing::warn!(tool = %registration.name, error = %err, "tool failed to load");
                    failures.push(LoadFailure {
                        name: registration.name.clone(),
                        reason: err.to_string(),
                    });
                }
            }
        }

        tracing::info!(
            loaded = tools.len(),
            failed = failures.len(),
            "tool discovery finished"
        );
        self.tools = tools;
        self.failures = failures;
        self.specs()
    }

    /// Re-run discovery and return the names that were not available before,
    /// sorted.
    pub async fn refresh(
        &mut self,
        env: &ToolEnv,
        installer: Option<&dyn DependencyInstaller>,
    ) -> Vec<String> {
        let before: std::collections::BTreeSet<String> =
            self.names().into_iter().map(str::to_string).collect();
        self.discover(env, installer).await;
        let mut added: Vec<String> = self
            .names()
            .into_iter()
            .filter(|name| !before.contains(*name))
            .map(str::to_string)
            .collect();
        added.sort();
        added
    }

    pub fn get(&self, name: &str) -> Option<&dyn Tool> {
        self.tools
            .iter()
            .find(|tool| tool.name() == name)
            .map(|tool| tool.as_ref())
    }

    pub fn specs(&self) -> Vec<ToolSpec> {
        self.tools.iter().map(|tool| tool.spec()).collect()
    }

    pub fn names(&self) -> Vec<&str> {
        self.tools.iter().map(|tool| tool.name()).collect()
    }

    pub fn failures(&self) -> &[LoadFailure] {
        &self.failures
    }

    pub fn len(&self) -> usize {
        self.tools.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }
}

async fn load_one(
    registration: &Registration,
    env: &ToolEnv,
    installer: Option<&dyn DependencyInstaller>,
) -> Result<Box<dyn Tool>, LoadError> {
    let dependency = match (registration.factory)(env) {
        Ok(tool) => return Ok(tool),
        Err(LoadError::MissingDependency(dependency)) => dependency,
        Err(other) => return Err(other),
    };

    tracing::warn!(tool = %registration.name, %dependency, "tool dependency missing");
    let Some(installer) = installer else {
        return Err(LoadError::MissingDependency(dependency));
    };

    match installer.install(&registration.name, &dependency).await {
        Ok(true) => (registration.factory)(env),
        Ok(false) => Err(LoadError::MissingDependency(dependency)),
        Err(e) => Err(LoadError::Other(
            e.context(format!("installing {dependency} failed")),
        )),
    }
}

/// Installs the code execution environment by creating a Python virtualenv,
/// asking first when `prompt` is set. Other dependencies cannot be installed.
pub struct VenvInstaller {
    pub prompt: bool,
    pub python: String,
}

impl Default for VenvInstaller {
    fn default() -> Self {
        Self {
            prompt: true,
            python: "python3".to_string(),
        }
    }
}

/// `<venv>/bin/python` → `<venv>`.
fn venv_root(interpreter: &Path) -> Option<&Path> {
    interpreter.parent()?.parent()
}

#[async_trait]
impl DependencyInstaller for VenvInstaller {
    async fn install(&self, tool: &str, dependency: &Dependency) -> anyhow::Result<bool> {
        let Dependency::Interpreter(interpreter) = dependency else {
            return Ok(false);
        };
        let Some(root) = venv_root(interpreter).map(Path::to_path_buf) else {
            return Ok(false);
        };

        if self.prompt {
            let question = format!(
                "Tool '{tool}' needs a Python environment. Create one at {}?",
                root.display()
            );
            let approved = tokio::task::spawn_blocking(move || {
                dialoguer::Confirm::new()
                    .with_prompt(question)
                    .default(true)
                    .interact()
                    .unwrap_or(false)
            })
            .await?;
            if !approved {
                return Ok(false);
            }
        }

        tracing::info!(venv = %root.display(), "creating code execution environment");
        let status = tokio::process::Command::new(&self.python)
            .arg("-m")
            .arg("venv")
            .arg(&root)
            .status()
            .await?;
        if !status.success() {
            anyhow::bail!("{} -m venv exited with {status}", self.python);
        }
        Ok(interpreter.exists())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tools::context::ToolContext;
    use crate::tools::traits::ToolResult;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

    struct NamedTool {
        name: String,
        tag: &'static str,
    }

    #[async_trait]
    impl Tool for NamedTool {
        fn name(&self) -> &str {
            &self.name
        }

        fn description(&self) -> &str {
            self.tag
        }

        fn parameters_schema(&self) -> serde_json::Value {
            serde_json::json!({"type": "object", "properties": {}})
        }

        async fn execute(
            &self,
            _args: serde_json::Value,
            _ctx: &mut ToolContext,
        ) -> anyhow::Result<ToolResult> {
            Ok(ToolResult::ok(self.tag))
        }
    }

    fn named(name: &str, tag: &'static str) -> Box<dyn Tool> {
        Box::new(NamedTool {
            name: name.to_string(),
            tag,
        })
    }

    fn env() -> ToolEnv {
        ToolEnv::new(Arc::new(Config::default()), None)
    }

    struct FlagInstaller {
        calls: AtomicUsize,
        grant: bool,
        ready: Arc<AtomicBool>,
    }

    #[async_trait]
    impl DependencyInstaller for FlagInstaller {
        async fn install(&self, _tool: &str, _dep: &Dependency) -> anyhow::Result<bool> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if self.grant {
                self.ready.store(true, Ordering::SeqCst);
            }
            Ok(self.grant)
        }
    }

    #[tokio::test]
    async fn failing_tool_does_not_stop_discovery() {
        let mut registry = ToolRegistry::new();
        registry.register("alpha", |_| Ok(named("alpha", "a")));
        registry.register("broken", |_| {
            Err(LoadError::Other(anyhow::anyhow!("import failed")))
        });
        registry.register("gamma", |_| Ok(named("gamma", "g")));

        let specs = registry.discover(&env(), None).await;
        let names: Vec<_> = specs.iter().map(|s| s.name.as_str()).collect();
        assert_eq!(names, vec!["alpha", "gamma"]);
        assert_eq!(registry.failures().len(), 1);
        assert_eq!(registry.failures()[0].name, "broken");
        assert!(registry.get("broken").is_none());
    }

    #[tokio::test]
    async fn missing_dependency_without_installer_is_not_retried() {
        let attempts = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&attempts);
        let mut registry = ToolRegistry::new();
        registry.register("needs_key", move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
            Err(LoadError::MissingDependency(Dependency::Credential(
                "search.api_key".into(),
            )))
        });

        registry.discover(&env(), None).await;
        assert_eq!(attempts.load(Ordering::SeqCst), 1);
        assert!(registry.is_empty());
        assert!(registry.failures()[0].reason.contains("search.api_key"));
    }

    #[tokio::test]
    async fn successful_install_retries_once() {
        let ready = Arc::new(AtomicBool::new(false));
        let attempts = Arc::new(AtomicUsize::new(0));
        let (flag, counter) = (Arc::clone(&ready), Arc::clone(&attempts));

        let mut registry = ToolRegistry::new();
        registry.register("execute_code", move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
            if flag.load(Ordering::SeqCst) {
                Ok(named("execute_code", "run"))
            } else {
                Err(LoadError::MissingDependency(Dependency::Interpreter(
                    "/venv/bin/python".into(),
                )))
            }
        });

        let installer = FlagInstaller {
            calls: AtomicUsize::new(0),
            grant: true,
            ready: Arc::clone(&ready),
        };
        registry.discover(&env(), Some(&installer)).await;
        assert_eq!(installer.calls.load(Ordering::SeqCst), 1);
        assert_eq!(attempts.load(Ordering::SeqCst), 2);
        assert_eq!(registry.names(), vec!["execute_code"]);
    }

    #[tokio::test]
    async fn declined_install_records_failure() {
        let mut registry = ToolRegistry::new();
        registry.register("execute_code", |_| {
            Err(LoadError::MissingDependency(Dependency::Interpreter(
                "/venv/bin/python".into(),
            )))
        });
        let installer = FlagInstaller {
            calls: AtomicUsize::new(0),
            grant: false,
            ready: Arc::new(AtomicBool::new(false)),
        };
        registry.discover(&env(), Some(&installer)).await;
        assert!(registry.is_empty());
        assert_eq!(registry.failures()[0].name, "execute_code");
    }

    #[tokio::test]
    async fn last_loaded_wins_on_name_collision() {
        let mut registry = ToolRegistry::new();
        registry.register("first", |_| Ok(named("dup", "first")));
        registry.register("second", |_| Ok(named("dup", "second")));
        registry.discover(&env(), None).await;
        assert_eq!(registry.len(), 1);
        assert_eq!(registry.get("dup").unwrap().description(), "second");
    }

    #[tokio::test]
    async fn disabled_tools_are_skipped() {
        let mut config = Config::default();
        config.tools.disabled = vec!["alpha".into()];
        let env = ToolEnv::new(Arc::new(config), None);
        let mut registry = ToolRegistry::new();
        registry.register("alpha", |_| Ok(named("alpha", "a")));
        registry.register("beta", |_| Ok(named("beta", "b")));
        registry.discover(&env, None).await;
        assert_eq!(registry.names(), vec!["beta"]);
        assert!(registry.failures().is_empty());
    }

    #[tokio::test]
    async fn refresh_reports_newly_available_tools() {
        let ready = Arc::new(AtomicBool::new(false));
        let flag = Arc::clone(&ready);
        let mut registry = ToolRegistry::new();
        registry.register("alpha", |_| Ok(named("alpha", "a")));
        registry.register("late", move |_| {
            if flag.load(Ordering::SeqCst) {
                Ok(named("late", "l"))
            } else {
                Err(LoadError::MissingDependency(Dependency::Model))
            }
        });

        let env = env();
        registry.discover(&env, None).await;
        assert_eq!(registry.names(), vec!["alpha"]);

        ready.store(true, Ordering::SeqCst);
        let added = registry.refresh(&env, None).await;
        assert_eq!(added, vec!["late".to_string()]);
        assert!(registry.failures().is_empty());

        assert!(registry.refresh(&env, None).await.is_empty());
    }

    #[test]
    fn venv_root_strips_bin_python() {
        assert_eq!(
            venv_root(Path::new("/p/code_execution_env/bin/python")),
            Some(Path::new("/p/code_execution_env"))
        );
    }

    #[tokio::test]
    async fn venv_installer_ignores_credentials() {
        let installer = VenvInstaller {
            prompt: false,
            python: "python3".into(),
        };
        let installed = installer
            .install("tavily_search", &Dependency::Credential("search.api_key".into()))
            .await
            .unwrap();
        assert!(!installed);
    }
}
