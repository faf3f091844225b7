use super::conversation::Conversation;
use crate::config::Config;
use crate::tools::ToolContext;
use std::path::PathBuf;
use std::time::Duration;

/// Everything one interactive session owns: the turn log and the state tools
/// work against. Independent sessions share nothing.
pub struct Session {
    pub conversation: Conversation,
    pub tools: ToolContext,
}

impl Session {
    pub fn new(workspace_dir: impl Into<PathBuf>, budget: u64, stop_grace: Duration) -> Self {
        Self {
            conversation: Conversation::new(budget),
            tools: ToolContext::new(workspace_dir, stop_grace),
        }
    }

    pub fn from_config(config: &Config) -> Self {
        Self::new(
            config.workspace_dir(),
            config.agent.max_conversation_tokens,
            Duration::from_secs(config.execution.stop_grace_secs),
        )
    }

    /// Clear history, token usage, cached files and editor memory.
    /// Background processes keep running.
    pub fn reset(&mut self) {
        self.conversation.clear();
        self.tools.clear();
    }

    /// Stop every background process this session started.
    pub async fn shutdown(&mut self) {
        self.tools.processes.stop_all().await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reset_clears_history_and_context() {
        let mut session = Session::new("/work", 1000, Duration::from_secs(1));
        session.conversation.push_user("hi");
        session.conversation.push_assistant("hello");
        session.tools.remember_file("a.txt", "x");
        session.tools.editor_memory.push("proposal".into());

        session.reset();
        assert!(session.conversation.is_empty());
        assert_eq!(session.conversation.tokens_used(), 0);
        assert!(session.tools.files.is_empty());
        assert!(session.tools.editor_memory.is_empty());
    }

    #[test]
    fn shutdown_without_processes_is_a_noop() {
        let mut session = Session::new("/work", 10, Duration::from_secs(1));
        tokio_test::block_on(session.shutdown());
        assert!(session.tools.processes.is_empty());
    }

    #[test]
    fn from_config_uses_budget_and_workspace() {
        let mut config = Config::default();
        config.agent.max_conversation_tokens = 1234;
        config.execution.working_dir = Some("/srv/app".into());
        let session = Session::from_config(&config);
        assert_eq!(session.conversation.budget(), 1234);
        assert_eq!(session.tools.workspace(), std::path::Path::new("/srv/app"));
    }
}
