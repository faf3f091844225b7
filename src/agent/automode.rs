//! Autonomous multi-turn loop.

use super::driver::{Driver, TurnReply};
use super::prompt::AutomodeProgress;
use super::session::Session;
use std::sync::atomic::{AtomicBool, Ordering};

pub const INTERRUPTED_REPLY: &str = "Automode interrupted. How can I assist you further?";

/// Input sent after every turn that did not finish the goal.
pub fn continuation_prompt(sentinel: &str) -> String {
    format!(
        "Continue with the next step. Or STOP by saying '{sentinel}' if you think you've \
         achieved the results established in the original request."
    )
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AutomodeStop {
    /// The model replied with the completion sentinel.
    Completed,
    MaxIterations,
    /// The stop flag was raised between turns.
    Interrupted,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AutomodeReport {
    pub iterations: usize,
    pub stop: AutomodeStop,
    pub last_reply: Option<TurnReply>,
}

/// Run up to `max_iterations` turns toward `goal`.
///
/// `stop` is checked before each turn; a turn already in flight always
/// finishes. `on_turn` sees each reply as it arrives. A transport error ends
/// the loop and is returned.
pub async fn run_automode<F>(
    driver: &Driver,
    session: &mut Session,
    goal: &str,
    max_iterations: usize,
    stop: &AtomicBool,
    mut on_turn: F,
) -> anyhow::Result<AutomodeReport>
where
    F: FnMut(usize, &TurnReply),
{
    let max_iterations = max_iterations.max(1);
    let continuation = continuation_prompt(driver.completion_sentinel());
    let mut input = goal.to_string();
    let mut last_reply = None;

    for iteration in 1..=max_iterations {
        if stop.load(Ordering::SeqCst) {
            return Ok(interrupted(session, iteration - 1, last_reply));
        }

        tracing::info!(iteration, max_iterations, "automode turn");
        let progress = AutomodeProgress {
            iteration,
            max_iterations,
        };
        let reply = driver.run_turn(session, &input, Some(progress)).await?;
        on_turn(iteration, &reply);

        if reply.completed {
            return Ok(AutomodeReport {
                iterations: iteration,
                stop: AutomodeStop::Completed,
                last_reply: Some(reply),
            });
        }
        last_reply = Some(reply);
        input.clone_from(&continuation);
    }

    if stop.load(Ordering::SeqCst) {
        return Ok(interrupted(session, max_iterations, last_reply));
    }
    Ok(AutomodeReport {
        iterations: max_iterations,
        stop: AutomodeStop::MaxIterations,
        last_reply,
    })
}

fn interrupted(
    session: &mut Session,
    iterations: usize,
    last_reply: Option<TurnReply>,
) -> AutomodeReport {
    tracing::info!(iterations, "automode interrupted");
    if session.conversation.ends_with_unanswered_user() {
        session.conversation.push_assistant(INTERRUPTED_REPLY);
    }
    AutomodeReport {
        iterations,
        stop: AutomodeStop::Interrupted,
        last_reply,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agent::conversation::Turn;
    use crate::providers::{ChatRequest, ChatResponse, Provider};
    use crate::tools::ToolRegistry;
    use async_trait::async_trait;
    use std::sync::atomic::AtomicUsize;
    use std::sync::Arc;
    use std::time::Duration;

    /// Answers every request with the same text, counting calls. Raises the
    /// stop flag after `raise_after` calls when given one.
    struct LoopProvider {
        reply: String,
        calls: AtomicUsize,
        stop: Option<(Arc<AtomicBool>, usize)>,
    }

    #[async_trait]
    impl Provider for LoopProvider {
        async fn chat(
            &self,
            _request: ChatRequest<'_>,
            _model: &str,
            _temperature: f64,
        ) -> anyhow::Result<ChatResponse> {
            let n = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
            if let Some((flag, after)) = &self.stop {
                if n >= *after {
                    flag.store(true, Ordering::SeqCst);
                }
            }
            Ok(ChatResponse {
                text: Some(self.reply.clone()),
                ..ChatResponse::default()
            })
        }

        fn supports_native_tools(&self) -> bool {
            true
        }

        fn name(&self) -> &str {
            "loop"
        }
    }

    fn setup(provider: LoopProvider) -> (Arc<LoopProvider>, Driver, Session) {
        let provider = Arc::new(provider);
        let driver = Driver::new(provider.clone(), ToolRegistry::new(), "m", 0.0);
        let session = Session::new("/tmp", 100_000, Duration::from_secs(1));
        (provider, driver, session)
    }

    #[tokio::test]
    async fn stops_on_sentinel() {
        let (provider, driver, mut session) = setup(LoopProvider {
            reply: "Finished. AUTOMODE_COMPLETE".into(),
            calls: AtomicUsize::new(0),
            stop: None,
        });
        let stop = AtomicBool::new(false);
        let report = run_automode(&driver, &mut session, "build it", 5, &stop, |_, _| {})
            .await
            .unwrap();
        assert_eq!(report.stop, AutomodeStop::Completed);
        assert_eq!(report.iterations, 1);
        assert_eq!(provider.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn runs_to_ceiling_with_continuation_prompts() {
        let (provider, driver, mut session) = setup(LoopProvider {
            reply: "working".into(),
            calls: AtomicUsize::new(0),
            stop: None,
        });
        let stop = AtomicBool::new(false);
        let mut seen = Vec::new();
        let report = run_automode(&driver, &mut session, "build it", 3, &stop, |i, _| seen.push(i))
            .await
            .unwrap();
        assert_eq!(report.stop, AutomodeStop::MaxIterations);
        assert_eq!(seen, vec![1, 2, 3]);
        assert_eq!(provider.calls.load(Ordering::SeqCst), 3);

        let users: Vec<&str> = session
            .conversation
            .turns()
            .iter()
            .filter_map(|t| match t {
                Turn::User(u) => Some(u.as_str()),
                _ => None,
            })
            .collect();
        assert_eq!(users[0], "build it");
        assert!(users[1].starts_with("Continue with the next step."));
        assert!(users[2].contains("'AUTOMODE_COMPLETE'"));
    }

    #[tokio::test]
    async fn interrupt_between_turns_finishes_current_turn() {
        let flag = Arc::new(AtomicBool::new(false));
        let (provider, driver, mut session) = setup(LoopProvider {
            reply: "step".into(),
            calls: AtomicUsize::new(0),
            stop: Some((flag.clone(), 2)),
        });
        let report = run_automode(&driver, &mut session, "go", 10, &flag, |_, _| {})
            .await
            .unwrap();
        assert_eq!(report.stop, AutomodeStop::Interrupted);
        assert_eq!(report.iterations, 2);
        assert_eq!(provider.calls.load(Ordering::SeqCst), 2);
        // Both turns were answered, so nothing is appended.
        assert_eq!(
            session.conversation.turns().last(),
            Some(&Turn::Assistant("step".into()))
        );
    }

    #[tokio::test]
    async fn interrupt_answers_dangling_user_turn() {
        let (_provider, driver, mut session) = setup(LoopProvider {
            reply: "unused".into(),
            calls: AtomicUsize::new(0),
            stop: None,
        });
        session.conversation.push_user("left hanging");
        let stop = AtomicBool::new(true);
        let report = run_automode(&driver, &mut session, "go", 3, &stop, |_, _| {})
            .await
            .unwrap();
        assert_eq!(report.stop, AutomodeStop::Interrupted);
        assert_eq!(report.iterations, 0);
        assert_eq!(
            session.conversation.turns().last(),
            Some(&Turn::Assistant(INTERRUPTED_REPLY.into()))
        );
    }
}
