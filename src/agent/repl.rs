//! Interactive console loop.

use super::automode::{run_automode, AutomodeStop};
use super::driver::{Driver, TurnObserver};
use super::session::Session;
use crate::tools::{DependencyInstaller, ToolEnv, ToolOutcome};
use crate::util::{elide_base64, truncate_with_ellipsis};
use console::style;
use std::io::Write as _;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, BufReader, Lines, Stdin};

/// Longest tool result echoed to the console.
const MAX_ECHO_CHARS: usize = 4_000;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    Exit,
    Reset,
    Refresh,
    Tools,
    /// Autonomous mode with an optional iteration ceiling.
    Automode(Option<usize>),
    Message(String),
    Empty,
}

impl Command {
    pub fn parse(input: &str) -> Self {
        let trimmed = input.trim();
        let mut words = trimmed.split_whitespace();
        let Some(head) = words.next() else {
            return Self::Empty;
        };
        let rest: Vec<&str> = words.collect();
        match (head.to_ascii_lowercase().as_str(), rest.as_slice()) {
            ("exit" | "quit", []) => Self::Exit,
            ("reset", []) => Self::Reset,
            ("refresh", []) => Self::Refresh,
            ("tools", []) => Self::Tools,
            ("automode", []) => Self::Automode(None),
            ("automode", [n]) => match n.parse::<usize>() {
                Ok(n) if n > 0 => Self::Automode(Some(n)),
                _ => Self::Message(trimmed.to_string()),
            },
            _ => Self::Message(trimmed.to_string()),
        }
    }
}

/// Prints tool activity and token usage as turns progress.
pub struct ConsoleObserver {
    show_tool_usage: bool,
}

impl ConsoleObserver {
    pub fn new(show_tool_usage: bool) -> Self {
        Self { show_tool_usage }
    }
}

impl TurnObserver for ConsoleObserver {
    fn on_tool_call(&self, name: &str, input: &str, outcome: &ToolOutcome) {
        if !self.show_tool_usage {
            return;
        }
        println!("{} {}", style("Tool used:").yellow().bold(), style(name).bold());
        println!("{} {}", style("Tool input:").yellow(), elide_base64(input));
        let shown = truncate_with_ellipsis(&elide_base64(&outcome.content), MAX_ECHO_CHARS);
        if outcome.is_error {
            println!("{} {}", style("Tool error:").red().bold(), shown);
        } else {
            println!("{} {}", style("Tool result:").green(), shown);
        }
    }

    fn on_token_usage(&self, used: u64, budget: u64) {
        let remaining = budget.saturating_sub(used);
        println!(
            "{}",
            style(format!("Tokens used: {used}/{budget} ({remaining} remaining)")).dim()
        );
        if remaining < super::conversation::LOW_BUDGET_WARNING {
            println!(
                "{}",
                style("Warning: the conversation is close to its token budget. Older turns will be dropped.")
                    .red()
            );
        }
    }
}

/// State the console loop needs beyond the driver and session.
pub struct Repl<'a> {
    pub env: ToolEnv,
    pub installer: Option<&'a dyn DependencyInstaller>,
    pub default_automode_iterations: usize,
}

type StdinLines = Lines<BufReader<Stdin>>;

enum Input {
    Line(String),
    Eof,
    Interrupt,
}

async fn read_input(lines: &mut StdinLines, prompt: &str) -> anyhow::Result<Input> {
    print!("{}", style(prompt).cyan().bold());
    std::io::stdout().flush()?;
    tokio::select! {
        line = lines.next_line() => Ok(match line? {
            Some(line) => Input::Line(line),
            None => Input::Eof,
        }),
        _ = tokio::signal::ctrl_c() => Ok(Input::Interrupt),
    }
}

impl Repl<'_> {
    /// Read commands until `exit`, end of input or Ctrl-C at the prompt.
    pub async fn run(&self, driver: &mut Driver, session: &mut Session) -> anyhow::Result<()> {
        println!(
            "{}",
            style("Type 'exit' to quit, 'reset' to start over, 'refresh' to rescan tools, \
                   'tools' to list them, or 'automode [N]' to work autonomously.")
                .dim()
        );
        let mut lines = BufReader::new(tokio::io::stdin()).lines();

        loop {
            let line = match read_input(&mut lines, "You: ").await? {
                Input::Line(line) => line,
                Input::Eof | Input::Interrupt => {
                    println!();
                    break;
                }
            };

            match Command::parse(&line) {
                Command::Empty => {}
                Command::Exit => break,
                Command::Reset => {
                    session.reset();
                    println!("{}", style("Conversation history and file context cleared.").green());
                }
                Command::Tools => print_tools(driver),
                Command::Refresh => {
                    let added = driver
                        .registry_mut()
                        .refresh(&self.env, self.installer)
                        .await;
                    if added.is_empty() {
                        println!("No new tools found.");
                    } else {
                        println!("{} {}", style("New tools:").green(), added.join(", "));
                    }
                }
                Command::Automode(limit) => {
                    let Input::Line(goal) = read_input(&mut lines, "Goal for automode: ").await?
                    else {
                        println!();
                        continue;
                    };
                    if goal.trim().is_empty() {
                        continue;
                    }
                    let limit = limit.unwrap_or(self.default_automode_iterations);
                    self.automode(driver, session, goal.trim(), limit).await;
                }
                // A turn always runs to completion so every tool request in
                // history gets its results.
                Command::Message(text) => match driver.run_turn(session, &text, None).await {
                    Ok(reply) => print_reply(&reply.text),
                    Err(e) => print_error(&e),
                },
            }
        }
        Ok(())
    }

    async fn automode(&self, driver: &Driver, session: &mut Session, goal: &str, limit: usize) {
        println!(
            "{}",
            style(format!("Entering automode with up to {limit} iterations. Press Ctrl-C to stop."))
                .yellow()
        );
        let stop = Arc::new(AtomicBool::new(false));
        let listener = {
            let stop = Arc::clone(&stop);
            tokio::spawn(async move {
                if tokio::signal::ctrl_c().await.is_ok() {
                    stop.store(true, Ordering::SeqCst);
                    println!("\n{}", style("Stopping after the current iteration...").yellow());
                }
            })
        };

        let result = run_automode(driver, session, goal, limit, &stop, |iteration, reply| {
            println!("{}", style(format!("[automode {iteration}/{limit}]")).dim());
            print_reply(&reply.text);
        })
        .await;
        listener.abort();

        match result {
            Ok(report) => {
                let message = match report.stop {
                    AutomodeStop::Completed => "Automode completed.".to_string(),
                    AutomodeStop::MaxIterations => {
                        format!("Automode reached its limit of {limit} iterations.")
                    }
                    AutomodeStop::Interrupted => super::automode::INTERRUPTED_REPLY.to_string(),
                };
                println!("{}", style(message).yellow());
            }
            Err(e) => print_error(&e),
        }
    }
}

fn print_tools(driver: &Driver) {
    let registry = driver.registry();
    if registry.is_empty() {
        println!("No tools loaded.");
    }
    for spec in registry.specs() {
        println!("  {} - {}", style(&spec.name).bold(), spec.description);
    }
    for failure in registry.failures() {
        println!(
            "  {} {} ({})",
            style("unavailable:").red(),
            failure.name,
            failure.reason
        );
    }
}

pub(crate) fn print_reply(text: &str) {
    println!("{} {}", style("Assistant:").blue().bold(), text);
}

fn print_error(err: &anyhow::Error) {
    tracing::error!(error = %format!("{err:#}"), "turn failed");
    println!("{} {err:#}", style("Error:").red().bold());
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_commands() {
        assert_eq!(Command::parse("exit"), Command::Exit);
        assert_eq!(Command::parse("  QUIT "), Command::Exit);
        assert_eq!(Command::parse("reset"), Command::Reset);
        assert_eq!(Command::parse("refresh"), Command::Refresh);
        assert_eq!(Command::parse("tools"), Command::Tools);
        assert_eq!(Command::parse(""), Command::Empty);
        assert_eq!(Command::parse("   "), Command::Empty);
    }

    #[test]
    fn parses_automode_with_and_without_limit() {
        assert_eq!(Command::parse("automode"), Command::Automode(None));
        assert_eq!(Command::parse("automode 7"), Command::Automode(Some(7)));
    }

    #[test]
    fn anything_else_is_a_message() {
        assert_eq!(
            Command::parse("automode please"),
            Command::Message("automode please".into())
        );
        assert_eq!(Command::parse("automode 0"), Command::Message("automode 0".into()));
        assert_eq!(
            Command::parse("exit the loop early"),
            Command::Message("exit the loop early".into())
        );
        assert_eq!(Command::parse(" hello "), Command::Message("hello".into()));
    }
}
