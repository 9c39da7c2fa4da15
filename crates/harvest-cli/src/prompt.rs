//! Terminal operator prompt.

use async_trait::async_trait;
use colored::Colorize;
use harvest_hal::OperatorPrompt;
use harvest_types::HarvestError;
use tokio::io::{AsyncBufReadExt, BufReader, Stdin};
use tokio::sync::Mutex;

/// Waits for a line on stdin.  Any line continues; `q`, `quit` or `stop`
/// (or end of input) cancels the run.
pub struct StdinPrompt {
    input: Mutex<BufReader<Stdin>>,
}

impl StdinPrompt {
    pub fn new() -> Self {
        Self {
            input: Mutex::new(BufReader::new(tokio::io::stdin())),
        }
    }
}

impl Default for StdinPrompt {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl OperatorPrompt for StdinPrompt {
    async fn wait_for_next(&self, message: &str) -> Result<(), HarvestError> {
        println!("  {} {}", "▶".cyan().bold(), message.bold());
        let mut line = String::new();
        let read = self
            .input
            .lock()
            .await
            .read_line(&mut line)
            .await
            .map_err(|e| HarvestError::Transport(format!("stdin: {e}")))?;
        interpret((read > 0).then_some(line.as_str()))
    }
}

/// `None` is end of input.
fn interpret(line: Option<&str>) -> Result<(), HarvestError> {
    match line.map(str::trim) {
        None => Err(HarvestError::Cancelled("operator input closed".to_string())),
        Some("q" | "quit" | "stop") => Err(HarvestError::Cancelled("operator stop".to_string())),
        Some(_) => Ok(()),
    }
}
