//! Operator console.
//!
//! Status lines are free text for the operator and are not machine-parsed.
//! The only input the orchestration layer ever asks for is the recovery choice
//! after an interrupt.

use std::collections::VecDeque;
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::io::{AsyncBufReadExt, BufReader, Lines, Stdin};

use crate::error::ScriptResult;
use crate::hardware::mock::CallLog;

/// Capability: operator-facing line I/O.
#[async_trait]
pub trait Console: Send + Sync {
    /// Print one status line.
    fn status(&self, line: &str);

    /// Ask a question and block for one line of input.
    ///
    /// Returns `Ok(None)` when input is exhausted.
    async fn prompt(&self, question: &str) -> ScriptResult<Option<String>>;
}

/// Console on the process's stdout/stdin.
pub struct StdConsole {
    lines: tokio::sync::Mutex<Lines<BufReader<Stdin>>>,
}

impl StdConsole {
    /// Console on the process's stdout and stdin.
    pub fn new() -> Self {
        Self {
            lines: tokio::sync::Mutex::new(BufReader::new(tokio::io::stdin()).lines()),
        }
    }
}

impl Default for StdConsole {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Console for StdConsole {
    fn status(&self, line: &str) {
        println!("{line}");
    }

    async fn prompt(&self, question: &str) -> ScriptResult<Option<String>> {
        println!("{question}");
        let mut lines = self.lines.lock().await;
        Ok(lines.next_line().await?)
    }
}

/// Console test double with canned answers.
///
/// Status lines and prompts are recorded in order. When built with
/// [`ScriptedConsole::with_log`], they are also appended to a call log shared
/// with the mock hardware so tests can check ordering across both.
#[derive(Default)]
pub struct ScriptedConsole {
    answers: Mutex<VecDeque<String>>,
    transcript: Mutex<Vec<String>>,
    log: Option<CallLog>,
}

impl ScriptedConsole {
    /// Console that answers prompts from `answers`, then reports end of input.
    pub fn new<I, S>(answers: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            answers: Mutex::new(answers.into_iter().map(Into::into).collect()),
            transcript: Mutex::new(Vec::new()),
            log: None,
        }
    }

    /// Also record prompts and status lines into a shared call log.
    pub fn with_log(mut self, log: CallLog) -> Self {
        self.log = Some(log);
        self
    }

    /// Everything printed or asked so far.
    pub fn transcript(&self) -> Vec<String> {
        self.transcript.lock().clone()
    }

    /// Number of prompts issued.
    pub fn prompt_count(&self) -> usize {
        self.transcript
            .lock()
            .iter()
            .filter(|line| line.starts_with("prompt: "))
            .count()
    }

    fn record(&self, entry: String) {
        if let Some(log) = &self.log {
            log.lock().push(entry.clone());
        }
        self.transcript.lock().push(entry);
    }
}

#[async_trait]
impl Console for ScriptedConsole {
    fn status(&self, line: &str) {
        self.record(format!("status: {line}"));
    }

    async fn prompt(&self, question: &str) -> ScriptResult<Option<String>> {
        self.record(format!("prompt: {question}"));
        Ok(self.answers.lock().pop_front())
    }
}

/// Shared handle type used by the orchestration layer.
pub type SharedConsole = Arc<dyn Console>;
