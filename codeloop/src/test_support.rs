//! Scripted collaborators for driving the loop without a model or a runtime.

use std::cell::RefCell;
use std::collections::{HashMap, VecDeque};
use std::path::{Path, PathBuf};

use anyhow::{Context, Result, anyhow};
use tempfile::TempDir;

use crate::core::types::{ExecutionResult, ExecutionStatus, Role};
use crate::io::gateway::ModelGateway;
use crate::io::memory::MemoryLog;
use crate::io::operator::Operator;
use crate::io::sandbox::CodeRunner;
use crate::io::transcript::Transcript;

/// Gateway answering from per-role queues.
///
/// An exhausted queue is an error, so a test that under-scripts a run sees the
/// failure path rather than a silent default.
#[derive(Default)]
pub struct ScriptedGateway {
    responses: RefCell<HashMap<Role, VecDeque<Result<String, String>>>>,
    classifications: RefCell<VecDeque<bool>>,
    prompts: RefCell<Vec<(Role, String)>>,
    thresholds: RefCell<Vec<usize>>,
}

impl ScriptedGateway {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue a successful response for `role`.
    pub fn respond(self, role: Role, text: &str) -> Self {
        self.push(role, Ok(text.to_string()));
        self
    }

    /// Queue a failed call for `role`.
    pub fn fail(self, role: Role, error: &str) -> Self {
        self.push(role, Err(error.to_string()));
        self
    }

    /// Queue classifier outcomes, consumed one per `classify` call.
    pub fn classify_as(self, outcomes: impl IntoIterator<Item = bool>) -> Self {
        self.classifications.borrow_mut().extend(outcomes);
        self
    }

    /// Prompts sent for `role`, in call order.
    pub fn prompts_for(&self, role: Role) -> Vec<String> {
        self.prompts
            .borrow()
            .iter()
            .filter(|(r, _)| *r == role)
            .map(|(_, prompt)| prompt.clone())
            .collect()
    }

    /// Thresholds passed to `classify`, in call order.
    pub fn thresholds(&self) -> Vec<usize> {
        self.thresholds.borrow().clone()
    }

    fn push(&self, role: Role, response: Result<String, String>) {
        self.responses
            .borrow_mut()
            .entry(role)
            .or_default()
            .push_back(response);
    }
}

impl ModelGateway for ScriptedGateway {
    fn inference(&self, role: Role, prompt: &str) -> Result<String> {
        self.prompts.borrow_mut().push((role, prompt.to_string()));
        let next = self
            .responses
            .borrow_mut()
            .get_mut(&role)
            .and_then(VecDeque::pop_front);
        match next {
            Some(Ok(text)) => Ok(text),
            Some(Err(error)) => Err(anyhow!(error)),
            None => Err(anyhow!("no scripted response for {}", role.as_str())),
        }
    }

    fn classify(&self, _text: &str, threshold: usize) -> Result<bool> {
        self.thresholds.borrow_mut().push(threshold);
        self.classifications
            .borrow_mut()
            .pop_front()
            .context("no scripted classification")
    }
}

/// Runner returning queued results and recording the code it was given.
pub struct ScriptedRunner {
    results: RefCell<VecDeque<ExecutionResult>>,
    codes: RefCell<Vec<String>>,
}

impl ScriptedRunner {
    pub fn new(results: impl IntoIterator<Item = ExecutionResult>) -> Self {
        Self {
            results: RefCell::new(results.into_iter().collect()),
            codes: RefCell::new(Vec::new()),
        }
    }

    pub fn codes(&self) -> Vec<String> {
        self.codes.borrow().clone()
    }
}

impl CodeRunner for ScriptedRunner {
    fn run(&self, code: &str) -> ExecutionResult {
        self.codes.borrow_mut().push(code.to_string());
        self.results.borrow_mut().pop_front().unwrap_or_else(|| {
            ExecutionResult::new(ExecutionStatus::Crashed, "no scripted execution result")
        })
    }
}

/// Operator replaying canned answers; `None` once they run out.
pub struct ScriptedOperator {
    answers: RefCell<VecDeque<String>>,
    questions: RefCell<Vec<String>>,
}

impl ScriptedOperator {
    pub fn new<'a>(answers: impl IntoIterator<Item = &'a str>) -> Self {
        Self {
            answers: RefCell::new(answers.into_iter().map(str::to_string).collect()),
            questions: RefCell::new(Vec::new()),
        }
    }

    pub fn questions(&self) -> Vec<String> {
        self.questions.borrow().clone()
    }
}

impl Operator for ScriptedOperator {
    fn ask(&self, question: &str) -> Result<Option<String>> {
        self.questions.borrow_mut().push(question.to_string());
        Ok(self.answers.borrow_mut().pop_front())
    }
}

/// Temporary directory holding a run's database and transcript files.
pub struct TempWorkspace {
    dir: TempDir,
}

impl TempWorkspace {
    pub fn new() -> Result<Self> {
        let dir = tempfile::tempdir().context("create temp workspace")?;
        Ok(Self { dir })
    }

    pub fn root(&self) -> &Path {
        self.dir.path()
    }

    pub fn database_path(&self) -> PathBuf {
        self.root().join("codeloop.db")
    }

    pub fn transcript_path(&self) -> PathBuf {
        self.root().join("debug.txt")
    }

    pub fn memory(&self) -> Result<MemoryLog> {
        MemoryLog::open(&self.database_path())
    }

    pub fn transcript(&self) -> Transcript {
        Transcript::new(self.transcript_path())
    }
}
