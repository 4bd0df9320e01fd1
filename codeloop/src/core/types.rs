//! Shared deterministic types for the loop.
//!
//! These types define stable contracts between components. They hold text and
//! flags only; rendering to prompts happens in `io::prompt`.

/// Banner prefixed to every execution result shown to the model.
pub const EXECUTION_BANNER: &str = "*** Code execution output:";
/// Rendered results shorter than this carry no useful signal.
pub const MIN_RESULT_CHARS: usize = 32;
/// Replacement text for empty or too-short results.
pub const EXECUTION_FAILED: &str = "Code execution failed";
pub const EMPTY_OUTPUT: &str = "Empty output from code execution";
pub const TIMED_OUT: &str = "Process terminated due to timeout";

/// Model persona for one inference call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Role {
    /// Restates the objective as a task.
    Builder,
    /// Writes step-by-step instructions for the coder.
    Instructor,
    /// Produces a fenced code block.
    Coder,
    /// Judges an execution result against the task.
    Analyzer,
}

impl Role {
    pub const ALL: [Role; 4] = [Role::Builder, Role::Instructor, Role::Coder, Role::Analyzer];

    pub fn as_str(self) -> &'static str {
        match self {
            Role::Builder => "builder",
            Role::Instructor => "instructor",
            Role::Coder => "coder",
            Role::Analyzer => "analyzer",
        }
    }
}

/// Terminal verdict for one iteration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verdict {
    Positive,
    Negative,
}

impl Verdict {
    pub fn is_positive(self) -> bool {
        self == Verdict::Positive
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Verdict::Positive => "POSITIVE",
            Verdict::Negative => "NEGATIVE",
        }
    }
}

/// Verdict plus the feedback text folded into the next iteration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Judgment {
    pub verdict: Verdict,
    pub feedback: String,
}

impl Judgment {
    pub fn negative(feedback: impl Into<String>) -> Self {
        Self {
            verdict: Verdict::Negative,
            feedback: feedback.into(),
        }
    }

    pub fn positive(feedback: impl Into<String>) -> Self {
        Self {
            verdict: Verdict::Positive,
            feedback: feedback.into(),
        }
    }
}

/// How a code execution ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExecutionStatus {
    /// The process exited and produced output.
    Output,
    /// The process exited without writing anything.
    Empty,
    /// The watchdog killed the process.
    TimedOut,
    /// The process could not be launched or exited abnormally.
    Crashed,
}

/// Captured output of running one code artifact.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExecutionResult {
    pub status: ExecutionStatus,
    /// Trimmed output text, or a sentinel describing why there is none.
    pub output: String,
}

impl ExecutionResult {
    pub fn new(status: ExecutionStatus, output: impl Into<String>) -> Self {
        Self {
            status,
            output: output.into(),
        }
    }

    /// Text shown to the analyzer and stored in memory.
    pub fn render(&self) -> String {
        format!("{EXECUTION_BANNER}\n\n{}", self.output.trim())
    }

    /// Replace empty or too-short output with [`EXECUTION_FAILED`].
    ///
    /// The status is kept so the cause stays visible.
    pub fn normalized(self) -> Self {
        if self.output.trim().is_empty() || self.render().chars().count() < MIN_RESULT_CHARS {
            return Self {
                status: self.status,
                output: EXECUTION_FAILED.to_string(),
            };
        }
        self
    }
}

/// Rolling context for one iteration, rendered to text per role.
#[derive(Debug, Clone, Default)]
pub struct RunContext {
    pub objective: String,
    pub task: String,
    pub instructions: String,
    pub code: String,
    pub execution_result: Option<String>,
    pub analysis: String,
    /// Recall window from memory, oldest entry first.
    pub recalled_memory: String,
}

impl RunContext {
    pub fn new(objective: impl Into<String>) -> Self {
        Self {
            objective: objective.into(),
            ..Self::default()
        }
    }

    /// Drop the per-iteration fields, keeping objective and task.
    pub fn start_iteration(&mut self, recalled_memory: String) {
        self.instructions.clear();
        self.code.clear();
        self.execution_result = None;
        self.analysis.clear();
        self.recalled_memory = recalled_memory;
    }
}

/// Everything that happened in one iteration; becomes one memory entry.
#[derive(Debug, Clone)]
pub struct IterationRecord {
    pub iteration: u32,
    pub task: String,
    pub instructions: String,
    pub code: String,
    pub result: ExecutionResult,
    pub judgment: Judgment,
}

impl IterationRecord {
    /// Transcript text stored in the memory log.
    pub fn render(&self) -> String {
        let code = if self.code.trim().is_empty() {
            "(no code block found)"
        } else {
            self.code.trim()
        };
        format!(
            "Task: {}\nInstructions: {}\nCode: {}\nCode output: {}\nEnd of code output section.\n\nAnalysis: {}\nVerdict: {}\nEnd of analysis section.\n",
            self.task.trim(),
            self.instructions.trim(),
            code,
            self.result.render(),
            self.judgment.feedback.trim(),
            self.judgment.verdict.as_str(),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalizes_empty_output() {
        let result = ExecutionResult::new(ExecutionStatus::Output, "  ").normalized();
        assert_eq!(result.output, EXECUTION_FAILED);
        assert_eq!(result.status, ExecutionStatus::Output);
    }

    #[test]
    fn normalizes_too_short_output() {
        let result = ExecutionResult::new(ExecutionStatus::Output, "42").normalized();
        assert_eq!(result.output, EXECUTION_FAILED);
    }

    #[test]
    fn keeps_useful_output() {
        let result = ExecutionResult::new(ExecutionStatus::Output, "2024-01-01").normalized();
        assert_eq!(result.output, "2024-01-01");
        assert!(result.render().starts_with(EXECUTION_BANNER));
    }

    #[test]
    fn record_render_marks_missing_code_and_verdict() {
        let record = IterationRecord {
            iteration: 1,
            task: "The user wants the date".to_string(),
            instructions: "1. print it".to_string(),
            code: String::new(),
            result: ExecutionResult::new(ExecutionStatus::Empty, EMPTY_OUTPUT),
            judgment: Judgment::negative("nothing ran"),
        };
        let text = record.render();
        assert!(text.contains("Code: (no code block found)"));
        assert!(text.contains(EMPTY_OUTPUT));
        assert!(text.contains("Verdict: NEGATIVE"));
    }

    #[test]
    fn start_iteration_keeps_task() {
        let mut ctx = RunContext::new("objective");
        ctx.task = "task".to_string();
        ctx.code = "print(1)".to_string();
        ctx.start_iteration("memory".to_string());
        assert_eq!(ctx.task, "task");
        assert!(ctx.code.is_empty());
        assert_eq!(ctx.recalled_memory, "memory");
    }
}
