//! Console prompts for operator-driven verdicts.

use std::cell::RefCell;
use std::fmt;
use std::io::{BufRead, Write};

use anyhow::{Context, Result};

/// The operator closed input instead of answering; the run must stop.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OperatorInterrupted;

impl fmt::Display for OperatorInterrupted {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "operator interrupted the run")
    }
}

impl std::error::Error for OperatorInterrupted {}

/// Source of operator answers.
pub trait Operator {
    /// Ask `question` and return the trimmed answer, or `None` at end of input.
    fn ask(&self, question: &str) -> Result<Option<String>>;
}

impl<T: Operator + ?Sized> Operator for &T {
    fn ask(&self, question: &str) -> Result<Option<String>> {
        (**self).ask(question)
    }
}

/// Operator answering on a reader, prompted on a writer (stdin/stdout by default).
pub struct ConsoleOperator<R, W> {
    input: RefCell<R>,
    output: RefCell<W>,
}

impl ConsoleOperator<std::io::StdinLock<'static>, std::io::Stdout> {
    pub fn stdio() -> Self {
        Self::new(std::io::stdin().lock(), std::io::stdout())
    }
}

impl<R: BufRead, W: Write> ConsoleOperator<R, W> {
    pub fn new(input: R, output: W) -> Self {
        Self {
            input: RefCell::new(input),
            output: RefCell::new(output),
        }
    }
}

impl<R: BufRead, W: Write> Operator for ConsoleOperator<R, W> {
    fn ask(&self, question: &str) -> Result<Option<String>> {
        {
            let mut output = self.output.borrow_mut();
            write!(output, "> {question}: ").context("write operator prompt")?;
            output.flush().context("flush operator prompt")?;
        }
        let mut line = String::new();
        let n = self
            .input
            .borrow_mut()
            .read_line(&mut line)
            .context("read operator answer")?;
        if n == 0 {
            return Ok(None);
        }
        Ok(Some(line.trim().to_string()))
    }
}
