//! Verdict sources: who decides whether an execution accomplished the task.
//!
//! One source is selected at startup. The classifier-backed source asks the
//! analyzer role for a critique and classifies it; the operator-backed source
//! asks a human instead.

use anyhow::Result;
use tracing::{debug, warn};

use crate::core::types::{ExecutionResult, Judgment, Role, RunContext};
use crate::io::gateway::ModelGateway;
use crate::io::operator::{Operator, OperatorInterrupted};
use crate::io::prompt::PromptEngine;

pub const VERDICT_QUESTION: &str = "Is the result 'positive' or 'negative'?";
pub const FEEDBACK_QUESTION: &str = "Enter an analysis for next iteration";

/// Judges one execution result against the task.
pub trait VerdictSource {
    /// Return the verdict and the feedback folded into the next iteration.
    ///
    /// Errors are reserved for conditions that must stop the run; a failed
    /// judgment is a negative verdict.
    fn judge(&self, task: &str, result: &ExecutionResult) -> Result<Judgment>;
}

/// Analyzer model critique followed by a classifier threshold check.
pub struct ClassifierVerdict<'a, G: ModelGateway + ?Sized> {
    gateway: &'a G,
    prompts: PromptEngine,
    threshold: usize,
}

impl<'a, G: ModelGateway + ?Sized> ClassifierVerdict<'a, G> {
    pub fn new(gateway: &'a G, threshold: usize) -> Self {
        Self {
            gateway,
            prompts: PromptEngine::new(),
            threshold,
        }
    }
}

impl<G: ModelGateway + ?Sized> VerdictSource for ClassifierVerdict<'_, G> {
    fn judge(&self, task: &str, result: &ExecutionResult) -> Result<Judgment> {
        let ctx = RunContext {
            task: task.to_string(),
            execution_result: Some(result.render()),
            ..RunContext::default()
        };
        let prompt = match self.prompts.render(Role::Analyzer, &ctx) {
            Ok(prompt) => prompt,
            Err(err) => {
                warn!(err = %format!("{err:#}"), "failed to render analyzer prompt");
                return Ok(Judgment::negative(format!("Analysis failed: {err:#}")));
            }
        };

        let analysis = match self.gateway.inference(Role::Analyzer, &prompt) {
            Ok(analysis) => analysis,
            Err(err) => {
                warn!(err = %format!("{err:#}"), "analyzer call failed");
                return Ok(Judgment::negative(format!("Analysis failed: {err:#}")));
            }
        };
        if analysis.trim().is_empty() {
            warn!("analyzer returned an empty response");
            return Ok(Judgment::negative(
                "Analysis failed: the analyzer returned an empty response",
            ));
        }

        match self.gateway.classify(&analysis, self.threshold) {
            Ok(true) => Ok(Judgment::positive(analysis)),
            Ok(false) => Ok(Judgment::negative(analysis)),
            Err(err) => {
                warn!(err = %format!("{err:#}"), "classification failed");
                Ok(Judgment::negative(format!(
                    "{analysis}\n\nClassification failed: {err:#}"
                )))
            }
        }
    }
}

/// Verdict and feedback typed by an operator.
pub struct OperatorVerdict<O> {
    operator: O,
}

impl<O: Operator> OperatorVerdict<O> {
    pub fn new(operator: O) -> Self {
        Self { operator }
    }
}

impl<O: Operator> VerdictSource for OperatorVerdict<O> {
    fn judge(&self, _task: &str, _result: &ExecutionResult) -> Result<Judgment> {
        let answer = self
            .operator
            .ask(VERDICT_QUESTION)?
            .ok_or(OperatorInterrupted)?;
        if answer.eq_ignore_ascii_case("positive") {
            debug!("operator accepted the result");
            return Ok(Judgment::positive("Operator verdict: positive"));
        }

        let feedback = self
            .operator
            .ask(FEEDBACK_QUESTION)?
            .ok_or(OperatorInterrupted)?;
        if feedback.is_empty() {
            return Ok(Judgment::negative("Operator verdict: negative"));
        }
        Ok(Judgment::negative(feedback))
    }
}
