//! The task → instructions → code → execute → judge state machine.
//!
//! The orchestrator owns no I/O of its own: every side effect goes through a
//! collaborator trait, and progress is reported as [`LoopEvent`]s to a caller
//! callback instead of being printed.

use std::fmt;

use anyhow::{Context, Result};
use tracing::{debug, info, instrument, warn};

use crate::core::budget::{Exhausted, RunBudget};
use crate::core::extract::extract;
use crate::core::types::{ExecutionResult, IterationRecord, Judgment, Role, RunContext};
use crate::io::gateway::ModelGateway;
use crate::io::memory::MemoryLog;
use crate::io::prompt::PromptEngine;
use crate::io::sandbox::CodeRunner;
use crate::io::transcript::Transcript;
use crate::verdict::VerdictSource;

/// States of one run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoopState {
    BuildTask,
    BuildInstructions,
    GenerateCode,
    Execute,
    Analyze,
    Decide,
    Terminate,
}

impl fmt::Display for LoopState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            LoopState::BuildTask => "build task",
            LoopState::BuildInstructions => "build instructions",
            LoopState::GenerateCode => "generate code",
            LoopState::Execute => "execute",
            LoopState::Analyze => "analyze",
            LoopState::Decide => "decide",
            LoopState::Terminate => "terminate",
        };
        f.write_str(name)
    }
}

/// Why the run stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoopStop {
    /// The last iteration was judged positive.
    Positive,
    /// The budget ran out before a positive verdict.
    BudgetExhausted(Exhausted),
}

/// Progress reported while the loop runs.
#[derive(Debug, Clone, PartialEq)]
pub enum LoopEvent {
    StateEntered { iteration: u32, state: LoopState },
    ModelResponded { role: Role, text: String },
    ModelFailed { role: Role, error: String },
    CodeExtracted { iteration: u32, code: String },
    Executed { iteration: u32, result: ExecutionResult },
    Judged { iteration: u32, judgment: Judgment },
    MemoryRecallFailed { error: String },
    MemoryWriteFailed { error: String },
    Finished { iterations: u32, stop: LoopStop },
}

/// Summary of a finished run.
#[derive(Debug, Clone, PartialEq)]
pub struct LoopOutcome {
    pub task: String,
    pub iterations: u32,
    pub stop: LoopStop,
    pub last_result: Option<ExecutionResult>,
}

/// Drives one run against its collaborators.
pub struct Orchestrator<'a, G: ?Sized, R: ?Sized, V: ?Sized> {
    gateway: &'a G,
    runner: &'a R,
    verdicts: &'a V,
    memory: &'a MemoryLog,
    transcript: Option<&'a Transcript>,
    prompts: PromptEngine,
    memories_to_recall: usize,
}

impl<'a, G, R, V> Orchestrator<'a, G, R, V>
where
    G: ModelGateway + ?Sized,
    R: CodeRunner + ?Sized,
    V: VerdictSource + ?Sized,
{
    pub fn new(
        gateway: &'a G,
        runner: &'a R,
        verdicts: &'a V,
        memory: &'a MemoryLog,
        memories_to_recall: usize,
    ) -> Self {
        Self {
            gateway,
            runner,
            verdicts,
            memory,
            transcript: None,
            prompts: PromptEngine::new(),
            memories_to_recall,
        }
    }

    pub fn with_transcript(mut self, transcript: &'a Transcript) -> Self {
        self.transcript = Some(transcript);
        self
    }

    /// Run until a positive verdict or until `budget` is exhausted.
    ///
    /// Model, execution and persistence failures are folded into the
    /// iteration as negative evidence. Only errors from the verdict source
    /// (operator interruption) or from resetting memory stop the run early.
    #[instrument(skip_all, fields(max_iterations = budget.max_iterations()))]
    pub fn run<F: FnMut(&LoopEvent)>(
        &self,
        objective: &str,
        budget: RunBudget,
        mut on_event: F,
    ) -> Result<LoopOutcome> {
        let emit: &mut dyn FnMut(&LoopEvent) = &mut on_event;

        self.memory.reset().context("reset memory at run start")?;
        if let Some(transcript) = self.transcript {
            transcript.clear();
        }

        let mut ctx = RunContext::new(objective);
        let mut state = LoopState::BuildTask;
        let mut iteration = 0u32;
        let mut result: Option<ExecutionResult> = None;
        let mut judgment: Option<Judgment> = None;
        let mut stop = LoopStop::Positive;

        loop {
            emit(&LoopEvent::StateEntered { iteration, state });
            debug!(iteration, state = %state, "state entered");

            state = match state {
                LoopState::BuildTask => {
                    ctx.task = self.build_task(&ctx, emit);
                    iteration = 1;
                    LoopState::BuildInstructions
                }
                LoopState::BuildInstructions => {
                    let recalled = if iteration > 1 {
                        self.recall(emit)
                    } else {
                        String::new()
                    };
                    ctx.start_iteration(recalled);
                    result = None;
                    judgment = None;
                    ctx.instructions = self
                        .ask(Role::Instructor, &ctx, emit)
                        .unwrap_or_else(|error| format!("(instructions unavailable: {error})"));
                    LoopState::GenerateCode
                }
                LoopState::GenerateCode => {
                    let response = self.ask(Role::Coder, &ctx, emit).unwrap_or_default();
                    ctx.code = extract(&response);
                    if ctx.code.is_empty() {
                        warn!(iteration, "no code block in coder response");
                    }
                    emit(&LoopEvent::CodeExtracted {
                        iteration,
                        code: ctx.code.clone(),
                    });
                    LoopState::Execute
                }
                LoopState::Execute => {
                    let executed = self.runner.run(&ctx.code).normalized();
                    ctx.execution_result = Some(executed.render());
                    emit(&LoopEvent::Executed {
                        iteration,
                        result: executed.clone(),
                    });
                    result = Some(executed);
                    LoopState::Analyze
                }
                LoopState::Analyze => {
                    let executed = result
                        .clone()
                        .context("analyze entered without an execution result")?;
                    let judged = self.verdicts.judge(&ctx.task, &executed)?;
                    ctx.analysis = judged.feedback.clone();
                    emit(&LoopEvent::Judged {
                        iteration,
                        judgment: judged.clone(),
                    });

                    let record = IterationRecord {
                        iteration,
                        task: ctx.task.clone(),
                        instructions: ctx.instructions.clone(),
                        code: ctx.code.clone(),
                        result: executed,
                        judgment: judged.clone(),
                    };
                    self.remember(&record, emit);
                    judgment = Some(judged);
                    LoopState::Decide
                }
                LoopState::Decide => {
                    let positive = judgment.as_ref().is_some_and(|j| j.verdict.is_positive());
                    if positive {
                        info!(iteration, "positive verdict");
                        stop = LoopStop::Positive;
                        LoopState::Terminate
                    } else {
                        match budget.check(iteration) {
                            Ok(()) => {
                                iteration += 1;
                                LoopState::BuildInstructions
                            }
                            Err(exhausted) => {
                                warn!(iteration, ?exhausted, "budget exhausted");
                                stop = LoopStop::BudgetExhausted(exhausted);
                                LoopState::Terminate
                            }
                        }
                    }
                }
                LoopState::Terminate => break,
            };
        }

        emit(&LoopEvent::Finished {
            iterations: iteration,
            stop,
        });
        Ok(LoopOutcome {
            task: ctx.task,
            iterations: iteration,
            stop,
            last_result: result,
        })
    }

    fn build_task(&self, ctx: &RunContext, emit: &mut dyn FnMut(&LoopEvent)) -> String {
        match self.ask(Role::Builder, ctx, emit) {
            Ok(task) if !task.is_empty() => task,
            Ok(_) => {
                warn!("task builder returned nothing; using the objective as the task");
                ctx.objective.clone()
            }
            Err(_) => ctx.objective.clone(),
        }
    }

    /// One model call; failures are reported and returned as text for the caller to place.
    fn ask(
        &self,
        role: Role,
        ctx: &RunContext,
        emit: &mut dyn FnMut(&LoopEvent),
    ) -> std::result::Result<String, String> {
        let response = self
            .prompts
            .render(role, ctx)
            .and_then(|prompt| self.gateway.inference(role, &prompt));
        match response {
            Ok(text) => {
                emit(&LoopEvent::ModelResponded {
                    role,
                    text: text.clone(),
                });
                Ok(text)
            }
            Err(err) => {
                let error = format!("{} call failed: {err:#}", role.as_str());
                warn!(role = role.as_str(), err = %format!("{err:#}"), "model call failed");
                emit(&LoopEvent::ModelFailed {
                    role,
                    error: error.clone(),
                });
                Err(error)
            }
        }
    }

    fn recall(&self, emit: &mut dyn FnMut(&LoopEvent)) -> String {
        match self.memory.recall(self.memories_to_recall) {
            Ok(text) => text,
            Err(err) => {
                let error = format!("{err:#}");
                warn!(err = %error, "memory recall failed");
                emit(&LoopEvent::MemoryRecallFailed { error });
                String::new()
            }
        }
    }

    fn remember(&self, record: &IterationRecord, emit: &mut dyn FnMut(&LoopEvent)) {
        let text = record.render();
        if let Err(err) = self.memory.append(&text) {
            let error = format!("{err:#}");
            warn!(iteration = record.iteration, err = %error, "memory append failed");
            emit(&LoopEvent::MemoryWriteFailed { error });
        }
        if let Some(transcript) = self.transcript {
            transcript.append(&text);
        }
    }
}
