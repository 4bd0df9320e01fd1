//! Console rendering of loop events.

use crate::core::budget::Exhausted;
use crate::core::types::{EXECUTION_FAILED, ExecutionStatus};
use crate::orchestrator::{LoopEvent, LoopState, LoopStop};

/// Console line(s) for `event`, or `None` when there is nothing to show.
///
/// Model responses and program output are echoed live by the gateway and the
/// executor, so only headers, sentinels and verdicts are rendered here.
pub fn render_event(event: &LoopEvent) -> Option<String> {
    match event {
        LoopEvent::StateEntered { iteration, state } => match state {
            LoopState::BuildTask => Some("--- task ---".to_string()),
            LoopState::BuildInstructions => {
                Some(format!("\n=== iteration {iteration} ===\n--- instructions ---"))
            }
            LoopState::GenerateCode => Some("\n--- code ---".to_string()),
            LoopState::Execute => Some("\n--- execution ---".to_string()),
            LoopState::Analyze => Some("\n--- analysis ---".to_string()),
            LoopState::Decide | LoopState::Terminate => None,
        },
        LoopEvent::ModelResponded { .. } => None,
        LoopEvent::ModelFailed { error, .. } => Some(format!("! {error}")),
        LoopEvent::CodeExtracted { code, .. } if code.is_empty() => {
            Some("! no code block found in the coder response".to_string())
        }
        LoopEvent::CodeExtracted { .. } => None,
        LoopEvent::Executed { result, .. } => {
            let echoed = result.status == ExecutionStatus::Output && result.output != EXECUTION_FAILED;
            if echoed {
                return None;
            }
            Some(format!("[{}] {}", status_label(result.status), result.output))
        }
        LoopEvent::Judged { judgment, .. } => {
            Some(format!("verdict: {}", judgment.verdict.as_str()))
        }
        LoopEvent::MemoryRecallFailed { error } => Some(format!("! memory recall failed: {error}")),
        LoopEvent::MemoryWriteFailed { error } => Some(format!("! memory write failed: {error}")),
        LoopEvent::Finished { iterations, stop } => Some(finished_line(*iterations, *stop)),
    }
}

fn status_label(status: ExecutionStatus) -> &'static str {
    match status {
        ExecutionStatus::Output => "output",
        ExecutionStatus::Empty => "empty",
        ExecutionStatus::TimedOut => "timed out",
        ExecutionStatus::Crashed => "crashed",
    }
}

fn finished_line(iterations: u32, stop: LoopStop) -> String {
    let plural = if iterations == 1 { "" } else { "s" };
    match stop {
        LoopStop::Positive => {
            format!("\nobjective accomplished after {iterations} iteration{plural}")
        }
        LoopStop::BudgetExhausted(Exhausted::Iterations { max_iterations }) => format!(
            "\nno positive verdict after {iterations} iteration{plural} (max_iterations = {max_iterations})"
        ),
        LoopStop::BudgetExhausted(Exhausted::Time { max_run }) => format!(
            "\nno positive verdict after {iterations} iteration{plural} (time limit of {}s reached)",
            max_run.as_secs()
        ),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::types::{ExecutionResult, Judgment, Role};

    #[test]
    fn echoed_output_is_not_repeated() {
        let event = LoopEvent::Executed {
            iteration: 1,
            result: ExecutionResult::new(ExecutionStatus::Output, "a long enough line of program output"),
        };
        assert_eq!(render_event(&event), None);
        let responded = LoopEvent::ModelResponded {
            role: Role::Coder,
            text: "print(1)".to_string(),
        };
        assert_eq!(render_event(&responded), None);
    }

    #[test]
    fn sentinels_are_always_shown() {
        let event = LoopEvent::Executed {
            iteration: 2,
            result: ExecutionResult::new(ExecutionStatus::TimedOut, EXECUTION_FAILED),
        };
        assert_eq!(
            render_event(&event).as_deref(),
            Some("[timed out] Code execution failed")
        );
    }

    #[test]
    fn iteration_header_and_verdict() {
        let header = LoopEvent::StateEntered {
            iteration: 3,
            state: LoopState::BuildInstructions,
        };
        assert!(
            render_event(&header)
                .expect("header")
                .contains("=== iteration 3 ===")
        );

        let judged = LoopEvent::Judged {
            iteration: 3,
            judgment: Judgment::negative("try again"),
        };
        assert_eq!(
            render_event(&judged).as_deref(),
            Some("verdict: NEGATIVE")
        );

        let failed = LoopEvent::ModelFailed {
            role: Role::Coder,
            error: "coder call failed: timeout".to_string(),
        };
        assert_eq!(
            render_event(&failed).as_deref(),
            Some("! coder call failed: timeout")
        );
    }

    #[test]
    fn finished_reports_the_exhausted_bound() {
        let event = LoopEvent::Finished {
            iterations: 2,
            stop: LoopStop::BudgetExhausted(Exhausted::Iterations { max_iterations: 2 }),
        };
        let line = render_event(&event).expect("line");
        assert!(line.contains("no positive verdict after 2 iterations"));
        assert!(line.contains("max_iterations = 2"));
    }
}
