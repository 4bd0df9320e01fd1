//! Role prompts rendered from the structured run context.

use anyhow::Result;
use minijinja::{Environment, context};
use tracing::debug;

use crate::core::types::{Role, RunContext};

const BUILDER_TEMPLATE: &str = include_str!("prompts/builder.md");
const INSTRUCTOR_TEMPLATE: &str = include_str!("prompts/instructor.md");
const CODER_TEMPLATE: &str = include_str!("prompts/coder.md");
const ANALYZER_TEMPLATE: &str = include_str!("prompts/analyzer.md");

const BUILDER_SYSTEM: &str = include_str!("prompts/system_builder.md");
const INSTRUCTOR_SYSTEM: &str = include_str!("prompts/system_instructor.md");
const CODER_SYSTEM: &str = include_str!("prompts/system_coder.md");
const ANALYZER_SYSTEM: &str = include_str!("prompts/system_analyzer.md");

/// System prompt for `codeloop infer`, the model helper generated programs call.
pub const HELPER_SYSTEM_PROMPT: &str = include_str!("prompts/system_helper.md");

/// Fixed system prompt for `role`.
pub fn system_prompt(role: Role) -> &'static str {
    match role {
        Role::Builder => BUILDER_SYSTEM,
        Role::Instructor => INSTRUCTOR_SYSTEM,
        Role::Coder => CODER_SYSTEM,
        Role::Analyzer => ANALYZER_SYSTEM,
    }
}

fn user_template(role: Role) -> &'static str {
    match role {
        Role::Builder => BUILDER_TEMPLATE,
        Role::Instructor => INSTRUCTOR_TEMPLATE,
        Role::Coder => CODER_TEMPLATE,
        Role::Analyzer => ANALYZER_TEMPLATE,
    }
}

/// Template engine wrapper around minijinja.
pub struct PromptEngine {
    env: Environment<'static>,
}

impl Default for PromptEngine {
    fn default() -> Self {
        Self::new()
    }
}

impl PromptEngine {
    pub fn new() -> Self {
        let mut env = Environment::new();
        for role in Role::ALL {
            env.add_template(role.as_str(), user_template(role))
                .expect("role template should be valid");
        }
        Self { env }
    }

    /// Render the user message for `role` from `ctx`.
    pub fn render(&self, role: Role, ctx: &RunContext) -> Result<String> {
        let template = self.env.get_template(role.as_str())?;
        let rendered = template.render(context! {
            objective => ctx.objective.trim(),
            task => ctx.task.trim(),
            instructions => ctx.instructions.trim(),
            code => ctx.code.trim(),
            execution_result => ctx.execution_result.as_deref().map(str::trim).unwrap_or(""),
            analysis => ctx.analysis.trim(),
            recalled_memory => (!ctx.recalled_memory.trim().is_empty()).then(|| ctx.recalled_memory.trim()),
        })?;
        debug!(role = role.as_str(), bytes = rendered.len(), "rendered prompt");
        Ok(rendered)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_context() -> RunContext {
        RunContext {
            objective: "print the current date".to_string(),
            task: "The user wants the date printed.".to_string(),
            instructions: "1. import datetime\n2. print it".to_string(),
            code: "print('2024-01-01')".to_string(),
            execution_result: Some("*** Code execution output:\n\n2024-01-01".to_string()),
            analysis: String::new(),
            recalled_memory: String::new(),
        }
    }

    #[test]
    fn every_role_has_a_system_prompt() {
        for role in Role::ALL {
            assert!(!system_prompt(role).trim().is_empty(), "{role:?}");
        }
        assert!(system_prompt(Role::Analyzer).contains("FINAL REPORT: POSITIVE"));
        assert!(system_prompt(Role::Instructor).contains("CODELOOP_BIN"));
        assert!(!HELPER_SYSTEM_PROMPT.trim().is_empty());
    }

    #[test]
    fn builder_sees_only_the_objective() {
        let rendered = PromptEngine::new()
            .render(Role::Builder, &sample_context())
            .expect("render");
        assert_eq!(rendered, "Objective: print the current date");
    }

    #[test]
    fn instructor_omits_memory_section_on_first_iteration() {
        let rendered = PromptEngine::new()
            .render(Role::Instructor, &sample_context())
            .expect("render");
        assert_eq!(rendered, "Task: The user wants the date printed.");
    }

    #[test]
    fn coder_places_memory_before_task_and_instructions() {
        let mut ctx = sample_context();
        ctx.recalled_memory = "Task: earlier\nVerdict: NEGATIVE".to_string();
        let rendered = PromptEngine::new()
            .render(Role::Coder, &ctx)
            .expect("render");
        let memory_at = rendered.find("Verdict: NEGATIVE").expect("memory");
        let task_at = rendered.find("Task: The user wants").expect("task");
        let instructions_at = rendered.find("Instructions: 1. import").expect("instructions");
        assert!(memory_at < task_at && task_at < instructions_at);
    }

    #[test]
    fn analyzer_wraps_output_in_tags() {
        let rendered = PromptEngine::new()
            .render(Role::Analyzer, &sample_context())
            .expect("render");
        assert!(rendered.contains("[OUTPUT]\n*** Code execution output:\n\n2024-01-01\n[/OUTPUT]"));
    }
}
