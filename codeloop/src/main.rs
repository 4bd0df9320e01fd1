use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::Result;
use clap::{Parser, Subcommand};
use tracing::{info, warn};

use codeloop::core::budget::RunBudget;
use codeloop::exit_codes;
use codeloop::io::config::{DEFAULT_CONFIG_PATH, Overrides, load_config, write_template};
use codeloop::io::gateway::OpenAiGateway;
use codeloop::io::memory::MemoryLog;
use codeloop::io::operator::{ConsoleOperator, OperatorInterrupted};
use codeloop::io::process::Echo;
use codeloop::io::prompt::HELPER_SYSTEM_PROMPT;
use codeloop::io::sandbox::{CodeRunner, SandboxExecutor};
use codeloop::io::transcript::Transcript;
use codeloop::logging;
use codeloop::orchestrator::{LoopStop, Orchestrator};
use codeloop::render::render_event;
use codeloop::verdict::{ClassifierVerdict, OperatorVerdict, VerdictSource};

/// Environment handed to executed programs so they can call `codeloop infer`.
const HELPER_BIN_ENV: &str = "CODELOOP_BIN";
const HELPER_CONFIG_ENV: &str = "CODELOOP_CONFIG";

#[derive(Parser)]
#[command(
    name = "codeloop",
    version,
    about = "Write code with a model, run it, judge the result, repeat"
)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Write a commented `codeloop.toml` template.
    Init {
        /// Overwrite an existing file.
        #[arg(short, long)]
        force: bool,
        /// Config path to write.
        #[arg(long, default_value = DEFAULT_CONFIG_PATH)]
        config: PathBuf,
    },
    /// Run the loop until a positive verdict or the budget runs out.
    Run {
        #[arg(long, default_value = DEFAULT_CONFIG_PATH)]
        config: PathBuf,
        /// Objective to pursue, replacing `run.objective`.
        #[arg(long)]
        objective: Option<String>,
        #[arg(long)]
        max_iterations: Option<u32>,
        /// Ask the operator for each verdict instead of the classifier.
        #[arg(long)]
        manual: bool,
    },
    /// Answer one prompt with the configured model and print the response.
    ///
    /// Programs run by the loop call this for natural-language subtasks.
    Infer {
        #[arg(long, default_value = DEFAULT_CONFIG_PATH)]
        config: PathBuf,
        text: String,
    },
    /// Execute one code snippet and print the captured result.
    Exec {
        #[arg(long, default_value = "python3")]
        runtime: PathBuf,
        /// Timeout in seconds.
        #[arg(long, default_value_t = 360)]
        timeout: u64,
        code: String,
    },
}

fn main() {
    logging::init();
    let code = match run() {
        Ok(code) => code,
        Err(err) if err.downcast_ref::<OperatorInterrupted>().is_some() => {
            eprintln!("{err:#}");
            exit_codes::INTERRUPTED
        }
        Err(err) => {
            eprintln!("{err:#}");
            exit_codes::INVALID
        }
    };
    std::process::exit(code);
}

fn run() -> Result<i32> {
    let cli = Cli::parse();
    match cli.command {
        Command::Init { force, config } => cmd_init(&config, force),
        Command::Run {
            config,
            objective,
            max_iterations,
            manual,
        } => {
            let overrides = Overrides {
                objective,
                max_iterations,
                manual_analysis: manual,
            };
            cmd_run(&config, &overrides)
        }
        Command::Infer { config, text } => cmd_infer(&config, &text),
        Command::Exec {
            runtime,
            timeout,
            code,
        } => Ok(cmd_exec(runtime, timeout, &code)),
    }
}

fn cmd_init(path: &Path, force: bool) -> Result<i32> {
    if write_template(path, force)? {
        println!("wrote {}", path.display());
    } else {
        println!("{} already exists (use --force to overwrite)", path.display());
    }
    Ok(exit_codes::OK)
}

fn cmd_run(path: &Path, overrides: &Overrides) -> Result<i32> {
    let cfg = load_config(path, overrides)?;
    let memory = MemoryLog::open(&cfg.run.database_path)?;
    let transcript = cfg.run.transcript_path.as_ref().map(Transcript::new);
    let gateway = OpenAiGateway::from_config(&cfg)?.with_echo(Echo::Console);
    let mut runner = SandboxExecutor::new(&cfg.run.runtime_path, cfg.run.execution_timeout())
        .with_echo(Echo::Console)
        .with_output_limit(cfg.run.output_limit_bytes)
        .with_env(HELPER_CONFIG_ENV, std::path::absolute(path).unwrap_or_else(|_| path.to_path_buf()));
    match std::env::current_exe() {
        Ok(exe) => runner = runner.with_env(HELPER_BIN_ENV, exe),
        Err(err) => warn!(err = %err, "cannot locate own executable; model helper unavailable"),
    }

    let verdicts: Box<dyn VerdictSource + '_> = if cfg.run.manual_analysis {
        Box::new(OperatorVerdict::new(ConsoleOperator::stdio()))
    } else {
        Box::new(ClassifierVerdict::new(&gateway, cfg.classifier.threshold))
    };

    let mut orchestrator = Orchestrator::new(
        &gateway,
        &runner,
        verdicts.as_ref(),
        &memory,
        cfg.run.memories_to_recall,
    );
    if let Some(transcript) = &transcript {
        orchestrator = orchestrator.with_transcript(transcript);
    }

    info!(
        objective = %cfg.run.objective,
        manual = cfg.run.manual_analysis,
        "starting run"
    );
    let budget = RunBudget::new(cfg.run.max_iterations, cfg.run.max_run());
    let outcome = orchestrator.run(&cfg.run.objective, budget, |event| {
        if let Some(line) = render_event(event) {
            println!("{line}");
        }
    })?;

    Ok(match outcome.stop {
        LoopStop::Positive => exit_codes::OK,
        LoopStop::BudgetExhausted(_) => exit_codes::EXHAUSTED,
    })
}

fn cmd_infer(path: &Path, text: &str) -> Result<i32> {
    let cfg = load_config(path, &Overrides::default())?;
    let gateway = OpenAiGateway::from_config(&cfg)?;
    let answer = gateway.complete(HELPER_SYSTEM_PROMPT, text)?;
    println!("{answer}");
    Ok(exit_codes::OK)
}

fn cmd_exec(runtime: PathBuf, timeout: u64, code: &str) -> i32 {
    let result = SandboxExecutor::new(runtime, Duration::from_secs(timeout)).run(code);
    println!("{}", result.render());
    exit_codes::OK
}
