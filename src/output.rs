// ABOUTME: Output formatting for CLI feedback.
// ABOUTME: Supports normal, quiet (CI), and JSON output modes.

use serde::Serialize;
use std::time::Instant;

use crate::deploy::{PipelineRun, PlannedStage, RunStatus, StageOutcome};

/// Output mode for CLI feedback.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputMode {
    /// Human-friendly output with progress messages
    Normal,
    /// Minimal output for CI (only final result)
    Quiet,
    /// JSON lines for scripting
    Json,
}

/// Handles CLI output based on the configured mode.
#[derive(Debug, Clone)]
pub struct Output {
    mode: OutputMode,
    start_time: Option<Instant>,
}

impl Output {
    pub fn new(mode: OutputMode) -> Self {
        Self {
            mode,
            start_time: None,
        }
    }

    pub fn mode(&self) -> OutputMode {
        self.mode
    }

    /// Start timing an operation.
    pub fn start_timer(&mut self) {
        self.start_time = Some(Instant::now());
    }

    /// Get elapsed time since timer started.
    pub fn elapsed_secs(&self) -> f64 {
        self.start_time
            .map(|t| t.elapsed().as_secs_f64())
            .unwrap_or(0.0)
    }

    fn duration(&self) -> Option<f64> {
        self.start_time.map(|_| self.elapsed_secs())
    }

    /// Print a progress message (suppressed in quiet/json mode).
    pub fn progress(&self, message: &str) {
        if self.mode == OutputMode::Normal {
            println!("{message}");
        }
    }

    /// Print a success message with optional timing.
    pub fn success(&self, message: &str) {
        match self.mode {
            OutputMode::Normal => {
                let elapsed = self.elapsed_secs();
                if elapsed > 0.0 {
                    println!("{message} ({:.1}s)", elapsed);
                } else {
                    println!("{message}");
                }
            }
            OutputMode::Quiet => {
                // Print only the essential result
                println!("{message}");
            }
            OutputMode::Json => self.emit_event("success", message, false),
        }
    }

    /// Print a non-fatal warning.
    pub fn warning(&self, message: &str) {
        match self.mode {
            OutputMode::Normal | OutputMode::Quiet => eprintln!("Warning: {message}"),
            OutputMode::Json => self.emit_event("warning", message, true),
        }
    }

    /// Print an error message.
    pub fn error(&self, message: &str) {
        match self.mode {
            OutputMode::Normal | OutputMode::Quiet => {
                eprintln!("Error: {message}");
            }
            OutputMode::Json => self.emit_event("error", message, true),
        }
    }

    fn emit_event(&self, event: &str, message: &str, stderr: bool) {
        let event = JsonEvent {
            event,
            message,
            duration_secs: self.duration(),
        };
        if let Ok(json) = serde_json::to_string(&event) {
            if stderr {
                eprintln!("{json}");
            } else {
                println!("{json}");
            }
        }
    }

    /// Print the stages and final status of a finished run.
    pub fn run_summary(&self, run: &PipelineRun) {
        match self.mode {
            OutputMode::Json => {
                if let Ok(json) = serde_json::to_string(&JsonRun { event: "run", run }) {
                    println!("{json}");
                }
            }
            OutputMode::Quiet => println!("{}: {}", run.target, run.status),
            OutputMode::Normal => {
                for stage in &run.stages {
                    let mark = match stage.outcome {
                        StageOutcome::Success => "✓",
                        StageOutcome::Skipped => "-",
                        StageOutcome::Failed => "✗",
                    };
                    let attempt = stage
                        .attempt
                        .map(|a| format!(" [attempt {a}]"))
                        .unwrap_or_default();
                    println!(
                        "  {mark} {}: {}{attempt}",
                        stage.stage,
                        first_line(&stage.message)
                    );
                }
                if let Some(rollback) = &run.rollback {
                    for step in &rollback.steps {
                        println!("  ↺ {step}");
                    }
                    if let Some(err) = &rollback.error {
                        println!("  ✗ rollback: {err}");
                    }
                }
                let line = format!("{} ({}): {}", run.target, run.environment, run.status);
                if run.status == RunStatus::Succeeded {
                    self.success(&line);
                } else {
                    println!("{line}");
                    if let Some(failure) = &run.failure {
                        eprintln!("{failure}");
                    }
                }
            }
        }
    }

    /// Print a dry-run plan.
    pub fn plan(&self, target: &str, stages: &[PlannedStage]) {
        match self.mode {
            OutputMode::Json => {
                let plan = JsonPlan {
                    event: "plan",
                    target,
                    stages,
                };
                if let Ok(json) = serde_json::to_string(&plan) {
                    println!("{json}");
                }
            }
            OutputMode::Normal | OutputMode::Quiet => {
                println!("Plan for {target}:");
                for stage in stages {
                    println!("  {}: {}", stage.stage, stage.action);
                    for command in &stage.commands {
                        println!("      $ {command}");
                    }
                }
            }
        }
    }
}

fn first_line(message: &str) -> &str {
    message.lines().next().unwrap_or("")
}

#[derive(Serialize)]
struct JsonEvent<'a> {
    event: &'a str,
    message: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    duration_secs: Option<f64>,
}

#[derive(Serialize)]
struct JsonRun<'a> {
    event: &'a str,
    run: &'a PipelineRun,
}

#[derive(Serialize)]
struct JsonPlan<'a> {
    event: &'a str,
    target: &'a str,
    stages: &'a [PlannedStage],
}
