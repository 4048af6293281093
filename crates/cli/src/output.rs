// Report rendering

use clap::ValueEnum;
use serde::Serialize;
use teamwork_engine::EngineConfig;

use crate::scenarios::Report;

#[derive(Debug, Clone, Copy, Default, ValueEnum)]
pub enum OutputFormat {
    #[default]
    Text,
    Json,
}

impl OutputFormat {
    /// Print `value` as pretty JSON, or through `text` for terminal output
    pub fn emit<T: Serialize>(self, value: &T, text: impl FnOnce(&T)) -> anyhow::Result<()> {
        match self {
            OutputFormat::Json => println!("{}", serde_json::to_string_pretty(value)?),
            OutputFormat::Text => text(value),
        }
        Ok(())
    }
}

fn field(label: &str, value: impl std::fmt::Display) {
    println!("{:<14} {value}", format!("{label}:"));
}

pub fn print_config(config: &EngineConfig) {
    field("Steps/pass", config.max_steps_per_pass);
    field("Default team", &config.default_team.name);
    field("Team kind", &config.default_team.kind);
    field(
        "Poll interval",
        format!("{}ms", config.default_team.poll_interval.as_millis()),
    );
}

pub fn print_report(report: &Report, quiet: bool) {
    if quiet {
        println!("{} {:.0}/s", report.scenario, report.per_second);
        return;
    }

    field("Scenario", &report.scenario);
    field("Team", &report.team);
    field("Iterations", report.iterations);
    field("Elapsed", format!("{}ms", report.elapsed_ms));
    field("Throughput", format!("{:.0}/s", report.per_second));
    for (label, value) in &report.details {
        field(label, value);
    }
}
