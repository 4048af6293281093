// Teamwork CLI
//
// Design Decision: Use clap derive for ergonomic argument parsing.
// Design Decision: Support text/json output formats for scripting.
// Design Decision: Every scenario builds its own engine, so runs never share team state.

mod output;
mod scenarios;

use std::io;

use clap::{Parser, Subcommand, ValueEnum};
use output::OutputFormat;
use teamwork_engine::{EngineConfig, TeamConfig};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser)]
#[command(name = "teamwork")]
#[command(about = "Teamwork CLI - Stress the execution engine's teams, flows and governance")]
#[command(version)]
pub struct Cli {
    /// Output format
    #[arg(long, short, value_enum, default_value_t)]
    pub output: OutputFormat,

    /// Suppress non-essential output
    #[arg(long, short)]
    pub quiet: bool,

    #[command(subcommand)]
    pub command: Commands,
}

/// Team kind a scenario runs on
#[derive(Debug, Clone, Copy, ValueEnum)]
pub enum TeamArg {
    OnePerson,
    LeaderFollower,
    WorkerPerTask,
    Passive,
}

impl TeamArg {
    fn config(self, size: usize) -> TeamConfig {
        match self {
            TeamArg::OnePerson => TeamConfig::one_person("stress"),
            TeamArg::LeaderFollower => TeamConfig::leader_follower("stress", size),
            TeamArg::WorkerPerTask => TeamConfig::worker_per_task("stress"),
            TeamArg::Passive => TeamConfig::passive("stress"),
        }
    }
}

#[derive(Subcommand)]
pub enum Commands {
    /// Administered invocations bracketed by pre and post duties
    Administration {
        /// Team running the administered job
        #[arg(long, short, value_enum, default_value = "one-person")]
        team: TeamArg,

        /// Workers of a leader/follower team
        #[arg(long, default_value = "4")]
        size: usize,

        /// Number of invocations
        #[arg(long, short, env = "ENGINE_STRESS_ITERATIONS", default_value = "1000000")]
        iterations: u64,
    },

    /// Commit, rollback and tidy-up governance cycles
    Governance {
        /// Team running the governed jobs
        #[arg(long, short, value_enum, default_value = "passive")]
        team: TeamArg,

        /// Workers of a leader/follower team
        #[arg(long, default_value = "4")]
        size: usize,

        /// Number of cycles of each kind
        #[arg(long, short, env = "ENGINE_STRESS_ITERATIONS", default_value = "1000000")]
        iterations: u64,
    },

    /// Chained asynchronous flow invocations
    Flow {
        /// Number of chained invocations
        #[arg(long, short, env = "ENGINE_STRESS_ITERATIONS", default_value = "5000000")]
        iterations: u64,
    },

    /// Print the engine configuration read from the environment
    Config,
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "teamwork=info,teamwork_engine=warn".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(io::stderr))
        .init();

    let config = EngineConfig::from_env();

    let report = match cli.command {
        Commands::Administration {
            team,
            size,
            iterations,
        } => scenarios::administration(config, team.config(size), iterations)?,
        Commands::Governance {
            team,
            size,
            iterations,
        } => scenarios::governance(config, team.config(size), iterations)?,
        Commands::Flow { iterations } => scenarios::asynchronous_flow(config, iterations)?,
        Commands::Config => return cli.output.emit(&config, output::print_config),
    };

    cli.output
        .emit(&report, |report| output::print_report(report, cli.quiet))
}
