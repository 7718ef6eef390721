use clap::{Parser, Subcommand};

mod commands;
mod progress;
mod prompt;

use commands::{RolloutArgs, Target};

#[derive(Parser)]
#[command(
    name = "convoy",
    about = "Convoy: deploy container jobs onto a fleet cluster",
    version,
    propagate_version = true
)]
struct Cli {
    /// Log at debug level.
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Converge the cluster to the job, one scaling group at a time.
    Run {
        #[command(flatten)]
        target: Target,
        #[command(flatten)]
        rollout: RolloutArgs,
        /// Replace every loaded unit, changed or not.
        #[arg(long)]
        force: bool,
        /// Run against an empty in-memory cluster instead of the
        /// configured orchestrator.
        #[arg(long)]
        simulate: bool,
    },
    /// Remove every unit of the job from the cluster.
    Destroy {
        #[command(flatten)]
        target: Target,
        /// Do not ask for confirmation.
        #[arg(short, long)]
        yes: bool,
    },
    /// Render the units of the job without touching the cluster.
    Generate {
        #[command(flatten)]
        target: Target,
        /// Write one file per unit into this directory instead of stdout.
        #[arg(short, long)]
        output: Option<std::path::PathBuf>,
        /// Output format: text or json
        #[arg(short, long, default_value = "text")]
        format: String,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let directive = if cli.verbose { "convoy=debug" } else { "convoy=info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env().add_directive(directive.parse()?),
        )
        .with_writer(std::io::stderr)
        .init();

    match cli.command {
        Commands::Run {
            target,
            rollout,
            force,
            simulate,
        } => commands::run::run(&target, &rollout, force, simulate).await,
        Commands::Destroy { target, yes } => commands::destroy::destroy(&target, yes).await,
        Commands::Generate {
            target,
            output,
            format,
        } => commands::generate::generate(&target, output.as_deref(), &format),
    }
}
