mod cmd;
mod executor;
mod output;
mod root;
mod transport;

use clap::{Parser, Subcommand};
use cmd::{
    approval::ApprovalSubcommand, config::ConfigSubcommand, decision::DecisionSubcommand,
    job::JobSubcommand, org::OrgSubcommand, outbox::OutboxSubcommand, policy::PolicySubcommand,
    proposal::ProposalSubcommand,
};
use std::path::PathBuf;

#[derive(Parser)]
#[command(
    name = "govern",
    about = "Govern AI-proposed actions: policy gate, decisions, jobs, approvals, notifications",
    version,
    propagate_version = true
)]
struct Cli {
    /// Data root (default: auto-detect from .govern/)
    #[arg(long, global = true, env = "GOVERN_ROOT")]
    root: Option<PathBuf>,

    /// Output as JSON
    #[arg(long, global = true, short = 'j')]
    json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Create the data directory, default config and database
    Init,

    /// Run the job processor, SLA timer and outbox delivery
    Worker {
        /// Perform a single pass of each loop and exit
        #[arg(long)]
        once: bool,
    },

    /// Inspect and change AI policy levels
    Policy {
        #[command(subcommand)]
        subcommand: PolicySubcommand,
    },

    /// Local organization settings (admin, regulatory mode, roles)
    Org {
        #[command(subcommand)]
        subcommand: OrgSubcommand,
    },

    /// Import, inspect and submit proposals
    Proposal {
        #[command(subcommand)]
        subcommand: ProposalSubcommand,
    },

    /// Record decisions and read the audit log
    Decision {
        #[command(subcommand)]
        subcommand: DecisionSubcommand,
    },

    /// Inspect and manage async jobs
    Job {
        #[command(subcommand)]
        subcommand: JobSubcommand,
    },

    /// Reviewer workqueue
    Approval {
        #[command(subcommand)]
        subcommand: ApprovalSubcommand,
    },

    /// Notification outbox
    Outbox {
        #[command(subcommand)]
        subcommand: OutboxSubcommand,
    },

    /// Show or validate the configuration
    Config {
        #[command(subcommand)]
        subcommand: ConfigSubcommand,
    },
}

fn main() {
    let cli = Cli::parse();

    let default_level = match &cli.command {
        Commands::Worker { .. } => tracing::Level::INFO,
        _ => tracing::Level::WARN,
    };

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env().add_directive(default_level.into()),
        )
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    let root = root::resolve_root(cli.root.as_deref());

    let result = match cli.command {
        Commands::Init => cmd::init::run(&root),
        Commands::Worker { once } => cmd::worker::run(&root, once, cli.json),
        Commands::Policy { subcommand } => cmd::policy::run(&root, subcommand, cli.json),
        Commands::Org { subcommand } => cmd::org::run(&root, subcommand, cli.json),
        Commands::Proposal { subcommand } => cmd::proposal::run(&root, subcommand, cli.json),
        Commands::Decision { subcommand } => cmd::decision::run(&root, subcommand, cli.json),
        Commands::Job { subcommand } => cmd::job::run(&root, subcommand, cli.json),
        Commands::Approval { subcommand } => cmd::approval::run(&root, subcommand, cli.json),
        Commands::Outbox { subcommand } => cmd::outbox::run(&root, subcommand, cli.json),
        Commands::Config { subcommand } => cmd::config::run(&root, subcommand, cli.json),
    };

    if let Err(e) = result {
        eprintln!("error: {e:#}");
        std::process::exit(1);
    }
}
