mod cmd;
mod output;
mod root;

use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser)]
#[command(
    name = "directive",
    about = "Rule-driven directive engine: resolve the next rule, run its actions, track progression",
    version,
    propagate_version = true
)]
struct Cli {
    /// Project root (default: auto-detect from .directive/ or .git/)
    #[arg(long, global = true, env = "DIRECTIVE_ROOT")]
    root: Option<PathBuf>,

    /// Output as JSON
    #[arg(long, global = true, short = 'j')]
    json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Create .directive/ with a config and empty project and extension stores
    Init {
        /// Branch this checkout works on
        #[arg(long, default_value = "main")]
        branch: String,
    },

    /// Validate a rule bundle and make it the active rule set
    Load {
        /// YAML or JSON bundle file
        bundle: PathBuf,
    },

    /// Resolve the rules that apply now
    Next {
        /// Rule that just completed (omit at session entry)
        #[arg(long)]
        after: Option<String>,

        /// Print the markdown directive for the first rule
        #[arg(long)]
        directive: bool,
    },

    /// Run the actions bound to a rule
    Run {
        rule: String,
        /// Context value as key=value (repeatable)
        #[arg(long = "param", short = 'p')]
        params: Vec<String>,
    },

    /// Invoke a tool action directly
    Tool {
        action: String,
        /// Parameter as key=value (repeatable)
        #[arg(long = "param", short = 'p')]
        params: Vec<String>,
    },

    /// Show project state and the resolver snapshot
    State,

    /// Check configuration, handler coverage and project state
    Validate,

    /// Check whether another branch's changes merge cleanly into this one
    Merge { branch: String },
}

fn main() {
    let cli = Cli::parse();

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(tracing::Level::WARN.into()),
        )
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    let root = root::resolve_root(cli.root.as_deref());

    let result = match cli.command {
        Commands::Init { branch } => cmd::init::run(&root, &branch, cli.json),
        Commands::Load { bundle } => cmd::load::run(&root, &bundle, cli.json),
        Commands::Next { after, directive } => {
            cmd::next::run(&root, after.as_deref(), directive, cli.json)
        }
        Commands::Run { rule, params } => cmd::run::run(&root, &rule, &params, cli.json),
        Commands::Tool { action, params } => cmd::run::tool(&root, &action, &params, cli.json),
        Commands::State => cmd::state::run(&root, cli.json),
        Commands::Validate => cmd::validate::run(&root, cli.json),
        Commands::Merge { branch } => cmd::merge::run(&root, &branch, cli.json),
    };

    if let Err(e) = result {
        eprintln!("error: {e:#}");
        std::process::exit(1);
    }
}
