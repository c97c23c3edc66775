//! gcsio - streaming Cloud Storage command line client

use clap::{Parser, Subcommand};
use tracing_subscriber::{EnvFilter, fmt, prelude::*};

mod commands;
mod exit_code;
mod output;

use commands::{cat, cp, ls, mv, rm, stat};
use exit_code::ExitCode;
use output::OutputConfig;

#[derive(Parser, Debug)]
#[command(name = "gcsio")]
#[command(about = "Streaming reads, resumable uploads and batched copies for Google Cloud Storage")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Output JSON instead of human-readable text
    #[arg(long, global = true)]
    json: bool,

    /// Disable colored output
    #[arg(long, global = true)]
    no_color: bool,

    /// Suppress everything but errors
    #[arg(short, long, global = true)]
    quiet: bool,

    /// Log debug output to stderr
    #[arg(long, global = true)]
    debug: bool,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Print object contents to stdout
    Cat(cat::CatArgs),

    /// Copy between local files and gs:// paths
    Cp(cp::CpArgs),

    /// Move (copy then delete) an object
    Mv(mv::MvArgs),

    /// Remove objects
    Rm(rm::RmArgs),

    /// List objects under a prefix
    Ls(ls::LsArgs),

    /// Show object metadata
    Stat(stat::StatArgs),
}

fn init_tracing(debug: bool) {
    let default = if debug { "debug" } else { "warn" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(std::io::stderr).with_target(false))
        .with(filter)
        .init();
}

#[tokio::main]
async fn main() -> std::process::ExitCode {
    let cli = Cli::parse();
    init_tracing(cli.debug);

    let output_config = OutputConfig {
        json: cli.json,
        no_color: cli.no_color,
        quiet: cli.quiet,
    };

    let code = match cli.command {
        Commands::Cat(args) => cat::execute(args, output_config).await,
        Commands::Cp(args) => cp::execute(args, output_config).await,
        Commands::Mv(args) => mv::execute(args, output_config).await,
        Commands::Rm(args) => rm::execute(args, output_config).await,
        Commands::Ls(args) => ls::execute(args, output_config).await,
        Commands::Stat(args) => stat::execute(args, output_config).await,
    };
    code.into()
}
