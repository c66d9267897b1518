//! qirc command-line interface.
//!
//! ```text
//! qirc compile bell.qs --profile base        IR on stdout
//! qirc compile bell.qs -o bell.ll            IR to a file
//! qirc profiles --construct Recursion        legality of one construct
//! ```

#[global_allocator]
static GLOBAL: mimalloc::MiMalloc = mimalloc::MiMalloc;

use std::path::PathBuf;

use clap::{Parser, Subcommand};
use console::style;
use tracing_subscriber::EnvFilter;

use qirc_compile::TargetProfile;

mod commands;
mod config;

use commands::{compile, profiles, version, worker};
use config::QircConfig;

/// qirc - compile quantum programs to profile-conformant QIR
#[derive(Parser, Debug)]
#[command(name = "qirc")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Increase verbosity (-v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    /// Configuration file (YAML)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Compile a program to QIR
    Compile {
        /// Input source file
        input: PathBuf,

        /// Output file (default: stdout)
        #[arg(short, long)]
        output: Option<PathBuf>,

        /// Target profile (base, adaptive, full)
        #[arg(short, long, env = "QIRC_PROFILE")]
        profile: Option<TargetProfile>,

        /// Compilation deadline in milliseconds
        #[arg(long, env = "QIRC_TIMEOUT_MS")]
        timeout_ms: Option<u64>,

        /// Compile in this process instead of an isolated worker
        #[arg(long)]
        in_process: bool,

        /// Refuse to compile unless the effective profile is this one
        #[arg(long)]
        require_profile: Option<TargetProfile>,
    },

    /// Show which constructs each profile permits
    Profiles {
        /// Check a single construct by name
        #[arg(long)]
        construct: Option<String>,
    },

    /// Serve one compilation request on stdin/stdout
    #[command(hide = true)]
    Worker,

    /// Show version information
    Version,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let filter = match cli.verbose {
        0 => "warn",
        1 => "info",
        2 => "debug",
        _ => "trace",
    };

    // stdout carries IR or responses; logs always go to stderr.
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::new(filter))
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    let result = match cli.command {
        Commands::Compile {
            input,
            output,
            profile,
            timeout_ms,
            in_process,
            require_profile,
        } => match QircConfig::load(cli.config.as_deref()) {
            Ok(config) => {
                let config = config.with_overrides(profile, timeout_ms);
                compile::execute(&input, output.as_deref(), &config, in_process, require_profile).await
            }
            Err(e) => Err(e),
        },

        Commands::Profiles { construct } => profiles::execute(construct.as_deref()),

        Commands::Worker => worker::execute().await,

        Commands::Version => {
            version::execute();
            Ok(())
        }
    };

    if let Err(e) = result {
        eprintln!("{} {}", style("Error:").red().bold(), e);
        std::process::exit(1);
    }

    Ok(())
}
