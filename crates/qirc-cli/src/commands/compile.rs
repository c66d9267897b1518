//! Compile command implementation.

use std::fs;
use std::path::Path;
use std::time::Duration;

use anyhow::{Context, Result, bail};
use console::style;
use indicatif::{ProgressBar, ProgressStyle};
use tracing::{debug, info};

use qirc_compile::{TargetProfile, generate_ir};
use qirc_worker::{Request, Supervisor, SupervisorError};

use crate::config::QircConfig;

/// Execute the compile command.
///
/// IR goes to `output` or stdout; progress and errors go to stderr.
pub async fn execute(
    input: &Path,
    output: Option<&Path>,
    config: &QircConfig,
    in_process: bool,
    require_profile: Option<TargetProfile>,
) -> Result<()> {
    let profile = config.profile;
    if let Some(required) = require_profile {
        if profile != required {
            bail!(
                "Submission is only supported when targeting the QIR {} profile. \
                 Select it with --profile {} or QIRC_PROFILE.",
                required.as_str(),
                required.as_str()
            );
        }
    }

    let source = fs::read_to_string(input)
        .with_context(|| format!("Failed to read input file: {}", input.display()))?;
    let source_name = input
        .file_name()
        .map_or_else(|| input.display().to_string(), |n| n.to_string_lossy().into_owned());

    eprintln!(
        "{} Compiling {} for the {} profile",
        style("→").cyan().bold(),
        style(input.display()).green(),
        style(profile.as_str()).yellow()
    );

    let spinner = ProgressBar::new_spinner();
    spinner.set_style(ProgressStyle::default_spinner().template("{spinner:.cyan} {msg}")?);
    spinner.set_message("Generating QIR...");
    spinner.enable_steady_tick(Duration::from_millis(100));

    let result = if in_process {
        info!("compiling in process");
        generate_ir(&source_name, &source, profile).map_err(SupervisorError::CompilationFailed)
    } else {
        let supervisor = Supervisor::new(config.worker_command()?);
        supervisor
            .run_with_timeout(
                Request::new(&source_name, source, profile),
                Duration::from_millis(config.timeout_ms),
            )
            .await
    };
    spinner.finish_and_clear();

    let ir = match result {
        Ok(ir) => ir,
        Err(err) => {
            debug!("compilation failed: {err}");
            bail!(err.user_message(profile));
        }
    };

    match output {
        Some(path) => {
            fs::write(path, &ir)
                .with_context(|| format!("Failed to write output file: {}", path.display()))?;
            eprintln!(
                "{} Wrote {} ({} bytes)",
                style("✓").green().bold(),
                style(path.display()).green(),
                ir.len()
            );
        }
        None => print!("{ir}"),
    }
    Ok(())
}
