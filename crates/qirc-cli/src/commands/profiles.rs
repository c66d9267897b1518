//! Profiles command implementation.

use anyhow::Result;
use console::style;

use qirc_compile::{ConstructKind, LEGALITY, TargetProfile, is_construct_name_allowed};

/// Print the legality table, or the verdict for one construct.
pub fn execute(construct: Option<&str>) -> Result<()> {
    match construct {
        Some(name) => check_construct(name),
        None => print_table(),
    }
    Ok(())
}

fn check_construct(name: &str) {
    if ConstructKind::from_name(name).is_none() {
        println!(
            "{} {} is not a known construct and is not allowed under any profile",
            style("✗").red().bold(),
            style(name).yellow()
        );
        return;
    }
    for profile in TargetProfile::ALL {
        let verdict = if is_construct_name_allowed(name, profile) {
            style("allowed").green()
        } else {
            style("not allowed").red()
        };
        println!("  {:<10} {}", profile.as_str(), verdict);
    }
}

fn print_table() {
    println!(
        "{:<26} {:^8} {:^8} {:^8}",
        style("Construct").bold(),
        "base",
        "adaptive",
        "full"
    );
    println!("{}", "─".repeat(54));
    for (kind, profiles) in LEGALITY {
        let mark = |p: TargetProfile| {
            if profiles.contains(&p) {
                style("✓").green()
            } else {
                style("·").dim()
            }
        };
        println!(
            "{:<26} {:^8} {:^8} {:^8}",
            kind.name(),
            mark(TargetProfile::Base),
            mark(TargetProfile::Adaptive),
            mark(TargetProfile::Full)
        );
    }
}
