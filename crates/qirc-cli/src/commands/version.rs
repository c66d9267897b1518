//! Version command implementation.

use console::style;

/// Execute the version command.
pub fn execute() {
    let version = env!("CARGO_PKG_VERSION");

    println!(
        "{} {} - profile-aware QIR code generation",
        style("qirc").cyan().bold(),
        style(format!("v{version}")).yellow()
    );
    println!();
    println!("Components:");
    println!("  qirc-syntax   Lexer and parser");
    println!("  qirc-ir       QIR module model and text emission");
    println!("  qirc-compile  Profile validation and lowering");
    println!("  qirc-worker   Isolated worker and timeout supervisor");
    println!();
    println!("License: {}", style("Apache-2.0").dim());
}
