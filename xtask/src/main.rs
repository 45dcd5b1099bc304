//! Berth xtask - development tasks
//!
//! ```bash
//! cargo xtask build --release
//! cargo xtask test
//! cargo xtask lint
//! cargo xtask fmt --check
//! cargo xtask fixture
//! cargo xtask ci
//! ```

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use xshell::{cmd, Shell};

const FIXTURE: &str = "fixtures/docker-compose.yml";

#[derive(Parser)]
#[command(name = "xtask")]
#[command(about = "Development tasks for Berth")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Build the berth binary
    Build {
        /// Build in release mode
        #[arg(long)]
        release: bool,
    },
    /// Run all tests
    Test,
    /// Run clippy with warnings denied
    Lint,
    /// Format code
    Fmt {
        /// Check formatting without making changes
        #[arg(long)]
        check: bool,
    },
    /// Run berth against the bundled fixture descriptor
    Fixture,
    /// Generate documentation
    Doc {
        /// Open documentation in browser
        #[arg(long)]
        open: bool,
    },
    /// Run CI checks (format, lint, test, fixture)
    Ci,
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    let sh = Shell::new()?;
    sh.change_dir(project_root()?);

    match cli.command {
        Commands::Build { release } => build(&sh, release)?,
        Commands::Test => test(&sh)?,
        Commands::Lint => lint(&sh)?,
        Commands::Fmt { check } => fmt(&sh, check)?,
        Commands::Fixture => fixture(&sh)?,
        Commands::Doc { open } => doc(&sh, open)?,
        Commands::Ci => ci(&sh)?,
    }

    Ok(())
}

fn project_root() -> Result<PathBuf> {
    let output = std::process::Command::new("cargo")
        .args(["locate-project", "--workspace", "--message-format=plain"])
        .output()
        .context("Failed to run cargo locate-project")?;

    let path = String::from_utf8(output.stdout)?;
    PathBuf::from(path.trim())
        .parent()
        .map(|p| p.to_path_buf())
        .context("Failed to find project root")
}

fn build(sh: &Shell, release: bool) -> Result<()> {
    println!("Building berth...");
    let profile = if release { Some("--release") } else { None };
    cmd!(sh, "cargo build --bin berth {profile...}").run()?;
    Ok(())
}

fn test(sh: &Shell) -> Result<()> {
    println!("Running tests...");
    cmd!(sh, "cargo test --package berth").run()?;
    Ok(())
}

fn lint(sh: &Shell) -> Result<()> {
    println!("Running clippy...");
    cmd!(sh, "cargo clippy --workspace --all-targets -- -D warnings").run()?;
    Ok(())
}

fn fmt(sh: &Shell, check: bool) -> Result<()> {
    let check = if check { Some("--check") } else { None };
    cmd!(sh, "cargo fmt --all -- {check...}").run()?;
    Ok(())
}

fn fixture(sh: &Shell) -> Result<()> {
    println!("Checking {}...", FIXTURE);
    cmd!(sh, "cargo run --quiet --bin berth -- -f {FIXTURE} validate").run()?;
    cmd!(sh, "cargo run --quiet --bin berth -- -f {FIXTURE} plan").run()?;
    cmd!(sh, "cargo run --quiet --bin berth -- -f {FIXTURE} ports").run()?;
    Ok(())
}

fn doc(sh: &Shell, open: bool) -> Result<()> {
    let open = if open { Some("--open") } else { None };
    cmd!(sh, "cargo doc --no-deps --package berth {open...}").run()?;
    Ok(())
}

fn ci(sh: &Shell) -> Result<()> {
    println!("[1/4] Format check");
    fmt(sh, true)?;

    println!("[2/4] Lint");
    lint(sh)?;

    println!("[3/4] Tests");
    test(sh)?;

    println!("[4/4] Fixture");
    fixture(sh)?;

    println!("CI checks passed");
    Ok(())
}
