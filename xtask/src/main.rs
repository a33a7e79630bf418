//! Workspace automation for leasepool.
//!
//! Run with `cargo xtask <command>`:
//!
//! - `ci`: formatting, clippy, tests and docs, failing on any warning
//! - `fmt`: check formatting, or apply it with `--fix`
//! - `clippy`: lint every target with warnings denied
//! - `test`: run the test suites, optionally for one package or in release
//! - `doc`: build the API docs
//! - `bench`: run the pool benchmarks

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use xshell::{Shell, cmd};

#[derive(Parser)]
#[command(name = "xtask", about = "Workspace automation for leasepool")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run every check CI runs
    Ci,
    /// Check formatting (--fix to apply)
    Fmt {
        /// Rewrite files instead of checking
        #[arg(long)]
        fix: bool,
    },
    /// Lint all targets with warnings denied
    Clippy,
    /// Run the test suites
    Test {
        /// Only test this package
        #[arg(short, long)]
        package: Option<String>,
        /// Build in release mode; the threaded stress tests hit more interleavings
        #[arg(long)]
        release: bool,
    },
    /// Build the API docs
    Doc {
        /// Open the docs in a browser
        #[arg(long)]
        open: bool,
    },
    /// Run the pool benchmarks
    Bench {
        /// Only run benchmarks matching this filter (e.g. `proxy_invoke`)
        filter: Option<String>,
    },
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    let sh = Shell::new()?;
    sh.change_dir(workspace_root()?);

    match cli.command {
        Command::Ci => {
            fmt(&sh, false)?;
            clippy(&sh)?;
            test(&sh, None, false)?;
            doc(&sh, false)?;
            println!("\n✅ CI checks passed.");
        }
        Command::Fmt { fix } => fmt(&sh, fix)?,
        Command::Clippy => clippy(&sh)?,
        Command::Test { package, release } => test(&sh, package.as_deref(), release)?,
        Command::Doc { open } => doc(&sh, open)?,
        Command::Bench { filter } => bench(&sh, filter.as_deref())?,
    }

    Ok(())
}

/// The xtask crate lives one level below the workspace root.
fn workspace_root() -> Result<PathBuf> {
    Path::new(env!("CARGO_MANIFEST_DIR"))
        .parent()
        .map(Path::to_path_buf)
        .context("xtask manifest has no parent directory")
}

fn step(name: &str) {
    println!("==> {name}");
}

fn fmt(sh: &Shell, fix: bool) -> Result<()> {
    step("fmt");
    let check: &[&str] = if fix { &[] } else { &["--", "--check"] };
    cmd!(sh, "cargo fmt --all {check...}").run()?;
    Ok(())
}

fn clippy(sh: &Shell) -> Result<()> {
    step("clippy");
    cmd!(sh, "cargo clippy --workspace --all-targets -- -D warnings").run()?;
    Ok(())
}

fn test(sh: &Shell, package: Option<&str>, release: bool) -> Result<()> {
    step("test");
    let scope: Vec<&str> = match package {
        Some(pkg) => vec!["-p", pkg],
        None => vec!["--workspace"],
    };
    let scope_ref = &scope;
    let profile: &[&str] = if release { &["--release"] } else { &[] };
    cmd!(sh, "cargo test {scope_ref...} --all-targets {profile...}").run()?;
    // `--all-targets` skips doctests.
    cmd!(sh, "cargo test {scope...} --doc").run()?;
    Ok(())
}

fn doc(sh: &Shell, open: bool) -> Result<()> {
    step("doc");
    let open: &[&str] = if open { &["--open"] } else { &[] };
    cmd!(sh, "cargo doc --workspace --no-deps {open...}")
        .env("RUSTDOCFLAGS", "-D warnings")
        .run()?;
    Ok(())
}

fn bench(sh: &Shell, filter: Option<&str>) -> Result<()> {
    step("bench");
    let filter: Vec<&str> = filter.into_iter().collect();
    cmd!(sh, "cargo bench -p leasepool --bench pool -- {filter...}").run()?;
    Ok(())
}
