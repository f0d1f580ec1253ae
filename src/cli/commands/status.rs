//! Status command - check external tools and the served directory

use crate::config::Config;
use crate::error::ReposerveResult;
use crate::process::CommandRunner;
use console::{style, Emoji};
use std::path::Path;
use std::time::Duration;

static CHECK: Emoji<'_, '_> = Emoji("✓ ", "[OK] ");
static CROSS: Emoji<'_, '_> = Emoji("✗ ", "[FAIL] ");
static WARN: Emoji<'_, '_> = Emoji("⚠ ", "[WARN] ");

/// Execute the status command
pub async fn execute(config: &Config) -> ReposerveResult<()> {
    println!("{}", style("Reposerve Status").bold().cyan());
    println!();

    let runner = CommandRunner::new(Duration::from_secs(config.vcs.command_timeout_secs.min(10)));
    let mut all_ok = true;

    println!("{}", style("Tools:").bold());
    all_ok &= check_tool(&runner, &config.vcs.git_bin, "Install git, or set vcs.git_bin").await;
    all_ok &= check_tool(&runner, &config.vcs.zip_bin, "Install zip, or set vcs.zip_bin").await;

    println!();
    println!("{}", style("Repositories:").bold());
    check_root(&config.server.root_dir);

    println!();
    if all_ok {
        println!("{}", style("All critical checks passed").green().bold());
    } else {
        println!(
            "{}",
            style("Some checks failed - see above for details").yellow().bold()
        );
    }

    Ok(())
}

async fn check_tool(runner: &CommandRunner, program: &str, install_hint: &str) -> bool {
    let cwd = std::env::temp_dir();
    let flag = if program.ends_with("zip") { "-v" } else { "--version" };
    match runner.run(program, &[flag], &cwd).await {
        Ok(output) if output.success => {
            let stdout = output.stdout_str();
            let first_line = stdout
                .lines()
                .map(str::trim)
                .find(|line| !line.is_empty())
                .unwrap_or("unknown");
            println!("  {} {} - {}", CHECK, style(program).green(), first_line);
            true
        }
        _ => {
            println!(
                "  {} {} - Not found. {}",
                CROSS,
                style(program).red(),
                install_hint
            );
            false
        }
    }
}

fn check_root(root: &Path) {
    let Ok(entries) = std::fs::read_dir(root) else {
        println!(
            "  {} {} - not a readable directory",
            WARN,
            style(root.display()).yellow()
        );
        return;
    };

    let repositories = entries
        .filter_map(Result::ok)
        .filter(|entry| entry.path().join(".git").exists())
        .count();
    println!(
        "  {} {} ({} git repositories)",
        CHECK,
        root.display(),
        repositories
    );
}
