//! CLI command definitions and dispatch.

pub mod init;
pub mod script;
pub mod shell;

use std::path::PathBuf;

use clap::{Parser, Subcommand};
use pauli_common::constants::CONFIG_FILE;

use crate::logging::LogLevel;
use crate::project::Project;

/// pauli — run project scripts in a reproducible build container.
#[derive(Parser, Debug)]
#[command(name = "pauli", version, about, long_about = None)]
pub struct Cli {
    /// Subcommand to execute.
    #[command(subcommand)]
    pub command: Command,

    /// Path to the build configuration, relative to the project root.
    #[arg(long, global = true, default_value = CONFIG_FILE)]
    pub config: PathBuf,

    /// Log verbosity; `RUST_LOG` takes precedence.
    #[arg(long, global = true, value_enum, default_value_t = LogLevel::Info)]
    pub log: LogLevel,

    /// Log JSON lines instead of human-readable text.
    #[arg(long, global = true)]
    pub json: bool,
}

/// Available CLI subcommands.
#[derive(Subcommand, Debug)]
pub enum Command {
    /// Create the .pauli folder with config.yaml and pauli.sh.
    Init(init::InitArgs),
    /// Execute the build function from pauli.sh.
    Build(script::ScriptArgs),
    /// Execute the run function from pauli.sh.
    Run(script::ScriptArgs),
    /// Execute the clean function from pauli.sh.
    Clean(script::ScriptArgs),
    /// Execute the lint function from pauli.sh.
    Lint(script::ScriptArgs),
    /// Execute the unittests function from pauli.sh.
    Unittests(script::ScriptArgs),
    /// Execute the inttests function from pauli.sh.
    Inttests(script::ScriptArgs),
    /// Execute the staticanalysis function from pauli.sh.
    Staticanalysis(script::ScriptArgs),
    /// Open an interactive shell in the build container.
    Shell(shell::ShellArgs),
}

/// Dispatches the parsed CLI command to its handler.
///
/// Returns the exit status of the process.
///
/// # Errors
///
/// Returns an error if the command execution fails.
pub async fn execute(cli: Cli) -> anyhow::Result<i32> {
    let project = Project::current(&cli.config)?;
    match cli.command {
        Command::Init(args) => init::execute(&project, args).await,
        Command::Build(args) => script::execute(&project, "build", args).await,
        Command::Run(args) => script::execute(&project, "run", args).await,
        Command::Clean(args) => script::execute(&project, "clean", args).await,
        Command::Lint(args) => script::execute(&project, "lint", args).await,
        Command::Unittests(args) => script::execute(&project, "unittests", args).await,
        Command::Inttests(args) => script::execute(&project, "inttests", args).await,
        Command::Staticanalysis(args) => {
            script::execute(&project, "staticanalysis", args).await
        }
        Command::Shell(args) => shell::execute(&project, args).await,
    }
}

#[cfg(test)]
mod tests {
    use clap::CommandFactory;

    use super::*;

    #[test]
    fn cli_definition_is_consistent() {
        Cli::command().debug_assert();
    }

    #[test]
    fn script_args_pass_through_hyphenated_values() {
        let cli = Cli::try_parse_from([
            "pauli", "build", "-e", "A=1", "--env", "B=2", "--", "--release", "-v",
        ])
        .unwrap();
        let Command::Build(args) = cli.command else {
            panic!("expected build");
        };
        assert_eq!(args.env, ["A=1", "B=2"]);
        assert_eq!(args.args, ["--release", "-v"]);
    }

    #[test]
    fn global_flags_apply_after_subcommand() {
        let cli = Cli::try_parse_from(["pauli", "lint", "--log", "debug", "--json"]).unwrap();
        assert_eq!(cli.log, LogLevel::Debug);
        assert!(cli.json);
        assert_eq!(cli.config, PathBuf::from(CONFIG_FILE));
    }

    #[test]
    fn keep_running_conflicts_with_rm() {
        assert!(Cli::try_parse_from(["pauli", "build", "--keep-running", "--rm"]).is_err());
    }

    #[test]
    fn shell_defaults_to_sh() {
        let cli = Cli::try_parse_from(["pauli", "shell"]).unwrap();
        let Command::Shell(args) = cli.command else {
            panic!("expected shell");
        };
        assert_eq!(args.shell, shell::ShellKind::Sh);
        assert!(Cli::try_parse_from(["pauli", "shell", "zsh"]).is_err());
    }
}
