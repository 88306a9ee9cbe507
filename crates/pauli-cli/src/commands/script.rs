//! `pauli build|run|clean|lint|unittests|inttests|staticanalysis`: run a
//! function of `.pauli/pauli.sh` in the build container.

use std::time::{Duration, Instant};

use anyhow::Context;
use clap::Args;
use pauli_common::constants::{LEASE_TIMEOUT, SCRIPT_FILE, lease_dir};
use pauli_runtime::assemble::{Assembled, Overrides, assemble};
use pauli_runtime::backend;
use pauli_runtime::lease::Lease;
use pauli_runtime::orchestrator::{Orchestrator, OrchestratorSettings, Teardown};

use crate::output;
use crate::project::Project;

/// Exit status reported when the run is interrupted with Ctrl-C.
pub const INTERRUPTED_STATUS: i32 = 130;

/// Arguments shared by the script subcommands.
#[derive(Args, Debug, Clone, Default)]
pub struct ScriptArgs {
    /// Environment entry passed to the container (repeatable).
    #[arg(short, long = "env", value_name = "KEY=VALUE")]
    pub env: Vec<String>,

    /// Container name (default: <project dir>_build).
    #[arg(long)]
    pub name: Option<String>,

    /// Leave the container running after the script.
    #[arg(long, conflicts_with = "rm")]
    pub keep_running: bool,

    /// Remove the container after the script.
    #[arg(long)]
    pub rm: bool,

    /// Stop waiting for the script after this many seconds.
    #[arg(long, value_name = "SECS")]
    pub exec_timeout: Option<u64>,

    /// Arguments passed to the script function.
    #[arg(trailing_var_arg = true, allow_hyphen_values = true)]
    pub args: Vec<String>,
}

impl ScriptArgs {
    fn settings(&self) -> OrchestratorSettings {
        let mut settings = OrchestratorSettings {
            keep_running: self.keep_running,
            ..OrchestratorSettings::default()
        };
        if let Some(secs) = self.exec_timeout {
            settings.max_polls = polls_for(Duration::from_secs(secs), settings.poll_interval);
        }
        settings
    }

    const fn teardown(&self) -> Teardown {
        if self.rm { Teardown::Remove } else { Teardown::Keep }
    }
}

fn polls_for(timeout: Duration, interval: Duration) -> u32 {
    let interval = interval.max(Duration::from_millis(1)).as_millis();
    let polls = timeout.as_millis().div_ceil(interval).max(1);
    u32::try_from(polls).unwrap_or(u32::MAX)
}

/// Command run in the container for a script function.
pub fn script_command(function: &str, args: &[String]) -> Vec<String> {
    ["/bin/sh", SCRIPT_FILE, function]
        .into_iter()
        .map(str::to_owned)
        .chain(args.iter().cloned())
        .collect()
}

/// Executes a script subcommand, returning the script's exit status.
///
/// # Errors
///
/// Returns an error if the project files are missing or invalid, or if the
/// container cannot be provisioned.
pub async fn execute(project: &Project, function: &str, args: ScriptArgs) -> anyhow::Result<i32> {
    project.check_files(true)?;
    let spec = project.load_spec()?;
    let overrides = Overrides {
        name: args.name.clone(),
        env: args.env.clone(),
        entrypoint: None,
        command: script_command(function, &args.args),
    };
    let Assembled { config, request } = assemble(&spec, &overrides, &project.dir)?;
    let request = request.context("no command to run")?;
    let container = config.name.clone();

    let backend = backend::connect()?;
    let _lease = Lease::acquire(&lease_dir(), &container, LEASE_TIMEOUT).await?;
    let started = Instant::now();

    let mut orchestrator = Orchestrator::new(backend, config, args.settings());
    let _ = orchestrator.create_or_resolve().await?;
    orchestrator.start().await?;

    let interrupt = orchestrator.interrupt_handle();
    let outcome = tokio::select! {
        outcome = orchestrator.exec(&request) => outcome?,
        signal = tokio::signal::ctrl_c() => {
            signal.context("cannot listen for Ctrl-C")?;
            interrupt.stop().await?;
            output::interrupted(function, &container);
            return Ok(INTERRUPTED_STATUS);
        }
    };
    orchestrator.teardown(args.teardown()).await?;

    let status = outcome.exit_status();
    output::finished(function, status, started.elapsed());
    Ok(status)
}
