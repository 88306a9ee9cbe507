//! `pauli init` — create the `.pauli` project files.

use std::io::{self, BufRead, Write};
use std::os::unix::fs::PermissionsExt;
use std::path::Path;

use anyhow::Context;
use clap::Args;
use pauli_common::constants::{DEFAULT_TAG, IMAGE_PLACEHOLDER, SCRIPT_URL};

use crate::output;
use crate::project::Project;

/// Script written when the starter script cannot be downloaded.
const STARTER_SCRIPT: &str = r#"#!/bin/sh
# Functions run by `pauli <function>` inside the build container.
# The project is mounted at /app, which is also the working directory.

build() {
    echo "build: nothing to do yet, edit .pauli/pauli.sh"
}

run() {
    echo "run: nothing to do yet, edit .pauli/pauli.sh"
}

clean() {
    echo "clean: nothing to do yet, edit .pauli/pauli.sh"
}

lint() {
    echo "lint: nothing to do yet, edit .pauli/pauli.sh"
}

unittests() {
    echo "unittests: nothing to do yet, edit .pauli/pauli.sh"
}

inttests() {
    echo "inttests: nothing to do yet, edit .pauli/pauli.sh"
}

staticanalysis() {
    echo "staticanalysis: nothing to do yet, edit .pauli/pauli.sh"
}

step="$1"
shift
case "$step" in
    build|run|clean|lint|unittests|inttests|staticanalysis)
        "$step" "$@"
        ;;
    *)
        echo "unknown function: $step" >&2
        exit 1
        ;;
esac
"#;

/// Arguments for the `init` command.
#[derive(Args, Debug, Default)]
pub struct InitArgs {
    /// Project name; prompted for when omitted.
    #[arg(long)]
    pub name: Option<String>,

    /// Build image; prompted for when omitted.
    #[arg(long)]
    pub image: Option<String>,

    /// Build image tag; prompted for when omitted.
    #[arg(long)]
    pub tag: Option<String>,

    /// Overwrite existing project files.
    #[arg(long)]
    pub force: bool,

    /// Write the built-in starter script instead of downloading it.
    #[arg(long)]
    pub offline: bool,
}

/// Values the configuration is rendered from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Answers {
    /// Project name.
    pub name: String,
    /// Build image.
    pub image: String,
    /// Build image tag.
    pub tag: String,
}

/// Prompts on `prompts` for every value `args` leaves open.
///
/// An empty answer selects the default shown in brackets.
///
/// # Errors
///
/// Returns an error if reading the answers or writing the prompts fails.
pub fn ask<R: BufRead, W: Write>(
    mut input: R,
    mut prompts: W,
    args: &InitArgs,
    default_name: &str,
) -> io::Result<Answers> {
    let mut prompt = |label: &str, given: Option<&String>, default: &str| -> io::Result<String> {
        if let Some(value) = given {
            return Ok(value.clone());
        }
        write!(prompts, "{label} [{default}]: ")?;
        prompts.flush()?;
        let mut line = String::new();
        let _ = input.read_line(&mut line)?;
        let answer = line.trim();
        Ok(if answer.is_empty() { default } else { answer }.to_owned())
    };

    Ok(Answers {
        name: prompt("Project name", args.name.as_ref(), default_name)?,
        image: prompt("Build image", args.image.as_ref(), IMAGE_PLACEHOLDER)?,
        tag: prompt("Build image tag", args.tag.as_ref(), DEFAULT_TAG)?,
    })
}

fn quoted(value: &str) -> String {
    format!("\"{}\"", value.replace('\\', "\\\\").replace('"', "\\\""))
}

/// Renders the starter `config.yaml`.
pub fn render_config(answers: &Answers) -> String {
    format!(
        "builder:\n  \
           image: {}\n  \
           tag: {}\n  \
           privileged: true\n  \
           volumes:\n    \
             - type: bind\n      \
               source: /var/run/docker.sock\n      \
               target: /var/run/docker.sock\n\
         name: {}\n",
        quoted(&answers.image),
        quoted(&answers.tag),
        quoted(&answers.name),
    )
}

fn download_script(url: &str) -> anyhow::Result<Vec<u8>> {
    let client = reqwest::blocking::Client::new();
    let response = client.get(url).header("User-Agent", "pauli-cli").send()?;
    let status = response.status();
    if !status.is_success() {
        anyhow::bail!("download of {url} failed: HTTP {status}");
    }
    Ok(response.bytes()?.to_vec())
}

async fn starter_script(offline: bool) -> Vec<u8> {
    if offline {
        return STARTER_SCRIPT.as_bytes().to_vec();
    }
    let fetched = tokio::task::spawn_blocking(|| download_script(SCRIPT_URL))
        .await
        .map_err(anyhow::Error::from)
        .and_then(|result| result);
    match fetched {
        Ok(script) => {
            tracing::debug!(url = SCRIPT_URL, bytes = script.len(), "starter script downloaded");
            script
        }
        Err(e) => {
            tracing::warn!(url = SCRIPT_URL, error = %e, "cannot download starter script, writing the built-in one");
            STARTER_SCRIPT.as_bytes().to_vec()
        }
    }
}

/// Writes `content` to `path` unless it exists and `force` is unset.
///
/// Returns whether the file was written.
fn write_file(path: &Path, content: &[u8], force: bool) -> anyhow::Result<bool> {
    if path.exists() && !force {
        return Ok(false);
    }
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("cannot create {}", parent.display()))?;
    }
    std::fs::write(path, content).with_context(|| format!("cannot write {}", path.display()))?;
    Ok(true)
}

/// Writes the configuration and the script of `project`.
///
/// # Errors
///
/// Returns an error if a file cannot be written.
pub fn write_project(
    project: &Project,
    answers: &Answers,
    script: &[u8],
    force: bool,
) -> anyhow::Result<()> {
    let config = render_config(answers);
    let note = |written: bool| if written { "created" } else { "exists, kept" };

    let written = write_file(&project.config, config.as_bytes(), force)?;
    output::file_written(&project.config.display().to_string(), note(written));

    let script_path = project.script();
    let written = write_file(&script_path, script, force)?;
    if written {
        std::fs::set_permissions(&script_path, std::fs::Permissions::from_mode(0o755))
            .with_context(|| format!("cannot make {} executable", script_path.display()))?;
    }
    output::file_written(&script_path.display().to_string(), note(written));
    Ok(())
}

/// Executes the `init` command.
///
/// # Errors
///
/// Returns an error if the answers cannot be read or the files written.
pub async fn execute(project: &Project, args: InitArgs) -> anyhow::Result<i32> {
    let default_name = project
        .dir
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    let answers = ask(io::stdin().lock(), io::stderr(), &args, &default_name)?;
    tracing::debug!(?answers, "project answers");

    let script = starter_script(args.offline).await;
    write_project(project, &answers, &script, args.force)?;
    if answers.image == IMAGE_PLACEHOLDER {
        tracing::warn!(
            config = %project.config.display(),
            "no build image given, set builder.image before running scripts"
        );
    }
    Ok(0)
}
