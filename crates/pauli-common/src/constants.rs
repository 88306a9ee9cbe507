//! System-wide constants and default paths.

use std::path::PathBuf;
use std::sync::OnceLock;
use std::time::Duration;

/// Directory holding the project's pauli files.
pub const PROJECT_DIR: &str = ".pauli";

/// Default path of the build configuration, relative to the project root.
pub const CONFIG_FILE: &str = ".pauli/config.yaml";

/// Path of the project script, relative to the project root.
pub const SCRIPT_FILE: &str = ".pauli/pauli.sh";

/// Where the starter script is downloaded from by `pauli init`.
pub const SCRIPT_URL: &str = "https://github.com/mercierc/pauli/raw/main/data/pauli.sh";

/// Mount target of the project directory, also the exec working directory.
pub const WORKDIR: &str = "/app";

/// Startup command that keeps a build container alive between exec sessions.
pub const DORMANCY_COMMAND: [&str; 2] = ["sleep", "infinity"];

/// Suffix appended to the project directory name to form the container name.
pub const CONTAINER_SUFFIX: &str = "_build";

/// Image tag used when none is given to `pauli init`.
pub const DEFAULT_TAG: &str = "latest";

/// Placeholder written by `pauli init` when no build image is given.
pub const IMAGE_PLACEHOLDER: &str = "<image_name>";

/// Grace period granted to a container on stop before the engine kills it.
pub const STOP_TIMEOUT: Duration = Duration::from_secs(1);

/// Interval between two exec status polls.
pub const POLL_INTERVAL: Duration = Duration::from_secs(1);

/// Poll budget of the completion watcher (24 hours at the default interval).
pub const MAX_POLLS: u32 = 24 * 60 * 60;

/// How long an invocation waits for another one holding the same container name.
pub const LEASE_TIMEOUT: Duration = Duration::from_secs(300);

/// Fallback data directory when no home directory is usable.
pub const FALLBACK_DATA_DIR: &str = "/tmp/pauli";

/// Returns the data directory, preferring `$HOME/.pauli` and falling back
/// to `/tmp/pauli`.
fn resolve_data_dir() -> PathBuf {
    if let Ok(home) = std::env::var("HOME").or_else(|_| std::env::var("USERPROFILE")) {
        let user_dir = PathBuf::from(home).join(".pauli");
        if std::fs::create_dir_all(&user_dir).is_ok() {
            return user_dir;
        }
    }
    PathBuf::from(FALLBACK_DATA_DIR)
}

static DATA_DIR: OnceLock<PathBuf> = OnceLock::new();

/// Returns the resolved data directory for this session.
pub fn data_dir() -> &'static PathBuf {
    DATA_DIR.get_or_init(resolve_data_dir)
}

/// Returns the directory holding container name lease records.
pub fn lease_dir() -> PathBuf {
    data_dir().join("leases")
}
