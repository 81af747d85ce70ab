//! Per-channel session settings

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use super::serde_utils::duration_secs;

/// Settings that shape how session channels start their processes
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionSettings {
    /// Interactive shells in order of preference; the first one present wins
    pub shell_candidates: Vec<PathBuf>,

    /// Shell used to run `exec` command lines (`<system_shell> -c <command>`)
    pub system_shell: PathBuf,

    /// Start interactive shells as login shells (`-l`)
    pub login_shell: bool,

    /// Working directory for child processes (inherits the server's when unset)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub working_dir: Option<PathBuf>,

    /// TERM value when the terminal request names none
    pub default_term: String,

    /// Extra environment variables for every child
    pub env: Vec<(String, String)>,

    /// How long to keep relaying output after the process exits
    #[serde(with = "duration_secs")]
    pub output_drain_timeout: Duration,

    /// Time between the hang-up signal and the forced kill on teardown
    #[serde(with = "duration_secs")]
    pub kill_grace_period: Duration,
}

impl Default for SessionSettings {
    fn default() -> Self {
        Self {
            shell_candidates: vec![PathBuf::from("/bin/bash"), PathBuf::from("/bin/sh")],
            system_shell: PathBuf::from("/bin/sh"),
            login_shell: true,
            working_dir: None,
            default_term: "xterm-256color".to_string(),
            env: Vec::new(),
            output_drain_timeout: Duration::from_secs(5),
            kill_grace_period: Duration::from_secs(2),
        }
    }
}

impl SessionSettings {
    /// Pick the interactive shell: the first candidate that exists on disk,
    /// falling back to the system shell
    pub fn resolve_shell(&self) -> Option<PathBuf> {
        self.shell_candidates
            .iter()
            .find(|candidate| is_executable(candidate))
            .cloned()
            .or_else(|| is_executable(&self.system_shell).then(|| self.system_shell.clone()))
    }

    /// Arguments passed to an interactive shell
    pub fn shell_args(&self) -> Vec<String> {
        if self.login_shell {
            vec!["-l".to_string()]
        } else {
            Vec::new()
        }
    }
}

fn is_executable(path: &Path) -> bool {
    std::fs::metadata(path)
        .map(|meta| meta.is_file())
        .unwrap_or(false)
}
