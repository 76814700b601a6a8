use std::ffi::{OsStr, OsString};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::process::process_invoker::ProcessInvoker;
use crate::shared::constants::{PROBE_TIMEOUT, PYTHON_CANDIDATES, PYTHON_FALLBACK};

/// The interpreter chosen at startup.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ResolvedExecutable {
    pub program: OsString,
    /// False when no candidate answered and the fallback was taken blind.
    pub probed: bool,
}

/// Resolve the worker runtime once, probing candidates in order.
///
/// Resolution order:
/// 1. First candidate whose `<candidate> --version` exits with code 0
/// 2. `fallback`, unverified
pub fn resolve<S: AsRef<OsStr>>(
    candidates: &[S],
    fallback: impl AsRef<OsStr>,
    probe_timeout: Duration,
) -> ResolvedExecutable {
    let invoker = ProcessInvoker::new();
    for candidate in candidates {
        let candidate = candidate.as_ref();
        let outcome = invoker.run(candidate, &["--version"], probe_timeout);
        if outcome.is_success() {
            log::info!("Worker runtime: {}", candidate.to_string_lossy());
            return ResolvedExecutable {
                program: candidate.to_os_string(),
                probed: true,
            };
        }
        log::debug!(
            "Runtime candidate {} rejected: {outcome:?}",
            candidate.to_string_lossy()
        );
    }

    let fallback = fallback.as_ref();
    log::warn!(
        "No runtime candidate responded; falling back to {}",
        fallback.to_string_lossy()
    );
    ResolvedExecutable {
        program: fallback.to_os_string(),
        probed: false,
    }
}

/// [`resolve`] with the default Python candidates.
pub fn resolve_python() -> ResolvedExecutable {
    resolve(PYTHON_CANDIDATES, PYTHON_FALLBACK, PROBE_TIMEOUT)
}

/// Directory holding the worker scripts: `<exe dir>/../python`.
pub fn default_script_dir() -> Option<PathBuf> {
    let exe = std::env::current_exe().ok()?;
    Some(exe.parent()?.join("..").join("python"))
}

/// An interpreter plus the script it runs: `<program> <script> <args...>`.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct WorkerCommand {
    pub program: OsString,
    pub script: PathBuf,
}

impl WorkerCommand {
    pub fn new(program: impl Into<OsString>, script: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
            script: script.into(),
        }
    }

    pub fn in_dir(resolved: &ResolvedExecutable, script_dir: &Path, script_name: &str) -> Self {
        Self::new(resolved.program.clone(), script_dir.join(script_name))
    }

    /// Full argument list: the script path followed by `extra`.
    pub fn args<I, S>(&self, extra: I) -> Vec<OsString>
    where
        I: IntoIterator<Item = S>,
        S: Into<OsString>,
    {
        std::iter::once(self.script.clone().into_os_string())
            .chain(extra.into_iter().map(Into::into))
            .collect()
    }
}
