use std::ffi::OsStr;
use std::io::{self, Read};
use std::process::{Child, Command, ExitStatus, Stdio};
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use crossbeam_channel::{select, Receiver};
use thiserror::Error;

/// How often exit status is re-checked once both pipes have closed.
const REAP_POLL: Duration = Duration::from_millis(5);

#[derive(Error, Debug)]
pub enum StartFailure {
    #[error("executable not found: {0}")]
    NotFound(String),
    #[error("permission denied executing {0}")]
    PermissionDenied(String),
    #[error("could not spawn {program}: {source}")]
    Spawn {
        program: String,
        #[source]
        source: io::Error,
    },
    #[error("another invocation is already running on this invoker")]
    AlreadyRunning,
}

/// Result of one external command.
#[derive(Debug)]
pub enum ProcessOutcome {
    /// Orderly exit, zero or not. Interpreting the code is the caller's job.
    Completed {
        exit_code: i32,
        stdout: String,
        stderr: String,
    },
    /// Killed after running past the deadline.
    TimedOut { after: Duration },
    FailedToStart(StartFailure),
    /// Abnormal termination (signal) or a failure waiting on the child.
    Crashed { description: String },
    /// Killed because the caller's cancel channel fired.
    Cancelled,
}

impl ProcessOutcome {
    pub fn is_success(&self) -> bool {
        matches!(self, ProcessOutcome::Completed { exit_code: 0, .. })
    }
}

/// Runs one external command at a time with a hard deadline.
///
/// Waiting is a `select!` race between "both output pipes closed", the
/// deadline and an optional cancel channel. Whatever wins, the child is
/// reaped (and killed if needed) before `run` returns.
#[derive(Default)]
pub struct ProcessInvoker {
    running: AtomicBool,
}

impl ProcessInvoker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }

    pub fn run<P, S>(&self, program: P, args: &[S], timeout: Duration) -> ProcessOutcome
    where
        P: AsRef<OsStr>,
        S: AsRef<OsStr>,
    {
        self.run_cancellable(program, args, timeout, &crossbeam_channel::never())
    }

    /// Like [`run`](Self::run), but also stops when `cancel` receives a
    /// message or is disconnected. Dropping every sender is therefore a
    /// sticky cancellation that also affects invocations started later.
    pub fn run_cancellable<P, S>(
        &self,
        program: P,
        args: &[S],
        timeout: Duration,
        cancel: &Receiver<()>,
    ) -> ProcessOutcome
    where
        P: AsRef<OsStr>,
        S: AsRef<OsStr>,
    {
        let Some(_guard) = RunGuard::acquire(&self.running) else {
            log::error!("Overlapping invocation rejected");
            return ProcessOutcome::FailedToStart(StartFailure::AlreadyRunning);
        };

        let program = program.as_ref();
        let program_name = program.to_string_lossy().into_owned();
        log::debug!(
            "Running {program_name} {:?} (timeout {:?})",
            args.iter()
                .map(|a| a.as_ref().to_string_lossy())
                .collect::<Vec<_>>(),
            timeout
        );

        let deadline = crossbeam_channel::at(Instant::now() + timeout);
        let mut handle = match InvocationHandle::spawn(program, args) {
            Ok(h) => h,
            Err(e) => {
                let failure = classify_spawn_error(program_name, e);
                log::warn!("{failure}");
                return ProcessOutcome::FailedToStart(failure);
            }
        };

        let pipe_closed = handle.pipe_closed.clone();
        let mut open_pipes = 2;
        while open_pipes > 0 {
            select! {
                recv(pipe_closed) -> _ => open_pipes -= 1,
                recv(deadline) -> _ => {
                    handle.terminate();
                    log::warn!("{program_name} timed out after {timeout:?}, killed");
                    return ProcessOutcome::TimedOut { after: timeout };
                }
                recv(cancel) -> _ => {
                    handle.terminate();
                    log::debug!("{program_name} cancelled");
                    return ProcessOutcome::Cancelled;
                }
            }
        }

        // Pipes can close before the process exits (e.g. it closed its own
        // stdout), so the exit wait is bounded by the same deadline.
        let status = loop {
            match handle.child.try_wait() {
                Ok(Some(status)) => break status,
                Ok(None) => select! {
                    recv(deadline) -> _ => {
                        handle.terminate();
                        log::warn!("{program_name} timed out after {timeout:?}, killed");
                        return ProcessOutcome::TimedOut { after: timeout };
                    }
                    recv(cancel) -> _ => {
                        handle.terminate();
                        return ProcessOutcome::Cancelled;
                    }
                    default(REAP_POLL) => {}
                },
                Err(e) => {
                    handle.terminate();
                    return ProcessOutcome::Crashed {
                        description: format!("failed to wait for {program_name}: {e}"),
                    };
                }
            }
        };

        let (stdout, stderr) = handle.collect_output();
        match status.code() {
            Some(exit_code) => {
                if exit_code != 0 {
                    log::debug!("{program_name} exited with code {exit_code}");
                }
                ProcessOutcome::Completed {
                    exit_code,
                    stdout,
                    stderr,
                }
            }
            None => {
                let description = describe_abnormal_exit(&program_name, status);
                log::warn!("{description}");
                ProcessOutcome::Crashed { description }
            }
        }
    }
}

struct RunGuard<'a>(&'a AtomicBool);

impl<'a> RunGuard<'a> {
    fn acquire(flag: &'a AtomicBool) -> Option<Self> {
        flag.compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()
            .map(|_| RunGuard(flag))
    }
}

impl Drop for RunGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

/// A live child plus the threads draining its stdout and stderr.
///
/// Dropping the handle kills the child if it is still running.
struct InvocationHandle {
    child: Child,
    stdout: Option<JoinHandle<Vec<u8>>>,
    stderr: Option<JoinHandle<Vec<u8>>>,
    pipe_closed: Receiver<()>,
}

impl InvocationHandle {
    fn spawn<S: AsRef<OsStr>>(program: &OsStr, args: &[S]) -> io::Result<Self> {
        let mut command = Command::new(program);
        command
            .args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());
        #[cfg(unix)]
        {
            use std::os::unix::process::CommandExt;
            // Own group, so terminate() also reaches the worker's children.
            command.process_group(0);
        }
        let mut child = command.spawn()?;

        let (closed_tx, pipe_closed) = crossbeam_channel::bounded::<()>(2);
        let stdout = child
            .stdout
            .take()
            .map(|pipe| spawn_collector(pipe, closed_tx.clone()));
        let stderr = child
            .stderr
            .take()
            .map(|pipe| spawn_collector(pipe, closed_tx.clone()));
        // A pipe that was never opened counts as already closed.
        for missing in [stdout.is_none(), stderr.is_none()] {
            if missing {
                let _ = closed_tx.send(());
            }
        }

        Ok(Self {
            child,
            stdout,
            stderr,
            pipe_closed,
        })
    }

    fn terminate(&mut self) {
        #[cfg(unix)]
        kill_process_group(self.child.id());
        let _ = self.child.kill();
        let _ = self.child.wait();
    }

    fn collect_output(&mut self) -> (String, String) {
        (join_lossy(self.stdout.take()), join_lossy(self.stderr.take()))
    }
}

impl Drop for InvocationHandle {
    fn drop(&mut self) {
        if let Ok(None) = self.child.try_wait() {
            self.terminate();
        }
    }
}

/// SIGKILL every process in the group led by `pid`. Only called before the
/// leader is reaped, so the group id cannot have been recycled.
#[cfg(unix)]
fn kill_process_group(pid: u32) {
    let Ok(pgid) = libc::pid_t::try_from(pid) else {
        return;
    };
    // SAFETY: kill(2) takes plain integers and touches no memory.
    let rc = unsafe { libc::kill(-pgid, libc::SIGKILL) };
    if rc != 0 {
        log::debug!(
            "kill of process group {pgid} failed: {}",
            io::Error::last_os_error()
        );
    }
}

fn spawn_collector<R>(mut pipe: R, closed: crossbeam_channel::Sender<()>) -> JoinHandle<Vec<u8>>
where
    R: Read + Send + 'static,
{
    thread::spawn(move || {
        let mut buf = Vec::new();
        let _ = pipe.read_to_end(&mut buf);
        let _ = closed.send(());
        buf
    })
}

fn join_lossy(handle: Option<JoinHandle<Vec<u8>>>) -> String {
    handle
        .and_then(|h| h.join().ok())
        .map(|bytes| String::from_utf8_lossy(&bytes).into_owned())
        .unwrap_or_default()
}

fn classify_spawn_error(program: String, e: io::Error) -> StartFailure {
    match e.kind() {
        io::ErrorKind::NotFound => StartFailure::NotFound(program),
        io::ErrorKind::PermissionDenied => StartFailure::PermissionDenied(program),
        _ => StartFailure::Spawn { program, source: e },
    }
}

#[cfg(unix)]
fn describe_abnormal_exit(program: &str, status: ExitStatus) -> String {
    use std::os::unix::process::ExitStatusExt;
    match status.signal() {
        Some(signal) => format!("{program} terminated by signal {signal}"),
        None => format!("{program} terminated abnormally ({status})"),
    }
}

#[cfg(not(unix))]
fn describe_abnormal_exit(program: &str, status: ExitStatus) -> String {
    format!("{program} terminated abnormally ({status})")
}
