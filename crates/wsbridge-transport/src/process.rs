use std::ffi::OsStr;
use std::fmt;
use std::process::{ExitStatus, Stdio};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use tokio::process::{Child, ChildStderr, ChildStdin, ChildStdout, Command};
use tokio::sync::watch;
use tracing::{debug, error};

use crate::error::{Result, TransportError};

/// Signals the termination ladder can deliver to a child.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Signal {
    /// `SIGINT`
    Interrupt,
    /// `SIGTERM`
    Terminate,
    /// `SIGKILL`
    Kill,
}

impl Signal {
    #[cfg(unix)]
    fn raw(self) -> libc::c_int {
        match self {
            Signal::Interrupt => libc::SIGINT,
            Signal::Terminate => libc::SIGTERM,
            Signal::Kill => libc::SIGKILL,
        }
    }
}

impl fmt::Display for Signal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Signal::Interrupt => "SIGINT",
            Signal::Terminate => "SIGTERM",
            Signal::Kill => "SIGKILL",
        };
        f.write_str(name)
    }
}

/// Signal delivery to a running process.
pub trait ProcessSignals: Send + Sync {
    /// OS process id.
    fn pid(&self) -> u32;

    /// Deliver `signal` to the process.
    fn signal(&self, signal: Signal) -> Result<()>;
}

/// The child stays in its slot until the exit watcher reaps it. Holding the
/// slot lock therefore pins the pid: it cannot be recycled while locked.
type ChildSlot = Arc<Mutex<Option<Child>>>;

fn lock(slot: &ChildSlot) -> MutexGuard<'_, Option<Child>> {
    slot.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Signal handle for a launched child.
///
/// Signals are refused with [`TransportError::Exited`] once the child has
/// been reaped, so a recycled pid is never signalled.
#[derive(Debug, Clone)]
pub struct OsProcess {
    pid: u32,
    child: ChildSlot,
}

impl ProcessSignals for OsProcess {
    fn pid(&self) -> u32 {
        self.pid
    }

    #[cfg(unix)]
    fn signal(&self, signal: Signal) -> Result<()> {
        let slot = lock(&self.child);
        if slot.is_none() {
            return Err(TransportError::Exited { pid: self.pid });
        }

        let pid = libc::pid_t::try_from(self.pid).map_err(|_| TransportError::Signal {
            signal,
            pid: self.pid,
            source: std::io::Error::new(std::io::ErrorKind::InvalidInput, "pid out of range"),
        })?;

        // SAFETY: kill(2) takes plain integers and has no memory-safety
        // preconditions. The child is unreaped while `slot` is held.
        let rc = unsafe { libc::kill(pid, signal.raw()) };
        let result = if rc == 0 {
            Ok(())
        } else {
            Err(TransportError::Signal {
                signal,
                pid: self.pid,
                source: std::io::Error::last_os_error(),
            })
        };
        drop(slot);
        result
    }

    #[cfg(not(unix))]
    fn signal(&self, signal: Signal) -> Result<()> {
        Err(TransportError::Signal {
            signal,
            pid: self.pid,
            source: std::io::Error::new(
                std::io::ErrorKind::Unsupported,
                "signal delivery requires a Unix platform",
            ),
        })
    }
}

/// Sending half of an [`ExitWatch`]; fired once when the process has exited.
#[derive(Debug)]
pub struct ExitNotifier {
    tx: watch::Sender<bool>,
}

impl ExitNotifier {
    pub fn notify_exited(&self) {
        self.tx.send_replace(true);
    }
}

/// Completion event for a process exit. Cheap to clone; every clone observes
/// the same event.
#[derive(Debug, Clone)]
pub struct ExitWatch {
    rx: watch::Receiver<bool>,
}

impl ExitWatch {
    /// Create a connected notifier/watch pair.
    pub fn channel() -> (ExitNotifier, ExitWatch) {
        let (tx, rx) = watch::channel(false);
        (ExitNotifier { tx }, ExitWatch { rx })
    }

    /// Whether the exit has already been observed.
    pub fn has_exited(&self) -> bool {
        *self.rx.borrow()
    }

    /// Resolve once the process has exited.
    ///
    /// If the notifier is dropped without ever firing (the wait itself
    /// failed), this never resolves; callers race it against a deadline.
    pub async fn exited(&mut self) {
        let fired = self.rx.wait_for(|exited| *exited).await.is_ok();
        if !fired {
            std::future::pending::<()>().await;
        }
    }
}

/// A running child process with all three standard streams piped.
#[derive(Debug)]
pub struct LaunchedProcess {
    child: Child,
    pid: u32,
    stdin: ChildStdin,
    stdout: ChildStdout,
    stderr: ChildStderr,
}

/// The pieces of a [`LaunchedProcess`] once its exit watcher is running.
#[derive(Debug)]
pub struct ProcessParts {
    pub handle: OsProcess,
    pub stdin: ChildStdin,
    pub stdout: ChildStdout,
    pub stderr: ChildStderr,
    pub exit: ExitWatch,
}

impl LaunchedProcess {
    /// Spawn `program` with `args`, piping stdin, stdout and stderr.
    pub fn launch<I, S>(program: impl AsRef<OsStr>, args: I) -> Result<Self>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<OsStr>,
    {
        let mut command = Command::new(program.as_ref());
        command.args(args);
        Self::spawn(&mut command)
    }

    /// Spawn a prepared command. Standard streams are always overridden to pipes.
    pub fn spawn(command: &mut Command) -> Result<Self> {
        let program = command.as_std().get_program().to_os_string();
        let mut child = command
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(false)
            .spawn()
            .map_err(|source| TransportError::Spawn {
                program: program.clone(),
                source,
            })?;

        let pid = child
            .id()
            .ok_or_else(|| TransportError::Io(std::io::Error::other("child exited before pid")))?;
        let stdin = child.stdin.take().ok_or(TransportError::MissingPipe("stdin"))?;
        let stdout = child
            .stdout
            .take()
            .ok_or(TransportError::MissingPipe("stdout"))?;
        let stderr = child
            .stderr
            .take()
            .ok_or(TransportError::MissingPipe("stderr"))?;

        debug!(?program, pid, "launched process");

        Ok(Self {
            child,
            pid,
            stdin,
            stdout,
            stderr,
        })
    }

    pub fn pid(&self) -> u32 {
        self.pid
    }

    /// Split into streams and a signal handle, handing the child to a
    /// background task that reaps it and fires the exit watch.
    ///
    /// Must be called from within a Tokio runtime.
    pub fn into_parts(self) -> ProcessParts {
        let (notifier, exit) = ExitWatch::channel();
        let child: ChildSlot = Arc::new(Mutex::new(Some(self.child)));

        tokio::spawn(watch_exit(child.clone(), self.pid, notifier));

        ProcessParts {
            handle: OsProcess {
                pid: self.pid,
                child,
            },
            stdin: self.stdin,
            stdout: self.stdout,
            stderr: self.stderr,
            exit,
        }
    }
}

/// Reap the child without ever leaving it unlocked between "exited" and
/// "slot cleared". Woken by `SIGCHLD`, which is registered before the first
/// check so no exit is missed.
#[cfg(unix)]
async fn watch_exit(slot: ChildSlot, pid: u32, notifier: ExitNotifier) {
    use tokio::signal::unix::{signal, SignalKind};

    let mut sigchld = match signal(SignalKind::child()) {
        Ok(stream) => stream,
        Err(err) => {
            error!(pid, error = %err, "cannot watch for process exit");
            return;
        }
    };

    loop {
        match try_reap(&slot) {
            Ok(Some(status)) => {
                debug!(pid, status = %describe_status(status), "process exited");
                notifier.notify_exited();
                return;
            }
            Ok(None) => {}
            Err(err) => {
                error!(pid, error = %err, "waiting for process exit failed");
                return;
            }
        }
        if sigchld.recv().await.is_none() {
            error!(pid, "SIGCHLD stream ended before process exit");
            return;
        }
    }
}

#[cfg(unix)]
fn try_reap(slot: &ChildSlot) -> std::io::Result<Option<ExitStatus>> {
    let mut slot = lock(slot);
    let Some(child) = slot.as_mut() else {
        return Ok(None);
    };
    let status = child.try_wait()?;
    if status.is_some() {
        *slot = None;
    }
    Ok(status)
}

#[cfg(not(unix))]
async fn watch_exit(slot: ChildSlot, pid: u32, notifier: ExitNotifier) {
    // Signals are unsupported here, so nothing else needs the slot.
    let Some(mut child) = lock(&slot).take() else {
        return;
    };
    match child.wait().await {
        Ok(status) => {
            debug!(pid, status = %describe_status(status), "process exited");
            notifier.notify_exited();
        }
        Err(err) => {
            error!(pid, error = %err, "waiting for process exit failed");
        }
    }
}

fn describe_status(status: ExitStatus) -> String {
    if let Some(code) = status.code() {
        return format!("exit code {code}");
    }
    #[cfg(unix)]
    {
        use std::os::unix::process::ExitStatusExt;
        if let Some(signal) = status.signal() {
            return format!("killed by signal {signal}");
        }
    }
    status.to_string()
}
