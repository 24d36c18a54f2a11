//! Escalating shutdown ladder for a child process.
//!
//! Each step acts, then races the process's exit event against its own
//! deadline:
//!
//! | Step | Action        | Wait                   |
//! |------|---------------|------------------------|
//! | 1    | close stdin   | 100ms + close time     |
//! | 2    | `SIGINT`      | 250ms + close time     |
//! | 3    | `SIGTERM`     | 500ms + close time     |
//! | 4    | `SIGKILL`     | 1000ms                 |
//!
//! Signal delivery failures in steps 2 and 3 are logged and the ladder moves
//! on. A failed `SIGKILL` ends the ladder immediately. A process that exits
//! between a deadline and the next signal is never signalled again; the
//! ladder reports the step it exited after.

use std::future::Future;
use std::time::Duration;

use tracing::{debug, error};
use wsbridge_transport::{ExitWatch, ProcessSignals, Signal, TransportError};

pub const STDIN_CLOSE_GRACE: Duration = Duration::from_millis(100);
pub const INTERRUPT_GRACE: Duration = Duration::from_millis(250);
pub const TERMINATE_GRACE: Duration = Duration::from_millis(500);
pub const KILL_GRACE: Duration = Duration::from_millis(1000);

/// Which step of the ladder ended it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TerminationOutcome {
    /// Exited after stdin was closed.
    StdinClosed,
    /// Exited after `SIGINT`.
    Interrupted,
    /// Exited after `SIGTERM`.
    Terminated,
    /// Exited after `SIGKILL`.
    Killed,
    /// `SIGKILL` could not be delivered.
    KillFailed,
    /// Still running after `SIGKILL` and its grace period.
    Unkillable,
}

impl TerminationOutcome {
    /// Whether the process is known to have exited.
    pub fn exited(self) -> bool {
        !matches!(
            self,
            TerminationOutcome::KillFailed | TerminationOutcome::Unkillable
        )
    }
}

/// Run the ladder against `process`.
///
/// `close_stdin` performs step 1. Returns once the process has exited or the
/// last step has been attempted; the total time is bounded by the sum of the
/// step waits.
pub async fn terminate<P, F>(
    process: &P,
    close_stdin: F,
    mut exit: ExitWatch,
    close_time: Duration,
) -> TerminationOutcome
where
    P: ProcessSignals + ?Sized,
    F: Future<Output = ()>,
{
    let pid = process.pid();

    // Well-behaved processes exit on their own once stdin closes.
    close_stdin.await;
    if wait_for_exit(&mut exit, STDIN_CLOSE_GRACE + close_time).await {
        debug!(pid, "process terminated after stdin was closed");
        return TerminationOutcome::StdinClosed;
    }

    let escalation = [
        (Signal::Interrupt, INTERRUPT_GRACE, TerminationOutcome::Interrupted),
        (Signal::Terminate, TERMINATE_GRACE, TerminationOutcome::Terminated),
    ];
    let mut previous = TerminationOutcome::StdinClosed;
    for (signal, grace, outcome) in escalation {
        match deliver(process, &exit, signal) {
            Delivery::Sent => {}
            Delivery::AlreadyExited => return previous,
            Delivery::Failed(err) => {
                // The process may already be gone.
                error!(pid, %signal, error = %err, "signal delivery unsuccessful");
            }
        }
        if wait_for_exit(&mut exit, grace + close_time).await {
            debug!(pid, %signal, "process terminated after signal");
            return outcome;
        }
        previous = outcome;
    }

    match deliver(process, &exit, Signal::Kill) {
        Delivery::Sent => {}
        Delivery::AlreadyExited => return previous,
        Delivery::Failed(err) => {
            error!(pid, error = %err, "SIGKILL unsuccessful");
            return TerminationOutcome::KillFailed;
        }
    }
    if wait_for_exit(&mut exit, KILL_GRACE).await {
        debug!(pid, "process terminated after SIGKILL");
        return TerminationOutcome::Killed;
    }

    error!(pid, "SIGKILL did not terminate process");
    TerminationOutcome::Unkillable
}

enum Delivery {
    Sent,
    AlreadyExited,
    Failed(TransportError),
}

/// Signal the process unless it has exited since the last deadline.
fn deliver<P>(process: &P, exit: &ExitWatch, signal: Signal) -> Delivery
where
    P: ProcessSignals + ?Sized,
{
    if exit.has_exited() {
        debug!(pid = process.pid(), %signal, "process exited before signal was sent");
        return Delivery::AlreadyExited;
    }
    match process.signal(signal) {
        Ok(()) => Delivery::Sent,
        Err(TransportError::Exited { .. }) => {
            debug!(pid = process.pid(), %signal, "process reaped before signal was sent");
            Delivery::AlreadyExited
        }
        Err(err) => Delivery::Failed(err),
    }
}

async fn wait_for_exit(exit: &mut ExitWatch, grace: Duration) -> bool {
    tokio::time::timeout(grace, exit.exited()).await.is_ok()
}
