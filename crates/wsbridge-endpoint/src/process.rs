use std::future::Future;
use std::io::ErrorKind;

use tokio::process::{ChildStderr, ChildStdin, ChildStdout};
use tokio::sync::{mpsc, Mutex};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info_span, trace, warn, Instrument};
use wsbridge_frame::{Frame, FrameError, FrameReader, FrameWriter};
use wsbridge_transport::{ExitWatch, LaunchedProcess, OsProcess, ProcessSignals};

use crate::config::EndpointConfig;
use crate::endpoint::{output_channel, publish, Endpoint, FrameReceiver};
use crate::termination::{self, TerminationOutcome};

/// Longest stderr line logged whole; the rest of the line is dropped.
pub const MAX_STDERR_LINE: usize = 64 * 1024;

/// Bridge endpoint backed by a child process's standard streams.
///
/// Stdout is decoded into frames per [`EndpointConfig::framing`]; stderr
/// lines are mirrored into the log at error level; `send` writes to stdin.
pub struct ProcessEndpoint {
    handle: OsProcess,
    stdin: Mutex<Option<FrameWriter<ChildStdin>>>,
    pending: Option<PendingStreams>,
    exit: ExitWatch,
    config: EndpointConfig,
    output: Option<FrameReceiver>,
    // Aborts in-flight stdin writes once termination starts.
    closing: CancellationToken,
    stop_readers: CancellationToken,
}

struct PendingStreams {
    stdout: ChildStdout,
    stderr: ChildStderr,
    tx: mpsc::Sender<Frame>,
}

impl ProcessEndpoint {
    /// Take ownership of a launched process.
    ///
    /// Must be called from within a Tokio runtime: the process's exit
    /// watcher starts immediately.
    pub fn new(process: LaunchedProcess, config: EndpointConfig) -> Self {
        let parts = process.into_parts();
        let (tx, rx) = output_channel();

        Self {
            handle: parts.handle,
            stdin: Mutex::new(Some(FrameWriter::new(parts.stdin))),
            pending: Some(PendingStreams {
                stdout: parts.stdout,
                stderr: parts.stderr,
                tx,
            }),
            exit: parts.exit,
            config,
            output: Some(rx),
            closing: CancellationToken::new(),
            stop_readers: CancellationToken::new(),
        }
    }

    pub fn pid(&self) -> u32 {
        self.handle.pid()
    }

    /// Whether the process has been observed to exit.
    pub fn has_exited(&self) -> bool {
        self.exit.has_exited()
    }

    /// Run the termination ladder, then stop the reader tasks.
    pub async fn terminate_process(&self) -> TerminationOutcome {
        self.closing.cancel();

        let close_stdin = async {
            // Dropping the writer closes the pipe.
            self.stdin.lock().await.take();
        };
        let outcome = termination::terminate(
            &self.handle,
            close_stdin,
            self.exit.clone(),
            self.config.close_time,
        )
        .await;

        self.stop_readers.cancel();
        outcome
    }

    async fn write_stdin(&self, frame: Frame) -> bool {
        let pid = self.pid();
        let mut stdin = tokio::select! {
            guard = self.stdin.lock() => guard,
            _ = self.closing.cancelled() => return false,
        };
        let Some(writer) = stdin.as_mut() else {
            trace!(pid, "process stdin already closed");
            return false;
        };

        let result = tokio::select! {
            result = writer.write_frame(&frame) => result,
            _ = self.closing.cancelled() => return false,
        };
        match result {
            Ok(()) => true,
            Err(FrameError::Io(err)) if err.kind() == ErrorKind::BrokenPipe => {
                debug!(pid, "process stdin closed by process");
                false
            }
            Err(err) => {
                error!(pid, error = %err, "unexpected error while writing process stdin");
                false
            }
        }
    }
}

impl Endpoint for ProcessEndpoint {
    fn output(&mut self) -> Option<FrameReceiver> {
        self.output.take()
    }

    fn send(&self, frame: Frame) -> impl Future<Output = bool> + Send {
        self.write_stdin(frame)
    }

    fn start_reading(&mut self) {
        let pid = self.pid();
        let Some(pending) = self.pending.take() else {
            warn!(pid, "process endpoint already reading");
            return;
        };

        let span = info_span!("process", pid);
        let mode = self.config.framing();

        tokio::spawn(
            drain_stderr(
                FrameReader::lines(pending.stderr, MAX_STDERR_LINE),
                self.stop_readers.clone(),
            )
            .instrument(span.clone()),
        );
        tokio::spawn(
            read_stdout(
                FrameReader::new(pending.stdout, mode),
                pending.tx,
                self.stop_readers.clone(),
            )
            .instrument(span),
        );
    }

    fn terminate(&self) -> impl Future<Output = ()> + Send {
        async move {
            self.terminate_process().await;
        }
    }
}

impl std::fmt::Debug for ProcessEndpoint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProcessEndpoint")
            .field("pid", &self.pid())
            .field("config", &self.config)
            .field("reading", &self.pending.is_none())
            .finish()
    }
}

/// Publish stdout frames until the stream ends, fails, or violates framing.
/// Dropping `tx` on return closes the output channel.
async fn read_stdout(
    mut reader: FrameReader<ChildStdout>,
    tx: mpsc::Sender<Frame>,
    stop: CancellationToken,
) {
    debug!(mode = reader.mode().as_str(), "reading process stdout");
    loop {
        let next = tokio::select! {
            _ = stop.cancelled() => {
                debug!("process stdout reader stopped");
                return;
            }
            next = reader.read_frame() => next,
        };

        match next {
            Ok(frame) => {
                if !publish(&tx, frame, &stop).await {
                    debug!("process output no longer consumed");
                    return;
                }
            }
            Err(FrameError::PayloadTooLarge { size, max }) => {
                error!(size, max, "oversized frame, terminating stdout reader");
                return;
            }
            Err(err) if err.is_closed() => {
                debug!(reason = %err, "process STDOUT closed");
                return;
            }
            Err(err) => {
                error!(error = %err, "unexpected error while reading STDOUT from process");
                return;
            }
        }
    }
}

async fn drain_stderr(mut reader: FrameReader<ChildStderr>, stop: CancellationToken) {
    loop {
        let next = tokio::select! {
            _ = stop.cancelled() => return,
            next = reader.read_frame() => next,
        };

        match next {
            Ok(line) => error!(stream = "stderr", "{}", String::from_utf8_lossy(line.as_ref())),
            Err(err) if err.is_closed() => {
                debug!("process STDERR closed");
                return;
            }
            Err(err) => {
                error!(error = %err, "unexpected error while reading STDERR from process");
                return;
            }
        }
    }
}

#[cfg(all(test, unix))]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::test_support::CapturedLogs;

    const WAIT: Duration = Duration::from_secs(5);

    fn sh(script: &str, config: EndpointConfig) -> ProcessEndpoint {
        let process = LaunchedProcess::launch("sh", ["-c", script]).expect("sh should spawn");
        ProcessEndpoint::new(process, config)
    }

    async fn drain(rx: &mut FrameReceiver) -> Vec<Frame> {
        let mut frames = Vec::new();
        loop {
            match tokio::time::timeout(WAIT, rx.recv()).await {
                Ok(Some(frame)) => frames.push(frame),
                Ok(None) => return frames,
                Err(_) => panic!("output channel did not close"),
            }
        }
    }

    #[tokio::test]
    async fn text_mode_emits_trimmed_lines_and_drops_tail() {
        let mut endpoint = sh(r"printf 'one\r\ntwo\n\nthree'", EndpointConfig::default());
        let mut rx = endpoint.output().unwrap();
        endpoint.start_reading();

        let frames = drain(&mut rx).await;
        let payloads: Vec<&[u8]> = frames.iter().map(|f| f.as_ref()).collect();
        assert_eq!(payloads, vec![&b"one"[..], &b"two"[..], &b""[..]]);
    }

    #[tokio::test]
    async fn binary_mode_preserves_all_bytes() {
        let config = EndpointConfig {
            binary: true,
            ..EndpointConfig::default()
        };
        let mut endpoint = sh(r"printf 'ab\ncd'; sleep 0.05; printf 'ef\r\n'", config);
        let mut rx = endpoint.output().unwrap();
        endpoint.start_reading();

        let joined: Vec<u8> = drain(&mut rx)
            .await
            .iter()
            .flat_map(|f| f.as_ref().to_vec())
            .collect();
        assert_eq!(joined, b"ab\ncdef\r\n");
    }

    #[tokio::test]
    async fn size_header_mode_emits_declared_payload() {
        let config = EndpointConfig {
            size_header: true,
            max_frame_size: 64,
            ..EndpointConfig::default()
        };
        let mut endpoint = sh(
            r"printf '\000\000\000\000\000\000\000\005hello\000\000\000\000\000\000\000\002ok'",
            config,
        );
        let mut rx = endpoint.output().unwrap();
        endpoint.start_reading();

        let frames = drain(&mut rx).await;
        let payloads: Vec<&[u8]> = frames.iter().map(|f| f.as_ref()).collect();
        assert_eq!(payloads, vec![&b"hello"[..], &b"ok"[..]]);
    }

    #[tokio::test]
    async fn oversized_frame_closes_output_without_terminating() {
        let config = EndpointConfig {
            size_header: true,
            max_frame_size: 5,
            ..EndpointConfig::default()
        };
        let mut endpoint = sh(
            r"printf '\000\000\000\000\000\000\000\005hello'; sleep 1",
            config,
        );
        let mut rx = endpoint.output().unwrap();
        endpoint.start_reading();

        let frames = drain(&mut rx).await;
        assert!(frames.is_empty());
        assert!(!endpoint.has_exited());

        endpoint.terminate_process().await;
    }

    #[tokio::test]
    async fn send_reaches_stdin_and_stdin_close_ends_cat() {
        let process = LaunchedProcess::launch("cat", std::iter::empty::<&str>()).unwrap();
        let mut endpoint = ProcessEndpoint::new(process, EndpointConfig::default());
        let mut rx = endpoint.output().unwrap();
        endpoint.start_reading();

        assert!(endpoint.send(Frame::from(&b"ping\n"[..])).await);
        let echoed = tokio::time::timeout(WAIT, rx.recv()).await.unwrap().unwrap();
        assert_eq!(echoed.as_ref(), b"ping");

        let outcome = endpoint.terminate_process().await;
        assert_eq!(outcome, TerminationOutcome::StdinClosed);
        assert!(endpoint.has_exited());
        assert!(drain(&mut rx).await.is_empty());

        assert!(!endpoint.send(Frame::from(&b"late\n"[..])).await);
    }

    #[tokio::test]
    async fn process_ignoring_stdin_is_interrupted() {
        let process = LaunchedProcess::launch("sleep", ["30"]).unwrap();
        let mut endpoint = ProcessEndpoint::new(process, EndpointConfig::default());
        let mut rx = endpoint.output().unwrap();
        endpoint.start_reading();

        let outcome = endpoint.terminate_process().await;
        assert_eq!(outcome, TerminationOutcome::Interrupted);
        assert!(drain(&mut rx).await.is_empty());
    }

    #[tokio::test]
    async fn stderr_is_logged_not_published() {
        let (logs, _guard) = CapturedLogs::install();
        let mut endpoint = sh(r"printf 'oops\r\n' >&2; echo out", EndpointConfig::default());
        let mut rx = endpoint.output().unwrap();
        endpoint.start_reading();

        let frames = drain(&mut rx).await;
        assert_eq!(frames.len(), 1);
        assert_eq!(frames[0].as_ref(), b"out");

        // Stderr may be drained after stdout closes.
        let logged = logs.wait_for_error("oops").await;
        assert_eq!(logged.len(), 1, "{:?}", logs.lines());
        assert!(logged[0].contains("stderr"));
        assert!(!logged[0].contains('\r'));
    }

    #[tokio::test]
    async fn endless_stderr_line_is_cut_at_limit() {
        let (logs, _guard) = CapturedLogs::install();
        // No newline until well past the limit.
        let script = format!(
            "head -c {} /dev/zero | tr '\\0' e >&2; printf '\\nafter\\n' >&2; sleep 0.2",
            MAX_STDERR_LINE * 3
        );
        let mut endpoint = sh(&script, EndpointConfig::default());
        let mut rx = endpoint.output().unwrap();
        endpoint.start_reading();

        assert!(drain(&mut rx).await.is_empty());

        assert_eq!(logs.wait_for_error("after").await.len(), 1);
        let long = "e".repeat(MAX_STDERR_LINE);
        let cut = logs.error_lines(&long);
        assert_eq!(cut.len(), 1);
        assert!(!cut[0].contains(&format!("{long}e")));
    }

    #[tokio::test]
    async fn output_and_start_reading_are_single_use() {
        let mut endpoint = sh("echo once", EndpointConfig::default());
        let mut rx = endpoint.output().unwrap();
        assert!(endpoint.output().is_none());

        endpoint.start_reading();
        endpoint.start_reading();

        let frames = drain(&mut rx).await;
        assert_eq!(frames.len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn output_is_silent_before_start_reading() {
        let mut endpoint = sh("echo early", EndpointConfig::default());
        let mut rx = endpoint.output().unwrap();

        let idle = tokio::time::timeout(Duration::from_millis(200), rx.recv()).await;
        assert!(idle.is_err());
    }
}
