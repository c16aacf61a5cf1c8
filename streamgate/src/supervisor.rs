//! External media engine supervisor
//!
//! Owns the engine child process for the lifetime of the server. Output is
//! forwarded into the log line by line; the process is never restarted.

use std::path::{Path, PathBuf};
use std::process::{ExitStatus, Stdio};
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::process::{Child, Command};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use streamgate_core::config::EngineConfig;

/// Observable engine activity, mirrored from what is logged
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EngineEvent {
    Output { stream: &'static str, line: String },
    Exited { success: bool, code: Option<i32> },
}

type EventSender = Option<mpsc::UnboundedSender<EngineEvent>>;

pub struct EngineSupervisor {
    pid: Option<u32>,
    shutdown: CancellationToken,
    task: JoinHandle<Option<ExitStatus>>,
}

impl EngineSupervisor {
    /// Spawn the configured engine; relative program paths with a directory
    /// part are taken relative to `working_dir`
    pub fn spawn(config: &EngineConfig, working_dir: &Path) -> std::io::Result<Self> {
        Self::spawn_with_events(config, working_dir, None)
    }

    pub fn spawn_with_events(
        config: &EngineConfig,
        working_dir: &Path,
        events: EventSender,
    ) -> std::io::Result<Self> {
        let program = program_path(&config.program, working_dir);
        let mut child = Command::new(&program)
            .args(&config.args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()?;

        let pid = child.id();
        info!(program = %program.display(), pid = ?pid, "Engine started");

        let stdout = child
            .stdout
            .take()
            .map(|out| tokio::spawn(forward_lines(BufReader::new(out), "stdout", events.clone())));
        let stderr = child
            .stderr
            .take()
            .map(|err| tokio::spawn(forward_lines(BufReader::new(err), "stderr", events.clone())));

        let shutdown = CancellationToken::new();
        let task = tokio::spawn(watch_child(child, shutdown.clone(), stdout, stderr, events));

        Ok(Self {
            pid,
            shutdown,
            task,
        })
    }

    #[cfg(test)]
    #[must_use]
    pub const fn id(&self) -> Option<u32> {
        self.pid
    }

    #[cfg(test)]
    #[must_use]
    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }

    /// Wait for the engine to exit on its own
    #[cfg(test)]
    pub async fn wait(self) -> Option<ExitStatus> {
        self.task.await.ok().flatten()
    }

    /// Kill the engine if still running and wait for it
    pub async fn shutdown(self) -> Option<ExitStatus> {
        self.shutdown.cancel();
        self.task.await.ok().flatten()
    }
}

fn program_path(program: &Path, working_dir: &Path) -> PathBuf {
    if program.is_relative() && program.components().count() > 1 {
        working_dir.join(program)
    } else {
        program.to_path_buf()
    }
}

async fn watch_child(
    mut child: Child,
    shutdown: CancellationToken,
    stdout: Option<JoinHandle<()>>,
    stderr: Option<JoinHandle<()>>,
    events: EventSender,
) -> Option<ExitStatus> {
    let status = tokio::select! {
        status = child.wait() => status,
        () = shutdown.cancelled() => {
            if let Err(e) = child.start_kill() {
                warn!(error = %e, "Failed to kill engine");
            }
            child.wait().await
        }
    };

    // Drain remaining output before reporting the exit
    for task in [stdout, stderr].into_iter().flatten() {
        let _ = task.await;
    }

    match status {
        Ok(status) => {
            if status.success() {
                info!(status = %status, "Engine exited");
            } else {
                warn!(status = %status, "Engine exited with failure");
            }
            emit(
                &events,
                EngineEvent::Exited {
                    success: status.success(),
                    code: status.code(),
                },
            );
            Some(status)
        }
        Err(e) => {
            warn!(error = %e, "Failed to wait for engine");
            None
        }
    }
}

/// Forward output line by line until EOF
///
/// The pipe stays open for as long as the engine writes to it; dropping
/// the reader early would kill the engine with SIGPIPE.
async fn forward_lines<R>(mut reader: BufReader<R>, stream: &'static str, events: EventSender)
where
    R: AsyncRead + Unpin,
{
    let mut line = Vec::new();
    loop {
        line.clear();
        match reader.read_until(b'\n', &mut line).await {
            Ok(0) => break,
            Ok(_) => {
                let text = String::from_utf8_lossy(&line);
                let trimmed = text.trim_end_matches(['\n', '\r']);
                info!(target: "streamgate::engine", stream = stream, message = trimmed);
                emit(
                    &events,
                    EngineEvent::Output {
                        stream,
                        line: trimmed.to_string(),
                    },
                );
            }
            Err(e) => {
                warn!(target: "streamgate::engine", stream = stream, error = %e, "Failed to read engine output, discarding the rest");
                if let Err(e) = tokio::io::copy(&mut reader, &mut tokio::io::sink()).await {
                    warn!(target: "streamgate::engine", stream = stream, error = %e, "Engine output pipe failed");
                }
                break;
            }
        }
    }
}

fn emit(events: &EventSender, event: EngineEvent) {
    if let Some(tx) = events {
        let _ = tx.send(event);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn engine(program: &str, args: &[&str]) -> EngineConfig {
        EngineConfig {
            program: PathBuf::from(program),
            args: args.iter().map(|a| (*a).to_string()).collect(),
        }
    }

    async fn collect(mut rx: mpsc::UnboundedReceiver<EngineEvent>) -> Vec<EngineEvent> {
        let mut events = Vec::new();
        while let Some(event) = rx.recv().await {
            events.push(event);
        }
        events
    }

    #[test]
    fn test_program_path() {
        let root = Path::new("/srv/streamgate");
        assert_eq!(
            program_path(Path::new("stream/stream"), root),
            PathBuf::from("/srv/streamgate/stream/stream")
        );
        assert_eq!(program_path(Path::new("sh"), root), PathBuf::from("sh"));
        assert_eq!(program_path(Path::new("/bin/sh"), root), PathBuf::from("/bin/sh"));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_forwards_output_and_exit() {
        let dir = tempfile::tempdir().unwrap();
        let (tx, rx) = mpsc::unbounded_channel();
        let config = engine("sh", &["-c", "echo ready; echo oops >&2; printf 'crlf\\r\\n'"]);

        let supervisor = EngineSupervisor::spawn_with_events(&config, dir.path(), Some(tx)).unwrap();
        assert!(supervisor.id().is_some());
        let status = supervisor.wait().await.unwrap();
        assert!(status.success());

        let events = collect(rx).await;
        assert!(events.contains(&EngineEvent::Output {
            stream: "stdout",
            line: "ready".to_string()
        }));
        assert!(events.contains(&EngineEvent::Output {
            stream: "stderr",
            line: "oops".to_string()
        }));
        assert!(events.contains(&EngineEvent::Output {
            stream: "stdout",
            line: "crlf".to_string()
        }));
        assert_eq!(
            events.last(),
            Some(&EngineEvent::Exited {
                success: true,
                code: Some(0)
            })
        );
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_invalid_utf8_keeps_engine_alive() {
        let dir = tempfile::tempdir().unwrap();
        let (tx, rx) = mpsc::unbounded_channel();
        let config = engine(
            "sh",
            &["-c", "printf 'caf\\351\\n'; sleep 0.2; echo after; echo done >&2"],
        );

        let supervisor = EngineSupervisor::spawn_with_events(&config, dir.path(), Some(tx)).unwrap();
        let status = supervisor.wait().await.unwrap();
        assert!(status.success());

        let events = collect(rx).await;
        assert!(events.contains(&EngineEvent::Output {
            stream: "stdout",
            line: "caf\u{FFFD}".to_string()
        }));
        assert!(events.contains(&EngineEvent::Output {
            stream: "stdout",
            line: "after".to_string()
        }));
        assert!(events.contains(&EngineEvent::Output {
            stream: "stderr",
            line: "done".to_string()
        }));
        assert_eq!(
            events.last(),
            Some(&EngineEvent::Exited {
                success: true,
                code: Some(0)
            })
        );
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_reports_failure_exit() {
        let dir = tempfile::tempdir().unwrap();
        let (tx, rx) = mpsc::unbounded_channel();
        let config = engine("sh", &["-c", "exit 3"]);

        let supervisor = EngineSupervisor::spawn_with_events(&config, dir.path(), Some(tx)).unwrap();
        let status = supervisor.wait().await.unwrap();
        assert_eq!(status.code(), Some(3));

        let events = collect(rx).await;
        assert_eq!(
            events,
            vec![EngineEvent::Exited {
                success: false,
                code: Some(3)
            }]
        );
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_shutdown_kills_running_engine() {
        let dir = tempfile::tempdir().unwrap();
        let config = engine("sh", &["-c", "exec sleep 30"]);

        let supervisor = EngineSupervisor::spawn(&config, dir.path()).unwrap();
        assert!(!supervisor.is_finished());

        let status = tokio::time::timeout(std::time::Duration::from_secs(5), supervisor.shutdown())
            .await
            .unwrap()
            .unwrap();
        assert!(!status.success());
    }

    #[tokio::test]
    async fn test_missing_program_is_a_spawn_error() {
        let dir = tempfile::tempdir().unwrap();
        let config = engine("stream/does-not-exist", &[]);

        let err = EngineSupervisor::spawn(&config, dir.path()).err().unwrap();
        assert_eq!(err.kind(), std::io::ErrorKind::NotFound);
    }
}
