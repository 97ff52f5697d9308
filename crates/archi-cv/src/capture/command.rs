//! Capture helper spoken to over stdin/stdout.
//!
//! Each `grab` line written to the helper's stdin is answered by one line
//! on stdout: the path of a freshly written image, or `ERR <message>` when
//! the helper could not take a screenshot this time.

use super::{CaptureError, CaptureProcess, load_frame};
use async_trait::async_trait;
use image::GrayImage;
use std::path::PathBuf;
use std::process::Stdio;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::process::{Child, ChildStdin, ChildStdout, Command};

const GRAB_REQUEST: &[u8] = b"grab\n";
const ERROR_PREFIX: &str = "ERR";
const GRACEFUL_EXIT: Duration = Duration::from_millis(500);

struct Running {
    child: Child,
    stdin: ChildStdin,
    stdout: BufReader<ChildStdout>,
}

pub struct CommandCapture {
    program: String,
    args: Vec<String>,
    read_timeout: Option<Duration>,
    running: Option<Running>,
}

impl CommandCapture {
    pub fn new(program: impl Into<String>, args: Vec<String>) -> Self {
        Self {
            program: program.into(),
            args,
            read_timeout: None,
            running: None,
        }
    }

    /// Give up on a helper that takes longer than `timeout` to answer.
    ///
    /// A late answer would be read as the reply to the next request, so the
    /// helper is killed and the grab reported as a crash.
    pub fn with_read_timeout(mut self, timeout: Duration) -> Self {
        self.read_timeout = Some(timeout);
        self
    }

    pub fn is_running(&self) -> bool {
        self.running.is_some()
    }

    async fn kill_out_of_sync(&mut self, limit: Duration) {
        let Some(mut running) = self.running.take() else {
            return;
        };
        tracing::warn!(program = %self.program, ?limit, "capture helper did not answer, killing it");
        if let Err(e) = running.child.kill().await {
            tracing::warn!(program = %self.program, error = %e, "failed to kill capture helper");
        }
    }

    async fn request_frame(running: &mut Running) -> Result<String, CaptureError> {
        if let Ok(Some(status)) = running.child.try_wait() {
            return Err(CaptureError::Crashed(format!("helper exited with {}", status)));
        }

        running
            .stdin
            .write_all(GRAB_REQUEST)
            .await
            .map_err(|e| CaptureError::Crashed(format!("cannot write to helper: {}", e)))?;
        running
            .stdin
            .flush()
            .await
            .map_err(|e| CaptureError::Crashed(format!("cannot write to helper: {}", e)))?;

        let mut line = String::new();
        let read = running
            .stdout
            .read_line(&mut line)
            .await
            .map_err(|e| CaptureError::Crashed(format!("cannot read from helper: {}", e)))?;
        if read == 0 {
            return Err(CaptureError::Crashed("helper closed its output".to_string()));
        }
        Ok(line.trim().to_string())
    }
}

fn parse_reply(reply: &str) -> Result<PathBuf, CaptureError> {
    if reply == ERROR_PREFIX {
        return Err(CaptureError::Read("helper reported an error".to_string()));
    }
    if let Some(message) = reply.strip_prefix(ERROR_PREFIX).and_then(|r| r.strip_prefix(' ')) {
        return Err(CaptureError::Read(message.trim().to_string()));
    }
    if reply.is_empty() {
        return Err(CaptureError::Read("helper answered with an empty line".to_string()));
    }
    Ok(PathBuf::from(reply))
}

#[async_trait]
impl CaptureProcess for CommandCapture {
    async fn start(&mut self) -> Result<(), CaptureError> {
        if self.running.is_some() {
            return Ok(());
        }

        let mut child = Command::new(&self.program)
            .args(&self.args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::inherit())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| CaptureError::Spawn(format!("{}: {}", self.program, e)))?;

        let stdin = child
            .stdin
            .take()
            .ok_or_else(|| CaptureError::Spawn("helper stdin unavailable".to_string()))?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| CaptureError::Spawn("helper stdout unavailable".to_string()))?;

        tracing::info!(program = %self.program, pid = ?child.id(), "capture helper started");
        self.running = Some(Running {
            child,
            stdin,
            stdout: BufReader::new(stdout),
        });
        Ok(())
    }

    async fn grab_frame(&mut self) -> Result<GrayImage, CaptureError> {
        let running = self
            .running
            .as_mut()
            .ok_or_else(|| CaptureError::Crashed("helper not running".to_string()))?;

        let reply = match self.read_timeout {
            Some(limit) => match tokio::time::timeout(limit, Self::request_frame(running)).await {
                Ok(reply) => reply,
                Err(_) => {
                    self.kill_out_of_sync(limit).await;
                    return Err(CaptureError::Crashed(format!(
                        "no answer within {:?}, helper killed",
                        limit
                    )));
                }
            },
            None => Self::request_frame(running).await,
        };

        let reply = match reply {
            Ok(reply) => reply,
            Err(err) => {
                if !err.is_transient() {
                    // Keep the dead child so stop() can reap it
                    tracing::warn!(program = %self.program, error = %err, "capture helper lost");
                }
                return Err(err);
            }
        };

        load_frame(parse_reply(&reply)?).await
    }

    async fn stop(&mut self) {
        let Some(running) = self.running.take() else {
            return;
        };
        let Running { mut child, stdin, stdout } = running;

        // Closing stdin asks the helper to exit on its own
        drop(stdin);
        drop(stdout);

        match tokio::time::timeout(GRACEFUL_EXIT, child.wait()).await {
            Ok(Ok(status)) => tracing::info!(program = %self.program, %status, "capture helper exited"),
            _ => {
                if let Err(e) = child.kill().await {
                    tracing::warn!(program = %self.program, error = %e, "failed to kill capture helper");
                } else {
                    tracing::info!(program = %self.program, "capture helper killed");
                }
            }
        }
    }

    fn name(&self) -> &str {
        &self.program
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_reply() {
        assert_eq!(parse_reply("/tmp/frame.png").unwrap(), PathBuf::from("/tmp/frame.png"));
        assert_eq!(
            parse_reply("ERR window not found").unwrap_err(),
            CaptureError::Read("window not found".to_string())
        );
        assert!(parse_reply("").unwrap_err().is_transient());
    }

    #[tokio::test]
    async fn test_missing_program_is_spawn_error() {
        let mut capture = CommandCapture::new("/nonexistent/archi-capture-helper", Vec::new());
        let err = capture.start().await.unwrap_err();
        assert!(matches!(err, CaptureError::Spawn(_)));
        assert!(!capture.is_running());
        capture.stop().await;
    }

    #[tokio::test]
    async fn test_grab_before_start_is_crash() {
        let mut capture = CommandCapture::new("true", Vec::new());
        let err = capture.grab_frame().await.unwrap_err();
        assert!(matches!(err, CaptureError::Crashed(_)));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_helper_round_trip_and_crash() {
        let dir = tempfile::tempdir().unwrap();
        let frame_path = dir.path().join("frame.png");
        GrayImage::from_pixel(8, 6, image::Luma([77])).save(&frame_path).unwrap();

        // Answers one good frame, one transient error, then exits
        let script = format!(
            "read _; echo {}; read _; echo 'ERR busy'; read _; exit 3",
            frame_path.display()
        );
        let mut capture = CommandCapture::new("sh", vec!["-c".to_string(), script])
            .with_read_timeout(Duration::from_secs(5));
        capture.start().await.unwrap();

        let frame = capture.grab_frame().await.unwrap();
        assert_eq!(frame.dimensions(), (8, 6));

        let err = capture.grab_frame().await.unwrap_err();
        assert_eq!(err, CaptureError::Read("busy".to_string()));

        let err = capture.grab_frame().await.unwrap_err();
        assert!(matches!(err, CaptureError::Crashed(_)));

        capture.stop().await;
        assert!(!capture.is_running());
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_late_answer_kills_helper() {
        let dir = tempfile::tempdir().unwrap();
        let frame_path = dir.path().join("frame.png");
        GrayImage::from_pixel(4, 4, image::Luma([9])).save(&frame_path).unwrap();

        // The first answer arrives long after the deadline
        let script = format!(
            "read _; sleep 2; echo {0}; read _; echo {0}",
            frame_path.display()
        );
        let mut capture = CommandCapture::new("sh", vec!["-c".to_string(), script])
            .with_read_timeout(Duration::from_millis(200));
        capture.start().await.unwrap();

        let begun = std::time::Instant::now();
        let err = capture.grab_frame().await.unwrap_err();
        assert!(matches!(err, CaptureError::Crashed(_)), "{:?}", err);
        assert!(begun.elapsed() < Duration::from_millis(1500));
        assert!(!capture.is_running());

        // No stale reply can be paired with a later request
        let err = capture.grab_frame().await.unwrap_err();
        assert!(matches!(err, CaptureError::Crashed(_)));
        capture.stop().await;
    }
}
