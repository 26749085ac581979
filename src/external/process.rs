use std::io::Read;
use std::process::{Child, Command, Stdio};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::{Duration, Instant};

use crate::error::{Result, VoxError};

const POLL_INTERVAL: Duration = Duration::from_millis(25);
/// Trailing stderr lines kept in error diagnostics.
const DIAGNOSTIC_LINES: usize = 40;

/// Captured output of a finished child process.
#[derive(Debug)]
pub struct CommandOutput {
    pub stdout: String,
    pub stderr: String,
}

/// Run `program args..` to completion, killing it after `timeout`.
///
/// The child runs in its own process group, and on expiry the whole group is
/// killed, so launchers such as `conda run` or shell wrappers cannot keep
/// grandchildren alive past the deadline. stdout and stderr are drained on
/// background threads into shared buffers; the stderr tail is read from the
/// buffer without waiting for the pipe to close. A non-zero exit becomes
/// [`VoxError::ExternalToolFailure`] and an expired timeout
/// [`VoxError::ExternalToolTimeout`], both carrying the tail of stderr.
pub fn run_command(tool: &str, program: &str, args: &[String], timeout: Duration) -> Result<CommandOutput> {
    log::debug!("Running {}: {} {}", tool, program, args.join(" "));

    let mut command = Command::new(program);
    command
        .args(args)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped());
    #[cfg(unix)]
    {
        use std::os::unix::process::CommandExt;
        command.process_group(0);
    }

    let mut child = command.spawn().map_err(|e| VoxError::ExternalToolFailure {
        tool: tool.to_string(),
        status: "failed to start".into(),
        diagnostics: format!("could not spawn `{}`: {}. Is it installed and on PATH?", program, e),
    })?;

    let stdout = child.stdout.take().map(PipeReader::spawn);
    let stderr = child.stderr.take().map(PipeReader::spawn);
    let stderr_tail = || tail(&stderr.as_ref().map(PipeReader::snapshot).unwrap_or_default());
    let timed_out = |child: &mut Child| {
        kill_group(child);
        log::warn!("{} timed out after {:?}, process group killed", tool, timeout);
        VoxError::ExternalToolTimeout {
            tool: tool.to_string(),
            timeout,
            diagnostics: stderr_tail(),
        }
    };

    let started = Instant::now();
    let status = loop {
        match child.try_wait() {
            Ok(Some(status)) => break status,
            Ok(None) => {
                if started.elapsed() >= timeout {
                    return Err(timed_out(&mut child));
                }
                thread::sleep(POLL_INTERVAL);
            }
            Err(e) => {
                kill_group(&mut child);
                return Err(VoxError::ExternalToolFailure {
                    tool: tool.to_string(),
                    status: "wait failed".into(),
                    diagnostics: e.to_string(),
                });
            }
        }
    };

    // A background grandchild can hold the pipes open after the child exits
    let readers_done = || {
        stdout.as_ref().map_or(true, PipeReader::is_finished)
            && stderr.as_ref().map_or(true, PipeReader::is_finished)
    };
    while !readers_done() {
        if started.elapsed() >= timeout {
            return Err(timed_out(&mut child));
        }
        thread::sleep(POLL_INTERVAL);
    }

    let stdout = stdout.map(PipeReader::finish).unwrap_or_default();
    let stderr = stderr.map(PipeReader::finish).unwrap_or_default();

    if !status.success() {
        return Err(VoxError::ExternalToolFailure {
            tool: tool.to_string(),
            status: status.to_string(),
            diagnostics: tail(&stderr),
        });
    }

    log::debug!("{} finished in {:.1}s", tool, started.elapsed().as_secs_f32());
    Ok(CommandOutput { stdout, stderr })
}

/// Kill the child's process group (or just the child off unix) and reap it.
fn kill_group(child: &mut Child) {
    #[cfg(unix)]
    {
        // Negative pid addresses the group created by `process_group(0)`
        let pgid = child.id() as libc::pid_t;
        unsafe {
            libc::kill(-pgid, libc::SIGKILL);
        }
    }
    let _ = child.kill();
    let _ = child.wait();
}

/// Drains one pipe into a buffer that can be read while the pipe is open.
struct PipeReader {
    buf: Arc<Mutex<Vec<u8>>>,
    handle: thread::JoinHandle<()>,
}

impl PipeReader {
    fn spawn<R: Read + Send + 'static>(mut pipe: R) -> PipeReader {
        let buf = Arc::new(Mutex::new(Vec::new()));
        let sink = buf.clone();
        let handle = thread::spawn(move || {
            let mut chunk = [0u8; 4096];
            loop {
                match pipe.read(&mut chunk) {
                    Err(e) if e.kind() == std::io::ErrorKind::Interrupted => continue,
                    Ok(0) | Err(_) => break,
                    Ok(n) => sink
                        .lock()
                        .unwrap_or_else(|poisoned| poisoned.into_inner())
                        .extend_from_slice(&chunk[..n]),
                }
            }
        });
        PipeReader { buf, handle }
    }

    fn is_finished(&self) -> bool {
        self.handle.is_finished()
    }

    fn snapshot(&self) -> String {
        let buf = self.buf.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        String::from_utf8_lossy(&buf).into_owned()
    }

    fn finish(self) -> String {
        let PipeReader { buf, handle } = self;
        let _ = handle.join();
        let buf = buf.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        String::from_utf8_lossy(&buf).into_owned()
    }
}

fn tail(text: &str) -> String {
    let lines: Vec<&str> = text.lines().collect();
    let start = lines.len().saturating_sub(DIAGNOSTIC_LINES);
    lines[start..].join("\n")
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;

    fn sh(script: &str) -> Vec<String> {
        vec!["-c".to_string(), script.to_string()]
    }

    #[test]
    fn test_captures_stdout() {
        let out = run_command("echo", "sh", &sh("echo hello; echo warn >&2"), Duration::from_secs(10)).unwrap();
        assert_eq!(out.stdout.trim(), "hello");
        assert_eq!(out.stderr.trim(), "warn");
    }

    #[test]
    fn test_failure_surfaces_stderr() {
        let err = run_command(
            "broken",
            "sh",
            &sh("echo 'model weights missing' >&2; exit 3"),
            Duration::from_secs(10),
        )
        .unwrap_err();
        match err {
            VoxError::ExternalToolFailure { tool, status, diagnostics } => {
                assert_eq!(tool, "broken");
                assert!(status.contains('3'));
                assert!(diagnostics.contains("model weights missing"));
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_timeout_kills_child() {
        let started = Instant::now();
        let err = run_command(
            "sleeper",
            "sh",
            &sh("echo starting >&2; exec sleep 30"),
            Duration::from_millis(300),
        )
        .unwrap_err();
        assert!(started.elapsed() < Duration::from_secs(10));
        match err {
            VoxError::ExternalToolTimeout { tool, diagnostics, .. } => {
                assert_eq!(tool, "sleeper");
                assert!(diagnostics.contains("starting"));
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_timeout_kills_grandchildren() {
        // Without `exec` the sleep is a grandchild that inherits the pipes
        let started = Instant::now();
        let err = run_command(
            "wrapper",
            "sh",
            &sh("echo starting >&2; sleep 30; true"),
            Duration::from_millis(300),
        )
        .unwrap_err();
        assert!(started.elapsed() < Duration::from_secs(5), "took {:?}", started.elapsed());
        match err {
            VoxError::ExternalToolTimeout { diagnostics, .. } => assert!(diagnostics.contains("starting")),
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_background_holder_of_pipes_is_bounded() {
        let started = Instant::now();
        let result = run_command(
            "daemonizer",
            "sh",
            &sh("sleep 30 & echo launched"),
            Duration::from_millis(500),
        );
        assert!(started.elapsed() < Duration::from_secs(5), "took {:?}", started.elapsed());
        assert!(matches!(result, Err(VoxError::ExternalToolTimeout { .. })));
    }

    #[test]
    fn test_missing_program() {
        let err = run_command("ghost", "voxsift-no-such-binary", &[], Duration::from_secs(1)).unwrap_err();
        assert!(matches!(err, VoxError::ExternalToolFailure { .. }));
    }

    #[test]
    fn test_tail_keeps_last_lines() {
        let text: String = (0..100).map(|i| format!("line {}\n", i)).collect();
        let t = tail(&text);
        assert!(t.starts_with("line 60"));
        assert!(t.ends_with("line 99"));
    }
}
