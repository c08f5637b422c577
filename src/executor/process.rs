// Spawns a child, feeds stdin, enforces a wall-clock limit.
// No interpretation of the output happens here.

use std::io::{self, BufReader, Read, Write};
use std::process::{Child, Command, ExitStatus, Stdio};
use std::thread;
use std::time::{Duration, Instant};

use crossbeam_channel::Sender;
use tracing::debug;

use crate::error::ExecError;

const WAIT_TICK: Duration = Duration::from_millis(10);

/// Bytes kept per stream. Anything past this is read and discarded.
pub const OUTPUT_LIMIT: u64 = 1 << 20;

/// How long to wait for the pipes to close once the child is gone.
const READER_GRACE: Duration = Duration::from_millis(500);

#[derive(Debug, Clone)]
pub struct CommandRunResult {
    pub status: Option<ExitStatus>,
    pub stdout: String,
    pub stderr: String,
    pub timed_out: bool,
    /// Either stream went past `OUTPUT_LIMIT`.
    pub truncated: bool,
    pub elapsed: Duration,
}

impl CommandRunResult {
    pub fn success(&self) -> bool {
        !self.timed_out && self.status.map(|s| s.success()).unwrap_or(false)
    }
}

enum Stream {
    Out,
    Err,
}

#[derive(Default)]
struct Captured {
    bytes: Vec<u8>,
    truncated: bool,
}

fn spawn_capture(which: Stream, pipe: impl Read + Send + 'static, tx: Sender<(Stream, Captured)>) {
    thread::spawn(move || {
        let mut reader = BufReader::new(pipe);
        let mut bytes = Vec::new();
        let _ = (&mut reader).take(OUTPUT_LIMIT).read_to_end(&mut bytes);
        let dropped = io::copy(&mut reader, &mut io::sink()).unwrap_or(0);
        let _ = tx.send((
            which,
            Captured {
                bytes,
                truncated: dropped > 0,
            },
        ));
    });
}

/// Puts the child in a fresh process group so a timeout can take down
/// anything it forked.
#[cfg(unix)]
fn isolate(command: &mut Command) {
    use std::os::unix::process::CommandExt;
    command.process_group(0);
}

#[cfg(not(unix))]
fn isolate(_command: &mut Command) {}

#[cfg(unix)]
fn kill_tree(child: &mut Child) {
    let group = format!("-{}", child.id());
    let _ = Command::new("kill")
        .args(["-KILL", "--", &group])
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .status();
    let _ = child.kill();
}

#[cfg(not(unix))]
fn kill_tree(child: &mut Child) {
    let _ = child.kill();
}

pub fn run_command_with_timeout(
    command: &mut Command,
    stdin: Option<&str>,
    timeout: Duration,
) -> Result<CommandRunResult, ExecError> {
    let program = command.get_program().to_string_lossy().to_string();

    isolate(command);
    let mut child = command
        .stdin(if stdin.is_some() { Stdio::piped() } else { Stdio::null() })
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .spawn()
        .map_err(|source| ExecError::Spawn {
            program: program.clone(),
            source,
        })?;

    if let (Some(input), Some(mut pipe)) = (stdin, child.stdin.take()) {
        let input = input.to_owned();
        // Broken pipes are expected when the child exits without reading.
        thread::spawn(move || {
            let _ = pipe.write_all(input.as_bytes());
        });
    }

    let stdout = child
        .stdout
        .take()
        .ok_or_else(|| ExecError::Harness("failed to capture stdout".into()))?;
    let stderr = child
        .stderr
        .take()
        .ok_or_else(|| ExecError::Harness("failed to capture stderr".into()))?;

    let (tx, rx) = crossbeam_channel::bounded(2);
    spawn_capture(Stream::Out, stdout, tx.clone());
    spawn_capture(Stream::Err, stderr, tx);

    let start = Instant::now();
    let mut timed_out = false;
    let status = loop {
        match child.try_wait() {
            Ok(Some(status)) => break Some(status),
            Ok(None) => {
                if start.elapsed() >= timeout {
                    timed_out = true;
                    kill_tree(&mut child);
                    match child.wait() {
                        Ok(status) => break Some(status),
                        Err(_) => break None,
                    }
                }
                thread::sleep(WAIT_TICK);
            }
            Err(e) => {
                kill_tree(&mut child);
                return Err(ExecError::Io(e));
            }
        }
    };
    let elapsed = start.elapsed();

    let mut out = Captured::default();
    let mut err = Captured::default();
    let deadline = Instant::now() + READER_GRACE;
    for _ in 0..2 {
        match rx.recv_deadline(deadline) {
            Ok((Stream::Out, captured)) => out = captured,
            Ok((Stream::Err, captured)) => err = captured,
            Err(_) => {
                debug!(%program, "pipes still open after exit, abandoning readers");
                break;
            }
        }
    }

    Ok(CommandRunResult {
        status,
        stdout: String::from_utf8_lossy(&out.bytes).to_string(),
        stderr: String::from_utf8_lossy(&err.bytes).to_string(),
        timed_out,
        truncated: out.truncated || err.truncated,
        elapsed,
    })
}

pub fn program_available_on_path(program: &str) -> bool {
    let program = program.trim();
    if program.is_empty() {
        return false;
    }
    let Some(path) = std::env::var_os("PATH") else {
        return false;
    };
    std::env::split_paths(&path).any(|dir| dir.join(program).is_file())
}

/// Keeps the tail of long output, which is where tracebacks end.
pub fn truncate_tail(s: &str, limit: usize) -> String {
    let count = s.chars().count();
    if count <= limit {
        return s.to_string();
    }

    let tail: String = s.chars().skip(count - limit).collect();
    format!("...truncated...\n{}", tail)
}
