//! External process invocation with deadlock-free output capture.
//!
//! The runner spawns a child with its stdin closed, drains stdout and
//! stderr concurrently into two separate buffers, and reports the exit
//! status once both streams are exhausted and the child has exited. A
//! child that fills one pipe while the caller reads the other can never
//! wedge the pipeline.

use std::borrow::Cow;
use std::io::{self, Read, Write};
use std::path::Path;
use std::process::{Command, Stdio};
use std::sync::mpsc;
use std::thread;

use thiserror::Error;
use tracing::debug;

/// Bytes read from a child stream per chunk.
const READ_CHUNK: usize = 8 * 1024;

#[derive(Debug, Error)]
pub enum RunnerError {
    #[error("failed to spawn {program}: {source}")]
    Spawn {
        program: String,
        #[source]
        source: io::Error,
    },
    #[error("failed while capturing output of {program}: {source}")]
    Capture {
        program: String,
        #[source]
        source: io::Error,
    },
}

/// How the command line is interpreted.
///
/// `Shell` hands the whole string to `sh -c`, honoring metacharacters;
/// `Exec` spawns the program directly with an argument vector and no
/// quoting ambiguity. The pipeline always uses `Exec`.
#[derive(Debug, Clone)]
pub enum Invocation {
    Shell(String),
    Exec { program: String, args: Vec<String> },
}

impl Invocation {
    pub fn exec<P, I, S>(program: P, args: I) -> Self
    where
        P: Into<String>,
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Invocation::Exec {
            program: program.into(),
            args: args.into_iter().map(Into::into).collect(),
        }
    }

    pub fn shell(command: impl Into<String>) -> Self {
        Invocation::Shell(command.into())
    }

    /// Program name used in error messages and logs.
    pub fn program_label(&self) -> &str {
        match self {
            Invocation::Shell(_) => "sh",
            Invocation::Exec { program, .. } => program,
        }
    }

    fn command(&self) -> Command {
        match self {
            Invocation::Shell(line) => {
                let mut cmd = Command::new("sh");
                cmd.arg("-c").arg(line);
                cmd
            }
            Invocation::Exec { program, args } => {
                let mut cmd = Command::new(program);
                cmd.args(args);
                cmd
            }
        }
    }
}

/// Captured result of one invocation.
///
/// `status` is the child's exit code; a child terminated by a signal is
/// reported as the negated signal number.
#[derive(Debug)]
pub struct RunOutput {
    pub status: i32,
    pub stdout: Vec<u8>,
    pub stderr: Vec<u8>,
}

impl RunOutput {
    pub fn success(&self) -> bool {
        self.status == 0
    }

    pub fn stdout_text(&self) -> Cow<'_, str> {
        String::from_utf8_lossy(&self.stdout)
    }

    pub fn stderr_text(&self) -> Cow<'_, str> {
        String::from_utf8_lossy(&self.stderr)
    }
}

/// Optional observation hooks for one invocation.
///
/// `on_progress` fires with the running total of bytes seen whenever new
/// output arrives on either stream. `log_sink` receives every chunk, in
/// receipt order, before the call returns.
#[derive(Default)]
pub struct RunHooks<'a> {
    pub on_progress: Option<&'a mut dyn FnMut(u64)>,
    pub log_sink: Option<&'a mut dyn Write>,
}

impl RunHooks<'_> {
    pub fn none() -> Self {
        Self::default()
    }
}

#[derive(Debug, Clone, Copy)]
enum StreamKind {
    Stdout,
    Stderr,
}

/// Run an external command to completion, capturing both output streams.
///
/// The child's stdin is closed immediately; this tool never feeds a
/// child. `cwd` sets the child's working directory without touching the
/// caller's. Spawn failures return [`RunnerError::Spawn`] with no
/// captured buffers.
pub fn run(
    invocation: &Invocation,
    cwd: Option<&Path>,
    hooks: RunHooks<'_>,
) -> Result<RunOutput, RunnerError> {
    let program = invocation.program_label().to_string();
    let mut cmd = invocation.command();
    cmd.stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped());
    if let Some(dir) = cwd {
        cmd.current_dir(dir);
    }

    debug!(program = %program, "spawning external tool");
    let mut child = cmd.spawn().map_err(|source| RunnerError::Spawn {
        program: program.clone(),
        source,
    })?;

    let stdout = child.stdout.take();
    let stderr = child.stderr.take();

    let (tx, rx) = mpsc::channel::<(StreamKind, Vec<u8>)>();
    let stdout_reader = stdout.map(|pipe| spawn_reader(StreamKind::Stdout, pipe, tx.clone()));
    let stderr_reader = stderr.map(|pipe| spawn_reader(StreamKind::Stderr, pipe, tx));
    if stderr_reader.is_none() {
        // Both pipes were requested; missing handles mean the sender above
        // was never moved, so drop the channel to unblock the loop below.
        drop(rx);
        let status = child.wait().map_err(|source| RunnerError::Capture {
            program: program.clone(),
            source,
        })?;
        return Ok(RunOutput {
            status: numeric_status(&status),
            stdout: Vec::new(),
            stderr: Vec::new(),
        });
    }

    let mut out_buf = Vec::new();
    let mut err_buf = Vec::new();
    let mut total: u64 = 0;
    let RunHooks {
        mut on_progress,
        mut log_sink,
    } = hooks;

    // Receive until both reader threads hang up.
    let mut sink_error = None;
    for (stream, chunk) in rx {
        total += chunk.len() as u64;
        if let Some(sink) = log_sink.as_deref_mut() {
            if let Err(source) = sink.write_all(&chunk) {
                sink_error = Some(source);
                break;
            }
        }
        match stream {
            StreamKind::Stdout => out_buf.extend_from_slice(&chunk),
            StreamKind::Stderr => err_buf.extend_from_slice(&chunk),
        }
        if let Some(progress) = on_progress.as_deref_mut() {
            progress(total);
        }
    }

    // A dead sink aborts the capture, but the child still has to be
    // reaped or it lingers as a zombie until this process exits.
    if let Some(source) = sink_error {
        let _ = child.kill();
        for reader in [stdout_reader, stderr_reader].into_iter().flatten() {
            let _ = reader.join();
        }
        let _ = child.wait();
        return Err(RunnerError::Capture { program, source });
    }

    for reader in [stdout_reader, stderr_reader].into_iter().flatten() {
        reader
            .join()
            .unwrap_or_else(|panic| std::panic::resume_unwind(panic))
            .map_err(|source| RunnerError::Capture {
                program: program.clone(),
                source,
            })?;
    }

    let status = child.wait().map_err(|source| RunnerError::Capture {
        program: program.clone(),
        source,
    })?;

    Ok(RunOutput {
        status: numeric_status(&status),
        stdout: out_buf,
        stderr: err_buf,
    })
}

fn spawn_reader<R>(
    stream: StreamKind,
    mut pipe: R,
    tx: mpsc::Sender<(StreamKind, Vec<u8>)>,
) -> thread::JoinHandle<io::Result<()>>
where
    R: Read + Send + 'static,
{
    thread::spawn(move || {
        let mut buf = [0u8; READ_CHUNK];
        loop {
            let n = pipe.read(&mut buf)?;
            if n == 0 {
                return Ok(());
            }
            // The receiver outlives both readers; a send failure means the
            // parent already bailed and the rest of the stream is moot.
            if tx.send((stream, buf[..n].to_vec())).is_err() {
                return Ok(());
            }
        }
    })
}

fn numeric_status(status: &std::process::ExitStatus) -> i32 {
    if let Some(code) = status.code() {
        return code;
    }
    #[cfg(unix)]
    {
        use std::os::unix::process::ExitStatusExt;
        if let Some(signal) = status.signal() {
            return -signal;
        }
    }
    -1
}
