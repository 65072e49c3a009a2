//! Bounded-time command execution as a detached process group.
//!
//! The supervisor runs a shell command line with:
//!
//! - The child as leader of a new process group, so the child and every
//!   descendant can be signaled together
//! - stdin, stdout and stderr on the slave side of a pseudo-terminal, so
//!   programs that line-buffer on a tty flush every line; the master side
//!   is read line by line into a buffer that stays reachable through the
//!   [`CancelToken`] registry
//! - A per-read timeout: when the child is silent for too long a marker
//!   line is appended and the child's liveness is checked
//! - Cooperative cancellation: the read loop polls the run's token and
//!   tears the group down (SIGTERM → SIGKILL) once it is set
//!
//! # Example
//!
//! ```ignore
//! use gp_core::cancel::CancelToken;
//! use gp_core::supervisor::Supervisor;
//!
//! let supervisor = Supervisor::with_defaults(CancelToken::new());
//! let out = supervisor.spawn("ls -l /tmp")?;
//! println!("{} -> {}", out.exit_code, out.output);
//! ```

use crate::cancel::{AlreadyCancelled, CancelToken, ProcessGroup, SharedOutput};
use crate::logging::event_names;
use std::fs::File;
use std::io::{self, Read};
use std::os::unix::io::{AsRawFd, FromRawFd, OwnedFd};
use std::os::unix::process::{CommandExt, ExitStatusExt};
use std::process::{Child, Command, ExitStatus, Stdio};
use std::ptr;
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::{Duration, Instant};
use thiserror::Error;
use tracing::{debug, error, info, instrument, trace, warn};

/// Default per-read timeout in seconds.
pub const DEFAULT_READ_TIMEOUT_SECS: u64 = 30;

/// Default maximum output kept per command (10MB).
pub const DEFAULT_MAX_OUTPUT_BYTES: usize = 10 * 1024 * 1024;

/// Grace period between SIGTERM and SIGKILL in milliseconds.
const SIGTERM_GRACE_MS: u64 = 500;

/// Sleep between polls when no output is available.
const POLL_INTERVAL: Duration = Duration::from_millis(10);

/// How long to keep reading after the leader exits while a descendant
/// still holds the terminal open.
const EXIT_DRAIN: Duration = Duration::from_millis(100);

/// Flag substituted into the `{verbose}` slot at high verbosity.
pub const VERBOSE_FLAG: &str = "-v";

/// Placeholder for the verbosity flag in command templates.
pub const VERBOSE_SLOT: &str = "{verbose}";

/// Errors that can occur while supervising a command.
#[derive(Debug, Error)]
pub enum SupervisorError {
    #[error("empty command line")]
    EmptyCommand,

    #[error("command failed to spawn: {0}")]
    SpawnFailed(String),

    /// The run was cancelled. Carries whatever output had been read.
    #[error("cancelled while waiting for command output")]
    Cancelled { output: String },

    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
}

impl SupervisorError {
    /// Output captured before the failure, if any.
    pub fn partial_output(&self) -> &str {
        match self {
            SupervisorError::Cancelled { output } => output,
            _ => "",
        }
    }
}

/// Result of a command that ran to completion.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SpawnOutput {
    pub command: String,
    pub pid: u32,
    /// Exit status translated shell-style: the exit code, or 128 + signal.
    pub exit_code: i32,
    /// Combined stdout and stderr, `\r\n` normalised to `\n`.
    pub output: String,
    pub truncated: bool,
    pub duration: Duration,
}

impl SpawnOutput {
    pub fn success(&self) -> bool {
        self.exit_code == 0
    }
}

/// Configuration for the supervisor.
#[derive(Debug, Clone)]
pub struct SupervisorConfig {
    /// How long one read may wait for output before a marker is appended.
    pub read_timeout: Duration,
    pub max_output_bytes: usize,
    /// Shell used to interpret command lines.
    pub shell: String,
}

impl Default for SupervisorConfig {
    fn default() -> Self {
        Self {
            read_timeout: Duration::from_secs(DEFAULT_READ_TIMEOUT_SECS),
            max_output_bytes: DEFAULT_MAX_OUTPUT_BYTES,
            shell: "/bin/sh".to_string(),
        }
    }
}

/// Runs commands under a run's cancellation token.
#[derive(Debug, Clone)]
pub struct Supervisor {
    config: SupervisorConfig,
    cancel: CancelToken,
}

impl Supervisor {
    pub fn new(config: SupervisorConfig, cancel: CancelToken) -> Self {
        Self { config, cancel }
    }

    pub fn with_defaults(cancel: CancelToken) -> Self {
        Self::new(SupervisorConfig::default(), cancel)
    }

    pub fn config(&self) -> &SupervisorConfig {
        &self.config
    }

    /// Run `command_line` through the shell and wait for it.
    ///
    /// Short-circuits with [`SupervisorError::Cancelled`] when the run is
    /// already cancelled. The process group is registered with the token
    /// for exactly the duration of this call.
    #[instrument(skip(self), fields(cmd = %command_line))]
    pub fn spawn(&self, command_line: &str) -> Result<SpawnOutput, SupervisorError> {
        if command_line.trim().is_empty() {
            return Err(SupervisorError::EmptyCommand);
        }
        if self.cancel.is_cancelled() {
            debug!("run already cancelled, not spawning");
            return Err(SupervisorError::Cancelled {
                output: String::new(),
            });
        }

        let Pty { master, slave } = open_pty()?;

        let mut command = Command::new(&self.config.shell);
        command
            .arg("-c")
            .arg(command_line)
            .stdin(Stdio::from(slave.try_clone()?))
            .stdout(Stdio::from(slave.try_clone()?))
            .stderr(Stdio::from(slave.try_clone()?))
            .process_group(0);

        let start = Instant::now();
        let mut child = command.spawn().map_err(|e| {
            error!(error = %e, "failed to spawn");
            SupervisorError::SpawnFailed(e.to_string())
        })?;
        // Only the child may hold the slave, or the master never sees EOF.
        drop(command);
        drop(slave);

        let pid = child.id();
        let group = ProcessGroup::from_leader(pid);
        let output: SharedOutput = Arc::new(Mutex::new(String::new()));

        let _registration = match self.cancel.register(pid, group, command_line, output.clone()) {
            Ok(registration) => registration,
            Err(AlreadyCancelled) => {
                kill_with_grace(group, &mut child);
                return Err(SupervisorError::Cancelled {
                    output: String::new(),
                });
            }
        };

        info!(target: event_names::PROCESS_SPAWNED, pid, "command started");

        let mut session = ReadSession {
            reader: master,
            output,
            pending: Vec::new(),
            kept: 0,
            max_output: self.config.max_output_bytes,
            truncated: false,
            eof: false,
        };

        let status = match self.follow(&mut child, group, &mut session) {
            Ok(status) => status,
            Err(SupervisorError::Cancelled { .. }) => {
                // Whatever the group wrote before dying is still buffered.
                let _ = session.drain();
                session.flush_pending();
                return Err(SupervisorError::Cancelled {
                    output: session.snapshot(),
                });
            }
            Err(e) => {
                kill_with_grace(group, &mut child);
                return Err(e);
            }
        };

        session.flush_pending();
        let exit_code = translate_status(status);
        let duration = start.elapsed();
        info!(
            pid,
            exit_code,
            duration_ms = duration.as_millis() as u64,
            "command finished"
        );

        Ok(SpawnOutput {
            command: command_line.to_string(),
            pid,
            exit_code,
            output: session.snapshot(),
            truncated: session.truncated,
            duration,
        })
    }

    /// Read until the child exits, the run is cancelled, or I/O fails.
    fn follow(
        &self,
        child: &mut Child,
        group: ProcessGroup,
        session: &mut ReadSession,
    ) -> Result<ExitStatus, SupervisorError> {
        let pid = child.id();
        let read_timeout = self.config.read_timeout;
        let mut last_output = Instant::now();

        loop {
            if self.cancel.is_cancelled() {
                warn!(pid, "run cancelled, tearing down process group");
                kill_with_grace(group, child);
                return Err(SupervisorError::Cancelled {
                    output: String::new(),
                });
            }

            let did_read = session.read_available()?;
            if did_read {
                last_output = Instant::now();
            }

            if !did_read && !session.eof && last_output.elapsed() >= read_timeout {
                warn!(
                    target: event_names::PROCESS_READ_TIMEOUT,
                    pid,
                    read_timeout_secs = read_timeout.as_secs(),
                    "no output from child"
                );
                session.append(&format!(
                    "\n* Timed out after {} sec while waiting for output from child.\n",
                    read_timeout.as_secs()
                ));
                if let Some(status) = child.try_wait()? {
                    session.append(&format!("* Child process {} died.\n", pid));
                    return Ok(status);
                }
                last_output = Instant::now();
            }

            match child.try_wait() {
                Ok(Some(status)) => {
                    // Bounded: a grandchild may still hold the slave.
                    session.drain()?;
                    trace!(pid, ?status, "process exited");
                    return Ok(status);
                }
                Ok(None) => {
                    if !did_read {
                        thread::sleep(POLL_INTERVAL);
                    }
                }
                Err(e) => {
                    error!(pid, error = %e, "failed to wait for child");
                    return Err(SupervisorError::Io(e));
                }
            }
        }
    }
}

/// Per-spawn reading state.
struct ReadSession {
    /// Non-blocking pty master.
    reader: File,
    output: SharedOutput,
    /// Bytes of an unterminated line.
    pending: Vec<u8>,
    kept: usize,
    max_output: usize,
    truncated: bool,
    eof: bool,
}

impl ReadSession {
    /// Read whatever is available without blocking.
    fn read_available(&mut self) -> io::Result<bool> {
        if self.eof {
            return Ok(false);
        }
        let mut chunk = [0u8; 8192];
        let mut did_read = false;
        loop {
            match self.reader.read(&mut chunk) {
                Ok(0) => {
                    self.eof = true;
                    break;
                }
                Ok(n) => {
                    did_read = true;
                    self.push_bytes(&chunk[..n]);
                }
                // Linux reports a master whose slave is fully closed as EIO.
                Err(e) if e.raw_os_error() == Some(libc::EIO) => {
                    self.eof = true;
                    break;
                }
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => break,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(e),
            }
        }
        Ok(did_read)
    }

    /// Read until EOF, or until [`EXIT_DRAIN`] passes without output.
    fn drain(&mut self) -> io::Result<()> {
        let mut quiet_since = Instant::now();
        while !self.eof && quiet_since.elapsed() < EXIT_DRAIN {
            if self.read_available()? {
                quiet_since = Instant::now();
            } else {
                thread::sleep(POLL_INTERVAL);
            }
        }
        Ok(())
    }

    fn push_bytes(&mut self, bytes: &[u8]) {
        self.pending.extend_from_slice(bytes);
        while let Some(pos) = self.pending.iter().position(|&b| b == b'\n') {
            let line: Vec<u8> = self.pending.drain(..=pos).collect();
            let text = String::from_utf8_lossy(&line[..line.len() - 1]);
            let text = text.strip_suffix('\r').unwrap_or(&text);
            self.append(&format!("{}\n", text));
        }
    }

    fn flush_pending(&mut self) {
        if !self.pending.is_empty() {
            let line = std::mem::take(&mut self.pending);
            let text = String::from_utf8_lossy(&line).into_owned();
            self.append(&text);
        }
    }

    fn append(&mut self, text: &str) {
        if self.truncated {
            return;
        }
        let space = self.max_output.saturating_sub(self.kept);
        let text = if text.len() > space {
            self.truncated = true;
            let mut end = space;
            while !text.is_char_boundary(end) {
                end -= 1;
            }
            &text[..end]
        } else {
            text
        };
        self.kept += text.len();
        if let Ok(mut output) = self.output.lock() {
            output.push_str(text);
        }
    }

    fn snapshot(&self) -> String {
        self.output
            .lock()
            .map(|o| o.clone())
            .unwrap_or_default()
    }
}

/// Both ends of a freshly opened pseudo-terminal.
struct Pty {
    master: File,
    slave: OwnedFd,
}

/// Open a pty with a non-blocking master and no `\n` → `\r\n` output
/// translation on the slave.
fn open_pty() -> io::Result<Pty> {
    let mut master: libc::c_int = -1;
    let mut slave: libc::c_int = -1;
    let rc = unsafe {
        libc::openpty(
            &mut master,
            &mut slave,
            ptr::null_mut(),
            ptr::null_mut::<libc::termios>(),
            ptr::null_mut::<libc::winsize>(),
        )
    };
    if rc != 0 {
        return Err(io::Error::last_os_error());
    }
    // SAFETY: openpty succeeded, so both descriptors are open and ours.
    let (master, slave) = unsafe { (OwnedFd::from_raw_fd(master), OwnedFd::from_raw_fd(slave)) };

    let mut attrs: libc::termios = unsafe { std::mem::zeroed() };
    if unsafe { libc::tcgetattr(slave.as_raw_fd(), &mut attrs) } != 0 {
        return Err(io::Error::last_os_error());
    }
    attrs.c_oflag &= !libc::ONLCR;
    if unsafe { libc::tcsetattr(slave.as_raw_fd(), libc::TCSANOW, &attrs) } != 0 {
        return Err(io::Error::last_os_error());
    }

    set_nonblocking(&master)?;
    Ok(Pty {
        master: File::from(master),
        slave,
    })
}

fn set_nonblocking(fd: &impl AsRawFd) -> io::Result<()> {
    let fd = fd.as_raw_fd();
    let flags = unsafe { libc::fcntl(fd, libc::F_GETFL) };
    if flags < 0 {
        return Err(io::Error::last_os_error());
    }
    if flags & libc::O_NONBLOCK == 0 {
        let result = unsafe { libc::fcntl(fd, libc::F_SETFL, flags | libc::O_NONBLOCK) };
        if result < 0 {
            return Err(io::Error::last_os_error());
        }
    }
    Ok(())
}

/// SIGTERM the group, then SIGKILL after a grace period; reaps the leader.
fn kill_with_grace(group: ProcessGroup, child: &mut Child) {
    let pid = child.id();
    match group.terminate_all() {
        Ok(_) => debug!(pid, "sent SIGTERM to process group"),
        Err(e) => warn!(pid, error = %e, "failed to SIGTERM process group"),
    }

    let deadline = Instant::now() + Duration::from_millis(SIGTERM_GRACE_MS);
    while Instant::now() < deadline {
        match child.try_wait() {
            Ok(Some(_)) => break,
            Ok(None) => thread::sleep(POLL_INTERVAL),
            Err(e) => {
                error!(pid, error = %e, "failed to check process status");
                break;
            }
        }
    }

    // Descendants may outlive the leader's SIGTERM handling.
    if group.is_alive() {
        warn!(pid, "process group still alive after SIGTERM, sending SIGKILL");
        let _ = group.kill_all();
    }
    let _ = child.wait();
    info!(target: event_names::PROCESS_KILLED, pid, "process group torn down");
}

/// Shell-style exit code: the code itself, or 128 + terminating signal.
pub fn translate_status(status: ExitStatus) -> i32 {
    match (status.code(), status.signal()) {
        (Some(code), _) => code,
        (None, Some(signal)) => 128 + signal,
        (None, None) => -1,
    }
}

/// Fill the `{verbose}` slot of a command template.
///
/// The slot becomes `-v` at verbosity 2 and above and is removed otherwise.
pub fn expand_verbosity(template: &str, verbosity: u8) -> String {
    let flag = if verbosity >= 2 { VERBOSE_FLAG } else { "" };
    template.replace(VERBOSE_SLOT, flag)
}

/// Builder for a supervisor with custom configuration.
#[derive(Debug, Default)]
pub struct SupervisorBuilder {
    config: SupervisorConfig,
}

impl SupervisorBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn read_timeout(mut self, timeout: Duration) -> Self {
        self.config.read_timeout = timeout;
        self
    }

    pub fn max_output(mut self, max_bytes: usize) -> Self {
        self.config.max_output_bytes = max_bytes;
        self
    }

    pub fn shell(mut self, shell: impl Into<String>) -> Self {
        self.config.shell = shell.into();
        self
    }

    pub fn build(self, cancel: CancelToken) -> Supervisor {
        Supervisor::new(self.config, cancel)
    }
}
