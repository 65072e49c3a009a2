//! Run-scoped cancellation: process-group registry and global deadline.
//!
//! A [`CancelToken`] is created once per probe run and cloned into every
//! component that may block. It owns:
//! - the table of in-flight supervised process groups (pid → group)
//! - the run-once cancelled flag
//! - the deadline watchdog, which kills every registered group when the
//!   run's time budget is exhausted and then re-arms for a short grace
//!   period so results can still be published
//!
//! Blocking code never waits on a signal: it polls [`CancelToken::is_cancelled`]
//! between short reads.

use crate::logging::event_names;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Condvar, Mutex, MutexGuard};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

/// Handle on a process group whose leader is a supervised child.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProcessGroup {
    pgid: i32,
}

impl ProcessGroup {
    /// The child must have been started as its own group leader, so the
    /// group id equals its pid.
    pub fn from_leader(pid: u32) -> Self {
        Self { pgid: pid as i32 }
    }

    pub fn pgid(&self) -> i32 {
        self.pgid
    }

    /// SIGTERM the whole group.
    ///
    /// Returns `Ok(false)` when the group no longer exists.
    pub fn terminate_all(&self) -> std::io::Result<bool> {
        self.signal(libc::SIGTERM)
    }

    /// SIGKILL the whole group.
    pub fn kill_all(&self) -> std::io::Result<bool> {
        self.signal(libc::SIGKILL)
    }

    /// Whether any member of the group is still around (zombies included).
    pub fn is_alive(&self) -> bool {
        matches!(self.signal(0), Ok(true))
    }

    fn signal(&self, signal: i32) -> std::io::Result<bool> {
        if self.pgid <= 1 {
            return Err(std::io::Error::new(
                std::io::ErrorKind::InvalidInput,
                format!("refusing to signal process group {}", self.pgid),
            ));
        }
        // Negative pid targets the process group.
        let result = unsafe { libc::kill(-self.pgid, signal) };
        if result == 0 {
            return Ok(true);
        }
        let err = std::io::Error::last_os_error();
        match err.raw_os_error() {
            Some(libc::ESRCH) => Ok(false),
            // Exists, but not ours to signal.
            Some(libc::EPERM) if signal == 0 => Ok(true),
            _ => Err(err),
        }
    }
}

/// Output buffer shared between a supervisor and the registry, so the
/// text accumulated so far survives cancellation.
pub type SharedOutput = Arc<Mutex<String>>;

#[derive(Debug)]
struct Registered {
    group: ProcessGroup,
    command: String,
    output: SharedOutput,
}

#[derive(Debug, Default)]
struct DeadlineState {
    /// When the watchdog should next fire, if armed.
    at: Option<Instant>,
    /// Whether the next firing is the grace expiry.
    in_grace: bool,
    shutdown: bool,
}

#[derive(Debug, Default)]
struct Inner {
    registry: Mutex<HashMap<u32, Registered>>,
    cancelled: AtomicBool,
    grace_expired: AtomicBool,
    deadline: Mutex<DeadlineState>,
    wakeup: Condvar,
}

/// Cheaply clonable cancellation handle for one run.
#[derive(Debug, Clone, Default)]
pub struct CancelToken {
    inner: Arc<Inner>,
}

/// Returned by [`CancelToken::register`] when the run is already cancelled.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AlreadyCancelled;

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    /// Whether the deadline fired (or [`cancel`](Self::cancel) was called).
    pub fn is_cancelled(&self) -> bool {
        self.inner.cancelled.load(Ordering::SeqCst)
    }

    /// Whether the post-cancellation grace period also ran out.
    pub fn grace_expired(&self) -> bool {
        self.inner.grace_expired.load(Ordering::SeqCst)
    }

    /// Cancel the run: set the flag and terminate every registered group.
    ///
    /// Idempotent; later calls only re-signal groups still registered.
    pub fn cancel(&self) {
        let registry = self.lock_registry();
        let first = !self.inner.cancelled.swap(true, Ordering::SeqCst);
        if first {
            warn!(
                target: event_names::DEADLINE_FIRED,
                in_flight = registry.len(),
                "run cancelled, terminating supervised processes"
            );
        }
        terminate_registered(&registry);
    }

    /// Register a supervised group for the duration of the returned guard.
    ///
    /// Fails when the run is already cancelled; the caller must then kill
    /// the group itself and stop.
    pub fn register(
        &self,
        pid: u32,
        group: ProcessGroup,
        command: &str,
        output: SharedOutput,
    ) -> Result<Registration, AlreadyCancelled> {
        let mut registry = self.lock_registry();
        if self.is_cancelled() {
            return Err(AlreadyCancelled);
        }
        let entry = Registered {
            group,
            command: command.to_string(),
            output,
        };
        if registry.insert(pid, entry).is_some() {
            warn!(pid, "replaced a stale registry entry for reused pid");
        }
        debug!(pid, pgid = group.pgid(), "process group registered");
        Ok(Registration {
            token: self.clone(),
            pid,
        })
    }

    /// Number of groups currently registered.
    pub fn in_flight(&self) -> usize {
        self.lock_registry().len()
    }

    /// Output accumulated so far by a registered process.
    pub fn partial_output(&self, pid: u32) -> Option<String> {
        let registry = self.lock_registry();
        let entry = registry.get(&pid)?;
        let output = entry
            .output
            .lock()
            .map(|o| o.clone())
            .unwrap_or_default();
        Some(output)
    }

    /// Start the deadline watchdog.
    ///
    /// When `timeout` elapses the run is cancelled; the watchdog then
    /// re-arms for `grace`, after which [`grace_expired`](Self::grace_expired)
    /// becomes true. Dropping the returned guard disarms it.
    pub fn arm_deadline(&self, timeout: Duration, grace: Duration) -> DeadlineGuard {
        {
            let mut state = self.lock_deadline();
            state.at = Some(Instant::now() + timeout);
            state.in_grace = false;
            state.shutdown = false;
        }
        let token = self.clone();
        let handle = thread::Builder::new()
            .name("gridprobe-deadline".to_string())
            .spawn(move || token.watchdog(grace))
            .map_err(|e| warn!(error = %e, "failed to start deadline watchdog"))
            .ok();
        DeadlineGuard {
            token: self.clone(),
            handle,
        }
    }

    fn watchdog(&self, grace: Duration) {
        let mut state = self.lock_deadline();
        loop {
            if state.shutdown {
                return;
            }
            let Some(at) = state.at else {
                state = self
                    .inner
                    .wakeup
                    .wait(state)
                    .unwrap_or_else(|e| e.into_inner());
                continue;
            };
            let now = Instant::now();
            if now < at {
                state = self
                    .inner
                    .wakeup
                    .wait_timeout(state, at - now)
                    .map(|(s, _)| s)
                    .unwrap_or_else(|e| e.into_inner().0);
                continue;
            }

            if state.in_grace {
                state.at = None;
                drop(state);
                self.inner.grace_expired.store(true, Ordering::SeqCst);
                warn!(
                    target: event_names::GRACE_EXPIRED,
                    grace_secs = grace.as_secs_f64(),
                    "grace period after cancellation expired"
                );
                // Anything spawned in the meantime goes too.
                terminate_registered(&self.lock_registry());
                return;
            }

            state.at = Some(now + grace);
            state.in_grace = true;
            drop(state);
            self.cancel();
            state = self.lock_deadline();
        }
    }

    fn disarm(&self) {
        let mut state = self.lock_deadline();
        state.at = None;
        state.shutdown = true;
        self.inner.wakeup.notify_all();
    }

    fn deregister(&self, pid: u32) {
        if self.lock_registry().remove(&pid).is_some() {
            debug!(pid, "process group deregistered");
        }
    }

    fn lock_registry(&self) -> MutexGuard<'_, HashMap<u32, Registered>> {
        self.inner
            .registry
            .lock()
            .unwrap_or_else(|e| e.into_inner())
    }

    fn lock_deadline(&self) -> MutexGuard<'_, DeadlineState> {
        self.inner
            .deadline
            .lock()
            .unwrap_or_else(|e| e.into_inner())
    }
}

fn terminate_registered(registry: &HashMap<u32, Registered>) {
    for (pid, entry) in registry {
        match entry.group.terminate_all() {
            Ok(true) => info!(
                target: event_names::PROCESS_KILLED,
                pid,
                pgid = entry.group.pgid(),
                command = entry.command.as_str(),
                "terminated process group"
            ),
            Ok(false) => debug!(pid, "process group already gone"),
            Err(e) => warn!(pid, error = %e, "failed to signal process group"),
        }
    }
}

/// Keeps a pid registered; deregisters on drop.
#[derive(Debug)]
pub struct Registration {
    token: CancelToken,
    pid: u32,
}

impl Registration {
    pub fn pid(&self) -> u32 {
        self.pid
    }
}

impl Drop for Registration {
    fn drop(&mut self) {
        self.token.deregister(self.pid);
    }
}

/// Disarms the deadline watchdog on drop.
#[derive(Debug)]
pub struct DeadlineGuard {
    token: CancelToken,
    handle: Option<JoinHandle<()>>,
}

impl DeadlineGuard {
    /// Disarm now and wait for the watchdog thread to exit.
    pub fn disarm(mut self) {
        self.shutdown();
    }

    fn shutdown(&mut self) {
        self.token.disarm();
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}

impl Drop for DeadlineGuard {
    fn drop(&mut self) {
        self.shutdown();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::os::unix::process::CommandExt;
    use std::process::Command;

    fn sleeper() -> std::process::Child {
        Command::new("sleep")
            .arg("30")
            .process_group(0)
            .spawn()
            .expect("spawn sleep")
    }

    #[test]
    fn test_register_and_deregister() {
        let token = CancelToken::new();
        let output: SharedOutput = Arc::new(Mutex::new("partial".to_string()));
        {
            let reg = token
                .register(4242, ProcessGroup::from_leader(4242), "x", output)
                .unwrap();
            assert_eq!(reg.pid(), 4242);
            assert_eq!(token.in_flight(), 1);
            assert_eq!(token.partial_output(4242).as_deref(), Some("partial"));
        }
        assert_eq!(token.in_flight(), 0);
    }

    #[test]
    fn test_register_after_cancel_fails() {
        let token = CancelToken::new();
        token.cancel();
        assert!(token.is_cancelled());
        let result = token.register(
            4243,
            ProcessGroup::from_leader(4243),
            "x",
            SharedOutput::default(),
        );
        assert_eq!(result.unwrap_err(), AlreadyCancelled);
        assert_eq!(token.in_flight(), 0);
    }

    #[test]
    fn test_cancel_terminates_registered_group() {
        let token = CancelToken::new();
        let mut child = sleeper();
        let pid = child.id();
        let _reg = token
            .register(pid, ProcessGroup::from_leader(pid), "sleep 30", SharedOutput::default())
            .unwrap();

        token.cancel();
        let status = child.wait().unwrap();
        assert!(!status.success());
    }

    #[test]
    fn test_signal_missing_group_is_not_an_error() {
        let mut child = Command::new("true").process_group(0).spawn().unwrap();
        let pid = child.id();
        child.wait().unwrap();
        let group = ProcessGroup::from_leader(pid);
        assert!(!group.terminate_all().unwrap());
        assert!(!group.is_alive());
    }

    #[test]
    fn test_refuses_init_group() {
        assert!(ProcessGroup::from_leader(1).terminate_all().is_err());
        assert!(ProcessGroup::from_leader(0).kill_all().is_err());
    }

    #[test]
    fn test_deadline_fires_then_grace_expires() {
        let token = CancelToken::new();
        let _guard = token.arm_deadline(Duration::from_millis(50), Duration::from_millis(50));
        let start = Instant::now();
        while !token.grace_expired() && start.elapsed() < Duration::from_secs(5) {
            thread::sleep(Duration::from_millis(10));
        }
        assert!(token.is_cancelled());
        assert!(token.grace_expired());
    }

    #[test]
    fn test_disarmed_deadline_never_fires() {
        let token = CancelToken::new();
        let guard = token.arm_deadline(Duration::from_millis(100), Duration::from_millis(10));
        guard.disarm();
        thread::sleep(Duration::from_millis(200));
        assert!(!token.is_cancelled());
    }
}
