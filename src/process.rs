//! Typed external-process boundary.
//!
//! Every external tool the harness touches (generator, compilers, the
//! compiled test binaries) goes through [`invoke`]. Arguments are passed as
//! an argv vector, never through a shell, so there is no escaping anywhere
//! else in the crate.
//!
//! # Process ownership
//!
//! Each invocation is spawned as the leader of a fresh process group, and the
//! group id is recorded in a [`ChildRegistry`] until the leader is reaped.
//! Killing the group takes out everything the tool spawned in turn (the
//! compiler driver's `cc1`/`as`/`ld`, for instance). On cancellation the
//! registry SIGKILLs exactly the groups it owns; nothing is discovered by
//! scanning the OS process table.
//!
//! When the leader exits, the rest of its group is killed before the leader
//! is reaped. An unreaped leader pins its pid, so the group id cannot have
//! been recycled when it is signalled, and nothing the tool left behind
//! outlives the invocation. Descendants that moved to another session are
//! out of reach; waiting on the pipes they hold is bounded by the same
//! timeout and cancellation as the process itself.

use std::collections::BTreeSet;
use std::ffi::{OsStr, OsString};
use std::fmt;
use std::io::Read;
use std::os::unix::process::CommandExt as _;
use std::process::{Child, Command, ExitStatus, Stdio};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use tracing::{debug, trace};

const POLL_INTERVAL: Duration = Duration::from_millis(10);

// ---------------------------------------------------------------------------
// Invocation
// ---------------------------------------------------------------------------

/// A program plus its argv, without any shell in between.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Invocation {
    program: OsString,
    args: Vec<OsString>,
}

impl Invocation {
    pub fn new(program: impl AsRef<OsStr>) -> Self {
        Self {
            program: program.as_ref().to_owned(),
            args: Vec::new(),
        }
    }

    #[must_use]
    pub fn arg(mut self, arg: impl AsRef<OsStr>) -> Self {
        self.args.push(arg.as_ref().to_owned());
        self
    }

    #[must_use]
    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<OsStr>,
    {
        self.args
            .extend(args.into_iter().map(|a| a.as_ref().to_owned()));
        self
    }

    #[must_use]
    pub fn program(&self) -> &OsStr {
        &self.program
    }

    #[must_use]
    pub fn arguments(&self) -> &[OsString] {
        &self.args
    }

    fn program_lossy(&self) -> String {
        self.program.to_string_lossy().into_owned()
    }
}

impl fmt::Display for Invocation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.program.to_string_lossy())?;
        for arg in &self.args {
            write!(f, " {}", arg.to_string_lossy())?;
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// ProcessOutput / ProcessError
// ---------------------------------------------------------------------------

/// Everything captured from a process that ran to completion.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ProcessOutput {
    /// `None` when the process was terminated by a signal.
    pub exit_code: Option<i32>,
    pub stdout: Vec<u8>,
    pub stderr: Vec<u8>,
    pub elapsed: Duration,
}

impl ProcessOutput {
    #[must_use]
    pub const fn success(&self) -> bool {
        matches!(self.exit_code, Some(0))
    }
}

/// Why an invocation did not produce a [`ProcessOutput`].
#[derive(Debug)]
pub enum ProcessError {
    /// The program could not be started.
    Spawn {
        program: String,
        source: std::io::Error,
    },
    /// Waiting on the child failed.
    Wait {
        program: String,
        source: std::io::Error,
    },
    /// The deadline passed; the whole process group was killed.
    TimedOut { program: String, after: Duration },
    /// The run was cancelled; the process group was killed (or never started).
    Cancelled,
}

impl ProcessError {
    #[must_use]
    pub const fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled)
    }

    #[must_use]
    pub const fn is_timeout(&self) -> bool {
        matches!(self, Self::TimedOut { .. })
    }
}

impl fmt::Display for ProcessError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Spawn { program, source } => write!(f, "failed to start '{program}': {source}"),
            Self::Wait { program, source } => write!(f, "failed to wait for '{program}': {source}"),
            Self::TimedOut { program, after } => {
                write!(f, "'{program}' killed after {}s timeout", after.as_secs_f64())
            }
            Self::Cancelled => write!(f, "cancelled"),
        }
    }
}

impl std::error::Error for ProcessError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Spawn { source, .. } | Self::Wait { source, .. } => Some(source),
            Self::TimedOut { .. } | Self::Cancelled => None,
        }
    }
}

// ---------------------------------------------------------------------------
// ChildRegistry
// ---------------------------------------------------------------------------

/// The set of live process groups spawned during a run, plus the run-wide
/// cancellation flag.
#[derive(Debug, Default)]
pub struct ChildRegistry {
    cancelled: AtomicBool,
    groups: Mutex<BTreeSet<u32>>,
    spawned: AtomicU64,
}

impl ChildRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Whether [`cancel`](Self::cancel) has been called.
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }

    /// Mark the run cancelled and SIGKILL every tracked process group.
    ///
    /// Later spawns are refused. Safe to call from a signal-handler thread and
    /// more than once. Returns how many groups were signalled.
    pub fn cancel(&self) -> usize {
        self.cancelled.store(true, Ordering::SeqCst);
        let groups = self.lock();
        for &pgid in groups.iter() {
            kill_group(pgid);
        }
        debug!(groups = groups.len(), "cancelled: killed live process groups");
        groups.len()
    }

    /// Number of process groups currently tracked.
    #[must_use]
    pub fn live(&self) -> usize {
        self.lock().len()
    }

    /// Number of processes spawned over the registry's lifetime.
    #[must_use]
    pub fn spawned(&self) -> u64 {
        self.spawned.load(Ordering::Relaxed)
    }

    fn lock(&self) -> MutexGuard<'_, BTreeSet<u32>> {
        self.groups.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Record a freshly spawned group leader. If the run was cancelled in the
    /// meantime, the group is killed and reaped here instead.
    fn register(&self, child: &mut Child) -> Result<(), ProcessError> {
        let pgid = child.id();
        {
            let mut groups = self.lock();
            if !self.is_cancelled() {
                groups.insert(pgid);
                self.spawned.fetch_add(1, Ordering::Relaxed);
                return Ok(());
            }
            kill_group(pgid);
        }
        let _ = child.wait();
        Err(ProcessError::Cancelled)
    }

    /// Non-blocking reap. Once the leader has exited, kills whatever is left
    /// of its group, deregisters it and reaps the leader.
    fn try_reap(&self, child: &mut Child) -> std::io::Result<Option<ExitStatus>> {
        let pgid = child.id();
        {
            let mut groups = self.lock();
            if !leader_exited(pgid)? {
                return Ok(None);
            }
            if groups.remove(&pgid) {
                kill_group(pgid);
            }
        }
        child.wait().map(Some)
    }

    /// Kill the child's whole group, deregister it, then reap the leader.
    fn kill_and_reap(&self, child: &mut Child) -> std::io::Result<ExitStatus> {
        {
            let mut groups = self.lock();
            let pgid = child.id();
            if groups.remove(&pgid) {
                kill_group(pgid);
            }
        }
        child.wait()
    }
}

#[allow(unsafe_code)]
fn kill_group(pgid: u32) {
    let Ok(pgid) = libc::pid_t::try_from(pgid) else {
        return;
    };
    if pgid <= 0 {
        return;
    }
    // SAFETY: kill(2) only takes integer arguments; a negative pid addresses
    // the process group we created with `process_group(0)`.
    let rc = unsafe { libc::kill(-pgid, libc::SIGKILL) };
    trace!(pgid, rc, "kill process group");
}

/// Whether child `pid` has exited, without reaping it.
#[allow(unsafe_code)]
fn leader_exited(pid: u32) -> std::io::Result<bool> {
    // SAFETY: siginfo_t is a plain C struct; all-zero is a valid value and
    // is what waitid(2) leaves behind when no child has changed state.
    let mut info: libc::siginfo_t = unsafe { std::mem::zeroed() };
    // SAFETY: `info` is a valid, writable siginfo_t for the whole call.
    let rc = unsafe {
        libc::waitid(
            libc::P_PID,
            libc::id_t::from(pid),
            &raw mut info,
            libc::WEXITED | libc::WNOHANG | libc::WNOWAIT,
        )
    };
    if rc == -1 {
        return Err(std::io::Error::last_os_error());
    }
    Ok(info.si_signo != 0)
}

// ---------------------------------------------------------------------------
// invoke
// ---------------------------------------------------------------------------

/// Run `invocation` to completion, capturing stdout and stderr.
///
/// With `timeout = None` the call waits as long as the process runs (or
/// until the registry is cancelled).
///
/// # Errors
///
/// - [`ProcessError::Spawn`] if the program cannot be started.
/// - [`ProcessError::TimedOut`] if it outlives `timeout`; its group is killed.
/// - [`ProcessError::Cancelled`] if the registry was cancelled before or
///   while it ran.
/// - [`ProcessError::Wait`] if polling the child fails.
pub fn invoke(
    invocation: &Invocation,
    timeout: Option<Duration>,
    registry: &ChildRegistry,
) -> Result<ProcessOutput, ProcessError> {
    if registry.is_cancelled() {
        return Err(ProcessError::Cancelled);
    }

    let program = invocation.program_lossy();
    let start = Instant::now();

    let mut child = Command::new(&invocation.program)
        .args(&invocation.args)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .process_group(0)
        .spawn()
        .map_err(|source| ProcessError::Spawn {
            program: program.clone(),
            source,
        })?;

    let stdout = drain(child.stdout.take());
    let stderr = drain(child.stderr.take());

    registry.register(&mut child)?;
    trace!(pid = child.id(), %invocation, "spawned");

    let status = loop {
        match registry.try_reap(&mut child) {
            Ok(Some(status)) => break status,
            Ok(None) => {}
            Err(source) => {
                let _ = registry.kill_and_reap(&mut child);
                return Err(ProcessError::Wait { program, source });
            }
        }

        if registry.is_cancelled() {
            let _ = registry.kill_and_reap(&mut child);
            return Err(ProcessError::Cancelled);
        }

        if let Some(limit) = timeout
            && start.elapsed() >= limit
        {
            let _ = registry.kill_and_reap(&mut child);
            debug!(%program, timeout_s = limit.as_secs_f64(), "timed out");
            return Err(ProcessError::TimedOut {
                program,
                after: limit,
            });
        }

        thread::sleep(POLL_INTERVAL);
    };

    // The group is dead, but a descendant that left it can still hold the
    // pipes open.
    while !(stdout.is_finished() && stderr.is_finished()) {
        if registry.is_cancelled() {
            debug!(%program, "cancelled while output pipes were held open");
            return Err(ProcessError::Cancelled);
        }
        if let Some(limit) = timeout
            && start.elapsed() >= limit
        {
            debug!(%program, timeout_s = limit.as_secs_f64(), "output pipes held open past timeout");
            return Err(ProcessError::TimedOut {
                program,
                after: limit,
            });
        }
        thread::sleep(POLL_INTERVAL);
    }

    let stdout = collect(stdout);
    let stderr = collect(stderr);

    // A leader killed by `cancel()` exits by signal; report that as
    // cancellation rather than as a tool failure.
    if registry.is_cancelled() && status.code().is_none() {
        return Err(ProcessError::Cancelled);
    }

    Ok(ProcessOutput {
        exit_code: status.code(),
        stdout,
        stderr,
        elapsed: start.elapsed(),
    })
}

fn drain<R: Read + Send + 'static>(pipe: Option<R>) -> JoinHandle<Vec<u8>> {
    thread::spawn(move || {
        let mut buf = Vec::new();
        if let Some(mut pipe) = pipe {
            let _ = pipe.read_to_end(&mut buf);
        }
        buf
    })
}

fn collect(reader: JoinHandle<Vec<u8>>) -> Vec<u8> {
    reader.join().unwrap_or_default()
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
