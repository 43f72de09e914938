use super::addr::Address;
use crate::clienv::EnvVar;
use crate::error::{Result, StoveError};
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::process::{ExitStatus, Stdio};
use std::time::{Duration, Instant};
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::process::{Child, Command};
use tracing::{debug, info, warn};

const HOST_PLACEHOLDER: &str = "{host}";
const PORT_PLACEHOLDER: &str = "{port}";

/// What to launch for each worker.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkerEntry {
    pub argv: Vec<String>,
    pub env: BTreeMap<String, String>,
    pub working_dir: Option<PathBuf>,
}

impl WorkerEntry {
    pub fn new<I, S>(argv: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            argv: argv.into_iter().map(Into::into).collect(),
            env: BTreeMap::new(),
            working_dir: None,
        }
    }

    pub fn env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.insert(key.into(), value.into());
        self
    }

    /// Argv with `{host}`/`{port}` filled in for `address`.
    pub fn resolve_argv(&self, address: &Address) -> Vec<String> {
        let port = address.port.to_string();
        self.argv
            .iter()
            .map(|arg| {
                arg.replace(HOST_PLACEHOLDER, &address.host)
                    .replace(PORT_PLACEHOLDER, &port)
            })
            .collect()
    }

    fn command(&self, address: &Address) -> Result<Command> {
        let argv = self.resolve_argv(address);
        let (program, args) = argv
            .split_first()
            .ok_or_else(|| StoveError::Config("command must not be empty".into()))?;

        let mut cmd = Command::new(program);
        cmd.args(args);
        for (key, value) in &self.env {
            cmd.env(key, value);
        }
        cmd.env(EnvVar::StoveHost.as_str(), &address.host);
        cmd.env(EnvVar::StovePort.as_str(), address.port.to_string());

        if let Some(ref dir) = self.working_dir {
            cmd.current_dir(dir);
        }

        cmd.stdin(Stdio::null());
        cmd.stdout(Stdio::piped());
        cmd.stderr(Stdio::piped());
        cmd.kill_on_drop(true);

        // Keep terminal signals (Ctrl+C) away from workers; stove retires them itself.
        #[cfg(unix)]
        cmd.process_group(0);

        Ok(cmd)
    }
}

/// A supervised worker process bound to one address.
#[derive(Debug)]
pub struct Worker {
    id: u64,
    address: Address,
    child: Child,
    spawned_at: Instant,
}

impl Worker {
    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn address(&self) -> &Address {
        &self.address
    }

    /// OS process id, `None` once the process has been reaped.
    pub fn pid(&self) -> Option<u32> {
        self.child.id()
    }

    pub fn uptime(&self) -> Duration {
        self.spawned_at.elapsed()
    }

    /// Liveness without blocking; reaps the process if it already exited.
    pub fn is_alive(&mut self) -> bool {
        matches!(self.child.try_wait(), Ok(None))
    }
}

/// How a worker left.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetireOutcome {
    /// It had already exited before retirement started
    AlreadyExited,
    /// It exited within the grace period
    Graceful,
    /// It was killed after the grace period ran out
    Forced,
}

impl RetireOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            RetireOutcome::AlreadyExited => "already-exited",
            RetireOutcome::Graceful => "graceful",
            RetireOutcome::Forced => "forced",
        }
    }
}

/// Starts workers and takes them down with a graceful-then-forced protocol.
#[derive(Debug, Default)]
pub struct WorkerSupervisor {
    next_id: u64,
}

impl WorkerSupervisor {
    pub fn new() -> Self {
        Self::default()
    }

    /// Launch a worker at `address`. Returns as soon as the process exists;
    /// it may not be listening yet.
    pub fn spawn(&mut self, entry: &WorkerEntry, address: Address) -> Result<Worker> {
        let mut cmd = entry.command(&address)?;
        let mut child = cmd.spawn().map_err(|source| StoveError::Spawn {
            command: entry.argv.join(" "),
            source,
        })?;

        self.next_id += 1;
        let id = self.next_id;
        info!(
            worker = id,
            pid = ?child.id(),
            address = %address,
            "Started worker"
        );

        spawn_log_readers(address.port, &mut child);

        Ok(Worker {
            id,
            address,
            child,
            spawned_at: Instant::now(),
        })
    }

    /// Ask `worker` to exit, wait up to `timeout`, then kill it. The process
    /// is always reaped before this returns. Taking the worker by value
    /// makes a second retirement of the same handle impossible.
    pub async fn retire(&self, mut worker: Worker, timeout: Duration) -> Result<RetireOutcome> {
        let id = worker.id;
        let address = worker.address.clone();

        if let Some(status) = worker.child.try_wait()? {
            debug!(worker = id, address = %address, %status, "Worker had already exited");
            return Ok(RetireOutcome::AlreadyExited);
        }

        debug!(worker = id, address = %address, "Stopping worker gracefully");
        request_termination(&mut worker.child)?;

        match tokio::time::timeout(timeout, worker.child.wait()).await {
            Ok(status) => {
                log_exit(id, &address, status?);
                Ok(RetireOutcome::Graceful)
            }
            Err(_) => {
                warn!(
                    worker = id,
                    address = %address,
                    "Worker did not stop within {:?}, force killing",
                    timeout
                );
                worker.child.kill().await?;
                Ok(RetireOutcome::Forced)
            }
        }
    }
}

fn log_exit(id: u64, address: &Address, status: ExitStatus) {
    debug!(worker = id, address = %address, %status, "Worker stopped gracefully");
}

#[cfg(unix)]
fn request_termination(child: &mut Child) -> Result<()> {
    if let Some(pid) = child.id() {
        // SAFETY: `pid` belongs to a child we have not reaped yet.
        let rc = unsafe { libc::kill(pid as i32, libc::SIGTERM) };
        if rc != 0 {
            let err = std::io::Error::last_os_error();
            // ESRCH: exited between try_wait and kill; the wait below reaps it.
            if err.raw_os_error() != Some(libc::ESRCH) {
                return Err(err.into());
            }
        }
    }
    Ok(())
}

#[cfg(not(unix))]
fn request_termination(child: &mut Child) -> Result<()> {
    child.start_kill()?;
    Ok(())
}

/// Forward a worker's stdout/stderr into the log, line by line.
fn spawn_log_readers(port: u16, child: &mut Child) {
    if let Some(stdout) = child.stdout.take() {
        forward_lines(port, "stdout", stdout);
    }
    if let Some(stderr) = child.stderr.take() {
        forward_lines(port, "stderr", stderr);
    }
}

fn forward_lines<R>(port: u16, stream: &'static str, reader: R)
where
    R: AsyncRead + Unpin + Send + 'static,
{
    tokio::spawn(async move {
        let mut lines = BufReader::new(reader).lines();
        while let Ok(Some(line)) = lines.next_line().await {
            info!(target: "stove::worker", port, stream, "{}", line);
        }
    });
}
