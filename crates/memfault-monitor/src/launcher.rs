//! Process factories for the sampling worker.
//!
//! - [`ThreadLauncher`]: worker on a thread of the calling process; the
//!   endpoints come from an injected [`PipeFactory`].
//! - [`ProcessLauncher`]: worker in a child process speaking JSON lines on
//!   its stdio. The child builds its own stats query and calls
//!   [`serve_stdio`]; the query handed to `launch` stays in the parent
//!   unused, since closures do not cross an exec boundary.

use crate::error::MonitorError;
use crate::pipe::{mem_pipe, Endpoint, PipeFactory};
use crate::sampler::run_sampler;
use memfault_core::StatsQuery;
use std::ffi::{OsStr, OsString};
use std::fmt;
use std::io;
use std::path::PathBuf;
use std::process::{Child, Command, Stdio};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use tracing::{debug, warn};

/// Starts a sampling worker and returns the caller's side of it.
pub trait Launcher: Send + Sync {
    /// Launch a worker that samples through `query` (or through a query the
    /// worker builds itself, for out-of-process launchers).
    fn launch(&self, query: StatsQuery) -> Result<WorkerHandle, MonitorError>;
}

enum Join {
    Thread(JoinHandle<Result<(), MonitorError>>),
    Process(Child),
}

/// Caller-side handle: the pipe endpoint plus whatever must be joined.
pub struct WorkerHandle {
    endpoint: Endpoint,
    join: Join,
}

impl WorkerHandle {
    /// Handle for a worker thread.
    #[must_use]
    pub fn from_thread(endpoint: Endpoint, handle: JoinHandle<Result<(), MonitorError>>) -> Self {
        Self {
            endpoint,
            join: Join::Thread(handle),
        }
    }

    /// Handle for a child process.
    #[must_use]
    pub fn from_child(endpoint: Endpoint, child: Child) -> Self {
        Self {
            endpoint,
            join: Join::Process(child),
        }
    }

    /// The caller's pipe endpoint.
    pub fn endpoint(&mut self) -> &mut Endpoint {
        &mut self.endpoint
    }

    /// Close the pipe and wait for the worker to exit.
    ///
    /// The worker's own outcome has already been delivered over the pipe, so
    /// a worker-side error here is only logged.
    pub fn join(self) -> Result<(), MonitorError> {
        let Self { endpoint, join } = self;
        drop(endpoint);
        match join {
            Join::Thread(h) => match h.join() {
                Ok(Ok(())) => Ok(()),
                Ok(Err(e)) => {
                    debug!(error = %e, "sampler thread ended with error");
                    Ok(())
                }
                Err(_) => Err(MonitorError::WorkerLost),
            },
            Join::Process(mut child) => {
                let status = child.wait()?;
                if !status.success() {
                    debug!(%status, "sampler process exited unsuccessfully");
                }
                Ok(())
            }
        }
    }

    /// Give up on the worker: close the pipe, kill a child process, and do
    /// not wait for a thread (it exits on its next poll of the closed pipe).
    pub fn abandon(self) {
        let Self { endpoint, join } = self;
        drop(endpoint);
        if let Join::Process(mut child) = join {
            if let Err(e) = child.kill() {
                warn!(error = %e, "killing sampler process");
            }
            if let Err(e) = child.wait() {
                debug!(error = %e, "reaping killed sampler process");
            }
        }
    }
}

/// Runs the worker on a thread of the calling process.
#[derive(Clone)]
pub struct ThreadLauncher {
    pipe: PipeFactory,
}

impl Default for ThreadLauncher {
    fn default() -> Self {
        Self {
            pipe: Arc::new(mem_pipe),
        }
    }
}

impl ThreadLauncher {
    /// Thread launcher with a custom pipe factory.
    #[must_use]
    pub fn with_pipe(pipe: PipeFactory) -> Self {
        Self { pipe }
    }
}

impl fmt::Debug for ThreadLauncher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ThreadLauncher").finish_non_exhaustive()
    }
}

impl Launcher for ThreadLauncher {
    fn launch(&self, query: StatsQuery) -> Result<WorkerHandle, MonitorError> {
        let (caller, mut worker) = (self.pipe)();
        let handle = thread::Builder::new()
            .name("memfault-sampler".into())
            .spawn(move || run_sampler(&query, &mut worker))?;
        Ok(WorkerHandle::from_thread(caller, handle))
    }
}

/// Runs the worker as a child process.
#[derive(Clone, Debug)]
pub struct ProcessLauncher {
    program: PathBuf,
    args: Vec<OsString>,
}

impl ProcessLauncher {
    /// Launch `program`, which must call [`serve_stdio`].
    #[must_use]
    pub fn new(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
        }
    }

    /// Append one argument.
    #[must_use]
    pub fn arg(mut self, arg: impl AsRef<OsStr>) -> Self {
        self.args.push(arg.as_ref().to_os_string());
        self
    }

    /// Append several arguments.
    #[must_use]
    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<OsStr>,
    {
        self.args
            .extend(args.into_iter().map(|a| a.as_ref().to_os_string()));
        self
    }
}

impl Launcher for ProcessLauncher {
    fn launch(&self, _query: StatsQuery) -> Result<WorkerHandle, MonitorError> {
        let mut child = Command::new(&self.program)
            .args(&self.args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::inherit())
            .spawn()?;
        debug!(pid = child.id(), program = %self.program.display(), "sampler process spawned");

        let (Some(stdin), Some(stdout)) = (child.stdin.take(), child.stdout.take()) else {
            if let Err(e) = child.kill() {
                warn!(error = %e, "killing sampler process with unpiped stdio");
            }
            return Err(MonitorError::Io(io::Error::new(
                io::ErrorKind::Other,
                "child stdio was not piped",
            )));
        };
        let endpoint = Endpoint::from_streams(stdout, stdin)?;
        Ok(WorkerHandle::from_child(endpoint, child))
    }
}

/// Child-side entry point: run the sampler over this process's stdin/stdout.
///
/// Nothing else may write to stdout while this runs.
pub fn serve_stdio(query: &StatsQuery) -> Result<(), MonitorError> {
    let mut endpoint = Endpoint::from_streams(io::stdin(), io::stdout())?;
    run_sampler(query, &mut endpoint)
}
