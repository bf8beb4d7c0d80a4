//! A single supervised service and its start/stop state machine.
//!
//! A `Service` is either stopped or running. `start` launches the configured
//! command in a fresh process group and hands the child to a completion-watcher
//! task; `stop` only signals that group. The running handle is set by `start`
//! and cleared by the watcher as soon as the child has been reaped, never by
//! `stop`, so a service that was signaled but has not exited yet still reads as
//! running. The exit notification is sent after the output pipes drain (bounded
//! by a timeout), so whoever reacts to it sees the run's complete output.

use std::io;
use std::process::Stdio;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::process::{Child, Command};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::error::ServiceError;
use crate::notify::Notifier;
use crate::output::{OutputSink, Viewport};
use crate::process::{format_title, ServiceSpec, ServiceStatus};

/// How long the watcher waits for the output pipes to drain before announcing
/// the exit. Background descendants can keep the pipes open past that.
const OUTPUT_DRAIN_TIMEOUT: Duration = Duration::from_millis(500);

const READ_CHUNK: usize = 8 * 1024;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct RunHandle {
    pid: u32,
    run: u64,
}

#[derive(Debug, Default)]
struct RunState {
    current: Option<RunHandle>,
    launches: u64,
}

/// One user-defined service.
#[derive(Debug)]
pub struct Service {
    id: usize,
    spec: ServiceSpec,
    run: Arc<Mutex<RunState>>,
    sink: Arc<OutputSink>,
    notifier: Notifier,
}

impl Service {
    /// Creates a stopped service whose output sink starts paused.
    pub fn new(id: usize, spec: ServiceSpec, viewport: Viewport, notifier: Notifier) -> Self {
        Self {
            id,
            spec,
            run: Arc::new(Mutex::new(RunState::default())),
            sink: Arc::new(OutputSink::new(viewport)),
            notifier,
        }
    }

    pub fn id(&self) -> usize {
        self.id
    }

    pub fn name(&self) -> &str {
        &self.spec.name
    }

    pub fn spec(&self) -> &ServiceSpec {
        &self.spec
    }

    pub fn status(&self) -> ServiceStatus {
        match self.lock_run().current {
            Some(handle) => ServiceStatus::Running { pid: handle.pid },
            None => ServiceStatus::Stopped,
        }
    }

    pub fn is_running(&self) -> bool {
        self.status().is_running()
    }

    /// List title with the live PID, read from the running handle at call time.
    pub fn display_name(&self) -> String {
        format_title(&self.spec.name, self.status())
    }

    /// Everything this service has printed since startup, across all runs.
    pub fn history(&self) -> Vec<u8> {
        self.sink.history()
    }

    pub fn pause_output(&self) {
        self.sink.pause();
    }

    pub fn resume_output(&self) {
        self.sink.resume();
    }

    /// Repaints the viewport from this service's history, then resumes forwarding.
    pub fn show_in_viewport(&self) {
        self.sink.resume_into_viewport();
    }

    /// Launches the command and returns the child's PID.
    ///
    /// Must be called from within a tokio runtime: output pumps and the
    /// completion-watcher are spawned as tasks.
    pub fn start(&self) -> Result<u32, ServiceError> {
        let mut run = self.lock_run();
        if run.current.is_some() {
            let err = ServiceError::AlreadyRunning {
                name: self.spec.name.clone(),
            };
            warn!(service = %self.spec.name, kind = err.kind(), "{}", err);
            return Err(err);
        }

        let mut child = match self.command().spawn() {
            Ok(child) => child,
            Err(source) => {
                let err = ServiceError::LaunchFailed {
                    name: self.spec.name.clone(),
                    source,
                };
                error!(service = %self.spec.name, kind = err.kind(), "{}", err);
                return Err(err);
            }
        };
        let Some(pid) = child.id() else {
            let err = ServiceError::LaunchFailed {
                name: self.spec.name.clone(),
                source: io::Error::new(io::ErrorKind::Other, "child exited before reporting a pid"),
            };
            error!(service = %self.spec.name, kind = err.kind(), "{}", err);
            return Err(err);
        };

        run.launches += 1;
        let handle = RunHandle {
            pid,
            run: run.launches,
        };
        run.current = Some(handle);

        let mut pumps = Vec::with_capacity(2);
        if let Some(stdout) = child.stdout.take() {
            pumps.push(tokio::spawn(pump_output(stdout, self.sink.clone())));
        }
        if let Some(stderr) = child.stderr.take() {
            pumps.push(tokio::spawn(pump_output(stderr, self.sink.clone())));
        }

        tokio::spawn(watch_exit(
            Watch {
                id: self.id,
                name: self.spec.name.clone(),
                handle,
                run: self.run.clone(),
                notifier: self.notifier.clone(),
            },
            child,
            pumps,
        ));

        info!(service = %self.spec.name, pid, "Started service - {}", self.spec.name);
        // Sent before the lock is released so it always precedes the watcher's
        // exit notification for the same run.
        self.notifier.service_changed(self.id);
        Ok(pid)
    }

    /// Sends SIGTERM to the service's process group.
    ///
    /// The running handle is left alone; the completion-watcher clears it once
    /// the child is reaped.
    pub fn stop(&self) -> Result<(), ServiceError> {
        let run = self.lock_run();
        let Some(handle) = run.current else {
            let err = ServiceError::NotRunning {
                name: self.spec.name.clone(),
            };
            warn!(service = %self.spec.name, kind = err.kind(), "{}", err);
            return Err(err);
        };
        info!(service = %self.spec.name, pid = handle.pid, "Stopping service - {}", self.spec.name);
        terminate_group(handle.pid).map_err(|source| {
            let err = ServiceError::SignalFailed {
                name: self.spec.name.clone(),
                source,
            };
            error!(service = %self.spec.name, kind = err.kind(), "{}", err);
            err
        })
    }

    /// Stops the service if it is running, starts it otherwise. Failures are only logged.
    pub fn toggle(&self) {
        let _ = if self.is_running() {
            self.stop()
        } else {
            self.start().map(|_| ())
        };
    }

    fn command(&self) -> Command {
        let mut command = shell_command(&self.spec.command);
        if let Some(dir) = &self.spec.dir {
            command.current_dir(dir);
        }
        command
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());
        command
    }

    fn lock_run(&self) -> MutexGuard<'_, RunState> {
        self.run.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

// The child leads its own process group so one signal reaches everything the
// shell spawns.
#[cfg(unix)]
fn shell_command(line: &str) -> Command {
    let mut command = Command::new("sh");
    command.arg("-c").arg(line);
    command.process_group(0);
    command
}

#[cfg(not(unix))]
fn shell_command(line: &str) -> Command {
    let mut command = Command::new("cmd");
    command.arg("/C").arg(line);
    command
}

#[cfg(unix)]
fn terminate_group(pid: u32) -> io::Result<()> {
    let pid = libc::pid_t::try_from(pid)
        .map_err(|_| io::Error::new(io::ErrorKind::InvalidInput, "pid out of range"))?;
    // SAFETY: getpgid and killpg take plain integers and touch no memory of ours.
    let pgid = unsafe { libc::getpgid(pid) };
    if pgid < 0 {
        return Err(io::Error::last_os_error());
    }
    // Our children lead their own group; anything else means the pid was recycled.
    if pgid != pid {
        return Err(io::Error::from_raw_os_error(libc::ESRCH));
    }
    if unsafe { libc::killpg(pgid, libc::SIGTERM) } < 0 {
        return Err(io::Error::last_os_error());
    }
    Ok(())
}

#[cfg(not(unix))]
fn terminate_group(_pid: u32) -> io::Result<()> {
    Err(io::Error::new(
        io::ErrorKind::Unsupported,
        "process group signals are only available on unix",
    ))
}

async fn pump_output<R>(mut reader: R, sink: Arc<OutputSink>)
where
    R: AsyncRead + Unpin,
{
    let mut buf = vec![0u8; READ_CHUNK];
    loop {
        match reader.read(&mut buf).await {
            Ok(0) => break,
            Ok(n) => sink.write(&buf[..n]),
            Err(err) => {
                debug!("output stream closed: {}", err);
                break;
            }
        }
    }
}

struct Watch {
    id: usize,
    name: String,
    handle: RunHandle,
    run: Arc<Mutex<RunState>>,
    notifier: Notifier,
}

async fn watch_exit(watch: Watch, mut child: Child, pumps: Vec<JoinHandle<()>>) {
    let status = child.wait().await;

    {
        let mut run = watch.run.lock().unwrap_or_else(PoisonError::into_inner);
        if run.current == Some(watch.handle) {
            run.current = None;
        }
    }

    // The handle is already clear; only the exit notification waits on the pipes.
    let drained = tokio::time::timeout(OUTPUT_DRAIN_TIMEOUT, async {
        for pump in pumps {
            let _ = pump.await;
        }
    })
    .await;
    if drained.is_err() {
        debug!(service = %watch.name, "output still open after exit, leaving pumps running");
    }

    match status {
        Ok(status) => info!(
            service = %watch.name,
            pid = watch.handle.pid,
            %status,
            "Stopped service - {}",
            watch.name
        ),
        Err(err) => error!(
            service = %watch.name,
            pid = watch.handle.pid,
            "Stopped service - {} (wait failed: {})",
            watch.name,
            err
        ),
    }
    watch.notifier.service_changed(watch.id);
}
