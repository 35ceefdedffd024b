//! One live execution: spawn, stream tasks, wait, teardown

use std::future::pending;
use std::io;
use std::path::{Path, PathBuf};
use std::process::{ExitStatus, Stdio};
use std::sync::Arc;
use std::time::Instant;

use chrono::Utc;
use tokio::process::{Child, Command};
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace, warn};

use crate::command::Cmdline;
use crate::config::{CommandInfo, InheritIo};
use crate::context::CapturedContext;
use crate::env;
use crate::error::{CmdError, HandlerFailure, Result, SlotFailures, StdioSlot, TimeoutFailure};
use crate::handlers::{self, ReadStream, WriteStream};
use crate::info::{ExecutionInfo, ExecutionResult};
use crate::pool::WorkerPool;
use crate::process_tree;
use crate::stream_task::{Failure, StreamTaskHelper, TaskHandle, TaskOutcome};

/// Run `cmd` to completion
pub(crate) async fn execute<SO, SE>(
    cmd: &Cmdline<SO, SE>,
    cancel: CancellationToken,
) -> Result<ExecutionResult<SO, SE>>
where
    SO: Send + 'static,
    SE: Send + 'static,
{
    let info = cmd.info();
    if info.command_line.is_empty() {
        return Err(CmdError::InvalidCommand("command line is empty".into()));
    }
    if cancel.is_cancelled() {
        return Err(CmdError::Interrupted {
            info: Box::new(info.clone()),
            execution: None,
        });
    }

    let pool = cmd.pool();
    let context = cmd.context.capture();
    let mut command = build_command(cmd);

    debug!(
        command = ?info.command_line,
        working_dir = ?info.working_directory,
        timeout_ms = info.timeout.as_millis() as u64,
        "Spawning process"
    );
    let mut spawned = spawn_on(&pool, &mut command);
    if let Err(e) = &spawned {
        if info.auto_grant_executable
            && e.kind() == io::ErrorKind::PermissionDenied
            && grant_executable(&pool, &info.command_line[0]).await
        {
            debug!(program = %info.command_line[0], "Granted executable permission, retrying spawn");
            spawned = spawn_on(&pool, &mut command);
        }
    }
    let child = spawned.map_err(|source| {
        warn!(command = ?info.command_line, error = %source, "Failed to spawn process");
        CmdError::Io {
            info: Box::new(info.clone()),
            execution: None,
            source,
        }
    })?;

    Running::new(child, info.clone(), pool, context)
        .drive(cmd, cancel)
        .await
}

fn spawn_on(pool: &WorkerPool, command: &mut Command) -> io::Result<Child> {
    // Register the child with the pool's reaper, not the caller's runtime.
    let _runtime = pool.handle().enter();
    command.spawn()
}

/// Give the owner execute permission on `program` if it is a plain file
/// lacking it. Relative paths resolve against this process's directory.
async fn grant_executable(pool: &WorkerPool, program: &str) -> bool {
    let path = PathBuf::from(program);
    let granted = pool
        .handle()
        .spawn_blocking(move || set_owner_executable(&path))
        .await;
    match granted {
        Ok(Ok(granted)) => granted,
        Ok(Err(e)) => {
            debug!(program = %program, error = %e, "Could not grant executable permission");
            false
        }
        Err(e) => {
            warn!(program = %program, error = %e, "Permission grant did not complete");
            false
        }
    }
}

#[cfg(unix)]
fn set_owner_executable(path: &Path) -> io::Result<bool> {
    use std::os::unix::fs::PermissionsExt;

    let metadata = std::fs::metadata(path)?;
    let mode = metadata.permissions().mode();
    if !metadata.is_file() || mode & 0o100 != 0 {
        return Ok(false);
    }
    std::fs::set_permissions(path, std::fs::Permissions::from_mode((mode & 0o7777) | 0o100))?;
    Ok(true)
}

#[cfg(not(unix))]
fn set_owner_executable(_path: &Path) -> io::Result<bool> {
    Ok(false)
}

fn build_command<SO, SE>(cmd: &Cmdline<SO, SE>) -> Command {
    let info = cmd.info();
    let mut command = Command::new(&info.command_line[0]);
    command.args(&info.command_line[1..]);
    if let Some(dir) = &info.working_directory {
        command.current_dir(dir);
    }
    env::apply(&mut command, &info.environment);

    let inherit = info.inherit_io;
    if inherit != InheritIo::NONE {
        trace!(inherit = %inherit, "Inherited streams get no handler or error recorder");
    }
    command.stdin(redirect(inherit.stdin, cmd.stdin.is_some()));
    command.stdout(redirect(inherit.stdout, cmd.stdout.is_some()));
    command.stderr(redirect(
        inherit.stderr,
        cmd.stderr.is_some() || info.enable_default_error_recorder,
    ));
    command.kill_on_drop(true);
    command
}

fn redirect(inherit: bool, piped: bool) -> Stdio {
    if inherit {
        Stdio::inherit()
    } else if piped {
        Stdio::piped()
    } else {
        Stdio::null()
    }
}

/// Exit code, or 128 + signal number for a signal death on Unix
fn exit_code(status: ExitStatus) -> i32 {
    if let Some(code) = status.code() {
        return code;
    }
    #[cfg(unix)]
    {
        use std::os::unix::process::ExitStatusExt;
        if let Some(signal) = status.signal() {
            return 128 + signal;
        }
    }
    -1
}

struct StreamTasks<SO, SE> {
    stdin: Option<TaskHandle<()>>,
    stdout: Option<TaskHandle<SO>>,
    stderr: Option<TaskHandle<SE>>,
    recorder: Option<TaskHandle<String>>,
}

/// Outcomes of the stream tasks once they have all ended
struct Joined<SO, SE> {
    stdout: Option<SO>,
    stderr: Option<SE>,
    snapshot: String,
    slots: SlotFailures,
}

impl<SO, SE> StreamTasks<SO, SE> {
    async fn join(self) -> Joined<SO, SE> {
        let stdin = join_opt(self.stdin).await;
        let stdout = join_opt(self.stdout).await;
        let stderr = join_opt(self.stderr).await;
        let recorder = join_opt(self.recorder).await;

        let slots = SlotFailures {
            stdin: stdin.as_ref().and_then(|o| o.failure().cloned()),
            stdout: stdout.as_ref().and_then(|o| o.failure().cloned()),
            stderr: stderr
                .as_ref()
                .and_then(|o| o.failure().cloned())
                .or_else(|| recorder.as_ref().and_then(|o| o.failure().cloned())),
        };
        Joined {
            stdout: stdout.and_then(TaskOutcome::value),
            stderr: stderr.and_then(TaskOutcome::value),
            snapshot: recorder.and_then(TaskOutcome::value).unwrap_or_default(),
            slots,
        }
    }
}

async fn join_opt<T>(handle: Option<TaskHandle<T>>) -> Option<TaskOutcome<T>> {
    match handle {
        Some(handle) => Some(handle.join().await),
        None => None,
    }
}

enum Event {
    Exited(io::Result<ExitStatus>),
    Interrupted,
    KillRequested,
    TimedOut,
}

/// A spawned process and the stream tasks attached to it
///
/// Dropping it before the process has been reaped kills the process tree
/// and aborts the stream tasks, so a cancelled `execute` future leaves
/// nothing behind.
struct Running {
    child: Child,
    pid: Option<u32>,
    info: CommandInfo,
    pool: WorkerPool,
    execution: ExecutionInfo,
    started: Instant,
    helper: StreamTaskHelper,
    kill_switch: CancellationToken,
    killed: bool,
    reaped: bool,
}

impl Running {
    fn new(
        child: Child,
        info: CommandInfo,
        pool: WorkerPool,
        context: Box<dyn CapturedContext>,
    ) -> Self {
        let pid = child.id();
        let kill_switch = CancellationToken::new();
        let on_failure = kill_switch.clone();
        let helper = StreamTaskHelper::new(pool.clone(), context, move || on_failure.cancel());
        debug!(pid = ?pid, program = ?info.program(), "Process started");

        Self {
            child,
            pid,
            execution: ExecutionInfo::started(pid.map_or(-1, i64::from), Utc::now()),
            started: Instant::now(),
            info,
            pool,
            helper,
            kill_switch,
            killed: false,
            reaped: false,
        }
    }

    async fn drive<SO, SE>(
        mut self,
        cmd: &Cmdline<SO, SE>,
        cancel: CancellationToken,
    ) -> Result<ExecutionResult<SO, SE>>
    where
        SO: Send + 'static,
        SE: Send + 'static,
    {
        let tasks = self.submit_tasks(cmd);
        let mut interrupted = false;

        let status = match self.wait(&cancel, &mut interrupted).await {
            Ok(status) => status,
            Err(source) => {
                warn!(pid = ?self.pid, error = %source, "Failed to wait for process");
                return Err(CmdError::Io {
                    info: Box::new(self.info.clone()),
                    execution: Some(Box::new(self.execution.clone())),
                    source,
                });
            }
        };
        let elapsed = self.started.elapsed();
        let code = exit_code(status);
        debug!(pid = ?self.pid, exit_code = code, elapsed_ms = elapsed.as_millis() as u64, "Process exited");

        // Orphaned descendants can keep a pipe open after the exit.
        let cancelled_while_joining = tokio::select! {
            _ = self.helper.join_all() => false,
            _ = cancel.cancelled(), if !interrupted => true,
        };
        if cancelled_while_joining {
            interrupted = true;
            debug!(pid = ?self.pid, "Execution cancelled while joining stream handlers");
            self.helper.fail(Failure::Interrupted);
            self.helper.join_all().await;
        }
        let joined = tasks.join().await;

        let execution = self
            .execution
            .clone()
            .finished(Utc::now(), code)
            .with_stderr_snapshot(joined.snapshot);

        if interrupted {
            debug!(pid = ?self.pid, "Execution interrupted");
            return Err(CmdError::Interrupted {
                info: Box::new(self.info.clone()),
                execution: Some(Box::new(execution)),
            });
        }

        match self.helper.failure_chain() {
            None => Ok(ExecutionResult {
                command_info: self.info.clone(),
                execution_info: execution,
                exit_code: code,
                stdout: joined.stdout,
                stderr: joined.stderr,
                elapsed,
            }),
            Some(chain) => match chain.root {
                Failure::Timeout(timeout) => {
                    debug!(pid = ?self.pid, timeout_ms = timeout.as_millis() as u64, "Execution timed out");
                    Err(CmdError::Timeout(Box::new(TimeoutFailure {
                        timeout,
                        slots: joined.slots,
                        command_info: self.info.clone(),
                        execution_info: execution.killed_by_timeout(),
                    })))
                }
                Failure::Handler(root) => {
                    let suppressed = chain
                        .suppressed
                        .into_iter()
                        .filter_map(|failure| match failure {
                            Failure::Handler(failure) => Some(failure),
                            _ => None,
                        })
                        .collect();
                    Err(CmdError::Handler(Box::new(HandlerFailure {
                        root,
                        suppressed,
                        slots: joined.slots,
                        command_info: self.info.clone(),
                        execution_info: execution,
                    })))
                }
                Failure::Interrupted => Err(CmdError::Interrupted {
                    info: Box::new(self.info.clone()),
                    execution: Some(Box::new(execution)),
                }),
            },
        }
    }

    fn submit_tasks<SO, SE>(&mut self, cmd: &Cmdline<SO, SE>) -> StreamTasks<SO, SE>
    where
        SO: Send + 'static,
        SE: Send + 'static,
    {
        let mut tasks = StreamTasks {
            stdin: None,
            stdout: None,
            stderr: None,
            recorder: None,
        };

        if let (Some(stream), Some(handler)) = (self.child.stdin.take(), &cmd.stdin) {
            let handler = Arc::clone(handler);
            let stream: WriteStream = Box::new(stream);
            tasks.stdin = self
                .helper
                .submit(StdioSlot::Stdin, async move { handler(stream).await });
        }
        if let (Some(stream), Some(handler)) = (self.child.stdout.take(), &cmd.stdout) {
            let handler = Arc::clone(handler);
            let stream: ReadStream = Box::new(stream);
            tasks.stdout = self
                .helper
                .submit(StdioSlot::Stdout, async move { handler(stream).await });
        }
        if let Some(stream) = self.child.stderr.take() {
            match &cmd.stderr {
                Some(handler) => {
                    let handler = Arc::clone(handler);
                    let stream: ReadStream = Box::new(stream);
                    tasks.stderr = self
                        .helper
                        .submit(StdioSlot::Stderr, async move { handler(stream).await });
                }
                None => {
                    trace!(pid = ?self.pid, "Recording stderr");
                    let charset = self.info.io_charset;
                    tasks.recorder = self.helper.submit(
                        StdioSlot::Stderr,
                        handlers::record_errors(Box::new(stream), charset),
                    );
                }
            }
        }
        tasks
    }

    async fn wait(
        &mut self,
        cancel: &CancellationToken,
        interrupted: &mut bool,
    ) -> io::Result<ExitStatus> {
        let limit = self.info.timeout_limit();
        let mut timer = {
            // Bind the timer to the pool so the caller's runtime needs no time driver.
            let _runtime = self.pool.handle().enter();
            // A deadline past the end of the clock never fires.
            limit
                .and_then(|limit| self.started.checked_add(limit))
                .map(|deadline| {
                    Box::pin(tokio::time::sleep_until(tokio::time::Instant::from_std(
                        deadline,
                    )))
                })
        };
        let mut timed_out = false;

        loop {
            let deadline = async {
                match timer.as_mut() {
                    Some(sleep) => sleep.await,
                    None => pending().await,
                }
            };
            let event = tokio::select! {
                status = self.child.wait() => Event::Exited(status),
                _ = cancel.cancelled(), if !*interrupted => Event::Interrupted,
                _ = self.kill_switch.cancelled(), if !self.killed => Event::KillRequested,
                _ = deadline, if !timed_out => Event::TimedOut,
            };

            match event {
                Event::Exited(status) => {
                    self.reaped = status.is_ok();
                    return status;
                }
                Event::Interrupted => {
                    *interrupted = true;
                    debug!(pid = ?self.pid, "Execution cancelled by caller, killing process");
                    self.helper.fail(Failure::Interrupted);
                    self.kill().await;
                }
                Event::KillRequested => {
                    debug!(pid = ?self.pid, "Stream handler failed, killing process");
                    self.kill().await;
                }
                Event::TimedOut => {
                    timed_out = true;
                    if let Some(limit) = limit {
                        debug!(pid = ?self.pid, timeout_ms = limit.as_millis() as u64, "Process timed out, killing");
                        self.helper.fail(Failure::Timeout(limit));
                    }
                    self.kill().await;
                }
            }
        }
    }

    async fn kill(&mut self) {
        if self.killed {
            return;
        }
        self.killed = true;
        process_tree::kill_tree_blocking_sweep(
            &mut self.child,
            self.pid,
            self.info.kill_descendants,
            self.pool.handle(),
        )
        .await;
    }
}

impl Drop for Running {
    fn drop(&mut self) {
        self.helper.cancel_all();
        if !self.reaped {
            trace!(pid = ?self.pid, "Execution abandoned before exit, killing process");
            process_tree::kill_tree(&mut self.child, self.pid, self.info.kill_descendants);
        }
    }
}
