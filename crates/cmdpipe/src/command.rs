//! Command builder and execution entry points

use std::fmt;
use std::future::Future;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use futures::FutureExt;
use tokio_util::sync::CancellationToken;

use crate::config::{Charset, CommandInfo};
use crate::context::{ContextProvider, SpanContext};
use crate::env::EnvVar;
use crate::error::{Result, StdioSlot};
use crate::handlers::{ReadHandler, ReadStream, WriteHandler, WriteStream};
use crate::info::ExecutionResult;
use crate::pool::WorkerPool;
use crate::running;

/// Start building a command
///
/// # Examples
/// ```no_run
/// use cmdpipe::{cmdline, handlers, Charset};
///
/// # #[tokio::main]
/// # async fn main() -> Result<(), Box<dyn std::error::Error>> {
/// let result = cmdline(["git", "status", "--short"])
///     .handle_stdout(handlers::text(Charset::Utf8))
///     .execute()
///     .await?;
/// println!("{}", result.stdout_value().unwrap());
/// # Ok(())
/// # }
/// ```
pub fn cmdline<I, S>(command_line: I) -> Cmdline
where
    I: IntoIterator<Item = S>,
    S: Into<String>,
{
    Cmdline::new(command_line)
}

/// Immutable command description plus stream handlers
///
/// Every builder method returns a new value, so a configured `Cmdline` can be
/// cloned and executed any number of times. `SO` and `SE` are the values
/// produced by the stdout and stderr handlers.
pub struct Cmdline<SO = (), SE = ()> {
    info: CommandInfo,
    pool: Option<WorkerPool>,
    pub(crate) context: Arc<dyn ContextProvider>,
    pub(crate) stdin: Option<WriteHandler>,
    pub(crate) stdout: Option<ReadHandler<SO>>,
    pub(crate) stderr: Option<ReadHandler<SE>>,
}

impl Cmdline {
    /// New command with default settings and no handlers
    pub fn new<I, S>(command_line: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self::from_info(CommandInfo::new(command_line))
    }

    /// New command from a full configuration, e.g. one loaded from TOML
    pub fn from_info(info: CommandInfo) -> Self {
        Self {
            info,
            pool: None,
            context: Arc::new(SpanContext),
            stdin: None,
            stdout: None,
            stderr: None,
        }
    }
}

impl<SO, SE> Cmdline<SO, SE> {
    pub fn info(&self) -> &CommandInfo {
        &self.info
    }

    /// Pool that runs the stream handlers
    pub fn pool(&self) -> WorkerPool {
        self.pool.clone().unwrap_or_default()
    }

    fn map_info(mut self, f: impl FnOnce(CommandInfo) -> CommandInfo) -> Self {
        self.info = f(self.info);
        self
    }

    /// Replace the program and arguments
    pub fn with_cmdline<I, S>(self, command_line: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.map_info(|info| info.with_command_line(command_line))
    }

    /// Append environment deltas, applied in order
    pub fn with_environment<I, V>(self, vars: I) -> Self
    where
        I: IntoIterator<Item = V>,
        V: Into<EnvVar>,
    {
        self.map_info(|info| info.with_environment(vars.into_iter().map(Into::into)))
    }

    /// Set one variable
    pub fn with_env_var(self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.with_environment([EnvVar::new(name, value)])
    }

    /// Remove one variable from the inherited environment
    pub fn without_env_var(self, name: impl Into<String>) -> Self {
        self.with_environment([EnvVar::remove(name)])
    }

    pub fn with_working_directory(self, dir: impl Into<PathBuf>) -> Self {
        self.map_info(|info| info.with_working_directory(dir))
    }

    /// Kill the process once `timeout` has elapsed, zero means unbounded
    pub fn with_timeout(self, timeout: Duration) -> Self {
        self.map_info(|info| info.with_timeout(timeout))
    }

    /// Connect the child directly to this process's stdio
    ///
    /// Handlers and the error recorder are not run; the timeout still applies.
    pub fn inherit_io(self, inherit: bool) -> Self {
        self.map_info(|info| info.with_inherit_io(inherit))
    }

    /// Connect one stream directly to this process's matching stream
    ///
    /// Takes precedence over a handler set earlier for the same slot. Setting
    /// a handler afterwards switches inheritance off again.
    pub fn inherit_stdio(self, slot: StdioSlot, inherit: bool) -> Self {
        self.map_info(|info| info.with_inherit(slot, inherit))
    }

    /// Mark the program file executable and retry once when the spawn is
    /// refused with a permission error (default off)
    pub fn auto_grant_executable_on_failure(self, enable: bool) -> Self {
        self.map_info(|info| info.with_auto_grant_executable(enable))
    }

    /// Also kill descendants when the process is killed (default on)
    pub fn kill_descendants(self, kill: bool) -> Self {
        self.map_info(|info| info.with_kill_descendants(kill))
    }

    /// Record a stderr excerpt when no stderr handler is set (default on)
    pub fn enable_default_error_recorder(self, enable: bool) -> Self {
        self.map_info(|info| info.with_default_error_recorder(enable))
    }

    pub fn with_charset(self, charset: Charset) -> Self {
        self.map_info(|info| info.with_charset(charset))
    }

    pub fn with_pool(mut self, pool: WorkerPool) -> Self {
        self.pool = Some(pool);
        self
    }

    pub fn with_context_provider(mut self, provider: impl ContextProvider + 'static) -> Self {
        self.context = Arc::new(provider);
        self
    }

    /// Feed the child's stdin
    pub fn handle_stdin<F, Fut>(self, handler: F) -> Self
    where
        F: Fn(WriteStream) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
    {
        let mut cmd = self.inherit_stdio(StdioSlot::Stdin, false);
        cmd.stdin = Some(Arc::new(move |stream| handler(stream).boxed()));
        cmd
    }

    /// Consume the child's stdout, producing the result's stdout value
    pub fn handle_stdout<T, F, Fut>(self, handler: F) -> Cmdline<T, SE>
    where
        F: Fn(ReadStream) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<T>> + Send + 'static,
    {
        Cmdline {
            info: self.info.with_inherit(StdioSlot::Stdout, false),
            pool: self.pool,
            context: self.context,
            stdin: self.stdin,
            stdout: Some(Arc::new(move |stream| handler(stream).boxed())),
            stderr: self.stderr,
        }
    }

    /// Consume the child's stderr instead of the error recorder
    pub fn handle_stderr<T, F, Fut>(self, handler: F) -> Cmdline<SO, T>
    where
        F: Fn(ReadStream) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<T>> + Send + 'static,
    {
        Cmdline {
            info: self.info.with_inherit(StdioSlot::Stderr, false),
            pool: self.pool,
            context: self.context,
            stdin: self.stdin,
            stdout: self.stdout,
            stderr: Some(Arc::new(move |stream| handler(stream).boxed())),
        }
    }
}

impl<SO, SE> Cmdline<SO, SE>
where
    SO: Send + 'static,
    SE: Send + 'static,
{
    /// Run the command and wait for it and its handlers
    ///
    /// Dropping the returned future kills the process tree.
    pub async fn execute(&self) -> Result<ExecutionResult<SO, SE>> {
        running::execute(self, CancellationToken::new()).await
    }

    /// Like [`execute`](Self::execute), failing with
    /// [`CmdError::Interrupted`](crate::CmdError::Interrupted) once `cancel` fires
    pub async fn execute_with_cancel(
        &self,
        cancel: CancellationToken,
    ) -> Result<ExecutionResult<SO, SE>> {
        running::execute(self, cancel).await
    }

    /// Run the command from synchronous code
    ///
    /// Panics when called from within an async execution context.
    pub fn execute_blocking(&self) -> Result<ExecutionResult<SO, SE>> {
        self.pool().block_on(self.execute())
    }
}

impl<SO, SE> Clone for Cmdline<SO, SE> {
    fn clone(&self) -> Self {
        Self {
            info: self.info.clone(),
            pool: self.pool.clone(),
            context: Arc::clone(&self.context),
            stdin: self.stdin.clone(),
            stdout: self.stdout.clone(),
            stderr: self.stderr.clone(),
        }
    }
}

impl<SO, SE> fmt::Debug for Cmdline<SO, SE> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Cmdline")
            .field("info", &self.info)
            .field("pool", &self.pool)
            .field("stdin", &self.stdin.is_some())
            .field("stdout", &self.stdout.is_some())
            .field("stderr", &self.stderr.is_some())
            .finish()
    }
}
