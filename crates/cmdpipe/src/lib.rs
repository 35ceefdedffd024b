//! # cmdpipe
//!
//! **Purpose**: Run external commands with concurrent stdio handlers
//!
//! Spawns a child process, wires each of its standard streams to an async
//! handler running on a worker pool, and returns a structured result or a
//! structured failure that says which stream failed and why.
//!
//! ## Features
//!
//! - **Stream Handlers**: stdin, stdout and stderr are served concurrently
//! - **First Failure Wins**: one failing handler cancels its siblings and kills the process
//! - **Timeouts**: the process tree is killed once the timeout elapses
//! - **Descendant Kill**: grandchildren are killed before the process itself
//! - **Error Recorder**: bounded head/tail stderr excerpt when nobody reads stderr
//! - **Diagnostics**: failures carry the command, environment and execution details
//!
//! ## Usage
//!
//! ```rust,no_run
//! use std::time::Duration;
//! use cmdpipe::{cmdline, handlers, Charset};
//!
//! # #[tokio::main]
//! # async fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let result = cmdline(["sort"])
//!     .with_timeout(Duration::from_secs(10))
//!     .handle_stdin(handlers::write("b\na\n"))
//!     .handle_stdout(handlers::lines(Charset::Utf8))
//!     .execute()
//!     .await?;
//!
//! assert_eq!(result.stdout_value().unwrap(), &["a", "b"]);
//! # Ok(())
//! # }
//! ```

pub mod aggregator;
pub mod command;
pub mod config;
pub mod context;
pub mod env;
pub mod error;
pub mod format;
pub mod handlers;
pub mod info;
pub mod pool;
pub mod process_tree;
pub mod recorder;
mod running;
pub mod stream_task;

pub use aggregator::{ExceptionAggregator, FailureChain};
pub use command::{cmdline, Cmdline};
pub use config::{Charset, CommandInfo, InheritIo};
pub use context::{CapturedContext, ContextProvider, NoContext, SpanContext};
pub use env::EnvVar;
pub use error::{
    CmdError, HandlerFailure, Result, SlotFailures, StdioSlot, StreamFailure, TimeoutFailure,
};
pub use handlers::{ReadStream, WriteStream};
pub use info::{ExecutionInfo, ExecutionResult};
pub use pool::WorkerPool;
pub use recorder::ErrorRecorder;
pub use stream_task::{Failure, StreamTaskHelper, TaskHandle, TaskOutcome};
pub use tokio_util::sync::CancellationToken;
