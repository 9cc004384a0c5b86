//! Concurrency primitives
//!
//! - [`Channel`]: blocking FIFO message queue shared by reference between tasks
//! - [`TaskSet`]: spawns and tracks independently scheduled tasks
//!
//! Tasks are executed on the blocking pool of one process-wide multi-thread
//! tokio runtime.

pub mod channel;
pub mod task;

pub use channel::{Channel, ChannelClosed};
pub use task::{TaskId, TaskSet};

use std::sync::OnceLock;
use tokio::runtime::Runtime;

/// Global tokio runtime hosting spawned tasks
static TOKIO_RUNTIME: OnceLock<Runtime> = OnceLock::new();

/// Get a reference to the global tokio runtime
///
/// Initializes the runtime on first use.
///
/// # Panics
/// Panics if the runtime fails to initialize
pub fn runtime() -> &'static Runtime {
    TOKIO_RUNTIME.get_or_init(|| {
        tokio::runtime::Builder::new_multi_thread()
            .thread_name("kestrel-task")
            .enable_all()
            .build()
            .expect("Failed to initialize tokio runtime")
    })
}
