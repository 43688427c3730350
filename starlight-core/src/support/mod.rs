/// Exponential backoff iterator for task retries.
pub mod backoff;
/// Multi-producer, multi-consumer shutdown signal.
pub mod shutdown;
/// A named, `#[must_use]` `JoinHandle` wrapper.
pub mod task;

pub use backoff::get_backoff_iter;
pub use shutdown::ShutdownChannel;
pub use task::NamedTask;
