//! bibmd-core: shared infrastructure for the bibmd converter
//!
//! Logging, progress reporting, graceful shutdown and the work queue
//! used by the dispatch engine to hand entries to pool threads.

pub mod logging;
pub mod progress;
pub mod shutdown;
pub mod work_queue;

pub use logging::{IndicatifLogger, init_logging};
pub use progress::{ProgressContext, SharedProgress};
pub use shutdown::{install_signal_handlers, is_shutdown_requested, shutdown_flag};
pub use work_queue::WorkQueue;
