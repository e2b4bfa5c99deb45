//! Host-thread execution: periodic timers, the task dispatcher, shutdown

mod dispatcher;
mod scheduler;
mod shutdown;

pub use dispatcher::Dispatcher;
pub use scheduler::{PeriodicTask, Scheduler, TimerId, TimerLoop};
pub use shutdown::ShutdownSignal;
