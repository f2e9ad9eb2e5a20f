/// Builder for constructing schedulers from configuration and collaborators.
pub mod builder;
/// Graceful shutdown signalling.
pub mod shutdown;
/// Recurring cron trigger driving scheduled invocations.
pub mod trigger;

pub use builder::FanOutSchedulerBuilder;
pub use shutdown::ShutdownToken;
pub use trigger::CronTrigger;
