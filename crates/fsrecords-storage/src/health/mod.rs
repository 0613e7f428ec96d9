//! Consistency checking
//!
//! [`HealthChecker`] walks every record and the side tables and counts each
//! kind of inconsistency separately. It never repairs and never fails the
//! host: findings go into a [`HealthReport`], problems reaching a
//! collaborator are counted as unexpected errors.
//!
//! [`HealthCheckScheduler`] runs the checker in the background when the
//! user is idle and the machine is on mains power.

mod checker;
mod report;
mod scheduler;
mod throttle;

pub use checker::HealthChecker;
pub use report::{ContentReport, HealthReport, NamesReport, RecordsReport, RootsReport};
pub use scheduler::{
    ActivityMonitor, HealthCheckScheduler, ManualActivityMonitor, PollOutcome, SchedulerHandle,
};
