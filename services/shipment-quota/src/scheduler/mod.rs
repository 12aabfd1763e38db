pub mod clock;
pub mod reset_scheduler;
pub mod schedule;

pub use clock::{Clock, ManualClock, SystemClock};
pub use reset_scheduler::{
    FireTrigger, ResetRun, ResetScheduler, SchedulerPhase, SchedulerStatus,
};
pub use schedule::{hours_until, ResetSchedule, ScheduleError, MAX_RESET_DAY, MAX_RESET_HOUR};
