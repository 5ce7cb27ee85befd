pub mod attendance;
pub mod classes;
pub mod core;
pub mod occurrences;
pub mod schedules;
pub mod setup;
