pub mod core;
pub mod dashboard;
pub mod groups;
pub mod progress;
pub mod schedules;
pub mod templates;
