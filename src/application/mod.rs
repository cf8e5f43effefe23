pub mod bootstrap;
pub mod commands;
pub mod reports;
pub mod session;
pub mod work_timer;
pub mod worktime_api;
