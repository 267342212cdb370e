pub mod cli;
pub mod commands;
pub mod platform;
pub mod timer_lock;
