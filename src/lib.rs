//! Daemon + cli for tracking which window you actually work in, scoring the
//! time for productivity, and running pomodoro cycles. Live state is pushed
//! to any subscriber of the local endpoint; history is plain files you can
//! grep.

pub mod broadcast;
pub mod cli;
pub mod config;
pub mod daemon;
pub mod events;
pub mod notify;
pub mod pomodoro;
pub mod probe;
pub mod server;
pub mod storage;
pub mod tracker;
pub mod utils;
