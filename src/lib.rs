//! Client-side economy core of a settlement game: buffed costs, yields and
//! durations, requirement verdicts, and the lifecycle of server-side jobs.

pub mod app;
pub mod backend;
pub mod clock;
pub mod config;
pub mod persist;
pub mod sim;
