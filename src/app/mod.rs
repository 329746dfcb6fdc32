pub mod adb;
pub mod config;
pub mod error;
pub mod logging;
pub mod models;
pub mod secrets;
pub mod services;
pub mod state;
pub mod ui;
pub mod warmup;
pub mod watchers;
pub mod workflows;

#[cfg(test)]
pub mod testing;
