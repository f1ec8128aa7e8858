pub mod config;
pub mod generator;
pub mod logging;

pub use config::Settings;
