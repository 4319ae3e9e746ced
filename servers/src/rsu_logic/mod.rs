pub mod config;
pub mod logger;
pub mod model;
pub mod state;
pub mod downstream;
pub mod monitor;
