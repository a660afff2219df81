// Library exports for gamewarden

pub mod backup;
pub mod cli;
pub mod config;
pub mod daemon;
pub mod error;
pub mod events;
pub mod gateway;
pub mod logs;
pub mod monitor;
pub mod process;
pub mod state;
