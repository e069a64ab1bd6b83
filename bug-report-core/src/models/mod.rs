pub mod clip;
pub mod config;
pub mod error;
pub mod frame;
pub mod report;
pub mod state;
pub mod upload_models;
