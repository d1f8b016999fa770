pub mod node;
pub mod report;
pub mod poll;
pub mod round;
pub mod detect;
pub mod msg;
pub mod config;
pub mod telemetry;
pub mod app;
