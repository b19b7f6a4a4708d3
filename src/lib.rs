#![allow(clippy::uninlined_format_args)]

pub mod app;
pub mod auth;
pub mod backend;
pub mod cancel;
pub mod carousel;
pub mod config;
pub mod error;
pub mod feed;
pub mod fetch;
pub mod geo;
pub mod interactions;
pub mod location;
pub mod memory;
pub mod model;
pub mod player;
pub mod query;
pub mod rest;
pub mod scheduler;
pub mod snap;
pub mod storage;
pub mod telemetry;
pub mod ui;
pub mod video;
pub mod window;

pub const VERSION: &str = env!("CARGO_PKG_VERSION");

pub use app::run;
