#![allow(clippy::uninlined_format_args)]

pub mod aggregate;
pub mod app;
pub mod config;
pub mod data;
pub mod favorites;
pub mod search;
pub mod storage;
pub mod tmdb;
pub mod ui;
pub mod view;

pub const VERSION: &str = env!("CARGO_PKG_VERSION");

pub use app::run;
