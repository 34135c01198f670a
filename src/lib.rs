//! RangeDown: 分块并发、可暂停续传的 HTTP 下载引擎

pub mod cli;
pub mod config;
pub mod core;
pub mod ui;
pub mod utils;
