#![forbid(unsafe_code)]

pub mod cache;
pub mod cli;
pub mod client;
pub mod config;
pub mod error;
pub mod fetch;
pub mod fetch_context;
pub mod formats;
pub mod lesson;
pub mod logging;
pub mod manifest;
pub mod preview;
pub mod render;
pub mod slug;
pub mod toc;

pub use error::{Error, ErrorKind, Loaded};
