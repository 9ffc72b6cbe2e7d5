//! Renders a fixed family of proportionally-scaled derivatives for
//! every image landing in S3, and stores them under deterministic
//! keys.

pub mod app;
pub mod client;
pub mod conf;
pub mod error;
pub mod event;
pub mod keys;
pub mod pipeline;
pub mod plan;
pub mod render;
pub mod storage;

pub use error::{Error, Result};
pub use event::IncomingEvent;
pub use pipeline::{Derivative, Pipeline};
pub use storage::Storage;
