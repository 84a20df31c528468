pub mod cancel;
pub mod catalog;
pub mod config;
pub mod credentials;
pub mod db;
pub mod diff;
mod error;
pub mod models;
pub mod net;
pub mod parsers;
pub mod paths;
pub mod progress;
pub mod render;
pub mod resolver;

pub use error::{EngineError, ErrorKind, Result};
