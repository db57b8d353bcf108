pub mod config;
pub mod directive;
pub mod engine;
pub mod error;
pub mod extensions;
pub mod invoker;
pub mod io;
pub mod loader;
pub mod merge;
pub mod migrations;
pub mod model;
pub mod paths;
pub mod preferences;
pub mod progression;
pub mod project;
pub mod resolver;
pub mod rule_store;
pub mod snapshot;
mod sqlite;
pub mod types;

pub use engine::Engine;
pub use error::{DirectiveError, Result};
