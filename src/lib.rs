pub mod config;
pub mod db;
pub mod error;
pub mod loader;
pub mod model;
pub mod normalize;
pub mod validate;

#[cfg(test)]
pub(crate) mod testing;

pub use error::{LoadError, Result};
