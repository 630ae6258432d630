pub mod config;
pub mod error;
pub mod mp;

pub use error::{AppError, Result};
