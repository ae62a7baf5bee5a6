pub mod config;
pub mod engagement;
pub mod error;
pub mod store;
pub mod types;

pub use config::AppConfig;
pub use error::{RetentionError, RetentionResult};
