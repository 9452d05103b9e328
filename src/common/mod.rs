pub mod config;
pub mod errors;

pub use config::{Config, TransferSettings};
pub use errors::{AppError, TransferError, TransferResult};
