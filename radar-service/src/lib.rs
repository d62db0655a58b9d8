pub mod env;
pub mod error;
pub mod matcher;
pub mod merge;
pub mod notify;
pub mod report;
pub mod scheduler;

pub use error::ServiceError;
