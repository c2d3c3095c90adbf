pub mod error;
pub mod scheduled_executor;

pub use error::{ApiError, ApiResult};
pub use scheduled_executor::{ScheduledExecutor, ShutdownHandle};
