pub mod clock;
pub mod config;
pub mod error;
pub mod logging;
pub mod metrics;
pub mod models;

pub use clock::{Clock, ManualClock, SharedClock, SystemClock};
pub use config::Config;
pub use error::{Error, Result};
