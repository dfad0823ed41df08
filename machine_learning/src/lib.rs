pub mod arch;
pub mod dataset;
pub mod distributed;
pub mod error;
pub mod optimization;
pub mod params;

pub use error::{MlErr, Result};
