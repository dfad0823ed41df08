mod grad_sync;
mod validation;

pub use grad_sync::{average_gradients, broadcast_params};
pub use validation::{GlobalMetrics, MetricAccumulator, ValidationShard};
