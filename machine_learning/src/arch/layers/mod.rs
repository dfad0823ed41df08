mod dense;
mod layer;
mod relu;
mod sync_batch_norm;

pub use dense::Dense;
pub use layer::{BatchNorm, Layer};
pub use relu::Relu;
pub use sync_batch_norm::{
    BatchNormState, CallId, DEFAULT_EPS, DEFAULT_MOMENTUM, MIN_VARIANCE, SyncBatchNorm,
};
