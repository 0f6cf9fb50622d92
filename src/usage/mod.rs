//! Usage tracking and predictive prefetch

pub mod prefetch;
pub mod recorder;

pub use prefetch::{
    access_probability, Populator, PredictionWeights, PrefetchCandidate, PrefetchConfig, Prefetcher,
};
pub use recorder::{AccessContext, DeviceClass, UsagePattern, UsageRecorder, DEFAULT_HISTORY_CAP};
