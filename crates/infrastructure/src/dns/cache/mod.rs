mod dual;
mod message;
mod metrics;
mod store;

pub use dual::DualCache;
pub use message::{Lookup, MessageCache};
pub use metrics::CacheMetrics;
