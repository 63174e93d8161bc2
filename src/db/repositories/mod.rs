mod predictions;

pub use predictions::{bucketize, MAX_TIME_BUCKETS};
