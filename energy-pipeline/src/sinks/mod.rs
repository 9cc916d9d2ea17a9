pub mod bucket;
pub mod columnar;
pub mod feature_store;
pub mod gcs;

pub use bucket::{open_bucket, read_table, write_table, Bucket, InMemoryBucket, LocalBucket, StorageError};
pub use feature_store::BucketFeatureStore;
pub use gcs::{get_bucket, GcsBucket};
