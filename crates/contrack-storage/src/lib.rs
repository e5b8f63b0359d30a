//! Persisted-store contracts, HTTP fetch utilities and the snapshot cache.

mod http;
mod memory;
mod postgres;
mod snapshot;
mod store;

pub use http::{
    classify_reqwest_error, classify_status, retry_after, BackoffPolicy, FetchError,
    FetchedResponse, HttpClientConfig, HttpFetcher, RetryDisposition,
};
pub use memory::MemoryStore;
pub use postgres::PgStore;
pub use snapshot::{ContestSnapshot, SavedSnapshot, SnapshotCache};
pub use store::{BookmarkStore, ContestReader, ContestWriter, StoreError, UpsertCounts};

pub const CRATE_NAME: &str = "contrack-storage";
