mod snapshot_store;

pub use snapshot_store::{
    trim_for_cache, SnapshotStore, ATTACHMENT_TOO_LARGE_MARKER, MAX_CACHED_ATTACHMENT_BYTES,
};
