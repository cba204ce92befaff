pub mod snapshot;

pub use snapshot::{load_snapshot, SnapshotDir, SnapshotError, SnapshotMetadata, SnapshotName};
