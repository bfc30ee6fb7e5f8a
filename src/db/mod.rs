pub mod error;
pub mod fake;
pub mod sqlite;
pub mod video_store;

pub use error::StoreError;
pub use fake::FakeVideoStore;
pub use sqlite::SqliteVideoStore;
pub use video_store::{SharedStore, VideoStore};
