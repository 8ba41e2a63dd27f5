mod archives;
mod options;

pub use archives::SqliteArchiveStore;
pub use options::SqliteOptionRepo;
