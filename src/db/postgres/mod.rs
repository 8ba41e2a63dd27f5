mod archives;
mod options;

pub use archives::PostgresArchiveStore;
pub use options::PostgresOptionRepo;
