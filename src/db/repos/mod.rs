mod archives;
mod options;

pub use archives::*;
pub use options::*;
