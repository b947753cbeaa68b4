pub mod blob;
pub mod log;

pub use blob::{parent_commit, read_file_at};
pub use log::{load_history, write_stripped_log};
