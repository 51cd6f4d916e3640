//! Task records: lifecycle state and the metadata merged on completion

mod book;
mod record;

pub use book::TaskBook;
pub use record::{FinalDetails, TaskRecord, TaskState};
