pub mod assignment_store;
pub mod session_store;

pub use assignment_store::{AssignmentStore, FileAssignmentStore, MemoryAssignmentStore};
pub use session_store::{SessionStore, SharedSession};
