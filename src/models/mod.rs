pub mod assignment;
pub mod chunk;
pub mod decision;
pub mod loaders;
pub mod session;

pub use assignment::{Assignment, AssignmentId};
pub use chunk::Chunk;
pub use decision::{Decision, ResponseFlag, SuspicionReason};
pub use loaders::{load_all_documents, load_document};
pub use session::{Exchange, OrdinalRef, RequestSignals, Session, SessionKey, ThrottleFlag, ThrottleState};
