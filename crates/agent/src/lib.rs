pub mod session;

pub use session::{ChatSession, SessionEvent, SubmitOutcome, Submission};
