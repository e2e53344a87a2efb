pub mod claims;
pub mod controller;
pub mod session;

pub use claims::ClaimMap;
pub use controller::ReviewController;
pub use session::{
    Effect, Event, Notice, Phase, Progress, RecordTone, RequestId, ReviewOutcome, ReviewSession, SessionConfig, Step,
};
