pub mod events;
pub mod rules;

pub use events::{SessionEvent, TransitionEffect, TransitionOutcome};
pub use rules::{apply, TransitionError};
