//! Feedback capture and injection for failed consensus rounds.

mod capture;
mod inject;

pub use capture::{
    ActionableStep, ConsensusFeedback, DedupRegistry, FeedbackCapture, PriorIteration, Severity,
    ValidatorFeedback, ValidatorIssue,
};
pub use inject::{sanitize, FeedbackRenderer};
