//! Outcome classification for recorded status codes.

use std::sync::Arc;

/// Returns true when the status code counts as a failure.
pub type StatusClassifier = Arc<dyn Fn(u16) -> bool + Send + Sync>;

/// 404 and 499..=600 are failures; everything else is a success.
pub fn default_is_failure(code: u16) -> bool {
    code == 404 || (499..=600).contains(&code)
}

pub fn default_classifier() -> StatusClassifier {
    Arc::new(default_is_failure)
}

/// Classifier failing exactly the given codes.
pub fn from_codes(codes: Vec<u16>) -> StatusClassifier {
    Arc::new(move |code| codes.contains(&code))
}
