// Per-client sequence auditing. Nothing is withheld or resequenced; frames are
// only classified against the last sequence seen.

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Classification {
    /// Exactly one past the current sequence.
    Accepted,
    /// At or below the current sequence.
    StaleOrDuplicate,
    /// Skipped ahead by more than one.
    OutOfOrderWarning,
}

impl Classification {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Accepted => "accepted",
            Self::StaleOrDuplicate => "stale_or_duplicate",
            Self::OutOfOrderWarning => "out_of_order",
        }
    }
}

/// Classify `incoming` against `current`. The new current sequence is always
/// `incoming`, even when it moves backwards.
pub fn observe(current: i64, incoming: i64) -> (Classification, i64) {
    let delta = i128::from(incoming) - i128::from(current);
    let classification = if delta <= 0 {
        Classification::StaleOrDuplicate
    } else if delta == 1 {
        Classification::Accepted
    } else {
        Classification::OutOfOrderWarning
    };
    (classification, incoming)
}
