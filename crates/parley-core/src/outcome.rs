//! Result of waiting for a reply.

/// How a wait for a reply ended.
///
/// Timeouts and cancellations are ordinary outcomes, not errors. A
/// legitimately empty reply is `Resolved(String::new())` and stays
/// distinguishable from both.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReplyOutcome {
    /// The matching reply arrived; holds its payload.
    Resolved(String),
    /// The deadline passed with no matching reply.
    TimedOut,
    /// The request was cancelled or aborted, or none was outstanding.
    Cancelled,
}

impl ReplyOutcome {
    /// Whether a reply arrived.
    #[must_use]
    pub fn is_resolved(&self) -> bool {
        matches!(self, ReplyOutcome::Resolved(_))
    }

    /// The reply payload, if one arrived.
    #[must_use]
    pub fn into_payload(self) -> Option<String> {
        match self {
            ReplyOutcome::Resolved(payload) => Some(payload),
            ReplyOutcome::TimedOut | ReplyOutcome::Cancelled => None,
        }
    }

    /// The reply payload, or an empty string on timeout or cancellation.
    #[must_use]
    pub fn payload_or_empty(self) -> String {
        self.into_payload().unwrap_or_default()
    }
}
