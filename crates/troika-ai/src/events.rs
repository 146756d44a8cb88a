//! Turn output events.

/// What a consumer sees of one turn.
///
/// A turn emits any number of [`TurnEvent::Chunk`]s followed by exactly
/// one terminal event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TurnEvent {
    /// Partial assistant text.
    Chunk(String),
    /// The turn completed.
    Final {
        /// Full assistant reply.
        text: String,
        /// Whether the reply suggests routing the user to a specialist.
        escalate: bool,
    },
    /// The turn was cancelled (superseded by a newer message).
    Cancelled,
    /// The turn failed; `message` is safe to show the user.
    Failed {
        /// Human-readable failure description.
        message: String,
    },
}

impl TurnEvent {
    /// Whether this event ends the turn.
    #[must_use]
    pub fn is_terminal(&self) -> bool {
        !matches!(self, Self::Chunk(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn terminal_classification() {
        assert!(!TurnEvent::Chunk("a".into()).is_terminal());
        assert!(TurnEvent::Final {
            text: "a".into(),
            escalate: false
        }
        .is_terminal());
        assert!(TurnEvent::Cancelled.is_terminal());
        assert!(TurnEvent::Failed {
            message: "x".into()
        }
        .is_terminal());
    }
}
