/// Error half of an activity's terminal [`Outcome`].
///
/// Cancellation is the only error this layer produces on its own.
/// Anything else a promise wants to report travels inside its Ready
/// value and passes through untouched.
#[derive(thiserror::Error, Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ActivityError {
    /// The activity was cancelled before its promise completed,
    /// either because the owning handle was released or because the
    /// promise requested cancellation mid-poll.
    #[error("activity cancelled")]
    Cancelled,
}

impl ActivityError {
    /// Returns true if this error represents cancellation.
    pub fn is_cancelled(&self) -> bool {
        matches!(self, ActivityError::Cancelled)
    }
}

/// Terminal result delivered to an activity's completion callback,
/// exactly once per activity.
pub type Outcome<T> = Result<T, ActivityError>;

/// Conversion from a promise's Ready value into the activity outcome.
///
/// Promises that already produce an [`Outcome`] get the identity
/// conversion; domain result types implement this alongside the
/// promise that yields them.
pub trait IntoOutcome {
    /// Payload type of the successful outcome.
    type Ready;

    fn into_outcome(self) -> Outcome<Self::Ready>;
}

impl<T> IntoOutcome for Outcome<T> {
    type Ready = T;

    fn into_outcome(self) -> Outcome<T> {
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cancelled_is_cancelled() {
        assert!(ActivityError::Cancelled.is_cancelled());
        assert_eq!(ActivityError::Cancelled.to_string(), "activity cancelled");
    }

    #[test]
    fn outcome_identity_conversion() {
        let ok: Outcome<u32> = Ok(3);
        assert_eq!(ok.into_outcome(), Ok(3));

        let err: Outcome<u32> = Err(ActivityError::Cancelled);
        assert_eq!(err.into_outcome(), Err(ActivityError::Cancelled));
    }

    #[test]
    fn custom_ready_types_convert() {
        enum Settled {
            Value(&'static str),
            Aborted,
        }

        impl IntoOutcome for Settled {
            type Ready = &'static str;

            fn into_outcome(self) -> Outcome<&'static str> {
                match self {
                    Settled::Value(v) => Ok(v),
                    Settled::Aborted => Err(ActivityError::Cancelled),
                }
            }
        }

        assert_eq!(Settled::Value("ok").into_outcome(), Ok("ok"));
        assert!(Settled::Aborted.into_outcome().is_err());
    }
}
