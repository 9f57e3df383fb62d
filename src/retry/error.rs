use std::error::Error;
use std::fmt;

/// Classifies an error as transient (worth another attempt) or not.
///
/// Implemented by the crate's own error types; the default [`RetryPolicy`]
/// predicate defers to it.
///
/// [`RetryPolicy`]: super::RetryPolicy
pub trait Retryable {
    fn is_retryable(&self) -> bool;
}

impl<T: Retryable + ?Sized> Retryable for Box<T> {
    fn is_retryable(&self) -> bool {
        (**self).is_retryable()
    }
}

/// Why a retried operation gave up.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RetryError<E> {
    /// Every allowed attempt failed with a retryable error; `last` is the
    /// final one observed.
    RetriesExhausted { attempts: u32, last: E },
    /// The operation failed with an error the policy does not retry.
    Permanent(E),
}

impl<E> RetryError<E> {
    /// Attempts made before giving up, or `None` for a permanent error.
    pub fn attempts(&self) -> Option<u32> {
        match self {
            RetryError::RetriesExhausted { attempts, .. } => Some(*attempts),
            RetryError::Permanent(_) => None,
        }
    }

    pub fn last_error(&self) -> &E {
        match self {
            RetryError::RetriesExhausted { last, .. } => last,
            RetryError::Permanent(e) => e,
        }
    }

    pub fn into_last_error(self) -> E {
        match self {
            RetryError::RetriesExhausted { last, .. } => last,
            RetryError::Permanent(e) => e,
        }
    }

    pub fn is_exhausted(&self) -> bool {
        matches!(self, RetryError::RetriesExhausted { .. })
    }
}

impl<E: fmt::Display> fmt::Display for RetryError<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RetryError::RetriesExhausted { attempts, last } => {
                write!(f, "retries exhausted after {} attempts: {}", attempts, last)
            }
            RetryError::Permanent(e) => write!(f, "{}", e),
        }
    }
}

impl<E: Error + 'static> Error for RetryError<E> {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        Some(self.last_error())
    }
}
