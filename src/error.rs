// Shared Failure Types
// Multi-cause failure aggregation and the connection lifetime signal

use std::error::Error as StdError;
use std::fmt;
use std::time::{Duration, Instant};

/// Boxed error used wherever causes of different types are collected together
pub type BoxError = Box<dyn StdError + Send + Sync + 'static>;

/// A single failure made of one or more independent causes.
///
/// Used by batch operations (closing several connections, checking several
/// data sources) that want to report every failure instead of only the first.
/// Causes keep their discovery order and duplicates are preserved.
pub struct AggregatedFailure {
    causes: Vec<BoxError>,
}

impl AggregatedFailure {
    /// Build an aggregate from a non-empty list of causes.
    ///
    /// # Panics
    ///
    /// Panics if `causes` is empty. An aggregate without a cause is a
    /// programming error, use [`AggregatedFailure::try_new`] when the list may
    /// legitimately be empty.
    pub fn new(causes: Vec<BoxError>) -> Self {
        assert!(
            !causes.is_empty(),
            "AggregatedFailure requires at least one cause"
        );
        Self { causes }
    }

    /// Build an aggregate, or `None` when there is nothing to report
    pub fn try_new(causes: Vec<BoxError>) -> Option<Self> {
        if causes.is_empty() {
            None
        } else {
            Some(Self { causes })
        }
    }

    /// Collect errors from a batch; `Ok(())` when the batch produced none
    pub fn from_errors<I, E>(errors: I) -> Result<(), Self>
    where
        I: IntoIterator<Item = E>,
        E: Into<BoxError>,
    {
        let causes: Vec<BoxError> = errors.into_iter().map(Into::into).collect();
        match Self::try_new(causes) {
            Some(failure) => Err(failure),
            None => Ok(()),
        }
    }

    /// The first cause discovered
    pub fn primary_cause(&self) -> &(dyn StdError + Send + Sync + 'static) {
        self.causes[0].as_ref()
    }

    /// Every cause, in discovery order
    pub fn causes(&self) -> &[BoxError] {
        &self.causes
    }

    pub fn len(&self) -> usize {
        self.causes.len()
    }

    /// Always false; kept for API symmetry with `len`
    pub fn is_empty(&self) -> bool {
        self.causes.is_empty()
    }

    pub fn into_causes(self) -> Vec<BoxError> {
        self.causes
    }
}

impl fmt::Display for AggregatedFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let count = self.causes.len();
        write!(
            f,
            "{} failure{} occurred:",
            count,
            if count == 1 { "" } else { "s" }
        )?;
        for (idx, cause) in self.causes.iter().enumerate() {
            write!(f, " [{}] {}", idx + 1, cause)?;
            if idx + 1 < count {
                write!(f, ";")?;
            }
        }
        Ok(())
    }
}

impl fmt::Debug for AggregatedFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AggregatedFailure")
            .field("causes", &self.causes)
            .finish()
    }
}

impl StdError for AggregatedFailure {
    fn source(&self) -> Option<&(dyn StdError + 'static)> {
        Some(self.causes[0].as_ref())
    }
}

/// Raised when a connection has outlived its configured maximum lifetime.
///
/// Pool consumers match on this type to discard and replace the connection
/// instead of reporting a connectivity problem.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LifetimeExceeded {
    message: Option<String>,
}

impl fmt::Display for LifetimeExceeded {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.message.as_deref().unwrap_or("Connection lifetime exceeded"))
    }
}

impl StdError for LifetimeExceeded {}

impl LifetimeExceeded {
    pub fn new() -> Self {
        Self { message: None }
    }

    pub fn with_message(message: impl Into<String>) -> Self {
        Self {
            message: Some(message.into()),
        }
    }

    pub fn message(&self) -> Option<&str> {
        self.message.as_deref()
    }
}

/// Check the age of a connection against an optional maximum lifetime
pub fn check_lifetime(created_at: Instant, max_lifetime: Option<Duration>) -> Result<(), LifetimeExceeded> {
    let Some(max) = max_lifetime else {
        return Ok(());
    };
    if max.is_zero() {
        return Ok(());
    }

    let lifetime = created_at.elapsed();
    if lifetime > max {
        return Err(LifetimeExceeded::with_message(format!(
            "The lifetime of the connection [{}] milliseconds exceeds the maximum permitted value of [{}] milliseconds",
            lifetime.as_millis(),
            max.as_millis()
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, thiserror::Error)]
    #[error("{0}")]
    struct CloseFailed(&'static str);

    fn failures(names: &[&'static str]) -> Vec<BoxError> {
        names
            .iter()
            .map(|n| Box::new(CloseFailed(*n)) as BoxError)
            .collect()
    }

    #[test]
    #[should_panic(expected = "at least one cause")]
    fn test_empty_aggregate_panics() {
        let _ = AggregatedFailure::new(Vec::new());
    }

    #[test]
    fn test_try_new_empty_is_none() {
        assert!(AggregatedFailure::try_new(Vec::new()).is_none());
    }

    #[test]
    fn test_primary_cause_is_first() {
        let failure = AggregatedFailure::new(failures(&["A", "B", "C"]));

        assert_eq!(failure.len(), 3);
        assert_eq!(failure.primary_cause().to_string(), "A");
        let all: Vec<String> = failure.causes().iter().map(|c| c.to_string()).collect();
        assert_eq!(all, vec!["A", "B", "C"]);
    }

    #[test]
    fn test_source_is_primary_cause() {
        let failure = AggregatedFailure::new(failures(&["first", "second"]));
        let source = failure.source().unwrap();
        assert_eq!(source.to_string(), "first");
    }

    #[test]
    fn test_display_reports_count_and_causes() {
        let failure = AggregatedFailure::new(failures(&["A", "B", "C"]));
        let message = failure.to_string();

        assert!(message.starts_with("3 failures occurred:"));
        assert!(message.contains("[1] A"));
        assert!(message.contains("[2] B"));
        assert!(message.contains("[3] C"));

        let single = AggregatedFailure::new(failures(&["only"]));
        assert_eq!(single.to_string(), "1 failure occurred: [1] only");
    }

    #[test]
    fn test_duplicates_preserved() {
        let failure = AggregatedFailure::new(failures(&["same", "same"]));
        assert_eq!(failure.len(), 2);
    }

    #[test]
    fn test_from_errors() {
        let none: Vec<CloseFailed> = Vec::new();
        assert!(AggregatedFailure::from_errors(none).is_ok());

        let err = AggregatedFailure::from_errors(vec![CloseFailed("x"), CloseFailed("y")]).unwrap_err();
        assert_eq!(err.len(), 2);
        assert_eq!(err.primary_cause().to_string(), "x");
    }

    #[test]
    fn test_lifetime_exceeded_message() {
        assert_eq!(LifetimeExceeded::new().to_string(), "Connection lifetime exceeded");
        assert_eq!(LifetimeExceeded::with_message("too old").to_string(), "too old");
        assert_eq!(LifetimeExceeded::with_message("too old").message(), Some("too old"));
    }

    #[test]
    fn test_check_lifetime() {
        let now = Instant::now();
        assert!(check_lifetime(now, None).is_ok());
        assert!(check_lifetime(now, Some(Duration::ZERO)).is_ok());
        assert!(check_lifetime(now, Some(Duration::from_secs(3600))).is_ok());

        let created = now - Duration::from_millis(50);
        let err = check_lifetime(created, Some(Duration::from_millis(10))).unwrap_err();
        let message = err.to_string();
        assert!(message.contains("exceeds the maximum permitted value of [10] milliseconds"));
    }
}
