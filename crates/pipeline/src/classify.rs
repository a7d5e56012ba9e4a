//! Error classification: which work failures are worth another attempt.
//!
//! The concrete taxonomy is provider-specific, so the retry engine takes the
//! classifier as an injected dependency.

use crate::error::ProviderError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorClass {
    /// Consume an attempt and try again after the policy delay.
    Retryable,
    /// Deterministic failure: stop now regardless of the remaining budget.
    Immediate,
}

pub trait ErrorClassifier: Send + Sync {
    fn classify(&self, error: &anyhow::Error) -> ErrorClass;
}

/// Default classifier.
///
/// Authentication and malformed-request failures (a `ProviderError` of that kind,
/// or an HTTP 400/401 from the provider) are immediate; everything else, including
/// errors that are not `ProviderError`s at all, is retried.
#[derive(Debug, Clone, Copy, Default)]
pub struct ProviderErrorClassifier;

impl ErrorClassifier for ProviderErrorClassifier {
    fn classify(&self, error: &anyhow::Error) -> ErrorClass {
        let provider = error
            .chain()
            .find_map(|cause| cause.downcast_ref::<ProviderError>());

        match provider {
            Some(ProviderError::Authentication(_) | ProviderError::InvalidRequest(_)) => {
                ErrorClass::Immediate
            }
            Some(ProviderError::Http {
                status: 400 | 401, ..
            }) => ErrorClass::Immediate,
            _ => ErrorClass::Retryable,
        }
    }
}

/// Classifier backed by a closure.
pub struct FnClassifier<F>(F);

/// Build a classifier from a closure.
pub fn classify_with<F>(f: F) -> FnClassifier<F>
where
    F: Fn(&anyhow::Error) -> ErrorClass + Send + Sync,
{
    FnClassifier(f)
}

impl<F> ErrorClassifier for FnClassifier<F>
where
    F: Fn(&anyhow::Error) -> ErrorClass + Send + Sync,
{
    fn classify(&self, error: &anyhow::Error) -> ErrorClass {
        (self.0)(error)
    }
}
