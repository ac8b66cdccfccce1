use thiserror::Error;

pub type Result<T> = std::result::Result<T, BrowserError>;

/// Raw driver failures. These never leave the engine unclassified.
#[derive(Debug, Error)]
pub enum BrowserError {
    #[error("chromium error: {0}")]
    ChromiumError(String),

    #[error("navigation failed: {0}")]
    NavigationError(String),

    #[error("selector not found: {0}")]
    SelectorNotFound(String),

    #[error("timeout: {0}")]
    Timeout(String),

    #[error("script evaluation failed: {0}")]
    EvaluationError(String),
}

impl BrowserError {
    /// Whether this failure came from a bounded wait expiring.
    #[must_use]
    pub fn is_timeout(&self) -> bool {
        matches!(self, Self::Timeout(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = BrowserError::NavigationError("page not found".to_string());
        assert_eq!(err.to_string(), "navigation failed: page not found");
    }

    #[test]
    fn test_timeout_detection() {
        assert!(BrowserError::Timeout("main.profile".to_string()).is_timeout());
        assert!(!BrowserError::SelectorNotFound("h1".to_string()).is_timeout());
    }
}
