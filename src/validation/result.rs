use serde::{Deserialize, Serialize};

/// Aggregated outcome of one or more validation passes.
///
/// `valid` is true exactly when `errors` is empty; warnings never affect it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValidationResult {
    pub valid: bool,
    pub errors: Vec<String>,
    pub warnings: Vec<String>,
}

impl Default for ValidationResult {
    fn default() -> Self {
        Self::new()
    }
}

impl ValidationResult {
    pub fn new() -> Self {
        Self {
            valid: true,
            errors: Vec::new(),
            warnings: Vec::new(),
        }
    }

    pub fn failed(error: impl Into<String>) -> Self {
        let mut result = Self::new();
        result.error(error);
        result
    }

    pub fn error(&mut self, message: impl Into<String>) {
        self.errors.push(message.into());
        self.valid = false;
    }

    pub fn warn(&mut self, message: impl Into<String>) {
        self.warnings.push(message.into());
    }

    /// Union `other` into `self`. Messages already present are not repeated.
    pub fn merge(&mut self, other: ValidationResult) {
        for error in other.errors {
            if !self.errors.contains(&error) {
                self.errors.push(error);
            }
        }
        for warning in other.warnings {
            if !self.warnings.contains(&warning) {
                self.warnings.push(warning);
            }
        }
        self.valid = self.errors.is_empty();
    }

    pub fn union(results: impl IntoIterator<Item = ValidationResult>) -> Self {
        results.into_iter().fold(Self::new(), |mut acc, r| {
            acc.merge(r);
            acc
        })
    }
}
