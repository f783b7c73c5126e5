//! Domain errors shared across the pipeline

use thiserror::Error;

#[derive(Debug, Error)]
pub enum CoreError {
    /// A computation produced NaN/Infinity; the entity's state is left untouched
    #[error("non-finite {what} for {entity}: {value}")]
    NonFinite {
        entity: String,
        what: &'static str,
        value: f64,
    },

    #[error("failed to persist {path}: {source}")]
    Persist {
        path: String,
        #[source]
        source: anyhow::Error,
    },
}

impl CoreError {
    pub fn non_finite(entity: impl Into<String>, what: &'static str, value: f64) -> Self {
        CoreError::NonFinite {
            entity: entity.into(),
            what,
            value,
        }
    }
}

/// Reject NaN/Infinity before it can reach persisted state
pub fn ensure_finite(entity: &str, what: &'static str, value: f64) -> Result<f64, CoreError> {
    if value.is_finite() {
        Ok(value)
    } else {
        Err(CoreError::non_finite(entity, what, value))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ensure_finite_rejects_nan() {
        assert!(ensure_finite("NYC", "forecast", 21.5).is_ok());
        let err = ensure_finite("NYC", "forecast", f64::NAN).unwrap_err();
        assert!(err.to_string().contains("NYC"));
    }
}
