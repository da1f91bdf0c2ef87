use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

/// Rewrites one substring of every translated message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MessageSubstitution {
    /// Substring to look for; must not be empty.
    pub pattern: String,
    /// Text written in its place.
    pub replacement: String,
}

/// How the boundary renders translated messages.
///
/// Use `BoundaryConfig::default()` for plain messages without backtraces, or build one with the
/// builder methods. Can also be loaded from JSON:
///
/// ```
/// use borderline::BoundaryConfig;
///
/// let config = BoundaryConfig::from_json(
///     r#"{"include_backtrace": true, "substitutions": [{"pattern": "CPUFloatType", "replacement": "torch.FloatTensor"}]}"#,
/// )
/// .unwrap();
/// assert!(config.include_backtrace);
/// assert_eq!(config.process_message("expected CPUFloatType"), "expected torch.FloatTensor");
/// ```
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BoundaryConfig {
    /// Append native backtraces to index and generic error messages.
    pub include_backtrace: bool,
    /// Applied in order to every translated message.
    pub substitutions: Vec<MessageSubstitution>,
}

impl BoundaryConfig {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets whether backtraces are rendered into messages.
    #[must_use]
    pub fn include_backtrace(mut self, include: bool) -> Self {
        self.include_backtrace = include;
        self
    }

    /// Adds a substitution applied after the ones already configured.
    #[must_use]
    pub fn substitute(mut self, pattern: impl Into<String>, replacement: impl Into<String>) -> Self {
        self.substitutions.push(MessageSubstitution {
            pattern: pattern.into(),
            replacement: replacement.into(),
        });
        self
    }

    /// Parses and validates a JSON configuration.
    pub fn from_json(text: &str) -> Result<Self, ConfigError> {
        let config: Self = serde_json::from_str(text)?;
        config.validate()?;
        Ok(config)
    }

    /// Rejects substitutions with empty patterns.
    pub fn validate(&self) -> Result<(), ConfigError> {
        match self.substitutions.iter().position(|s| s.pattern.is_empty()) {
            Some(index) => Err(ConfigError::EmptyPattern { index }),
            None => Ok(()),
        }
    }

    /// Applies the configured substitutions to `message`.
    #[must_use]
    pub fn process_message(&self, message: &str) -> String {
        let mut out = message.to_owned();
        for sub in &self.substitutions {
            if sub.pattern.is_empty() {
                continue;
            }
            out = out.replace(&sub.pattern, &sub.replacement);
        }
        out
    }
}
