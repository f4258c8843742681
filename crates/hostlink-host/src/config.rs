//! Host configuration

use serde::Deserialize;

/// Errors raised while loading a [`HostConfig`]
#[derive(Debug, thiserror::Error)]
pub enum HostConfigError {
    /// The TOML text could not be parsed or has the wrong shape
    #[error("invalid host configuration: {0}")]
    Parse(#[from] toml::de::Error),

    /// A value parsed but is out of range
    #[error("invalid host configuration: {field} {reason}")]
    Invalid {
        /// Offending key
        field: &'static str,
        /// What is wrong with it
        reason: &'static str,
    },
}

/// Tunables of a [`MemoryHost`](crate::MemoryHost).
///
/// ```toml
/// recursion_limit = 200
/// gc_threshold = 0        # collect only when asked
/// strict_refcounts = true
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct HostConfig {
    /// Maximum depth of nested host calls
    pub recursion_limit: usize,
    /// Allocations between automatic collections; 0 disables them
    pub gc_threshold: usize,
    /// Report reference count misuse (release of a dead value, freeing a
    /// live instance) on the fatal diagnostic channel
    pub strict_refcounts: bool,
}

impl Default for HostConfig {
    fn default() -> Self {
        Self {
            recursion_limit: 200,
            gc_threshold: 0,
            strict_refcounts: true,
        }
    }
}

impl HostConfig {
    /// Parse a configuration from TOML text. Missing keys keep their
    /// defaults.
    pub fn from_toml_str(text: &str) -> Result<Self, HostConfigError> {
        let config: HostConfig = toml::from_str(text)?;
        if config.recursion_limit == 0 {
            return Err(HostConfigError::Invalid {
                field: "recursion_limit",
                reason: "must be at least 1",
            });
        }
        Ok(config)
    }
}
