//! Logging setup and the per-collection logging policy.
//!
//! Private collections log with reduced verbosity: per-file events are
//! dropped and any path that still reaches a log line is redacted. The
//! policy is a plain value handed to whoever logs; the global subscriber is
//! configured once and never touched afterwards.

use crate::config::EngineConfig;
use std::borrow::Cow;
use std::path::Path;
use tracing_subscriber::EnvFilter;

const REDACTED: &str = "<private>";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verbosity {
    Full,
    Reduced,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LogPolicy {
    verbosity: Verbosity,
}

impl LogPolicy {
    pub fn for_collection(private: bool) -> Self {
        let verbosity = if private { Verbosity::Reduced } else { Verbosity::Full };
        Self { verbosity }
    }

    pub fn verbosity(&self) -> Verbosity {
        self.verbosity
    }

    /// Whether per-file debug events may be emitted.
    pub fn per_file(&self) -> bool {
        self.verbosity == Verbosity::Full
    }

    pub fn path<'a>(&self, path: &'a Path) -> Cow<'a, str> {
        match self.verbosity {
            Verbosity::Full => path.to_string_lossy(),
            Verbosity::Reduced => Cow::Borrowed(REDACTED),
        }
    }

    pub fn text<'a>(&self, text: &'a str) -> &'a str {
        match self.verbosity {
            Verbosity::Full => text,
            Verbosity::Reduced => REDACTED,
        }
    }
}

impl Default for LogPolicy {
    fn default() -> Self {
        Self::for_collection(false)
    }
}

/// Install the global fmt subscriber. `RUST_LOG` wins over the configured filter.
/// Safe to call more than once; later calls are no-ops.
pub fn init(config: &EngineConfig) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&config.log_filter));
    let _ = tracing_subscriber::fmt().with_env_filter(filter).try_init();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_private_policy_redacts() {
        let policy = LogPolicy::for_collection(true);
        assert!(!policy.per_file());
        assert_eq!(policy.path(Path::new("/home/me/secret.jpg")), "<private>");
        assert_eq!(policy.text("holiday"), "<private>");
    }

    #[test]
    fn test_public_policy_passes_through() {
        let policy = LogPolicy::default();
        assert!(policy.per_file());
        assert_eq!(policy.path(Path::new("/a/b.jpg")), "/a/b.jpg");
    }
}
