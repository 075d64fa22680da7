//! Desired-state document and reconciler settings.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::error::{Error, Result};

/// Default location of the desired-state document.
pub const DEFAULT_DESIRED_STATE_PATH: &str = "data/config.json";

/// Externally owned desired configuration for the whole group.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DesiredConfig {
    pub instance_type: String,
    #[serde(default)]
    pub image_id: String,
}

/// Handle on the desired-state document. Every `read` goes back to disk.
#[derive(Debug, Clone)]
pub struct DesiredStateFile {
    path: PathBuf,
}

impl DesiredStateFile {
    pub fn new(path: impl AsRef<Path>) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Load a fresh snapshot of the desired configuration.
    pub fn read(&self) -> Result<DesiredConfig> {
        let raw = std::fs::read_to_string(&self.path).map_err(|source| Error::ConfigUnavailable {
            path: self.path.clone(),
            source,
        })?;

        let config: DesiredConfig =
            serde_json::from_str(&raw).map_err(|e| Error::ConfigMalformed {
                path: self.path.clone(),
                reason: e.to_string(),
            })?;

        if config.instance_type.trim().is_empty() {
            return Err(Error::ConfigMalformed {
                path: self.path.clone(),
                reason: "instance_type is empty".into(),
            });
        }

        Ok(config)
    }
}

/// How the resize waits for a stopped instance before modifying it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "mode", rename_all = "snake_case")]
pub enum QuiesceStrategy {
    /// Sleep a fixed time and assume the stop has completed. Racy when the
    /// provider is slow to stop.
    FixedDelay { secs: u64 },
    /// Poll the instance status until it reports `stopped`, giving up after
    /// `max_polls` polls.
    PollUntilStopped { interval_secs: u64, max_polls: u32 },
}

impl Default for QuiesceStrategy {
    fn default() -> Self {
        Self::PollUntilStopped {
            interval_secs: 5,
            max_polls: 36,
        }
    }
}

/// Reconciler timing settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReconcilerSettings {
    /// Sleep between loop iterations.
    pub poll_interval_secs: u64,
    /// Upper bound on any single provider call.
    pub call_timeout_secs: u64,
    pub quiesce: QuiesceStrategy,
}

impl Default for ReconcilerSettings {
    fn default() -> Self {
        Self {
            poll_interval_secs: 60,
            call_timeout_secs: 30,
            quiesce: QuiesceStrategy::default(),
        }
    }
}

impl ReconcilerSettings {
    /// Create settings from `VMSTATE_*` environment variables and defaults.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Create settings from an arbitrary key lookup.
    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Self::default();
        let number = |key: &str, default: u64| -> u64 {
            match lookup(key) {
                None => default,
                Some(raw) => match raw.trim().parse::<u64>() {
                    Ok(v) => v.max(1),
                    Err(_) => {
                        warn!("Ignoring {}={:?}: not a number, using {}", key, raw, default);
                        default
                    }
                },
            }
        };

        let quiesce = match lookup("VMSTATE_QUIESCE_MODE").as_deref().map(str::trim) {
            Some("fixed") => QuiesceStrategy::FixedDelay {
                secs: number("VMSTATE_QUIESCE_SECS", 60),
            },
            mode => {
                if let Some(other) = mode.filter(|m| *m != "poll") {
                    warn!("Unknown VMSTATE_QUIESCE_MODE {:?}, polling instead", other);
                }
                QuiesceStrategy::PollUntilStopped {
                    interval_secs: number("VMSTATE_QUIESCE_POLL_SECS", 5),
                    max_polls: u32::try_from(number("VMSTATE_QUIESCE_MAX_POLLS", 36))
                        .unwrap_or(u32::MAX),
                }
            }
        };

        Self {
            poll_interval_secs: number("VMSTATE_POLL_INTERVAL_SECS", defaults.poll_interval_secs),
            call_timeout_secs: number("VMSTATE_CALL_TIMEOUT_SECS", defaults.call_timeout_secs),
            quiesce,
        }
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.poll_interval_secs)
    }

    pub fn call_timeout(&self) -> Duration {
        Duration::from_secs(self.call_timeout_secs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn write_doc(dir: &tempfile::TempDir, body: &str) -> DesiredStateFile {
        let path = dir.path().join("config.json");
        std::fs::write(&path, body).unwrap();
        DesiredStateFile::new(path)
    }

    #[test]
    fn test_read_desired_state() {
        let dir = tempfile::tempdir().unwrap();
        let file = write_doc(&dir, r#"{"instance_type": "t3.micro", "image_id": "ami-123"}"#);
        let config = file.read().unwrap();
        assert_eq!(config.instance_type, "t3.micro");
        assert_eq!(config.image_id, "ami-123");
    }

    #[test]
    fn test_read_is_never_cached() {
        let dir = tempfile::tempdir().unwrap();
        let file = write_doc(&dir, r#"{"instance_type": "t3.micro"}"#);
        assert_eq!(file.read().unwrap().instance_type, "t3.micro");

        std::fs::write(file.path(), r#"{"instance_type": "t3.large"}"#).unwrap();
        assert_eq!(file.read().unwrap().instance_type, "t3.large");
    }

    #[test]
    fn test_missing_document_is_unavailable() {
        let dir = tempfile::tempdir().unwrap();
        let file = DesiredStateFile::new(dir.path().join("absent.json"));
        assert!(matches!(file.read(), Err(Error::ConfigUnavailable { .. })));
    }

    #[test]
    fn test_undecodable_document_is_malformed() {
        let dir = tempfile::tempdir().unwrap();
        let file = write_doc(&dir, "{ not json");
        assert!(matches!(file.read(), Err(Error::ConfigMalformed { .. })));

        let file = write_doc(&dir, r#"{"image_id": "ami-1"}"#);
        assert!(matches!(file.read(), Err(Error::ConfigMalformed { .. })));
    }

    #[test]
    fn test_empty_instance_type_is_malformed() {
        let dir = tempfile::tempdir().unwrap();
        let file = write_doc(&dir, r#"{"instance_type": "  ", "image_id": "ami-1"}"#);
        match file.read() {
            Err(Error::ConfigMalformed { reason, .. }) => assert!(reason.contains("empty")),
            other => panic!("expected malformed, got {:?}", other),
        }
    }

    #[test]
    fn test_settings_defaults() {
        let settings = ReconcilerSettings::from_lookup(|_| None);
        assert_eq!(settings, ReconcilerSettings::default());
        assert_eq!(settings.poll_interval(), Duration::from_secs(60));
        assert_eq!(
            settings.quiesce,
            QuiesceStrategy::PollUntilStopped {
                interval_secs: 5,
                max_polls: 36
            }
        );
    }

    #[test]
    fn test_settings_from_lookup() {
        let env: HashMap<&str, &str> = [
            ("VMSTATE_POLL_INTERVAL_SECS", "15"),
            ("VMSTATE_CALL_TIMEOUT_SECS", "0"),
            ("VMSTATE_QUIESCE_MODE", "fixed"),
            ("VMSTATE_QUIESCE_SECS", "90"),
        ]
        .into_iter()
        .collect();
        let settings = ReconcilerSettings::from_lookup(|k| env.get(k).map(|v| v.to_string()));

        assert_eq!(settings.poll_interval_secs, 15);
        assert_eq!(settings.call_timeout_secs, 1);
        assert_eq!(settings.quiesce, QuiesceStrategy::FixedDelay { secs: 90 });
    }

    #[test]
    fn test_settings_ignore_garbage() {
        let env: HashMap<&str, &str> = [
            ("VMSTATE_POLL_INTERVAL_SECS", "soon"),
            ("VMSTATE_QUIESCE_MODE", "psychic"),
            ("VMSTATE_QUIESCE_MAX_POLLS", "4"),
        ]
        .into_iter()
        .collect();
        let settings = ReconcilerSettings::from_lookup(|k| env.get(k).map(|v| v.to_string()));

        assert_eq!(settings.poll_interval_secs, 60);
        assert_eq!(
            settings.quiesce,
            QuiesceStrategy::PollUntilStopped {
                interval_secs: 5,
                max_polls: 4
            }
        );
    }
}
