//! Grants recorded from dialog selections, and the watch policy that uses them

use crate::error::{Error, HostError, Result};
use crate::types::WatchTarget;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Component, Path, PathBuf};
use std::str::FromStr;
use tracing::info;

/// Which watch targets the host forwards to its watch service
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum WatchPolicy {
    /// Every target the client names
    #[default]
    Any,
    /// Only paths the user picked through the dialog (or below them)
    SelectedOnly,
}

impl FromStr for WatchPolicy {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "any" => Ok(Self::Any),
            "selected_only" | "selected-only" => Ok(Self::SelectedOnly),
            other => Err(format!(
                "unknown watch policy '{}' (expected 'any' or 'selected-only')",
                other
            )),
        }
    }
}

impl fmt::Display for WatchPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Any => f.write_str("any"),
            Self::SelectedOnly => f.write_str("selected-only"),
        }
    }
}

/// A path handed to the client through the dialog
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Grant {
    pub path: PathBuf,
    pub granted_at: chrono::DateTime<chrono::Utc>,
}

/// Paths the user has selected during this host's lifetime
#[derive(Debug, Default)]
pub struct GrantRegistry {
    grants: Vec<Grant>,
}

impl GrantRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a dialog selection
    pub fn grant(&mut self, path: impl AsRef<Path>) -> Result<()> {
        let path = normalize_path(path.as_ref())?;
        if self.grants.iter().any(|g| g.path == path) {
            return Ok(());
        }

        info!("Granting watch access to: {:?}", path);
        self.grants.push(Grant {
            path,
            granted_at: chrono::Utc::now(),
        });
        Ok(())
    }

    /// True if `path` is a granted path or lies below one
    pub fn is_granted(&self, path: impl AsRef<Path>) -> bool {
        match normalize_path(path.as_ref()) {
            Ok(path) => self.grants.iter().any(|g| path.starts_with(&g.path)),
            Err(_) => false,
        }
    }

    /// Check a watch target against `policy`
    pub fn permits(&self, policy: WatchPolicy, target: &WatchTarget) -> Result<()> {
        match policy {
            WatchPolicy::Any => Ok(()),
            WatchPolicy::SelectedOnly if self.is_granted(target.as_str()) => Ok(()),
            WatchPolicy::SelectedOnly => Err(Error::Host(HostError::PathNotGranted(
                target.to_string(),
            ))),
        }
    }

    pub fn list(&self) -> &[Grant] {
        &self.grants
    }
}

/// Expand `~`, canonicalize what exists and clean the rest
pub fn normalize_path(path: &Path) -> Result<PathBuf> {
    if path.as_os_str().is_empty() {
        return Err(Error::Host(HostError::InvalidPath("empty path".to_string())));
    }

    let expanded = match path.strip_prefix("~") {
        Ok(rest) => match dirs::home_dir() {
            Some(home) => home.join(rest),
            None => path.to_path_buf(),
        },
        Err(_) => path.to_path_buf(),
    };

    if expanded.exists() {
        return expanded.canonicalize().map_err(|e| {
            Error::Host(HostError::InvalidPath(format!(
                "Failed to canonicalize path {:?}: {}",
                expanded, e
            )))
        });
    }

    // Canonicalize the deepest existing ancestor and append the rest; this
    // handles /tmp being a symlink to /private/tmp on macOS.
    let mut current = expanded;
    let mut remaining = Vec::new();
    while !current.exists() {
        let Some(parent) = current.parent().map(Path::to_path_buf) else {
            break;
        };
        if let Some(name) = current.file_name() {
            remaining.push(name.to_owned());
        }
        current = parent;
    }

    let mut result = if current.exists() {
        current.canonicalize().unwrap_or(current)
    } else {
        current
    };
    for part in remaining.into_iter().rev() {
        result.push(part);
    }

    Ok(clean_path(&result))
}

/// Resolve `.` and `..` without touching the filesystem
fn clean_path(path: &Path) -> PathBuf {
    let mut components = Vec::new();

    for component in path.components() {
        match component {
            Component::ParentDir => {
                components.pop();
            }
            Component::CurDir => {}
            c => components.push(c),
        }
    }

    components.iter().collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_grant_covers_path_and_children() {
        let dir = tempdir().unwrap();
        let mut grants = GrantRegistry::new();
        assert!(!grants.is_granted(dir.path()));

        grants.grant(dir.path()).unwrap();
        assert!(grants.is_granted(dir.path()));
        assert!(grants.is_granted(dir.path().join("textures/skin.png")));
    }

    #[test]
    fn test_grant_is_idempotent() {
        let dir = tempdir().unwrap();
        let mut grants = GrantRegistry::new();
        grants.grant(dir.path()).unwrap();
        grants.grant(dir.path()).unwrap();
        assert_eq!(grants.list().len(), 1);
    }

    #[test]
    fn test_policy_selected_only() {
        let dir = tempdir().unwrap();
        let model = dir.path().join("avatar.vrm");
        std::fs::write(&model, b"glTF").unwrap();

        let mut grants = GrantRegistry::new();
        let target = WatchTarget::from(model.as_path());
        assert!(grants.permits(WatchPolicy::Any, &target).is_ok());

        match grants.permits(WatchPolicy::SelectedOnly, &target) {
            Err(Error::Host(HostError::PathNotGranted(p))) => assert!(p.contains("avatar.vrm")),
            other => panic!("Expected PathNotGranted, got {:?}", other),
        }

        grants.grant(&model).unwrap();
        assert!(grants.permits(WatchPolicy::SelectedOnly, &target).is_ok());
    }

    #[test]
    fn test_dot_dot_cannot_escape_a_grant() {
        let dir = tempdir().unwrap();
        let inner = dir.path().join("models");
        std::fs::create_dir(&inner).unwrap();

        let mut grants = GrantRegistry::new();
        grants.grant(&inner).unwrap();
        assert!(!grants.is_granted(inner.join("../secret.txt")));
    }

    #[test]
    fn test_policy_parsing() {
        assert_eq!("any".parse::<WatchPolicy>().unwrap(), WatchPolicy::Any);
        assert_eq!(
            "selected-only".parse::<WatchPolicy>().unwrap(),
            WatchPolicy::SelectedOnly
        );
        assert_eq!(
            "Selected_Only".parse::<WatchPolicy>().unwrap(),
            WatchPolicy::SelectedOnly
        );
        assert!("everything".parse::<WatchPolicy>().is_err());
        assert_eq!(WatchPolicy::SelectedOnly.to_string(), "selected-only");
    }

    #[test]
    fn test_empty_path_is_invalid() {
        assert!(normalize_path(Path::new("")).is_err());
    }
}
