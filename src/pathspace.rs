//! Virtual path namespace and drive/special-path collaborator traits (§4.3, §6).
//!
//! These traits are plain synchronous traits, not `async_trait`-wrapped: the
//! command dispatch loop is itself single-threaded and blocking (§5), so there is
//! no async caller for them to suspend under, unlike the hardware drivers this
//! crate's other collaborator traits wrap.

use crate::error::ConfigError;

/// A single drive exposed to the device: a stable identifier and a human label.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Drive {
    pub id: String,
    pub label: String,
}

/// A user-configured alias mapped onto a host directory (§3 "SpecialPath").
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SpecialPath {
    pub alias: String,
    pub host_path: String,
}

/// Platform drive enumeration, consumed by `GetDriveCount`/`GetDriveInfo` (§6).
pub trait DriveProvider: Send + Sync {
    fn list_drives(&self) -> Vec<Drive>;
}

/// The ordered special-path catalog, consumed by `GetSpecialPathCount`/`GetSpecialPath`
/// and mutated by the out-of-scope UI collaborator between commands (§6, §5).
pub trait SpecialPathCatalog: Send + Sync {
    fn size(&self) -> u32;
    fn list(&self) -> Vec<SpecialPath>;
    fn add(&self, alias: String, host_path: String) -> Result<(), ConfigError>;
    fn remove(&self, index: usize) -> Result<(), ConfigError>;
}

/// The external file-open dialog consumed by `SelectFile` (§4.4, §6a).
pub trait FilePicker: Send + Sync {
    fn pick(&self) -> Option<String>;
}

/// Default drive provider: a single `Home` drive on non-Windows hosts. Windows
/// lettered-drive enumeration is a documented extension point — see SPEC_FULL.md §6a.
pub struct StdDriveProvider;

impl DriveProvider for StdDriveProvider {
    fn list_drives(&self) -> Vec<Drive> {
        vec![Drive {
            id: "Home".to_string(),
            label: "Home root".to_string(),
        }]
    }
}

/// A picker with nothing behind it; `SelectFile` falls back to the well-known
/// placeholder path (§4.4) whenever this is used.
pub struct NullFilePicker;

impl FilePicker for NullFilePicker {
    fn pick(&self) -> Option<String> {
        None
    }
}

fn collapse_slashes(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    let mut last_was_slash = false;
    for c in s.chars() {
        if c == '/' {
            if !last_was_slash {
                out.push('/');
            }
            last_was_slash = true;
        } else {
            out.push(c);
            last_was_slash = false;
        }
    }
    out
}

/// `normalize(host_path) → virtual_path` (§4.3).
///
/// Collapses `\` to `/` and repeated `/` to a single `/`. On non-Windows hosts the
/// single `Home:` drive is prepended; on Windows the drive letter already present
/// in `host_path` is kept as-is.
pub fn normalize(host_path: &str) -> String {
    let collapsed = collapse_slashes(&host_path.replace('\\', "/"));
    if cfg!(windows) {
        collapsed
    } else {
        format!("Home:{collapsed}")
    }
}

/// `denormalize(virtual_path) → host_path` (§4.3), the inverse of [`normalize`].
pub fn denormalize(virtual_path: &str) -> String {
    if cfg!(windows) {
        virtual_path.replace('/', "\\")
    } else {
        virtual_path
            .strip_prefix("Home:")
            .unwrap_or(virtual_path)
            .to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalize_prepends_home_drive_on_non_windows() {
        if cfg!(windows) {
            return;
        }
        assert_eq!(normalize("/home/u/music"), "Home:/home/u/music");
    }

    #[test]
    fn normalize_collapses_repeated_and_backslash_separators() {
        if cfg!(windows) {
            return;
        }
        assert_eq!(normalize("/home//u\\\\music"), "Home:/home/u/music");
    }

    #[test]
    fn round_trips_through_denormalize() {
        if cfg!(windows) {
            return;
        }
        for p in ["/home/u/music", "/", "/etc/hosts", "/home/u/docs/a/b/c"] {
            assert_eq!(denormalize(&normalize(p)), p);
        }
    }

    #[test]
    fn special_path_alias_scenario_from_spec() {
        if cfg!(windows) {
            return;
        }
        let entries = [
            SpecialPath {
                alias: "Music".to_string(),
                host_path: "/home/u/music".to_string(),
            },
            SpecialPath {
                alias: "Docs".to_string(),
                host_path: "/home/u/docs".to_string(),
            },
        ];
        let entry = &entries[1];
        assert_eq!(entry.alias, "Docs");
        assert_eq!(normalize(&entry.host_path), "Home:/home/u/docs");
    }
}
