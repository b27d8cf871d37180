//! Path normalization and the allow/deny prefix rules.
//!
//! Normalization is purely lexical: tilde expansion, absolutization against
//! the working directory, and `..`/`.` collapse without touching the
//! filesystem. Paths do not have to exist to be judged.

use std::path::{Component, Path, PathBuf};

use llamar_config::Config;

/// Outcome of a path check. `message` is empty when `ok` is true.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PathCheck {
    pub ok: bool,
    pub message: String,
}

impl PathCheck {
    fn ok() -> Self {
        Self {
            ok: true,
            message: String::new(),
        }
    }

    fn fail(message: impl Into<String>) -> Self {
        Self {
            ok: false,
            message: message.into(),
        }
    }
}

fn home_dir() -> PathBuf {
    if let Some(base_dirs) = directories::BaseDirs::new() {
        return base_dirs.home_dir().to_path_buf();
    }
    std::env::temp_dir()
}

/// Expand a leading tilde, absolutize against `cwd`, and collapse `.` and
/// `..` components lexically.
pub fn normalize(path: &str, cwd: &Path) -> PathBuf {
    let expanded: PathBuf = if path == "~" {
        home_dir()
    } else if let Some(rest) = path.strip_prefix("~/") {
        home_dir().join(rest)
    } else {
        PathBuf::from(path)
    };

    let absolute = if expanded.is_absolute() {
        expanded
    } else {
        cwd.join(expanded)
    };

    let mut collapsed = PathBuf::new();
    for component in absolute.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                // Lexical collapse: never pop past the root.
                if collapsed.parent().is_some() {
                    collapsed.pop();
                }
            }
            other => collapsed.push(other),
        }
    }
    collapsed
}

/// True when `path` equals `base` or lies strictly under it.
pub fn under(path: &Path, base: &Path) -> bool {
    if path == base {
        return true;
    }
    let base_str = base.to_string_lossy();
    let path_str = path.to_string_lossy();
    let prefix = if base_str.ends_with('/') {
        base_str.into_owned()
    } else {
        format!("{base_str}/")
    };
    path_str.starts_with(&prefix)
}

/// Apply the sandbox rules to `path` for the named operation.
///
/// Rule order: empty path, denied prefixes, then the allow-list (only when
/// non-empty). Denied rules win over allowed ones.
pub fn validate_path(path: &str, config: &Config, cwd: &Path, op: &str) -> PathCheck {
    if path.trim().is_empty() {
        return PathCheck::fail("Path is empty");
    }

    let normalized = normalize(path, cwd);

    for rule in &config.denied_paths {
        let base = normalize(rule, cwd);
        if under(&normalized, &base) {
            return PathCheck::fail(format!(
                "Cannot {op} {}: restricted area (denied by rule '{rule}')",
                normalized.display()
            ));
        }
    }

    if !config.allowed_paths.is_empty() {
        let permitted = config
            .allowed_paths
            .iter()
            .any(|rule| under(&normalized, &normalize(rule, cwd)));
        if !permitted {
            return PathCheck::fail(format!(
                "Cannot {op} {}: outside allowed paths",
                normalized.display()
            ));
        }
    }

    PathCheck::ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config_with(allowed: &[&str], denied: &[&str]) -> Config {
        Config {
            allowed_paths: allowed.iter().map(|s| s.to_string()).collect(),
            denied_paths: denied.iter().map(|s| s.to_string()).collect(),
            ..Config::default()
        }
    }

    #[test]
    fn test_normalize_collapses_dot_dot() {
        let cwd = Path::new("/work");
        assert_eq!(
            normalize("/a/b/../c/./d", cwd),
            PathBuf::from("/a/c/d")
        );
    }

    #[test]
    fn test_normalize_relative_against_cwd() {
        let cwd = Path::new("/work/project");
        assert_eq!(normalize("src/main.R", cwd), PathBuf::from("/work/project/src/main.R"));
        assert_eq!(normalize("../other", cwd), PathBuf::from("/work/other"));
    }

    #[test]
    fn test_normalize_never_pops_past_root() {
        let cwd = Path::new("/");
        assert_eq!(normalize("/../../etc", cwd), PathBuf::from("/etc"));
    }

    #[test]
    fn test_normalize_expands_tilde() {
        let cwd = Path::new("/work");
        let normalized = normalize("~/notes.md", cwd);
        assert!(normalized.is_absolute());
        assert!(normalized.ends_with("notes.md"));
        assert!(!normalized.to_string_lossy().contains('~'));
    }

    #[test]
    fn test_under_exact_and_prefix() {
        assert!(under(Path::new("/a/b"), Path::new("/a/b")));
        assert!(under(Path::new("/a/b/c"), Path::new("/a/b")));
        assert!(!under(Path::new("/a/bc"), Path::new("/a/b")));
        assert!(!under(Path::new("/a"), Path::new("/a/b")));
    }

    #[test]
    fn test_empty_path_fails() {
        let config = Config::default();
        let check = validate_path("", &config, Path::new("/work"), "read");
        assert!(!check.ok);
        assert_eq!(check.message, "Path is empty");

        let check = validate_path("   ", &config, Path::new("/work"), "read");
        assert!(!check.ok);
    }

    #[test]
    fn test_denied_prefix_rejected_with_rule_cited() {
        let config = config_with(&[], &["/etc"]);
        let check = validate_path("/etc/passwd", &config, Path::new("/work"), "read");
        assert!(!check.ok);
        assert!(check.message.contains("restricted"));
        assert!(check.message.contains("/etc"));
    }

    #[test]
    fn test_denied_wins_over_allowed() {
        let config = config_with(&["/"], &["/etc"]);
        let check = validate_path("/etc/shadow", &config, Path::new("/work"), "read");
        assert!(!check.ok);
        assert!(check.message.contains("restricted"));
    }

    #[test]
    fn test_allow_list_blocks_outsiders() {
        let config = config_with(&["/work"], &[]);
        let inside = validate_path("/work/data.csv", &config, Path::new("/work"), "write");
        assert!(inside.ok);

        let outside = validate_path("/tmp/evil", &config, Path::new("/work"), "write");
        assert!(!outside.ok);
        assert!(outside.message.contains("outside allowed paths"));
    }

    #[test]
    fn test_empty_allow_list_permits_everything_not_denied() {
        let config = config_with(&[], &[]);
        assert!(validate_path("/anywhere/at/all", &config, Path::new("/work"), "read").ok);
    }

    #[test]
    fn test_dot_dot_cannot_escape_deny() {
        let config = config_with(&[], &["/etc"]);
        let check = validate_path("/tmp/../etc/passwd", &config, Path::new("/work"), "read");
        assert!(!check.ok, "lexical traversal must not bypass denied prefixes");
    }

    #[test]
    fn test_validation_idempotent_over_normalize() {
        // validate_path(normalize(p)) and validate_path(p) agree on ok.
        let config = config_with(&["/work"], &["/work/secret"]);
        let cwd = Path::new("/work");
        for raw in ["/work/a/../secret/x", "sub/../file.R", "/work/ok.R", "/other"] {
            let direct = validate_path(raw, &config, cwd, "read").ok;
            let prenormalized =
                validate_path(&normalize(raw, cwd).to_string_lossy(), &config, cwd, "read").ok;
            assert_eq!(direct, prenormalized, "disagreement for {raw}");
        }
    }
}
