//! Lexical path helpers for the sandbox policy.
//!
//! The policy never touches the filesystem: `..` is resolved purely
//! lexically and symlinks are not followed.

use std::path::{Component, Path, PathBuf};

use regex::Regex;

/// Resolve `.` and `..` components without any I/O.
///
/// Leading `..` components on a relative path are kept, so
/// `../secret` stays visibly outside any root.
pub fn normalize_lexical(path: &Path) -> PathBuf {
    let mut parts: Vec<Component<'_>> = Vec::new();
    for comp in path.components() {
        match comp {
            Component::CurDir => {}
            Component::ParentDir => match parts.last() {
                Some(Component::Normal(_)) => {
                    parts.pop();
                }
                Some(Component::RootDir) | Some(Component::Prefix(_)) => {}
                _ => parts.push(comp),
            },
            other => parts.push(other),
        }
    }
    parts.iter().collect()
}

/// Whether `path` (after lexical normalization) sits under any of `roots`.
pub fn contained_in_roots(path: &Path, roots: &[PathBuf]) -> bool {
    let normalized = normalize_lexical(path);
    roots
        .iter()
        .any(|root| normalized.starts_with(normalize_lexical(root)))
}

/// Absolute-path patterns recognized inside shell command strings.
pub struct CommandPathPatterns {
    unix: Regex,
    windows: Regex,
}

impl CommandPathPatterns {
    pub fn new() -> Self {
        Self {
            // A path token starts at whitespace, a quote, `=` or line start.
            unix: Regex::new(r#"(?:^|[\s"'=(])(/[A-Za-z0-9_@%+.,/-]+)"#)
                .expect("static regex"),
            windows: Regex::new(r#"(?:^|[\s"'=(])([A-Za-z]:\\[^\s"'|&;<>]+)"#)
                .expect("static regex"),
        }
    }

    /// Extract every absolute path mentioned in `command`.
    pub fn extract(&self, command: &str) -> Vec<PathBuf> {
        let mut paths = Vec::new();
        for caps in self.unix.captures_iter(command) {
            if let Some(m) = caps.get(1) {
                paths.push(PathBuf::from(m.as_str()));
            }
        }
        for caps in self.windows.captures_iter(command) {
            if let Some(m) = caps.get(1) {
                paths.push(PathBuf::from(m.as_str()));
            }
        }
        paths
    }
}

impl Default for CommandPathPatterns {
    fn default() -> Self {
        Self::new()
    }
}

/// Basenames the read family must never touch.
const SENSITIVE_KEYWORDS: &[&str] = &["credentials", "secrets", "password", "token"];

/// Whether the final component of `raw` names a sensitive file
/// (`.env`, `.env.*`, or anything containing a credential keyword).
pub fn is_sensitive_basename(raw: &str) -> bool {
    let basename = raw
        .rsplit(['/', '\\'])
        .next()
        .unwrap_or(raw)
        .to_ascii_lowercase();
    if basename == ".env" || basename.starts_with(".env.") {
        return true;
    }
    SENSITIVE_KEYWORDS.iter().any(|kw| basename.contains(kw))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalize_resolves_dotdot() {
        assert_eq!(
            normalize_lexical(Path::new("/a/b/../c/./d")),
            PathBuf::from("/a/c/d")
        );
    }

    #[test]
    fn normalize_keeps_leading_dotdot() {
        assert_eq!(
            normalize_lexical(Path::new("../x")),
            PathBuf::from("../x")
        );
    }

    #[test]
    fn dotdot_cannot_escape_root() {
        assert_eq!(
            normalize_lexical(Path::new("/a/../../etc")),
            PathBuf::from("/etc")
        );
    }

    #[test]
    fn containment_after_normalization() {
        let roots = vec![PathBuf::from("/srv/sandbox")];
        assert!(contained_in_roots(
            Path::new("/srv/sandbox/sub/file.txt"),
            &roots
        ));
        assert!(!contained_in_roots(
            Path::new("/srv/sandbox/../outside"),
            &roots
        ));
        assert!(!contained_in_roots(Path::new("/etc/passwd"), &roots));
    }

    #[test]
    fn extracts_unix_paths() {
        let pats = CommandPathPatterns::new();
        let paths = pats.extract("cat /etc/passwd > out && ls /tmp/x");
        assert!(paths.contains(&PathBuf::from("/etc/passwd")));
        assert!(paths.contains(&PathBuf::from("/tmp/x")));
    }

    #[test]
    fn extracts_windows_paths() {
        let pats = CommandPathPatterns::new();
        let paths = pats.extract(r#"type C:\Users\x\secret.txt"#);
        assert_eq!(paths, vec![PathBuf::from(r"C:\Users\x\secret.txt")]);
    }

    #[test]
    fn relative_tokens_are_ignored() {
        let pats = CommandPathPatterns::new();
        assert!(pats.extract("ls -la src/main.rs").is_empty());
    }

    #[test]
    fn sensitive_basenames() {
        assert!(is_sensitive_basename(".env"));
        assert!(is_sensitive_basename("config/.env.local"));
        assert!(is_sensitive_basename("/home/u/credentials.json"));
        assert!(is_sensitive_basename("PASSWORD.txt"));
        assert!(is_sensitive_basename("api_tokens.db"));
        assert!(!is_sensitive_basename("src/main.rs"));
        assert!(!is_sensitive_basename("environment.md"));
    }
}
