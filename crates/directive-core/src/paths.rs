use crate::error::{DirectiveError, Result};
use regex::Regex;
use std::path::{Path, PathBuf};
use std::sync::OnceLock;

// ---------------------------------------------------------------------------
// Directory constants
// ---------------------------------------------------------------------------

pub const DIRECTIVE_DIR: &str = ".directive";
pub const CONFIG_FILE: &str = ".directive/config.yaml";

pub const DEFAULT_RULE_STORE: &str = "rules.db";
pub const DEFAULT_PROJECT_STORE: &str = "project.db";
pub const DEFAULT_PREFERENCE_STORE: &str = "preferences.redb";
pub const DEFAULT_EXTENSION_STORE: &str = "extensions.db";

// ---------------------------------------------------------------------------
// Path helpers
// ---------------------------------------------------------------------------

pub fn directive_dir(root: &Path) -> PathBuf {
    root.join(DIRECTIVE_DIR)
}

pub fn config_path(root: &Path) -> PathBuf {
    root.join(CONFIG_FILE)
}

/// Resolve a store file name from the config relative to `.directive/`.
pub fn store_path(root: &Path, file_name: &str) -> PathBuf {
    directive_dir(root).join(file_name)
}

// ---------------------------------------------------------------------------
// Identifier validation
// ---------------------------------------------------------------------------

static ID_RE: OnceLock<Regex> = OnceLock::new();
static BRANCH_RE: OnceLock<Regex> = OnceLock::new();

fn id_re() -> &'static Regex {
    ID_RE.get_or_init(|| Regex::new(r"^[a-z0-9][a-z0-9_\-]*$").unwrap())
}

fn branch_re() -> &'static Regex {
    BRANCH_RE.get_or_init(|| Regex::new(r"^[A-Za-z0-9][A-Za-z0-9._/\-]*$").unwrap())
}

/// Rule, action and extension identifiers: lowercase, digits, `_` and `-`.
pub fn validate_id(id: &str) -> Result<()> {
    if id.len() > 96 || !id_re().is_match(id) {
        return Err(DirectiveError::invalid("identifier", id));
    }
    Ok(())
}

pub fn validate_branch(branch: &str) -> Result<()> {
    if branch.len() > 128 || !branch_re().is_match(branch) {
        return Err(DirectiveError::invalid("branch name", branch));
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn valid_ids() {
        for id in ["project_init", "a", "task-create-2", "x1"] {
            validate_id(id).unwrap_or_else(|_| panic!("expected valid: {id}"));
        }
    }

    #[test]
    fn invalid_ids() {
        for id in ["", "@entry", "-dash", "has space", "UPPER", "dot.ted"] {
            assert!(validate_id(id).is_err(), "expected invalid: {id}");
        }
    }

    #[test]
    fn branches() {
        validate_branch("main").unwrap();
        validate_branch("alice/feature-1.2").unwrap();
        assert!(validate_branch("").is_err());
        assert!(validate_branch("/abs").is_err());
    }

    #[test]
    fn path_helpers() {
        let root = Path::new("/tmp/proj");
        assert_eq!(
            config_path(root),
            PathBuf::from("/tmp/proj/.directive/config.yaml")
        );
        assert_eq!(
            store_path(root, DEFAULT_RULE_STORE),
            PathBuf::from("/tmp/proj/.directive/rules.db")
        );
    }
}
