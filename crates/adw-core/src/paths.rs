use crate::error::{AdwError, Result};
use regex::Regex;
use std::path::{Path, PathBuf};
use std::sync::OnceLock;

// ---------------------------------------------------------------------------
// Directory constants
// ---------------------------------------------------------------------------

pub const ADW_DIR: &str = ".adw";
pub const RUNS_DIR: &str = ".adw/runs";
pub const PORTS_DIR: &str = ".adw/ports";
pub const TEMPLATES_DIR: &str = ".adw/templates";

pub const CONFIG_FILE: &str = ".adw/config.yaml";
pub const STATE_FILE: &str = "state.json";

pub const RAW_OUTPUT_FILE: &str = "raw_output.jsonl";
pub const RESULT_FILE: &str = "result.json";
pub const SUMMARY_FILE: &str = "summary.json";
pub const PORTS_ENV_FILE: &str = ".ports.env";

// ---------------------------------------------------------------------------
// Path helpers
// ---------------------------------------------------------------------------

pub fn adw_dir(root: &Path) -> PathBuf {
    root.join(ADW_DIR)
}

pub fn config_path(root: &Path) -> PathBuf {
    root.join(CONFIG_FILE)
}

pub fn runs_dir(root: &Path) -> PathBuf {
    root.join(RUNS_DIR)
}

pub fn run_dir(root: &Path, run_id: &str) -> PathBuf {
    runs_dir(root).join(run_id)
}

pub fn state_path(root: &Path, run_id: &str) -> PathBuf {
    run_dir(root, run_id).join(STATE_FILE)
}

/// `.adw/runs/<run_id>/<phase>/attempt-<n>/`: one directory per agent call.
pub fn invocation_dir(root: &Path, run_id: &str, phase: &str, attempt: u32) -> PathBuf {
    run_dir(root, run_id)
        .join(phase)
        .join(format!("attempt-{attempt}"))
}

pub fn ports_dir(root: &Path) -> PathBuf {
    root.join(PORTS_DIR)
}

pub fn slot_marker(root: &Path, slot: u16) -> PathBuf {
    ports_dir(root).join(format!("slot-{slot}.lock"))
}

pub fn templates_dir(root: &Path) -> PathBuf {
    root.join(TEMPLATES_DIR)
}

pub fn template_path(root: &Path, name: &str) -> PathBuf {
    templates_dir(root).join(format!("{name}.md"))
}

// ---------------------------------------------------------------------------
// Run id validation
// ---------------------------------------------------------------------------

static RUN_ID_RE: OnceLock<Regex> = OnceLock::new();

fn run_id_re() -> &'static Regex {
    RUN_ID_RE.get_or_init(|| Regex::new(r"^[0-9a-f]{4,32}$").unwrap())
}

/// Run ids end up in paths and branch names, so only short hex tokens pass.
pub fn validate_run_id(run_id: &str) -> Result<()> {
    if !run_id_re().is_match(run_id) {
        return Err(AdwError::InvalidRunId(run_id.to_string()));
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
    fn valid_run_ids() {
        for id in ["a1b2c3d4", "0000", "deadbeefdeadbeef"] {
            validate_run_id(id).unwrap_or_else(|_| panic!("expected valid: {id}"));
        }
    }

    #[test]
    fn invalid_run_ids() {
        for id in ["", "abc", "../etc", "A1B2C3D4", "a1b2 c3d4", "zzzzzzzz"] {
            assert!(validate_run_id(id).is_err(), "expected invalid: {id}");
        }
    }

    #[test]
    fn path_helpers() {
        let root = Path::new("/tmp/proj");
        assert_eq!(
            config_path(root),
            PathBuf::from("/tmp/proj/.adw/config.yaml")
        );
        assert_eq!(
            state_path(root, "a1b2c3d4"),
            PathBuf::from("/tmp/proj/.adw/runs/a1b2c3d4/state.json")
        );
        assert_eq!(
            invocation_dir(root, "a1b2c3d4", "plan", 2),
            PathBuf::from("/tmp/proj/.adw/runs/a1b2c3d4/plan/attempt-2")
        );
        assert_eq!(
            slot_marker(root, 3),
            PathBuf::from("/tmp/proj/.adw/ports/slot-3.lock")
        );
    }
}
