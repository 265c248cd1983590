//! Prompt templates with `{{ name }}` placeholders.
//!
//! Lookup order: `.adw/templates/<name>.md` in the project root, then the
//! built-in phase templates. Rendering is all-or-nothing: every placeholder
//! must have a value or the call fails without returning partial text.

use crate::error::{AdwError, Result};
use crate::paths;
use regex::Regex;
use std::borrow::Cow;
use std::collections::{BTreeSet, HashMap};
use std::path::{Path, PathBuf};
use std::sync::OnceLock;

static PLACEHOLDER_RE: OnceLock<Regex> = OnceLock::new();
static TEMPLATE_NAME_RE: OnceLock<Regex> = OnceLock::new();

fn placeholder_re() -> &'static Regex {
    PLACEHOLDER_RE
        .get_or_init(|| Regex::new(r"\{\{\s*([A-Za-z_][A-Za-z0-9_]*)\s*\}\}").unwrap())
}

fn template_name_re() -> &'static Regex {
    TEMPLATE_NAME_RE.get_or_init(|| Regex::new(r"^[a-z0-9][a-z0-9_-]*$").unwrap())
}

// ---------------------------------------------------------------------------
// Built-in templates
// ---------------------------------------------------------------------------

const PLAN_TEMPLATE: &str = r#"# Plan

You are planning work for run {{ run_id }} on branch `{{ branch }}`.
The checkout is at `{{ working_dir }}`.

## Task

{{ task }}

## Instructions

- Read the relevant code before proposing changes.
- Write a step-by-step implementation plan with the files to touch.
- List the tests that will prove the change works.
- Do not modify any files in this phase.

Finish with a fenced json block: {"plan_summary": "...", "files": [...]}.
"#;

const BUILD_TEMPLATE: &str = r#"# Build

Implement the task for run {{ run_id }} in `{{ working_dir }}` on branch `{{ branch }}`.

## Task

{{ task }}

## Plan from the previous phase

{{ previous_result }}

## Environment

The backend must listen on port {{ backend_port }} and the frontend on port
{{ frontend_port }}. Both are also written to `.ports.env`.

Commit your work when done. Finish with a fenced json block:
{"changed_files": [...], "commit_message": "..."}.
"#;

const TEST_TEMPLATE: &str = r#"# Test

Run the project's test suites in `{{ working_dir }}` for run {{ run_id }}.
Use backend port {{ backend_port }} and frontend port {{ frontend_port }}.

## Task under test

{{ task }}

## Previous phase output

{{ previous_result }}

Fix failing tests caused by this change. Finish with a fenced json block:
{"passed": true|false, "failures": [...]}.
"#;

const REVIEW_TEMPLATE: &str = r#"# Review

Review the changes on branch `{{ branch }}` in `{{ working_dir }}` against the task.

## Task

{{ task }}

## Previous phase output

{{ previous_result }}

Check correctness, missing tests, and anything that does not match the task.
Finish with a fenced json block: {"approved": true|false, "issues": [...]}.
"#;

const DOCUMENT_TEMPLATE: &str = r#"# Document

Update documentation in `{{ working_dir }}` for the change made in run {{ run_id }}.

## Task

{{ task }}

## Previous phase output

{{ previous_result }}

Touch only docs that describe changed behaviour. Finish with a fenced json
block: {"docs_updated": [...]}.
"#;

const SHIP_TEMPLATE: &str = r#"# Ship

Prepare branch `{{ branch }}` in `{{ working_dir }}` for merge.

## Task

{{ task }}

## Previous phase output

{{ previous_result }}

Push the branch and open a pull request describing the change. Finish with a
fenced json block: {"pr_url": "..."}.
"#;

fn builtin(name: &str) -> Option<&'static str> {
    match name {
        "plan" => Some(PLAN_TEMPLATE),
        "build" => Some(BUILD_TEMPLATE),
        "test" => Some(TEST_TEMPLATE),
        "review" => Some(REVIEW_TEMPLATE),
        "document" => Some(DOCUMENT_TEMPLATE),
        "ship" => Some(SHIP_TEMPLATE),
        _ => None,
    }
}

// ---------------------------------------------------------------------------
// PromptComposer
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct PromptComposer {
    root: Option<PathBuf>,
}

impl PromptComposer {
    /// Composer that honours overrides under `<root>/.adw/templates/`.
    pub fn new(root: &Path) -> Self {
        Self {
            root: Some(root.to_path_buf()),
        }
    }

    pub fn builtin_only() -> Self {
        Self { root: None }
    }

    /// Raw template text for `name`.
    pub fn source(&self, name: &str) -> Result<Cow<'static, str>> {
        if !template_name_re().is_match(name) {
            return Err(AdwError::TemplateNotFound(name.to_string()));
        }
        if let Some(root) = &self.root {
            let path = paths::template_path(root, name);
            match std::fs::read_to_string(&path) {
                Ok(text) => {
                    tracing::debug!(template = name, path = %path.display(), "using template override");
                    return Ok(Cow::Owned(text));
                }
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => return Err(e.into()),
            }
        }
        builtin(name)
            .map(Cow::Borrowed)
            .ok_or_else(|| AdwError::TemplateNotFound(name.to_string()))
    }

    /// Placeholder names used by `name`, sorted and deduplicated.
    pub fn required_variables(&self, name: &str) -> Result<Vec<String>> {
        let text = self.source(name)?;
        Ok(placeholders(&text).into_iter().collect())
    }

    pub fn compose(&self, name: &str, vars: &HashMap<String, String>) -> Result<String> {
        let text = self.source(name)?;
        render(name, &text, vars)
    }
}

fn placeholders(text: &str) -> BTreeSet<String> {
    placeholder_re()
        .captures_iter(text)
        .map(|c| c[1].to_string())
        .collect()
}

/// Substitute every placeholder in `text`. Extra variables are ignored.
///
/// Only the template is checked for unresolved placeholders. Values are
/// inserted verbatim and never rescanned, so agent output handed on as
/// `previous_result` reaches the next prompt unchanged even when it contains
/// `{{ ... }}` text of its own.
pub fn render(template: &str, text: &str, vars: &HashMap<String, String>) -> Result<String> {
    let opened = text.matches("{{").count();
    let matched = placeholder_re().find_iter(text).count();
    if opened != matched {
        return Err(AdwError::MalformedTemplate {
            template: template.to_string(),
            reason: format!("{} of {opened} '{{{{' markers are not valid placeholders", opened - matched),
        });
    }

    if let Some(missing) = placeholders(text).into_iter().find(|v| !vars.contains_key(v)) {
        return Err(AdwError::MissingVariable {
            template: template.to_string(),
            variable: missing,
        });
    }

    let rendered = placeholder_re().replace_all(text, |caps: &regex::Captures| {
        vars.get(&caps[1]).cloned().unwrap_or_default()
    });
    Ok(rendered.into_owned())
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn full_vars() -> HashMap<String, String> {
        [
            ("task", "add a login page"),
            ("run_id", "a1b2c3d4"),
            ("phase", "build"),
            ("branch", "adw-a1b2c3d4"),
            ("working_dir", "/tmp/trees/a1b2c3d4"),
            ("backend_port", "9103"),
            ("frontend_port", "9203"),
            ("previous_result", "{\"plan_summary\": \"do it\"}"),
        ]
        .into_iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect()
    }

    #[test]
    fn every_builtin_renders_fully() {
        let composer = PromptComposer::builtin_only();
        for name in ["plan", "build", "test", "review", "document", "ship"] {
            let out = composer.compose(name, &full_vars()).unwrap();
            assert!(!placeholder_re().is_match(&out), "{name} left a placeholder");
            assert!(out.contains("add a login page"));
        }
    }

    #[test]
    fn missing_variable_fails_without_partial_output() {
        let mut vars = full_vars();
        vars.remove("branch");
        let err = PromptComposer::builtin_only()
            .compose("plan", &vars)
            .unwrap_err();
        match err {
            AdwError::MissingVariable { template, variable } => {
                assert_eq!(template, "plan");
                assert_eq!(variable, "branch");
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn whitespace_inside_braces_is_allowed() {
        let vars = HashMap::from([("x".to_string(), "1".to_string())]);
        assert_eq!(render("t", "{{x}} {{ x }} {{   x\t}}", &vars).unwrap(), "1 1 1");
    }

    #[test]
    fn values_are_inserted_verbatim() {
        let vars = HashMap::from([
            ("a".to_string(), "{{ b }}".to_string()),
            ("b".to_string(), "nope".to_string()),
        ]);
        assert_eq!(render("t", "[{{ a }}]", &vars).unwrap(), "[{{ b }}]");

        // A value with its own markers does not leave template placeholders behind.
        let mut vars = full_vars();
        vars.insert("previous_result".into(), "see {{ ticket }} and {{".into());
        let out = PromptComposer::builtin_only().compose("build", &vars).unwrap();
        assert!(out.contains("see {{ ticket }} and {{"));
        assert!(!out.contains("{{ previous_result }}"));
        assert!(!out.contains("{{ task }}"));
    }

    #[test]
    fn malformed_marker_is_rejected() {
        let err = render("t", "hello {{ 1bad }}", &HashMap::new()).unwrap_err();
        assert!(matches!(err, AdwError::MalformedTemplate { .. }));
    }

    #[test]
    fn unknown_template_is_not_found() {
        let composer = PromptComposer::builtin_only();
        assert!(matches!(
            composer.compose("deploy", &full_vars()),
            Err(AdwError::TemplateNotFound(_))
        ));
        assert!(matches!(
            composer.source("../etc/passwd"),
            Err(AdwError::TemplateNotFound(_))
        ));
    }

    #[test]
    fn override_file_wins() {
        let dir = TempDir::new().unwrap();
        let tdir = paths::templates_dir(dir.path());
        std::fs::create_dir_all(&tdir).unwrap();
        std::fs::write(tdir.join("plan.md"), "echo hello").unwrap();

        let composer = PromptComposer::new(dir.path());
        assert_eq!(composer.compose("plan", &HashMap::new()).unwrap(), "echo hello");
        assert!(composer.required_variables("plan").unwrap().is_empty());
        // other phases still fall back to built-ins
        assert!(composer
            .required_variables("build")
            .unwrap()
            .contains(&"backend_port".to_string()));
    }

    #[test]
    fn required_variables_sorted_unique() {
        let vars = PromptComposer::builtin_only()
            .required_variables("review")
            .unwrap();
        assert_eq!(vars, vec!["branch", "previous_result", "task", "working_dir"]);
    }
}
