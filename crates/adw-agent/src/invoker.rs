use std::path::{Path, PathBuf};
use std::time::Duration;

use adw_core::config::{AgentConfig, InputFormat};
use adw_core::paths;
use adw_core::types::Model;
use serde::Serialize;
use tokio::process::Command;

use crate::process::run_streaming;
use crate::transcript::{parse_lines, TranscriptParse};
use crate::{AgentError, Result};

// ─── Request / response ───────────────────────────────────────────────────

#[derive(Debug, Clone)]
pub struct InvocationRequest {
    pub prompt: String,
    pub model: Model,
    pub working_dir: PathBuf,
    pub timeout: Duration,
    /// Directory receiving `raw_output.jsonl`, `result.json` and `summary.json`.
    pub output_dir: PathBuf,
    pub attempt: u32,
    /// Extra variables set on top of the allow-listed environment.
    pub env: Vec<(String, String)>,
}

/// One completed agent call. Immutable once returned.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AgentInvocation {
    pub prompt: String,
    pub model: Model,
    pub output_dir: PathBuf,
    pub raw_path: PathBuf,
    pub line_count: usize,
    pub result: serde_json::Value,
    pub summary: serde_json::Value,
    pub session_id: Option<String>,
    pub attempt: u32,
}

impl AgentInvocation {
    /// Text handed to the next phase as `previous_result`.
    pub fn handoff_text(&self) -> String {
        match self.result.get("result") {
            Some(serde_json::Value::String(s)) => s.clone(),
            _ => self.summary.to_string(),
        }
    }
}

// ─── AgentInvoker ─────────────────────────────────────────────────────────

/// Something that can run one prompt through a coding agent.
#[allow(async_fn_in_trait)]
pub trait AgentInvoker {
    async fn invoke(&self, request: &InvocationRequest) -> Result<AgentInvocation>;

    /// The command line `invoke` would run, for dry-run output.
    fn command_line(&self, model: Model) -> Vec<String>;
}

// ─── ClaudeCli ────────────────────────────────────────────────────────────

/// [`AgentInvoker`] that runs the `claude` CLI in print mode.
#[derive(Debug, Clone)]
pub struct ClaudeCli {
    config: AgentConfig,
}

impl ClaudeCli {
    pub fn new(config: AgentConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &AgentConfig {
        &self.config
    }

    /// Locate the configured executable on `PATH` (or as a path).
    pub fn resolve_executable(&self) -> Result<PathBuf> {
        which::which(&self.config.executable)
            .map_err(|e| AgentError::Unavailable(format!("{}: {e}", self.config.executable)))
    }

    pub fn args(&self, model: Model) -> Vec<String> {
        let mut args: Vec<String> = [
            "--print",
            "--output-format",
            "stream-json",
            "--verbose",
            "--model",
            model.as_str(),
        ]
        .iter()
        .map(|s| s.to_string())
        .collect();

        if self.config.input_format == InputFormat::StreamJson {
            args.push("--input-format".to_string());
            args.push("stream-json".to_string());
        }
        match self.config.permission_mode.as_deref() {
            Some("bypassPermissions") => args.push("--dangerously-skip-permissions".to_string()),
            Some(mode) if !mode.is_empty() => {
                args.push("--permission-mode".to_string());
                args.push(mode.to_string());
            }
            _ => {}
        }
        args.extend(self.config.extra_args.iter().cloned());
        args
    }

    fn stdin_payload(&self, prompt: &str) -> Vec<u8> {
        match self.config.input_format {
            InputFormat::Text => prompt.as_bytes().to_vec(),
            InputFormat::StreamJson => {
                let msg = serde_json::json!({
                    "type": "user",
                    "message": {
                        "role": "user",
                        "content": [{"type": "text", "text": prompt}]
                    }
                });
                let mut buf = msg.to_string().into_bytes();
                buf.push(b'\n');
                buf
            }
        }
    }

    /// The subprocess environment: allow-listed caller variables,
    /// `GITHUB_PAT` as `GH_TOKEN`, then the request's extras.
    pub fn environment(&self, extra: &[(String, String)]) -> Vec<(String, String)> {
        build_environment(&self.config.env_allowlist, |k| std::env::var(k).ok(), extra)
    }
}

fn build_environment(
    allowlist: &[String],
    lookup: impl Fn(&str) -> Option<String>,
    extra: &[(String, String)],
) -> Vec<(String, String)> {
    let mut env: Vec<(String, String)> = allowlist
        .iter()
        .filter_map(|k| lookup(k).map(|v| (k.clone(), v)))
        .collect();
    if !env.iter().any(|(k, _)| k == "GH_TOKEN") {
        if let Some(pat) = lookup("GITHUB_PAT") {
            env.push(("GH_TOKEN".to_string(), pat));
        }
    }
    env.extend(extra.iter().cloned());
    env
}

impl AgentInvoker for ClaudeCli {
    async fn invoke(&self, request: &InvocationRequest) -> Result<AgentInvocation> {
        let exe = self.resolve_executable()?;
        adw_core::io::ensure_dir(&request.output_dir)?;
        let raw_path = request.output_dir.join(paths::RAW_OUTPUT_FILE);

        let mut cmd = Command::new(&exe);
        cmd.args(self.args(request.model))
            .current_dir(&request.working_dir)
            .env_clear()
            .envs(self.environment(&request.env));

        tracing::info!(
            exe = %exe.display(),
            model = %request.model,
            attempt = request.attempt,
            cwd = %request.working_dir.display(),
            "invoking agent"
        );
        let output = run_streaming(
            cmd,
            self.stdin_payload(&request.prompt),
            &raw_path,
            request.timeout,
        )
        .await?;

        finish(
            request,
            raw_path,
            output.status.code(),
            output.status.success(),
            &output.lines,
            output.stderr,
        )
    }

    fn command_line(&self, model: Model) -> Vec<String> {
        let mut line = vec![self.config.executable.clone()];
        line.extend(self.args(model));
        line
    }
}

/// Turn a finished process into an invocation record or a typed error, and
/// write `result.json` / `summary.json` on success.
fn finish(
    request: &InvocationRequest,
    raw_path: PathBuf,
    code: Option<i32>,
    success: bool,
    lines: &[String],
    stderr: String,
) -> Result<AgentInvocation> {
    let parsed = parse_lines(lines);

    if !success {
        // The CLI often reports API errors in the final result message rather
        // than on stderr.
        let detail = match (&parsed, stderr.trim().is_empty()) {
            (TranscriptParse::Success(out), true) => out
                .result_message()
                .map(|m| m.error_message())
                .unwrap_or_default(),
            _ => stderr,
        };
        return Err(AgentError::Process {
            code,
            stderr: detail,
            raw_path,
        });
    }

    let out = match parsed {
        TranscriptParse::Success(out) => out,
        TranscriptParse::Malformed { raw_tail } => {
            return Err(AgentError::OutputMalformed { raw_tail, raw_path })
        }
    };
    if let Some(msg) = out.result_message().filter(|m| m.is_error()) {
        return Err(AgentError::Reported {
            message: msg.error_message(),
            raw_path,
        });
    }

    write_records(&request.output_dir, &out.result, &out.summary)?;
    tracing::info!(
        lines = out.line_count,
        session_id = out.session_id.as_deref().unwrap_or(""),
        output_dir = %request.output_dir.display(),
        "agent finished"
    );

    Ok(AgentInvocation {
        prompt: request.prompt.clone(),
        model: request.model,
        output_dir: request.output_dir.clone(),
        raw_path,
        line_count: out.line_count,
        result: out.result,
        summary: out.summary,
        session_id: out.session_id,
        attempt: request.attempt,
    })
}

pub fn write_records(
    output_dir: &Path,
    result: &serde_json::Value,
    summary: &serde_json::Value,
) -> Result<()> {
    adw_core::io::write_json(&output_dir.join(paths::RESULT_FILE), result)?;
    adw_core::io::write_json(&output_dir.join(paths::SUMMARY_FILE), summary)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::os::unix::fs::PermissionsExt;
    use tempfile::TempDir;

    /// Write an executable shell script standing in for the agent CLI.
    fn fake_agent(dir: &Path, body: &str) -> PathBuf {
        let path = dir.join("fake-claude");
        std::fs::write(&path, format!("#!/bin/sh\n{body}\n")).unwrap();
        std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();
        path
    }

    fn cli(exe: &Path) -> ClaudeCli {
        ClaudeCli::new(AgentConfig {
            executable: exe.to_string_lossy().into_owned(),
            ..AgentConfig::default()
        })
    }

    fn request(dir: &Path) -> InvocationRequest {
        InvocationRequest {
            prompt: "echo hello".to_string(),
            model: Model::Sonnet,
            working_dir: dir.to_path_buf(),
            timeout: Duration::from_secs(10),
            output_dir: dir.join("out/plan/attempt-1"),
            attempt: 1,
            env: vec![("ADW_RUN_ID".to_string(), "a1b2c3d4".to_string())],
        }
    }

    #[test]
    fn args_include_model_and_permissions() {
        let args = ClaudeCli::new(AgentConfig::default()).args(Model::Opus);
        assert_eq!(
            args,
            vec![
                "--print",
                "--output-format",
                "stream-json",
                "--verbose",
                "--model",
                "opus",
                "--dangerously-skip-permissions"
            ]
        );

        let cfg = AgentConfig {
            input_format: InputFormat::StreamJson,
            permission_mode: Some("acceptEdits".into()),
            extra_args: vec!["--max-turns".into(), "20".into()],
            ..AgentConfig::default()
        };
        let args = ClaudeCli::new(cfg).args(Model::Sonnet);
        assert!(args.windows(2).any(|w| w == ["--input-format", "stream-json"]));
        assert!(args.windows(2).any(|w| w == ["--permission-mode", "acceptEdits"]));
        assert!(args.ends_with(&["--max-turns".to_string(), "20".to_string()]));
    }

    #[test]
    fn environment_is_allow_listed() {
        let allow = vec!["PATH".to_string(), "HOME".to_string()];
        let lookup = |k: &str| match k {
            "PATH" => Some("/usr/bin".to_string()),
            "SECRET" => Some("nope".to_string()),
            "GITHUB_PAT" => Some("ghp_x".to_string()),
            _ => None,
        };
        let env = build_environment(&allow, lookup, &[("BACKEND_PORT".into(), "9100".into())]);
        assert_eq!(
            env,
            vec![
                ("PATH".to_string(), "/usr/bin".to_string()),
                ("GH_TOKEN".to_string(), "ghp_x".to_string()),
                ("BACKEND_PORT".to_string(), "9100".to_string()),
            ]
        );
    }

    #[test]
    fn stream_json_stdin_is_one_user_message() {
        let cli = ClaudeCli::new(AgentConfig {
            input_format: InputFormat::StreamJson,
            ..AgentConfig::default()
        });
        let payload = String::from_utf8(cli.stdin_payload("do it")).unwrap();
        let value: serde_json::Value = serde_json::from_str(payload.trim()).unwrap();
        assert_eq!(value["type"], "user");
        assert_eq!(value["message"]["content"][0]["text"], "do it");
    }

    #[tokio::test]
    async fn invoke_writes_records() {
        let dir = TempDir::new().unwrap();
        let exe = fake_agent(
            dir.path(),
            r#"read -r prompt
echo '{"type":"system","subtype":"init","session_id":"sess-1"}'
echo "diagnostic noise"
printf '{"type":"result","subtype":"success","session_id":"sess-1","result":"%s","is_error":false,"num_turns":1}\n' "$prompt"
echo "run=$ADW_RUN_ID" >&2"#,
        );
        let req = request(dir.path());
        let inv = cli(&exe).invoke(&req).await.unwrap();

        assert_eq!(inv.result["result"], "echo hello");
        assert_eq!(inv.session_id.as_deref(), Some("sess-1"));
        assert_eq!(inv.line_count, 3);
        assert_eq!(inv.handoff_text(), "echo hello");
        assert!(req.output_dir.join(paths::RAW_OUTPUT_FILE).exists());
        let stored: serde_json::Value = serde_json::from_str(
            &std::fs::read_to_string(req.output_dir.join(paths::RESULT_FILE)).unwrap(),
        )
        .unwrap();
        assert_eq!(stored, inv.result);
        assert!(req.output_dir.join(paths::SUMMARY_FILE).exists());
    }

    #[tokio::test]
    async fn invoke_without_json_is_malformed() {
        let dir = TempDir::new().unwrap();
        let exe = fake_agent(dir.path(), "cat >/dev/null; echo 'no json here'");
        let err = cli(&exe).invoke(&request(dir.path())).await.unwrap_err();
        match err {
            AgentError::OutputMalformed { raw_tail, .. } => assert_eq!(raw_tail, "no json here"),
            other => panic!("unexpected: {other:?}"),
        }
    }

    #[tokio::test]
    async fn non_zero_exit_uses_result_error_when_stderr_empty() {
        let dir = TempDir::new().unwrap();
        let exe = fake_agent(
            dir.path(),
            r#"cat >/dev/null
echo '{"type":"result","subtype":"success","is_error":true,"result":"API Error: 529 Overloaded"}'
exit 1"#,
        );
        let err = cli(&exe).invoke(&request(dir.path())).await.unwrap_err();
        assert!(matches!(err, AgentError::Process { code: Some(1), .. }));
        assert!(adw_core::retry::Classify::classify(&err).is_transient());
    }

    #[tokio::test]
    async fn error_result_with_zero_exit_is_reported() {
        let dir = TempDir::new().unwrap();
        let exe = fake_agent(
            dir.path(),
            r#"cat >/dev/null
echo '{"type":"result","subtype":"error_max_turns","is_error":true,"errors":["Reached maximum turn limit"]}'"#,
        );
        let err = cli(&exe).invoke(&request(dir.path())).await.unwrap_err();
        assert!(matches!(err, AgentError::Reported { .. }));
        assert!(!req_output_written(dir.path()));
    }

    fn req_output_written(dir: &Path) -> bool {
        dir.join("out/plan/attempt-1").join(paths::RESULT_FILE).exists()
    }

    #[tokio::test]
    async fn missing_executable_is_unavailable() {
        let dir = TempDir::new().unwrap();
        let err = cli(&dir.path().join("does-not-exist"))
            .invoke(&request(dir.path()))
            .await
            .unwrap_err();
        assert!(matches!(err, AgentError::Unavailable(_)));
    }
}
