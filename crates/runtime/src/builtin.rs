//! Builtin abilities shipped with the runtime.

use async_trait::async_trait;
use serde_json::Value;
use tokio::io::AsyncWriteExt;

use cerise_domain::ability::{
    Ability, AbilityCategory, AbilityContext, AbilityResult, AbilityType,
};

/// Default per-call execution timeout.
const DEFAULT_TIMEOUT_SECS: u64 = 10;
/// Output cap per stream.
const MAX_OUTPUT_CHARS: usize = 10_000;

/// Run a short script through a configured interpreter with a timeout.
///
/// Gated behind the `execute_code` permission; the subprocess inherits
/// nothing but the code on stdin.
pub struct ScriptRunnerAbility {
    interpreter: String,
    timeout_secs: u64,
}

impl ScriptRunnerAbility {
    pub fn new(interpreter: impl Into<String>) -> Self {
        Self {
            interpreter: interpreter.into(),
            timeout_secs: DEFAULT_TIMEOUT_SECS,
        }
    }

    pub fn with_timeout_secs(mut self, timeout_secs: u64) -> Self {
        self.timeout_secs = timeout_secs.max(1);
        self
    }
}

#[async_trait]
impl Ability for ScriptRunnerAbility {
    fn name(&self) -> &str {
        "script_runner"
    }

    fn display_name(&self) -> &str {
        "Script Runner"
    }

    fn description(&self) -> String {
        format!(
            "Execute a short {} script and return its stdout. Use for calculations and text transforms.",
            self.interpreter
        )
    }

    fn ability_type(&self) -> AbilityType {
        AbilityType::Builtin
    }

    fn category(&self) -> AbilityCategory {
        AbilityCategory::System
    }

    fn parameters_schema(&self) -> Value {
        serde_json::json!({
            "type": "object",
            "properties": {
                "code": { "type": "string", "description": "Script source to execute." },
                "timeout": { "type": "integer", "description": "Timeout in seconds.", "minimum": 1 }
            },
            "required": ["code"],
        })
    }

    fn required_permissions(&self) -> Vec<String> {
        vec!["execute_code".into()]
    }

    async fn validate_params(&self, params: &Value) -> bool {
        params
            .get("code")
            .and_then(Value::as_str)
            .map(|code| !code.trim().is_empty())
            .unwrap_or(false)
    }

    async fn execute(&self, params: Value, _context: &AbilityContext) -> AbilityResult {
        let code = params.get("code").and_then(Value::as_str).unwrap_or("");
        let timeout_secs = params
            .get("timeout")
            .and_then(Value::as_u64)
            .unwrap_or(self.timeout_secs);

        let mut child = match tokio::process::Command::new(&self.interpreter)
            .arg("-")
            .stdin(std::process::Stdio::piped())
            .stdout(std::process::Stdio::piped())
            .stderr(std::process::Stdio::piped())
            .kill_on_drop(true)
            .spawn()
        {
            Ok(child) => child,
            Err(e) => {
                return AbilityResult::err(format!(
                    "failed to start {}: {e}",
                    self.interpreter
                ))
            }
        };

        if let Some(mut stdin) = child.stdin.take() {
            if let Err(e) = stdin.write_all(code.as_bytes()).await {
                return AbilityResult::err(format!("failed to write script: {e}"));
            }
            drop(stdin);
        }

        let waited = tokio::time::timeout(
            std::time::Duration::from_secs(timeout_secs),
            child.wait_with_output(),
        )
        .await;

        match waited {
            Ok(Ok(output)) => {
                let stdout = truncate(&String::from_utf8_lossy(&output.stdout));
                let stderr = truncate(&String::from_utf8_lossy(&output.stderr));
                if output.status.success() {
                    AbilityResult::ok(serde_json::json!({
                        "stdout": stdout,
                        "stderr": stderr,
                    }))
                } else {
                    AbilityResult::err(format!(
                        "script exited with {}: {}",
                        output.status.code().unwrap_or(-1),
                        if stderr.is_empty() { stdout } else { stderr }
                    ))
                }
            }
            Ok(Err(e)) => AbilityResult::err(format!("script execution failed: {e}")),
            Err(_) => AbilityResult::err(format!(
                "script timed out after {timeout_secs} seconds"
            )),
        }
    }
}

fn truncate(text: &str) -> String {
    if text.chars().count() <= MAX_OUTPUT_CHARS {
        return text.to_string();
    }
    let kept: String = text.chars().take(MAX_OUTPUT_CHARS).collect();
    format!("{kept}\n...[truncated]")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn context_with_permission() -> AbilityContext {
        AbilityContext::new("u1", "s1").with_permissions(vec!["execute_code".into()])
    }

    #[tokio::test]
    async fn runs_a_script_and_captures_stdout() {
        let ability = ScriptRunnerAbility::new("sh");
        let result = ability
            .execute(
                serde_json::json!({ "code": "echo hello" }),
                &context_with_permission(),
            )
            .await;
        assert!(result.success, "error: {:?}", result.error);
        assert_eq!(result.data.unwrap()["stdout"].as_str().unwrap().trim(), "hello");
    }

    #[tokio::test]
    async fn nonzero_exit_is_failure() {
        let ability = ScriptRunnerAbility::new("sh");
        let result = ability
            .execute(
                serde_json::json!({ "code": "echo boom >&2; exit 3" }),
                &context_with_permission(),
            )
            .await;
        assert!(!result.success);
        assert!(result.error.unwrap().contains("boom"));
    }

    #[tokio::test]
    async fn timeout_is_reported() {
        let ability = ScriptRunnerAbility::new("sh");
        let result = ability
            .execute(
                serde_json::json!({ "code": "sleep 5", "timeout": 1 }),
                &context_with_permission(),
            )
            .await;
        assert!(!result.success);
        assert!(result.error.unwrap().contains("timed out"));
    }

    #[tokio::test]
    async fn empty_code_fails_validation() {
        let ability = ScriptRunnerAbility::new("sh");
        assert!(!ability.validate_params(&serde_json::json!({ "code": " " })).await);
        assert!(!ability.validate_params(&serde_json::json!({})).await);
    }
}
