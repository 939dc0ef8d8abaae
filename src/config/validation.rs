use super::AppConfig;
use crate::pty_session::{SpawnRequest, WindowSize};
use anyhow::{anyhow, bail, Context, Result};
use serde_json::Value;
use std::collections::BTreeMap;

impl AppConfig {
    /// Check the raw values and turn them into a spawn request for the PTY session.
    pub fn spawn_request(&self) -> Result<SpawnRequest> {
        let shell = self.shell.trim();
        if shell.is_empty() {
            bail!("--shell must not be empty");
        }
        if shell.contains('\0') {
            bail!("--shell contains a NUL byte");
        }
        if self.rows == 0 || self.cols == 0 {
            bail!(
                "--rows and --cols must be at least 1, got {}x{}",
                self.rows,
                self.cols
            );
        }

        let args = parse_shell_args(&self.shell_args)?;
        let extra_env = parse_extra_env(&self.extra_env)?;

        Ok(SpawnRequest {
            shell: shell.to_string(),
            args,
            size: WindowSize::new(self.rows, self.cols),
            extra_env,
        })
    }
}

pub(super) fn parse_shell_args(raw: &str) -> Result<Vec<String>> {
    let args: Vec<String> = serde_json::from_str(raw)
        .with_context(|| format!("--shell-args must be a JSON array of strings, got {raw:?}"))?;
    if let Some(arg) = args.iter().find(|arg| arg.contains('\0')) {
        bail!("shell argument contains a NUL byte: {arg:?}");
    }
    Ok(args)
}

/// String values are used verbatim, other scalars by their JSON text, `null` is skipped.
pub(super) fn parse_extra_env(raw: &str) -> Result<BTreeMap<String, String>> {
    let value: Value = serde_json::from_str(raw)
        .with_context(|| format!("--env must be a JSON object, got {raw:?}"))?;
    let Value::Object(entries) = value else {
        return Err(anyhow!("--env must be a JSON object, got {raw:?}"));
    };

    let mut env = BTreeMap::new();
    for (key, value) in entries {
        if key.is_empty() || key.contains('=') || key.contains('\0') {
            bail!("invalid environment variable name {key:?}");
        }
        let value = match value {
            Value::Null => continue,
            Value::String(text) => text,
            other => other.to_string(),
        };
        if value.contains('\0') {
            bail!("environment variable {key} contains a NUL byte");
        }
        env.insert(key, value);
    }
    Ok(env)
}
