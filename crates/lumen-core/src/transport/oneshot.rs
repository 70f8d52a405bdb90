use std::collections::HashMap;
use std::path::Path;
use std::process::ExitStatus;

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tracing::{debug, warn};

use super::{log_stderr, spawn_handler};
use crate::plugin::{PluginInput, PluginResponse};
use crate::{Error, Result};

/// Everything a one-shot handler printed
#[derive(Debug)]
pub struct OneShotOutput {
    /// Last actionable line
    pub primary: PluginResponse,
    /// `index` and `status` lines, in output order
    pub side: Vec<PluginResponse>,
}

/// Spawn the handler, write one request, and collect stdout until it exits.
///
/// Dropping the returned future kills the process.
///
/// # Errors
///
/// Returns `Error::Process` if spawning fails, `Error::Transport` if the pipes
/// fail or the process exits non-zero without output, and `Error::Protocol` if
/// no line decodes into a response.
pub(crate) async fn run_oneshot(
    plugin_id: &str,
    command: &[String],
    working_dir: &Path,
    input: &PluginInput,
) -> Result<OneShotOutput> {
    let mut child = spawn_handler(plugin_id, command, working_dir, &HashMap::new())?;

    let mut stdin = child
        .stdin
        .take()
        .ok_or_else(|| Error::Process("Failed to get stdin handle".to_string()))?;
    let mut stdout = child
        .stdout
        .take()
        .ok_or_else(|| Error::Process("Failed to get stdout handle".to_string()))?;
    if let Some(stderr) = child.stderr.take() {
        log_stderr(plugin_id, stderr);
    }

    let json = serde_json::to_string(input)? + "\n";
    debug!("[{}] Sending: {}", plugin_id, json.trim());

    // A handler may exit without reading its input; that is not an error by itself
    if let Err(e) = stdin.write_all(json.as_bytes()).await {
        debug!("[{}] stdin write failed: {}", plugin_id, e);
    }
    drop(stdin);

    let mut output = String::new();
    stdout
        .read_to_string(&mut output)
        .await
        .map_err(|e| Error::Transport(format!("[{plugin_id}] reading stdout: {e}")))?;

    let status = child
        .wait()
        .await
        .map_err(|e| Error::Transport(format!("[{plugin_id}] waiting for exit: {e}")))?;

    parse_output(plugin_id, &output, status)
}

/// Decode collected stdout. The last actionable line wins; `index` and
/// `status` lines are kept as side outputs.
pub(crate) fn parse_output(
    plugin_id: &str,
    output: &str,
    status: ExitStatus,
) -> Result<OneShotOutput> {
    let mut primary = None;
    let mut side = Vec::new();
    let mut last_error = None;

    for line in output.lines().map(str::trim).filter(|l| !l.is_empty()) {
        match PluginResponse::parse(line) {
            Ok(response) if response.is_actionable() => primary = Some(response),
            Ok(response) => side.push(response),
            Err(e) => {
                warn!("[{}] Skipping output line: {} - Raw: {}", plugin_id, e, line);
                last_error = Some(e);
            }
        }
    }

    if let Some(primary) = primary {
        if !status.success() {
            warn!("[{}] handler exited with {}", plugin_id, status);
        }
        return Ok(OneShotOutput { primary, side });
    }

    if !side.is_empty() {
        return Ok(OneShotOutput {
            primary: PluginResponse::Noop,
            side,
        });
    }

    if let Some(err) = last_error {
        return Err(err);
    }

    if status.success() {
        Err(Error::Protocol(format!("[{plugin_id}] handler produced no output")))
    } else {
        Err(Error::Transport(format!(
            "[{plugin_id}] handler exited with {status} and no output"
        )))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::os::unix::process::ExitStatusExt;

    fn ok() -> ExitStatus {
        ExitStatus::from_raw(0)
    }

    fn failed() -> ExitStatus {
        // Raw wait status: exit code 1
        ExitStatus::from_raw(1 << 8)
    }

    #[test]
    fn last_actionable_line_wins() {
        let output = concat!(
            r#"{"type":"results","results":[{"id":"a","name":"A"}]}"#,
            "\n",
            r#"{"type":"index","items":[{"id":"x","name":"X"}]}"#,
            "\n",
            r#"{"type":"results","results":[{"id":"b","name":"B"}]}"#,
            "\n",
        );
        let parsed = parse_output("t", output, ok()).unwrap();
        let PluginResponse::Results(results) = parsed.primary else {
            panic!("Expected Results");
        };
        assert_eq!(results.results[0].id, "b");
        assert_eq!(parsed.side.len(), 1);
    }

    #[test]
    fn garbage_lines_are_skipped() {
        let output = "loading...\n{\"type\":\"noop\"}\n";
        let parsed = parse_output("t", output, ok()).unwrap();
        assert_eq!(parsed.primary, PluginResponse::Noop);
    }

    #[test]
    fn index_only_output_is_noop_primary() {
        let output = r#"{"type":"index","mode":"full","items":[]}"#;
        let parsed = parse_output("t", output, ok()).unwrap();
        assert_eq!(parsed.primary, PluginResponse::Noop);
        assert_eq!(parsed.side.len(), 1);
    }

    #[test]
    fn empty_output_is_protocol_error() {
        let err = parse_output("t", "\n  \n", ok()).unwrap_err();
        assert!(matches!(err, Error::Protocol(_)));
    }

    #[test]
    fn empty_output_with_failure_is_transport_error() {
        let err = parse_output("t", "", failed()).unwrap_err();
        assert!(matches!(err, Error::Transport(_)));
    }

    #[test]
    fn unparseable_output_is_protocol_error() {
        let err = parse_output("t", "{\"type\":\"bogus\"}", ok()).unwrap_err();
        assert!(matches!(err, Error::Protocol(msg) if msg.contains("bogus")));
    }
}
