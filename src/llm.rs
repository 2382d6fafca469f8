//! Grammar correction and summarization through an external CLI.
//!
//! The prompt goes to the command's stdin and the answer is read from its
//! stdout. Calls that exceed the budget are killed and reaped.

use std::process::Stdio;
use std::time::Duration;

use chrono::Utc;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::process::Command;

use crate::error::{AppError, AppResult};
use crate::recording::Summary;

/// How far a correction may stray from the original wording.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CorrectionMode {
    /// Fix grammar and spelling only
    #[default]
    Grammar,
    /// Rewrite so it reads naturally
    Fluent,
}

impl CorrectionMode {
    /// Unknown or missing modes fall back to grammar.
    pub fn parse(mode: Option<&str>) -> Self {
        match mode.map(str::trim) {
            Some(m) if m.eq_ignore_ascii_case("fluent") => Self::Fluent,
            _ => Self::Grammar,
        }
    }
}

pub struct LlmClient {
    command: String,
    timeout: Duration,
}

impl LlmClient {
    pub fn new(command: impl Into<String>, timeout: Duration) -> Self {
        Self {
            command: command.into(),
            timeout,
        }
    }

    /// Run the command once with `prompt` on stdin and return trimmed stdout.
    pub async fn complete(&self, prompt: &str) -> AppResult<String> {
        let mut child = Command::new("sh")
            .arg("-c")
            .arg(&self.command)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| AppError::Llm(format!("failed to start `{}`: {}", self.command, e)))?;

        if let Some(mut stdin) = child.stdin.take() {
            match stdin.write_all(prompt.as_bytes()).await {
                Ok(()) => {}
                // The command may exit without reading its input.
                Err(e) if e.kind() == std::io::ErrorKind::BrokenPipe => {}
                Err(e) => return Err(AppError::Llm(format!("failed to write prompt: {}", e))),
            }
            // Closing stdin tells the command the prompt is complete.
            drop(stdin);
        }

        let mut stdout = child.stdout.take();
        let mut stderr = child.stderr.take();
        let run = async {
            let mut out = Vec::new();
            let mut err = Vec::new();
            let read_out = async {
                match stdout.as_mut() {
                    Some(pipe) => pipe.read_to_end(&mut out).await.map(|_| ()),
                    None => Ok(()),
                }
            };
            let read_err = async {
                match stderr.as_mut() {
                    Some(pipe) => pipe.read_to_end(&mut err).await.map(|_| ()),
                    None => Ok(()),
                }
            };
            tokio::try_join!(read_out, read_err)?;
            let status = child.wait().await?;
            Ok::<_, std::io::Error>((status, out, err))
        };
        let finished = tokio::time::timeout(self.timeout, run).await;

        let (status, stdout, stderr) = match finished {
            Ok(result) => result.map_err(|e| AppError::Llm(e.to_string()))?,
            Err(_) => {
                if let Err(e) = child.kill().await {
                    tracing::warn!(error = %e, "Failed to kill timed out LLM command");
                }
                tracing::warn!(command = %self.command, secs = self.timeout.as_secs(), "LLM call timed out, killed");
                return Err(AppError::Timeout {
                    secs: self.timeout.as_secs(),
                });
            }
        };

        if !status.success() {
            let stderr = String::from_utf8_lossy(&stderr);
            return Err(AppError::Llm(format!(
                "`{}` exited with {}: {}",
                self.command,
                status,
                stderr.trim()
            )));
        }
        let text = String::from_utf8_lossy(&stdout).trim().to_string();
        if text.is_empty() {
            return Err(AppError::Llm("empty response".into()));
        }
        Ok(text)
    }

    pub async fn correct(&self, text: &str, mode: CorrectionMode) -> AppResult<String> {
        let corrected = self.complete(&correction_prompt(text, mode)).await?;
        Ok(strip_wrapping_quotes(&corrected).to_string())
    }

    /// Summarize a formatted transcript covering `event_count` events.
    pub async fn summarize(&self, transcript: &str, event_count: usize) -> AppResult<Summary> {
        let response = self.complete(&summary_prompt(transcript)).await?;
        let (abstract_text, detail) = parse_summary(&response);
        Ok(Summary {
            abstract_text,
            detail,
            generated_at: Utc::now(),
            event_count,
        })
    }
}

fn correction_prompt(text: &str, mode: CorrectionMode) -> String {
    let instruction = match mode {
        CorrectionMode::Grammar => {
            "Correct the grammar and spelling of the text below. Change as little as possible and keep the meaning."
        }
        CorrectionMode::Fluent => {
            "Rewrite the text below so it reads as natural, fluent English while keeping the meaning."
        }
    };
    format!(
        "{}\nReply with the corrected text only, no explanation and no quotes.\n\n{}",
        instruction, text
    )
}

fn summary_prompt(transcript: &str) -> String {
    format!(
        "Summarize the terminal session transcript below.\n\
         Reply in exactly this format:\n\
         ABSTRACT: <one or two sentences>\n\
         DETAIL: <what was done, decisions made, and what is left to do>\n\n\
         {}",
        transcript
    )
}

/// Split an `ABSTRACT: ... DETAIL: ...` reply. Without markers the first
/// paragraph is the abstract and the whole reply is the detail.
fn parse_summary(response: &str) -> (String, String) {
    let abstract_at = response.find("ABSTRACT:");
    let detail_at = response.find("DETAIL:");
    match (abstract_at, detail_at) {
        (Some(a), Some(d)) if a < d => (
            response[a + "ABSTRACT:".len()..d].trim().to_string(),
            response[d + "DETAIL:".len()..].trim().to_string(),
        ),
        _ => {
            let first = response.split("\n\n").next().unwrap_or(response).trim();
            (first.to_string(), response.trim().to_string())
        }
    }
}

fn strip_wrapping_quotes(text: &str) -> &str {
    let trimmed = text.trim();
    trimmed
        .strip_prefix('"')
        .and_then(|t| t.strip_suffix('"'))
        .unwrap_or(trimmed)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mode_fallback() {
        assert_eq!(CorrectionMode::parse(Some("fluent")), CorrectionMode::Fluent);
        assert_eq!(CorrectionMode::parse(Some("Fluent ")), CorrectionMode::Fluent);
        assert_eq!(CorrectionMode::parse(Some("poetic")), CorrectionMode::Grammar);
        assert_eq!(CorrectionMode::parse(None), CorrectionMode::Grammar);
    }

    #[test]
    fn test_parse_summary_markers() {
        let (a, d) = parse_summary("ABSTRACT: Fixed the build.\nDETAIL: Bumped tokio.\nTests pass.");
        assert_eq!(a, "Fixed the build.");
        assert_eq!(d, "Bumped tokio.\nTests pass.");

        let (a, d) = parse_summary("Short.\n\nLonger body.");
        assert_eq!(a, "Short.");
        assert_eq!(d, "Short.\n\nLonger body.");
    }

    #[tokio::test]
    async fn test_prompt_goes_through_stdin() {
        let client = LlmClient::new("tail -n 1", Duration::from_secs(5));
        let corrected = client.correct("I want to make", CorrectionMode::Grammar).await.unwrap();
        assert_eq!(corrected, "I want to make");
    }

    #[tokio::test]
    async fn test_timeout_is_distinct() {
        let client = LlmClient::new("sleep 5", Duration::from_millis(100));
        let err = client.complete("x").await.unwrap_err();
        assert!(err.is_timeout());
        assert!(err.to_string().starts_with("timed out"));
    }

    #[tokio::test]
    async fn test_failing_command_is_llm_error() {
        let client = LlmClient::new("echo nope >&2; exit 3", Duration::from_secs(5));
        let err = client.complete("x").await.unwrap_err();
        assert!(matches!(err, AppError::Llm(ref m) if m.contains("nope")));
    }
}
