//! Bring-back: launch the assistant in a fresh session and type a past
//! session's transcript (or its summary) into it.

mod screen;

pub use screen::{detect, ScreenState};

use std::time::Duration;

use serde::Serialize;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::config::replay;
use crate::error::AppResult;
use crate::recording::Summary;
use crate::transcript::truncate_transcript;

/// Progress reported to the client while a bring-back runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ReplayPhase {
    Launching,
    Waiting,
    Confirming,
    Sending,
    Done,
    Cancelled,
    Failed,
}

/// The session a replay types into.
pub trait ReplayTarget {
    /// Position in the output stream; pass to [`ReplayTarget::output_since`].
    fn mark(&self) -> u64;
    /// Output produced after `mark` that is still retained.
    fn output_since(&self, mark: u64) -> String;
    fn send(&self, data: &str) -> AppResult<()>;
}

/// Timing knobs, overridable in tests.
#[derive(Debug, Clone)]
pub struct ReplayTiming {
    pub settle: Duration,
    pub poll: Duration,
    pub deadline: Duration,
    pub chunk_chars: usize,
    pub chunk_delay: Duration,
}

impl Default for ReplayTiming {
    fn default() -> Self {
        Self {
            settle: replay::SETTLE_DELAY,
            poll: replay::POLL_INTERVAL,
            deadline: replay::READY_DEADLINE,
            chunk_chars: replay::CHUNK_CHARS,
            chunk_delay: replay::CHUNK_DELAY,
        }
    }
}

/// Context text built from a formatted transcript.
pub fn context_from_transcript(transcript: &str) -> String {
    format!(
        "Here is the transcript of an earlier terminal session. Pick up where it left off.\n\n{}",
        truncate_transcript(transcript, replay::TRANSCRIPT_CEILING)
    )
}

/// Context text built from a cached summary.
pub fn context_from_summary(summary: &Summary) -> String {
    format!(
        "Here is a summary of an earlier terminal session. Pick up where it left off.\n\n{}\n\n{}",
        summary.abstract_text, summary.detail
    )
}

/// Split on character boundaries into pieces of at most `size` chars.
fn chunks(text: &str, size: usize) -> Vec<String> {
    let chars: Vec<char> = text.chars().collect();
    chars.chunks(size.max(1)).map(|c| c.iter().collect()).collect()
}

/// Sleep unless cancelled first. Returns false on cancellation.
async fn pause(cancel: &CancellationToken, duration: Duration) -> bool {
    tokio::select! {
        _ = cancel.cancelled() => false,
        _ = tokio::time::sleep(duration) => true,
    }
}

/// Drives one bring-back into `target`.
pub struct Injector<'a, T: ReplayTarget> {
    target: &'a T,
    timing: ReplayTiming,
    cancel: CancellationToken,
}

impl<'a, T: ReplayTarget> Injector<'a, T> {
    pub fn new(target: &'a T, cancel: CancellationToken) -> Self {
        Self {
            target,
            timing: ReplayTiming::default(),
            cancel,
        }
    }

    #[cfg(test)]
    pub fn with_timing(mut self, timing: ReplayTiming) -> Self {
        self.timing = timing;
        self
    }

    /// Run to completion, reporting every phase change through `report`.
    /// Returns the final phase.
    pub async fn run(
        &self,
        launch_command: &str,
        context: &str,
        mut report: impl FnMut(ReplayPhase),
    ) -> ReplayPhase {
        let phase = match self.drive(launch_command, context, &mut report).await {
            Ok(phase) => phase,
            Err(e) => {
                tracing::warn!(error = %e, "Bring-back failed");
                ReplayPhase::Failed
            }
        };
        report(phase);
        phase
    }

    async fn drive(
        &self,
        launch_command: &str,
        context: &str,
        report: &mut impl FnMut(ReplayPhase),
    ) -> AppResult<ReplayPhase> {
        report(ReplayPhase::Launching);
        if !pause(&self.cancel, self.timing.settle).await {
            return Ok(ReplayPhase::Cancelled);
        }
        let mut mark = self.target.mark();
        self.target.send(&format!("{}\r", launch_command))?;

        report(ReplayPhase::Waiting);
        if !self.wait_until_ready(&mut mark, report).await {
            return Ok(ReplayPhase::Cancelled);
        }

        report(ReplayPhase::Sending);
        for chunk in chunks(context, self.timing.chunk_chars) {
            if self.cancel.is_cancelled() {
                return Ok(ReplayPhase::Cancelled);
            }
            self.target.send(&chunk)?;
            if !pause(&self.cancel, self.timing.chunk_delay).await {
                return Ok(ReplayPhase::Cancelled);
            }
        }
        self.target.send("\r")?;
        Ok(ReplayPhase::Done)
    }

    /// Poll until the prompt shows or the deadline passes, accepting any
    /// dialog along the way. Returns false when cancelled.
    async fn wait_until_ready(&self, mark: &mut u64, report: &mut impl FnMut(ReplayPhase)) -> bool {
        let deadline = Instant::now() + self.timing.deadline;
        loop {
            if !pause(&self.cancel, self.timing.poll).await {
                return false;
            }
            match detect(&self.target.output_since(*mark)) {
                ScreenState::Prompt => return true,
                ScreenState::Intermediate => {
                    report(ReplayPhase::Confirming);
                    *mark = self.target.mark();
                    if let Err(e) = self.target.send("\r") {
                        tracing::warn!(error = %e, "Failed to confirm dialog");
                    }
                    report(ReplayPhase::Waiting);
                }
                ScreenState::Waiting => {}
            }
            if Instant::now() >= deadline {
                tracing::warn!("Assistant prompt not detected before deadline, sending anyway");
                return true;
            }
        }
    }
}
