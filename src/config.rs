//! Command-line configuration and compile-time defaults.

use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;

use crate::transcript::ClassifierConfig;

/// Output history configuration.
pub mod history {
    /// Maximum number of output chunks retained per session for redraws.
    pub const DEFAULT_CAP: usize = 5000;
}

/// Timing configuration.
pub mod timing {
    use std::time::Duration;

    /// Interval between reaper sweeps.
    pub const REAP_INTERVAL: Duration = Duration::from_secs(60);
    /// How long a client may stay disconnected before its shells are killed.
    pub const DEFAULT_RETENTION: Duration = Duration::from_secs(60 * 60);
    /// Budget for process-table probes (cwd, running assistant).
    pub const PROBE_TIMEOUT: Duration = Duration::from_secs(2);
    /// Quiet period before a watched file is re-read.
    pub const WATCH_DEBOUNCE: Duration = Duration::from_millis(100);
    /// Default budget for correction and summarization calls.
    pub const DEFAULT_LLM_TIMEOUT: Duration = Duration::from_secs(60);
}

/// File access limits.
pub mod limits {
    /// Largest file `read-file` will return.
    pub const READ_FILE_MAX_BYTES: u64 = 2 * 1024 * 1024;
    /// Largest file `/api/file` will stream.
    pub const STREAM_FILE_MAX_BYTES: u64 = 50 * 1024 * 1024;
    /// Prefix inspected for NUL bytes before a text read.
    pub const BINARY_PROBE_BYTES: usize = 8 * 1024;
}

/// Bring-back replay tuning.
pub mod replay {
    use std::time::Duration;

    /// Wait after spawning the shell before launching the assistant.
    pub const SETTLE_DELAY: Duration = Duration::from_millis(1500);
    /// Interval between screen polls.
    pub const POLL_INTERVAL: Duration = Duration::from_millis(500);
    /// Give up waiting for the prompt after this long and send anyway.
    pub const READY_DEADLINE: Duration = Duration::from_secs(30);
    /// Characters per input chunk.
    pub const CHUNK_CHARS: usize = 256;
    /// Pause between chunks.
    pub const CHUNK_DELAY: Duration = Duration::from_millis(40);
    /// Transcript length ceiling before tail truncation.
    pub const TRANSCRIPT_CEILING: usize = 60_000;
    /// How much trailing output counts as the "visible screen".
    pub const SCREEN_TAIL_BYTES: usize = 4096;
}

#[derive(Parser, Debug, Clone)]
#[command(name = "shellkeeper")]
#[command(about = "Persistent browser-driven shell sessions with recorded transcripts")]
#[command(version)]
pub struct Cli {
    /// Address to bind
    #[arg(long, env = "SHELLKEEPER_HOST", default_value = "127.0.0.1")]
    pub host: String,

    /// Port to listen on
    #[arg(short, long, env = "SHELLKEEPER_PORT", default_value_t = 3030)]
    pub port: u16,

    /// Sandbox root for file access (defaults to the home directory)
    #[arg(long, env = "SHELLKEEPER_ROOT")]
    pub root: Option<PathBuf>,

    /// Where recordings and summaries are stored
    #[arg(long, env = "SHELLKEEPER_DATA_DIR")]
    pub data_dir: Option<PathBuf>,

    /// Seconds a disconnected client is kept before its shells are reaped
    #[arg(long, env = "SHELLKEEPER_RETENTION_SECS")]
    pub retention_secs: Option<u64>,

    /// Output chunks kept per session for redraw on reconnect
    #[arg(long, env = "SHELLKEEPER_HISTORY_CAP", default_value_t = history::DEFAULT_CAP)]
    pub history_cap: usize,

    /// Shell to spawn (defaults to $SHELL)
    #[arg(long, env = "SHELLKEEPER_SHELL")]
    pub shell: Option<String>,

    /// Command typed into a fresh session to start the assistant during bring-back
    #[arg(long, env = "SHELLKEEPER_ASSISTANT", default_value = "claude")]
    pub assistant_command: String,

    /// Shell command used for correction and summarization (prompt on stdin)
    #[arg(long, env = "SHELLKEEPER_LLM_COMMAND", default_value = "claude -p")]
    pub llm_command: String,

    /// Seconds before an LLM call is killed
    #[arg(long, env = "SHELLKEEPER_LLM_TIMEOUT_SECS")]
    pub llm_timeout_secs: Option<u64>,

    /// JSON file overriding classifier vocabulary and thresholds
    #[arg(long, env = "SHELLKEEPER_CLASSIFIER_CONFIG")]
    pub classifier_config: Option<PathBuf>,

    /// Disable session recording
    #[arg(long)]
    pub no_record: bool,
}

/// Resolved runtime configuration shared by every component.
#[derive(Debug, Clone)]
pub struct Settings {
    pub bind_addr: String,
    pub root: PathBuf,
    pub data_dir: PathBuf,
    pub retention: Duration,
    pub history_cap: usize,
    pub shell: String,
    pub assistant_command: String,
    pub llm_command: String,
    pub llm_timeout: Duration,
    pub classifier: ClassifierConfig,
    pub record: bool,
}

impl Settings {
    pub fn from_cli(cli: Cli) -> Result<Self> {
        let root = match cli.root {
            Some(root) => root,
            None => dirs::home_dir().context("Could not determine home directory")?,
        };
        let data_dir = match cli.data_dir {
            Some(dir) => dir,
            None => dirs::data_dir()
                .context("Could not determine data directory")?
                .join("shellkeeper"),
        };
        let classifier = match &cli.classifier_config {
            Some(path) => ClassifierConfig::load(path)
                .with_context(|| format!("Failed to load classifier config {:?}", path))?,
            None => ClassifierConfig::default(),
        };

        Ok(Self {
            bind_addr: format!("{}:{}", cli.host, cli.port),
            root,
            data_dir,
            retention: cli
                .retention_secs
                .map(Duration::from_secs)
                .unwrap_or(timing::DEFAULT_RETENTION),
            history_cap: cli.history_cap.max(2),
            shell: cli
                .shell
                .unwrap_or_else(|| std::env::var("SHELL").unwrap_or_else(|_| "/bin/sh".into())),
            assistant_command: cli.assistant_command,
            llm_command: cli.llm_command,
            llm_timeout: cli
                .llm_timeout_secs
                .map(Duration::from_secs)
                .unwrap_or(timing::DEFAULT_LLM_TIMEOUT),
            classifier,
            record: !cli.no_record,
        })
    }

    /// Settings for unit tests: everything rooted under `root`.
    #[cfg(test)]
    pub fn for_tests(root: &std::path::Path) -> Self {
        Self {
            bind_addr: "127.0.0.1:0".into(),
            root: root.to_path_buf(),
            data_dir: root.join(".shellkeeper"),
            retention: Duration::from_secs(60),
            history_cap: 8,
            shell: "/bin/sh".into(),
            assistant_command: "claude".into(),
            llm_command: "cat".into(),
            llm_timeout: Duration::from_secs(5),
            classifier: ClassifierConfig::default(),
            record: true,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cli_defaults_resolve() {
        let cli = Cli::parse_from(["shellkeeper", "--root", "/tmp", "--data-dir", "/tmp/sk"]);
        let settings = Settings::from_cli(cli).unwrap();
        assert_eq!(settings.bind_addr, "127.0.0.1:3030");
        assert_eq!(settings.root, PathBuf::from("/tmp"));
        assert_eq!(settings.retention, timing::DEFAULT_RETENTION);
        assert_eq!(settings.history_cap, history::DEFAULT_CAP);
        assert!(settings.record);
    }

    #[test]
    fn test_cli_overrides() {
        let cli = Cli::parse_from([
            "shellkeeper",
            "--root",
            "/tmp",
            "--data-dir",
            "/tmp/sk",
            "--retention-secs",
            "5",
            "--llm-timeout-secs",
            "9",
            "--no-record",
        ]);
        let settings = Settings::from_cli(cli).unwrap();
        assert_eq!(settings.retention, Duration::from_secs(5));
        assert_eq!(settings.llm_timeout, Duration::from_secs(9));
        assert!(!settings.record);
    }
}
