//! Process-table probes for a session's shell.

use std::path::{Path, PathBuf};
use std::time::Duration;

use sysinfo::{Pid, ProcessRefreshKind, ProcessesToUpdate, System, UpdateKind};

/// Working directory of a process, if the OS exposes it.
pub fn process_cwd(pid: u32) -> Option<PathBuf> {
    let pid = Pid::from_u32(pid);
    let mut system = System::new();
    system.refresh_processes_specifics(
        ProcessesToUpdate::Some(&[pid]),
        true,
        ProcessRefreshKind::new().with_cwd(UpdateKind::Always),
    );
    system.process(pid)?.cwd().map(Path::to_path_buf)
}

/// Whether any descendant of `pid` looks like `program`, by executable
/// name or by its first two argv entries (script launchers such as node).
pub fn has_descendant(pid: u32, program: &str) -> bool {
    let root = Pid::from_u32(pid);
    let mut system = System::new();
    system.refresh_processes_specifics(
        ProcessesToUpdate::All,
        true,
        ProcessRefreshKind::new().with_cmd(UpdateKind::OnlyIfNotSet),
    );

    system.processes().values().any(|process| {
        let matches_program = process.name().to_string_lossy().starts_with(program)
            || process.cmd().iter().take(2).any(|arg| {
                Path::new(arg)
                    .file_name()
                    .is_some_and(|name| name.to_string_lossy() == program)
            });
        if !matches_program {
            return false;
        }
        let mut parent = process.parent();
        while let Some(ppid) = parent {
            if ppid == root {
                return true;
            }
            parent = system.process(ppid).and_then(|p| p.parent());
        }
        false
    })
}

/// Resolve a shell's cwd off the async runtime, falling back when the
/// probe fails or takes longer than `budget`.
pub async fn cwd_or(pid: Option<u32>, fallback: &Path, budget: Duration) -> PathBuf {
    let Some(pid) = pid else {
        return fallback.to_path_buf();
    };
    let probe = tokio::task::spawn_blocking(move || process_cwd(pid));
    match tokio::time::timeout(budget, probe).await {
        Ok(Ok(Some(cwd))) => cwd,
        Ok(_) => fallback.to_path_buf(),
        Err(_) => {
            tracing::warn!(pid, "Working directory probe timed out");
            fallback.to_path_buf()
        }
    }
}

/// [`has_descendant`] off the async runtime. A probe that fails or runs
/// past `budget` reports `false`.
pub async fn descendant_running(pid: Option<u32>, program: &str, budget: Duration) -> bool {
    let Some(pid) = pid else {
        return false;
    };
    let program = program.to_string();
    let probe = tokio::task::spawn_blocking(move || has_descendant(pid, &program));
    match tokio::time::timeout(budget, probe).await {
        Ok(Ok(running)) => running,
        Ok(Err(_)) => false,
        Err(_) => {
            tracing::warn!(pid, "Process probe timed out");
            false
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_own_cwd_is_visible() {
        let cwd = process_cwd(std::process::id());
        if let Some(cwd) = cwd {
            assert!(cwd.is_absolute());
        }
    }

    #[tokio::test]
    async fn test_missing_pid_falls_back() {
        let fallback = Path::new("/fallback");
        assert_eq!(cwd_or(None, fallback, Duration::from_secs(1)).await, fallback);
        assert!(!descendant_running(None, "claude", Duration::from_secs(1)).await);
    }

    #[test]
    fn test_no_descendants_for_unknown_pid() {
        assert!(!has_descendant(u32::MAX - 1, "claude"));
    }
}
