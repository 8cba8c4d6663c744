//! Filesystem access the scanner needs from `/proc`, behind a trait so
//! `AnalyzeProcess` never touches the real filesystem in tests.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use async_trait::async_trait;

#[derive(Debug, Clone, Default)]
pub struct ProcStatus {
    /// Innermost-last, as `/proc/<pid>/status`'s `NSpid:` line lists them.
    pub nspid: Vec<i32>,
    pub ppid: i32,
}

/// Everything `AnalyzeProcess` reads from `/proc` for a single pid.
#[async_trait]
pub trait ProcFilesystem: Send + Sync {
    /// Numeric entries directly under the configured proc root.
    async fn list_pids(&self) -> std::io::Result<Vec<i32>>;
    /// NUL-delimited argv; empty vec if the process has already exited.
    async fn read_cmdline(&self, pid: i32) -> std::io::Result<Vec<String>>;
    async fn read_status(&self, pid: i32) -> std::io::Result<ProcStatus>;
    /// Raw lines of `/proc/<pid>/cgroup`.
    async fn read_cgroup(&self, pid: i32) -> std::io::Result<Vec<String>>;
}

/// Reads a real `/proc`-shaped directory (configurable for test mount
/// points or container sandboxes that expose it elsewhere).
pub struct RealProcFilesystem {
    root: PathBuf,
}

impl RealProcFilesystem {
    pub fn new(proc_path: impl Into<PathBuf>) -> Self {
        Self { root: proc_path.into() }
    }

    fn pid_path(&self, pid: i32, file: &str) -> PathBuf {
        self.root.join(pid.to_string()).join(file)
    }
}

#[async_trait]
impl ProcFilesystem for RealProcFilesystem {
    async fn list_pids(&self) -> std::io::Result<Vec<i32>> {
        let mut entries = tokio::fs::read_dir(&self.root).await?;
        let mut pids = Vec::new();
        while let Some(entry) = entries.next_entry().await? {
            if let Some(pid) = entry.file_name().to_str().and_then(|s| s.parse::<i32>().ok()) {
                pids.push(pid);
            }
        }
        Ok(pids)
    }

    async fn read_cmdline(&self, pid: i32) -> std::io::Result<Vec<String>> {
        let raw = tokio::fs::read(self.pid_path(pid, "cmdline")).await?;
        Ok(raw
            .split(|b| *b == 0)
            .filter(|chunk| !chunk.is_empty())
            .map(|chunk| String::from_utf8_lossy(chunk).into_owned())
            .collect())
    }

    async fn read_status(&self, pid: i32) -> std::io::Result<ProcStatus> {
        let raw = tokio::fs::read_to_string(self.pid_path(pid, "status")).await?;
        Ok(parse_status(&raw))
    }

    async fn read_cgroup(&self, pid: i32) -> std::io::Result<Vec<String>> {
        let raw = tokio::fs::read_to_string(self.pid_path(pid, "cgroup")).await?;
        Ok(raw.lines().map(|l| l.to_string()).collect())
    }
}

fn parse_status(raw: &str) -> ProcStatus {
    let mut status = ProcStatus::default();
    for line in raw.lines() {
        if let Some(rest) = line.strip_prefix("NSpid:") {
            status.nspid = rest.split_whitespace().filter_map(|s| s.parse().ok()).collect();
        } else if let Some(rest) = line.strip_prefix("PPid:") {
            status.ppid = rest.trim().parse().unwrap_or(0);
        }
    }
    status
}

/// In-memory double: one process table entry per pid, built directly by
/// tests without touching a real filesystem.
#[derive(Debug, Clone, Default)]
pub struct FakeProcEntry {
    pub cmdline: Vec<String>,
    pub status: ProcStatus,
    pub cgroup: Vec<String>,
}

#[derive(Default)]
pub struct FakeProcFilesystem {
    pub entries: BTreeMap<i32, FakeProcEntry>,
}

impl FakeProcFilesystem {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, pid: i32, entry: FakeProcEntry) {
        self.entries.insert(pid, entry);
    }
}

#[async_trait]
impl ProcFilesystem for FakeProcFilesystem {
    async fn list_pids(&self) -> std::io::Result<Vec<i32>> {
        Ok(self.entries.keys().copied().collect())
    }

    async fn read_cmdline(&self, pid: i32) -> std::io::Result<Vec<String>> {
        Ok(self.entries.get(&pid).map(|e| e.cmdline.clone()).unwrap_or_default())
    }

    async fn read_status(&self, pid: i32) -> std::io::Result<ProcStatus> {
        self.entries
            .get(&pid)
            .map(|e| e.status.clone())
            .ok_or_else(|| std::io::Error::new(std::io::ErrorKind::NotFound, format!("no such pid {pid}")))
    }

    async fn read_cgroup(&self, pid: i32) -> std::io::Result<Vec<String>> {
        Ok(self.entries.get(&pid).map(|e| e.cgroup.clone()).unwrap_or_default())
    }
}

/// Extracts a 64-hex containerd ID from a `/proc/<pid>/cgroup` line set,
/// matching the `cri-containerd-<id>.scope` path component.
pub fn extract_container_id(lines: &[String]) -> Option<String> {
    for line in lines {
        if !(line.contains("containerd") || line.contains("docker") || line.contains("kubepods")) {
            continue;
        }
        for component in line.split('/') {
            if let Some(candidate) = component.strip_prefix("cri-containerd-").and_then(|s| s.strip_suffix(".scope")) {
                if candidate.len() == 64 && candidate.bytes().all(|b| b.is_ascii_hexdigit() && !b.is_ascii_uppercase()) {
                    return Some(candidate.to_string());
                }
            }
        }
    }
    None
}

/// Present only so call sites that want a real path but no `Path` import
/// of their own can build one; otherwise unused by the scanner itself.
pub fn default_proc_root() -> &'static Path {
    Path::new("/proc")
}
