//! Slave process discovery
//!
//! The rendezvous core never enumerates processes itself; it depends on a
//! supplier of `{alive, pid}` refreshed on a fixed cadence. The default
//! supplier scans the process table for the configured slave script,
//! platform-specifically: `/proc` on unix, a PowerShell CIM query on
//! windows.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

/// Default refresh cadence for the discovery watcher.
pub const DEFAULT_REFRESH_INTERVAL: Duration = Duration::from_millis(1000);

/// Best-effort liveness snapshot of the slave process.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SlaveStatus {
    pub alive: bool,
    pub pid: Option<u32>,
}

impl SlaveStatus {
    pub fn not_running() -> Self {
        Self {
            alive: false,
            pid: None,
        }
    }

    pub fn running(pid: u32) -> Self {
        Self {
            alive: true,
            pid: Some(pid),
        }
    }
}

/// Supplier of slave liveness, refreshed by a [`DiscoveryWatcher`].
#[async_trait]
pub trait SlaveDiscovery: Send + Sync {
    /// One best-effort probe. Failures degrade to "not running".
    async fn probe(&self) -> SlaveStatus;
}

/// Background task polling a [`SlaveDiscovery`] on a fixed cadence and
/// publishing snapshots into a watch channel.
pub struct DiscoveryWatcher {
    status: watch::Receiver<SlaveStatus>,
    task: JoinHandle<()>,
}

impl DiscoveryWatcher {
    /// Spawn the refresh task. The first probe runs immediately.
    pub fn spawn(discovery: Arc<dyn SlaveDiscovery>, refresh: Duration) -> Self {
        let (tx, rx) = watch::channel(SlaveStatus::not_running());
        let task = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(refresh);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            loop {
                ticker.tick().await;
                let status = discovery.probe().await;
                debug!(alive = status.alive, pid = ?status.pid, "discovery probe");
                if tx.send(status).is_err() {
                    break;
                }
            }
        });
        Self { status: rx, task }
    }

    /// Latest published snapshot.
    pub fn status(&self) -> SlaveStatus {
        self.status.borrow().clone()
    }

    /// New receiver for the snapshot stream.
    pub fn subscribe(&self) -> watch::Receiver<SlaveStatus> {
        self.status.clone()
    }
}

impl Drop for DiscoveryWatcher {
    fn drop(&mut self) {
        self.task.abort();
    }
}

/// Process-table scan matching the slave by its script name.
pub struct ProcessScanDiscovery {
    script_name: String,
    /// Substring the interpreter executable must contain, when set.
    interpreter: Option<String>,
}

impl ProcessScanDiscovery {
    /// Match any process whose command line names `script_name` and whose
    /// executable looks like a python interpreter.
    pub fn new(script_name: impl Into<String>) -> Self {
        Self {
            script_name: script_name.into(),
            interpreter: Some("python".to_string()),
        }
    }

    /// Match on the command line alone, regardless of interpreter.
    pub fn any_interpreter(script_name: impl Into<String>) -> Self {
        Self {
            script_name: script_name.into(),
            interpreter: None,
        }
    }
}

#[async_trait]
impl SlaveDiscovery for ProcessScanDiscovery {
    async fn probe(&self) -> SlaveStatus {
        let script = self.script_name.clone();
        let interpreter = self.interpreter.clone();

        #[cfg(unix)]
        {
            tokio::task::spawn_blocking(move || scan_proc(&script, interpreter.as_deref()))
                .await
                .unwrap_or_else(|e| {
                    warn!("discovery scan task failed: {e}");
                    SlaveStatus::not_running()
                })
        }
        #[cfg(windows)]
        {
            scan_cim(&script, interpreter.as_deref()).await
        }
        #[cfg(not(any(unix, windows)))]
        {
            let _ = (script, interpreter);
            SlaveStatus::not_running()
        }
    }
}

/// Walk `/proc/<pid>/cmdline` looking for the slave script.
#[cfg(unix)]
fn scan_proc(script: &str, interpreter: Option<&str>) -> SlaveStatus {
    let entries = match std::fs::read_dir("/proc") {
        Ok(entries) => entries,
        Err(e) => {
            warn!("cannot read /proc: {e}");
            return SlaveStatus::not_running();
        }
    };

    for entry in entries.flatten() {
        let name = entry.file_name();
        let Some(pid) = name.to_str().and_then(|s| s.parse::<u32>().ok()) else {
            continue;
        };
        let Ok(raw) = std::fs::read(entry.path().join("cmdline")) else {
            continue;
        };
        let mut argv = raw.split(|b| *b == 0).map(String::from_utf8_lossy);
        let Some(argv0) = argv.next() else { continue };

        if let Some(interpreter) = interpreter {
            if !argv0.contains(interpreter) {
                continue;
            }
        }
        if argv0.contains(script) || argv.any(|arg| arg.contains(script)) {
            return SlaveStatus::running(pid);
        }
    }

    SlaveStatus::not_running()
}

/// CIM process query through PowerShell, CSV output, as the original
/// master shipped it.
#[cfg(windows)]
async fn scan_cim(script: &str, interpreter: Option<&str>) -> SlaveStatus {
    let filter = interpreter.unwrap_or("");
    let command = format!(
        "Get-CimInstance Win32_Process | \
         Where-Object {{$_.Name -like \"{filter}*\"}} | \
         Select-Object ProcessId, Name, CommandLine | \
         ConvertTo-Csv -NoTypeInformation"
    );

    let output = match tokio::process::Command::new("powershell")
        .args(["-Command", &command])
        .output()
        .await
    {
        Ok(output) => output,
        Err(e) => {
            warn!("powershell scan failed: {e}");
            return SlaveStatus::not_running();
        }
    };

    let stdout = String::from_utf8_lossy(&output.stdout);
    for line in stdout.lines() {
        if !line.to_ascii_lowercase().contains(&script.to_ascii_lowercase()) {
            continue;
        }
        // First CSV column is the quoted pid.
        let pid = line
            .split(',')
            .next()
            .map(|col| col.trim_matches('"'))
            .and_then(|col| col.parse::<u32>().ok());
        if let Some(pid) = pid {
            return SlaveStatus::running(pid);
        }
    }

    SlaveStatus::not_running()
}
