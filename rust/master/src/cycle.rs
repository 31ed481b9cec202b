//! The rendezvous cycle
//!
//! One complete dispatch -> handshake -> processing -> completion ->
//! reset sequence, driven by a spawned task so the invoking context never
//! blocks on the peer process. Both waits are sleep-based polls: the
//! channel carries no OS-level wait primitive, by design.

use crate::{
    load_result_artifact, RendezvousError, Result, SlaveStatus,
};
use rendezvous_channel::{code, Phase, SharedChannel, SharedRecord};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{sleep, timeout};
use tracing::{debug, info, instrument, warn};

/// Tuning knobs for one cycle.
#[derive(Debug, Clone)]
pub struct RendezvousConfig {
    /// Flag poll cadence for both waits.
    pub poll_interval: Duration,
    /// Bound on the handshake wait (dispatch until the slave moves the
    /// flag off `MasterReady`).
    pub handshake_timeout: Duration,
    /// Optional bound on the completion wait. `None` keeps the wait
    /// unbounded: task duration is slave-controlled and unknown.
    pub completion_timeout: Option<Duration>,
}

impl Default for RendezvousConfig {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_millis(10),
            handshake_timeout: Duration::from_millis(30_000),
            completion_timeout: None,
        }
    }
}

/// Intermediate progress notifications for the caller.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CycleProgress {
    /// Inputs are published and `MasterReady` is set.
    Dispatched,
    /// The slave acknowledged and is working.
    Processing,
}

/// Caller-supplied inputs for one cycle.
#[derive(Debug, Clone)]
pub struct CycleInputs {
    /// Folder the slave writes its result artifact into.
    pub folder: PathBuf,
    pub start: i32,
    pub end: i32,
}

/// Outputs of a successful cycle.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CycleOutput {
    pub sum: i32,
    pub result_file: String,
    /// Text of the result artifact, empty when unreadable.
    pub file_content: String,
    /// Slave-reported elapsed milliseconds, parsed from the artifact.
    pub slave_elapsed_ms: Option<u64>,
}

/// Terminal report of one cycle. Failed cycles carry no outputs: stale
/// slave writes are discarded, never surfaced.
#[derive(Debug)]
pub struct CycleReport {
    /// The dispatched request counter.
    pub request: u32,
    /// Master-side elapsed time for the whole cycle.
    pub elapsed: Duration,
    pub outcome: Result<CycleOutput>,
}

/// Handle on an in-flight cycle.
pub struct CycleHandle {
    request: u32,
    progress: watch::Receiver<CycleProgress>,
    task: JoinHandle<CycleReport>,
}

impl CycleHandle {
    /// The counter identifying this cycle.
    pub fn request(&self) -> u32 {
        self.request
    }

    /// Progress notification stream.
    pub fn progress(&self) -> watch::Receiver<CycleProgress> {
        self.progress.clone()
    }

    /// Await the terminal report.
    pub async fn report(self) -> CycleReport {
        let request = self.request;
        self.task.await.unwrap_or_else(|e| CycleReport {
            request,
            elapsed: Duration::ZERO,
            outcome: Err(RendezvousError::Unknown(format!("cycle task failed: {e}"))),
        })
    }

    /// Abandon the handle without waiting. The cycle keeps running to its
    /// own terminal state; the channel is re-armed by the task.
    pub fn detach(self) {
        drop(self.task);
    }
}

/// Owns the channel's master side: the monotonically increasing request
/// counter, the one-cycle-at-a-time guard, and the discovery snapshot the
/// dispatch precondition is checked against.
pub struct Dispatcher {
    channel: Arc<SharedChannel>,
    config: RendezvousConfig,
    discovery: watch::Receiver<SlaveStatus>,
    request_counter: AtomicU32,
    in_flight: Arc<AtomicBool>,
}

impl Dispatcher {
    pub fn new(
        channel: Arc<SharedChannel>,
        discovery: watch::Receiver<SlaveStatus>,
        config: RendezvousConfig,
    ) -> Self {
        Self {
            channel,
            config,
            discovery,
            request_counter: AtomicU32::new(0),
            in_flight: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Whether a cycle is currently outstanding.
    pub fn is_in_flight(&self) -> bool {
        self.in_flight.load(Ordering::SeqCst)
    }

    /// Latest discovery snapshot.
    pub fn slave_status(&self) -> SlaveStatus {
        self.discovery.borrow().clone()
    }

    /// Start one cycle. Fails fast when the slave is not known alive or
    /// another cycle is outstanding; otherwise spawns the cycle task and
    /// returns immediately.
    #[instrument(skip(self, inputs), fields(start = inputs.start, end = inputs.end))]
    pub fn dispatch(&self, inputs: CycleInputs) -> Result<CycleHandle> {
        if !self.discovery.borrow().alive {
            return Err(RendezvousError::SlaveNotRunning);
        }
        if self.in_flight.swap(true, Ordering::SeqCst) {
            return Err(RendezvousError::CycleInFlight);
        }

        let request = self.request_counter.fetch_add(1, Ordering::SeqCst) + 1;
        let (progress_tx, progress_rx) = watch::channel(CycleProgress::Dispatched);

        let channel = Arc::clone(&self.channel);
        let config = self.config.clone();
        let in_flight = Arc::clone(&self.in_flight);
        let task = tokio::spawn(async move {
            let report = run_cycle(channel, config, inputs, request, progress_tx).await;
            in_flight.store(false, Ordering::SeqCst);
            report
        });

        info!(request, "cycle dispatched");
        Ok(CycleHandle {
            request,
            progress: progress_rx,
            task,
        })
    }
}

#[instrument(skip(channel, config, inputs, progress))]
async fn run_cycle(
    channel: Arc<SharedChannel>,
    config: RendezvousConfig,
    inputs: CycleInputs,
    request: u32,
    progress: watch::Sender<CycleProgress>,
) -> CycleReport {
    let started = Instant::now();
    let outcome = drive_cycle(channel.record(), &config, &inputs, request, &progress).await;

    match &outcome {
        Ok(output) => info!(request, sum = output.sum, "cycle finished"),
        Err(e) => warn!(request, "cycle failed: {e}"),
    }

    CycleReport {
        request,
        elapsed: started.elapsed(),
        outcome,
    }
}

async fn drive_cycle(
    record: &SharedRecord,
    config: &RendezvousConfig,
    inputs: &CycleInputs,
    request: u32,
    progress: &watch::Sender<CycleProgress>,
) -> Result<CycleOutput> {
    // Publish inputs, clear any prior outputs, then signal. The flag
    // store must be the last write: it is what makes the fields visible.
    record.set_request(
        &inputs.folder.to_string_lossy(),
        inputs.start,
        inputs.end,
        request,
    );
    record.clear_response();
    record.set_phase(Phase::MasterReady);
    debug!(request, "MasterReady set, waiting for acknowledgment");

    // Handshake wait, bounded.
    let handshake = wait_for_phase(record, config.poll_interval, |p| p != Phase::MasterReady);
    match timeout(config.handshake_timeout, handshake).await {
        Ok(result) => result?,
        Err(_) => {
            // Take the channel back so the next dispatch starts clean.
            record.set_phase(Phase::Idle);
            return Err(RendezvousError::HandshakeTimeout {
                timeout_ms: config.handshake_timeout.as_millis() as u64,
            });
        }
    };

    let _ = progress.send(CycleProgress::Processing);
    debug!(request, "slave acknowledged");

    // Completion wait, unbounded unless configured otherwise.
    let completion = wait_for_phase(record, config.poll_interval, |p| p == Phase::SlaveFinished);
    match config.completion_timeout {
        Some(deadline) => match timeout(deadline, completion).await {
            Ok(result) => result?,
            Err(_) => {
                record.set_phase(Phase::Idle);
                return Err(RendezvousError::CompletionTimeout {
                    timeout_ms: deadline.as_millis() as u64,
                });
            }
        },
        None => completion.await?,
    };

    // Consume outputs, then re-arm the channel before judging them so the
    // flag is back to Idle on every post-completion path.
    let validated = record.validate();
    let response = record.response();
    record.set_phase(Phase::Idle);
    validated?;
    let response = response?;

    if response.counter != request {
        warn!(
            request,
            echoed = response.counter,
            "discarding stale response"
        );
        return Err(RendezvousError::InvalidResponseCounter {
            expected: request,
            actual: response.counter,
        });
    }
    if response.code != code::SUCCESS {
        return Err(RendezvousError::SlaveReportedFailure {
            code: response.code,
        });
    }

    let artifact = load_result_artifact(&inputs.folder, &response.file_name)
        .await
        .unwrap_or_default();

    Ok(CycleOutput {
        sum: response.sum,
        result_file: response.file_name,
        file_content: artifact.content,
        slave_elapsed_ms: artifact.slave_elapsed_ms,
    })
}

/// Poll the flag until `done` holds. Surfaces an undefined flag value as
/// the corruption it is.
async fn wait_for_phase(
    record: &SharedRecord,
    interval: Duration,
    done: impl Fn(Phase) -> bool,
) -> Result<Phase> {
    loop {
        let phase = record.phase()?;
        if done(phase) {
            return Ok(phase);
        }
        sleep(interval).await;
    }
}
