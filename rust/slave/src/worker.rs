//! The slave worker loop

use rendezvous_channel::{code, ChannelError, Phase, RecordRequest, SharedChannel};
use std::path::Path;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::time::sleep;
use tracing::{debug, info, instrument, warn};

/// Default flag poll cadence for the worker.
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(10);

/// One served request, for logging and tests.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServedRequest {
    pub counter: u32,
    pub code: i32,
    pub sum: i32,
    pub result_file: String,
}

/// Consumes dispatched requests from the shared channel, one at a time.
pub struct SlaveWorker {
    channel: Arc<SharedChannel>,
    poll_interval: Duration,
}

impl SlaveWorker {
    pub fn new(channel: Arc<SharedChannel>) -> Self {
        Self {
            channel,
            poll_interval: DEFAULT_POLL_INTERVAL,
        }
    }

    pub fn with_poll_interval(mut self, poll_interval: Duration) -> Self {
        self.poll_interval = poll_interval;
        self
    }

    /// Serve requests forever. Returns only on record corruption.
    #[instrument(skip(self), fields(channel = %self.channel.name()))]
    pub async fn run(&self) -> Result<(), ChannelError> {
        info!("slave worker started");
        loop {
            let served = self.handle_next().await?;
            info!(
                counter = served.counter,
                code = served.code,
                "request served"
            );
        }
    }

    /// Wait for one `MasterReady`, serve it, signal `SlaveFinished`.
    pub async fn handle_next(&self) -> Result<ServedRequest, ChannelError> {
        let record = self.channel.record();

        loop {
            match record.phase()? {
                Phase::MasterReady => break,
                _ => sleep(self.poll_interval).await,
            }
        }
        record.validate()?;

        // Optional intermediate signal; the master may never look at it.
        record.set_phase(Phase::SlaveStarted);
        let started = Instant::now();

        let request = record.request()?;
        debug!(
            counter = request.counter,
            start = request.start,
            end = request.end,
            "processing request"
        );

        let (result_code, sum, result_file) = serve(&request, started).await;
        record.set_response(result_code, sum, &result_file, request.counter);
        record.set_phase(Phase::SlaveFinished);

        Ok(ServedRequest {
            counter: request.counter,
            code: result_code,
            sum,
            result_file,
        })
    }
}

/// Compute the answer and write the artifact. Failures map to the
/// protocol result codes, with outputs zeroed.
async fn serve(request: &RecordRequest, started: Instant) -> (i32, i32, String) {
    let sum = match range_sum(request.start, request.end) {
        Ok(sum) => sum,
        Err(result_code) => return (result_code, 0, String::new()),
    };

    let file_name = format!("result_{}.txt", request.counter);
    let content = format!(
        "Sum:{}\nDuration:{}\n",
        sum,
        started.elapsed().as_millis()
    );
    match write_artifact(Path::new(&request.folder), &file_name, &content).await {
        Ok(()) => (code::SUCCESS, sum, file_name),
        Err(e) => {
            warn!(folder = %request.folder, "cannot write result file: {e}");
            (code::FILE_WRITE_FAILED, 0, String::new())
        }
    }
}

/// Inclusive sum over `[start, end]` with overflow detection.
fn range_sum(start: i32, end: i32) -> Result<i32, i32> {
    if start > end {
        return Err(code::INVALID_RANGE);
    }
    let mut sum: i32 = 0;
    for value in start..=end {
        sum = sum.checked_add(value).ok_or(code::SUM_OVERFLOW)?;
    }
    Ok(sum)
}

async fn write_artifact(folder: &Path, file_name: &str, content: &str) -> std::io::Result<()> {
    tokio::fs::create_dir_all(folder).await?;
    tokio::fs::write(folder.join(file_name), content).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use rendezvous_channel::generate_channel_name;

    #[test]
    fn range_sum_basics() {
        assert_eq!(range_sum(0, 100), Ok(5050));
        assert_eq!(range_sum(-3, 3), Ok(0));
        assert_eq!(range_sum(7, 7), Ok(7));
    }

    #[test]
    fn range_sum_failure_codes() {
        assert_eq!(range_sum(50, 10), Err(code::INVALID_RANGE));
        assert_eq!(range_sum(i32::MAX - 1, i32::MAX), Err(code::SUM_OVERFLOW));
    }

    #[tokio::test]
    async fn serves_one_request_end_to_end() {
        let dir = tempfile::tempdir().unwrap();
        let channel = Arc::new(
            SharedChannel::open_or_create(generate_channel_name("rdvz_worker")).unwrap(),
        );
        let worker = SlaveWorker::new(Arc::clone(&channel))
            .with_poll_interval(Duration::from_millis(2));

        let record = channel.record();
        record.set_request(dir.path().to_str().unwrap(), 1, 10, 5);
        record.clear_response();
        record.set_phase(Phase::MasterReady);

        let served = worker.handle_next().await.unwrap();
        assert_eq!(served.counter, 5);
        assert_eq!(served.code, code::SUCCESS);
        assert_eq!(served.sum, 55);
        assert_eq!(served.result_file, "result_5.txt");

        assert_eq!(record.phase().unwrap(), Phase::SlaveFinished);
        let response = record.response().unwrap();
        assert_eq!(response.counter, 5);
        assert_eq!(response.sum, 55);

        let content =
            std::fs::read_to_string(dir.path().join("result_5.txt")).unwrap();
        assert!(content.starts_with("Sum:55\n"));
        assert!(content.contains("Duration:"));
    }

    #[tokio::test]
    async fn invalid_range_reports_code_one() {
        let channel = Arc::new(
            SharedChannel::open_or_create(generate_channel_name("rdvz_worker_bad")).unwrap(),
        );
        let worker = SlaveWorker::new(Arc::clone(&channel))
            .with_poll_interval(Duration::from_millis(2));

        let record = channel.record();
        record.set_request("/tmp", 50, 10, 1);
        record.clear_response();
        record.set_phase(Phase::MasterReady);

        let served = worker.handle_next().await.unwrap();
        assert_eq!(served.code, code::INVALID_RANGE);
        assert_eq!(served.sum, 0);
        assert!(served.result_file.is_empty());
    }

    #[tokio::test]
    async fn unwritable_folder_reports_code_three() {
        let channel = Arc::new(
            SharedChannel::open_or_create(generate_channel_name("rdvz_worker_fs")).unwrap(),
        );
        let worker = SlaveWorker::new(Arc::clone(&channel))
            .with_poll_interval(Duration::from_millis(2));

        let record = channel.record();
        record.set_request("/proc/no_such_dir/outputs", 1, 3, 2);
        record.clear_response();
        record.set_phase(Phase::MasterReady);

        let served = worker.handle_next().await.unwrap();
        assert_eq!(served.code, code::FILE_WRITE_FAILED);
        assert_eq!(served.sum, 0);
    }
}
