//! Copier task relaying container stdout/stderr into a log driver.

use std::sync::Arc;

use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::task::JoinHandle;

use crate::logdriver::{LogDriver, LogMessage};
use crate::vm::LogStream;

/// Relays bytes from a container's live stdout/stderr streams into its log
/// driver.
///
/// The copier owns one task per stream. Tasks run until the stream hits EOF
/// (VM teardown closes the guest side) or an I/O error occurs. `stop()`
/// aborts them; Drop is the safety net when the pod is torn down without an
/// explicit stop.
pub struct LogCopier {
    container_id: String,
    streams: Option<(LogStream, LogStream)>,
    driver: Arc<dyn LogDriver>,
    tasks: Vec<JoinHandle<()>>,
}

impl LogCopier {
    /// Create a copier; the driver must already exist.
    pub fn new(
        container_id: impl Into<String>,
        stdout: LogStream,
        stderr: LogStream,
        driver: Arc<dyn LogDriver>,
    ) -> Self {
        Self {
            container_id: container_id.into(),
            streams: Some((stdout, stderr)),
            driver,
            tasks: Vec::new(),
        }
    }

    /// Start relaying. Calling `run` twice is a no-op.
    pub fn run(&mut self) {
        let Some((stdout, stderr)) = self.streams.take() else {
            return;
        };

        self.tasks.push(Self::spawn_reader(
            self.container_id.clone(),
            stdout,
            "stdout",
            Arc::clone(&self.driver),
        ));
        self.tasks.push(Self::spawn_reader(
            self.container_id.clone(),
            stderr,
            "stderr",
            Arc::clone(&self.driver),
        ));
    }

    fn spawn_reader(
        container_id: String,
        stream: LogStream,
        source: &'static str,
        driver: Arc<dyn LogDriver>,
    ) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut lines = BufReader::new(stream).lines();
            loop {
                match lines.next_line().await {
                    Ok(Some(line)) => {
                        if let Err(e) = driver.log(LogMessage::new(line, source)) {
                            tracing::warn!(
                                container_id = %container_id,
                                stream = source,
                                "log driver rejected message: {}", e
                            );
                        }
                    }
                    Ok(None) => break,
                    Err(e) => {
                        tracing::error!(
                            container_id = %container_id,
                            stream = source,
                            "failed to read log stream: {}", e
                        );
                        break;
                    }
                }
            }
            tracing::debug!(
                container_id = %container_id,
                stream = source,
                "log stream closed, copier task exiting"
            );
        })
    }

    /// Stop relaying and drop the stream tasks.
    pub fn stop(&mut self) {
        for task in self.tasks.drain(..) {
            task.abort();
        }
    }
}

impl Drop for LogCopier {
    fn drop(&mut self) {
        self.stop();
    }
}

impl std::fmt::Debug for LogCopier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LogCopier")
            .field("container_id", &self.container_id)
            .field("running", &!self.tasks.is_empty())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use hyperpod_shared::errors::HyperpodResult;
    use parking_lot::Mutex;
    use std::time::Duration;

    #[derive(Default)]
    struct CapturingDriver {
        messages: Mutex<Vec<(String, &'static str)>>,
    }

    impl LogDriver for CapturingDriver {
        fn name(&self) -> &'static str {
            "capture"
        }

        fn log(&self, msg: LogMessage) -> HyperpodResult<()> {
            self.messages.lock().push((msg.line, msg.source));
            Ok(())
        }

        fn close(&self) {}
    }

    #[tokio::test]
    async fn test_copier_relays_both_streams() {
        let driver = Arc::new(CapturingDriver::default());
        let stdout: LogStream = Box::new(&b"out line\n"[..]);
        let stderr: LogStream = Box::new(&b"err line\n"[..]);

        let mut copier = LogCopier::new("c1", stdout, stderr, driver.clone());
        copier.run();

        // Streams are finite; wait for the tasks to drain them.
        tokio::time::sleep(Duration::from_millis(50)).await;
        copier.stop();

        let messages = driver.messages.lock();
        assert!(messages.contains(&("out line".to_string(), "stdout")));
        assert!(messages.contains(&("err line".to_string(), "stderr")));
    }
}
