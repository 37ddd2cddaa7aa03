//! Event stream publisher: turns a job's growing record into a frame sequence.
//!
//! Each subscription gets its own poll task and cursor, starting at zero, so
//! every fresh connection replays the full history. The task ends when the
//! subscriber goes away, the job disappears, or the close grace after the
//! `done` frame has passed. The job itself is never affected.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::sync::mpsc::error::SendError;
use tokio::time::Instant;
use tokio_stream::wrappers::ReceiverStream;
use tracing::debug;
use uuid::Uuid;

use super::model::{DonePayload, LogEntry};
use super::store::JobStore;

/// Frames buffered between the poll task and a slow subscriber.
const FRAME_BUFFER: usize = 64;

/// Timing of stream sessions.
#[derive(Debug, Clone)]
pub struct StreamConfig {
    /// Wait between store polls.
    pub poll_interval: Duration,
    /// How long the stream stays open after `done`.
    pub close_grace: Duration,
    /// Reconnect interval suggested to clients.
    pub retry: Duration,
    /// Filler bytes appended to each data frame.
    pub padding: usize,
}

impl Default for StreamConfig {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_millis(500),
            close_grace: Duration::from_secs(10),
            retry: Duration::from_millis(3000),
            padding: 64 * 1024,
        }
    }
}

/// One frame of a job's event stream.
#[derive(Debug, Clone, PartialEq)]
pub enum StreamFrame {
    /// First frame of every session.
    Connected { job_id: Uuid, retry: Duration },
    /// A log entry, in append order.
    Log(LogEntry),
    /// The terminal summary, sent once.
    Done(DonePayload),
    /// Nothing new since the last poll.
    KeepAlive,
}

/// Subscribe to a job's events. `None` if the job is unknown.
pub async fn publish(
    store: Arc<dyn JobStore>,
    id: Uuid,
    config: StreamConfig,
) -> Option<ReceiverStream<StreamFrame>> {
    if !store.contains(id).await {
        return None;
    }

    let (tx, rx) = mpsc::channel(FRAME_BUFFER);
    tokio::spawn(async move {
        match poll_job(store.as_ref(), id, &config, &tx).await {
            Ok(()) => debug!(job_id = %id, "Stream closed"),
            Err(_) => debug!(job_id = %id, "Stream subscriber disconnected"),
        }
    });
    Some(ReceiverStream::new(rx))
}

async fn poll_job(
    store: &dyn JobStore,
    id: Uuid,
    config: &StreamConfig,
    tx: &mpsc::Sender<StreamFrame>,
) -> Result<(), SendError<StreamFrame>> {
    tx.send(StreamFrame::Connected {
        job_id: id,
        retry: config.retry,
    })
    .await?;

    let mut cursor = 0;
    let mut done_at: Option<Instant> = None;
    loop {
        if done_at.is_some_and(|at| at.elapsed() >= config.close_grace) {
            return Ok(());
        }
        let Some(progress) = store.read_since(id, cursor).await else {
            debug!(job_id = %id, "Job evicted while streaming");
            return Ok(());
        };

        let mut idle = true;
        for entry in progress.logs {
            cursor += 1;
            idle = false;
            tx.send(StreamFrame::Log(entry)).await?;
        }
        if done_at.is_none() {
            if let Some(done) = progress.done {
                idle = false;
                tx.send(StreamFrame::Done(done)).await?;
                done_at = Some(Instant::now());
            }
        }
        if idle {
            tx.send(StreamFrame::KeepAlive).await?;
        }

        tokio::time::sleep(config.poll_interval).await;
    }
}

#[cfg(test)]
mod tests {
    use tokio_stream::StreamExt;

    use super::*;
    use crate::jobs::model::{JobStatus, Outcome, ResultPayload};
    use crate::jobs::store::{InMemoryJobStore, JobHandle};

    fn fast() -> StreamConfig {
        StreamConfig {
            poll_interval: Duration::from_millis(10),
            close_grace: Duration::from_millis(100),
            ..Default::default()
        }
    }

    fn meaningful(frames: Vec<StreamFrame>) -> Vec<StreamFrame> {
        frames
            .into_iter()
            .filter(|f| *f != StreamFrame::KeepAlive)
            .collect()
    }

    #[tokio::test]
    async fn unknown_job_has_no_stream() {
        let store = InMemoryJobStore::new();
        assert!(publish(store, Uuid::new_v4(), fast()).await.is_none());
    }

    #[tokio::test]
    async fn finished_job_replays_history_then_closes() {
        let store = InMemoryJobStore::new();
        let id = Uuid::new_v4();
        store.get_or_create(id).await;
        let job = JobHandle::new(id, store.clone());
        job.info("Worker picked up command").await;
        job.success("Decode successful").await;
        job.finish(Outcome::success(ResultPayload::Decoded { text: "hi".into() }))
            .await;

        let started = Instant::now();
        let stream = publish(store.clone(), id, fast()).await.unwrap();
        let frames: Vec<_> = tokio::time::timeout(Duration::from_secs(5), stream.collect())
            .await
            .unwrap();
        assert!(started.elapsed() < Duration::from_secs(2));

        let frames = meaningful(frames);
        assert_eq!(frames.len(), 4);
        assert_eq!(
            frames[0],
            StreamFrame::Connected {
                job_id: id,
                retry: Duration::from_millis(3000)
            }
        );
        assert_eq!(frames[1], StreamFrame::Log(LogEntry::info("Worker picked up command")));
        assert_eq!(frames[2], StreamFrame::Log(LogEntry::success("Decode successful")));
        let StreamFrame::Done(done) = &frames[3] else {
            panic!("expected done, got {:?}", frames[3]);
        };
        assert_eq!(done.status, JobStatus::Completed);
        assert!(!done.has_result_artifact);
    }

    #[tokio::test]
    async fn live_job_streams_in_append_order() {
        let store = InMemoryJobStore::new();
        let id = Uuid::new_v4();
        store.get_or_create(id).await;
        let stream = publish(store.clone(), id, fast()).await.unwrap();

        let writer_store: Arc<dyn JobStore> = store.clone();
        tokio::spawn(async move {
            let job = JobHandle::new(id, writer_store);
            for i in 0..30 {
                job.info(format!("line {i}")).await;
                if i % 7 == 0 {
                    tokio::time::sleep(Duration::from_millis(15)).await;
                }
            }
            job.finish(Outcome::failure("Decoding failed")).await;
        });

        let frames: Vec<_> = tokio::time::timeout(Duration::from_secs(5), stream.collect())
            .await
            .unwrap();
        let frames = meaningful(frames);

        let logs: Vec<_> = frames
            .iter()
            .filter_map(|f| match f {
                StreamFrame::Log(entry) => Some(entry.message.clone()),
                _ => None,
            })
            .collect();
        let expected: Vec<_> = (0..30).map(|i| format!("line {i}")).collect();
        assert_eq!(logs, expected);
        assert!(matches!(frames.last(), Some(StreamFrame::Done(d)) if d.status == JobStatus::Failed));
        assert_eq!(
            frames.iter().filter(|f| matches!(f, StreamFrame::Done(_))).count(),
            1
        );
    }

    #[tokio::test]
    async fn idle_job_sends_keepalives() {
        let store = InMemoryJobStore::new();
        let id = Uuid::new_v4();
        store.get_or_create(id).await;
        let mut stream = publish(store.clone(), id, fast()).await.unwrap();

        assert!(matches!(
            stream.next().await,
            Some(StreamFrame::Connected { .. })
        ));
        let next = tokio::time::timeout(Duration::from_secs(1), stream.next())
            .await
            .unwrap();
        assert_eq!(next, Some(StreamFrame::KeepAlive));
    }

    #[tokio::test]
    async fn dropped_subscriber_does_not_touch_job() {
        let store = InMemoryJobStore::new();
        let id = Uuid::new_v4();
        store.get_or_create(id).await;
        let stream = publish(store.clone(), id, fast()).await.unwrap();
        drop(stream);

        tokio::time::sleep(Duration::from_millis(50)).await;
        let job = store.get(id).await.unwrap();
        assert_eq!(job.status, JobStatus::Pending);
        assert!(job.logs.is_empty());
    }
}
