//! Per-path FIFO serialization of file-mutating tasks.
//!
//! Each path gets a lane with a worker draining queued tasks in submission
//! order; a failed task settles its own receiver and never blocks the next
//! one. Lanes are torn down once drained, so the map stays small.

use futures::future::BoxFuture;
use futures::FutureExt as _;
use std::collections::HashMap;
use std::future::Future;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use tokio::sync::{mpsc, oneshot};

type Job = BoxFuture<'static, ()>;

struct Lane {
    sender: mpsc::UnboundedSender<Job>,
    pending: usize,
}

type Lanes = Arc<Mutex<HashMap<PathBuf, Lane>>>;

#[derive(Clone, Default)]
pub struct FileQueue {
    lanes: Lanes,
}

impl FileQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append `task` to the path's lane. The returned receiver settles with
    /// the task's output once it has run; tasks on the same path run strictly
    /// one at a time, in submission order.
    pub fn enqueue<F, T>(&self, path: &Path, task: F) -> oneshot::Receiver<T>
    where
        F: Future<Output = T> + Send + 'static,
        T: Send + 'static,
    {
        let (done, receiver) = oneshot::channel();
        let job: Job = async move {
            let output = task.await;
            // the caller may have gone away; that is not our problem
            let _ignore_result = done.send(output);
        }
        .boxed();

        let mut lanes = self.lanes.lock().expect("file queue mutex");
        match lanes.get_mut(path) {
            Some(lane) => {
                lane.pending += 1;
                let _ignore_result = lane.sender.send(job);
            }
            None => {
                let (sender, jobs) = mpsc::unbounded_channel();
                let _ignore_result = sender.send(job);
                lanes.insert(
                    path.to_path_buf(),
                    Lane { sender, pending: 1 },
                );
                tokio::spawn(drain_lane(path.to_path_buf(), jobs, Arc::clone(&self.lanes)));
            }
        }
        receiver
    }

    /// Number of live lanes (paths with unfinished work).
    pub fn active_paths(&self) -> usize {
        self.lanes.lock().expect("file queue mutex").len()
    }
}

async fn drain_lane(path: PathBuf, mut jobs: mpsc::UnboundedReceiver<Job>, lanes: Lanes) {
    while let Some(job) = jobs.recv().await {
        job.await;
        let mut map = lanes.lock().expect("file queue mutex");
        if let Some(lane) = map.get_mut(&path) {
            lane.pending -= 1;
            if lane.pending == 0 {
                // dropping the lane drops the sender, ending this worker
                map.remove(&path);
                return;
            }
        }
    }
}
