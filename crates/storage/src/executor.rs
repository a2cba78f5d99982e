//! Single-writer command executor.
//!
//! One worker task owns the [`Stores`] and runs submitted units strictly in
//! FIFO order. A unit's effects are complete before the next one starts.
//! Stopping drains the queue: nothing accepted is ever cancelled.
//! Synchronous submissions get the unit's result back; asynchronous ones
//! only have failures logged by the worker.

use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use futures::future::BoxFuture;
use futures::FutureExt;
use tokio::sync::{mpsc, oneshot, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::stores::Stores;
use crate::{Result, StorageError};

/// Future returned by a unit of work, borrowing the worker's stores
pub type UnitFuture<'a, T> = BoxFuture<'a, Result<T>>;

type Job = Box<dyn for<'a> FnOnce(&'a mut Stores) -> BoxFuture<'a, ()> + Send>;

/// Commands sent to the worker
enum Command {
    Run { name: String, job: Job },
    Shutdown,
}

struct Shared {
    tx: mpsc::Sender<Command>,
    stopping: Arc<AtomicBool>,
    worker: Mutex<Option<JoinHandle<()>>>,
}

/// Handle to the storage worker. Clones share the same worker.
#[derive(Clone)]
pub struct CommandExecutor {
    shared: Arc<Shared>,
}

impl CommandExecutor {
    /// Spawn the worker on the current tokio runtime
    pub fn spawn(queue_capacity: usize) -> Self {
        let (tx, rx) = mpsc::channel(queue_capacity.max(1));
        let stopping = Arc::new(AtomicBool::new(false));
        let worker = tokio::spawn(run(rx));
        Self {
            shared: Arc::new(Shared {
                tx,
                stopping,
                worker: Mutex::new(Some(worker)),
            }),
        }
    }

    /// Run a unit and wait for its result.
    ///
    /// Errors returned by the unit, and panics inside it, are propagated to
    /// the caller.
    pub async fn execute<T, F>(&self, name: &str, unit: F) -> Result<T>
    where
        T: Send + 'static,
        F: for<'a> FnOnce(&'a mut Stores) -> UnitFuture<'a, T> + Send + 'static,
    {
        let (reply_tx, reply_rx) = oneshot::channel();
        let job = wrap(name.to_string(), unit, move |result| {
            // Caller may have given up waiting
            let _ = reply_tx.send(result);
        });
        self.enqueue(name, job).await?;
        reply_rx.await.map_err(|_| StorageError::ExecutorStopped)?
    }

    /// Queue a unit without waiting for it to run. Failures are logged by
    /// the worker and otherwise discarded.
    pub async fn submit<F>(&self, name: &str, unit: F) -> Result<()>
    where
        F: for<'a> FnOnce(&'a mut Stores) -> UnitFuture<'a, ()> + Send + 'static,
    {
        let unit_name = name.to_string();
        let job = wrap(name.to_string(), unit, move |result| {
            if let Err(e) = result {
                error!(error = %e, "Asynchronous command {} failed", unit_name);
            }
        });
        self.enqueue(name, job).await
    }

    async fn enqueue(&self, name: &str, job: Job) -> Result<()> {
        if self.shared.stopping.load(Ordering::Acquire) {
            return Err(StorageError::ExecutorStopped);
        }
        self.shared
            .tx
            .send(Command::Run {
                name: name.to_string(),
                job,
            })
            .await
            .map_err(|_| StorageError::ExecutorStopped)
    }

    /// Whether new units are still accepted
    pub fn is_running(&self) -> bool {
        !self.shared.stopping.load(Ordering::Acquire) && !self.shared.tx.is_closed()
    }

    /// Stop the worker and wait for it to exit.
    ///
    /// Submissions are rejected from this point on. Every unit accepted
    /// before the call still runs, in order, before the worker exits and
    /// closes the open stores.
    pub async fn shutdown(&self) {
        if !self.shared.stopping.swap(true, Ordering::AcqRel) {
            info!("Stopping command executor");
            // Queued behind every accepted unit
            let _ = self.shared.tx.send(Command::Shutdown).await;
        }

        let worker = self.shared.worker.lock().await.take();
        if let Some(worker) = worker {
            if let Err(e) = worker.await {
                error!(error = %e, "Command executor task failed");
            }
        }
    }
}

/// Box a typed unit into a job that reports its outcome through `done`
fn wrap<T, F, D>(name: String, unit: F, done: D) -> Job
where
    T: Send + 'static,
    F: for<'a> FnOnce(&'a mut Stores) -> UnitFuture<'a, T> + Send + 'static,
    D: FnOnce(Result<T>) + Send + 'static,
{
    job(move |stores| {
        Box::pin(async move {
            let result = match AssertUnwindSafe(async move { unit(stores).await })
                .catch_unwind()
                .await
            {
                Ok(result) => result,
                Err(panic) => {
                    let reason = panic_reason(panic);
                    error!("Command {} panicked: {}", name, reason);
                    Err(StorageError::CommandFailed { name, reason })
                }
            };
            done(result);
        })
    })
}

fn job<F>(f: F) -> Job
where
    F: for<'a> FnOnce(&'a mut Stores) -> BoxFuture<'a, ()> + Send + 'static,
{
    Box::new(f)
}

fn panic_reason(panic: Box<dyn Any + Send>) -> String {
    if let Some(message) = panic.downcast_ref::<&str>() {
        message.to_string()
    } else if let Some(message) = panic.downcast_ref::<String>() {
        message.clone()
    } else {
        "unit panicked".to_string()
    }
}

async fn run(mut rx: mpsc::Receiver<Command>) {
    info!("Command executor started");
    let mut stores = Stores::new();

    while let Some(command) = rx.recv().await {
        match command {
            Command::Run { name, job } => {
                debug!("Running command {}", name);
                job(&mut stores).await;
            }
            Command::Shutdown => break,
        }
    }

    // Units that passed the stop check while the sentinel was being sent
    rx.close();
    let mut late = 0usize;
    while let Ok(command) = rx.try_recv() {
        if let Command::Run { name, job } = command {
            debug!("Running late command {}", name);
            job(&mut stores).await;
            late += 1;
        }
    }
    if late > 0 {
        warn!("Ran {} commands queued behind shutdown", late);
    }

    stores.close_all().await;
    info!("Command executor stopped");
}
