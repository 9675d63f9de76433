use crate::cancel::CancelToken;
use crate::error::LockingError;
use crate::Result;
use crossbeam_channel::{Receiver, RecvTimeoutError, Sender};
use std::any::Any;
use std::cell::Cell;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

type Job = Box<dyn FnOnce() + Send + 'static>;

static WORKER_SEQ: AtomicUsize = AtomicUsize::new(0);

/// A single background thread running submitted tasks one at a time.
pub struct Worker {
    name: String,
    sender: Mutex<Option<Sender<Job>>>,
    cancel: CancelToken,
    exited: Receiver<()>,
    handle: Mutex<Option<JoinHandle<()>>>,
}

impl Worker {
    pub fn spawn(name: &str) -> Result<Worker> {
        let name = format!("{}-{}", name, WORKER_SEQ.fetch_add(1, Ordering::Relaxed));
        let (sender, receiver) = crossbeam_channel::unbounded::<Job>();
        let (exit_sender, exited) = crossbeam_channel::bounded(1);
        let cancel = CancelToken::new();
        let token = cancel.clone();

        let handle = thread::Builder::new().name(name.clone()).spawn(move || {
            let _installed = token.install();
            let name = thread::current().name().unwrap_or_default().to_owned();
            info!("thread `{}` start!", name);
            while let Ok(job) = receiver.recv() {
                if token.is_cancelled() {
                    debug!("thread `{}` drops a pending task", name);
                    continue;
                }
                job();
            }
            info!("thread `{}` exit!", name);
            let _ = exit_sender.send(());
        })?;

        Ok(Worker {
            name,
            sender: Mutex::new(Some(sender)),
            cancel,
            exited,
            handle: Mutex::new(Some(handle)),
        })
    }

    #[inline]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Queues `work` and returns its handle at once.
    pub fn submit<T, F>(&self, work: F) -> Result<TaskHandle<T>>
    where
        T: Send + 'static,
        F: FnOnce() -> Result<T> + Send + 'static,
    {
        let submitted = Instant::now();
        let (result_sender, receiver) = crossbeam_channel::bounded(1);
        let done_at = Arc::new(Mutex::new(None));
        let guard = DoneGuard {
            done_at: done_at.clone(),
        };
        let job: Job = Box::new(move || {
            let result = panic::catch_unwind(AssertUnwindSafe(work)).unwrap_or_else(|payload| {
                let message = panic_message(payload.as_ref());
                error!(
                    "task panicked in thread `{}`: {}",
                    thread::current().name().unwrap_or_default(),
                    message
                );
                Err(LockingError::WorkerPanicked(message))
            });
            drop(guard);
            let _ = result_sender.send(result);
        });

        let sender = self.sender.lock().unwrap();
        match sender.as_ref() {
            Some(sender) => sender.send(job).map_err(|_| LockingError::WorkerShutdown)?,
            None => return Err(LockingError::WorkerShutdown),
        }
        Ok(TaskHandle {
            receiver,
            done_at,
            submitted,
            taken: Cell::new(false),
        })
    }

    /// Stops accepting tasks. Queued tasks still run.
    pub fn shutdown(&self) {
        if self.sender.lock().unwrap().take().is_some() {
            debug!("worker `{}` shutdown", self.name);
        }
    }

    /// Stops accepting tasks, drops queued ones and interrupts the running one.
    pub fn shutdown_now(&self) {
        self.cancel.cancel();
        self.sender.lock().unwrap().take();
        debug!("worker `{}` shutdown now", self.name);
    }

    pub fn is_shutdown(&self) -> bool {
        self.sender.lock().unwrap().is_none()
    }

    /// Waits for the thread to exit. Returns false if it is still running
    /// after `timeout`.
    pub fn await_termination(&self, timeout: Duration) -> bool {
        match self.exited.recv_timeout(timeout) {
            Err(RecvTimeoutError::Timeout) => false,
            Ok(()) | Err(RecvTimeoutError::Disconnected) => {
                if let Some(handle) = self.handle.lock().unwrap().take() {
                    if handle.join().is_err() {
                        warn!("worker `{}` panicked", self.name);
                    }
                }
                true
            }
        }
    }
}

impl Drop for Worker {
    fn drop(&mut self) {
        self.shutdown_now();
    }
}

/// Records when a task finished. Dropped by the worker after the task ran,
/// or together with a task that never ran.
struct DoneGuard {
    done_at: Arc<Mutex<Option<Instant>>>,
}

impl Drop for DoneGuard {
    fn drop(&mut self) {
        *self.done_at.lock().unwrap() = Some(Instant::now());
    }
}

/// Handle on a submitted task.
pub struct TaskHandle<T> {
    receiver: Receiver<Result<T>>,
    done_at: Arc<Mutex<Option<Instant>>>,
    submitted: Instant,
    taken: Cell<bool>,
}

impl<T> TaskHandle<T> {
    /// Waits at most `timeout` for the result.
    ///
    /// On `HarnessTimeout` the task keeps running and the handle can be
    /// asked again.
    pub fn get(&self, timeout: Duration) -> Result<T> {
        if self.taken.get() {
            return Err(LockingError::ResultTaken);
        }
        match self.receiver.recv_timeout(timeout) {
            Ok(result) => {
                self.taken.set(true);
                result
            }
            Err(RecvTimeoutError::Timeout) => Err(LockingError::HarnessTimeout(timeout)),
            Err(RecvTimeoutError::Disconnected) => {
                self.taken.set(true);
                Err(LockingError::Cancelled)
            }
        }
    }

    pub fn is_done(&self) -> bool {
        self.done_at.lock().unwrap().is_some()
    }

    /// Time from submission to completion, or until now if still running.
    pub fn elapsed(&self) -> Duration {
        match *self.done_at.lock().unwrap() {
            Some(at) => at.saturating_duration_since(self.submitted),
            None => self.submitted.elapsed(),
        }
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_owned()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_owned()
    }
}
