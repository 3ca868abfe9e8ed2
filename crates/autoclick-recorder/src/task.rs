//! Background tasks - a worker thread reporting back over a channel
//!
//! Long operations (playback, image-click routines) run on their own
//! thread. The caller keeps a [`TaskHandle`] to stop the work and to
//! receive progress and the final result.

use autoclick_core::{Error, Result, StopSignal};
use crossbeam_channel::{unbounded, Receiver, RecvTimeoutError, Sender};
use std::thread;
use std::time::Duration;

#[derive(Debug)]
pub enum TaskMessage<T> {
    Progress(String),
    Finished(Result<T>),
}

/// Worker-side view of a task
pub struct TaskContext<T> {
    tx: Sender<TaskMessage<T>>,
    stop: StopSignal,
}

impl<T> TaskContext<T> {
    pub fn progress(&self, message: impl Into<String>) {
        let _ = self.tx.send(TaskMessage::Progress(message.into()));
    }

    pub fn stop_signal(&self) -> &StopSignal {
        &self.stop
    }

    pub fn is_stopped(&self) -> bool {
        self.stop.is_stopped()
    }
}

pub struct TaskHandle<T> {
    name: String,
    rx: Receiver<TaskMessage<T>>,
    stop: StopSignal,
    thread: Option<thread::JoinHandle<()>>,
}

/// Run `work` on a named worker thread
pub fn spawn<T, F>(name: &str, work: F) -> Result<TaskHandle<T>>
where
    T: Send + 'static,
    F: FnOnce(&TaskContext<T>) -> Result<T> + Send + 'static,
{
    let (tx, rx) = unbounded();
    let stop = StopSignal::new();
    let ctx = TaskContext {
        tx,
        stop: stop.clone(),
    };
    let task_name = name.to_string();
    let thread = thread::Builder::new().name(name.to_string()).spawn(move || {
        tracing::debug!(task = %task_name, "task started");
        let result = work(&ctx);
        if let Err(e) = &result {
            tracing::debug!(task = %task_name, error = %e, "task failed");
        }
        let _ = ctx.tx.send(TaskMessage::Finished(result));
    })?;
    Ok(TaskHandle {
        name: name.to_string(),
        rx,
        stop,
        thread: Some(thread),
    })
}

impl<T> TaskHandle<T> {
    /// Ask the worker to stop at its next check
    pub fn stop(&self) {
        self.stop.stop();
    }

    pub fn stop_signal(&self) -> StopSignal {
        self.stop.clone()
    }

    pub fn receiver(&self) -> &Receiver<TaskMessage<T>> {
        &self.rx
    }

    pub fn try_recv(&self) -> Option<TaskMessage<T>> {
        self.rx.try_recv().ok()
    }

    pub fn recv_timeout(&self, timeout: Duration) -> Option<TaskMessage<T>> {
        self.rx.recv_timeout(timeout).ok()
    }

    /// Block until the task finishes, handing progress to `on_progress`
    pub fn wait_with(mut self, mut on_progress: impl FnMut(&str)) -> Result<T> {
        loop {
            match self.rx.recv_timeout(Duration::from_millis(100)) {
                Ok(TaskMessage::Progress(msg)) => on_progress(&msg),
                Ok(TaskMessage::Finished(result)) => {
                    self.join();
                    return result;
                }
                Err(RecvTimeoutError::Timeout) => continue,
                Err(RecvTimeoutError::Disconnected) => {
                    self.join();
                    return Err(Error::invalid_state(format!(
                        "task '{}' ended without reporting a result",
                        self.name
                    )));
                }
            }
        }
    }

    pub fn wait(self) -> Result<T> {
        self.wait_with(|msg| tracing::info!("{}", msg))
    }

    fn join(&mut self) {
        if let Some(t) = self.thread.take() {
            if t.join().is_err() {
                tracing::error!(task = %self.name, "task panicked");
            }
        }
    }
}
