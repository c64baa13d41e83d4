// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! Ordered asynchronous work queue.
//!
//! An [`ExecutionStream`] runs submitted jobs one at a time, in submission
//! order, on a dedicated worker thread. Submission never blocks;
//! [`ExecutionStream::synchronize`] resolves once everything submitted
//! before it has finished. After a job fails, later jobs are skipped until
//! the next synchronisation point reports the error.

use std::thread::JoinHandle;

use tokio::sync::{mpsc, oneshot};
use tracing::{debug, warn};

use crate::RuntimeError;

type Job = Box<dyn FnOnce() -> Result<(), RuntimeError> + Send>;

enum Command {
    Run(Job),
    Fence(oneshot::Sender<Option<RuntimeError>>),
}

pub struct ExecutionStream {
    name: String,
    tx: Option<mpsc::UnboundedSender<Command>>,
    worker: Option<JoinHandle<()>>,
}

impl ExecutionStream {
    /// Starts the worker thread.
    pub fn new(name: &str) -> Result<Self, RuntimeError> {
        let (tx, mut rx) = mpsc::unbounded_channel::<Command>();
        let worker = std::thread::Builder::new()
            .name(format!("edge-rt-{name}"))
            .spawn(move || {
                let mut failed: Option<RuntimeError> = None;
                while let Some(cmd) = rx.blocking_recv() {
                    match cmd {
                        Command::Run(job) => {
                            if failed.is_some() {
                                continue;
                            }
                            if let Err(e) = job() {
                                warn!(error = %e, "stream job failed");
                                failed = Some(e);
                            }
                        }
                        Command::Fence(done) => {
                            let _ = done.send(failed.take());
                        }
                    }
                }
            })?;
        debug!(stream = name, "execution stream started");
        Ok(Self {
            name: name.to_string(),
            tx: Some(tx),
            worker: Some(worker),
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    fn send(&self, cmd: Command) -> Result<(), RuntimeError> {
        self.tx
            .as_ref()
            .ok_or(RuntimeError::StreamClosed)?
            .send(cmd)
            .map_err(|_| RuntimeError::StreamClosed)
    }

    /// Queues `job` behind all earlier work.
    pub fn enqueue<F>(&self, job: F) -> Result<(), RuntimeError>
    where
        F: FnOnce() -> Result<(), RuntimeError> + Send + 'static,
    {
        self.send(Command::Run(Box::new(job)))
    }

    /// Waits for all queued work; returns the first failure since the last
    /// synchronisation.
    pub async fn synchronize(&self) -> Result<(), RuntimeError> {
        let (done, wait) = oneshot::channel();
        self.send(Command::Fence(done))?;
        match wait.await {
            Ok(None) => Ok(()),
            Ok(Some(e)) => Err(e),
            Err(_) => Err(RuntimeError::StreamClosed),
        }
    }

    /// Blocking form of [`ExecutionStream::synchronize`]. Must not be
    /// called from inside an async runtime.
    pub fn synchronize_blocking(&self) -> Result<(), RuntimeError> {
        let (done, wait) = oneshot::channel();
        self.send(Command::Fence(done))?;
        match wait.blocking_recv() {
            Ok(None) => Ok(()),
            Ok(Some(e)) => Err(e),
            Err(_) => Err(RuntimeError::StreamClosed),
        }
    }
}

impl Drop for ExecutionStream {
    fn drop(&mut self) {
        self.tx.take();
        if let Some(worker) = self.worker.take() {
            if worker.join().is_err() {
                warn!(stream = %self.name, "stream worker panicked");
            }
        }
    }
}

impl std::fmt::Debug for ExecutionStream {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ExecutionStream")
            .field("name", &self.name)
            .field("open", &self.tx.is_some())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Arc, Mutex};

    #[tokio::test]
    async fn test_jobs_run_in_order() {
        let stream = ExecutionStream::new("order").unwrap();
        let log = Arc::new(Mutex::new(Vec::new()));
        for i in 0..5 {
            let log = Arc::clone(&log);
            stream
                .enqueue(move || {
                    log.lock().unwrap().push(i);
                    Ok(())
                })
                .unwrap();
        }
        stream.synchronize().await.unwrap();
        assert_eq!(*log.lock().unwrap(), vec![0, 1, 2, 3, 4]);
    }

    #[tokio::test]
    async fn test_error_reported_once() {
        let stream = ExecutionStream::new("errors").unwrap();
        let ran = Arc::new(Mutex::new(false));
        stream
            .enqueue(|| Err(RuntimeError::Structural("boom".into())))
            .unwrap();
        let flag = Arc::clone(&ran);
        stream
            .enqueue(move || {
                *flag.lock().unwrap() = true;
                Ok(())
            })
            .unwrap();
        assert!(stream.synchronize().await.is_err());
        assert!(!*ran.lock().unwrap());
        assert!(stream.synchronize().await.is_ok());
    }

    #[test]
    fn test_blocking_synchronize() {
        let stream = ExecutionStream::new("blocking").unwrap();
        stream.enqueue(|| Ok(())).unwrap();
        assert!(stream.synchronize_blocking().is_ok());
    }
}
