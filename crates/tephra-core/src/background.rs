//! Background task processor.
//!
//! One worker thread consuming boxed tasks in submission order. The WAL
//! manager submits checkpoint tasks through the `BackgroundExecutor`
//! seam.

use std::sync::mpsc::{Receiver, Sender};
use std::thread::JoinHandle;

use parking_lot::Mutex;
use tephra_error::{Result, TephraError};
use tephra_wal::BackgroundExecutor;
use tracing::{debug, info};

enum BgMsg {
    Run(Box<dyn FnOnce() + Send>),
    Shutdown,
}

/// Single-worker background executor.
#[derive(Default)]
pub struct BackgroundProcessor {
    sender: Mutex<Option<Sender<BgMsg>>>,
    join: Mutex<Option<JoinHandle<()>>>,
}

impl BackgroundProcessor {
    /// Construct a stopped processor.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Start the worker thread. Idempotent.
    pub fn start(&self) -> Result<()> {
        let mut sender = self.sender.lock();
        if sender.is_some() {
            return Ok(());
        }
        let (tx, rx) = std::sync::mpsc::channel();
        let join = std::thread::Builder::new()
            .name("tephra-bg".to_owned())
            .spawn(move || worker_loop(&rx))
            .map_err(TephraError::Io)?;
        *sender = Some(tx);
        *self.join.lock() = Some(join);
        info!("background processor started");
        Ok(())
    }

    /// Drain queued tasks and stop the worker. Idempotent.
    pub fn stop(&self) -> Result<()> {
        let Some(sender) = self.sender.lock().take() else {
            return Ok(());
        };
        let _ = sender.send(BgMsg::Shutdown);
        if let Some(join) = self.join.lock().take() {
            if join.join().is_err() {
                return Err(TephraError::internal("background worker panicked"));
            }
        }
        info!("background processor stopped");
        Ok(())
    }
}

impl BackgroundExecutor for BackgroundProcessor {
    fn submit(&self, task: Box<dyn FnOnce() + Send>) {
        let sender = self.sender.lock();
        match sender.as_ref() {
            Some(sender) => {
                if sender.send(BgMsg::Run(task)).is_err() {
                    debug!("background worker gone, dropping task");
                }
            }
            None => debug!("background processor not running, dropping task"),
        }
    }
}

fn worker_loop(receiver: &Receiver<BgMsg>) {
    while let Ok(msg) = receiver.recv() {
        match msg {
            BgMsg::Run(task) => task(),
            BgMsg::Shutdown => break,
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;
    use std::time::Duration;

    use super::*;

    #[test]
    fn runs_tasks_in_order() {
        let bg = BackgroundProcessor::new();
        bg.start().expect("start");
        let counter = Arc::new(AtomicU32::new(0));
        for i in 0..4u32 {
            let counter = Arc::clone(&counter);
            bg.submit(Box::new(move || {
                // Each task observes all prior tasks done.
                assert_eq!(counter.load(Ordering::SeqCst), i);
                counter.fetch_add(1, Ordering::SeqCst);
            }));
        }
        for _ in 0..500 {
            if counter.load(Ordering::SeqCst) == 4 {
                break;
            }
            std::thread::sleep(Duration::from_millis(2));
        }
        assert_eq!(counter.load(Ordering::SeqCst), 4);
        bg.stop().expect("stop");
    }

    #[test]
    fn submit_after_stop_is_dropped() {
        let bg = BackgroundProcessor::new();
        bg.start().expect("start");
        bg.stop().expect("stop");
        bg.submit(Box::new(|| panic!("must not run")));
        bg.stop().expect("stop twice");
    }
}
