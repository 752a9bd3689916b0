use std::path::{Path, PathBuf};
use std::sync::mpsc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use runstop::slot::SlotId;
use runstop::{Coordinator, CoordinatorBuilder, Role};

/// How a fake program reacts to its signal entry appearing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OnSignal {
    /// Finish right away.
    Finish,
    /// Finish after a delay.
    FinishAfter(Duration),
    /// Keep running until told otherwise.
    Ignore,
}

/// A run task living on its own thread: it claims a slot, watches for its
/// signal entry like a compliant program would, and calls `task_finished`.
pub struct FakeRunTask {
    slot: SlotId,
    signal: PathBuf,
    release: Option<mpsc::Sender<()>>,
    handle: Option<JoinHandle<runstop::Result<()>>>,
}

impl FakeRunTask {
    /// Claim a slot through `builder` and start watching.
    pub fn start(builder: CoordinatorBuilder, on_signal: OnSignal) -> runstop::Result<Self> {
        let mut coordinator = builder.build(Role::Run)?;
        let signal = coordinator.prepare_to_run()?;
        let slot = coordinator.slot();

        let (tx, rx) = mpsc::channel();
        let watched = signal.clone();
        let handle = thread::spawn(move || watch(coordinator, &watched, on_signal, rx));

        Ok(Self {
            slot,
            signal,
            release: Some(tx),
            handle: Some(handle),
        })
    }

    pub fn slot(&self) -> SlotId {
        self.slot
    }

    pub fn signal_path(&self) -> &Path {
        &self.signal
    }

    /// Finish now, whether or not a stop was requested.
    pub fn finish(mut self) -> runstop::Result<()> {
        self.join()
    }

    /// Wait for the task to finish on its own.
    pub fn wait(mut self) -> runstop::Result<()> {
        let handle = self.handle.take().expect("task already joined");
        let result = handle.join().expect("fake run task panicked");
        self.release.take();
        result
    }

    fn join(&mut self) -> runstop::Result<()> {
        self.release.take();
        match self.handle.take() {
            Some(handle) => handle.join().expect("fake run task panicked"),
            None => Ok(()),
        }
    }
}

impl Drop for FakeRunTask {
    fn drop(&mut self) {
        let _ = self.join();
    }
}

fn watch(
    mut coordinator: Coordinator,
    signal: &Path,
    on_signal: OnSignal,
    release: mpsc::Receiver<()>,
) -> runstop::Result<()> {
    loop {
        match release.recv_timeout(Duration::from_millis(10)) {
            Ok(()) | Err(mpsc::RecvTimeoutError::Disconnected) => break,
            Err(mpsc::RecvTimeoutError::Timeout) => {}
        }

        if signal.exists() {
            match on_signal {
                OnSignal::Finish => break,
                OnSignal::FinishAfter(delay) => {
                    thread::sleep(delay);
                    break;
                }
                OnSignal::Ignore => {}
            }
        }
    }
    coordinator.task_finished()
}
