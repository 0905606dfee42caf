use log::{debug, info, trace};
use parking_lot::{Condvar, Mutex};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use crate::config::EngineConfig;
use crate::error::{FlowError, Result};

use super::pair::Readiness;
use super::OutputInputPair;

#[derive(Default)]
struct ControlState {
    paused: Mutex<bool>,
    resumed: Condvar,
    stopped: AtomicBool,
    completed: AtomicBool,
}

/// Cloneable remote for a running [`CommandProcessor`].
///
/// Pause blocks the scheduler before its next handler; stop and completion
/// are flags the loop observes between handlers.
#[derive(Clone, Default)]
pub struct ProcessorControl {
    inner: Arc<ControlState>,
}

impl ProcessorControl {
    /// Control for a processor not yet running.
    pub fn new() -> Self {
        Self::default()
    }

    /// Blocks the loop before its next handler.
    pub fn pause(&self) {
        *self.inner.paused.lock() = true;
    }

    /// Releases a paused loop.
    pub fn resume(&self) {
        let mut paused = self.inner.paused.lock();
        *paused = false;
        self.inner.resumed.notify_all();
    }

    /// Ends the run before the next handler.
    pub fn stop(&self) {
        self.inner.stopped.store(true, Ordering::SeqCst);
        // wake a paused loop so it can observe the flag
        let _paused = self.inner.paused.lock();
        self.inner.resumed.notify_all();
    }

    /// Marks the run finished. Called by the sink once it drained.
    pub fn complete(&self) {
        self.inner.completed.store(true, Ordering::SeqCst);
    }

    /// Whether pause is requested.
    pub fn is_paused(&self) -> bool {
        *self.inner.paused.lock()
    }

    /// Whether stop was requested.
    pub fn is_stopped(&self) -> bool {
        self.inner.stopped.load(Ordering::SeqCst)
    }

    /// Whether the sink reported completion.
    pub fn is_completed(&self) -> bool {
        self.inner.completed.load(Ordering::SeqCst)
    }

    fn should_exit(&self) -> bool {
        self.is_stopped() || self.is_completed()
    }

    fn wait_while_paused(&self) {
        let mut paused = self.inner.paused.lock();
        while *paused && !self.is_stopped() {
            self.inner.resumed.wait(&mut paused);
        }
    }
}

/// How a [`CommandProcessor::process`] run ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProcessOutcome {
    /// The sink drained every connected plugin.
    Completed,
    /// [`ProcessorControl::stop`] was called.
    Stopped,
}

/// The scheduler: a cooperative loop over every registered pair.
pub struct CommandProcessor {
    pairs: Vec<OutputInputPair>,
    control: ProcessorControl,
    idle_backoff: Duration,
    stall_limit: Option<u64>,
}

impl CommandProcessor {
    /// Processor with default configuration.
    pub fn new() -> Self {
        Self::with_config(&EngineConfig::default())
    }

    /// Processor using `config`'s backoff and stall limit.
    pub fn with_config(config: &EngineConfig) -> Self {
        Self {
            pairs: Vec::new(),
            control: ProcessorControl::new(),
            idle_backoff: config.idle_backoff,
            stall_limit: config.stall_limit,
        }
    }

    /// Registers an edge. At most one pair may exist per producer/consumer.
    pub fn add(&mut self, pair: OutputInputPair) -> Result<()> {
        if self
            .pairs
            .iter()
            .any(|existing| existing.connects(pair.output(), pair.input()))
        {
            return Err(FlowError::DuplicatePair);
        }
        debug!(
            "registered pair {:?} -> {:?} with handlers {:?}",
            pair.output(),
            pair.input(),
            pair.handlers()
        );
        self.pairs.push(pair);
        Ok(())
    }

    /// Registered edges in dispatch order.
    pub fn pairs(&self) -> &[OutputInputPair] {
        &self.pairs
    }

    /// Remote for pausing, resuming and stopping from other threads.
    pub fn control(&self) -> ProcessorControl {
        self.control.clone()
    }

    /// Same as `control().pause()`.
    pub fn pause(&self) {
        self.control.pause();
    }

    /// Same as `control().resume()`.
    pub fn resume(&self) {
        self.control.resume();
    }

    /// Same as `control().stop()`.
    pub fn stop(&self) {
        self.control.stop();
    }

    /// Runs until the sink completes or the processor is stopped.
    pub fn process(&mut self) -> Result<ProcessOutcome> {
        info!("processing {} pairs", self.pairs.len());
        for pair in &self.pairs {
            pair.fill_command_queues()?;
        }

        let mut idle_sweeps = 0u64;
        loop {
            if self.control.is_completed() {
                info!("processing completed");
                return Ok(ProcessOutcome::Completed);
            }
            if self.control.is_stopped() {
                info!("processing stopped");
                return Ok(ProcessOutcome::Stopped);
            }
            self.control.wait_while_paused();

            if self.tick()? {
                idle_sweeps = 0;
                continue;
            }
            idle_sweeps += 1;
            if let Some(limit) = self.stall_limit {
                if idle_sweeps >= limit {
                    return Err(FlowError::Stalled(idle_sweeps));
                }
            }
            if !self.idle_backoff.is_zero() {
                thread::sleep(self.idle_backoff);
            }
        }
    }

    /// One sweep over every pair. Returns whether anything moved.
    pub fn tick(&mut self) -> Result<bool> {
        let mut progressed = false;
        for pair in &self.pairs {
            if self.control.should_exit() {
                break;
            }
            progressed |= Self::process_pair(pair, &self.control)?;
        }
        Ok(progressed)
    }

    fn process_pair(pair: &OutputInputPair, control: &ProcessorControl) -> Result<bool> {
        pair.fill_command_queues()?;
        let mut progressed = false;
        loop {
            match pair.readiness() {
                Readiness::Idle => break,
                Readiness::NextPair => {
                    pair.consume_next_pair();
                    progressed = true;
                    break;
                }
                Readiness::Dispatch(output, input, track) => {
                    control.wait_while_paused();
                    if control.should_exit() {
                        break;
                    }
                    trace!(
                        "{:?} -> {:?}: {:?}/{:?} on track {}",
                        pair.output(),
                        pair.input(),
                        output,
                        input,
                        track
                    );
                    let mut handler = pair.take_handler(output, input)?;
                    handler.handle()?;
                    progressed = true;
                }
            }
        }
        Ok(progressed)
    }
}

impl Default for CommandProcessor {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests;
