// Single-worker command scheduler
//
// Callers (buttons, remote tools) only produce requests. One worker thread
// owns the servo driver and drains a bounded FIFO, so no two actions ever
// interleave their servo writes.

use crossbeam_channel::{Receiver, SendTimeoutError, Sender, bounded};
use std::sync::atomic::{AtomicBool, AtomicU8, AtomicUsize, Ordering};
use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError};
use std::thread::{self, JoinHandle};
use std::time::Duration;
use tracing::{debug, error, info, warn};

use crate::actions::{self, ActionId, ActionOutcome, ActionParams, ActionRequest};
use crate::config::{COMMAND_QUEUE_CAPACITY, ENQUEUE_TIMEOUT, PREEMPT_GRACE, WORKER_THREAD_NAME};
use crate::messages::ControllerHealth;
use crate::servo::{PulseOutput, ServoDriver, SharedPose};

/// Error types for the scheduler
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum SchedulerError {
    #[error("Pet controller is not initialized")]
    NotInitialized,

    #[error("Command queue full ({capacity} pending)")]
    QueueFull { capacity: usize },

    #[error("Pet controller stopped after a servo fault")]
    Faulted,
}

pub type Result<T> = std::result::Result<T, SchedulerError>;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SchedulerConfig {
    pub queue_capacity: usize,
    /// How long enqueue waits for room in a full queue
    pub enqueue_timeout: Duration,
    /// How long perform waits for a running action to acknowledge a stop
    pub preempt_grace: Duration,
    pub thread_name: String,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            queue_capacity: COMMAND_QUEUE_CAPACITY,
            enqueue_timeout: ENQUEUE_TIMEOUT,
            preempt_grace: PREEMPT_GRACE,
            thread_name: WORKER_THREAD_NAME.to_string(),
        }
    }
}

/// Run state shared between callers and the worker.
///
/// The worker is the only writer of `current` and `running`; anyone may
/// raise `stop`. `signal` wakes threads waiting for the worker to go idle.
#[derive(Debug)]
pub struct ActionRunState {
    current: AtomicU8,
    running: AtomicBool,
    stop: AtomicBool,
    faulted: AtomicBool,
    shutdown: AtomicBool,
    /// Requests submitted and not yet finished by the worker
    pending: AtomicUsize,
    signal_lock: Mutex<()>,
    signal: Condvar,
}

impl Default for ActionRunState {
    fn default() -> Self {
        Self {
            current: AtomicU8::new(ActionId::Upright.id()),
            running: AtomicBool::new(false),
            stop: AtomicBool::new(false),
            faulted: AtomicBool::new(false),
            shutdown: AtomicBool::new(false),
            pending: AtomicUsize::new(0),
            signal_lock: Mutex::new(()),
            signal: Condvar::new(),
        }
    }
}

impl ActionRunState {
    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }

    pub fn current(&self) -> ActionId {
        ActionId::try_from(self.current.load(Ordering::Acquire) as i64).unwrap_or(ActionId::Upright)
    }

    pub fn stop_requested(&self) -> bool {
        self.stop.load(Ordering::Acquire)
    }

    pub fn request_stop(&self) {
        self.stop.store(true, Ordering::Release);
    }

    pub fn is_faulted(&self) -> bool {
        self.faulted.load(Ordering::Acquire)
    }

    fn stop_flag(&self) -> &AtomicBool {
        &self.stop
    }

    // Idle -> Running. A shutdown that lands after the dequeue keeps the
    // stop raised; SeqCst pairs these with the stores in shut_down().
    fn begin(&self, action: ActionId) {
        self.current.store(action.id(), Ordering::Release);
        self.stop.store(false, Ordering::SeqCst);
        if self.shutdown.load(Ordering::SeqCst) {
            self.stop.store(true, Ordering::SeqCst);
        }
        self.running.store(true, Ordering::Release);
    }

    fn shut_down(&self) {
        self.shutdown.store(true, Ordering::SeqCst);
        self.stop.store(true, Ordering::SeqCst);
    }

    // Running -> Idle
    fn finish(&self) {
        self.running.store(false, Ordering::Release);
        self.pending.fetch_sub(1, Ordering::AcqRel);
        self.notify();
    }

    fn notify(&self) {
        let _guard = self.lock_signal();
        self.signal.notify_all();
    }

    fn lock_signal(&self) -> MutexGuard<'_, ()> {
        self.signal_lock.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Block until `done` holds or `timeout` elapses; returns whether it holds
    fn wait_until(&self, timeout: Duration, done: impl Fn(&Self) -> bool) -> bool {
        let guard = self.lock_signal();
        let (_guard, result) = self
            .signal
            .wait_timeout_while(guard, timeout, |_| !done(self))
            .unwrap_or_else(PoisonError::into_inner);
        !result.timed_out() || done(self)
    }
}

struct Worker {
    sender: Sender<ActionRequest>,
    handle: JoinHandle<()>,
}

/// Serializes action requests onto one worker thread
pub struct CommandScheduler {
    worker: Option<Worker>,
    state: Arc<ActionRunState>,
    defaults: Mutex<ActionParams>,
    pose: Arc<SharedPose>,
    config: SchedulerConfig,
}

impl CommandScheduler {
    /// Move `driver` onto a new worker thread and start accepting requests.
    ///
    /// If the queue or thread cannot be created the scheduler comes back
    /// disabled: every later call fails with `NotInitialized`.
    pub fn start<P: PulseOutput + 'static>(driver: ServoDriver<P>, config: SchedulerConfig) -> Self {
        let pose = driver.pose_handle();
        let state = Arc::new(ActionRunState::default());

        let worker = Self::spawn_worker(driver, &config, Arc::clone(&state));
        match &worker {
            Some(_) => info!(
                "Pet controller started: queue capacity {}, {:?} preempt grace",
                config.queue_capacity, config.preempt_grace
            ),
            None => error!("Pet controller disabled: initialization failed"),
        }

        Self {
            worker,
            state,
            defaults: Mutex::new(ActionParams::default()),
            pose,
            config,
        }
    }

    fn spawn_worker<P: PulseOutput + 'static>(
        driver: ServoDriver<P>,
        config: &SchedulerConfig,
        state: Arc<ActionRunState>,
    ) -> Option<Worker> {
        if config.queue_capacity == 0 {
            error!("Failed to create command queue: capacity must be at least 1");
            return None;
        }
        let (sender, receiver) = bounded(config.queue_capacity);

        let spawned = thread::Builder::new()
            .name(config.thread_name.clone())
            .spawn(move || worker_loop(driver, receiver, state));

        match spawned {
            Ok(handle) => Some(Worker { sender, handle }),
            Err(e) => {
                error!("Failed to create pet task: {}", e);
                None
            }
        }
    }

    pub fn is_initialized(&self) -> bool {
        self.worker.is_some()
    }

    fn sender(&self) -> Result<&Sender<ActionRequest>> {
        let Some(worker) = &self.worker else {
            error!("Pet controller not initialized");
            return Err(SchedulerError::NotInitialized);
        };
        if self.state.is_faulted() {
            error!("Pet controller faulted, rejecting command");
            return Err(SchedulerError::Faulted);
        }
        Ok(&worker.sender)
    }

    /// Preempt whatever is running, then submit `action`.
    ///
    /// The stop is cooperative: this waits at most the preempt grace for the
    /// worker to go idle and submits either way.
    pub fn perform(&self, action: ActionId, params: Option<ActionParams>) -> Result<()> {
        self.sender()?;

        if self.state.is_running() {
            warn!(
                "Action {} already running, stopping it for {}",
                self.state.current(),
                action
            );
            self.state.request_stop();
            let grace = self.config.preempt_grace;
            if !self.state.wait_until(grace, |s| !s.is_running()) {
                warn!("Running action did not stop within {:?}", grace);
            }
        }

        self.enqueue(action, params)
    }

    /// Submit `action` behind anything already queued.
    ///
    /// Fails with `QueueFull` if there is still no room after the enqueue
    /// timeout. `None` uses the current default parameters.
    pub fn enqueue(&self, action: ActionId, params: Option<ActionParams>) -> Result<()> {
        let sender = self.sender()?;
        let mut params = params.unwrap_or_else(|| self.default_params());
        params.repeat_count = params.repeat_count.max(1);
        let request = ActionRequest { action, params };

        self.state.pending.fetch_add(1, Ordering::AcqRel);
        match sender.send_timeout(request, self.config.enqueue_timeout) {
            Ok(()) => {
                debug!("Queued action {} ({:?})", action, params);
                Ok(())
            }
            Err(SendTimeoutError::Timeout(request)) => {
                self.state.pending.fetch_sub(1, Ordering::AcqRel);
                warn!("Command queue full, dropping action {}", request.action);
                Err(SchedulerError::QueueFull {
                    capacity: self.config.queue_capacity,
                })
            }
            Err(SendTimeoutError::Disconnected(request)) => {
                self.state.pending.fetch_sub(1, Ordering::AcqRel);
                error!("Pet task gone, dropping action {}", request.action);
                Err(SchedulerError::Faulted)
            }
        }
    }

    /// Ask the running action to stop at its next checkpoint. Does not block.
    pub fn stop_current_action(&self) -> Result<()> {
        self.sender()?;
        self.state.request_stop();
        info!("Action stop requested");
        Ok(())
    }

    /// Change the step delay used by requests submitted without parameters
    pub fn set_speed(&self, speed_delay_ms: u16) -> Result<()> {
        self.sender()?;
        self.lock_defaults().speed_delay = speed_delay_ms;
        info!("Default speed delay set to {}ms", speed_delay_ms);
        Ok(())
    }

    pub fn set_default_params(&self, params: ActionParams) -> Result<()> {
        self.sender()?;
        *self.lock_defaults() = params;
        Ok(())
    }

    pub fn default_params(&self) -> ActionParams {
        *self.lock_defaults()
    }

    fn lock_defaults(&self) -> MutexGuard<'_, ActionParams> {
        self.defaults.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn is_idle(&self) -> bool {
        !self.state.is_running()
    }

    pub fn current_action(&self) -> ActionId {
        self.state.current()
    }

    /// Last commanded joint angles [left-front, right-front, left-back, right-back]
    pub fn pose(&self) -> [u8; 4] {
        self.pose.angles()
    }

    pub fn health(&self) -> ControllerHealth {
        if self.worker.is_none() {
            ControllerHealth::Disabled
        } else if self.state.is_faulted() {
            ControllerHealth::Faulted
        } else {
            ControllerHealth::Ok
        }
    }

    pub fn run_state(&self) -> &ActionRunState {
        &self.state
    }

    /// Block until every submitted request has finished, up to `timeout`
    pub fn wait_until_drained(&self, timeout: Duration) -> bool {
        self.state.wait_until(timeout, |s| {
            s.pending.load(Ordering::Acquire) == 0 || s.is_faulted()
        })
    }
}

impl Drop for CommandScheduler {
    fn drop(&mut self) {
        let Some(Worker { sender, handle }) = self.worker.take() else {
            return;
        };

        // Skip whatever is still queued and cut the current action short
        self.state.shut_down();
        drop(sender);

        if handle.join().is_err() {
            error!("Pet task panicked");
        }
        info!("Pet controller stopped");
    }
}

fn worker_loop<P: PulseOutput>(
    mut driver: ServoDriver<P>,
    receiver: Receiver<ActionRequest>,
    state: Arc<ActionRunState>,
) {
    info!("Pet control task started");

    // Blocks on the empty queue; ends once the scheduler drops its sender
    for request in receiver.iter() {
        if state.shutdown.load(Ordering::SeqCst) {
            debug!("Shutting down, skipping action {}", request.action);
            state.pending.fetch_sub(1, Ordering::AcqRel);
            continue;
        }

        state.begin(request.action);
        info!("Performing action: {}", request.action);

        match actions::perform(&mut driver, request.action, &request.params, state.stop_flag()) {
            Ok(ActionOutcome::Completed) => info!("Action completed: {}", request.action),
            Ok(ActionOutcome::Cancelled) => info!("Action cancelled: {}", request.action),
            Err(e) => {
                error!("Servo fault during action {}: {}", request.action, e);
                state.faulted.store(true, Ordering::Release);
                state.finish();
                break;
            }
        }
        state.finish();
    }

    info!("Pet control task exiting");
}
