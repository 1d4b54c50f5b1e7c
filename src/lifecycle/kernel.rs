//! Lifecycle Kernel (§4.1): fixed-cadence tick driver owning every live
//! object, routing BeginPlay/Tick/Destroy with per-object fault isolation.

use super::container::StateContainer;
use super::object::{invoke, GameObject, ObjectFault, ObjectId, ObjectState};
use crate::error::LifecycleError;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;
use tokio::sync::mpsc;
use tracing::{debug, warn};

/// Default per-object fault budget before forced destruction (§4.1).
pub const DEFAULT_MAX_ERRORS: u32 = 3;

/// A deferred kernel-side mutation posted from outside the kernel thread
/// (typically a worker finishing template I/O) and drained at the start of
/// the next tick (§5). Boxed so the job runner doesn't need to know the
/// kernel's internals beyond this one seam.
pub type ConstructFn = Box<dyn FnOnce(&mut Kernel) + Send>;

/// Cheap, cloneable submission side for `ConstructFn`s. Worker threads hold
/// this; only the kernel thread ever touches `Kernel` directly.
#[derive(Clone)]
pub struct KernelHandle {
    tx: mpsc::UnboundedSender<ConstructFn>,
}

impl KernelHandle {
    /// Enqueue a closure to run against the kernel at the next safe point.
    /// Never blocks; fails only if the kernel has been dropped.
    pub fn post(&self, f: ConstructFn) -> Result<(), LifecycleError> {
        self.tx.send(f).map_err(|_| LifecycleError::KernelStopped)
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct CountsByState {
    pub ready: usize,
    pub active: usize,
    pub paused: usize,
    pub destroying: usize,
}

#[derive(Debug, Clone, Copy)]
pub struct KernelStatus {
    pub running: bool,
    pub fps: u32,
    pub uptime_seconds: f64,
    pub total_ticks: u64,
    pub object_count: usize,
    pub counts_by_state: CountsByState,
}

pub struct Kernel {
    objects: HashMap<ObjectId, Box<dyn GameObject>>,
    ready: StateContainer,
    active: StateContainer,
    paused: StateContainer,
    destroying: StateContainer,
    next_id: AtomicU64,
    fps: u32,
    running: bool,
    total_ticks: u64,
    error_counts: HashMap<ObjectId, u32>,
    max_errors: u32,
    started_at: Option<Instant>,
    command_rx: mpsc::UnboundedReceiver<ConstructFn>,
    command_tx: mpsc::UnboundedSender<ConstructFn>,
    faults: Vec<ObjectFault>,
}

impl Kernel {
    /// `fps` is clamped to the operator-settable range `1..=120` (§4.1).
    pub fn new(fps: u32) -> Self {
        let (command_tx, command_rx) = mpsc::unbounded_channel();
        Self {
            objects: HashMap::new(),
            ready: StateContainer::new(),
            active: StateContainer::new(),
            paused: StateContainer::new(),
            destroying: StateContainer::new(),
            next_id: AtomicU64::new(1),
            fps: fps.clamp(1, 120),
            running: false,
            total_ticks: 0,
            error_counts: HashMap::new(),
            max_errors: DEFAULT_MAX_ERRORS,
            started_at: None,
            command_tx,
            command_rx,
            faults: Vec::new(),
        }
    }

    pub fn with_max_errors(mut self, max_errors: u32) -> Self {
        self.max_errors = max_errors;
        self
    }

    pub fn handle(&self) -> KernelHandle {
        KernelHandle {
            tx: self.command_tx.clone(),
        }
    }

    pub fn is_running(&self) -> bool {
        self.running
    }

    pub fn start(&mut self) {
        self.running = true;
        self.started_at.get_or_insert_with(Instant::now);
        debug!(fps = self.fps, "kernel started");
    }

    /// Stop the tick loop. Runs one final pass through the Destroying
    /// container so `onDestroy` always runs for objects already queued for
    /// destruction (§4.1).
    pub fn stop(&mut self) {
        self.phase_destroy();
        self.running = false;
        debug!(total_ticks = self.total_ticks, "kernel stopped");
    }

    /// Instantiate an object in Ready and enroll it. `factory` receives the
    /// freshly-allocated id so the object can carry it. Fails if the kernel
    /// is not running (§4.1).
    pub fn create_object<F>(&mut self, factory: F) -> Result<ObjectId, LifecycleError>
    where
        F: FnOnce(ObjectId) -> Box<dyn GameObject>,
    {
        if !self.running {
            return Err(LifecycleError::KernelStopped);
        }
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let mut obj = factory(id);
        obj.set_state(ObjectState::Ready);
        self.ready.add(id);
        self.objects.insert(id, obj);
        Ok(id)
    }

    pub fn object_state(&self, id: ObjectId) -> Option<ObjectState> {
        self.objects.get(&id).map(|o| o.state())
    }

    /// Idempotent for objects already Destroying/Destroyed; transitions
    /// {Ready, Active, Paused} to Destroying; fails for unknown ids (§4.1).
    pub fn destroy_object(&mut self, id: ObjectId) -> Result<(), LifecycleError> {
        let state = self
            .objects
            .get(&id)
            .map(|o| o.state())
            .ok_or(LifecycleError::UnknownObject { id })?;
        match state {
            ObjectState::Destroying | ObjectState::Destroyed => Ok(()),
            ObjectState::Ready => {
                self.ready.remove(id);
                self.set_state_and_add(id, ObjectState::Destroying);
                Ok(())
            }
            ObjectState::Active => {
                self.active.remove(id);
                self.set_state_and_add(id, ObjectState::Destroying);
                Ok(())
            }
            ObjectState::Paused => {
                self.paused.remove(id);
                self.set_state_and_add(id, ObjectState::Destroying);
                Ok(())
            }
        }
    }

    pub fn pause_object(&mut self, id: ObjectId) -> Result<(), LifecycleError> {
        let state = self
            .objects
            .get(&id)
            .map(|o| o.state())
            .ok_or(LifecycleError::UnknownObject { id })?;
        if state != ObjectState::Active {
            return Err(LifecycleError::InvalidTransition {
                id,
                from: state.as_str(),
                to: "Paused",
            });
        }
        self.active.remove(id);
        self.set_state_and_add(id, ObjectState::Paused);
        Ok(())
    }

    pub fn resume_object(&mut self, id: ObjectId) -> Result<(), LifecycleError> {
        let state = self
            .objects
            .get(&id)
            .map(|o| o.state())
            .ok_or(LifecycleError::UnknownObject { id })?;
        if state != ObjectState::Paused {
            return Err(LifecycleError::InvalidTransition {
                id,
                from: state.as_str(),
                to: "Active",
            });
        }
        self.paused.remove(id);
        self.set_state_and_add(id, ObjectState::Active);
        Ok(())
    }

    fn set_state_and_add(&mut self, id: ObjectId, new_state: ObjectState) {
        if let Some(obj) = self.objects.get_mut(&id) {
            obj.set_state(new_state);
        }
        match new_state {
            ObjectState::Ready => self.ready.add(id),
            ObjectState::Active => self.active.add(id),
            ObjectState::Paused => self.paused.add(id),
            ObjectState::Destroying => self.destroying.add(id),
            ObjectState::Destroyed => {}
        }
    }

    pub fn get_status(&self) -> KernelStatus {
        KernelStatus {
            running: self.running,
            fps: self.fps,
            uptime_seconds: self
                .started_at
                .map(|t| t.elapsed().as_secs_f64())
                .unwrap_or(0.0),
            total_ticks: self.total_ticks,
            object_count: self.objects.len(),
            counts_by_state: CountsByState {
                ready: self.ready.len(),
                active: self.active.len(),
                paused: self.paused.len(),
                destroying: self.destroying.len(),
            },
        }
    }

    /// Faults observed since the last call to this method (drains the
    /// buffer). Exposed so external callers/tests can inspect isolated
    /// object faults without the kernel crashing (§4.1).
    pub fn drain_faults(&mut self) -> Vec<ObjectFault> {
        std::mem::take(&mut self.faults)
    }

    fn drain_commands(&mut self) {
        while let Ok(cmd) = self.command_rx.try_recv() {
            cmd(self);
        }
    }

    /// Advance one frame: drain posted construct commands, then run the
    /// Begin/Advance/Destroy phases in order, applying deferred container
    /// mutations along the way (§4.1 tick algorithm).
    pub fn tick(&mut self) {
        if !self.running {
            return;
        }
        self.drain_commands();
        let delta_seconds = 1.0 / self.fps as f64;
        self.phase_begin();
        self.phase_advance(delta_seconds);
        self.phase_destroy();
        self.total_ticks += 1;
    }

    fn phase_begin(&mut self) {
        let count = self.ready.begin_iteration();
        for i in 0..count {
            let Some(id) = self.ready.id_at(i) else {
                continue;
            };
            self.ready.remove(id);
            let outcome = {
                let Some(obj) = self.objects.get_mut(&id) else {
                    continue;
                };
                invoke(|| obj.on_begin_play())
            };
            match outcome {
                Ok(()) => {
                    if let Some(obj) = self.objects.get_mut(&id) {
                        obj.set_state(ObjectState::Active);
                    }
                    self.active.add(id);
                }
                Err(cause) => {
                    if let Some(obj) = self.objects.get_mut(&id) {
                        obj.set_state(ObjectState::Destroying);
                    }
                    self.destroying.add(id);
                    self.record_fault(id, "BeginPlay", cause);
                }
            }
        }
        self.ready.end_iteration();
    }

    fn phase_advance(&mut self, delta_seconds: f64) {
        let count = self.active.begin_iteration();
        for i in 0..count {
            let Some(id) = self.active.id_at(i) else {
                continue;
            };
            let tick_err = {
                let Some(obj) = self.objects.get_mut(&id) else {
                    continue;
                };
                invoke(|| obj.on_tick(delta_seconds)).err()
            };
            if let Some(cause) = tick_err {
                let error_count = {
                    let counter = self.error_counts.entry(id).or_insert(0);
                    *counter += 1;
                    *counter
                };
                self.record_fault(id, "Tick", cause);
                if error_count >= self.max_errors {
                    self.active.remove(id);
                    if let Some(obj) = self.objects.get_mut(&id) {
                        obj.set_state(ObjectState::Destroying);
                    }
                    self.destroying.add(id);
                }
            }
        }
        self.active.end_iteration();
    }

    fn phase_destroy(&mut self) {
        let count = self.destroying.begin_iteration();
        for i in 0..count {
            let Some(id) = self.destroying.id_at(i) else {
                continue;
            };
            self.destroying.remove(id);
            if let Some(mut obj) = self.objects.remove(&id) {
                if let Err(cause) = invoke(|| obj.on_destroy()) {
                    self.record_fault(id, "Destroy", cause);
                }
                obj.set_state(ObjectState::Destroyed);
                self.error_counts.remove(&id);
            }
        }
        self.destroying.end_iteration();
    }

    fn record_fault(&mut self, id: ObjectId, phase: &'static str, cause: String) {
        warn!(object_id = id, phase, %cause, "object fault isolated");
        self.faults.push(ObjectFault {
            object_id: id,
            phase,
            cause,
        });
    }
}
