//! The `GameObject` contract (§3, §9): capability set dispatched by id, not
//! by inheritance. The kernel owns every object by id in a `HashMap`; this
//! trait carries no cross-cutting base-class state beyond what a Rust trait
//! object needs.

/// Monotonic, process-local identifier. Never reused once retired (§5).
pub type ObjectId = u64;

/// The five lifecycle states an object may occupy (§3).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ObjectState {
    Ready,
    Active,
    Paused,
    Destroying,
    Destroyed,
}

impl ObjectState {
    pub fn as_str(&self) -> &'static str {
        match self {
            ObjectState::Ready => "Ready",
            ObjectState::Active => "Active",
            ObjectState::Paused => "Paused",
            ObjectState::Destroying => "Destroying",
            ObjectState::Destroyed => "Destroyed",
        }
    }
}

/// A fault raised by a lifecycle method, reported out of the isolating
/// wrapper rather than propagated (§4.1 Error isolation).
#[derive(Debug, Clone)]
pub struct ObjectFault {
    pub object_id: ObjectId,
    pub phase: &'static str,
    pub cause: String,
}

/// Anything the Lifecycle Kernel can schedule. Implementors own no
/// references back into the kernel's object map directly — children talk to
/// parents (and the kernel) through non-owning handles (§9).
pub trait GameObject: Send {
    fn id(&self) -> ObjectId;
    fn state(&self) -> ObjectState;
    fn set_state(&mut self, state: ObjectState);

    /// Called once, on the tick after the object is created, while it sits
    /// in the Ready container. `Ok` promotes to Active; `Err` routes
    /// straight to Destroying.
    fn on_begin_play(&mut self) -> Result<(), String>;

    /// Called once per tick while Active. Must not block — object methods
    /// run cooperatively on the kernel thread (§5).
    fn on_tick(&mut self, delta_seconds: f64) -> Result<(), String>;

    /// Called once, while the object sits in the Destroying container,
    /// immediately before it is dropped.
    fn on_destroy(&mut self) -> Result<(), String>;
}

/// Invoke a lifecycle method, converting both an `Err` return and an
/// in-flight Rust panic into the same fault representation, so a bug inside
/// one object's method can never abort the kernel's tick (§4.1).
pub(crate) fn invoke<F>(f: F) -> Result<(), String>
where
    F: FnOnce() -> Result<(), String>,
{
    match std::panic::catch_unwind(std::panic::AssertUnwindSafe(f)) {
        Ok(result) => result,
        Err(payload) => Err(panic_message(&payload)),
    }
}

fn panic_message(payload: &Box<dyn std::any::Any + Send>) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "object method panicked".to_string()
    }
}
