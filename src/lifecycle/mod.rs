//! Lifecycle Kernel + Deferred Container (§4.1, §4.2).

mod container;
mod kernel;
mod object;

pub use kernel::{
    ConstructFn, CountsByState, Kernel, KernelHandle, KernelStatus, DEFAULT_MAX_ERRORS,
};
pub use object::{GameObject, ObjectFault, ObjectId, ObjectState};
