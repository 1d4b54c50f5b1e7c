//! Drives one `Kernel` on a dedicated OS thread at its configured tick rate,
//! the way spec.md §5 describes the kernel's own thread: single-threaded
//! cooperative scheduling, with worker threads posting construct commands
//! that get drained at the start of the next tick.

use crate::lifecycle::{Kernel, KernelHandle};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

pub struct KernelDriver {
    handle: KernelHandle,
    running: Arc<AtomicBool>,
    join: Option<std::thread::JoinHandle<()>>,
}

impl KernelDriver {
    /// Spawns the kernel thread and starts the tick loop immediately.
    pub fn spawn(fps: u32, max_errors: u32) -> Self {
        let mut kernel = Kernel::new(fps).with_max_errors(max_errors);
        let handle = kernel.handle();
        let running = Arc::new(AtomicBool::new(true));
        let thread_running = running.clone();
        let period = Duration::from_secs_f64(1.0 / fps.clamp(1, 120) as f64);
        let join = std::thread::Builder::new()
            .name("sim-kernel".to_string())
            .spawn(move || {
                kernel.start();
                while thread_running.load(Ordering::Acquire) {
                    let started = std::time::Instant::now();
                    kernel.tick();
                    let elapsed = started.elapsed();
                    if elapsed < period {
                        std::thread::sleep(period - elapsed);
                    }
                }
                kernel.stop();
                debug!("kernel thread stopped");
            })
            .expect("failed to spawn kernel thread");
        Self {
            handle,
            running,
            join: Some(join),
        }
    }

    pub fn handle(&self) -> KernelHandle {
        self.handle.clone()
    }
}

impl Drop for KernelDriver {
    fn drop(&mut self) {
        self.running.store(false, Ordering::Release);
        if let Some(join) = self.join.take() {
            let _ = join.join();
        }
    }
}
