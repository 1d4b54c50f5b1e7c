//! The Instantiation Job Runner: a worker pool that turns a template id into
//! a live, running environment, plus the read API exposed once it exists.

mod driver;
mod pool;
mod registry;
mod task;
mod template;

pub use driver::KernelDriver;
pub use pool::{EnvironmentExport, JobRunner, PerformanceMetrics, RuntimeState};
pub use registry::{EnvironmentDetails, EnvironmentSummary};
pub use task::{InstantiationTask, TaskStage};
pub use template::{ExchangeTemplate, InMemoryTemplateStore, StockTemplate, TemplateStore, TraderTemplate};
