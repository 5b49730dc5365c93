pub mod coordinator;
pub mod dispatcher;

pub use coordinator::{relative_to_absolute, CoordinateSpace};
pub use dispatcher::{ActionExecutor, ActionResult, DeviceActionHandler};
