pub mod controller;
pub mod diagnostics;
pub mod permissions;
pub mod state;

pub use controller::ServiceSupervisor;
pub use diagnostics::Diagnostics;
pub use permissions::{PermissionChecker, Permissions, StaticPermissions};
pub use state::{ServiceHealth, ServiceState};
