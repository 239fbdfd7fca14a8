use std::sync::{Mutex, PoisonError};

use serde::{Deserialize, Serialize};

pub const MOTION_SENSOR_PERMISSION: &str = "motion_sensor";
pub const NOTIFICATIONS_PERMISSION: &str = "notifications";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Permissions {
    pub motion_sensor: bool,
    pub notifications: bool,
}

impl Permissions {
    pub fn all_granted() -> Self {
        Self {
            motion_sensor: true,
            notifications: true,
        }
    }

    pub fn missing(&self) -> Vec<&'static str> {
        let mut missing = Vec::new();
        if !self.motion_sensor {
            missing.push(MOTION_SENSOR_PERMISSION);
        }
        if !self.notifications {
            missing.push(NOTIFICATIONS_PERMISSION);
        }
        missing
    }

    pub fn granted(&self) -> bool {
        self.motion_sensor && self.notifications
    }
}

pub trait PermissionChecker: Send + Sync {
    fn check(&self) -> Permissions;
}

/// Grants fixed up front and changeable at runtime. Used by the demo binary
/// and tests; a mobile host queries the OS instead.
pub struct StaticPermissions {
    current: Mutex<Permissions>,
}

impl StaticPermissions {
    pub fn new(permissions: Permissions) -> Self {
        Self {
            current: Mutex::new(permissions),
        }
    }

    pub fn granted() -> Self {
        Self::new(Permissions::all_granted())
    }

    pub fn set(&self, permissions: Permissions) {
        *self.current.lock().unwrap_or_else(PoisonError::into_inner) = permissions;
    }
}

impl PermissionChecker for StaticPermissions {
    fn check(&self) -> Permissions {
        *self.current.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lists_each_missing_grant() {
        let perms = Permissions {
            motion_sensor: false,
            notifications: true,
        };
        assert_eq!(perms.missing(), vec![MOTION_SENSOR_PERMISSION]);
        assert!(!perms.granted());
        assert!(Permissions::all_granted().missing().is_empty());
    }
}
