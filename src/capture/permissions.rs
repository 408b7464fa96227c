//! Capture permission handling
//!
//! Consulted before a session starts and again when a start fails.

/// Answers whether the process may capture the screen
pub trait PermissionCheck: Send + Sync {
    fn has_capture_permission(&self) -> bool;

    /// Prompt for permission where the platform supports it
    fn request_capture_permission(&self) -> bool {
        self.has_capture_permission()
    }
}

/// Asks the operating system
#[derive(Debug, Clone, Copy, Default)]
pub struct PlatformPermissions;

impl PermissionCheck for PlatformPermissions {
    fn has_capture_permission(&self) -> bool {
        has_screen_recording_permission()
    }

    fn request_capture_permission(&self) -> bool {
        request_screen_recording_permission()
    }
}

/// Fixed answer, for hosts that manage consent themselves
#[derive(Debug, Clone, Copy)]
pub struct StaticPermission(pub bool);

impl PermissionCheck for StaticPermission {
    fn has_capture_permission(&self) -> bool {
        self.0
    }
}

/// Check if screen recording permission is granted
pub fn has_screen_recording_permission() -> bool {
    #[cfg(target_os = "macos")]
    {
        core_graphics::access::ScreenCaptureAccess::preflight()
    }

    #[cfg(not(target_os = "macos"))]
    {
        // Consent is handled by the compositor portal / OS at capture time
        true
    }
}

/// Request screen recording permission
///
/// On macOS this shows the system prompt if permission was never decided.
pub fn request_screen_recording_permission() -> bool {
    #[cfg(target_os = "macos")]
    {
        core_graphics::access::ScreenCaptureAccess::request()
    }

    #[cfg(not(target_os = "macos"))]
    {
        true
    }
}
