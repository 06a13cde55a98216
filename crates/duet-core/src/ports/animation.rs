//! Avatar animation player port.

use crate::error::PortError;

/// Fire-and-forget animation commands.
///
/// Implementations must return promptly: queue the command and hand it to
/// the renderer asynchronously. Animation is best-effort; the engine never
/// retries a failed command.
pub trait AnimationPlayer: Send + Sync {
    /// Play `animation_id` for roughly `duration_ms` milliseconds.
    fn trigger(&self, animation_id: &str, duration_ms: u64) -> Result<(), PortError>;

    /// Blend back to the idle pose over `duration_ms` milliseconds.
    fn return_to_idle(&self, duration_ms: u64) -> Result<(), PortError>;
}
