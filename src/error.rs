// Error types for the presentation engine
//
// Init-class failures are fatal and propagate to the caller. A stale
// swapchain never shows up here: the scheduler rebuilds and skips the frame.

use ash::vk;
use thiserror::Error;

/// Errors surfaced by the presentation engine.
#[derive(Error, Debug)]
pub enum FrameError {
    /// Failed to load the Vulkan loader library
    #[error("Failed to load Vulkan: {0}")]
    Loading(#[from] ash::LoadingError),

    /// A creation call failed during init or a swapchain rebuild
    #[error("Failed to create {what}: {result}")]
    Init {
        what: &'static str,
        result: vk::Result,
    },

    /// No enumerated GPU passed the selection policy
    #[error("No suitable GPU found")]
    NoSuitableDevice,

    /// Shader bytecode could not be read, decoded or turned into a module
    #[error("Shader module creation failed: {0}")]
    ModuleCreation(String),

    /// Window system failure (event loop, window creation, handles)
    #[error("Window error: {0}")]
    Window(String),

    /// Acquire, submit or present returned something other than success or a stale chain
    #[error("Unexpected presentation failure during {stage}: {result}")]
    Presentation {
        stage: &'static str,
        result: vk::Result,
    },

    /// A bounded wait expired
    #[error("Timed out waiting for {0}")]
    Timeout(&'static str),

    /// The presentation engine handed back an index we have no slot for
    #[error("Swapchain image index {index} out of range ({count} images)")]
    ImageIndexOutOfRange { index: u32, count: usize },

    /// draw_frame was called after teardown
    #[error("Frame scheduler already destroyed")]
    Destroyed,

    /// Any other Vulkan call failure
    #[error("Vulkan error: {0}")]
    Vulkan(#[from] vk::Result),
}

impl FrameError {
    /// True for failures that happen while creating the device, chain or pipeline.
    pub fn is_fatal_init(&self) -> bool {
        matches!(
            self,
            FrameError::Loading(_)
                | FrameError::Init { .. }
                | FrameError::NoSuitableDevice
                | FrameError::ModuleCreation(_)
                | FrameError::Window(_)
        )
    }
}

pub type FrameResult<T> = std::result::Result<T, FrameError>;

/// Attach the name of the object being created to a raw Vulkan failure.
pub trait InitContext<T> {
    fn init_context(self, what: &'static str) -> FrameResult<T>;
}

impl<T> InitContext<T> for Result<T, vk::Result> {
    fn init_context(self, what: &'static str) -> FrameResult<T> {
        self.map_err(|result| FrameError::Init { what, result })
    }
}
