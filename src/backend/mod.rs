// Backend module - Vulkan abstraction layer
//
// Thin wrappers around ash. Pure policy (device scoring, swapchain choices,
// fixed-function state) is kept apart from the calls so it can be tested
// without a GPU.

pub mod cleanup;
pub mod command;
pub mod device;
pub mod pipeline;
pub mod selector;
pub mod shader;
pub mod swapchain;
pub mod sync;

pub use device::{ContextDesc, GraphicsContext};
pub use swapchain::SwapchainManager;
