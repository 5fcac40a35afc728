//! vframe - Vulkan presentation and frame synchronization
//!
//! Opens a window, selects a GPU, keeps a swapchain matched to the window and
//! paces frames with up to [`MAX_FRAMES_IN_FLIGHT`] in flight. Each frame
//! clears the target and draws one procedural strip.
//!
//! ```no_run
//! use vframe::{app, Application, Config};
//!
//! struct Demo;
//! impl Application for Demo {}
//!
//! let config = Config::load();
//! app::run(&mut Demo, &config).unwrap();
//! ```

pub mod app;
pub mod backend;
pub mod config;
pub mod context;
pub mod error;
pub mod frame;
pub mod window;

pub use app::Application;
pub use config::Config;
pub use context::VulkanContext;
pub use error::{FrameError, FrameResult};
pub use frame::{FrameOutcome, SchedulerState, MAX_FRAMES_IN_FLIGHT};
pub use window::{WindowSystem, WinitWindow};
