// Vulkan context - the public face of the engine
//
// Wires the graphics context, swapchain manager, command pool and frame
// scheduler together. The Vulkan side of the scheduler lives in
// VulkanBackend, which stays private to the crate.

use ash::vk;
use std::sync::Arc;

use crate::backend::command::{self, RecordTarget};
use crate::backend::shader::{ShaderModules, ShaderSource};
use crate::backend::{sync, ContextDesc, GraphicsContext, SwapchainManager};
use crate::config::Config;
use crate::error::{FrameError, FrameResult};
use crate::frame::{
    Acquired, ChainResourceCounts, FrameBackend, FrameOutcome, FrameScheduler, Presented, SchedulerState,
};
use crate::window::WindowSystem;

pub(crate) struct VulkanBackend {
    command_pool: vk::CommandPool,
    clear_color: [f32; 4],
    framebuffer_size: (u32, u32),
    // Field order is drop order: the chain goes before the device it lives on
    swapchain: SwapchainManager,
    graphics: Arc<GraphicsContext>,
}

impl FrameBackend for VulkanBackend {
    type Fence = vk::Fence;
    type Semaphore = vk::Semaphore;
    type CommandBuffer = vk::CommandBuffer;

    fn create_fence(&mut self, signaled: bool) -> FrameResult<vk::Fence> {
        sync::create_fence(&self.graphics.device, signaled)
    }

    fn create_semaphore(&mut self) -> FrameResult<vk::Semaphore> {
        sync::create_semaphore(&self.graphics.device)
    }

    fn allocate_command_buffer(&mut self) -> FrameResult<vk::CommandBuffer> {
        command::allocate_command_buffers(&self.graphics.device, self.command_pool, 1)?
            .pop()
            .ok_or(FrameError::Init {
                what: "command buffer",
                result: vk::Result::ERROR_OUT_OF_DEVICE_MEMORY,
            })
    }

    fn destroy_fence(&mut self, fence: vk::Fence) {
        unsafe { self.graphics.device.destroy_fence(fence, None) };
    }

    fn destroy_semaphore(&mut self, semaphore: vk::Semaphore) {
        unsafe { self.graphics.device.destroy_semaphore(semaphore, None) };
    }

    fn wait_for_fence(&mut self, fence: vk::Fence, timeout_ns: u64) -> FrameResult<()> {
        sync::wait_for_fence(&self.graphics.device, fence, timeout_ns)
    }

    fn reset_fence(&mut self, fence: vk::Fence) -> FrameResult<()> {
        sync::reset_fence(&self.graphics.device, fence)
    }

    fn acquire_next_image(&mut self, signal: vk::Semaphore, timeout_ns: u64) -> FrameResult<Acquired> {
        self.swapchain.acquire_next_image(signal, timeout_ns)
    }

    fn record(&mut self, cmd: vk::CommandBuffer, image_index: u32) -> FrameResult<()> {
        let state = self.swapchain.state().ok_or(FrameError::Presentation {
            stage: "record",
            result: vk::Result::ERROR_OUT_OF_DATE_KHR,
        })?;
        let framebuffer = *state
            .framebuffers
            .get(image_index as usize)
            .ok_or(FrameError::ImageIndexOutOfRange {
                index: image_index,
                count: state.framebuffers.len(),
            })?;

        let target = RecordTarget {
            render_pass: state.render_pass,
            framebuffer,
            pipeline: state.pipeline,
            extent: state.extent,
            clear_color: self.clear_color,
        };
        command::record_frame(&self.graphics.device, cmd, &target)
    }

    fn submit(
        &mut self,
        cmd: vk::CommandBuffer,
        wait: vk::Semaphore,
        signal: vk::Semaphore,
        fence: vk::Fence,
    ) -> FrameResult<()> {
        let wait_semaphores = [wait];
        let wait_stages = [vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT];
        let command_buffers = [cmd];
        let signal_semaphores = [signal];

        let submit_info = vk::SubmitInfo::builder()
            .wait_semaphores(&wait_semaphores)
            .wait_dst_stage_mask(&wait_stages)
            .command_buffers(&command_buffers)
            .signal_semaphores(&signal_semaphores)
            .build();

        unsafe {
            self.graphics
                .device
                .queue_submit(self.graphics.graphics_queue, &[submit_info], fence)
        }
        .map_err(|result| FrameError::Presentation {
            stage: "submit",
            result,
        })
    }

    fn present(&mut self, image_index: u32, wait: vk::Semaphore) -> FrameResult<Presented> {
        self.swapchain
            .present(self.graphics.present_queue, image_index, wait)
    }

    fn wait_idle(&mut self) -> FrameResult<()> {
        self.graphics.wait_idle()
    }

    fn rebuild_chain(&mut self) -> FrameResult<Option<u32>> {
        self.swapchain.rebuild(self.framebuffer_size)
    }

    fn image_count(&self) -> u32 {
        self.swapchain.image_count()
    }

    fn chain_resources(&self) -> ChainResourceCounts {
        self.swapchain.resource_counts()
    }
}

impl Drop for VulkanBackend {
    fn drop(&mut self) {
        let _ = self.graphics.wait_idle();
        // Frees every command buffer allocated from it
        unsafe {
            self.graphics
                .device
                .destroy_command_pool(self.command_pool, None)
        };
    }
}

/// A window's presentation engine: device, swapchain and frame pacing.
///
/// Dropping it idles the GPU and releases everything in reverse creation
/// order.
pub struct VulkanContext {
    scheduler: FrameScheduler<VulkanBackend>,
}

impl VulkanContext {
    pub fn init<W: WindowSystem>(window: &W, config: &Config, shaders: ShaderSource) -> FrameResult<Self> {
        let graphics = GraphicsContext::new(
            window,
            &ContextDesc {
                app_name: &config.window.title,
                enable_validation: config.validation_enabled(),
                required_features: &config.device.required_features,
            },
        )?;

        let modules = ShaderModules::new(&graphics.device, &shaders)?;
        let framebuffer_size = window.framebuffer_size();
        let swapchain = SwapchainManager::new(
            graphics.clone(),
            modules,
            config.preferred_present_mode(),
            framebuffer_size,
        )?;

        let command_pool = command::create_command_pool(&graphics.device, graphics.queue_families.graphics)?;

        let backend = VulkanBackend {
            command_pool,
            clear_color: config.graphics.clear_color,
            framebuffer_size,
            swapchain,
            graphics,
        };

        let scheduler = FrameScheduler::new(backend, config.fence_timeout())?;
        Ok(Self { scheduler })
    }

    /// Draw and present one frame
    pub fn draw_frame(&mut self) -> FrameResult<FrameOutcome> {
        self.scheduler.draw_frame()
    }

    /// Record a new framebuffer size; the chain is rebuilt after the next present
    pub fn notify_resized(&mut self, width: u32, height: u32) {
        log::debug!("Framebuffer resized to {}x{}", width, height);
        self.scheduler.backend_mut().framebuffer_size = (width, height);
        self.scheduler.request_resize();
    }

    pub fn state(&self) -> SchedulerState {
        self.scheduler.state()
    }

    pub fn device_name(&self) -> &str {
        &self.scheduler.backend().graphics.device_name
    }

    pub fn extent(&self) -> Option<vk::Extent2D> {
        self.scheduler.backend().swapchain.state().map(|s| s.extent)
    }

    /// Idle the GPU and release the frame objects. Drawing afterwards fails.
    pub fn teardown(&mut self) {
        self.scheduler.teardown();
    }
}
