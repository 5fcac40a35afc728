// Command recording
//
// One render pass per frame: clear, bind, dynamic viewport/scissor, a single
// four-vertex strip draw. Buffers come from a resettable pool and are fully
// re-recorded every frame.

use ash::vk;

use crate::error::{FrameResult, InitContext};

/// Vertices of the procedural strip emitted by the vertex shader
pub const STRIP_VERTEX_COUNT: u32 = 4;
pub const STRIP_INSTANCE_COUNT: u32 = 1;

/// Everything one recording pass reads
#[derive(Debug, Clone, Copy)]
pub struct RecordTarget {
    pub render_pass: vk::RenderPass,
    pub framebuffer: vk::Framebuffer,
    pub pipeline: vk::Pipeline,
    pub extent: vk::Extent2D,
    pub clear_color: [f32; 4],
}

/// Viewport covering the whole extent
pub fn full_viewport(extent: vk::Extent2D) -> vk::Viewport {
    vk::Viewport {
        x: 0.0,
        y: 0.0,
        width: extent.width as f32,
        height: extent.height as f32,
        min_depth: 0.0,
        max_depth: 1.0,
    }
}

pub fn full_scissor(extent: vk::Extent2D) -> vk::Rect2D {
    vk::Rect2D {
        offset: vk::Offset2D { x: 0, y: 0 },
        extent,
    }
}

/// Create a pool whose buffers can be reset individually
pub fn create_command_pool(device: &ash::Device, queue_family: u32) -> FrameResult<vk::CommandPool> {
    let pool_info = vk::CommandPoolCreateInfo::builder()
        .queue_family_index(queue_family)
        .flags(vk::CommandPoolCreateFlags::RESET_COMMAND_BUFFER);

    unsafe { device.create_command_pool(&pool_info, None) }.init_context("command pool")
}

pub fn allocate_command_buffers(
    device: &ash::Device,
    pool: vk::CommandPool,
    count: u32,
) -> FrameResult<Vec<vk::CommandBuffer>> {
    let alloc_info = vk::CommandBufferAllocateInfo::builder()
        .command_pool(pool)
        .level(vk::CommandBufferLevel::PRIMARY)
        .command_buffer_count(count);

    unsafe { device.allocate_command_buffers(&alloc_info) }.init_context("command buffers")
}

/// Overwrite `cmd` with this frame's single render pass
pub fn record_frame(device: &ash::Device, cmd: vk::CommandBuffer, target: &RecordTarget) -> FrameResult<()> {
    let clear_values = [vk::ClearValue {
        color: vk::ClearColorValue {
            float32: target.clear_color,
        },
    }];

    let render_pass_info = vk::RenderPassBeginInfo::builder()
        .render_pass(target.render_pass)
        .framebuffer(target.framebuffer)
        .render_area(full_scissor(target.extent))
        .clear_values(&clear_values);

    unsafe {
        device.reset_command_buffer(cmd, vk::CommandBufferResetFlags::empty())?;

        let begin_info = vk::CommandBufferBeginInfo::builder();
        device.begin_command_buffer(cmd, &begin_info)?;

        device.cmd_begin_render_pass(cmd, &render_pass_info, vk::SubpassContents::INLINE);
        device.cmd_bind_pipeline(cmd, vk::PipelineBindPoint::GRAPHICS, target.pipeline);
        device.cmd_set_viewport(cmd, 0, &[full_viewport(target.extent)]);
        device.cmd_set_scissor(cmd, 0, &[full_scissor(target.extent)]);
        device.cmd_draw(cmd, STRIP_VERTEX_COUNT, STRIP_INSTANCE_COUNT, 0, 0);
        device.cmd_end_render_pass(cmd);

        device.end_command_buffer(cmd)?;
    }

    Ok(())
}
