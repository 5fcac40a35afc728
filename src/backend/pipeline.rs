// Graphics pipeline creation
//
// One render pass with a single color attachment and one pipeline built
// against it. Both depend on the swapchain format, so they are rebuilt with
// every swapchain generation. Viewport and scissor are dynamic.

use ash::vk;

use super::shader::ShaderModules;
use crate::error::{FrameError, FrameResult, InitContext};

/// Fixed-function choices baked into every pipeline we build
#[derive(Debug, Clone, Copy)]
pub struct FixedFunction {
    pub topology: vk::PrimitiveTopology,
    pub cull_mode: vk::CullModeFlags,
    pub front_face: vk::FrontFace,
    pub samples: vk::SampleCountFlags,
    pub blend_enable: bool,
    pub color_write_mask: vk::ColorComponentFlags,
    pub dynamic_states: [vk::DynamicState; 2],
}

pub const FIXED_FUNCTION: FixedFunction = FixedFunction {
    topology: vk::PrimitiveTopology::TRIANGLE_STRIP,
    cull_mode: vk::CullModeFlags::BACK,
    front_face: vk::FrontFace::CLOCKWISE,
    samples: vk::SampleCountFlags::TYPE_1,
    blend_enable: false,
    color_write_mask: vk::ColorComponentFlags::RGBA,
    dynamic_states: [vk::DynamicState::VIEWPORT, vk::DynamicState::SCISSOR],
};

/// Create a render pass for a single cleared color attachment
pub fn create_render_pass(device: &ash::Device, format: vk::Format) -> FrameResult<vk::RenderPass> {
    // Color attachment (the swapchain image)
    let color_attachment = vk::AttachmentDescription::builder()
        .format(format)
        .samples(FIXED_FUNCTION.samples)
        .load_op(vk::AttachmentLoadOp::CLEAR)
        .store_op(vk::AttachmentStoreOp::STORE)
        .stencil_load_op(vk::AttachmentLoadOp::DONT_CARE)
        .stencil_store_op(vk::AttachmentStoreOp::DONT_CARE)
        .initial_layout(vk::ImageLayout::UNDEFINED)
        .final_layout(vk::ImageLayout::PRESENT_SRC_KHR)
        .build();

    let color_attachment_ref = vk::AttachmentReference::builder()
        .attachment(0)
        .layout(vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL)
        .build();

    let color_attachments = &[color_attachment_ref];
    let subpass = vk::SubpassDescription::builder()
        .pipeline_bind_point(vk::PipelineBindPoint::GRAPHICS)
        .color_attachments(color_attachments)
        .build();

    // The layout transition must wait for the acquire semaphore, which is
    // waited on at color attachment output
    let dependency = vk::SubpassDependency::builder()
        .src_subpass(vk::SUBPASS_EXTERNAL)
        .dst_subpass(0)
        .src_stage_mask(vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT)
        .src_access_mask(vk::AccessFlags::empty())
        .dst_stage_mask(vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT)
        .dst_access_mask(vk::AccessFlags::COLOR_ATTACHMENT_WRITE)
        .build();

    let attachments = &[color_attachment];
    let subpasses = &[subpass];
    let dependencies = &[dependency];

    let render_pass_info = vk::RenderPassCreateInfo::builder()
        .attachments(attachments)
        .subpasses(subpasses)
        .dependencies(dependencies);

    unsafe { device.create_render_pass(&render_pass_info, None) }.init_context("render pass")
}

/// Create one framebuffer per swapchain image view
pub fn create_framebuffers(
    device: &ash::Device,
    image_views: &[vk::ImageView],
    render_pass: vk::RenderPass,
    extent: vk::Extent2D,
) -> FrameResult<Vec<vk::Framebuffer>> {
    let mut framebuffers = Vec::with_capacity(image_views.len());

    for &image_view in image_views {
        let attachments = &[image_view];
        let framebuffer_info = vk::FramebufferCreateInfo::builder()
            .render_pass(render_pass)
            .attachments(attachments)
            .width(extent.width)
            .height(extent.height)
            .layers(1);

        match unsafe { device.create_framebuffer(&framebuffer_info, None) } {
            Ok(framebuffer) => framebuffers.push(framebuffer),
            Err(result) => {
                for framebuffer in framebuffers {
                    unsafe { device.destroy_framebuffer(framebuffer, None) };
                }
                return Err(FrameError::Init { what: "framebuffer", result });
            }
        }
    }

    Ok(framebuffers)
}

/// Create the graphics pipeline and its (empty) layout
pub fn create_graphics_pipeline(
    device: &ash::Device,
    render_pass: vk::RenderPass,
    shaders: &ShaderModules,
) -> FrameResult<(vk::Pipeline, vk::PipelineLayout)> {
    let vert_stage = vk::PipelineShaderStageCreateInfo::builder()
        .stage(vk::ShaderStageFlags::VERTEX)
        .module(shaders.vertex)
        .name(&shaders.entry_point)
        .build();

    let frag_stage = vk::PipelineShaderStageCreateInfo::builder()
        .stage(vk::ShaderStageFlags::FRAGMENT)
        .module(shaders.fragment)
        .name(&shaders.entry_point)
        .build();

    let shader_stages = &[vert_stage, frag_stage];

    // Geometry is generated from gl_VertexIndex
    let vertex_input_info = vk::PipelineVertexInputStateCreateInfo::builder();

    let input_assembly = vk::PipelineInputAssemblyStateCreateInfo::builder()
        .topology(FIXED_FUNCTION.topology)
        .primitive_restart_enable(false);

    // Counts only; the actual rectangles are set per frame
    let viewport_state = vk::PipelineViewportStateCreateInfo::builder()
        .viewport_count(1)
        .scissor_count(1);

    let dynamic_state =
        vk::PipelineDynamicStateCreateInfo::builder().dynamic_states(&FIXED_FUNCTION.dynamic_states);

    let rasterizer = vk::PipelineRasterizationStateCreateInfo::builder()
        .depth_clamp_enable(false)
        .rasterizer_discard_enable(false)
        .polygon_mode(vk::PolygonMode::FILL)
        .line_width(1.0)
        .cull_mode(FIXED_FUNCTION.cull_mode)
        .front_face(FIXED_FUNCTION.front_face)
        .depth_bias_enable(false);

    let multisampling = vk::PipelineMultisampleStateCreateInfo::builder()
        .sample_shading_enable(false)
        .rasterization_samples(FIXED_FUNCTION.samples);

    let color_blend_attachment = vk::PipelineColorBlendAttachmentState::builder()
        .color_write_mask(FIXED_FUNCTION.color_write_mask)
        .blend_enable(FIXED_FUNCTION.blend_enable)
        .build();

    let color_blend_attachments = &[color_blend_attachment];
    let color_blending = vk::PipelineColorBlendStateCreateInfo::builder()
        .logic_op_enable(false)
        .attachments(color_blend_attachments);

    // No descriptor sets, no push constants
    let layout_info = vk::PipelineLayoutCreateInfo::builder();
    let pipeline_layout = unsafe { device.create_pipeline_layout(&layout_info, None) }
        .init_context("pipeline layout")?;

    let pipeline_info = vk::GraphicsPipelineCreateInfo::builder()
        .stages(shader_stages)
        .vertex_input_state(&vertex_input_info)
        .input_assembly_state(&input_assembly)
        .viewport_state(&viewport_state)
        .rasterization_state(&rasterizer)
        .multisample_state(&multisampling)
        .color_blend_state(&color_blending)
        .dynamic_state(&dynamic_state)
        .layout(pipeline_layout)
        .render_pass(render_pass)
        .subpass(0)
        .build();

    let pipelines = unsafe {
        device.create_graphics_pipelines(vk::PipelineCache::null(), &[pipeline_info], None)
    };

    match pipelines {
        Ok(pipelines) => Ok((pipelines[0], pipeline_layout)),
        Err((_, result)) => {
            unsafe { device.destroy_pipeline_layout(pipeline_layout, None) };
            Err(FrameError::Init { what: "graphics pipeline", result })
        }
    }
}
