// Swapchain - Window presentation
//
// Owns the live chain generation: images, views, framebuffers and the render
// pass + pipeline built against the chain's format. A generation is created
// and destroyed as a unit. Rebuilds only happen with the device idle.

use ash::extensions::khr;
use ash::prelude::VkResult;
use ash::vk;
use std::sync::Arc;

use super::cleanup::CleanupStack;
use super::device::GraphicsContext;
use super::pipeline;
use super::selector::QueueFamilies;
use super::shader::ShaderModules;
use crate::error::{FrameError, FrameResult, InitContext};
use crate::frame::{Acquired, ChainResourceCounts, Presented};

/// Images requested on top of the surface minimum
pub const EXTRA_SWAPCHAIN_IMAGES: u32 = 2;

/// Prefer 8-bit BGRA sRGB, else whatever the surface lists first
pub fn choose_surface_format(formats: &[vk::SurfaceFormatKHR]) -> Option<vk::SurfaceFormatKHR> {
    formats
        .iter()
        .copied()
        .find(|f| {
            f.format == vk::Format::B8G8R8A8_SRGB
                && f.color_space == vk::ColorSpaceKHR::SRGB_NONLINEAR
        })
        .or_else(|| formats.first().copied())
}

/// Use `preferred` when offered; FIFO is always supported
pub fn choose_present_mode(
    modes: &[vk::PresentModeKHR],
    preferred: vk::PresentModeKHR,
) -> vk::PresentModeKHR {
    if modes.contains(&preferred) {
        preferred
    } else {
        vk::PresentModeKHR::FIFO
    }
}

/// A defined current extent wins; otherwise clamp the framebuffer size
pub fn choose_extent(caps: &vk::SurfaceCapabilitiesKHR, framebuffer_size: (u32, u32)) -> vk::Extent2D {
    if caps.current_extent.width != u32::MAX {
        return caps.current_extent;
    }

    let (width, height) = framebuffer_size;
    vk::Extent2D {
        width: width.clamp(caps.min_image_extent.width, caps.max_image_extent.width),
        height: height.clamp(caps.min_image_extent.height, caps.max_image_extent.height),
    }
}

/// Minimum + 2, capped by the maximum when one is declared (0 = none)
pub fn choose_image_count(caps: &vk::SurfaceCapabilitiesKHR) -> u32 {
    let count = caps.min_image_count + EXTRA_SWAPCHAIN_IMAGES;
    if caps.max_image_count > 0 && count > caps.max_image_count {
        caps.max_image_count
    } else {
        count
    }
}

pub fn choose_sharing(families: QueueFamilies) -> (vk::SharingMode, Vec<u32>) {
    if families.is_shared() {
        (vk::SharingMode::EXCLUSIVE, Vec::new())
    } else {
        (
            vk::SharingMode::CONCURRENT,
            vec![families.graphics, families.present],
        )
    }
}

/// A suboptimal acquire still hands out a usable image
pub fn classify_acquire(result: VkResult<(u32, bool)>) -> FrameResult<Acquired> {
    match result {
        Ok((index, _suboptimal)) => Ok(Acquired::Image(index)),
        Err(vk::Result::ERROR_OUT_OF_DATE_KHR) => Ok(Acquired::Stale),
        Err(vk::Result::TIMEOUT) | Err(vk::Result::NOT_READY) => {
            Err(FrameError::Timeout("swapchain image"))
        }
        Err(result) => Err(FrameError::Presentation {
            stage: "acquire",
            result,
        }),
    }
}

/// `Ok(true)` is a suboptimal present: the image was shown but the chain is stale
pub fn classify_present(result: VkResult<bool>) -> FrameResult<Presented> {
    match result {
        Ok(false) => Ok(Presented::Current),
        Ok(true) | Err(vk::Result::ERROR_OUT_OF_DATE_KHR) => Ok(Presented::Stale),
        Err(result) => Err(FrameError::Presentation {
            stage: "present",
            result,
        }),
    }
}

fn create_image_view(device: &ash::Device, image: vk::Image, format: vk::Format) -> FrameResult<vk::ImageView> {
    let create_info = vk::ImageViewCreateInfo::builder()
        .image(image)
        .view_type(vk::ImageViewType::TYPE_2D)
        .format(format)
        .components(vk::ComponentMapping {
            r: vk::ComponentSwizzle::IDENTITY,
            g: vk::ComponentSwizzle::IDENTITY,
            b: vk::ComponentSwizzle::IDENTITY,
            a: vk::ComponentSwizzle::IDENTITY,
        })
        .subresource_range(vk::ImageSubresourceRange {
            aspect_mask: vk::ImageAspectFlags::COLOR,
            base_mip_level: 0,
            level_count: 1,
            base_array_layer: 0,
            layer_count: 1,
        });

    unsafe { device.create_image_view(&create_info, None) }.init_context("image view")
}

/// One swapchain generation. Only exists fully built.
pub struct SwapchainState {
    pub swapchain: vk::SwapchainKHR,
    pub format: vk::Format,
    pub color_space: vk::ColorSpaceKHR,
    pub extent: vk::Extent2D,
    pub present_mode: vk::PresentModeKHR,
    pub images: Vec<vk::Image>,
    pub image_views: Vec<vk::ImageView>,
    pub framebuffers: Vec<vk::Framebuffer>,
    pub render_pass: vk::RenderPass,
    pub pipeline_layout: vk::PipelineLayout,
    pub pipeline: vk::Pipeline,
}

impl SwapchainState {
    pub fn resource_counts(&self) -> ChainResourceCounts {
        ChainResourceCounts {
            images: self.images.len(),
            image_views: self.image_views.len(),
            framebuffers: self.framebuffers.len(),
            pipelines: 1,
            render_passes: 1,
        }
    }
}

pub struct SwapchainManager {
    graphics: Arc<GraphicsContext>,
    loader: khr::Swapchain,
    shaders: ShaderModules,
    preferred_present_mode: vk::PresentModeKHR,
    state: Option<SwapchainState>,
}

impl SwapchainManager {
    /// Takes ownership of `shaders`; they live until the manager is dropped
    pub fn new(
        graphics: Arc<GraphicsContext>,
        shaders: ShaderModules,
        preferred_present_mode: vk::PresentModeKHR,
        framebuffer_size: (u32, u32),
    ) -> FrameResult<Self> {
        let loader = khr::Swapchain::new(&graphics.instance, &graphics.device);
        let mut manager = Self {
            graphics,
            loader,
            shaders,
            preferred_present_mode,
            state: None,
        };

        // On failure the manager drops here and releases the shaders
        let state = manager.build(framebuffer_size)?;
        manager.state = Some(state);
        Ok(manager)
    }

    /// The live generation. Always `Some` outside of a rebuild.
    pub fn state(&self) -> Option<&SwapchainState> {
        self.state.as_ref()
    }

    pub fn image_count(&self) -> u32 {
        self.state.as_ref().map_or(0, |s| s.images.len() as u32)
    }

    /// Live objects of the current generation; all zero between a failed
    /// rebuild and the next successful one
    pub fn resource_counts(&self) -> ChainResourceCounts {
        self.state
            .as_ref()
            .map_or_else(ChainResourceCounts::default, SwapchainState::resource_counts)
    }

    /// Create a complete generation from the current surface capabilities
    pub fn build(&self, framebuffer_size: (u32, u32)) -> FrameResult<SwapchainState> {
        let g = &self.graphics;
        log::info!("Creating swapchain: {}x{}", framebuffer_size.0, framebuffer_size.1);

        let caps = unsafe {
            g.surface_loader
                .get_physical_device_surface_capabilities(g.physical_device, g.surface)
        }
        .init_context("surface capabilities query")?;
        let formats = unsafe {
            g.surface_loader
                .get_physical_device_surface_formats(g.physical_device, g.surface)
        }
        .init_context("surface format query")?;
        let modes = unsafe {
            g.surface_loader
                .get_physical_device_surface_present_modes(g.physical_device, g.surface)
        }
        .init_context("present mode query")?;

        let surface_format = choose_surface_format(&formats).ok_or(FrameError::Init {
            what: "swapchain (no surface formats)",
            result: vk::Result::ERROR_FORMAT_NOT_SUPPORTED,
        })?;
        let present_mode = choose_present_mode(&modes, self.preferred_present_mode);
        let extent = choose_extent(&caps, framebuffer_size);
        let image_count = choose_image_count(&caps);
        let (sharing_mode, family_indices) = choose_sharing(g.queue_families);

        log::info!("Present mode: {:?}, format: {:?}", present_mode, surface_format.format);

        let create_info = vk::SwapchainCreateInfoKHR::builder()
            .surface(g.surface)
            .min_image_count(image_count)
            .image_format(surface_format.format)
            .image_color_space(surface_format.color_space)
            .image_extent(extent)
            .image_array_layers(1)
            .image_usage(vk::ImageUsageFlags::COLOR_ATTACHMENT)
            .image_sharing_mode(sharing_mode)
            .queue_family_indices(&family_indices)
            .pre_transform(caps.current_transform)
            .composite_alpha(vk::CompositeAlphaFlagsKHR::OPAQUE)
            .present_mode(present_mode)
            .clipped(true)
            .old_swapchain(vk::SwapchainKHR::null());

        let swapchain = unsafe { self.loader.create_swapchain(&create_info, None) }
            .init_context("swapchain")?;

        // Released newest first if a later step fails
        let device = &self.graphics.device;
        let mut cleanup = CleanupStack::new();
        cleanup.push({
            let loader = self.loader.clone();
            move || unsafe { loader.destroy_swapchain(swapchain, None) }
        });

        let images = unsafe { self.loader.get_swapchain_images(swapchain) }
            .init_context("swapchain images")?;

        let mut image_views = Vec::with_capacity(images.len());
        for &image in &images {
            let view = create_image_view(device, image, surface_format.format)?;
            cleanup.push({
                let device = device.clone();
                move || unsafe { device.destroy_image_view(view, None) }
            });
            image_views.push(view);
        }

        let render_pass = pipeline::create_render_pass(device, surface_format.format)?;
        cleanup.push({
            let device = device.clone();
            move || unsafe { device.destroy_render_pass(render_pass, None) }
        });

        let framebuffers = pipeline::create_framebuffers(device, &image_views, render_pass, extent)?;
        cleanup.push({
            let device = device.clone();
            let framebuffers = framebuffers.clone();
            move || unsafe {
                for framebuffer in framebuffers {
                    device.destroy_framebuffer(framebuffer, None);
                }
            }
        });

        let (pipeline, pipeline_layout) =
            pipeline::create_graphics_pipeline(device, render_pass, &self.shaders)?;

        cleanup.disarm();

        let state = SwapchainState {
            swapchain,
            format: surface_format.format,
            color_space: surface_format.color_space,
            extent,
            present_mode,
            images,
            image_views,
            framebuffers,
            render_pass,
            pipeline_layout,
            pipeline,
        };

        log::info!("Swapchain built: {:?}", state.resource_counts());
        Ok(state)
    }

    /// Replace the live generation.
    ///
    /// Returns the new image count, or `None` when the window has zero area;
    /// in that case the old generation is kept and nothing is destroyed.
    /// The caller must have idled the device.
    pub fn rebuild(&mut self, framebuffer_size: (u32, u32)) -> FrameResult<Option<u32>> {
        let (width, height) = framebuffer_size;
        if width == 0 || height == 0 {
            log::debug!("Window has zero area, deferring swapchain rebuild");
            return Ok(None);
        }

        if let Some(old) = self.state.take() {
            self.destroy_state(old);
        }

        let state = self.build(framebuffer_size)?;
        let count = state.images.len() as u32;
        self.state = Some(state);
        Ok(Some(count))
    }

    /// Destroy in dependency order: framebuffers, views, pipeline, layout,
    /// render pass, then the chain itself
    fn destroy_state(&self, state: SwapchainState) {
        let device = &self.graphics.device;
        unsafe {
            for framebuffer in state.framebuffers {
                device.destroy_framebuffer(framebuffer, None);
            }
            for view in state.image_views {
                device.destroy_image_view(view, None);
            }
            device.destroy_pipeline(state.pipeline, None);
            device.destroy_pipeline_layout(state.pipeline_layout, None);
            device.destroy_render_pass(state.render_pass, None);
            self.loader.destroy_swapchain(state.swapchain, None);
        }
    }

    /// Acquire the next image, signaling `semaphore` when it is ready
    pub fn acquire_next_image(&self, semaphore: vk::Semaphore, timeout: u64) -> FrameResult<Acquired> {
        let Some(state) = self.state.as_ref() else {
            return Ok(Acquired::Stale);
        };

        let result = unsafe {
            self.loader
                .acquire_next_image(state.swapchain, timeout, semaphore, vk::Fence::null())
        };
        classify_acquire(result)
    }

    /// Queue `image_index` for presentation once `wait` is signaled
    pub fn present(&self, queue: vk::Queue, image_index: u32, wait: vk::Semaphore) -> FrameResult<Presented> {
        let Some(state) = self.state.as_ref() else {
            return Ok(Presented::Stale);
        };

        let swapchains = [state.swapchain];
        let image_indices = [image_index];
        let wait_semaphores = [wait];

        let present_info = vk::PresentInfoKHR::builder()
            .wait_semaphores(&wait_semaphores)
            .swapchains(&swapchains)
            .image_indices(&image_indices);

        classify_present(unsafe { self.loader.queue_present(queue, &present_info) })
    }
}

impl Drop for SwapchainManager {
    fn drop(&mut self) {
        let _ = self.graphics.wait_idle();
        if let Some(state) = self.state.take() {
            self.destroy_state(state);
        }
        self.shaders.destroy(&self.graphics.device);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn caps_with_extent_bounds(min: (u32, u32), max: (u32, u32)) -> vk::SurfaceCapabilitiesKHR {
        vk::SurfaceCapabilitiesKHR {
            current_extent: vk::Extent2D {
                width: u32::MAX,
                height: u32::MAX,
            },
            min_image_extent: vk::Extent2D {
                width: min.0,
                height: min.1,
            },
            max_image_extent: vk::Extent2D {
                width: max.0,
                height: max.1,
            },
            ..Default::default()
        }
    }

    #[test]
    fn test_choose_surface_format_prefers_srgb() {
        let formats = vec![
            vk::SurfaceFormatKHR {
                format: vk::Format::R8G8B8A8_UNORM,
                color_space: vk::ColorSpaceKHR::SRGB_NONLINEAR,
            },
            vk::SurfaceFormatKHR {
                format: vk::Format::B8G8R8A8_SRGB,
                color_space: vk::ColorSpaceKHR::SRGB_NONLINEAR,
            },
        ];

        let chosen = choose_surface_format(&formats).unwrap();
        assert_eq!(chosen.format, vk::Format::B8G8R8A8_SRGB);
        assert_eq!(chosen.color_space, vk::ColorSpaceKHR::SRGB_NONLINEAR);
    }

    #[test]
    fn test_choose_surface_format_falls_back_to_first() {
        let formats = vec![
            vk::SurfaceFormatKHR {
                format: vk::Format::R8G8B8A8_UNORM,
                color_space: vk::ColorSpaceKHR::SRGB_NONLINEAR,
            },
            vk::SurfaceFormatKHR {
                format: vk::Format::B8G8R8A8_UNORM,
                color_space: vk::ColorSpaceKHR::SRGB_NONLINEAR,
            },
        ];

        let chosen = choose_surface_format(&formats).unwrap();
        assert_eq!(chosen.format, vk::Format::R8G8B8A8_UNORM);
        assert!(choose_surface_format(&[]).is_none());
    }

    #[test]
    fn test_choose_present_mode() {
        let modes = vec![vk::PresentModeKHR::FIFO, vk::PresentModeKHR::MAILBOX];
        assert_eq!(
            choose_present_mode(&modes, vk::PresentModeKHR::MAILBOX),
            vk::PresentModeKHR::MAILBOX
        );

        let fifo_only = vec![vk::PresentModeKHR::FIFO];
        assert_eq!(
            choose_present_mode(&fifo_only, vk::PresentModeKHR::MAILBOX),
            vk::PresentModeKHR::FIFO
        );
        assert_eq!(
            choose_present_mode(&fifo_only, vk::PresentModeKHR::IMMEDIATE),
            vk::PresentModeKHR::FIFO
        );
    }

    #[test]
    fn test_choose_extent_uses_defined_current_extent() {
        let caps = vk::SurfaceCapabilitiesKHR {
            current_extent: vk::Extent2D {
                width: 1920,
                height: 1080,
            },
            ..Default::default()
        };

        let extent = choose_extent(&caps, (800, 600));
        assert_eq!(extent.width, 1920);
        assert_eq!(extent.height, 1080);
    }

    #[test]
    fn test_choose_extent_clamps_to_min() {
        let caps = caps_with_extent_bounds((100, 100), (4096, 4096));
        let extent = choose_extent(&caps, (50, 20));
        assert_eq!(extent.width, 100);
        assert_eq!(extent.height, 100);
    }

    #[test]
    fn test_choose_extent_clamps_to_max() {
        let caps = caps_with_extent_bounds((1, 1), (1024, 768));
        let extent = choose_extent(&caps, (5000, 3000));
        assert_eq!(extent.width, 1024);
        assert_eq!(extent.height, 768);
    }

    #[test]
    fn test_choose_extent_stays_within_bounds() {
        let caps = caps_with_extent_bounds((64, 48), (2048, 1536));
        for size in [(0, 0), (64, 48), (800, 600), (2048, 1536), (9999, 1), (1, 9999)] {
            let extent = choose_extent(&caps, size);
            assert!(extent.width >= 64 && extent.width <= 2048);
            assert!(extent.height >= 48 && extent.height <= 1536);
        }
    }

    #[test]
    fn test_choose_image_count() {
        let caps = vk::SurfaceCapabilitiesKHR {
            min_image_count: 2,
            max_image_count: 8,
            ..Default::default()
        };
        assert_eq!(choose_image_count(&caps), 4);

        let capped = vk::SurfaceCapabilitiesKHR {
            min_image_count: 2,
            max_image_count: 3,
            ..Default::default()
        };
        assert_eq!(choose_image_count(&capped), 3);

        // 0 means no upper bound
        let unbounded = vk::SurfaceCapabilitiesKHR {
            min_image_count: 3,
            max_image_count: 0,
            ..Default::default()
        };
        assert_eq!(choose_image_count(&unbounded), 5);
    }

    #[test]
    fn test_choose_sharing() {
        let shared = QueueFamilies {
            graphics: 0,
            present: 0,
        };
        let (mode, indices) = choose_sharing(shared);
        assert_eq!(mode, vk::SharingMode::EXCLUSIVE);
        assert!(indices.is_empty());

        let split = QueueFamilies {
            graphics: 0,
            present: 2,
        };
        let (mode, indices) = choose_sharing(split);
        assert_eq!(mode, vk::SharingMode::CONCURRENT);
        assert_eq!(indices, vec![0, 2]);
    }

    #[test]
    fn test_classify_acquire() {
        assert_eq!(classify_acquire(Ok((2, false))).unwrap(), Acquired::Image(2));
        // Suboptimal still yields the image
        assert_eq!(classify_acquire(Ok((1, true))).unwrap(), Acquired::Image(1));
        assert_eq!(
            classify_acquire(Err(vk::Result::ERROR_OUT_OF_DATE_KHR)).unwrap(),
            Acquired::Stale
        );
        assert!(matches!(
            classify_acquire(Err(vk::Result::TIMEOUT)),
            Err(FrameError::Timeout(_))
        ));
        assert!(matches!(
            classify_acquire(Err(vk::Result::NOT_READY)),
            Err(FrameError::Timeout(_))
        ));
        assert!(matches!(
            classify_acquire(Err(vk::Result::ERROR_SURFACE_LOST_KHR)),
            Err(FrameError::Presentation {
                stage: "acquire",
                result: vk::Result::ERROR_SURFACE_LOST_KHR
            })
        ));
    }

    #[test]
    fn test_classify_present() {
        assert_eq!(classify_present(Ok(false)).unwrap(), Presented::Current);
        assert_eq!(classify_present(Ok(true)).unwrap(), Presented::Stale);
        assert_eq!(
            classify_present(Err(vk::Result::ERROR_OUT_OF_DATE_KHR)).unwrap(),
            Presented::Stale
        );
        assert!(matches!(
            classify_present(Err(vk::Result::ERROR_DEVICE_LOST)),
            Err(FrameError::Presentation {
                stage: "present",
                result: vk::Result::ERROR_DEVICE_LOST
            })
        ));
    }

    #[test]
    fn test_generation_counts_one_view_and_framebuffer_per_image() {
        use ash::vk::Handle;

        let state = SwapchainState {
            swapchain: vk::SwapchainKHR::from_raw(1),
            format: vk::Format::B8G8R8A8_SRGB,
            color_space: vk::ColorSpaceKHR::SRGB_NONLINEAR,
            extent: vk::Extent2D {
                width: 800,
                height: 600,
            },
            present_mode: vk::PresentModeKHR::FIFO,
            images: (10..13).map(vk::Image::from_raw).collect(),
            image_views: (20..23).map(vk::ImageView::from_raw).collect(),
            framebuffers: (30..33).map(vk::Framebuffer::from_raw).collect(),
            render_pass: vk::RenderPass::from_raw(2),
            pipeline_layout: vk::PipelineLayout::from_raw(3),
            pipeline: vk::Pipeline::from_raw(4),
        };

        assert_eq!(
            state.resource_counts(),
            ChainResourceCounts {
                images: 3,
                image_views: 3,
                framebuffers: 3,
                pipelines: 1,
                render_passes: 1,
            }
        );
    }
}
