// Graphics context - Core GPU interface
//
// Responsibilities:
// - Instance creation with validation layers
// - Presentation surface for the window
// - Physical device selection (see selector.rs)
// - Logical device + graphics/present queue creation

use ash::extensions::{ext, khr};
use ash::{vk, Entry};
use std::ffi::{c_char, CStr, CString};
use std::sync::Arc;

use super::cleanup::CleanupStack;
use super::selector::{self, QueueFamilies, RequiredFeature};
use crate::error::{FrameError, FrameResult, InitContext};
use crate::window::WindowSystem;

const VALIDATION_LAYER: &CStr = c"VK_LAYER_KHRONOS_validation";
const ENGINE_NAME: &CStr = c"vFrame Engine";

/// Everything a context needs before it can talk to the GPU
pub struct ContextDesc<'a> {
    pub app_name: &'a str,
    pub enable_validation: bool,
    pub required_features: &'a [RequiredFeature],
}

/// Exclusive owner of the instance, surface, device and queues.
///
/// Everything else in the engine holds an `Arc` to this and is dropped first.
pub struct GraphicsContext {
    pub device: ash::Device,
    pub physical_device: vk::PhysicalDevice,
    pub surface: vk::SurfaceKHR,
    pub surface_loader: khr::Surface,
    pub instance: ash::Instance,
    _entry: Entry,

    pub graphics_queue: vk::Queue,
    pub present_queue: vk::Queue,
    pub queue_families: QueueFamilies,

    pub device_name: String,

    debug_utils: Option<(ext::DebugUtils, vk::DebugUtilsMessengerEXT)>,
}

impl GraphicsContext {
    pub fn new<W: WindowSystem>(window: &W, desc: &ContextDesc) -> FrameResult<Arc<Self>> {
        log::info!("Creating Vulkan context: {}", desc.app_name);

        // Step 1: Load Vulkan library
        let entry = unsafe { Entry::load() }?;

        // Step 2: Create instance
        let enable_validation = desc.enable_validation && Self::validation_layer_available(&entry);
        let instance = Self::create_instance(&entry, window, desc.app_name, enable_validation)?;

        // Released newest first if any later step fails
        let mut cleanup = CleanupStack::new();
        cleanup.push({
            let instance = instance.clone();
            move || unsafe { instance.destroy_instance(None) }
        });

        // Step 3: Setup debug messenger if validation enabled
        let debug_utils = if enable_validation {
            let (debug_utils, messenger) = Self::setup_debug_messenger(&entry, &instance)?;
            cleanup.push({
                let debug_utils = debug_utils.clone();
                move || unsafe { debug_utils.destroy_debug_utils_messenger(messenger, None) }
            });
            Some((debug_utils, messenger))
        } else {
            None
        };

        // Step 4: Create the presentation surface
        let surface_loader = khr::Surface::new(&entry, &instance);
        let surface = unsafe {
            ash_window::create_surface(
                &entry,
                &instance,
                window.raw_display_handle(),
                window.raw_window_handle(),
                None,
            )
        }
        .init_context("window surface")?;
        cleanup.push({
            let surface_loader = surface_loader.clone();
            move || unsafe { surface_loader.destroy_surface(surface, None) }
        });

        // Step 5: Pick physical device (GPU)
        let candidates = selector::enumerate_candidates(&instance, &surface_loader, surface)?;
        let selected = selector::select_device(candidates, desc.required_features)?;
        log::info!("Selected GPU: {} (score {})", selected.name, selected.score);

        // Step 6: Create logical device
        let device = Self::create_logical_device(&instance, selected.handle, selected.queue_families)?;
        let graphics_queue = unsafe { device.get_device_queue(selected.queue_families.graphics, 0) };
        let present_queue = unsafe { device.get_device_queue(selected.queue_families.present, 0) };

        // From here on Drop owns the teardown
        cleanup.disarm();

        let properties = unsafe { instance.get_physical_device_properties(selected.handle) };
        log::info!(
            "API Version: {}.{}.{}",
            vk::api_version_major(properties.api_version),
            vk::api_version_minor(properties.api_version),
            vk::api_version_patch(properties.api_version)
        );

        Ok(Arc::new(Self {
            device,
            physical_device: selected.handle,
            surface,
            surface_loader,
            instance,
            _entry: entry,
            graphics_queue,
            present_queue,
            queue_families: selected.queue_families,
            device_name: selected.name,
            debug_utils,
        }))
    }

    fn validation_layer_available(entry: &Entry) -> bool {
        let available = entry
            .enumerate_instance_layer_properties()
            .map(|layers| {
                layers
                    .iter()
                    .any(|layer| selector::raw_name(&layer.layer_name) == Some(VALIDATION_LAYER))
            })
            .unwrap_or(false);

        if !available {
            log::warn!("Validation layers requested but not available, continuing without them");
        }
        available
    }

    fn create_instance<W: WindowSystem>(
        entry: &Entry,
        window: &W,
        app_name: &str,
        enable_validation: bool,
    ) -> FrameResult<ash::Instance> {
        let app_name_cstr = CString::new(app_name)
            .map_err(|_| FrameError::Window(format!("application name {:?} contains NUL", app_name)))?;

        let app_info = vk::ApplicationInfo::builder()
            .application_name(&app_name_cstr)
            .application_version(vk::make_api_version(0, 1, 0, 0))
            .engine_name(ENGINE_NAME)
            .engine_version(vk::make_api_version(0, 1, 0, 0))
            .api_version(vk::API_VERSION_1_3);

        // Platform surface extensions come from the window's display handle
        let mut extensions: Vec<*const c_char> =
            ash_window::enumerate_required_extensions(window.raw_display_handle())
                .init_context("surface extension list")?
                .to_vec();

        if enable_validation {
            extensions.push(ext::DebugUtils::name().as_ptr());
        }

        let mut flags = vk::InstanceCreateFlags::empty();
        if cfg!(target_os = "macos") {
            extensions.push(vk::KhrPortabilityEnumerationFn::name().as_ptr());
            flags |= vk::InstanceCreateFlags::ENUMERATE_PORTABILITY_KHR;
        }

        let layer_names = if enable_validation {
            vec![VALIDATION_LAYER.as_ptr()]
        } else {
            vec![]
        };

        let create_info = vk::InstanceCreateInfo::builder()
            .application_info(&app_info)
            .enabled_extension_names(&extensions)
            .enabled_layer_names(&layer_names)
            .flags(flags);

        unsafe { entry.create_instance(&create_info, None) }.init_context("Vulkan instance")
    }

    fn setup_debug_messenger(
        entry: &Entry,
        instance: &ash::Instance,
    ) -> FrameResult<(ext::DebugUtils, vk::DebugUtilsMessengerEXT)> {
        let debug_utils = ext::DebugUtils::new(entry, instance);

        let create_info = vk::DebugUtilsMessengerCreateInfoEXT::builder()
            .message_severity(
                vk::DebugUtilsMessageSeverityFlagsEXT::WARNING
                    | vk::DebugUtilsMessageSeverityFlagsEXT::ERROR,
            )
            .message_type(
                vk::DebugUtilsMessageTypeFlagsEXT::GENERAL
                    | vk::DebugUtilsMessageTypeFlagsEXT::VALIDATION
                    | vk::DebugUtilsMessageTypeFlagsEXT::PERFORMANCE,
            )
            .pfn_user_callback(Some(debug_callback));

        let messenger = unsafe { debug_utils.create_debug_utils_messenger(&create_info, None) }
            .init_context("debug messenger")?;

        Ok((debug_utils, messenger))
    }

    fn create_logical_device(
        instance: &ash::Instance,
        physical_device: vk::PhysicalDevice,
        queue_families: QueueFamilies,
    ) -> FrameResult<ash::Device> {
        let queue_priorities = [1.0];
        let queue_create_infos: Vec<vk::DeviceQueueCreateInfo> = queue_families
            .unique()
            .into_iter()
            .map(|family| {
                vk::DeviceQueueCreateInfo::builder()
                    .queue_family_index(family)
                    .queue_priorities(&queue_priorities)
                    .build()
            })
            .collect();

        let extensions = [khr::Swapchain::name().as_ptr()];

        // Nothing in the pipeline needs optional features enabled
        let features = vk::PhysicalDeviceFeatures::default();

        let create_info = vk::DeviceCreateInfo::builder()
            .queue_create_infos(&queue_create_infos)
            .enabled_extension_names(&extensions)
            .enabled_features(&features);

        unsafe { instance.create_device(physical_device, &create_info, None) }
            .init_context("logical device")
    }

    /// Wait for device to be idle (e.g., before cleanup or a rebuild)
    pub fn wait_idle(&self) -> FrameResult<()> {
        unsafe { self.device.device_wait_idle() }?;
        Ok(())
    }
}

impl Drop for GraphicsContext {
    fn drop(&mut self) {
        log::info!("Destroying Vulkan context...");

        let _ = self.wait_idle();

        // Cleanup in reverse order
        unsafe {
            self.device.destroy_device(None);
            self.surface_loader.destroy_surface(self.surface, None);

            if let Some((debug_utils, messenger)) = self.debug_utils.take() {
                debug_utils.destroy_debug_utils_messenger(messenger, None);
            }

            self.instance.destroy_instance(None);
        }
    }
}

// Debug callback for validation layers
unsafe extern "system" fn debug_callback(
    message_severity: vk::DebugUtilsMessageSeverityFlagsEXT,
    _message_type: vk::DebugUtilsMessageTypeFlagsEXT,
    p_callback_data: *const vk::DebugUtilsMessengerCallbackDataEXT,
    _p_user_data: *mut std::ffi::c_void,
) -> vk::Bool32 {
    let message = CStr::from_ptr((*p_callback_data).p_message);

    match message_severity {
        vk::DebugUtilsMessageSeverityFlagsEXT::ERROR => {
            log::error!("[Vulkan] {}", message.to_string_lossy());
        }
        vk::DebugUtilsMessageSeverityFlagsEXT::WARNING => {
            log::warn!("[Vulkan] {}", message.to_string_lossy());
        }
        _ => {
            log::debug!("[Vulkan] {}", message.to_string_lossy());
        }
    }

    vk::FALSE
}
