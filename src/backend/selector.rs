// Physical device selection
//
// Every enumerated GPU becomes a DeviceCandidate. Ineligible candidates
// (no graphics+present families, no swapchain extension, no surface formats
// or present modes) are skipped; the rest are scored and the first maximum
// wins. The scoring itself is pure so it can be tested without a GPU.

use ash::extensions::khr;
use ash::vk;
use serde::Deserialize;
use std::ffi::{c_char, CStr};

use crate::error::{FrameError, FrameResult};

/// Points awarded to discrete GPUs on top of the image dimension proxy
pub const DISCRETE_GPU_BONUS: u32 = 1000;

/// Device features a candidate must expose, or its score drops to zero.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RequiredFeature {
    GeometryShader,
    TessellationShader,
    SamplerAnisotropy,
    FillModeNonSolid,
    WideLines,
    MultiDrawIndirect,
}

impl RequiredFeature {
    pub fn is_supported(self, features: &vk::PhysicalDeviceFeatures) -> bool {
        let flag = match self {
            RequiredFeature::GeometryShader => features.geometry_shader,
            RequiredFeature::TessellationShader => features.tessellation_shader,
            RequiredFeature::SamplerAnisotropy => features.sampler_anisotropy,
            RequiredFeature::FillModeNonSolid => features.fill_mode_non_solid,
            RequiredFeature::WideLines => features.wide_lines,
            RequiredFeature::MultiDrawIndirect => features.multi_draw_indirect,
        };
        flag == vk::TRUE
    }
}

/// Queue family lookup result, possibly incomplete.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct QueueFamilyIndices {
    pub graphics: Option<u32>,
    pub present: Option<u32>,
}

impl QueueFamilyIndices {
    /// Scan `(queue flags, can present)` pairs in family order.
    ///
    /// A family that does both wins outright; otherwise the first graphics
    /// family is paired with the first presenting family.
    pub fn find<I>(families: I) -> Self
    where
        I: IntoIterator<Item = (vk::QueueFlags, bool)>,
    {
        let mut indices = Self::default();

        for (index, (flags, can_present)) in families.into_iter().enumerate() {
            let index = index as u32;
            let graphics = flags.contains(vk::QueueFlags::GRAPHICS);

            if graphics && can_present {
                return Self {
                    graphics: Some(index),
                    present: Some(index),
                };
            }
            if graphics && indices.graphics.is_none() {
                indices.graphics = Some(index);
            }
            if can_present && indices.present.is_none() {
                indices.present = Some(index);
            }
        }

        indices
    }

    pub fn is_complete(&self) -> bool {
        self.graphics.is_some() && self.present.is_some()
    }

    pub fn complete(&self) -> Option<QueueFamilies> {
        Some(QueueFamilies {
            graphics: self.graphics?,
            present: self.present?,
        })
    }
}

/// Resolved graphics and present families.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QueueFamilies {
    pub graphics: u32,
    pub present: u32,
}

impl QueueFamilies {
    pub fn is_shared(&self) -> bool {
        self.graphics == self.present
    }

    /// Distinct family indices, one queue is created per entry
    pub fn unique(&self) -> Vec<u32> {
        if self.is_shared() {
            vec![self.graphics]
        } else {
            vec![self.graphics, self.present]
        }
    }
}

/// A GPU under consideration. Only lives for the duration of selection.
#[derive(Debug, Clone)]
pub struct DeviceCandidate<H = vk::PhysicalDevice> {
    pub handle: H,
    pub name: String,
    pub device_type: vk::PhysicalDeviceType,
    pub max_image_dimension_2d: u32,
    pub features: vk::PhysicalDeviceFeatures,
    pub queue_families: QueueFamilyIndices,
    pub supports_swapchain: bool,
    pub surface_adequate: bool,
}

impl<H> DeviceCandidate<H> {
    pub fn is_eligible(&self) -> bool {
        self.queue_families.is_complete() && self.supports_swapchain && self.surface_adequate
    }

    pub fn score(&self, required: &[RequiredFeature]) -> u32 {
        if required.iter().any(|feature| !feature.is_supported(&self.features)) {
            return 0;
        }

        let mut score = 0u32;
        if self.device_type == vk::PhysicalDeviceType::DISCRETE_GPU {
            score += DISCRETE_GPU_BONUS;
        }
        score.saturating_add(self.max_image_dimension_2d)
    }
}

/// Outcome of a successful selection
#[derive(Debug, Clone)]
pub struct SelectedDevice<H = vk::PhysicalDevice> {
    pub handle: H,
    pub name: String,
    pub queue_families: QueueFamilies,
    pub score: u32,
}

/// Pick the highest-scoring eligible candidate. Ties keep the earliest one.
pub fn select_device<H>(
    candidates: Vec<DeviceCandidate<H>>,
    required: &[RequiredFeature],
) -> FrameResult<SelectedDevice<H>> {
    let mut best: Option<(u32, DeviceCandidate<H>)> = None;

    for candidate in candidates {
        if !candidate.is_eligible() {
            log::debug!("Skipping GPU '{}': not eligible", candidate.name);
            continue;
        }

        let score = candidate.score(required);
        log::info!("GPU candidate '{}' ({:?}): score {}", candidate.name, candidate.device_type, score);

        if best.as_ref().map_or(true, |(best_score, _)| score > *best_score) {
            best = Some((score, candidate));
        }
    }

    match best {
        Some((score, candidate)) if score > 0 => {
            let queue_families = candidate
                .queue_families
                .complete()
                .ok_or(FrameError::NoSuitableDevice)?;
            Ok(SelectedDevice {
                handle: candidate.handle,
                name: candidate.name,
                queue_families,
                score,
            })
        }
        _ => Err(FrameError::NoSuitableDevice),
    }
}

/// Read a name out of a fixed-size, NUL-terminated Vulkan array
pub fn raw_name(raw: &[c_char]) -> Option<&CStr> {
    // c_char and u8 share size and alignment
    let bytes = unsafe { std::slice::from_raw_parts(raw.as_ptr().cast::<u8>(), raw.len()) };
    CStr::from_bytes_until_nul(bytes).ok()
}

pub fn has_extension(extensions: &[vk::ExtensionProperties], name: &CStr) -> bool {
    extensions.iter().any(|ext| raw_name(&ext.extension_name) == Some(name))
}

/// Query every physical device the instance exposes against `surface`.
pub fn enumerate_candidates(
    instance: &ash::Instance,
    surface_loader: &khr::Surface,
    surface: vk::SurfaceKHR,
) -> FrameResult<Vec<DeviceCandidate>> {
    let devices = unsafe { instance.enumerate_physical_devices() }?;

    if devices.is_empty() {
        log::error!("No Vulkan-capable GPU found");
        return Err(FrameError::NoSuitableDevice);
    }

    devices
        .into_iter()
        .map(|device| describe_device(instance, surface_loader, surface, device))
        .collect()
}

fn describe_device(
    instance: &ash::Instance,
    surface_loader: &khr::Surface,
    surface: vk::SurfaceKHR,
    device: vk::PhysicalDevice,
) -> FrameResult<DeviceCandidate> {
    let props = unsafe { instance.get_physical_device_properties(device) };
    let features = unsafe { instance.get_physical_device_features(device) };
    let name = raw_name(&props.device_name)
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_default();

    let families = unsafe { instance.get_physical_device_queue_family_properties(device) };
    let mut flags_and_present = Vec::with_capacity(families.len());
    for (index, family) in families.iter().enumerate() {
        let can_present = unsafe {
            surface_loader.get_physical_device_surface_support(device, index as u32, surface)
        }?;
        flags_and_present.push((family.queue_flags, can_present));
    }
    let queue_families = QueueFamilyIndices::find(flags_and_present);

    let extensions = unsafe { instance.enumerate_device_extension_properties(device) }?;
    let supports_swapchain = has_extension(&extensions, khr::Swapchain::name());

    // Swapchain support can only be queried meaningfully once the extension exists
    let surface_adequate = supports_swapchain && {
        let formats =
            unsafe { surface_loader.get_physical_device_surface_formats(device, surface) }?;
        let modes =
            unsafe { surface_loader.get_physical_device_surface_present_modes(device, surface) }?;
        !formats.is_empty() && !modes.is_empty()
    };

    Ok(DeviceCandidate {
        handle: device,
        name,
        device_type: props.device_type,
        max_image_dimension_2d: props.limits.max_image_dimension2_d,
        features,
        queue_families,
        supports_swapchain,
        surface_adequate,
    })
}
