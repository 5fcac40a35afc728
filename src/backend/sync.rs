// Synchronization primitives
//
// Fences order GPU -> CPU, semaphores order GPU -> GPU. The scheduler owns
// them; these helpers only create, wait and destroy.

use ash::prelude::VkResult;
use ash::vk;

use crate::error::{FrameError, FrameResult, InitContext};

pub fn create_semaphore(device: &ash::Device) -> FrameResult<vk::Semaphore> {
    let semaphore_info = vk::SemaphoreCreateInfo::builder();
    unsafe { device.create_semaphore(&semaphore_info, None) }.init_context("semaphore")
}

/// Frame fences start signaled so the first wait on each slot returns at once
pub fn create_fence(device: &ash::Device, signaled: bool) -> FrameResult<vk::Fence> {
    let flags = if signaled {
        vk::FenceCreateFlags::SIGNALED
    } else {
        vk::FenceCreateFlags::empty()
    };
    let fence_info = vk::FenceCreateInfo::builder().flags(flags);
    unsafe { device.create_fence(&fence_info, None) }.init_context("fence")
}

pub fn wait_for_fence(device: &ash::Device, fence: vk::Fence, timeout: u64) -> FrameResult<()> {
    classify_wait(unsafe { device.wait_for_fences(&[fence], true, timeout) })
}

/// An expired fence wait is a timeout, not a generic Vulkan failure
pub fn classify_wait(result: VkResult<()>) -> FrameResult<()> {
    match result {
        Ok(()) => Ok(()),
        Err(vk::Result::TIMEOUT) => Err(FrameError::Timeout("frame fence")),
        Err(e) => Err(e.into()),
    }
}

pub fn reset_fence(device: &ash::Device, fence: vk::Fence) -> FrameResult<()> {
    unsafe { device.reset_fences(&[fence]) }?;
    Ok(())
}
