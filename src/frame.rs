// Frame scheduling
//
// Drives one acquire -> record -> submit -> present cycle per call with up to
// MAX_FRAMES_IN_FLIGHT frames queued on the GPU. Per-frame objects (command
// buffer, image-available semaphore, in-flight fence) and per-image objects
// (render-finished semaphore, claiming frame) are separate collections.
//
// The GPU side sits behind FrameBackend so the state machine runs the same
// against Vulkan and against the simulated backend in the tests below.

use std::fmt;
use std::time::Duration;

use crate::error::{FrameError, FrameResult};

/// Frames the CPU may record ahead of the GPU
pub const MAX_FRAMES_IN_FLIGHT: usize = 2;

/// Result of asking the presentation engine for an image
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Acquired {
    Image(u32),
    /// The chain no longer matches the surface
    Stale,
}

/// Result of queueing an image for presentation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Presented {
    Current,
    /// Presented, but the chain is suboptimal or out of date
    Stale,
}

/// What a single draw_frame call did
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameOutcome {
    Presented { frame_slot: usize, image_index: u32 },
    /// Presented, then the chain was rebuilt
    PresentedStale { frame_slot: usize, image_index: u32 },
    /// Nothing was submitted this call
    Skipped,
}

/// Live objects of one swapchain generation
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ChainResourceCounts {
    pub images: usize,
    pub image_views: usize,
    pub framebuffers: usize,
    pub pipelines: usize,
    pub render_passes: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SchedulerState {
    Ready,
    Drawing,
    RecreatingSwapchain,
    Destroyed,
}

/// GPU operations the scheduler needs.
///
/// Handles are plain copyable values; the scheduler owns the lifetime of every
/// fence and semaphore it creates and hands them back for destruction.
pub trait FrameBackend {
    type Fence: Copy + PartialEq + fmt::Debug;
    type Semaphore: Copy + PartialEq + fmt::Debug;
    type CommandBuffer: Copy + fmt::Debug;

    fn create_fence(&mut self, signaled: bool) -> FrameResult<Self::Fence>;
    fn create_semaphore(&mut self) -> FrameResult<Self::Semaphore>;
    fn allocate_command_buffer(&mut self) -> FrameResult<Self::CommandBuffer>;
    fn destroy_fence(&mut self, fence: Self::Fence);
    fn destroy_semaphore(&mut self, semaphore: Self::Semaphore);

    fn wait_for_fence(&mut self, fence: Self::Fence, timeout_ns: u64) -> FrameResult<()>;
    fn reset_fence(&mut self, fence: Self::Fence) -> FrameResult<()>;

    fn acquire_next_image(&mut self, signal: Self::Semaphore, timeout_ns: u64) -> FrameResult<Acquired>;
    fn record(&mut self, cmd: Self::CommandBuffer, image_index: u32) -> FrameResult<()>;
    fn submit(
        &mut self,
        cmd: Self::CommandBuffer,
        wait: Self::Semaphore,
        signal: Self::Semaphore,
        fence: Self::Fence,
    ) -> FrameResult<()>;
    fn present(&mut self, image_index: u32, wait: Self::Semaphore) -> FrameResult<Presented>;

    fn wait_idle(&mut self) -> FrameResult<()>;
    /// Replace the chain. `None` means the rebuild had to be deferred and the
    /// old chain is still live.
    fn rebuild_chain(&mut self) -> FrameResult<Option<u32>>;
    fn image_count(&self) -> u32;
    fn chain_resources(&self) -> ChainResourceCounts;
}

struct FrameSlot<B: FrameBackend> {
    command_buffer: B::CommandBuffer,
    image_available: B::Semaphore,
    in_flight: B::Fence,
}

struct PresentationSlot<B: FrameBackend> {
    render_finished: B::Semaphore,
    /// Frame slot whose fence guards this image
    claimed_by: Option<usize>,
}

pub struct FrameScheduler<B: FrameBackend> {
    backend: B,
    frames: Vec<FrameSlot<B>>,
    images: Vec<PresentationSlot<B>>,
    current_frame: usize,
    state: SchedulerState,
    resize_requested: bool,
    chain_deferred: bool,
    timeout_ns: u64,
    #[cfg(test)]
    transitions: Vec<SchedulerState>,
}

impl<B: FrameBackend> FrameScheduler<B> {
    /// Create every frame slot plus one presentation slot per chain image.
    ///
    /// `fence_timeout` bounds fence waits and acquires; `None` waits forever.
    pub fn new(backend: B, fence_timeout: Option<Duration>) -> FrameResult<Self> {
        let timeout_ns = fence_timeout.map_or(u64::MAX, |d| u64::try_from(d.as_nanos()).unwrap_or(u64::MAX));

        // Anything created before a failure is released by Drop
        let mut scheduler = Self {
            backend,
            frames: Vec::with_capacity(MAX_FRAMES_IN_FLIGHT),
            images: Vec::new(),
            current_frame: 0,
            state: SchedulerState::Ready,
            resize_requested: false,
            chain_deferred: false,
            timeout_ns,
            #[cfg(test)]
            transitions: vec![SchedulerState::Ready],
        };

        for _ in 0..MAX_FRAMES_IN_FLIGHT {
            let image_available = scheduler.backend.create_semaphore()?;
            let in_flight = match scheduler.backend.create_fence(true) {
                Ok(fence) => fence,
                Err(e) => {
                    scheduler.backend.destroy_semaphore(image_available);
                    return Err(e);
                }
            };
            let command_buffer = match scheduler.backend.allocate_command_buffer() {
                Ok(cmd) => cmd,
                Err(e) => {
                    scheduler.backend.destroy_semaphore(image_available);
                    scheduler.backend.destroy_fence(in_flight);
                    return Err(e);
                }
            };
            scheduler.frames.push(FrameSlot {
                command_buffer,
                image_available,
                in_flight,
            });
        }

        let image_count = scheduler.backend.image_count();
        scheduler.resize_presentation_slots(image_count)?;

        log::info!(
            "Frame scheduler ready: {} frames in flight, {} swapchain images",
            MAX_FRAMES_IN_FLIGHT,
            image_count
        );
        Ok(scheduler)
    }

    pub fn state(&self) -> SchedulerState {
        self.state
    }

    /// Frame slot the next draw_frame call will use
    pub fn current_frame(&self) -> usize {
        self.current_frame
    }

    pub fn presentation_slot_count(&self) -> usize {
        self.images.len()
    }

    pub fn backend(&self) -> &B {
        &self.backend
    }

    pub fn backend_mut(&mut self) -> &mut B {
        &mut self.backend
    }

    /// Rebuild the chain after the next present
    pub fn request_resize(&mut self) {
        self.resize_requested = true;
    }

    pub fn draw_frame(&mut self) -> FrameResult<FrameOutcome> {
        if self.state == SchedulerState::Destroyed {
            return Err(FrameError::Destroyed);
        }

        // Window had zero area last time; try again before touching any slot
        if self.chain_deferred && !self.recreate_swapchain()? {
            return Ok(FrameOutcome::Skipped);
        }

        self.transition(SchedulerState::Drawing);

        let frame = self.current_frame;
        let (cmd, image_available, in_flight) = {
            let slot = &self.frames[frame];
            (slot.command_buffer, slot.image_available, slot.in_flight)
        };

        self.backend.wait_for_fence(in_flight, self.timeout_ns)?;

        let image_index = match self.backend.acquire_next_image(image_available, self.timeout_ns)? {
            Acquired::Image(index) => index,
            Acquired::Stale => {
                log::debug!("Swapchain out of date on acquire, rebuilding");
                self.recreate_swapchain()?;
                return Ok(FrameOutcome::Skipped);
            }
        };

        let image = image_index as usize;
        let claimed_by = match self.images.get(image) {
            Some(slot) => slot.claimed_by,
            None => {
                return Err(FrameError::ImageIndexOutOfRange {
                    index: image_index,
                    count: self.images.len(),
                })
            }
        };

        // Another frame may still be rendering into this image
        if let Some(owner) = claimed_by {
            let fence = self.frames[owner].in_flight;
            self.backend.wait_for_fence(fence, self.timeout_ns)?;
        }

        self.backend.reset_fence(in_flight)?;
        for slot in &mut self.images {
            if slot.claimed_by == Some(frame) {
                slot.claimed_by = None;
            }
        }
        self.images[image].claimed_by = Some(frame);
        let render_finished = self.images[image].render_finished;

        self.backend.record(cmd, image_index)?;
        self.backend.submit(cmd, image_available, render_finished, in_flight)?;
        let presented = self.backend.present(image_index, render_finished)?;

        let outcome = if presented == Presented::Stale || self.resize_requested {
            self.resize_requested = false;
            self.recreate_swapchain()?;
            FrameOutcome::PresentedStale {
                frame_slot: frame,
                image_index,
            }
        } else {
            FrameOutcome::Presented {
                frame_slot: frame,
                image_index,
            }
        };

        self.current_frame = (self.current_frame + 1) % MAX_FRAMES_IN_FLIGHT;
        Ok(outcome)
    }

    /// Returns false when the rebuild was deferred
    fn recreate_swapchain(&mut self) -> FrameResult<bool> {
        self.transition(SchedulerState::RecreatingSwapchain);
        self.backend.wait_idle()?;

        let rebuilt = match self.backend.rebuild_chain()? {
            Some(image_count) => {
                self.resize_presentation_slots(image_count)?;
                for slot in &mut self.images {
                    slot.claimed_by = None;
                }
                // The new chain already matches the window
                self.resize_requested = false;
                self.chain_deferred = false;
                log::debug!("Chain rebuilt: {:?}", self.backend.chain_resources());
                true
            }
            None => {
                self.chain_deferred = true;
                false
            }
        };

        self.transition(SchedulerState::Ready);
        Ok(rebuilt)
    }

    fn resize_presentation_slots(&mut self, image_count: u32) -> FrameResult<()> {
        let image_count = image_count as usize;
        if self.images.len() == image_count {
            return Ok(());
        }

        for slot in self.images.drain(..) {
            self.backend.destroy_semaphore(slot.render_finished);
        }
        for _ in 0..image_count {
            let render_finished = self.backend.create_semaphore()?;
            self.images.push(PresentationSlot {
                render_finished,
                claimed_by: None,
            });
        }
        Ok(())
    }

    /// Idle the device and destroy every sync object. Safe to call twice.
    pub fn teardown(&mut self) {
        if self.state == SchedulerState::Destroyed {
            return;
        }

        if let Err(e) = self.backend.wait_idle() {
            log::warn!("wait_idle failed during teardown: {}", e);
        }

        for slot in self.frames.drain(..) {
            self.backend.destroy_semaphore(slot.image_available);
            self.backend.destroy_fence(slot.in_flight);
        }
        for slot in self.images.drain(..) {
            self.backend.destroy_semaphore(slot.render_finished);
        }

        self.transition(SchedulerState::Destroyed);
        log::info!("Frame scheduler destroyed");
    }

    fn transition(&mut self, next: SchedulerState) {
        if self.state != next {
            log::trace!("Scheduler {:?} -> {:?}", self.state, next);
            self.state = next;
            #[cfg(test)]
            self.transitions.push(next);
        }
    }

    #[cfg(test)]
    fn transitions(&self) -> &[SchedulerState] {
        &self.transitions
    }
}

impl<B: FrameBackend> Drop for FrameScheduler<B> {
    fn drop(&mut self) {
        self.teardown();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ash::vk;
    use std::collections::{HashMap, HashSet, VecDeque};

    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    enum Call {
        WaitFence(u32),
        ResetFence(u32),
        Acquire,
        Record(u32),
        Submit,
        Present(u32),
        WaitIdle,
        Rebuild,
    }

    /// Simulated GPU: a submitted fence completes when someone waits on it
    #[derive(Default)]
    struct MockGpu {
        next_handle: u32,
        signaled: HashMap<u32, bool>,
        pending: HashSet<u32>,
        semaphores: HashSet<u32>,
        image_count: u32,
        next_image: u32,
        recording_image: Option<u32>,
        in_flight: HashSet<usize>,
        fence_submission: HashMap<u32, usize>,
        image_submission: HashMap<u32, usize>,

        chain: ChainResourceCounts,
        chain_destroy_order: Vec<&'static str>,

        acquire_images: VecDeque<u32>,
        acquire_stale_on: HashSet<usize>,
        present_stale_on: HashSet<usize>,
        present_fail_on: Option<usize>,
        rebuild_counts: VecDeque<u32>,
        deferred_rebuilds: usize,

        acquires: usize,
        presents: usize,
        submits: usize,
        rebuilds: usize,
        last_timeout: Option<u64>,
        max_unsignaled: usize,
        calls: Vec<Call>,
    }

    impl MockGpu {
        fn with_images(image_count: u32) -> Self {
            let mut gpu = Self {
                image_count,
                ..Default::default()
            };
            gpu.create_chain();
            gpu
        }

        fn create_chain(&mut self) {
            let images = self.image_count as usize;
            self.chain = ChainResourceCounts {
                images,
                image_views: images,
                framebuffers: images,
                pipelines: 1,
                render_passes: 1,
            };
        }

        /// Same order the swapchain manager tears a generation down in
        fn destroy_chain(&mut self) {
            self.chain.framebuffers = 0;
            self.chain_destroy_order.push("framebuffers");
            self.chain.image_views = 0;
            self.chain_destroy_order.push("image_views");
            self.chain.pipelines = 0;
            self.chain_destroy_order.push("pipeline");
            self.chain_destroy_order.push("pipeline_layout");
            self.chain.render_passes = 0;
            self.chain_destroy_order.push("render_pass");
            self.chain.images = 0;
            self.chain_destroy_order.push("swapchain");
            assert_eq!(self.chain, ChainResourceCounts::default());
        }

        fn handle(&mut self) -> u32 {
            self.next_handle += 1;
            self.next_handle
        }

        fn live_fences(&self) -> usize {
            self.signaled.len()
        }

        fn unsignaled(&self) -> usize {
            self.signaled.values().filter(|s| !**s).count()
        }
    }

    impl FrameBackend for MockGpu {
        type Fence = u32;
        type Semaphore = u32;
        type CommandBuffer = u32;

        fn create_fence(&mut self, signaled: bool) -> FrameResult<u32> {
            let fence = self.handle();
            self.signaled.insert(fence, signaled);
            Ok(fence)
        }

        fn create_semaphore(&mut self) -> FrameResult<u32> {
            let semaphore = self.handle();
            self.semaphores.insert(semaphore);
            Ok(semaphore)
        }

        fn allocate_command_buffer(&mut self) -> FrameResult<u32> {
            Ok(self.handle())
        }

        fn destroy_fence(&mut self, fence: u32) {
            assert!(self.signaled.remove(&fence).is_some(), "double destroy of fence");
            self.pending.remove(&fence);
        }

        fn destroy_semaphore(&mut self, semaphore: u32) {
            assert!(self.semaphores.remove(&semaphore), "double destroy of semaphore");
        }

        fn wait_for_fence(&mut self, fence: u32, timeout_ns: u64) -> FrameResult<()> {
            self.calls.push(Call::WaitFence(fence));
            self.last_timeout = Some(timeout_ns);
            let signaled = self.signaled[&fence];
            assert!(signaled || self.pending.contains(&fence), "wait on a reset fence that was never submitted");
            if self.pending.remove(&fence) {
                if let Some(id) = self.fence_submission.remove(&fence) {
                    self.in_flight.remove(&id);
                }
            }
            self.signaled.insert(fence, true);
            Ok(())
        }

        fn reset_fence(&mut self, fence: u32) -> FrameResult<()> {
            self.calls.push(Call::ResetFence(fence));
            self.signaled.insert(fence, false);
            Ok(())
        }

        fn acquire_next_image(&mut self, _signal: u32, _timeout_ns: u64) -> FrameResult<Acquired> {
            self.calls.push(Call::Acquire);
            self.acquires += 1;
            if self.acquire_stale_on.contains(&self.acquires) {
                return Ok(Acquired::Stale);
            }
            if let Some(index) = self.acquire_images.pop_front() {
                return Ok(Acquired::Image(index));
            }
            let index = self.next_image;
            self.next_image = (self.next_image + 1) % self.image_count;
            Ok(Acquired::Image(index))
        }

        fn record(&mut self, _cmd: u32, image_index: u32) -> FrameResult<()> {
            self.calls.push(Call::Record(image_index));
            self.recording_image = Some(image_index);
            Ok(())
        }

        fn submit(&mut self, _cmd: u32, _wait: u32, _signal: u32, fence: u32) -> FrameResult<()> {
            self.calls.push(Call::Submit);
            let image = self.recording_image.take().expect("submit without record");

            if let Some(previous) = self.image_submission.get(&image) {
                assert!(!self.in_flight.contains(previous), "image {} reused while still in flight", image);
            }
            assert!(!self.signaled[&fence], "submitted with a fence that was not reset");

            let id = self.submits;
            self.pending.insert(fence);
            self.in_flight.insert(id);
            self.fence_submission.insert(fence, id);
            self.image_submission.insert(image, id);
            self.submits += 1;

            let unsignaled = self.unsignaled();
            assert!(unsignaled <= MAX_FRAMES_IN_FLIGHT);
            self.max_unsignaled = self.max_unsignaled.max(unsignaled);
            Ok(())
        }

        fn present(&mut self, image_index: u32, _wait: u32) -> FrameResult<Presented> {
            self.calls.push(Call::Present(image_index));
            self.presents += 1;
            if self.present_fail_on == Some(self.presents) {
                return Err(FrameError::Presentation {
                    stage: "present",
                    result: vk::Result::ERROR_DEVICE_LOST,
                });
            }
            if self.present_stale_on.contains(&self.presents) {
                return Ok(Presented::Stale);
            }
            Ok(Presented::Current)
        }

        fn wait_idle(&mut self) -> FrameResult<()> {
            self.calls.push(Call::WaitIdle);
            for fence in self.pending.drain() {
                self.signaled.insert(fence, true);
            }
            self.in_flight.clear();
            self.fence_submission.clear();
            Ok(())
        }

        fn rebuild_chain(&mut self) -> FrameResult<Option<u32>> {
            self.calls.push(Call::Rebuild);
            self.rebuilds += 1;
            if self.deferred_rebuilds > 0 {
                self.deferred_rebuilds -= 1;
                return Ok(None);
            }
            self.destroy_chain();
            if let Some(count) = self.rebuild_counts.pop_front() {
                self.image_count = count;
            }
            self.create_chain();
            self.next_image = 0;
            self.image_submission.clear();
            Ok(Some(self.image_count))
        }

        fn image_count(&self) -> u32 {
            self.image_count
        }

        fn chain_resources(&self) -> ChainResourceCounts {
            self.chain
        }
    }

    fn scheduler(gpu: MockGpu) -> FrameScheduler<MockGpu> {
        FrameScheduler::new(gpu, None).unwrap()
    }

    #[test]
    fn test_new_creates_frame_and_image_slots() {
        let s = scheduler(MockGpu::with_images(3));
        assert_eq!(s.state(), SchedulerState::Ready);
        assert_eq!(s.presentation_slot_count(), 3);
        assert_eq!(s.backend().live_fences(), MAX_FRAMES_IN_FLIGHT);
        assert_eq!(s.backend().semaphores.len(), MAX_FRAMES_IN_FLIGHT + 3);
        // Fences start signaled
        assert_eq!(s.backend().unsignaled(), 0);
    }

    #[test]
    fn test_ten_frames_alternate_slots_over_five_images() {
        let mut s = scheduler(MockGpu::with_images(5));

        let mut slots = Vec::new();
        for _ in 0..10 {
            match s.draw_frame().unwrap() {
                FrameOutcome::Presented { frame_slot, .. } => slots.push(frame_slot),
                other => panic!("unexpected outcome {:?}", other),
            }
        }

        assert_eq!(slots, vec![0, 1, 0, 1, 0, 1, 0, 1, 0, 1]);
        assert_eq!(s.backend().submits, 10);
        assert!(s.backend().max_unsignaled <= MAX_FRAMES_IN_FLIGHT);
        assert_eq!(s.backend().rebuilds, 0);
    }

    #[test]
    fn test_image_claimed_by_other_slot_waits_on_its_fence() {
        let mut gpu = MockGpu::with_images(3);
        gpu.acquire_images = VecDeque::from(vec![0, 0]);
        let mut s = scheduler(gpu);

        s.draw_frame().unwrap();
        let before = s.backend().calls.len();
        let outcome = s.draw_frame().unwrap();
        assert_eq!(
            outcome,
            FrameOutcome::Presented {
                frame_slot: 1,
                image_index: 0
            }
        );

        // Own fence, then the fence of slot 0 that still owns image 0
        let second_call = &s.backend().calls[before..];
        let waits: Vec<_> = second_call
            .iter()
            .filter(|c| matches!(c, Call::WaitFence(_)))
            .collect();
        assert_eq!(waits.len(), 2);
        assert_ne!(waits[0], waits[1]);

        let acquire = second_call.iter().position(|c| *c == Call::Acquire).unwrap();
        let record = second_call.iter().position(|c| *c == Call::Record(0)).unwrap();
        let claim_wait = second_call.iter().rposition(|c| matches!(c, Call::WaitFence(_))).unwrap();
        assert!(acquire < claim_wait && claim_wait < record);
    }

    #[test]
    fn test_reused_image_in_same_slot_does_not_block() {
        // 2 images, 2 slots: every image is reclaimed by the slot that owned it
        let mut s = scheduler(MockGpu::with_images(2));
        for _ in 0..6 {
            s.draw_frame().unwrap();
        }
        assert_eq!(s.backend().submits, 6);
    }

    #[test]
    fn test_suboptimal_present_on_sixth_call_rebuilds_once() {
        let mut gpu = MockGpu::with_images(3);
        gpu.present_stale_on.insert(6);
        let mut s = scheduler(gpu);

        for call in 1..=5 {
            assert!(matches!(s.draw_frame().unwrap(), FrameOutcome::Presented { .. }), "call {}", call);
        }
        assert_eq!(s.transitions(), &[SchedulerState::Ready, SchedulerState::Drawing]);

        let outcome = s.draw_frame().unwrap();
        assert!(matches!(outcome, FrameOutcome::PresentedStale { frame_slot: 1, .. }));
        assert_eq!(s.backend().rebuilds, 1);
        assert_eq!(
            s.transitions(),
            &[
                SchedulerState::Ready,
                SchedulerState::Drawing,
                SchedulerState::RecreatingSwapchain,
                SchedulerState::Ready,
            ]
        );

        // The next call draws against the rebuilt chain
        assert!(matches!(s.draw_frame().unwrap(), FrameOutcome::Presented { frame_slot: 0, .. }));
        assert_eq!(s.backend().submits, 7);
        assert_eq!(s.backend().rebuilds, 1);
        assert_eq!(s.state(), SchedulerState::Drawing);
    }

    #[test]
    fn test_stale_acquire_skips_without_submission() {
        let mut gpu = MockGpu::with_images(3);
        gpu.acquire_stale_on.insert(3);
        let mut s = scheduler(gpu);

        s.draw_frame().unwrap();
        s.draw_frame().unwrap();
        let submits = s.backend().submits;

        assert_eq!(s.draw_frame().unwrap(), FrameOutcome::Skipped);
        assert_eq!(s.backend().submits, submits);
        assert_eq!(s.backend().rebuilds, 1);
        assert_eq!(s.state(), SchedulerState::Ready);
        // The skipped call does not advance the frame slot
        assert_eq!(s.current_frame(), 0);

        assert!(matches!(s.draw_frame().unwrap(), FrameOutcome::Presented { .. }));
        assert_eq!(s.backend().submits, submits + 1);
    }

    #[test]
    fn test_resize_request_rebuilds_after_present() {
        let mut s = scheduler(MockGpu::with_images(3));
        s.draw_frame().unwrap();

        s.request_resize();
        assert!(matches!(s.draw_frame().unwrap(), FrameOutcome::PresentedStale { .. }));
        assert_eq!(s.backend().rebuilds, 1);

        // Flag is cleared by the rebuild
        assert!(matches!(s.draw_frame().unwrap(), FrameOutcome::Presented { .. }));
        assert_eq!(s.backend().rebuilds, 1);
    }

    #[test]
    fn test_rebuild_waits_for_idle_first() {
        let mut gpu = MockGpu::with_images(3);
        gpu.present_stale_on.insert(2);
        gpu.acquire_stale_on.insert(4);
        let mut s = scheduler(gpu);

        for _ in 0..5 {
            s.draw_frame().unwrap();
        }

        let calls = &s.backend().calls;
        let rebuilds: Vec<usize> = calls
            .iter()
            .enumerate()
            .filter(|(_, c)| **c == Call::Rebuild)
            .map(|(i, _)| i)
            .collect();
        assert_eq!(rebuilds.len(), 2);
        for i in rebuilds {
            assert_eq!(calls[i - 1], Call::WaitIdle);
        }
    }

    #[test]
    fn test_resize_cycles_keep_object_counts_stable() {
        let mut gpu = MockGpu::with_images(3);
        gpu.rebuild_counts = VecDeque::from(vec![4, 2, 3, 5, 3, 3]);
        let mut s = scheduler(gpu);

        let initial_semaphores = s.backend().semaphores.len();
        let initial_fences = s.backend().live_fences();
        let initial_chain = s.backend().chain_resources();

        for _ in 0..6 {
            s.request_resize();
            s.draw_frame().unwrap();
            s.draw_frame().unwrap();

            let images = s.backend().image_count() as usize;
            assert_eq!(s.presentation_slot_count(), images);
            assert_eq!(s.backend().semaphores.len(), MAX_FRAMES_IN_FLIGHT + images);
            assert_eq!(s.backend().live_fences(), MAX_FRAMES_IN_FLIGHT);

            let chain = s.backend().chain_resources();
            assert_eq!(chain.images, images);
            assert_eq!(chain.image_views, images);
            assert_eq!(chain.framebuffers, images);
            assert_eq!(chain.pipelines, 1);
            assert_eq!(chain.render_passes, 1);
        }

        assert_eq!(s.backend().rebuilds, 6);
        assert_eq!(s.backend().chain_resources(), initial_chain);
        assert_eq!(
            &s.backend().chain_destroy_order[..6],
            &["framebuffers", "image_views", "pipeline", "pipeline_layout", "render_pass", "swapchain"]
        );
        assert_eq!(s.backend().chain_destroy_order.len(), 6 * 6);
        assert_eq!(s.backend().semaphores.len(), initial_semaphores);
        assert_eq!(s.backend().live_fences(), initial_fences);
    }

    #[test]
    fn test_zero_area_window_defers_rebuild() {
        let mut gpu = MockGpu::with_images(3);
        gpu.deferred_rebuilds = 2;
        let mut s = scheduler(gpu);

        s.request_resize();
        assert!(matches!(s.draw_frame().unwrap(), FrameOutcome::PresentedStale { .. }));
        assert_eq!(s.backend().rebuilds, 1);

        // Still minimized: retry, nothing drawn
        assert_eq!(s.draw_frame().unwrap(), FrameOutcome::Skipped);
        assert_eq!(s.backend().rebuilds, 2);
        assert_eq!(s.backend().submits, 1);

        // Restored: rebuild succeeds and the frame goes through
        assert!(matches!(s.draw_frame().unwrap(), FrameOutcome::Presented { .. }));
        assert_eq!(s.backend().rebuilds, 3);
        assert_eq!(s.backend().submits, 2);
    }

    #[test]
    fn test_rebuild_after_stale_acquire_satisfies_pending_resize() {
        let mut gpu = MockGpu::with_images(3);
        gpu.acquire_stale_on.insert(2);
        let mut s = scheduler(gpu);

        s.draw_frame().unwrap();
        s.request_resize();
        assert_eq!(s.draw_frame().unwrap(), FrameOutcome::Skipped);
        assert!(matches!(s.draw_frame().unwrap(), FrameOutcome::Presented { .. }));
        assert_eq!(s.backend().rebuilds, 1);
    }

    #[test]
    fn test_restore_from_minimize_rebuilds_once() {
        let mut gpu = MockGpu::with_images(3);
        gpu.deferred_rebuilds = 1;
        let mut s = scheduler(gpu);

        // Minimize
        s.request_resize();
        s.draw_frame().unwrap();
        assert_eq!(s.backend().rebuilds, 1);

        // Restore reports a new size before the next frame
        s.request_resize();
        assert!(matches!(s.draw_frame().unwrap(), FrameOutcome::Presented { .. }));
        assert_eq!(s.backend().rebuilds, 2);
    }

    #[test]
    fn test_present_failure_is_fatal() {
        let mut gpu = MockGpu::with_images(3);
        gpu.present_fail_on = Some(2);
        let mut s = scheduler(gpu);

        s.draw_frame().unwrap();
        let err = s.draw_frame().unwrap_err();
        assert!(matches!(
            err,
            FrameError::Presentation {
                stage: "present",
                result: vk::Result::ERROR_DEVICE_LOST
            }
        ));
        assert_eq!(s.backend().rebuilds, 0);
    }

    #[test]
    fn test_out_of_range_image_index() {
        let mut gpu = MockGpu::with_images(3);
        gpu.acquire_images = VecDeque::from(vec![7]);
        let mut s = scheduler(gpu);

        let err = s.draw_frame().unwrap_err();
        assert!(matches!(err, FrameError::ImageIndexOutOfRange { index: 7, count: 3 }));
    }

    #[test]
    fn test_teardown_releases_everything() {
        let mut s = scheduler(MockGpu::with_images(4));
        for _ in 0..3 {
            s.draw_frame().unwrap();
        }

        s.teardown();
        assert_eq!(s.state(), SchedulerState::Destroyed);
        assert_eq!(s.backend().live_fences(), 0);
        assert!(s.backend().semaphores.is_empty());
        assert_eq!(s.backend().calls.last(), Some(&Call::WaitIdle));

        // Idempotent, and drawing is refused
        s.teardown();
        assert!(matches!(s.draw_frame(), Err(FrameError::Destroyed)));
    }

    #[test]
    fn test_fence_timeout_is_forwarded() {
        let mut s = FrameScheduler::new(MockGpu::with_images(2), Some(Duration::from_millis(5))).unwrap();
        s.draw_frame().unwrap();
        assert_eq!(s.backend().last_timeout, Some(5_000_000));

        let mut unbounded = scheduler(MockGpu::with_images(2));
        unbounded.draw_frame().unwrap();
        assert_eq!(unbounded.backend().last_timeout, Some(u64::MAX));
    }
}
