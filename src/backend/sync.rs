// Synchronization primitives
//
// Fences for GPU-CPU and semaphores for GPU-GPU sync. One FrameSync per frame
// in flight keeps the CPU from re-recording a command buffer the GPU still reads.
// Render-finished semaphores belong to swapchain images and live in the renderer.

use anyhow::{Context, Result};
use ash::vk;

use super::swapchain::{AcquireOutcome, PresentOutcome};

/// Frame synchronization - one per frame in flight
pub struct FrameSync {
    pub image_available: vk::Semaphore,
    pub in_flight_fence: vk::Fence,
}

impl FrameSync {
    pub fn new(device: &ash::Device) -> Result<Self> {
        let semaphore_info = vk::SemaphoreCreateInfo::default();
        // Signaled so the very first wait returns immediately
        let fence_info = vk::FenceCreateInfo::default().flags(vk::FenceCreateFlags::SIGNALED);

        unsafe {
            Ok(Self {
                image_available: device
                    .create_semaphore(&semaphore_info, None)
                    .context("Failed to create image-available semaphore")?,
                in_flight_fence: device
                    .create_fence(&fence_info, None)
                    .context("Failed to create in-flight fence")?,
            })
        }
    }

    /// Block until the GPU has finished the last submission made with this slot
    pub fn wait(&self, device: &ash::Device) -> Result<()> {
        unsafe {
            device
                .wait_for_fences(&[self.in_flight_fence], true, u64::MAX)
                .context("Failed to wait for in-flight fence")
        }
    }

    pub fn reset(&self, device: &ash::Device) -> Result<()> {
        unsafe {
            device
                .reset_fences(&[self.in_flight_fence])
                .context("Failed to reset in-flight fence")
        }
    }

    pub fn destroy(&self, device: &ash::Device) {
        unsafe {
            device.destroy_semaphore(self.image_available, None);
            device.destroy_fence(self.in_flight_fence, None);
        }
    }
}

/// Round-robin index over the frames in flight
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameCursor {
    current: usize,
    count: usize,
}

impl FrameCursor {
    pub fn new(count: usize) -> Self {
        Self {
            current: 0,
            count: count.max(1),
        }
    }

    pub fn current(&self) -> usize {
        self.current
    }

    pub fn count(&self) -> usize {
        self.count
    }

    pub fn advance(&mut self) {
        self.current = (self.current + 1) % self.count;
    }
}

/// What to do before acquiring an image
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameStart {
    /// Swapchain is usable as is
    Proceed,
    /// Rebuild the swapchain first, then draw
    Recreate,
    /// Window has no area; draw nothing and keep any recreate pending
    Skip,
}

/// What to do with the result of an acquire
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AcquireAction {
    /// Reset the slot fence, record and submit for this image
    Record { image_index: u32 },
    /// Nothing gets submitted this frame, so the slot fence must stay signaled
    Skip,
}

/// Tracks whether the swapchain has to be rebuilt, and turns swapchain
/// results into frame-loop decisions.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct FramePacer {
    needs_recreate: bool,
}

impl FramePacer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn needs_recreate(&self) -> bool {
        self.needs_recreate
    }

    pub fn request_recreate(&mut self) {
        self.needs_recreate = true;
    }

    /// Call once the swapchain has been rebuilt
    pub fn recreated(&mut self) {
        self.needs_recreate = false;
    }

    pub fn before_acquire(&self, width: u32, height: u32) -> FrameStart {
        if width == 0 || height == 0 {
            FrameStart::Skip
        } else if self.needs_recreate {
            FrameStart::Recreate
        } else {
            FrameStart::Proceed
        }
    }

    /// A suboptimal image is still drawn; an out-of-date swapchain skips the frame
    pub fn on_acquire(&mut self, outcome: AcquireOutcome) -> AcquireAction {
        match outcome {
            AcquireOutcome::Acquired { index, suboptimal } => {
                if suboptimal {
                    self.needs_recreate = true;
                }
                AcquireAction::Record { image_index: index }
            }
            AcquireOutcome::OutOfDate => {
                self.needs_recreate = true;
                AcquireAction::Skip
            }
        }
    }

    pub fn on_present(&mut self, outcome: PresentOutcome) {
        if outcome.needs_recreate() {
            self.needs_recreate = true;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cursor_wraps_around_frames_in_flight() {
        let mut cursor = FrameCursor::new(3);
        let visited: Vec<usize> = (0..7)
            .map(|_| {
                let slot = cursor.current();
                cursor.advance();
                slot
            })
            .collect();
        assert_eq!(visited, vec![0, 1, 2, 0, 1, 2, 0]);
    }

    #[test]
    fn single_frame_in_flight_always_uses_slot_zero() {
        let mut cursor = FrameCursor::new(1);
        for _ in 0..4 {
            assert_eq!(cursor.current(), 0);
            cursor.advance();
        }
    }

    #[test]
    fn zero_count_is_treated_as_one() {
        let mut cursor = FrameCursor::new(0);
        assert_eq!(cursor.count(), 1);
        cursor.advance();
        assert_eq!(cursor.current(), 0);
    }

    #[test]
    fn out_of_date_acquire_skips_without_submitting() {
        let mut pacer = FramePacer::new();
        assert_eq!(pacer.on_acquire(AcquireOutcome::OutOfDate), AcquireAction::Skip);
        assert!(pacer.needs_recreate());
        assert_eq!(pacer.before_acquire(800, 600), FrameStart::Recreate);
    }

    #[test]
    fn suboptimal_acquire_still_draws() {
        let mut pacer = FramePacer::new();
        let action = pacer.on_acquire(AcquireOutcome::Acquired {
            index: 2,
            suboptimal: true,
        });
        assert_eq!(action, AcquireAction::Record { image_index: 2 });
        assert!(pacer.needs_recreate());
    }

    #[test]
    fn clean_acquire_and_present_keep_swapchain() {
        let mut pacer = FramePacer::new();
        let action = pacer.on_acquire(AcquireOutcome::Acquired {
            index: 0,
            suboptimal: false,
        });
        assert_eq!(action, AcquireAction::Record { image_index: 0 });

        pacer.on_present(PresentOutcome::Presented);
        assert!(!pacer.needs_recreate());
        assert_eq!(pacer.before_acquire(800, 600), FrameStart::Proceed);
    }

    #[test]
    fn suboptimal_or_out_of_date_present_requests_recreate() {
        for outcome in [PresentOutcome::Suboptimal, PresentOutcome::OutOfDate] {
            let mut pacer = FramePacer::new();
            pacer.on_present(outcome);
            assert!(pacer.needs_recreate(), "{outcome:?}");
        }
    }

    #[test]
    fn zero_sized_window_skips_and_keeps_recreate_pending() {
        let mut pacer = FramePacer::new();
        pacer.request_recreate();

        assert_eq!(pacer.before_acquire(0, 600), FrameStart::Skip);
        assert_eq!(pacer.before_acquire(800, 0), FrameStart::Skip);
        assert!(pacer.needs_recreate());

        assert_eq!(pacer.before_acquire(800, 600), FrameStart::Recreate);
        pacer.recreated();
        assert_eq!(pacer.before_acquire(800, 600), FrameStart::Proceed);
    }

    #[test]
    fn minimized_window_skips_even_without_pending_recreate() {
        let pacer = FramePacer::new();
        assert_eq!(pacer.before_acquire(0, 0), FrameStart::Skip);
    }
}
