use vulkanite::vk::{rs::*, *};

use crate::error::{GpuError, Result};

/// Number of frames the host may record ahead of the GPU.
pub const FRAMES_IN_FLIGHT: usize = 2;

/// Host-side recording context reused every `FRAMES_IN_FLIGHT` frames.
pub struct FrameSlot {
    pub command_buffer: CommandBuffer,
    /// Signaled when the last submission recorded from this slot has completed.
    pub in_flight_fence: Fence,
}

impl FrameSlot {
    pub fn new(device: &Device, command_pool: &CommandPool) -> Result<Self> {
        let command_buffer_allocate_info = CommandBufferAllocateInfo::default()
            .command_pool(command_pool)
            .level(CommandBufferLevel::Primary)
            .command_buffer_count(1);

        let command_buffers: Vec<CommandBuffer> =
            device.allocate_command_buffers(&command_buffer_allocate_info)?;
        let command_buffer = command_buffers[0];

        // Created signaled so the very first wait on this slot returns immediately.
        let fence_create_info = FenceCreateInfo::default().flags(FenceCreateFlags::Signaled);
        let in_flight_fence = device.create_fence(&fence_create_info)?;

        Ok(Self {
            command_buffer,
            in_flight_fence,
        })
    }

    pub unsafe fn destroy(&self, device: &Device) {
        unsafe {
            device.destroy_fence(Some(self.in_flight_fence));
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FramePhase {
    Idle,
    /// Between `begin_frame` and `end_frame`, outside a rendering pass.
    Recording,
    /// Inside `begin_rendering` / `end_rendering`.
    Rendering,
}

impl FramePhase {
    fn name(self) -> &'static str {
        match self {
            FramePhase::Idle => "idle",
            FramePhase::Recording => "recording",
            FramePhase::Rendering => "rendering",
        }
    }
}

/// Device side of the frame lifecycle, sequenced by [`FramePacer::run_begin_frame`] and
/// [`FramePacer::run_end_frame`].
pub trait FrameQueue {
    /// Blocks until the last submission recorded from `slot_index` has completed.
    fn wait_for_slot(&mut self, slot_index: usize) -> Result<()>;

    fn acquire_image(&mut self, slot_index: usize) -> Result<u32>;

    /// Opens the slot's command buffer for `image_index`. The slot fence is unsignaled last,
    /// so a failure here leaves the slot waitable.
    fn start_recording(&mut self, slot_index: usize, image_index: u32) -> Result<()>;

    /// Closes and submits the slot's command buffer; its completion signals the slot fence.
    fn submit(&mut self, slot_index: usize, image_index: u32) -> Result<()>;

    fn present(&mut self, slot_index: usize, image_index: u32) -> Result<()>;
}

/// Bookkeeping for the frame lifecycle, independent of any device objects.
///
/// Tracks which slot is active, which image was acquired and which earlier frame each
/// slot is still waiting on.
#[derive(Debug)]
pub struct FramePacer {
    frame_counter: u64,
    phase: FramePhase,
    image_index: u32,
    pending: [Option<u64>; FRAMES_IN_FLIGHT],
    submissions: u64,
    presents: u64,
}

impl Default for FramePacer {
    fn default() -> Self {
        Self::new()
    }
}

impl FramePacer {
    pub fn new() -> Self {
        Self {
            frame_counter: 0,
            phase: FramePhase::Idle,
            image_index: 0,
            pending: [None; FRAMES_IN_FLIGHT],
            submissions: 0,
            presents: 0,
        }
    }

    #[inline(always)]
    pub fn slot_index(&self) -> usize {
        (self.frame_counter % FRAMES_IN_FLIGHT as u64) as usize
    }

    #[inline(always)]
    pub fn frame_counter(&self) -> u64 {
        self.frame_counter
    }

    #[inline(always)]
    pub fn phase(&self) -> FramePhase {
        self.phase
    }

    #[inline(always)]
    pub fn image_index(&self) -> u32 {
        self.image_index
    }

    #[inline(always)]
    pub fn submissions(&self) -> u64 {
        self.submissions
    }

    #[inline(always)]
    pub fn presents(&self) -> u64 {
        self.presents
    }

    /// The earlier frame whose completion the current slot's fence stands for, if any.
    #[inline(always)]
    pub fn awaited_frame(&self) -> Option<u64> {
        self.pending[self.slot_index()]
    }

    /// Called once the current slot's fence has been observed signaled.
    pub fn fence_signaled(&mut self) {
        let slot_index = self.slot_index();
        self.pending[slot_index] = None;
    }

    pub fn ensure_phase(&self, expected: FramePhase, operation: &'static str) -> Result<()> {
        if self.phase != expected {
            return Err(GpuError::FrameState {
                operation,
                state: self.phase.name(),
            });
        }

        Ok(())
    }

    /// Accepts both `Recording` and `Rendering`.
    pub fn ensure_in_frame(&self, operation: &'static str) -> Result<()> {
        if self.phase == FramePhase::Idle {
            return Err(GpuError::FrameState {
                operation,
                state: self.phase.name(),
            });
        }

        Ok(())
    }

    /// Starts a frame on the current slot after `image_index` was acquired.
    pub fn begin_frame(&mut self, image_index: u32) -> Result<usize> {
        self.ensure_phase(FramePhase::Idle, "begin_frame")?;

        if self.awaited_frame().is_some() {
            return Err(GpuError::FrameState {
                operation: "begin_frame before the slot fence was waited on",
                state: self.phase.name(),
            });
        }

        self.image_index = image_index;
        self.phase = FramePhase::Recording;

        Ok(self.slot_index())
    }

    /// Waits for the current slot, acquires an image and starts recording.
    ///
    /// Any failure leaves the pacer idle on the same slot, so the call can be repeated.
    pub fn run_begin_frame(&mut self, queue: &mut impl FrameQueue) -> Result<usize> {
        self.ensure_phase(FramePhase::Idle, "begin_frame")?;
        let slot_index = self.slot_index();

        queue.wait_for_slot(slot_index)?;
        self.fence_signaled();

        let image_index = queue.acquire_image(slot_index)?;
        queue.start_recording(slot_index, image_index)?;

        self.begin_frame(image_index)
    }

    /// Submits the recorded frame and presents its image.
    ///
    /// Once the submission went through the frame counts as presented, even when
    /// presentation itself reports an error.
    pub fn run_end_frame(&mut self, queue: &mut impl FrameQueue) -> Result<()> {
        self.ensure_phase(FramePhase::Recording, "end_frame")?;
        let slot_index = self.slot_index();
        let image_index = self.image_index;

        queue.submit(slot_index, image_index)?;
        self.submitted();

        let present_result = queue.present(slot_index, image_index);
        self.presented();

        present_result
    }

    pub fn begin_rendering(&mut self) -> Result<()> {
        self.ensure_phase(FramePhase::Recording, "begin_rendering")?;
        self.phase = FramePhase::Rendering;

        Ok(())
    }

    pub fn end_rendering(&mut self) -> Result<()> {
        self.ensure_phase(FramePhase::Rendering, "end_rendering")?;
        self.phase = FramePhase::Recording;

        Ok(())
    }

    /// Records that the current slot's command buffer went to the queue.
    pub fn submitted(&mut self) {
        let slot_index = self.slot_index();
        self.pending[slot_index] = Some(self.frame_counter);
        self.submissions += 1;
    }

    /// Records the present request and advances to the next slot.
    pub fn presented(&mut self) {
        self.presents += 1;
        self.frame_counter += 1;
        self.phase = FramePhase::Idle;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Default)]
    struct ScriptedQueue {
        calls: Vec<(&'static str, usize)>,
        fence_unsignaled: [bool; FRAMES_IN_FLIGHT],
        next_image: u32,
        fail_acquire: Option<GpuError>,
        fail_start: bool,
        fail_present: Option<GpuError>,
    }

    impl FrameQueue for ScriptedQueue {
        fn wait_for_slot(&mut self, slot_index: usize) -> Result<()> {
            self.calls.push(("wait", slot_index));
            if self.fence_unsignaled[slot_index] {
                return Err(GpuError::Timeout("frame fence"));
            }

            Ok(())
        }

        fn acquire_image(&mut self, slot_index: usize) -> Result<u32> {
            self.calls.push(("acquire", slot_index));
            if let Some(error) = self.fail_acquire.take() {
                return Err(error);
            }

            let image_index = self.next_image;
            self.next_image = (self.next_image + 1) % 3;

            Ok(image_index)
        }

        fn start_recording(&mut self, slot_index: usize, _: u32) -> Result<()> {
            self.calls.push(("start", slot_index));
            if self.fail_start {
                self.fail_start = false;
                return Err(GpuError::Vulkan(Status::ErrorOutOfHostMemory));
            }

            self.fence_unsignaled[slot_index] = true;

            Ok(())
        }

        fn submit(&mut self, slot_index: usize, _: u32) -> Result<()> {
            self.calls.push(("submit", slot_index));
            // Completes immediately.
            self.fence_unsignaled[slot_index] = false;

            Ok(())
        }

        fn present(&mut self, slot_index: usize, _: u32) -> Result<()> {
            self.calls.push(("present", slot_index));
            match self.fail_present.take() {
                Some(error) => Err(error),
                None => Ok(()),
            }
        }
    }

    fn run_frame(pacer: &mut FramePacer, image_index: u32) -> usize {
        if pacer.awaited_frame().is_some() {
            pacer.fence_signaled();
        }

        let slot_index = pacer.begin_frame(image_index).unwrap();
        pacer.begin_rendering().unwrap();
        pacer.end_rendering().unwrap();
        pacer.ensure_phase(FramePhase::Recording, "end_frame").unwrap();
        pacer.submitted();
        pacer.presented();

        slot_index
    }

    #[test]
    fn slots_are_used_round_robin() {
        let mut pacer = FramePacer::new();

        let slots: Vec<usize> = (0..6).map(|frame| run_frame(&mut pacer, frame % 3)).collect();

        assert_eq!(slots, vec![0, 1, 0, 1, 0, 1]);
        assert_eq!(pacer.frame_counter(), 6);
    }

    #[test]
    fn slot_waits_on_frame_issued_frames_in_flight_earlier() {
        let mut pacer = FramePacer::new();

        for frame in 0..8u64 {
            let expected = frame.checked_sub(FRAMES_IN_FLIGHT as u64);
            assert_eq!(pacer.awaited_frame(), expected, "frame {frame}");
            run_frame(&mut pacer, 0);
        }
    }

    #[test]
    fn begin_frame_requires_fence_wait() {
        let mut pacer = FramePacer::new();
        run_frame(&mut pacer, 0);
        run_frame(&mut pacer, 1);

        assert_eq!(pacer.awaited_frame(), Some(0));
        assert!(matches!(
            pacer.begin_frame(0),
            Err(GpuError::FrameState { .. })
        ));

        pacer.fence_signaled();
        assert_eq!(pacer.begin_frame(0).unwrap(), 0);
    }

    #[test]
    fn single_indexed_draw_frame_submits_and_presents_once() {
        let mut pacer = FramePacer::new();

        pacer.begin_frame(2).unwrap();
        pacer.begin_rendering().unwrap();
        pacer.ensure_phase(FramePhase::Rendering, "draw_indexed").unwrap();
        pacer.end_rendering().unwrap();
        pacer.ensure_phase(FramePhase::Recording, "end_frame").unwrap();
        assert_eq!(pacer.image_index(), 2);
        pacer.submitted();
        pacer.presented();

        assert_eq!(pacer.submissions(), 1);
        assert_eq!(pacer.presents(), 1);
        assert_eq!(pacer.phase(), FramePhase::Idle);
    }

    #[test]
    fn consecutive_frames_keep_acquired_image_per_frame() {
        let mut pacer = FramePacer::new();

        pacer.begin_frame(0).unwrap();
        assert_eq!((pacer.slot_index(), pacer.image_index()), (0, 0));
        pacer.submitted();
        pacer.presented();

        pacer.begin_frame(1).unwrap();
        assert_eq!((pacer.slot_index(), pacer.image_index()), (1, 1));
    }

    #[test]
    fn misuse_is_reported_as_frame_state_error() {
        let mut pacer = FramePacer::new();

        assert!(pacer.begin_rendering().is_err());
        assert!(pacer.end_rendering().is_err());
        assert!(pacer.ensure_in_frame("draw").is_err());

        pacer.begin_frame(0).unwrap();
        assert!(pacer.begin_frame(0).is_err());
        assert!(pacer.end_rendering().is_err());

        pacer.begin_rendering().unwrap();
        assert!(pacer.begin_rendering().is_err());
        assert!(pacer.ensure_in_frame("draw").is_ok());
        assert!(matches!(
            pacer.ensure_phase(FramePhase::Recording, "end_frame"),
            Err(GpuError::FrameState {
                operation: "end_frame",
                state: "rendering"
            })
        ));
    }

    #[test]
    fn driven_frame_submits_and_presents_once() {
        let mut pacer = FramePacer::new();
        let mut queue = ScriptedQueue::default();

        assert_eq!(pacer.run_begin_frame(&mut queue).unwrap(), 0);
        pacer.begin_rendering().unwrap();
        pacer.ensure_phase(FramePhase::Rendering, "draw_indexed").unwrap();
        pacer.end_rendering().unwrap();
        pacer.run_end_frame(&mut queue).unwrap();

        assert_eq!(
            queue.calls,
            vec![
                ("wait", 0),
                ("acquire", 0),
                ("start", 0),
                ("submit", 0),
                ("present", 0)
            ]
        );
        assert_eq!((pacer.submissions(), pacer.presents()), (1, 1));
        assert_eq!(pacer.phase(), FramePhase::Idle);
        assert_eq!(pacer.slot_index(), 1);
    }

    #[test]
    fn driven_frames_alternate_slots_and_images() {
        let mut pacer = FramePacer::new();
        let mut queue = ScriptedQueue::default();

        let mut acquired = Vec::new();
        for _ in 0..4 {
            pacer.run_begin_frame(&mut queue).unwrap();
            acquired.push((pacer.slot_index(), pacer.image_index()));
            pacer.run_end_frame(&mut queue).unwrap();
        }

        assert_eq!(acquired, vec![(0, 0), (1, 1), (0, 2), (1, 0)]);
        assert_eq!((pacer.submissions(), pacer.presents()), (4, 4));
    }

    #[test]
    fn out_of_date_present_still_completes_the_frame() {
        let mut pacer = FramePacer::new();
        let mut queue = ScriptedQueue {
            fail_present: Some(GpuError::SwapchainOutOfDate),
            ..Default::default()
        };

        pacer.run_begin_frame(&mut queue).unwrap();
        assert!(matches!(
            pacer.run_end_frame(&mut queue),
            Err(GpuError::SwapchainOutOfDate)
        ));

        assert_eq!((pacer.submissions(), pacer.presents()), (1, 1));
        assert_eq!(pacer.phase(), FramePhase::Idle);
        assert_eq!(pacer.run_begin_frame(&mut queue).unwrap(), 1);
    }

    #[test]
    fn failed_acquire_leaves_the_slot_idle() {
        let mut pacer = FramePacer::new();
        let mut queue = ScriptedQueue {
            fail_acquire: Some(GpuError::SwapchainOutOfDate),
            ..Default::default()
        };

        assert!(matches!(
            pacer.run_begin_frame(&mut queue),
            Err(GpuError::SwapchainOutOfDate)
        ));
        assert_eq!(pacer.phase(), FramePhase::Idle);
        assert_eq!(queue.calls, vec![("wait", 0), ("acquire", 0)]);

        assert_eq!(pacer.run_begin_frame(&mut queue).unwrap(), 0);
        assert_eq!(pacer.submissions(), 0);
    }

    #[test]
    fn failed_recording_start_keeps_the_slot_waitable() {
        let mut pacer = FramePacer::new();
        let mut queue = ScriptedQueue {
            fail_start: true,
            ..Default::default()
        };

        assert!(pacer.run_begin_frame(&mut queue).is_err());
        assert_eq!(pacer.phase(), FramePhase::Idle);

        // A reset fence here would turn the retry into a timeout.
        assert_eq!(pacer.run_begin_frame(&mut queue).unwrap(), 0);
        assert_eq!(pacer.phase(), FramePhase::Recording);
    }

    #[test]
    fn end_frame_outside_a_frame_touches_no_queue() {
        let mut pacer = FramePacer::new();
        let mut queue = ScriptedQueue::default();

        assert!(matches!(
            pacer.run_end_frame(&mut queue),
            Err(GpuError::FrameState {
                operation: "end_frame",
                state: "idle"
            })
        ));

        pacer.run_begin_frame(&mut queue).unwrap();
        pacer.begin_rendering().unwrap();
        assert!(pacer.run_end_frame(&mut queue).is_err());
        assert_eq!(queue.calls, vec![("wait", 0), ("acquire", 0), ("start", 0)]);
        assert_eq!(pacer.submissions(), 0);
    }

    #[test]
    fn resource_release_is_rejected_mid_frame() {
        let mut pacer = FramePacer::new();
        let mut queue = ScriptedQueue::default();
        assert!(pacer.ensure_phase(FramePhase::Idle, "destroy_buffer").is_ok());

        pacer.run_begin_frame(&mut queue).unwrap();
        assert!(matches!(
            pacer.ensure_phase(FramePhase::Idle, "destroy_buffer"),
            Err(GpuError::FrameState {
                operation: "destroy_buffer",
                state: "recording"
            })
        ));

        pacer.begin_rendering().unwrap();
        assert!(matches!(
            pacer.ensure_phase(FramePhase::Idle, "destroy_pipeline"),
            Err(GpuError::FrameState {
                operation: "destroy_pipeline",
                state: "rendering"
            })
        ));

        pacer.end_rendering().unwrap();
        pacer.run_end_frame(&mut queue).unwrap();
        assert!(pacer.ensure_phase(FramePhase::Idle, "destroy_buffer").is_ok());
    }
}
