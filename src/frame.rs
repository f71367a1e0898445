// Frame orchestration
//
// One frame runs through a fixed sequence:
//
//   wait fence -> acquire image -> reset fence + cmd -> begin pass
//     -> (caller records) -> end pass -> submit -> present
//
// The in-flight fence is only reset once an image has been acquired, so a
// frame skipped because the swapchain went out of date leaves the fence
// signaled and the next attempt does not block forever.

use crate::backend::{Backend, Submission};
use crate::device::Device;
use crate::error::{FrameError, Result};
use crate::handle::{
    CommandBufferHandle, CommandPoolHandle, FenceHandle, FramebufferHandle, RenderPassHandle,
    SemaphoreHandle, SwapchainHandle,
};
use crate::types::{AcquiredImage, Extent2D, PresentStatus, WaitStage};

/// Frames the host may record ahead of the GPU unless told otherwise.
pub const DEFAULT_FRAMES_IN_FLIGHT: usize = 1;

/// Where a command buffer is in the frame sequence.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum FrameStage {
    Idle,
    Recording { image: u32 },
    Recorded { image: u32 },
}

pub struct BeginFrameInfo<'a> {
    pub swapchain: &'a SwapchainHandle,
    pub render_pass: &'a RenderPassHandle,
    pub framebuffer: &'a FramebufferHandle,
    pub command_buffer: &'a CommandBufferHandle,
    pub in_flight: &'a FenceHandle,
    pub image_available: &'a SemaphoreHandle,
}

pub struct SubmitFrameInfo<'a> {
    pub swapchain: &'a SwapchainHandle,
    pub command_buffer: &'a CommandBufferHandle,
    pub in_flight: &'a FenceHandle,
    pub image_available: &'a SemaphoreHandle,
    /// Must be the semaphore for `image_index`.
    pub render_finished: &'a SemaphoreHandle,
    pub image_index: u32,
}

impl<B: Backend> Device<B> {
    /// Wait for the previous use of this frame's resources, acquire a
    /// swapchain image and start recording into `info.framebuffer`.
    ///
    /// Returns `Ok(None)` when the swapchain is out of date. Nothing has been
    /// reset in that case; recreate the swapchain and try again.
    ///
    /// # Panics
    /// If the command buffer is already inside a frame, or the framebuffer
    /// was not built for this swapchain.
    pub fn cmd_begin_frame(
        &mut self,
        info: &BeginFrameInfo<'_>,
    ) -> Result<Option<AcquiredImage>, FrameError> {
        self.check_initialized();
        let cmd = self.command_buffers.get(info.command_buffer.0);
        assert!(
            !matches!(cmd.frame, FrameStage::Recording { .. }),
            "cmd_begin_frame called while the command buffer is still recording a frame"
        );

        log::trace!("frame: wait in-flight fence");
        let fence = self.fences.get(info.in_flight.0);
        self.backend
            .wait_fence(fence, u64::MAX)
            .map_err(FrameError::WaitFence)?;

        log::trace!("frame: acquire image");
        let sc = self.swapchains.get(info.swapchain.0);
        let acquired = self
            .backend
            .acquire_next_image(&sc.native, u64::MAX, self.semaphores.get(info.image_available.0))
            .map_err(FrameError::Acquire)?;
        let Some(acquired) = acquired else {
            log::debug!("Swapchain out of date at acquire, skipping frame");
            return Ok(None);
        };

        let fb = self.framebuffers.get(info.framebuffer.0);
        assert!(
            fb.natives.len() == sc.desc.image_count as usize && fb.extent == sc.desc.extent,
            "framebuffer was not built for this swapchain"
        );

        log::trace!("frame: reset for image {}", acquired.index);
        self.backend.reset_fence(fence).map_err(FrameError::Reset)?;
        self.backend
            .reset_command_buffer(&cmd.native)
            .map_err(FrameError::Reset)?;

        self.backend
            .begin_command_buffer(&cmd.native, false)
            .map_err(FrameError::BeginRecording)?;
        let pass = self.render_passes.get(info.render_pass.0);
        self.backend.cmd_begin_render_pass(
            &cmd.native,
            &pass.native,
            &fb.natives[acquired.index as usize],
            fb.extent,
            &pass.clear_values,
        );

        self.command_buffers.get_mut(info.command_buffer.0).frame = FrameStage::Recording {
            image: acquired.index,
        };
        Ok(Some(acquired))
    }

    /// End the render pass and the command buffer.
    ///
    /// # Panics
    /// If `cmd_begin_frame` did not start a frame on this command buffer.
    pub fn cmd_end_frame(
        &mut self,
        command_buffer: &CommandBufferHandle,
    ) -> Result<(), FrameError> {
        let cmd = self.command_buffers.get_mut(command_buffer.0);
        let FrameStage::Recording { image } = cmd.frame else {
            panic!("cmd_end_frame called without a matching cmd_begin_frame");
        };

        log::trace!("frame: end recording");
        self.backend.cmd_end_render_pass(&cmd.native);
        self.backend
            .end_command_buffer(&cmd.native)
            .map_err(FrameError::EndRecording)?;
        cmd.frame = FrameStage::Recorded { image };
        Ok(())
    }

    /// Submit the recorded frame and present its image.
    ///
    /// The submission waits on `image_available` at color attachment output
    /// and signals `render_finished` and the in-flight fence; the present
    /// waits on `render_finished`. An out-of-date or suboptimal swapchain is
    /// reported in the returned status, not as an error.
    ///
    /// # Panics
    /// If the command buffer has not ended a frame for `image_index`.
    pub fn cmd_submit_frame(
        &mut self,
        info: &SubmitFrameInfo<'_>,
    ) -> Result<PresentStatus, FrameError> {
        let cmd = self.command_buffers.get_mut(info.command_buffer.0);
        assert_eq!(
            cmd.frame,
            FrameStage::Recorded {
                image: info.image_index
            },
            "cmd_submit_frame called before cmd_end_frame for image {}",
            info.image_index
        );
        cmd.frame = FrameStage::Idle;

        log::trace!("frame: submit");
        let render_finished = self.semaphores.get(info.render_finished.0);
        self.backend
            .queue_submit(Submission {
                command_buffer: &cmd.native,
                wait: Some((
                    self.semaphores.get(info.image_available.0),
                    WaitStage::ColorAttachmentOutput,
                )),
                signal: Some(render_finished),
                fence: Some(self.fences.get(info.in_flight.0)),
            })
            .map_err(FrameError::Submit)?;

        log::trace!("frame: present image {}", info.image_index);
        let sc = self.swapchains.get(info.swapchain.0);
        self.backend
            .queue_present(&sc.native, info.image_index, render_finished)
            .map_err(FrameError::Present)
    }
}

/// Per in-flight frame resources.
pub struct FrameSync {
    pub command_buffer: CommandBufferHandle,
    pub in_flight: FenceHandle,
    pub image_available: SemaphoreHandle,
}

/// What a frame renders into.
pub struct FrameTargets<'a> {
    pub swapchain: &'a SwapchainHandle,
    pub render_pass: &'a RenderPassHandle,
    pub framebuffer: &'a FramebufferHandle,
}

/// Passed to the recording closure of [`FrameOrchestrator::draw`].
#[derive(Debug, Clone, Copy)]
pub struct FrameContext {
    /// Monotonic count of frames that reached recording.
    pub frame_number: u64,
    /// Slot in the in-flight ring.
    pub frame_index: usize,
    pub image_index: u32,
    pub extent: Extent2D,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameOutcome {
    Presented(PresentStatus),
    /// The swapchain was out of date before anything was recorded.
    Skipped,
}

impl FrameOutcome {
    /// True when the caller should recreate the swapchain and framebuffers.
    pub fn needs_recreate(&self) -> bool {
        match self {
            FrameOutcome::Presented(status) => status.needs_recreate(),
            FrameOutcome::Skipped => true,
        }
    }
}

/// Owns the synchronization objects for a render loop and runs one frame
/// per [`draw`](Self::draw) call.
///
/// Fences, image-available semaphores and command buffers are per in-flight
/// frame. Render-finished semaphores are per swapchain image, since a
/// semaphore cannot be reused while the present of that image is pending.
pub struct FrameOrchestrator {
    pool: CommandPoolHandle,
    frames: Vec<FrameSync>,
    render_finished: Vec<SemaphoreHandle>,
    current: usize,
    frame_number: u64,
}

impl FrameOrchestrator {
    pub fn new<B: Backend>(device: &mut Device<B>, swapchain: &SwapchainHandle) -> Result<Self> {
        Self::with_frames_in_flight(device, swapchain, DEFAULT_FRAMES_IN_FLIGHT)
    }

    /// # Panics
    /// If `frames_in_flight` is zero.
    pub fn with_frames_in_flight<B: Backend>(
        device: &mut Device<B>,
        swapchain: &SwapchainHandle,
        frames_in_flight: usize,
    ) -> Result<Self> {
        assert!(frames_in_flight > 0, "at least one frame must be in flight");

        let mut orchestrator = FrameOrchestrator {
            pool: device.create_command_pool()?,
            frames: Vec::with_capacity(frames_in_flight),
            render_finished: Vec::new(),
            current: 0,
            frame_number: 0,
        };
        if let Err(e) = orchestrator.populate(device, swapchain, frames_in_flight) {
            orchestrator.release(device);
            return Err(e);
        }

        log::info!(
            "Frame orchestrator ready: {} frame(s) in flight, {} swapchain images",
            frames_in_flight,
            orchestrator.render_finished.len()
        );
        Ok(orchestrator)
    }

    fn populate<B: Backend>(
        &mut self,
        device: &mut Device<B>,
        swapchain: &SwapchainHandle,
        frames_in_flight: usize,
    ) -> Result<()> {
        for _ in 0..frames_in_flight {
            let command_buffer = device.create_command_buffer(&self.pool)?;
            let in_flight = match device.create_fence() {
                Ok(fence) => fence,
                Err(e) => {
                    device.destroy_command_buffer(&self.pool, command_buffer);
                    return Err(e);
                }
            };
            let image_available = match device.create_semaphore() {
                Ok(semaphore) => semaphore,
                Err(e) => {
                    device.destroy_fence(in_flight);
                    device.destroy_command_buffer(&self.pool, command_buffer);
                    return Err(e);
                }
            };
            self.frames.push(FrameSync {
                command_buffer,
                in_flight,
                image_available,
            });
        }
        self.create_render_finished(device, swapchain)
    }

    fn create_render_finished<B: Backend>(
        &mut self,
        device: &mut Device<B>,
        swapchain: &SwapchainHandle,
    ) -> Result<()> {
        let count = device.swapchain_image_count(swapchain);
        for _ in 0..count {
            self.render_finished.push(device.create_semaphore()?);
        }
        Ok(())
    }

    /// Run one frame: `record` is called between the render pass begin and
    /// end with the frame's command buffer.
    ///
    /// # Panics
    /// If the swapchain's image count no longer matches; call
    /// [`resize`](Self::resize) after recreating it.
    pub fn draw<B, F>(
        &mut self,
        device: &mut Device<B>,
        targets: &FrameTargets<'_>,
        record: F,
    ) -> Result<FrameOutcome, FrameError>
    where
        B: Backend,
        F: FnOnce(&mut Device<B>, &CommandBufferHandle, &FrameContext),
    {
        assert_eq!(
            self.render_finished.len(),
            device.swapchain_image_count(targets.swapchain) as usize,
            "swapchain image count changed without FrameOrchestrator::resize"
        );
        let sync = &self.frames[self.current];

        let begin = BeginFrameInfo {
            swapchain: targets.swapchain,
            render_pass: targets.render_pass,
            framebuffer: targets.framebuffer,
            command_buffer: &sync.command_buffer,
            in_flight: &sync.in_flight,
            image_available: &sync.image_available,
        };
        let Some(acquired) = device.cmd_begin_frame(&begin)? else {
            return Ok(FrameOutcome::Skipped);
        };

        let context = FrameContext {
            frame_number: self.frame_number,
            frame_index: self.current,
            image_index: acquired.index,
            extent: device.swapchain_extent(targets.swapchain),
        };
        record(device, &sync.command_buffer, &context);
        device.cmd_end_frame(&sync.command_buffer)?;

        let status = device.cmd_submit_frame(&SubmitFrameInfo {
            swapchain: targets.swapchain,
            command_buffer: &sync.command_buffer,
            in_flight: &sync.in_flight,
            image_available: &sync.image_available,
            render_finished: &self.render_finished[acquired.index as usize],
            image_index: acquired.index,
        })?;

        self.current = (self.current + 1) % self.frames.len();
        self.frame_number += 1;

        // A suboptimal acquire still presents; report it so the caller
        // recreates at a convenient point.
        if acquired.suboptimal && status == PresentStatus::Optimal {
            return Ok(FrameOutcome::Presented(PresentStatus::Suboptimal));
        }
        Ok(FrameOutcome::Presented(status))
    }

    /// Rebuild the per-image semaphores for a recreated swapchain.
    pub fn resize<B: Backend>(
        &mut self,
        device: &mut Device<B>,
        swapchain: &SwapchainHandle,
    ) -> Result<()> {
        device.wait_idle()?;
        for semaphore in self.render_finished.drain(..) {
            device.destroy_semaphore(semaphore);
        }
        self.create_render_finished(device, swapchain)
    }

    pub fn frames_in_flight(&self) -> usize {
        self.frames.len()
    }

    pub fn render_finished_count(&self) -> usize {
        self.render_finished.len()
    }

    /// Frames presented or submitted so far.
    pub fn frame_number(&self) -> u64 {
        self.frame_number
    }

    pub fn frame_sync(&self, index: usize) -> &FrameSync {
        &self.frames[index]
    }

    /// Wait for the GPU and release everything the orchestrator owns.
    pub fn destroy<B: Backend>(self, device: &mut Device<B>) {
        if let Err(e) = device.wait_idle() {
            log::warn!("wait_idle failed before destroying frame resources: {}", e);
        }
        self.release(device);
    }

    fn release<B: Backend>(self, device: &mut Device<B>) {
        let FrameOrchestrator {
            pool,
            frames,
            render_finished,
            ..
        } = self;
        for semaphore in render_finished {
            device.destroy_semaphore(semaphore);
        }
        for frame in frames {
            device.destroy_semaphore(frame.image_available);
            device.destroy_fence(frame.in_flight);
            device.destroy_command_buffer(&pool, frame.command_buffer);
        }
        device.destroy_command_pool(pool);
    }
}
