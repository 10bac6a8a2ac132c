use std::mem::{self, ManuallyDrop};

use raw_window_handle::{HasDisplayHandle, HasWindowHandle};
use vulkanite::vk::{rs::*, *};

use crate::{
    config::ContextConfig,
    device::VulkanDevice,
    error::{GpuError, Result},
    frame::{FRAMES_IN_FLIGHT, FramePacer, FramePhase, FrameQueue, FrameSlot},
    immediate::BlockingImmediate,
    instance::InstanceFactory,
    pipeline::{self, GraphicsPipelineDesc, PipelineResource, ShaderResource},
    registry::{BufferHandle, PipelineHandle, Registry, ShaderHandle},
    swapchain::{self, SwapChain},
    upload::{self, BufferDesc, BufferResource},
    utils,
};

/// Rendering context for one window surface.
///
/// Borrows the [`InstanceFactory`] that leased it the Vulkan instance, so it cannot outlive
/// it. Every frame follows `begin_frame`, `begin_rendering`, draw calls, `end_rendering`,
/// `end_frame`.
pub struct GpuContext<'f> {
    factory: &'f InstanceFactory,
    config: ContextConfig,
    instance: Instance,
    surface: SurfaceKHR,
    vulkan_device: ManuallyDrop<VulkanDevice>,
    pub(crate) swap_chain: ManuallyDrop<SwapChain>,
    graphics_command_pool: CommandPool,
    pub(crate) frames: Vec<FrameSlot>,
    pub(crate) pacer: FramePacer,
    immediate: BlockingImmediate,
    pub(crate) buffers: Registry<BufferHandle, BufferResource>,
    pub(crate) pipelines: Registry<PipelineHandle, PipelineResource>,
    shaders: Registry<ShaderHandle, ShaderResource>,
    pub(crate) bound_pipeline: Option<PipelineHandle>,
    requested_extent: Extent2D,
    swapchain_stale: bool,
}

struct FrameObjects {
    graphics_command_pool: CommandPool,
    frames: Vec<FrameSlot>,
    immediate: BlockingImmediate,
}

impl FrameObjects {
    fn new(vulkan_device: &VulkanDevice) -> Result<Self> {
        let device = &vulkan_device.device;

        let command_pool_info = CommandPoolCreateInfo::default()
            .flags(CommandPoolCreateFlags::ResetCommandBuffer)
            .queue_family_index(vulkan_device.queue_family_index);
        let graphics_command_pool = device.create_command_pool(&command_pool_info)?;

        let mut frames = Vec::with_capacity(FRAMES_IN_FLIGHT);
        for _ in 0..FRAMES_IN_FLIGHT {
            match FrameSlot::new(device, &graphics_command_pool) {
                Ok(frame) => frames.push(frame),
                Err(error) => {
                    Self::destroy_frames(device, graphics_command_pool, &frames);
                    return Err(error);
                }
            }
        }

        let immediate = match BlockingImmediate::new(
            *device,
            vulkan_device.graphics_queue,
            vulkan_device.queue_family_index,
        ) {
            Ok(immediate) => immediate,
            Err(error) => {
                Self::destroy_frames(device, graphics_command_pool, &frames);
                return Err(error);
            }
        };

        Ok(Self {
            graphics_command_pool,
            frames,
            immediate,
        })
    }

    fn destroy_frames(device: &Device, command_pool: CommandPool, frames: &[FrameSlot]) {
        unsafe {
            frames.iter().for_each(|frame| frame.destroy(device));
            device.destroy_command_pool(Some(command_pool));
        }
    }
}

impl<'f> GpuContext<'f> {
    /// Creates a context presenting to `window` at `extent` pixels.
    ///
    /// Leases the instance from `factory`, creating it if this is the first live context.
    pub fn new<W>(factory: &'f InstanceFactory, window: &W, extent: Extent2D) -> Result<Self>
    where
        W: HasDisplayHandle + HasWindowHandle + ?Sized,
    {
        let display_handle = window.display_handle()?.as_raw();
        let instance = factory.acquire(display_handle)?;

        let surface = match swapchain::create_surface(&instance, window) {
            Ok(surface) => surface,
            Err(error) => {
                factory.release();
                return Err(error);
            }
        };

        let destroy_surface = |instance: &Instance| unsafe {
            instance.destroy_surface_khr(Some(surface));
            factory.release();
        };

        let vulkan_device = match VulkanDevice::new(&instance) {
            Ok(vulkan_device) => vulkan_device,
            Err(error) => {
                destroy_surface(&instance);
                return Err(error);
            }
        };

        let swap_chain = match SwapChain::new(&vulkan_device, surface, extent) {
            Ok(swap_chain) => swap_chain,
            Err(error) => {
                unsafe { vulkan_device.destroy() };
                destroy_surface(&instance);
                return Err(error);
            }
        };

        let frame_objects = match FrameObjects::new(&vulkan_device) {
            Ok(frame_objects) => frame_objects,
            Err(error) => {
                unsafe {
                    swap_chain.destroy(&vulkan_device.device);
                    vulkan_device.destroy();
                }
                destroy_surface(&instance);
                return Err(error);
            }
        };

        log::info!(
            "GPU context created: {}x{}, {} swap-chain images, {:?}",
            swap_chain.extent.width,
            swap_chain.extent.height,
            swap_chain.image_count(),
            swap_chain.surface_format.format
        );

        Ok(Self {
            factory,
            config: factory.config().clone(),
            instance,
            surface,
            vulkan_device: ManuallyDrop::new(vulkan_device),
            swap_chain: ManuallyDrop::new(swap_chain),
            graphics_command_pool: frame_objects.graphics_command_pool,
            frames: frame_objects.frames,
            pacer: FramePacer::new(),
            immediate: frame_objects.immediate,
            buffers: Registry::new("buffer"),
            pipelines: Registry::new("pipeline"),
            shaders: Registry::new("shader"),
            bound_pipeline: None,
            requested_extent: extent,
            swapchain_stale: false,
        })
    }

    /// Waits for the current slot to retire, acquires the next swap-chain image and starts
    /// recording into the slot's command buffer.
    pub fn begin_frame(&mut self) -> Result<()> {
        let mut pacer = mem::take(&mut self.pacer);
        let result = pacer.run_begin_frame(&mut FrameDriver(self));
        self.pacer = pacer;

        result.map(|_| ())
    }

    /// Submits the frame and queues the acquired image for presentation.
    ///
    /// An out-of-date swap chain at present still completes the frame and is reported as
    /// [`GpuError::SwapchainOutOfDate`].
    pub fn end_frame(&mut self) -> Result<()> {
        let mut pacer = mem::take(&mut self.pacer);
        let result = pacer.run_end_frame(&mut FrameDriver(self));
        self.pacer = pacer;

        result
    }

    /// Rebuilds the swap chain when it was reported stale or `extent` differs from the last
    /// requested size. Returns whether a rebuild happened.
    pub fn validate_swapchain(&mut self, extent: Extent2D) -> Result<bool> {
        self.pacer.ensure_phase(FramePhase::Idle, "validate_swapchain")?;

        if !swapchain::needs_rebuild(self.requested_extent, extent, self.swapchain_stale) {
            return Ok(false);
        }

        self.requested_extent = extent;
        self.rebuild_swapchain()?;

        Ok(true)
    }

    /// Unconditionally rebuilds the swap chain for `extent`.
    pub fn resize(&mut self, extent: Extent2D) -> Result<()> {
        self.pacer.ensure_phase(FramePhase::Idle, "resize")?;

        self.requested_extent = extent;
        self.rebuild_swapchain()
    }

    /// Uploads `desc.data` into a new device-local buffer, usable as soon as this returns.
    pub fn create_buffer(&mut self, desc: &BufferDesc) -> Result<BufferHandle> {
        let buffer = upload::upload_buffer(
            &self.vulkan_device.allocator,
            &mut self.immediate,
            desc,
        )?;

        log::debug!("Buffer created: {} bytes, {:?}", buffer.size, buffer.usage);

        Ok(self.buffers.create(buffer))
    }

    /// Only between frames: commands recorded in the current frame may still reference it.
    pub fn destroy_buffer(&mut self, handle: BufferHandle) -> Result<()> {
        self.pacer.ensure_phase(FramePhase::Idle, "destroy_buffer")?;
        self.buffers.get(handle)?;
        self.vulkan_device.wait_idle()?;

        if let Some(buffer) = self.buffers.destroy(handle) {
            unsafe { buffer.destroy(&self.vulkan_device.allocator) };
        }

        Ok(())
    }

    pub fn create_shader(&mut self, spirv: &[u8]) -> Result<ShaderHandle> {
        let shader = ShaderResource::new(&self.vulkan_device.device, spirv)?;

        Ok(self.shaders.create(shader))
    }

    /// Pipelines already built from the shader are unaffected.
    pub fn destroy_shader(&mut self, handle: ShaderHandle) -> Result<()> {
        self.shaders.get(handle)?;

        if let Some(shader) = self.shaders.destroy(handle) {
            unsafe { shader.destroy(&self.vulkan_device.device) };
        }

        Ok(())
    }

    pub fn create_graphics_pipeline(&mut self, desc: &GraphicsPipelineDesc) -> Result<PipelineHandle> {
        let vertex_module = self.shaders.get(desc.vertex_shader)?.module;
        let fragment_module = self.shaders.get(desc.fragment_shader)?.module;
        let color_format = desc
            .fixed_function
            .color_format
            .unwrap_or(self.swap_chain.surface_format.format);

        let pipeline = pipeline::create_graphics_pipeline(
            &self.vulkan_device.device,
            vertex_module,
            fragment_module,
            desc.vertex_attributes,
            &desc.fixed_function,
            color_format,
        )?;

        Ok(self.pipelines.create(pipeline))
    }

    /// Only between frames, like [`GpuContext::destroy_buffer`].
    pub fn destroy_pipeline(&mut self, handle: PipelineHandle) -> Result<()> {
        self.pacer.ensure_phase(FramePhase::Idle, "destroy_pipeline")?;
        self.pipelines.get(handle)?;
        self.vulkan_device.wait_idle()?;

        if let Some(pipeline) = self.pipelines.destroy(handle) {
            unsafe { pipeline.destroy(&self.vulkan_device.device) };
        }
        if self.bound_pipeline == Some(handle) {
            self.bound_pipeline = None;
        }

        Ok(())
    }

    #[inline(always)]
    pub fn config(&self) -> &ContextConfig {
        &self.config
    }

    #[inline(always)]
    pub fn buffer(&self, handle: BufferHandle) -> Result<&BufferResource> {
        self.buffers.get(handle)
    }

    #[inline(always)]
    pub fn pipeline(&self, handle: PipelineHandle) -> Result<&PipelineResource> {
        self.pipelines.get(handle)
    }

    #[inline(always)]
    pub fn frame_counter(&self) -> u64 {
        self.pacer.frame_counter()
    }

    /// Index of the frame slot the next or current frame records into.
    #[inline(always)]
    pub fn frame_index(&self) -> usize {
        self.pacer.slot_index()
    }

    #[inline(always)]
    pub fn image_index(&self) -> u32 {
        self.pacer.image_index()
    }

    #[inline(always)]
    pub fn phase(&self) -> FramePhase {
        self.pacer.phase()
    }

    #[inline(always)]
    pub fn submissions(&self) -> u64 {
        self.pacer.submissions()
    }

    #[inline(always)]
    pub fn presents(&self) -> u64 {
        self.pacer.presents()
    }

    #[inline(always)]
    pub fn swapchain_extent(&self) -> Extent2D {
        self.swap_chain.extent
    }

    #[inline(always)]
    pub fn surface_format(&self) -> SurfaceFormatKHR {
        self.swap_chain.surface_format
    }

    #[inline(always)]
    pub fn swapchain_image_count(&self) -> usize {
        self.swap_chain.image_count()
    }

    #[inline(always)]
    pub fn swapchain_is_stale(&self) -> bool {
        self.swapchain_stale
    }

    #[inline(always)]
    pub fn device(&self) -> &Device {
        &self.vulkan_device.device
    }

    #[inline(always)]
    pub fn physical_device(&self) -> PhysicalDevice {
        self.vulkan_device.physical_device
    }

    pub fn wait_idle(&self) -> Result<()> {
        self.vulkan_device.wait_idle()
    }

    fn wait_for_fence(&self, slot_index: usize, fence: Fence) -> Result<()> {
        let fences = [fence];
        let wait_result = self.vulkan_device.device.wait_for_fences(
            fences.as_slice(),
            true,
            self.config.fence_timeout_ns(),
        );

        match wait_result {
            Ok(Status::Timeout) => {
                log::error!(
                    "Frame fence of slot {slot_index} not signaled after {:?}",
                    self.config.fence_timeout()
                );
                Err(GpuError::Timeout("frame fence"))
            }
            Ok(_) => Ok(()),
            Err(status) => Err(status.into()),
        }
    }

    fn acquire_next_image(&mut self, slot_index: usize) -> Result<u32> {
        let acquire_signal = self.swap_chain.acquire_signals[slot_index];

        let (status, image_index) = self.vulkan_device.device.acquire_next_image_khr(
            self.swap_chain.swapchain,
            self.config.fence_timeout_ns(),
            Some(acquire_signal),
            Default::default(),
        )?;

        match status {
            Status::Timeout | Status::NotReady => Err(GpuError::Timeout("swap-chain image")),
            Status::SuboptimalKHR => {
                self.swapchain_stale = true;
                Ok(image_index)
            }
            _ => Ok(image_index),
        }
    }

    fn rebuild_swapchain(&mut self) -> Result<()> {
        self.swap_chain
            .rebuild(&self.vulkan_device, self.surface, self.requested_extent)?;
        self.swapchain_stale = false;

        Ok(())
    }
}

/// Device half of the frame lifecycle, used while the context's pacer is checked out.
struct FrameDriver<'a, 'f>(&'a mut GpuContext<'f>);

impl FrameQueue for FrameDriver<'_, '_> {
    fn wait_for_slot(&mut self, slot_index: usize) -> Result<()> {
        let in_flight_fence = self.0.frames[slot_index].in_flight_fence;

        self.0.wait_for_fence(slot_index, in_flight_fence)
    }

    fn acquire_image(&mut self, slot_index: usize) -> Result<u32> {
        let context = &mut *self.0;

        match context.acquire_next_image(slot_index) {
            Err(GpuError::SwapchainOutOfDate) if context.config.rebuild_on_out_of_date => {
                log::debug!("Swap chain out of date at acquisition, rebuilding");
                context.rebuild_swapchain()?;
                context.acquire_next_image(slot_index)
            }
            result => result,
        }
    }

    fn start_recording(&mut self, slot_index: usize, image_index: u32) -> Result<()> {
        let context = &mut *self.0;
        let frame = &context.frames[slot_index];
        let command_buffer = frame.command_buffer;

        command_buffer.reset(CommandBufferResetFlags::ReleaseResources)?;

        let command_buffer_begin_info =
            utils::create_command_buffer_begin_info(CommandBufferUsageFlags::OneTimeSubmit);
        command_buffer.begin(&command_buffer_begin_info)?;

        utils::transition_image(
            command_buffer,
            context.swap_chain.images[image_index as usize],
            ImageLayout::Undefined,
            ImageLayout::ColorAttachmentOptimal,
        );

        // Must stay signaled until nothing above can fail.
        let fences = [frame.in_flight_fence];
        context.vulkan_device.device.reset_fences(fences.as_slice())?;

        context.bound_pipeline = None;

        Ok(())
    }

    fn submit(&mut self, slot_index: usize, image_index: u32) -> Result<()> {
        let context = &*self.0;
        let frame = &context.frames[slot_index];
        let command_buffer = frame.command_buffer;

        utils::transition_image(
            command_buffer,
            context.swap_chain.images[image_index as usize],
            ImageLayout::ColorAttachmentOptimal,
            ImageLayout::PresentSrcKHR,
        );

        command_buffer.end()?;

        let acquire_signal = context.swap_chain.acquire_signals[slot_index];
        let present_ready_signal = context.swap_chain.present_ready_signals[image_index as usize];

        let command_buffer_submit_infos = [utils::command_buffer_submit_info(&command_buffer)];
        let wait_semaphore_submit_infos = [utils::semaphore_submit_info(
            PipelineStageFlags2::ColorAttachmentOutput,
            &acquire_signal,
        )];
        let signal_semaphore_submit_infos = [utils::semaphore_submit_info(
            PipelineStageFlags2::AllGraphics,
            &present_ready_signal,
        )];
        let submit_infos = [utils::submit_info(
            &command_buffer_submit_infos,
            &wait_semaphore_submit_infos,
            &signal_semaphore_submit_infos,
        )];

        context
            .vulkan_device
            .graphics_queue
            .submit2(&submit_infos, Some(frame.in_flight_fence))?;

        Ok(())
    }

    fn present(&mut self, _: usize, image_index: u32) -> Result<()> {
        let context = &mut *self.0;

        let swapchains = [context.swap_chain.swapchain];
        let wait_semaphores = [context.swap_chain.present_ready_signals[image_index as usize]];
        let image_indices = [image_index];

        let present_info = PresentInfoKHR::default()
            .swapchain(swapchains.as_slice(), &image_indices, None::<()>)
            .wait_semaphores(wait_semaphores.as_slice());

        match context.vulkan_device.graphics_queue.present_khr(&present_info) {
            Ok(Status::SuboptimalKHR) => {
                context.swapchain_stale = true;
                Ok(())
            }
            Ok(_) => Ok(()),
            Err(Status::ErrorOutOfDateKHR) => {
                context.swapchain_stale = true;
                Err(GpuError::SwapchainOutOfDate)
            }
            Err(status) => Err(status.into()),
        }
    }
}

impl Drop for GpuContext<'_> {
    fn drop(&mut self) {
        if let Err(error) = self.vulkan_device.wait_idle() {
            log::error!("Failed to wait for device idle during teardown: {error}");
        }

        let device = self.vulkan_device.device;

        unsafe {
            self.pipelines
                .drain()
                .for_each(|(_, pipeline)| pipeline.destroy(&device));
            self.shaders
                .drain()
                .for_each(|(_, shader)| shader.destroy(&device));
            self.buffers
                .drain()
                .for_each(|(_, buffer)| buffer.destroy(&self.vulkan_device.allocator));

            self.immediate.destroy();
            FrameObjects::destroy_frames(&device, self.graphics_command_pool, &self.frames);

            ManuallyDrop::take(&mut self.swap_chain).destroy(&device);
            self.instance.destroy_surface_khr(Some(self.surface));
            ManuallyDrop::take(&mut self.vulkan_device).destroy();
        }

        self.factory.release();

        log::info!(
            "GPU context destroyed after {} frames",
            self.pacer.frame_counter()
        );
    }
}
