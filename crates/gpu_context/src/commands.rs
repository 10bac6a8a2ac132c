use vulkanite::{
    Handle,
    vk::{rs::*, *},
};

use crate::{
    context::GpuContext,
    error::{GpuError, Result},
    frame::FramePhase,
    pipeline::PipelineResource,
    registry::{BufferHandle, PipelineHandle},
};

/// Turns a Y-down viewport into the Y-up one recorded on the command buffer.
pub fn flip_viewport(viewport: Viewport) -> Viewport {
    Viewport {
        y: viewport.y + viewport.height,
        height: -viewport.height,
        ..viewport
    }
}

/// Scissor rectangle covering the unflipped viewport.
pub fn viewport_scissor(viewport: &Viewport) -> Rect2D {
    Rect2D {
        offset: Offset2D {
            x: viewport.x as i32,
            y: viewport.y as i32,
        },
        extent: Extent2D {
            width: viewport.width.max(0.0) as u32,
            height: viewport.height.max(0.0) as u32,
        },
    }
}

pub fn check_push_constant_range(offset: u32, size: usize, limit: u32) -> Result<()> {
    let end = u64::from(offset) + size as u64;
    if end > u64::from(limit) || offset % 4 != 0 || size % 4 != 0 {
        return Err(GpuError::PushConstantRange {
            offset,
            end: u32::try_from(end).unwrap_or(u32::MAX),
            limit,
        });
    }

    Ok(())
}

/// Per-frame recording. Every call appends one or a few commands to the command buffer
/// of the active frame slot and fails with [`GpuError::FrameState`] outside a frame.
impl GpuContext<'_> {
    /// Opens dynamic rendering into the acquired swap-chain image, cleared to opaque black.
    pub fn begin_rendering(&mut self, viewport: Viewport) -> Result<()> {
        self.pacer.ensure_phase(FramePhase::Recording, "begin_rendering")?;

        let command_buffer = self.current_command_buffer();
        let image_view = self.swap_chain.image_views[self.pacer.image_index() as usize];
        let scissor = viewport_scissor(&viewport);

        let color_attachment_infos = [RenderingAttachmentInfo {
            image_view: Some(image_view.borrow()),
            image_layout: ImageLayout::ColorAttachmentOptimal,
            resolve_mode: ResolveModeFlags::None,
            load_op: AttachmentLoadOp::Clear,
            store_op: AttachmentStoreOp::Store,
            clear_value: ClearValue {
                color: ClearColorValue {
                    float32: [0.0, 0.0, 0.0, 1.0],
                },
            },
            ..Default::default()
        }];

        let rendering_info = RenderingInfo {
            render_area: scissor,
            layer_count: 1,
            color_attachment_count: color_attachment_infos.len() as _,
            p_color_attachments: color_attachment_infos.as_ptr(),
            ..Default::default()
        };

        command_buffer.begin_rendering(&rendering_info);

        let viewports = [flip_viewport(viewport)];
        let scissors = [scissor];
        command_buffer.set_viewport_with_count(&viewports);
        command_buffer.set_scissor_with_count(&scissors);

        command_buffer.set_cull_mode(CullModeFlags::None);
        command_buffer.set_primitive_topology(PrimitiveTopology::TriangleList);

        self.pacer.begin_rendering()
    }

    pub fn end_rendering(&mut self) -> Result<()> {
        self.pacer.ensure_phase(FramePhase::Rendering, "end_rendering")?;

        self.current_command_buffer().end_rendering();

        self.pacer.end_rendering()
    }

    pub fn set_graphics_pipeline(&mut self, handle: PipelineHandle) -> Result<()> {
        self.pacer.ensure_in_frame("set_graphics_pipeline")?;
        let pipeline = self.pipelines.get(handle)?.pipeline;

        self.current_command_buffer()
            .bind_pipeline(PipelineBindPoint::Graphics, pipeline);
        self.bound_pipeline = Some(handle);

        Ok(())
    }

    /// Writes `data` at `offset` into the push-constant block of the bound pipeline.
    pub fn set_push_constants(&mut self, data: &[u8], offset: u32) -> Result<()> {
        self.pacer.ensure_in_frame("set_push_constants")?;
        let pipeline = self.bound_pipeline()?;
        check_push_constant_range(offset, data.len(), pipeline.push_constant_size)?;

        if data.is_empty() {
            return Ok(());
        }

        self.current_command_buffer().push_constants(
            pipeline.layout,
            ShaderStageFlags::AllGraphics,
            offset,
            data.len() as u32,
            data.as_ptr() as _,
        );

        Ok(())
    }

    pub fn set_primitive_topology(&mut self, topology: PrimitiveTopology) -> Result<()> {
        self.pacer.ensure_in_frame("set_primitive_topology")?;
        self.current_command_buffer()
            .set_primitive_topology(topology);

        Ok(())
    }

    pub fn set_cull_mode(&mut self, cull_mode: CullModeFlags) -> Result<()> {
        self.pacer.ensure_in_frame("set_cull_mode")?;
        self.current_command_buffer().set_cull_mode(cull_mode);

        Ok(())
    }

    /// Binds `handles` to consecutive vertex bindings starting at 0, each at offset 0.
    pub fn set_vertex_buffers(&mut self, handles: &[BufferHandle]) -> Result<()> {
        self.pacer.ensure_in_frame("set_vertex_buffers")?;

        let buffers = handles
            .iter()
            .map(|handle| self.buffers.get(*handle).map(|buffer| buffer.buffer))
            .collect::<Result<Vec<Buffer>>>()?;
        if buffers.is_empty() {
            return Ok(());
        }
        let offsets: Vec<DeviceSize> = vec![0; buffers.len()];

        self.current_command_buffer()
            .bind_vertex_buffers(0, buffers.as_slice(), offsets.as_slice());

        Ok(())
    }

    pub fn set_index_buffer(&mut self, handle: BufferHandle, index_type: IndexType) -> Result<()> {
        self.pacer.ensure_in_frame("set_index_buffer")?;
        let buffer = self.buffers.get(handle)?.buffer;

        self.current_command_buffer()
            .bind_index_buffer(Some(buffer), 0, index_type);

        Ok(())
    }

    /// Draws `count` vertices starting at `first`, one instance.
    pub fn draw(&mut self, first: u32, count: u32) -> Result<()> {
        self.pacer.ensure_phase(FramePhase::Rendering, "draw")?;
        self.bound_pipeline()?;

        self.current_command_buffer().draw(count, 1, first, 0);

        Ok(())
    }

    /// Draws `count` indices starting at index `first`, one instance, no vertex offset.
    pub fn draw_indexed(&mut self, first: u32, count: u32) -> Result<()> {
        self.pacer.ensure_phase(FramePhase::Rendering, "draw_indexed")?;
        self.bound_pipeline()?;

        self.current_command_buffer()
            .draw_indexed(count, 1, first, 0, 0);

        Ok(())
    }

    #[inline(always)]
    fn current_command_buffer(&self) -> CommandBuffer {
        self.frames[self.pacer.slot_index()].command_buffer
    }

    fn bound_pipeline(&self) -> Result<&PipelineResource> {
        let handle = self.bound_pipeline.ok_or(GpuError::NoBoundPipeline)?;

        self.pipelines.get(handle)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn viewport(x: f32, y: f32, width: f32, height: f32) -> Viewport {
        Viewport {
            x,
            y,
            width,
            height,
            min_depth: 0.0,
            max_depth: 1.0,
        }
    }

    #[test]
    fn viewport_is_flipped_vertically() {
        let flipped = flip_viewport(viewport(0.0, 0.0, 800.0, 600.0));

        assert_eq!(flipped.x, 0.0);
        assert_eq!(flipped.y, 600.0);
        assert_eq!(flipped.width, 800.0);
        assert_eq!(flipped.height, -600.0);
        assert_eq!((flipped.min_depth, flipped.max_depth), (0.0, 1.0));
    }

    #[test]
    fn flip_keeps_viewport_origin_offset() {
        let flipped = flip_viewport(viewport(10.0, 20.0, 100.0, 50.0));

        assert_eq!((flipped.x, flipped.y), (10.0, 70.0));
        assert_eq!(flipped.height, -50.0);
    }

    #[test]
    fn scissor_matches_unflipped_viewport() {
        let scissor = viewport_scissor(&viewport(10.0, 20.0, 100.0, 50.0));

        assert_eq!((scissor.offset.x, scissor.offset.y), (10, 20));
        assert_eq!((scissor.extent.width, scissor.extent.height), (100, 50));
    }

    #[test]
    fn push_constants_fit_the_block() {
        assert!(check_push_constant_range(0, 64, 128).is_ok());
        assert!(check_push_constant_range(64, 64, 128).is_ok());
        assert!(check_push_constant_range(0, 0, 128).is_ok());
    }

    #[test]
    fn push_constants_past_the_block_are_rejected() {
        assert!(matches!(
            check_push_constant_range(64, 128, 128),
            Err(GpuError::PushConstantRange {
                offset: 64,
                end: 192,
                limit: 128
            })
        ));
        assert!(check_push_constant_range(2, 4, 128).is_err());
        assert!(check_push_constant_range(0, 6, 128).is_err());
    }
}
