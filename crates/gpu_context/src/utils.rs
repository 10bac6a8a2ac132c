use vulkanite::vk::{rs::*, *};

/// Stage and access scopes for one side of an image layout transition.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BarrierScope {
    pub stage_mask: PipelineStageFlags2,
    pub access_mask: AccessFlags2,
}

/// Scope that must complete before an image may leave `layout`.
pub fn source_scope(layout: ImageLayout) -> BarrierScope {
    match layout {
        ImageLayout::ColorAttachmentOptimal => BarrierScope {
            stage_mask: PipelineStageFlags2::ColorAttachmentOutput,
            access_mask: AccessFlags2::ColorAttachmentWrite,
        },
        _ => BarrierScope {
            stage_mask: PipelineStageFlags2::TopOfPipe,
            access_mask: AccessFlags2::None,
        },
    }
}

/// Scope that waits for an image to arrive in `layout`.
pub fn destination_scope(layout: ImageLayout) -> BarrierScope {
    match layout {
        ImageLayout::ColorAttachmentOptimal => BarrierScope {
            stage_mask: PipelineStageFlags2::ColorAttachmentOutput,
            access_mask: AccessFlags2::ColorAttachmentWrite,
        },
        _ => BarrierScope {
            stage_mask: PipelineStageFlags2::BottomOfPipe,
            access_mask: AccessFlags2::None,
        },
    }
}

pub fn transition_image(
    command_buffer: CommandBuffer,
    image: Image,
    old_image_layout: ImageLayout,
    new_image_layout: ImageLayout,
) {
    let source = source_scope(old_image_layout);
    let destination = destination_scope(new_image_layout);

    let image_memory_barrier = ImageMemoryBarrier2::default()
        .src_stage_mask(source.stage_mask)
        .src_access_mask(source.access_mask)
        .dst_stage_mask(destination.stage_mask)
        .dst_access_mask(destination.access_mask)
        .old_layout(old_image_layout)
        .new_layout(new_image_layout)
        .src_queue_family_index(QUEUE_FAMILY_IGNORED)
        .dst_queue_family_index(QUEUE_FAMILY_IGNORED)
        .subresource_range(color_subresource_range())
        .image(&image);

    let image_memory_barriers = [image_memory_barrier];
    let dependency_info = DependencyInfo::default().image_memory_barriers(&image_memory_barriers);

    command_buffer.pipeline_barrier2(&dependency_info);
}

pub fn color_subresource_range() -> ImageSubresourceRange {
    ImageSubresourceRange {
        aspect_mask: ImageAspectFlags::Color,
        base_mip_level: 0,
        level_count: 1,
        base_array_layer: 0,
        layer_count: 1,
    }
}

pub fn create_command_buffer_begin_info<'a>(
    flags: CommandBufferUsageFlags,
) -> CommandBufferBeginInfo<'a> {
    CommandBufferBeginInfo::default().flags(flags)
}

pub fn semaphore_submit_info<'a>(
    stage_mask: PipelineStageFlags2,
    semaphore: &'a Semaphore,
) -> SemaphoreSubmitInfo<'a> {
    SemaphoreSubmitInfo::default()
        .semaphore(semaphore)
        .stage_mask(stage_mask)
}

pub fn command_buffer_submit_info<'a>(
    command_buffer: &'a CommandBuffer,
) -> CommandBufferSubmitInfo<'a> {
    CommandBufferSubmitInfo::default().command_buffer(command_buffer)
}

pub fn submit_info<'a>(
    command_buffer_submit_infos: &'a [CommandBufferSubmitInfo],
    wait_semaphores: &'a [SemaphoreSubmitInfo],
    signal_semaphores: &'a [SemaphoreSubmitInfo],
) -> SubmitInfo2<'a> {
    SubmitInfo2::default()
        .wait_semaphore_infos(wait_semaphores)
        .signal_semaphore_infos(signal_semaphores)
        .command_buffer_infos(command_buffer_submit_infos)
}
