use vulkanite::vk::{rs::*, *};

use crate::{error::Result, utils};

/// One-shot command submission used outside the frame loop.
///
/// `end` returns once the recorded work is complete, so anything it wrote is visible
/// to later submissions without further synchronization.
pub trait ImmediateSubmit {
    fn begin(&mut self) -> Result<CommandBuffer>;
    fn end(&mut self, command_buffer: CommandBuffer) -> Result<()>;

    fn submit(&mut self, record: &mut dyn FnMut(CommandBuffer)) -> Result<()> {
        let command_buffer = self.begin()?;
        record(command_buffer);

        self.end(command_buffer)
    }
}

/// Allocates from a transient pool and waits for the whole queue to drain.
// TODO: signal a timeline semaphore per submission instead of waiting for queue idle.
pub struct BlockingImmediate {
    device: Device,
    queue: Queue,
    command_pool: CommandPool,
}

impl BlockingImmediate {
    pub fn new(device: Device, queue: Queue, queue_family_index: u32) -> Result<Self> {
        let command_pool_info = CommandPoolCreateInfo::default()
            .flags(CommandPoolCreateFlags::Transient)
            .queue_family_index(queue_family_index);
        let command_pool = device.create_command_pool(&command_pool_info)?;

        Ok(Self {
            device,
            queue,
            command_pool,
        })
    }

    pub unsafe fn destroy(&self) {
        unsafe {
            self.device.destroy_command_pool(Some(self.command_pool));
        }
    }
}

impl ImmediateSubmit for BlockingImmediate {
    fn begin(&mut self) -> Result<CommandBuffer> {
        let command_buffer_allocate_info = CommandBufferAllocateInfo::default()
            .command_pool(&self.command_pool)
            .level(CommandBufferLevel::Primary)
            .command_buffer_count(1);

        let command_buffers: Vec<CommandBuffer> = self
            .device
            .allocate_command_buffers(&command_buffer_allocate_info)?;
        let command_buffer = command_buffers[0];

        let command_buffer_begin_info =
            utils::create_command_buffer_begin_info(CommandBufferUsageFlags::OneTimeSubmit);
        if let Err(status) = command_buffer.begin(&command_buffer_begin_info) {
            self.free(command_buffer);
            return Err(status.into());
        }

        Ok(command_buffer)
    }

    fn end(&mut self, command_buffer: CommandBuffer) -> Result<()> {
        let result = self.flush(command_buffer);
        self.free(command_buffer);

        result
    }
}

impl BlockingImmediate {
    fn flush(&self, command_buffer: CommandBuffer) -> Result<()> {
        command_buffer.end()?;

        let command_buffer_submit_infos = [utils::command_buffer_submit_info(&command_buffer)];
        let submit_infos = [utils::submit_info(&command_buffer_submit_infos, &[], &[])];

        self.queue.submit2(&submit_infos, None)?;
        self.queue.wait_idle()?;

        Ok(())
    }

    fn free(&self, command_buffer: CommandBuffer) {
        let command_buffers = [command_buffer];
        unsafe {
            self.device
                .free_command_buffers(self.command_pool, &command_buffers);
        }
    }
}
