// Command pool and per-frame command recording

use anyhow::{Context, Result};
use ash::vk;

/// Pool on the graphics family; buffers are reset individually every frame
pub fn create_command_pool(device: &ash::Device, queue_family: u32) -> Result<vk::CommandPool> {
    let pool_info = vk::CommandPoolCreateInfo::default()
        .queue_family_index(queue_family)
        .flags(vk::CommandPoolCreateFlags::RESET_COMMAND_BUFFER);

    unsafe {
        device
            .create_command_pool(&pool_info, None)
            .context("Failed to create command pool")
    }
}

/// One primary command buffer per frame in flight
pub fn allocate_command_buffers(
    device: &ash::Device,
    pool: vk::CommandPool,
    count: usize,
) -> Result<Vec<vk::CommandBuffer>> {
    let alloc_info = vk::CommandBufferAllocateInfo::default()
        .command_pool(pool)
        .level(vk::CommandBufferLevel::PRIMARY)
        .command_buffer_count(count as u32);

    unsafe {
        device
            .allocate_command_buffers(&alloc_info)
            .context("Failed to allocate command buffers")
    }
}

/// Full-extent viewport with the standard 0..1 depth range
pub fn full_viewport(extent: vk::Extent2D) -> vk::Viewport {
    vk::Viewport {
        x: 0.0,
        y: 0.0,
        width: extent.width as f32,
        height: extent.height as f32,
        min_depth: 0.0,
        max_depth: 1.0,
    }
}

pub fn full_scissor(extent: vk::Extent2D) -> vk::Rect2D {
    vk::Rect2D {
        offset: vk::Offset2D { x: 0, y: 0 },
        extent,
    }
}

/// Everything one triangle pass needs to be recorded
pub struct TrianglePass {
    pub render_pass: vk::RenderPass,
    pub framebuffer: vk::Framebuffer,
    pub pipeline: vk::Pipeline,
    pub extent: vk::Extent2D,
    pub clear_color: [f32; 4],
}

/// Record: begin pass, bind pipeline, set viewport/scissor, draw 3 vertices, end pass.
///
/// `cmd` must not be pending on the GPU (its frame fence has been waited on).
pub fn record_triangle(device: &ash::Device, cmd: vk::CommandBuffer, pass: &TrianglePass) -> Result<()> {
    unsafe {
        device
            .reset_command_buffer(cmd, vk::CommandBufferResetFlags::empty())
            .context("Failed to reset command buffer")?;

        let begin_info = vk::CommandBufferBeginInfo::default();
        device
            .begin_command_buffer(cmd, &begin_info)
            .context("Failed to begin recording command buffer")?;

        let clear_values = [vk::ClearValue {
            color: vk::ClearColorValue {
                float32: pass.clear_color,
            },
        }];

        let render_pass_info = vk::RenderPassBeginInfo::default()
            .render_pass(pass.render_pass)
            .framebuffer(pass.framebuffer)
            .render_area(full_scissor(pass.extent))
            .clear_values(&clear_values);

        device.cmd_begin_render_pass(cmd, &render_pass_info, vk::SubpassContents::INLINE);
        device.cmd_bind_pipeline(cmd, vk::PipelineBindPoint::GRAPHICS, pass.pipeline);

        device.cmd_set_viewport(cmd, 0, &[full_viewport(pass.extent)]);
        device.cmd_set_scissor(cmd, 0, &[full_scissor(pass.extent)]);

        // 3 vertices, 1 instance; positions come from gl_VertexIndex
        device.cmd_draw(cmd, 3, 1, 0, 0);

        device.cmd_end_render_pass(cmd);

        device
            .end_command_buffer(cmd)
            .context("Failed to record command buffer")?;
    }

    Ok(())
}
