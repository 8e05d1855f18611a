// =============================================================================
// RENDERER - Setup sequence, per-frame loop, teardown
// =============================================================================
//
// SETUP ORDER:
//   instance -> debug messenger -> surface -> physical device -> logical device
//   -> swapchain + image views -> render pass -> pipeline -> framebuffers
//   -> command pool + buffers -> sync objects
//
// FRAME FLOW:
//   wait fence -> acquire image -> reset fence -> record -> submit -> present
//
// Teardown runs the setup order backwards (see Drop).

use anyhow::{Context, Result};
use ash::vk;
use std::sync::Arc;
use winit::window::Window;

use crate::backend::commands::{self, TrianglePass};
use crate::backend::sync::{AcquireAction, FrameCursor, FramePacer, FrameStart, FrameSync};
use crate::backend::{pipeline, Swapchain, VulkanDevice};
use crate::config::Config;

/// What happened to a call to `draw_frame`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameOutcome {
    /// A frame was submitted and queued for presentation
    Presented,
    /// Nothing was drawn (minimized window or out-of-date swapchain)
    Skipped,
}

/// Owns every Vulkan object of the demo.
///
/// Handles start out null and are filled in by `init`; destroying a null
/// handle is a no-op, so a half-initialized Renderer still drops cleanly.
pub struct Renderer {
    window: Arc<Window>,
    clear_color: [f32; 4],
    present_mode: vk::PresentModeKHR,

    // Per-frame-in-flight
    frame_sync: Vec<FrameSync>,
    cursor: FrameCursor,
    command_pool: vk::CommandPool,
    command_buffers: Vec<vk::CommandBuffer>,

    // Per-swapchain-image, rebuilt with the swapchain
    framebuffers: Vec<vk::Framebuffer>,
    render_finished: Vec<vk::Semaphore>,

    pipeline: vk::Pipeline,
    pipeline_layout: vk::PipelineLayout,
    render_pass: vk::RenderPass,

    swapchain: Option<Swapchain>,
    pacer: FramePacer,

    device: Arc<VulkanDevice>,
}

impl Renderer {
    pub fn new(window: Arc<Window>, config: &Config) -> Result<Self> {
        log::info!("Initializing Vulkan...");

        let device = VulkanDevice::new(&window, &config.window.title, config.validation_enabled())?;

        let mut renderer = Self {
            window,
            clear_color: config.graphics.clear_color,
            present_mode: config.present_mode(),
            frame_sync: Vec::new(),
            cursor: FrameCursor::new(config.frames_in_flight()),
            command_pool: vk::CommandPool::null(),
            command_buffers: Vec::new(),
            framebuffers: Vec::new(),
            render_finished: Vec::new(),
            pipeline: vk::Pipeline::null(),
            pipeline_layout: vk::PipelineLayout::null(),
            render_pass: vk::RenderPass::null(),
            swapchain: None,
            pacer: FramePacer::new(),
            device,
        };

        renderer.init(config)?;

        log::info!("Vulkan initialized successfully!");
        Ok(renderer)
    }

    fn init(&mut self, config: &Config) -> Result<()> {
        let size = self.window.inner_size();
        let swapchain = Swapchain::new(self.device.clone(), self.present_mode, size.width, size.height)?;
        let format = swapchain.format;
        self.swapchain = Some(swapchain);

        let device = &self.device.device;

        self.render_pass = pipeline::create_render_pass(device, format)?;

        let (pipeline, layout) = pipeline::create_triangle_pipeline(
            device,
            self.render_pass,
            &config.shaders.vertex,
            &config.shaders.fragment,
        )?;
        self.pipeline = pipeline;
        self.pipeline_layout = layout;

        self.create_image_resources()?;

        let device = &self.device.device;
        self.command_pool = commands::create_command_pool(device, self.device.graphics_queue_family)?;
        self.command_buffers =
            commands::allocate_command_buffers(device, self.command_pool, self.cursor.count())?;

        for _ in 0..self.cursor.count() {
            let sync = FrameSync::new(device)?;
            self.frame_sync.push(sync);
        }

        log::info!("{} frame(s) in flight", self.cursor.count());
        Ok(())
    }

    /// Framebuffers and render-finished semaphores, one per swapchain image
    fn create_image_resources(&mut self) -> Result<()> {
        let device = &self.device.device;
        let swapchain = self.swapchain.as_ref().context("Swapchain not initialized")?;

        self.framebuffers = pipeline::create_framebuffers(
            device,
            &swapchain.image_views,
            self.render_pass,
            swapchain.extent,
        )?;

        // Present may still wait on an image's semaphore, so they can't be per frame slot
        let semaphore_info = vk::SemaphoreCreateInfo::default();
        for _ in 0..swapchain.images.len() {
            let semaphore = unsafe { device.create_semaphore(&semaphore_info, None) }
                .context("Failed to create render-finished semaphore")?;
            self.render_finished.push(semaphore);
        }

        Ok(())
    }

    fn destroy_image_resources(&mut self) {
        let device = &self.device.device;
        unsafe {
            for framebuffer in self.framebuffers.drain(..) {
                device.destroy_framebuffer(framebuffer, None);
            }
            for semaphore in self.render_finished.drain(..) {
                device.destroy_semaphore(semaphore, None);
            }
        }
    }

    /// Rebuild the swapchain for the window's current (non-zero) size
    fn recreate_swapchain(&mut self, width: u32, height: u32) -> Result<()> {
        log::info!("Recreating swapchain: {}x{}", width, height);

        // Nothing may still reference the old images
        self.device.wait_idle()?;

        self.destroy_image_resources();
        let old_format = self.swapchain.as_ref().map(|s| s.format);
        // Only one swapchain per surface: drop the old one before creating the new one
        self.swapchain = None;

        let swapchain = Swapchain::new(self.device.clone(), self.present_mode, width, height)?;
        if let Some(old_format) = old_format {
            anyhow::ensure!(
                swapchain.format == old_format,
                "Surface format changed from {:?} to {:?}",
                old_format,
                swapchain.format
            );
        }
        self.swapchain = Some(swapchain);

        self.create_image_resources()?;
        self.pacer.recreated();
        Ok(())
    }

    /// Render and present one frame
    pub fn draw_frame(&mut self) -> Result<FrameOutcome> {
        let size = self.window.inner_size();
        match self.pacer.before_acquire(size.width, size.height) {
            FrameStart::Skip => return Ok(FrameOutcome::Skipped),
            FrameStart::Recreate => self.recreate_swapchain(size.width, size.height)?,
            FrameStart::Proceed => {}
        }

        let device = &self.device;
        let swapchain = self.swapchain.as_ref().context("Swapchain not initialized")?;
        let slot = self.cursor.current();
        let sync = &self.frame_sync[slot];

        // STEP 1: the command buffer of this slot must be done on the GPU
        sync.wait(&device.device)?;

        // STEP 2: acquire; the fence stays signaled if we bail out here
        let acquired = swapchain.acquire_next_image(sync.image_available)?;
        let image_index = match self.pacer.on_acquire(acquired) {
            AcquireAction::Record { image_index } => image_index,
            AcquireAction::Skip => return Ok(FrameOutcome::Skipped),
        };

        sync.reset(&device.device)?;

        // STEP 3: record
        let cmd = self.command_buffers[slot];
        let pass = TrianglePass {
            render_pass: self.render_pass,
            framebuffer: self.framebuffers[image_index as usize],
            pipeline: self.pipeline,
            extent: swapchain.extent,
            clear_color: self.clear_color,
        };
        commands::record_triangle(&device.device, cmd, &pass)?;

        // STEP 4: submit
        let wait_semaphores = [sync.image_available];
        let wait_stages = [vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT];
        let command_buffers = [cmd];
        let signal_semaphores = [self.render_finished[image_index as usize]];

        let submit_info = vk::SubmitInfo::default()
            .wait_semaphores(&wait_semaphores)
            .wait_dst_stage_mask(&wait_stages)
            .command_buffers(&command_buffers)
            .signal_semaphores(&signal_semaphores);

        unsafe {
            device
                .device
                .queue_submit(device.graphics_queue, &[submit_info], sync.in_flight_fence)
                .context("Failed to submit draw command buffer")?;
        }

        // STEP 5: present
        let outcome = swapchain.present(device.present_queue, image_index, &signal_semaphores)?;
        self.pacer.on_present(outcome);

        self.cursor.advance();
        Ok(FrameOutcome::Presented)
    }

    /// Ask for a new swapchain before the next frame
    pub fn request_recreate(&mut self) {
        self.pacer.request_recreate();
    }

    pub fn wait_idle(&self) -> Result<()> {
        self.device.wait_idle()
    }

    pub fn extent(&self) -> Option<vk::Extent2D> {
        self.swapchain.as_ref().map(|s| s.extent)
    }

    pub fn swapchain_image_count(&self) -> usize {
        self.swapchain.as_ref().map_or(0, |s| s.images.len())
    }

    pub fn frames_in_flight(&self) -> usize {
        self.cursor.count()
    }

    /// Mode the swapchain actually uses (the configured one may be unsupported)
    pub fn present_mode(&self) -> Option<vk::PresentModeKHR> {
        self.swapchain.as_ref().map(|s| s.present_mode)
    }
}

impl Drop for Renderer {
    fn drop(&mut self) {
        log::info!("Cleaning up Vulkan resources...");

        // Wait for GPU to finish before destroying anything
        let _ = self.device.wait_idle();

        unsafe {
            let device = &self.device.device;
            for sync in &self.frame_sync {
                sync.destroy(device);
            }

            // Also frees the command buffers
            device.destroy_command_pool(self.command_pool, None);
        }

        self.destroy_image_resources();

        unsafe {
            let device = &self.device.device;
            device.destroy_pipeline(self.pipeline, None);
            device.destroy_pipeline_layout(self.pipeline_layout, None);
            device.destroy_render_pass(self.render_pass, None);
        }

        // Image views + swapchain; the device goes once the last Arc is gone
        self.swapchain = None;

        log::info!("Cleanup complete");
    }
}
