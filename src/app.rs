// =============================================================================
// APPLICATION - winit event loop driving the renderer
// =============================================================================

use anyhow::Result;
use std::sync::Arc;
use std::time::{Duration, Instant};
use winit::{
    application::ApplicationHandler,
    event::WindowEvent,
    event_loop::ActiveEventLoop,
    keyboard::{KeyCode, PhysicalKey},
    window::{Window, WindowAttributes, WindowId},
};

use crate::config::Config;
use crate::renderer::{FrameOutcome, Renderer};

/// Frame rate averaged over one reporting interval
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FpsSample {
    pub fps: f32,
    pub frame_time_ms: f32,
}

/// Counts presented frames and reports once per interval
#[derive(Debug, Clone)]
pub struct FpsCounter {
    interval: Duration,
    frames: u32,
    window_start: Instant,
}

impl FpsCounter {
    pub fn new(now: Instant) -> Self {
        Self::with_interval(now, Duration::from_secs(1))
    }

    pub fn with_interval(now: Instant, interval: Duration) -> Self {
        Self {
            interval,
            frames: 0,
            window_start: now,
        }
    }

    /// Record one frame; returns a sample when the interval has elapsed
    pub fn tick(&mut self, now: Instant) -> Option<FpsSample> {
        self.frames += 1;

        let elapsed = now.saturating_duration_since(self.window_start);
        if elapsed < self.interval {
            return None;
        }

        let secs = elapsed.as_secs_f32();
        let sample = FpsSample {
            fps: self.frames as f32 / secs,
            frame_time_ms: secs * 1000.0 / self.frames as f32,
        };

        self.frames = 0;
        self.window_start = now;
        Some(sample)
    }
}

/// Main application struct.
///
/// Field order matters for Drop: the renderer (and its surface) must go
/// before the window it was created from.
pub struct App {
    renderer: Option<Renderer>,
    window: Option<Arc<Window>>,
    config: Config,
    fps: FpsCounter,
    error: Option<anyhow::Error>,
}

impl App {
    pub fn new(config: Config) -> Self {
        Self {
            renderer: None,
            window: None,
            config,
            fps: FpsCounter::new(Instant::now()),
            error: None,
        }
    }

    /// The error that stopped the event loop, if any
    pub fn take_error(&mut self) -> Option<anyhow::Error> {
        self.error.take()
    }

    fn fail(&mut self, event_loop: &ActiveEventLoop, error: anyhow::Error) {
        log::error!("{:#}", error);
        self.error = Some(error);
        event_loop.exit();
    }

    fn window_attributes(&self) -> WindowAttributes {
        WindowAttributes::default()
            .with_title(&self.config.window.title)
            .with_inner_size(winit::dpi::PhysicalSize::new(
                self.config.window.width,
                self.config.window.height,
            ))
            .with_resizable(self.config.window.resizable)
    }

    fn init(&mut self, event_loop: &ActiveEventLoop) -> Result<()> {
        let window = Arc::new(event_loop.create_window(self.window_attributes())?);
        let renderer = Renderer::new(window.clone(), &self.config)?;

        self.window = Some(window);
        self.renderer = Some(renderer);
        self.fps = FpsCounter::new(Instant::now());
        Ok(())
    }

    fn redraw(&mut self, event_loop: &ActiveEventLoop) {
        let Some(renderer) = self.renderer.as_mut() else {
            return;
        };

        match renderer.draw_frame() {
            Ok(FrameOutcome::Presented) => self.update_fps(),
            Ok(FrameOutcome::Skipped) => {}
            Err(e) => self.fail(event_loop, e.context("Render error")),
        }
    }

    fn update_fps(&mut self) {
        if !self.config.debug.show_fps {
            return;
        }

        if let (Some(sample), Some(window)) = (self.fps.tick(Instant::now()), &self.window) {
            window.set_title(&format!(
                "{} - {:.0} FPS ({:.2} ms)",
                self.config.window.title, sample.fps, sample.frame_time_ms
            ));
        }
    }

    fn shutdown(&mut self, event_loop: &ActiveEventLoop) {
        if let Some(renderer) = &self.renderer {
            if let Err(e) = renderer.wait_idle() {
                log::warn!("Failed to wait for GPU before exit: {:#}", e);
            }
        }
        event_loop.exit();
    }
}

impl ApplicationHandler for App {
    fn resumed(&mut self, event_loop: &ActiveEventLoop) {
        if self.window.is_some() {
            return;
        }

        if let Err(e) = self.init(event_loop) {
            self.fail(event_loop, e.context("Failed to initialize Vulkan"));
        }
    }

    fn window_event(&mut self, event_loop: &ActiveEventLoop, _id: WindowId, event: WindowEvent) {
        match event {
            WindowEvent::CloseRequested => {
                log::info!("Close requested, shutting down...");
                self.shutdown(event_loop);
            }
            WindowEvent::RedrawRequested => self.redraw(event_loop),
            WindowEvent::KeyboardInput { event, .. }
                if event.state.is_pressed()
                    && event.physical_key == PhysicalKey::Code(KeyCode::Escape) =>
            {
                log::info!("ESC pressed, exiting...");
                self.shutdown(event_loop);
            }
            _ => {}
        }
    }

    /// Request continuous redraws
    fn about_to_wait(&mut self, _event_loop: &ActiveEventLoop) {
        if let Some(window) = &self.window {
            window.request_redraw();
        }
    }

    fn exiting(&mut self, _event_loop: &ActiveEventLoop) {
        // Tear down GPU objects while the window still exists
        self.renderer = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn no_sample_before_interval_elapses() {
        let start = Instant::now();
        let mut counter = FpsCounter::new(start);
        for i in 1..10 {
            assert_eq!(counter.tick(start + Duration::from_millis(i * 50)), None);
        }
    }

    #[test]
    fn reports_average_over_interval() {
        let start = Instant::now();
        let mut counter = FpsCounter::new(start);

        let mut sample = None;
        for i in 1..=60u64 {
            sample = counter.tick(start + Duration::from_micros(i * 1_000_000 / 60));
        }

        let sample = sample.expect("one second elapsed");
        assert!((sample.fps - 60.0).abs() < 0.01, "{sample:?}");
        assert!((sample.frame_time_ms - 1000.0 / 60.0).abs() < 0.01, "{sample:?}");
    }

    #[test]
    fn counter_restarts_after_each_sample() {
        let start = Instant::now();
        let mut counter = FpsCounter::with_interval(start, Duration::from_millis(100));

        assert!(counter.tick(start + Duration::from_millis(100)).is_some());
        assert!(counter.tick(start + Duration::from_millis(150)).is_none());

        let sample = counter.tick(start + Duration::from_millis(200)).unwrap();
        assert!((sample.fps - 20.0).abs() < 0.01, "{sample:?}");
    }

    #[test]
    fn window_attributes_follow_config() {
        let mut config = Config::default();
        config.window.title = "Triangle".to_string();
        config.window.resizable = true;

        let attributes = App::new(config).window_attributes();
        assert_eq!(attributes.title, "Triangle");
        assert!(attributes.resizable);
    }
}
