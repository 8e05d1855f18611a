//! Atom3D: a minimal Vulkan renderer that draws one triangle.
//!
//! `backend` wraps the Vulkan setup stages, `renderer` owns the objects and
//! runs the frame loop, `app` drives it from a winit event loop.

pub mod app;
pub mod backend;
pub mod config;
pub mod renderer;

pub use config::Config;
pub use renderer::{FrameOutcome, Renderer};
