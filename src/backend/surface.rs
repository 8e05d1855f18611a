// Window surface - connection between Vulkan and the OS window
//
// ash-window picks the platform path from the raw handles: Win32, Xlib, Xcb,
// Wayland, or a Metal layer on macOS (through MoltenVK).

use anyhow::{Context, Result};
use ash::vk;
use raw_window_handle::{HasDisplayHandle, HasWindowHandle};
use std::ffi::c_char;
use winit::window::Window;

use super::swapchain::SwapchainSupport;

/// Instance extensions the window system needs to create a surface
pub fn required_instance_extensions(window: &Window) -> Result<Vec<*const c_char>> {
    let display_handle = window
        .display_handle()
        .context("Failed to get display handle")?
        .as_raw();

    let extensions = ash_window::enumerate_required_extensions(display_handle)
        .context("Window system has no Vulkan surface support")?;

    Ok(extensions.to_vec())
}

pub struct Surface {
    pub loader: ash::khr::surface::Instance,
    pub handle: vk::SurfaceKHR,
}

impl Surface {
    pub fn new(entry: &ash::Entry, instance: &ash::Instance, window: &Window) -> Result<Self> {
        let display_handle = window
            .display_handle()
            .context("Failed to get display handle")?
            .as_raw();
        let window_handle = window
            .window_handle()
            .context("Failed to get window handle")?
            .as_raw();

        let handle = unsafe {
            ash_window::create_surface(entry, instance, display_handle, window_handle, None)
                .context("Failed to create window surface")?
        };
        let loader = ash::khr::surface::Instance::new(entry, instance);

        Ok(Self { loader, handle })
    }

    /// Can queue family `family` of `physical_device` present to this surface?
    pub fn supports_present(&self, physical_device: vk::PhysicalDevice, family: u32) -> Result<bool> {
        unsafe {
            self.loader
                .get_physical_device_surface_support(physical_device, family, self.handle)
                .context("Failed to query surface present support")
        }
    }

    /// Capabilities, formats and present modes for building a swapchain
    pub fn support(&self, physical_device: vk::PhysicalDevice) -> Result<SwapchainSupport> {
        unsafe {
            Ok(SwapchainSupport {
                capabilities: self
                    .loader
                    .get_physical_device_surface_capabilities(physical_device, self.handle)
                    .context("Failed to query surface capabilities")?,
                formats: self
                    .loader
                    .get_physical_device_surface_formats(physical_device, self.handle)
                    .context("Failed to query surface formats")?,
                present_modes: self
                    .loader
                    .get_physical_device_surface_present_modes(physical_device, self.handle)
                    .context("Failed to query surface present modes")?,
            })
        }
    }
}

/// Swapchains hold an `Arc<VulkanDevice>`, and the device owns the surface, so
/// none can outlive it. The instance must still be alive here.
impl Drop for Surface {
    fn drop(&mut self) {
        unsafe { self.loader.destroy_surface(self.handle, None) };
    }
}
