// Backend module - Vulkan layer
//
// Thin wrappers around ash, one file per stage of the setup sequence.

pub mod commands;
pub mod device;
pub mod pipeline;
pub mod shader;
pub mod surface;
pub mod swapchain;
pub mod sync;

pub use device::VulkanDevice;
pub use swapchain::Swapchain;
