//! Presentation targets.
//!
//! [`SurfaceTargets`] owns the swapchain and everything sized to it: one
//! image view and framebuffer per target plus a shared depth buffer. It is
//! dropped and rebuilt on resize. The [`RenderPass`] only depends on the
//! surface format and outlives every rebuild.

use ash::extensions::khr::{Surface, Swapchain as SwapchainLoader};
use ash::{vk, Device};

use super::context::PhysicalDeviceInfo;
use super::{find_memory_type, vk_error};
use crate::render::device::{DeviceError, DeviceResult, Extent};

/// Depth attachment format
pub const DEPTH_FORMAT: vk::Format = vk::Format::D32_SFLOAT;

/// Prefer 8-bit sRGB BGRA, otherwise take the first format offered
pub fn choose_surface_format(formats: &[vk::SurfaceFormatKHR]) -> Option<vk::SurfaceFormatKHR> {
    formats
        .iter()
        .find(|f| f.format == vk::Format::B8G8R8A8_SRGB && f.color_space == vk::ColorSpaceKHR::SRGB_NONLINEAR)
        .or_else(|| formats.first())
        .copied()
}

/// FIFO with vsync, otherwise the lowest-latency mode available
pub fn choose_present_mode(modes: &[vk::PresentModeKHR], vsync: bool) -> vk::PresentModeKHR {
    if vsync {
        return vk::PresentModeKHR::FIFO;
    }
    [vk::PresentModeKHR::MAILBOX, vk::PresentModeKHR::IMMEDIATE]
        .into_iter()
        .find(|mode| modes.contains(mode))
        .unwrap_or(vk::PresentModeKHR::FIFO)
}

/// Clamp the requested target count to what the surface allows
pub fn choose_image_count(caps: &vk::SurfaceCapabilitiesKHR, desired: u32) -> u32 {
    let count = desired.max(caps.min_image_count);
    if caps.max_image_count > 0 {
        count.min(caps.max_image_count)
    } else {
        count
    }
}

/// Surface extent, falling back to the window size clamped to the limits
pub fn choose_extent(caps: &vk::SurfaceCapabilitiesKHR, window: Extent) -> vk::Extent2D {
    if caps.current_extent.width != u32::MAX {
        return caps.current_extent;
    }
    vk::Extent2D {
        width: window
            .width
            .clamp(caps.min_image_extent.width, caps.max_image_extent.width),
        height: window
            .height
            .clamp(caps.min_image_extent.height, caps.max_image_extent.height),
    }
}

/// Single-subpass forward pass: clear color and depth, end in present layout
pub struct RenderPass {
    device: Device,
    handle: vk::RenderPass,
}

impl RenderPass {
    /// Create the pass for `color_format`
    pub fn new(device: Device, color_format: vk::Format) -> DeviceResult<Self> {
        let attachments = [
            vk::AttachmentDescription::builder()
                .format(color_format)
                .samples(vk::SampleCountFlags::TYPE_1)
                .load_op(vk::AttachmentLoadOp::CLEAR)
                .store_op(vk::AttachmentStoreOp::STORE)
                .stencil_load_op(vk::AttachmentLoadOp::DONT_CARE)
                .stencil_store_op(vk::AttachmentStoreOp::DONT_CARE)
                .initial_layout(vk::ImageLayout::UNDEFINED)
                .final_layout(vk::ImageLayout::PRESENT_SRC_KHR)
                .build(),
            vk::AttachmentDescription::builder()
                .format(DEPTH_FORMAT)
                .samples(vk::SampleCountFlags::TYPE_1)
                .load_op(vk::AttachmentLoadOp::CLEAR)
                .store_op(vk::AttachmentStoreOp::DONT_CARE)
                .stencil_load_op(vk::AttachmentLoadOp::DONT_CARE)
                .stencil_store_op(vk::AttachmentStoreOp::DONT_CARE)
                .initial_layout(vk::ImageLayout::UNDEFINED)
                .final_layout(vk::ImageLayout::DEPTH_STENCIL_ATTACHMENT_OPTIMAL)
                .build(),
        ];

        let color_refs = [vk::AttachmentReference {
            attachment: 0,
            layout: vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL,
        }];
        let depth_ref = vk::AttachmentReference {
            attachment: 1,
            layout: vk::ImageLayout::DEPTH_STENCIL_ATTACHMENT_OPTIMAL,
        };
        let subpasses = [vk::SubpassDescription::builder()
            .pipeline_bind_point(vk::PipelineBindPoint::GRAPHICS)
            .color_attachments(&color_refs)
            .depth_stencil_attachment(&depth_ref)
            .build()];

        let stages = vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT | vk::PipelineStageFlags::EARLY_FRAGMENT_TESTS;
        let dependencies = [vk::SubpassDependency::builder()
            .src_subpass(vk::SUBPASS_EXTERNAL)
            .dst_subpass(0)
            .src_stage_mask(stages)
            .src_access_mask(vk::AccessFlags::empty())
            .dst_stage_mask(stages)
            .dst_access_mask(vk::AccessFlags::COLOR_ATTACHMENT_WRITE | vk::AccessFlags::DEPTH_STENCIL_ATTACHMENT_WRITE)
            .build()];

        let create_info = vk::RenderPassCreateInfo::builder()
            .attachments(&attachments)
            .subpasses(&subpasses)
            .dependencies(&dependencies);
        let handle =
            unsafe { device.create_render_pass(&create_info, None) }.map_err(|e| vk_error("create_render_pass", e))?;

        Ok(Self { device, handle })
    }

    /// Raw handle
    pub fn handle(&self) -> vk::RenderPass {
        self.handle
    }
}

impl Drop for RenderPass {
    fn drop(&mut self) {
        unsafe { self.device.destroy_render_pass(self.handle, None) };
    }
}

/// Surface parameters that stay fixed across rebuilds
#[derive(Debug, Clone, Copy)]
pub struct SurfaceSetup {
    /// Surface handle
    pub surface: vk::SurfaceKHR,
    /// Chosen color format
    pub format: vk::SurfaceFormatKHR,
    /// Chosen present mode
    pub present_mode: vk::PresentModeKHR,
    /// Requested number of targets
    pub desired_images: u32,
}

impl SurfaceSetup {
    /// Query the surface and pick format and present mode
    pub fn query(
        surface: vk::SurfaceKHR,
        surface_loader: &Surface,
        physical: &PhysicalDeviceInfo,
        desired_images: u32,
        vsync: bool,
    ) -> DeviceResult<Self> {
        let formats = unsafe { surface_loader.get_physical_device_surface_formats(physical.device, surface) }
            .map_err(|e| vk_error("get_physical_device_surface_formats", e))?;
        let format = choose_surface_format(&formats)
            .ok_or_else(|| DeviceError::InitializationFailed("surface has no formats".into()))?;
        let modes = unsafe { surface_loader.get_physical_device_surface_present_modes(physical.device, surface) }
            .map_err(|e| vk_error("get_physical_device_surface_present_modes", e))?;

        Ok(Self {
            surface,
            format,
            present_mode: choose_present_mode(&modes, vsync),
            desired_images,
        })
    }
}

/// Swapchain and everything sized to it
pub struct SurfaceTargets {
    device: Device,
    loader: SwapchainLoader,
    swapchain: vk::SwapchainKHR,
    images: Vec<vk::Image>,
    views: Vec<vk::ImageView>,
    framebuffers: Vec<vk::Framebuffer>,
    depth_image: vk::Image,
    depth_memory: vk::DeviceMemory,
    depth_view: vk::ImageView,
    extent: vk::Extent2D,
}

impl SurfaceTargets {
    /// Build targets for `window` size. Partially created objects are
    /// destroyed on failure.
    pub fn new(
        device: &Device,
        loader: &SwapchainLoader,
        surface_loader: &Surface,
        physical: &PhysicalDeviceInfo,
        setup: &SurfaceSetup,
        render_pass: &RenderPass,
        window: Extent,
    ) -> DeviceResult<Self> {
        let caps = unsafe { surface_loader.get_physical_device_surface_capabilities(physical.device, setup.surface) }
            .map_err(|e| vk_error("get_physical_device_surface_capabilities", e))?;
        let extent = choose_extent(&caps, window);

        let create_info = vk::SwapchainCreateInfoKHR::builder()
            .surface(setup.surface)
            .min_image_count(choose_image_count(&caps, setup.desired_images))
            .image_format(setup.format.format)
            .image_color_space(setup.format.color_space)
            .image_extent(extent)
            .image_array_layers(1)
            .image_usage(vk::ImageUsageFlags::COLOR_ATTACHMENT)
            .image_sharing_mode(vk::SharingMode::EXCLUSIVE)
            .pre_transform(caps.current_transform)
            .composite_alpha(vk::CompositeAlphaFlagsKHR::OPAQUE)
            .present_mode(setup.present_mode)
            .clipped(true);
        let swapchain =
            unsafe { loader.create_swapchain(&create_info, None) }.map_err(|e| vk_error("create_swapchain", e))?;

        let mut targets = Self {
            device: device.clone(),
            loader: loader.clone(),
            swapchain,
            images: Vec::new(),
            views: Vec::new(),
            framebuffers: Vec::new(),
            depth_image: vk::Image::null(),
            depth_memory: vk::DeviceMemory::null(),
            depth_view: vk::ImageView::null(),
            extent,
        };
        targets.create_views(setup.format.format)?;
        targets.create_depth(physical)?;
        targets.create_framebuffers(render_pass)?;

        log::info!(
            "Created {} presentation targets at {}x{}",
            targets.images.len(),
            extent.width,
            extent.height
        );
        Ok(targets)
    }

    fn create_views(&mut self, format: vk::Format) -> DeviceResult<()> {
        self.images = unsafe { self.loader.get_swapchain_images(self.swapchain) }
            .map_err(|e| vk_error("get_swapchain_images", e))?;
        for &image in &self.images {
            let view = create_view(&self.device, image, format, vk::ImageAspectFlags::COLOR)?;
            self.views.push(view);
        }
        Ok(())
    }

    fn create_depth(&mut self, physical: &PhysicalDeviceInfo) -> DeviceResult<()> {
        let image_info = vk::ImageCreateInfo::builder()
            .image_type(vk::ImageType::TYPE_2D)
            .format(DEPTH_FORMAT)
            .extent(vk::Extent3D {
                width: self.extent.width,
                height: self.extent.height,
                depth: 1,
            })
            .mip_levels(1)
            .array_layers(1)
            .samples(vk::SampleCountFlags::TYPE_1)
            .tiling(vk::ImageTiling::OPTIMAL)
            .usage(vk::ImageUsageFlags::DEPTH_STENCIL_ATTACHMENT)
            .sharing_mode(vk::SharingMode::EXCLUSIVE)
            .initial_layout(vk::ImageLayout::UNDEFINED);
        self.depth_image =
            unsafe { self.device.create_image(&image_info, None) }.map_err(|e| vk_error("create_image", e))?;

        let requirements = unsafe { self.device.get_image_memory_requirements(self.depth_image) };
        let alloc_info = vk::MemoryAllocateInfo::builder()
            .allocation_size(requirements.size)
            .memory_type_index(find_memory_type(
                &physical.memory,
                requirements.memory_type_bits,
                vk::MemoryPropertyFlags::DEVICE_LOCAL,
            )?);
        self.depth_memory =
            unsafe { self.device.allocate_memory(&alloc_info, None) }.map_err(|e| vk_error("allocate_memory", e))?;
        unsafe { self.device.bind_image_memory(self.depth_image, self.depth_memory, 0) }
            .map_err(|e| vk_error("bind_image_memory", e))?;

        self.depth_view = create_view(&self.device, self.depth_image, DEPTH_FORMAT, vk::ImageAspectFlags::DEPTH)?;
        Ok(())
    }

    fn create_framebuffers(&mut self, render_pass: &RenderPass) -> DeviceResult<()> {
        for &view in &self.views {
            let attachments = [view, self.depth_view];
            let create_info = vk::FramebufferCreateInfo::builder()
                .render_pass(render_pass.handle())
                .attachments(&attachments)
                .width(self.extent.width)
                .height(self.extent.height)
                .layers(1);
            let framebuffer = unsafe { self.device.create_framebuffer(&create_info, None) }
                .map_err(|e| vk_error("create_framebuffer", e))?;
            self.framebuffers.push(framebuffer);
        }
        Ok(())
    }

    /// Swapchain handle
    pub fn swapchain(&self) -> vk::SwapchainKHR {
        self.swapchain
    }

    /// Number of targets
    pub fn count(&self) -> usize {
        self.images.len()
    }

    /// Pixel size
    pub fn extent(&self) -> vk::Extent2D {
        self.extent
    }

    /// Framebuffer of `target`
    pub fn framebuffer(&self, target: u32) -> Option<vk::Framebuffer> {
        self.framebuffers.get(target as usize).copied()
    }
}

impl Drop for SurfaceTargets {
    fn drop(&mut self) {
        unsafe {
            for &framebuffer in &self.framebuffers {
                self.device.destroy_framebuffer(framebuffer, None);
            }
            if self.depth_view != vk::ImageView::null() {
                self.device.destroy_image_view(self.depth_view, None);
            }
            if self.depth_image != vk::Image::null() {
                self.device.destroy_image(self.depth_image, None);
            }
            if self.depth_memory != vk::DeviceMemory::null() {
                self.device.free_memory(self.depth_memory, None);
            }
            for &view in &self.views {
                self.device.destroy_image_view(view, None);
            }
            self.loader.destroy_swapchain(self.swapchain, None);
        }
    }
}

/// Single-level 2D view of `image`
pub(crate) fn create_view(
    device: &Device,
    image: vk::Image,
    format: vk::Format,
    aspect: vk::ImageAspectFlags,
) -> DeviceResult<vk::ImageView> {
    let create_info = vk::ImageViewCreateInfo::builder()
        .image(image)
        .view_type(vk::ImageViewType::TYPE_2D)
        .format(format)
        .subresource_range(vk::ImageSubresourceRange {
            aspect_mask: aspect,
            base_mip_level: 0,
            level_count: 1,
            base_array_layer: 0,
            layer_count: 1,
        });
    unsafe { device.create_image_view(&create_info, None) }.map_err(|e| vk_error("create_image_view", e))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn caps(min: u32, max: u32) -> vk::SurfaceCapabilitiesKHR {
        vk::SurfaceCapabilitiesKHR {
            min_image_count: min,
            max_image_count: max,
            current_extent: vk::Extent2D {
                width: u32::MAX,
                height: u32::MAX,
            },
            min_image_extent: vk::Extent2D { width: 1, height: 1 },
            max_image_extent: vk::Extent2D {
                width: 4096,
                height: 4096,
            },
            ..Default::default()
        }
    }

    #[test]
    fn image_count_is_clamped() {
        assert_eq!(choose_image_count(&caps(2, 8), 2), 2);
        assert_eq!(choose_image_count(&caps(3, 8), 2), 3);
        assert_eq!(choose_image_count(&caps(1, 2), 3), 2);
        assert_eq!(choose_image_count(&caps(2, 0), 5), 5);
    }

    #[test]
    fn extent_follows_window_when_surface_is_flexible() {
        let extent = choose_extent(&caps(2, 3), Extent::new(9000, 450));
        assert_eq!((extent.width, extent.height), (4096, 450));

        let mut fixed = caps(2, 3);
        fixed.current_extent = vk::Extent2D { width: 640, height: 480 };
        assert_eq!(choose_extent(&fixed, Extent::new(750, 450)).width, 640);
    }

    #[test]
    fn format_and_present_mode_preferences() {
        let unorm = vk::SurfaceFormatKHR {
            format: vk::Format::B8G8R8A8_UNORM,
            color_space: vk::ColorSpaceKHR::SRGB_NONLINEAR,
        };
        let srgb = vk::SurfaceFormatKHR {
            format: vk::Format::B8G8R8A8_SRGB,
            color_space: vk::ColorSpaceKHR::SRGB_NONLINEAR,
        };
        assert_eq!(choose_surface_format(&[unorm, srgb]).map(|f| f.format), Some(srgb.format));
        assert_eq!(choose_surface_format(&[unorm]).map(|f| f.format), Some(unorm.format));
        assert!(choose_surface_format(&[]).is_none());

        let modes = [vk::PresentModeKHR::FIFO, vk::PresentModeKHR::IMMEDIATE];
        assert_eq!(choose_present_mode(&modes, true), vk::PresentModeKHR::FIFO);
        assert_eq!(choose_present_mode(&modes, false), vk::PresentModeKHR::IMMEDIATE);
    }
}
