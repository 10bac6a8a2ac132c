use raw_window_handle::{HasDisplayHandle, HasWindowHandle};
use vulkanite::{
    Handle,
    vk::{rs::*, *},
};

use crate::{
    device::VulkanDevice,
    error::{GpuError, Result},
    frame::FRAMES_IN_FLIGHT,
};

/// Surface formats we render into, highest priority first.
pub const PREFERRED_SURFACE_FORMATS: [Format; 3] = [
    Format::B8G8R8A8Srgb,
    Format::A8B8G8R8SrgbPack32,
    Format::R8G8B8A8Srgb,
];

pub fn create_surface<W>(instance: &Instance, window: &W) -> Result<SurfaceKHR>
where
    W: HasDisplayHandle + HasWindowHandle + ?Sized,
{
    let display_handle = window.display_handle()?.as_raw();
    let window_handle = window.window_handle()?.as_raw();

    let surface =
        unsafe { vulkanite::window::rs::create_surface(instance, display_handle, window_handle) }?;

    Ok(surface)
}

/// Picks the first preferred format the surface offers, falling back to the first format
/// reported by the surface.
pub fn choose_surface_format(available: &[SurfaceFormatKHR]) -> Result<SurfaceFormatKHR> {
    let preferred = PREFERRED_SURFACE_FORMATS.iter().find_map(|preferred_format| {
        available
            .iter()
            .find(|surface_format| surface_format.format == *preferred_format)
    });

    match preferred {
        Some(surface_format) => Ok(*surface_format),
        None => {
            let fallback = *available.first().ok_or(GpuError::NoSurfaceFormat)?;
            log::warn!(
                "No preferred sRGB surface format available, falling back to {:?}",
                fallback.format
            );

            Ok(fallback)
        }
    }
}

/// Uses the surface's current extent when it is defined, otherwise clamps the requested
/// window size into the supported range.
pub fn choose_extent(capabilities: &SurfaceCapabilitiesKHR, requested: Extent2D) -> Result<Extent2D> {
    let extent = if capabilities.current_extent.width != u32::MAX {
        capabilities.current_extent
    } else {
        let min = capabilities.min_image_extent;
        let max = capabilities.max_image_extent;

        Extent2D {
            width: requested.width.clamp(min.width, max.width.max(min.width)),
            height: requested.height.clamp(min.height, max.height.max(min.height)),
        }
    };

    if extent.width == 0 || extent.height == 0 {
        return Err(GpuError::ZeroExtent);
    }

    Ok(extent)
}

/// Whether a chain built for `requested` must be rebuilt for `extent`.
///
/// Compares window sizes, not the chain's clamped extent, so a surface that cannot match
/// the window is not rebuilt on every call.
pub fn needs_rebuild(requested: Extent2D, extent: Extent2D, stale: bool) -> bool {
    stale || requested.width != extent.width || requested.height != extent.height
}

/// Lengths of the per-image and per-frame object lists of a swap chain.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ImageSyncCounts {
    pub images: usize,
    pub image_views: usize,
    pub present_ready_signals: usize,
    pub acquire_signals: usize,
}

impl ImageSyncCounts {
    pub fn is_consistent(&self) -> bool {
        self.images > 0
            && self.images == self.image_views
            && self.images == self.present_ready_signals
            && self.acquire_signals == FRAMES_IN_FLIGHT
    }
}

/// Presentable images, their views and the signals that order acquisition and presentation.
///
/// Always replaced as a whole: a rebuilt chain is fully constructed before the old one is
/// torn down.
pub struct SwapChain {
    pub swapchain: SwapchainKHR,
    pub surface_format: SurfaceFormatKHR,
    pub extent: Extent2D,
    pub images: Vec<Image>,
    pub image_views: Vec<ImageView>,
    /// One per frame slot.
    pub acquire_signals: Vec<Semaphore>,
    /// One per swap-chain image.
    pub present_ready_signals: Vec<Semaphore>,
}

impl SwapChain {
    pub fn new(
        vulkan_device: &VulkanDevice,
        surface: SurfaceKHR,
        requested_extent: Extent2D,
    ) -> Result<Self> {
        Self::create(vulkan_device, surface, requested_extent, None)
    }

    /// Replaces this chain with a new one for the same surface.
    pub fn rebuild(
        &mut self,
        vulkan_device: &VulkanDevice,
        surface: SurfaceKHR,
        requested_extent: Extent2D,
    ) -> Result<()> {
        let fresh = Self::create(
            vulkan_device,
            surface,
            requested_extent,
            Some(self.swapchain),
        )?;

        if let Err(error) = vulkan_device.wait_idle() {
            unsafe { fresh.destroy(&vulkan_device.device) };
            return Err(error);
        }

        let old = std::mem::replace(self, fresh);
        unsafe { old.destroy(&vulkan_device.device) };

        log::info!(
            "Swap chain rebuilt: {}x{}, {} images",
            self.extent.width,
            self.extent.height,
            self.images.len()
        );

        Ok(())
    }

    fn create(
        vulkan_device: &VulkanDevice,
        surface: SurfaceKHR,
        requested_extent: Extent2D,
        old_swapchain: Option<SwapchainKHR>,
    ) -> Result<Self> {
        let physical_device = vulkan_device.physical_device;
        let device = &vulkan_device.device;

        let capabilities = physical_device.get_surface_capabilities_khr(surface)?;
        let surface_formats: Vec<SurfaceFormatKHR> =
            physical_device.get_surface_formats_khr(Some(surface))?;

        let surface_format = choose_surface_format(&surface_formats)?;
        let extent = choose_extent(&capabilities, requested_extent)?;

        let mut swapchain_create_info = SwapchainCreateInfoKHR::default()
            .surface(&surface)
            .min_image_count(capabilities.min_image_count)
            .image_format(surface_format.format)
            .image_color_space(surface_format.color_space)
            .image_extent(extent)
            .image_array_layers(1)
            .image_usage(ImageUsageFlags::ColorAttachment)
            .image_sharing_mode(SharingMode::Exclusive)
            .pre_transform(capabilities.current_transform)
            .composite_alpha(CompositeAlphaFlagsKHR::Opaque)
            .present_mode(PresentModeKHR::Fifo)
            .clipped(true);
        swapchain_create_info.old_swapchain =
            old_swapchain.as_ref().map(|swapchain| swapchain.borrow());

        let swapchain = device.create_swapchain_khr(&swapchain_create_info)?;

        let mut swap_chain = Self {
            swapchain,
            surface_format,
            extent,
            images: Vec::new(),
            image_views: Vec::new(),
            acquire_signals: Vec::new(),
            present_ready_signals: Vec::new(),
        };

        if let Err(error) = swap_chain.populate(device) {
            unsafe { swap_chain.destroy(device) };
            return Err(error);
        }

        Ok(swap_chain)
    }

    fn populate(&mut self, device: &Device) -> Result<()> {
        self.images = device.get_swapchain_images_khr(self.swapchain)?;

        for image in &self.images {
            let image_view_create_info = ImageViewCreateInfo::default()
                .image(image)
                .view_type(ImageViewType::Type2D)
                .format(self.surface_format.format)
                .components(ComponentMapping::default())
                .subresource_range(ImageSubresourceRange {
                    aspect_mask: ImageAspectFlags::Color,
                    base_mip_level: 0,
                    level_count: 1,
                    base_array_layer: 0,
                    layer_count: 1,
                });

            self.image_views
                .push(device.create_image_view(&image_view_create_info)?);
        }

        let semaphore_create_info = SemaphoreCreateInfo::default();
        for _ in 0..FRAMES_IN_FLIGHT {
            self.acquire_signals
                .push(device.create_semaphore(&semaphore_create_info)?);
        }
        for _ in 0..self.images.len() {
            self.present_ready_signals
                .push(device.create_semaphore(&semaphore_create_info)?);
        }

        debug_assert!(self.counts().is_consistent());

        Ok(())
    }

    pub fn counts(&self) -> ImageSyncCounts {
        ImageSyncCounts {
            images: self.images.len(),
            image_views: self.image_views.len(),
            present_ready_signals: self.present_ready_signals.len(),
            acquire_signals: self.acquire_signals.len(),
        }
    }

    #[inline(always)]
    pub fn image_count(&self) -> usize {
        self.images.len()
    }

    /// Destroys views, signals and the swap chain itself. The GPU must be idle with respect
    /// to all of them.
    pub unsafe fn destroy(self, device: &Device) {
        unsafe {
            self.image_views.iter().for_each(|image_view| {
                device.destroy_image_view(Some(*image_view));
            });

            self.acquire_signals
                .iter()
                .chain(self.present_ready_signals.iter())
                .for_each(|semaphore| {
                    device.destroy_semaphore(Some(*semaphore));
                });

            device.destroy_swapchain_khr(Some(self.swapchain));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn surface_format(format: Format) -> SurfaceFormatKHR {
        SurfaceFormatKHR {
            format,
            color_space: ColorSpaceKHR::SrgbNonlinear,
        }
    }

    fn capabilities(current: Extent2D, min: Extent2D, max: Extent2D) -> SurfaceCapabilitiesKHR {
        SurfaceCapabilitiesKHR {
            min_image_count: 2,
            current_extent: current,
            min_image_extent: min,
            max_image_extent: max,
            ..Default::default()
        }
    }

    #[test]
    fn preferred_formats_follow_priority_order() {
        let available = [
            surface_format(Format::R8G8B8A8Srgb),
            surface_format(Format::B8G8R8A8Unorm),
            surface_format(Format::B8G8R8A8Srgb),
        ];

        let chosen = choose_surface_format(&available).unwrap();
        assert_eq!(chosen.format, Format::B8G8R8A8Srgb);

        let chosen = choose_surface_format(&available[..2]).unwrap();
        assert_eq!(chosen.format, Format::R8G8B8A8Srgb);
    }

    #[test]
    fn missing_preferred_format_falls_back_to_first_reported() {
        let available = [
            surface_format(Format::B8G8R8A8Unorm),
            surface_format(Format::R16G16B16A16Sfloat),
        ];

        let chosen = choose_surface_format(&available).unwrap();
        assert_eq!(chosen.format, Format::B8G8R8A8Unorm);
    }

    #[test]
    fn empty_format_list_is_an_error() {
        assert!(matches!(
            choose_surface_format(&[]),
            Err(GpuError::NoSurfaceFormat)
        ));
    }

    #[test]
    fn defined_current_extent_wins() {
        let caps = capabilities(
            Extent2D { width: 800, height: 600 },
            Extent2D { width: 1, height: 1 },
            Extent2D { width: 4096, height: 4096 },
        );

        let extent = choose_extent(&caps, Extent2D { width: 1920, height: 1080 }).unwrap();
        assert_eq!((extent.width, extent.height), (800, 600));
    }

    #[test]
    fn undefined_current_extent_clamps_request() {
        let caps = capabilities(
            Extent2D {
                width: u32::MAX,
                height: u32::MAX,
            },
            Extent2D { width: 64, height: 64 },
            Extent2D { width: 1024, height: 768 },
        );

        let extent = choose_extent(&caps, Extent2D { width: 1920, height: 10 }).unwrap();
        assert_eq!((extent.width, extent.height), (1024, 64));
    }

    #[test]
    fn zero_extent_is_rejected() {
        let caps = capabilities(
            Extent2D { width: 0, height: 0 },
            Extent2D { width: 0, height: 0 },
            Extent2D { width: 4096, height: 4096 },
        );

        assert!(matches!(
            choose_extent(&caps, Extent2D { width: 800, height: 600 }),
            Err(GpuError::ZeroExtent)
        ));
    }

    #[test]
    fn rebuild_follows_requested_size_not_clamped_extent() {
        let requested = Extent2D { width: 1920, height: 10 };
        let caps = capabilities(
            Extent2D {
                width: u32::MAX,
                height: u32::MAX,
            },
            Extent2D { width: 64, height: 64 },
            Extent2D { width: 1024, height: 768 },
        );
        let built = choose_extent(&caps, requested).unwrap();
        assert_ne!((built.width, built.height), (requested.width, requested.height));

        assert!(!needs_rebuild(requested, requested, false));
        assert!(needs_rebuild(requested, Extent2D { width: 800, height: 600 }, false));
        assert!(needs_rebuild(requested, requested, true));
    }

    #[test]
    fn sync_counts_require_matching_lengths() {
        let consistent = ImageSyncCounts {
            images: 3,
            image_views: 3,
            present_ready_signals: 3,
            acquire_signals: FRAMES_IN_FLIGHT,
        };
        assert!(consistent.is_consistent());

        let fewer_images_than_frames = ImageSyncCounts {
            images: 1,
            image_views: 1,
            present_ready_signals: 1,
            ..consistent
        };
        assert!(fewer_images_than_frames.is_consistent());

        assert!(
            !ImageSyncCounts {
                image_views: 2,
                ..consistent
            }
            .is_consistent()
        );
        assert!(
            !ImageSyncCounts {
                present_ready_signals: 4,
                ..consistent
            }
            .is_consistent()
        );
        assert!(
            !ImageSyncCounts {
                acquire_signals: 3,
                ..consistent
            }
            .is_consistent()
        );
    }
}
