use std::{
    cell::{Cell, RefCell},
    ffi::{CStr, CString, c_char},
};

use raw_window_handle::RawDisplayHandle;
use vulkanite::{
    DefaultAllocator, DynamicDispatcher,
    vk::{rs::*, *},
};

use crate::{
    config::ContextConfig,
    error::{GpuError, Result},
};

const VALIDATION_LAYER: &CStr = c"VK_LAYER_KHRONOS_validation";
pub(crate) const SURFACE_EXTENSION: &CStr = c"VK_KHR_surface";

/// Lazily created value shared by several owners with an explicit live count.
///
/// The value is created by the first `acquire` and destroyed by the `release` that brings
/// the count back to zero.
pub struct SharedInstance<T: Clone> {
    slot: RefCell<Option<T>>,
    live: Cell<usize>,
}

impl<T: Clone> Default for SharedInstance<T> {
    fn default() -> Self {
        Self {
            slot: RefCell::new(None),
            live: Cell::new(0),
        }
    }
}

impl<T: Clone> SharedInstance<T> {
    pub fn acquire(&self, create: impl FnOnce() -> Result<T>) -> Result<T> {
        let mut slot = self.slot.borrow_mut();
        let value = match slot.as_ref() {
            Some(value) => value.clone(),
            None => {
                let value = create()?;
                *slot = Some(value.clone());
                value
            }
        };

        self.live.set(self.live.get() + 1);

        Ok(value)
    }

    /// Returns `true` when this call destroyed the shared value.
    pub fn release(&self, destroy: impl FnOnce(T)) -> bool {
        let live = self.live.get();
        if live == 0 {
            return false;
        }

        self.live.set(live - 1);
        if live > 1 {
            return false;
        }

        match self.slot.borrow_mut().take() {
            Some(value) => {
                destroy(value);
                true
            }
            None => false,
        }
    }

    #[inline(always)]
    pub fn live(&self) -> usize {
        self.live.get()
    }

    #[inline(always)]
    pub fn is_created(&self) -> bool {
        self.slot.borrow().is_some()
    }
}

/// Owns the process-wide Vulkan instance on behalf of every [`GpuContext`](crate::GpuContext).
///
/// Create one at application start-up and hand it to each context by reference; the
/// instance exists while at least one context is alive.
pub struct InstanceFactory {
    config: ContextConfig,
    shared: SharedInstance<Instance>,
}

impl InstanceFactory {
    pub fn new(config: ContextConfig) -> Self {
        Self {
            config,
            shared: SharedInstance::default(),
        }
    }

    #[inline(always)]
    pub fn config(&self) -> &ContextConfig {
        &self.config
    }

    /// Number of contexts currently holding the instance.
    #[inline(always)]
    pub fn live_contexts(&self) -> usize {
        self.shared.live()
    }

    pub(crate) fn acquire(&self, display_handle: RawDisplayHandle) -> Result<Instance> {
        self.shared.acquire(|| {
            let extensions = surface_extensions(display_handle)?;
            create_instance(&self.config, &extensions)
        })
    }

    pub(crate) fn release(&self) {
        let destroyed = self.shared.release(|instance| unsafe {
            instance.destroy();
        });

        if destroyed {
            log::info!("Vulkan instance destroyed");
        }
    }
}

pub(crate) fn create_instance(config: &ContextConfig, extensions: &[&CStr]) -> Result<Instance> {
    let dispatcher = unsafe { DynamicDispatcher::new_loaded() }
        .map_err(|error| GpuError::Loader(format!("{error:?}")))?;
    let entry = Entry::new(dispatcher, DefaultAllocator);

    let application_name = CString::new(config.application_name.as_str()).unwrap_or_default();
    let application_info = ApplicationInfo::default()
        .application_name(Some(application_name.as_c_str()))
        .engine_name(Some(c"gpu_context"))
        .api_version(API_VERSION_1_3);

    let extension_names: Vec<*const c_char> = extensions
        .iter()
        .map(|extension| extension.as_ptr())
        .collect();

    let layer_names: Vec<*const c_char> = if config.validation {
        vec![VALIDATION_LAYER.as_ptr()]
    } else {
        Vec::new()
    };

    let instance_create_info = InstanceCreateInfo {
        p_application_info: &application_info,
        enabled_layer_count: layer_names.len() as _,
        pp_enabled_layer_names: layer_names.as_ptr(),
        enabled_extension_count: extension_names.len() as _,
        pp_enabled_extension_names: extension_names.as_ptr(),
        ..Default::default()
    };

    let instance = entry.create_instance(&instance_create_info)?;

    log::info!(
        "Vulkan instance created (validation: {}, extensions: {})",
        config.validation,
        extension_names.len()
    );

    Ok(instance)
}

/// Instance extensions needed to present to a window on the given display.
pub fn surface_extensions(display_handle: RawDisplayHandle) -> Result<Vec<&'static CStr>> {
    let platform_extension: &'static CStr = match display_handle {
        RawDisplayHandle::Windows(_) => c"VK_KHR_win32_surface",
        RawDisplayHandle::Xlib(_) => c"VK_KHR_xlib_surface",
        RawDisplayHandle::Xcb(_) => c"VK_KHR_xcb_surface",
        RawDisplayHandle::Wayland(_) => c"VK_KHR_wayland_surface",
        RawDisplayHandle::Android(_) => c"VK_KHR_android_surface",
        RawDisplayHandle::AppKit(_) | RawDisplayHandle::UiKit(_) => c"VK_EXT_metal_surface",
        _ => return Err(GpuError::UnsupportedPlatform),
    };

    Ok(vec![SURFACE_EXTENSION, platform_extension])
}
