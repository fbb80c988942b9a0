//! Vulkan instance creation and configuration.

use std::ffi::{CStr, CString};

use ash::vk;

use crate::error::GraphicsError;

use super::debug;

/// Render passes and secondary command buffers are core 1.0; 1.2 keeps
/// MoltenVK in reach.
const REQUIRED_API_VERSION: u32 = vk::make_api_version(0, 1, 2, 0);

const VALIDATION_LAYER_NAME: &CStr = c"VK_LAYER_KHRONOS_validation";

const ENGINE_NAME: &CStr = c"redgraph";

/// Instance and the validation messenger, if one was installed.
pub struct InstanceBundle {
    pub instance: ash::Instance,
    pub debug: Option<(ash::ext::debug_utils::Instance, vk::DebugUtilsMessengerEXT)>,
}

impl InstanceBundle {
    /// Destroy the messenger and the instance.
    ///
    /// # Safety
    ///
    /// Every object created from the instance must already be destroyed.
    pub unsafe fn destroy(&self) {
        unsafe {
            if let Some((debug_utils, messenger)) = &self.debug {
                debug_utils.destroy_debug_utils_messenger(*messenger, None);
            }
            self.instance.destroy_instance(None);
        }
    }
}

/// Create a Vulkan instance with optional validation layers.
pub fn create_instance(
    entry: &ash::Entry,
    application_name: &str,
    validation_enabled: bool,
) -> Result<InstanceBundle, GraphicsError> {
    let validation_available = validation_enabled && check_validation_layer_support(entry);

    if validation_enabled && !validation_available {
        log::warn!("Validation layers requested but not available");
    }

    let app_name = CString::new(application_name).map_err(|e| {
        GraphicsError::InvalidParameter(format!("Invalid application name: {}", e))
    })?;

    let app_info = vk::ApplicationInfo::default()
        .application_name(&app_name)
        .application_version(vk::make_api_version(0, 0, 1, 0))
        .engine_name(ENGINE_NAME)
        .engine_version(vk::make_api_version(0, 0, 1, 0))
        .api_version(REQUIRED_API_VERSION);

    let mut extensions = vec![ash::khr::surface::NAME.as_ptr()];

    if validation_available {
        extensions.push(ash::ext::debug_utils::NAME.as_ptr());
    }

    #[cfg(target_os = "windows")]
    {
        extensions.push(ash::khr::win32_surface::NAME.as_ptr());
    }

    #[cfg(target_os = "linux")]
    {
        extensions.push(ash::khr::xlib_surface::NAME.as_ptr());
        extensions.push(ash::khr::xcb_surface::NAME.as_ptr());
        extensions.push(ash::khr::wayland_surface::NAME.as_ptr());
    }

    #[cfg(target_os = "macos")]
    {
        extensions.push(ash::khr::portability_enumeration::NAME.as_ptr());
        extensions.push(ash::ext::metal_surface::NAME.as_ptr());
    }

    let layer_names: Vec<*const std::ffi::c_char> = if validation_available {
        vec![VALIDATION_LAYER_NAME.as_ptr()]
    } else {
        vec![]
    };

    #[allow(unused_mut)]
    let mut create_flags = vk::InstanceCreateFlags::empty();

    #[cfg(target_os = "macos")]
    {
        create_flags |= vk::InstanceCreateFlags::ENUMERATE_PORTABILITY_KHR;
    }

    let create_info = vk::InstanceCreateInfo::default()
        .flags(create_flags)
        .application_info(&app_info)
        .enabled_extension_names(&extensions)
        .enabled_layer_names(&layer_names);

    let instance = unsafe { entry.create_instance(&create_info, None) }.map_err(|e| {
        GraphicsError::InitializationFailed(format!("Failed to create Vulkan instance: {:?}", e))
    })?;

    let debug = if validation_available {
        let debug_utils = ash::ext::debug_utils::Instance::new(entry, &instance);
        match debug::create_debug_messenger(&debug_utils) {
            Ok(messenger) => Some((debug_utils, messenger)),
            Err(e) => {
                unsafe { instance.destroy_instance(None) };
                return Err(e);
            }
        }
    } else {
        None
    };

    Ok(InstanceBundle { instance, debug })
}

fn check_validation_layer_support(entry: &ash::Entry) -> bool {
    let Ok(available_layers) = (unsafe { entry.enumerate_instance_layer_properties() }) else {
        return false;
    };

    available_layers.iter().any(|layer| {
        layer
            .layer_name_as_c_str()
            .is_ok_and(|name| name == VALIDATION_LAYER_NAME)
    })
}
