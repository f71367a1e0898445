// Vulkan instance and presentation surfaces
//
// Responsibilities:
// - Loading the Vulkan library
// - Instance creation with validation layers (debug only)
// - Debug messenger routed into `log`
// - Surface creation from a `SurfaceCreateInfo`

use anyhow::{Context, Result};
use ash::extensions::{ext, khr};
use ash::{vk, Entry};
use std::ffi::{CStr, CString};
use std::sync::Arc;

use crate::error::{BackendError, Error};
use crate::library::Swarm;
use crate::surface::SurfaceCreateInfo;
use crate::types::InstanceCreateInfo;

const VALIDATION_LAYER: &CStr = c"VK_LAYER_KHRONOS_validation";

/// Loader state shared by the instance, its surfaces and the devices built
/// on them. Dropped once the last of those goes away.
pub(crate) struct InstanceShared {
    pub(crate) raw: ash::Instance,
    pub(crate) surface_loader: khr::Surface,
    /// Platform surface extensions that were available and enabled.
    surface_extensions: Vec<&'static CStr>,
    debug_utils: Option<(ext::DebugUtils, vk::DebugUtilsMessengerEXT)>,
    // Keeps the loader library alive; must drop after `raw`.
    entry: Entry,
}

impl Drop for InstanceShared {
    fn drop(&mut self) {
        log::info!("Destroying Vulkan instance...");
        unsafe {
            if let Some((debug_utils, messenger)) = self.debug_utils.take() {
                debug_utils.destroy_debug_utils_messenger(messenger, None);
            }
            self.raw.destroy_instance(None);
        }
    }
}

/// A Vulkan instance. Create surfaces from it, then a [`crate::Device`].
pub struct Instance {
    pub(crate) shared: Arc<InstanceShared>,
}

impl Instance {
    /// # Panics
    /// If `swarm` is not initialized.
    pub fn new(swarm: &Swarm, info: &InstanceCreateInfo) -> Result<Self> {
        swarm.assert_initialized();
        log::info!("Creating Vulkan instance: {}", info.application_name);

        let entry = unsafe { Entry::load() }
            .context("Failed to load Vulkan library. Is Vulkan installed?")?;

        let available: Vec<CString> = entry
            .enumerate_instance_extension_properties(None)
            .context("Failed to enumerate instance extensions")?
            .iter()
            .map(|props| unsafe { CStr::from_ptr(props.extension_name.as_ptr()) }.to_owned())
            .collect();
        let has_extension = |name: &CStr| available.iter().any(|ext| ext.as_c_str() == name);

        if !has_extension(khr::Surface::name()) {
            anyhow::bail!("VK_KHR_surface is not available");
        }
        let surface_extensions: Vec<&'static CStr> = [
            khr::Win32Surface::name(),
            khr::XlibSurface::name(),
            khr::XcbSurface::name(),
            khr::WaylandSurface::name(),
        ]
        .into_iter()
        .filter(|name| has_extension(name))
        .collect();

        let mut extensions = vec![khr::Surface::name().as_ptr()];
        extensions.extend(surface_extensions.iter().map(|name| name.as_ptr()));

        let enable_debug = info.debug && has_extension(ext::DebugUtils::name());
        if info.debug && !enable_debug {
            log::warn!("VK_EXT_debug_utils not available, validation output disabled");
        }
        if enable_debug {
            extensions.push(ext::DebugUtils::name().as_ptr());
        }

        let layers = if enable_debug && Self::has_validation_layer(&entry) {
            vec![VALIDATION_LAYER.as_ptr()]
        } else {
            if info.debug {
                log::warn!("Validation layer requested but not installed");
            }
            vec![]
        };

        let app_name = CString::new(info.application_name.as_str())?;
        let engine_name = CString::new("swarm")?;
        let app_info = vk::ApplicationInfo::builder()
            .application_name(&app_name)
            .application_version(info.application_version)
            .engine_name(&engine_name)
            .engine_version(vk::make_api_version(0, 0, 1, 0))
            .api_version(vk::API_VERSION_1_2);

        let create_info = vk::InstanceCreateInfo::builder()
            .application_info(&app_info)
            .enabled_extension_names(&extensions)
            .enabled_layer_names(&layers);

        let raw = unsafe { entry.create_instance(&create_info, None) }
            .context("Failed to create Vulkan instance")?;

        let debug_utils = if enable_debug {
            match Self::setup_debug_messenger(&entry, &raw) {
                Ok(debug_utils) => Some(debug_utils),
                Err(e) => {
                    unsafe { raw.destroy_instance(None) };
                    return Err(e);
                }
            }
        } else {
            None
        };

        let surface_loader = khr::Surface::new(&entry, &raw);
        log::info!(
            "Vulkan instance ready (surface extensions: {:?}, validation: {})",
            surface_extensions,
            !layers.is_empty()
        );

        Ok(Self {
            shared: Arc::new(InstanceShared {
                raw,
                surface_loader,
                surface_extensions,
                debug_utils,
                entry,
            }),
        })
    }

    fn has_validation_layer(entry: &Entry) -> bool {
        entry
            .enumerate_instance_layer_properties()
            .map(|layers| {
                layers.iter().any(|layer| {
                    (unsafe { CStr::from_ptr(layer.layer_name.as_ptr()) }) == VALIDATION_LAYER
                })
            })
            .unwrap_or(false)
    }

    fn setup_debug_messenger(
        entry: &Entry,
        instance: &ash::Instance,
    ) -> Result<(ext::DebugUtils, vk::DebugUtilsMessengerEXT)> {
        let debug_utils = ext::DebugUtils::new(entry, instance);

        let create_info = vk::DebugUtilsMessengerCreateInfoEXT::builder()
            .message_severity(
                vk::DebugUtilsMessageSeverityFlagsEXT::WARNING
                    | vk::DebugUtilsMessageSeverityFlagsEXT::ERROR,
            )
            .message_type(
                vk::DebugUtilsMessageTypeFlagsEXT::GENERAL
                    | vk::DebugUtilsMessageTypeFlagsEXT::VALIDATION
                    | vk::DebugUtilsMessageTypeFlagsEXT::PERFORMANCE,
            )
            .pfn_user_callback(Some(debug_callback));

        let messenger = unsafe { debug_utils.create_debug_utils_messenger(&create_info, None) }
            .context("Failed to create debug messenger")?;

        Ok((debug_utils, messenger))
    }

    /// Create a presentation surface for a window.
    ///
    /// Fails with [`Error::UnsupportedSurface`] when the platform's surface
    /// extension is not available on this instance.
    pub fn create_surface(&self, info: &SurfaceCreateInfo) -> crate::Result<Surface> {
        let shared = &self.shared;
        let required = match info {
            SurfaceCreateInfo::Win32 { .. } => khr::Win32Surface::name(),
            SurfaceCreateInfo::Xlib { .. } => khr::XlibSurface::name(),
            SurfaceCreateInfo::Xcb { .. } => khr::XcbSurface::name(),
            SurfaceCreateInfo::Wayland { .. } => khr::WaylandSurface::name(),
        };
        if !shared.surface_extensions.contains(&required) {
            return Err(Error::UnsupportedSurface(format!(
                "{} surfaces need {:?}",
                info.kind(),
                required
            )));
        }

        let raw = unsafe {
            match *info {
                SurfaceCreateInfo::Win32 { hinstance, hwnd } => {
                    let create_info = vk::Win32SurfaceCreateInfoKHR::builder()
                        .hinstance(hinstance as *const std::ffi::c_void)
                        .hwnd(hwnd as *const std::ffi::c_void);
                    khr::Win32Surface::new(&shared.entry, &shared.raw)
                        .create_win32_surface(&create_info, None)
                }
                SurfaceCreateInfo::Xlib { display, window } => {
                    let create_info = vk::XlibSurfaceCreateInfoKHR::builder()
                        .dpy(display as *mut vk::Display)
                        .window(window as vk::Window);
                    khr::XlibSurface::new(&shared.entry, &shared.raw)
                        .create_xlib_surface(&create_info, None)
                }
                SurfaceCreateInfo::Xcb { connection, window } => {
                    let create_info = vk::XcbSurfaceCreateInfoKHR::builder()
                        .connection(connection as *mut vk::xcb_connection_t)
                        .window(window);
                    khr::XcbSurface::new(&shared.entry, &shared.raw)
                        .create_xcb_surface(&create_info, None)
                }
                SurfaceCreateInfo::Wayland { display, surface } => {
                    let create_info = vk::WaylandSurfaceCreateInfoKHR::builder()
                        .display(display as *mut vk::wl_display)
                        .surface(surface as *mut vk::wl_surface);
                    khr::WaylandSurface::new(&shared.entry, &shared.raw)
                        .create_wayland_surface(&create_info, None)
                }
            }
        }
        .map_err(BackendError::from)?;

        log::info!("Created {} surface", info.kind());
        Ok(Surface {
            raw,
            instance: Arc::clone(shared),
        })
    }
}

/// A window surface. Consumed by the device that presents to it.
pub struct Surface {
    pub(crate) raw: vk::SurfaceKHR,
    pub(crate) instance: Arc<InstanceShared>,
}

impl Drop for Surface {
    fn drop(&mut self) {
        unsafe {
            self.instance.surface_loader.destroy_surface(self.raw, None);
        }
    }
}

// Debug callback for validation layers
unsafe extern "system" fn debug_callback(
    message_severity: vk::DebugUtilsMessageSeverityFlagsEXT,
    _message_type: vk::DebugUtilsMessageTypeFlagsEXT,
    p_callback_data: *const vk::DebugUtilsMessengerCallbackDataEXT,
    _p_user_data: *mut std::ffi::c_void,
) -> vk::Bool32 {
    let message = CStr::from_ptr((*p_callback_data).p_message);

    match message_severity {
        vk::DebugUtilsMessageSeverityFlagsEXT::ERROR => {
            log::error!("[Vulkan] {}", message.to_string_lossy());
        }
        vk::DebugUtilsMessageSeverityFlagsEXT::WARNING => {
            log::warn!("[Vulkan] {}", message.to_string_lossy());
        }
        _ => {
            log::debug!("[Vulkan] {}", message.to_string_lossy());
        }
    }

    vk::FALSE
}
