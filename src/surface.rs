// Window surface description
//
// The caller's windowing library hands over raw handles; they are converted
// into a platform variant once so the Vulkan instance only has to match on
// our own enum.

use std::ffi::c_void;

use raw_window_handle::{RawDisplayHandle, RawWindowHandle};

use crate::error::{Error, Result};

/// Native handles needed to create a presentation surface.
///
/// The pointers are borrowed from the windowing system and must outlive the
/// surface created from them.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SurfaceCreateInfo {
    Win32 { hinstance: isize, hwnd: isize },
    Xlib { display: *mut c_void, window: u64 },
    Xcb { connection: *mut c_void, window: u32 },
    Wayland { display: *mut c_void, surface: *mut c_void },
}

impl SurfaceCreateInfo {
    /// Convert handles from `raw-window-handle`.
    pub fn from_raw_handles(display: RawDisplayHandle, window: RawWindowHandle) -> Result<Self> {
        match (display, window) {
            (RawDisplayHandle::Windows(_), RawWindowHandle::Win32(handle)) => {
                Ok(SurfaceCreateInfo::Win32 {
                    hinstance: handle.hinstance.map(|h| h.get()).unwrap_or(0),
                    hwnd: handle.hwnd.get(),
                })
            }
            (RawDisplayHandle::Xlib(display), RawWindowHandle::Xlib(handle)) => {
                let display = display
                    .display
                    .ok_or_else(|| {
                        Error::UnsupportedSurface("Xlib display pointer is null".into())
                    })?;
                Ok(SurfaceCreateInfo::Xlib {
                    display: display.as_ptr(),
                    window: handle.window as u64,
                })
            }
            (RawDisplayHandle::Xcb(display), RawWindowHandle::Xcb(handle)) => {
                let connection = display
                    .connection
                    .ok_or_else(|| {
                        Error::UnsupportedSurface("XCB connection pointer is null".into())
                    })?;
                Ok(SurfaceCreateInfo::Xcb {
                    connection: connection.as_ptr(),
                    window: handle.window.get(),
                })
            }
            (RawDisplayHandle::Wayland(display), RawWindowHandle::Wayland(handle)) => {
                Ok(SurfaceCreateInfo::Wayland {
                    display: display.display.as_ptr(),
                    surface: handle.surface.as_ptr(),
                })
            }
            (display, window) => Err(Error::UnsupportedSurface(format!(
                "{:?} / {:?}",
                display, window
            ))),
        }
    }

    /// Short platform name, for logging.
    pub fn kind(&self) -> &'static str {
        match self {
            SurfaceCreateInfo::Win32 { .. } => "win32",
            SurfaceCreateInfo::Xlib { .. } => "xlib",
            SurfaceCreateInfo::Xcb { .. } => "xcb",
            SurfaceCreateInfo::Wayland { .. } => "wayland",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use raw_window_handle::{
        WaylandDisplayHandle, WaylandWindowHandle, Win32WindowHandle, WindowsDisplayHandle,
        XlibDisplayHandle, XlibWindowHandle,
    };
    use std::num::NonZeroIsize;
    use std::ptr::NonNull;

    #[test]
    fn win32_handles_convert() {
        let hwnd = NonZeroIsize::new(0x1234).unwrap();
        let info = SurfaceCreateInfo::from_raw_handles(
            RawDisplayHandle::Windows(WindowsDisplayHandle::new()),
            RawWindowHandle::Win32(Win32WindowHandle::new(hwnd)),
        )
        .unwrap();
        assert_eq!(
            info,
            SurfaceCreateInfo::Win32 {
                hinstance: 0,
                hwnd: 0x1234
            }
        );
        assert_eq!(info.kind(), "win32");
    }

    #[test]
    fn wayland_handles_convert() {
        let mut display = 0u8;
        let mut surface = 0u8;
        let display_ptr = NonNull::from(&mut display).cast::<c_void>();
        let surface_ptr = NonNull::from(&mut surface).cast::<c_void>();

        let info = SurfaceCreateInfo::from_raw_handles(
            RawDisplayHandle::Wayland(WaylandDisplayHandle::new(display_ptr)),
            RawWindowHandle::Wayland(WaylandWindowHandle::new(surface_ptr)),
        )
        .unwrap();
        assert_eq!(
            info,
            SurfaceCreateInfo::Wayland {
                display: display_ptr.as_ptr(),
                surface: surface_ptr.as_ptr()
            }
        );
    }

    #[test]
    fn null_xlib_display_is_rejected() {
        let err = SurfaceCreateInfo::from_raw_handles(
            RawDisplayHandle::Xlib(XlibDisplayHandle::new(None, 0)),
            RawWindowHandle::Xlib(XlibWindowHandle::new(7)),
        )
        .unwrap_err();
        assert!(matches!(err, Error::UnsupportedSurface(_)));
    }

    #[test]
    fn mismatched_platforms_are_rejected() {
        let hwnd = NonZeroIsize::new(1).unwrap();
        let err = SurfaceCreateInfo::from_raw_handles(
            RawDisplayHandle::Xlib(XlibDisplayHandle::new(None, 0)),
            RawWindowHandle::Win32(Win32WindowHandle::new(hwnd)),
        )
        .unwrap_err();
        assert!(matches!(err, Error::UnsupportedSurface(_)));
    }
}
