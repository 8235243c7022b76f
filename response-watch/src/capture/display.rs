//! In-process display capture.
//!
//! On macOS the display is read through CoreGraphics and written out as PNG
//! with the `image` crate. Other platforms have no direct capture and fall
//! back to the capture command.

use image::RgbaImage;
use std::path::Path;

/// Identifier of a physical display
pub type DisplayId = u32;

#[cfg(target_os = "macos")]
mod macos {
    use super::*;
    use core_graphics::display::{CGDisplay, CGDisplayBounds, CGGetActiveDisplayList};
    use core_graphics::geometry::{CGPoint, CGRect, CGSize};
    use core_graphics::image::CGImage;
    use core_graphics::window::{kCGWindowImageBestResolution, CGWindowListCreateImage};
    use foreign_types_shared::ForeignType;

    pub fn main_display() -> DisplayId {
        CGDisplay::main().id
    }

    /// Capture an entire display
    pub fn capture_display(display_id: DisplayId) -> Option<RgbaImage> {
        let bounds = unsafe { CGDisplayBounds(display_id) };

        let rect = CGRect::new(
            &CGPoint::new(bounds.origin.x, bounds.origin.y),
            &CGSize::new(bounds.size.width, bounds.size.height),
        );

        // Window ID 0 with the "all windows" option captures the whole display
        let cg_image: CGImage = unsafe {
            let image_ref = CGWindowListCreateImage(rect, 0, 0, kCGWindowImageBestResolution);
            if image_ref.is_null() {
                return None;
            }
            CGImage::from_ptr(image_ref)
        };

        convert_cgimage_to_rgba(&cg_image)
    }

    /// Whether the process may read the screen at all
    pub fn screen_recording_available() -> bool {
        let mut count: u32 = 0;
        unsafe {
            CGGetActiveDisplayList(0, std::ptr::null_mut(), &mut count);
        }
        count > 0
    }

    fn convert_cgimage_to_rgba(cg_image: &CGImage) -> Option<RgbaImage> {
        let width = cg_image.width();
        let height = cg_image.height();
        let bytes_per_row = cg_image.bytes_per_row();
        let bytes_per_pixel = cg_image.bits_per_pixel() / 8;

        let data = cg_image.data();
        let bytes = data.bytes();

        if bytes.is_empty() || bytes_per_pixel < 4 {
            return None;
        }

        let mut rgba_data = Vec::with_capacity(width * height * 4);

        for y in 0..height {
            let row_start = y * bytes_per_row;
            for x in 0..width {
                let pixel_start = row_start + x * bytes_per_pixel;
                if pixel_start + 3 < bytes.len() {
                    // Displays hand back BGRA
                    let b = bytes[pixel_start];
                    let g = bytes[pixel_start + 1];
                    let r = bytes[pixel_start + 2];
                    let a = bytes[pixel_start + 3];
                    rgba_data.extend_from_slice(&[r, g, b, a]);
                }
            }
        }

        RgbaImage::from_raw(width as u32, height as u32, rgba_data)
    }
}

#[cfg(not(target_os = "macos"))]
mod macos {
    use super::*;

    pub fn main_display() -> DisplayId {
        0
    }

    pub fn capture_display(_display_id: DisplayId) -> Option<RgbaImage> {
        None
    }

    pub fn screen_recording_available() -> bool {
        false
    }
}

pub use macos::{capture_display, main_display, screen_recording_available};

/// Capture a display and write it to `path` as PNG.
///
/// Returns `false` when the platform gave back no image.
pub fn capture_display_to(display_id: DisplayId, path: &Path) -> Result<bool, image::ImageError> {
    match capture_display(display_id) {
        Some(image) => {
            image.save(path)?;
            Ok(true)
        }
        None => Ok(false),
    }
}

#[cfg(all(test, not(target_os = "macos")))]
mod tests {
    use super::*;

    #[test]
    fn test_no_direct_capture_off_macos() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("frame.png");
        assert!(!capture_display_to(main_display(), &path).unwrap());
        assert!(!path.exists());
        assert!(!screen_recording_available());
    }
}
