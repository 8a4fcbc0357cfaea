use std::path::Path;

use image::ImageFormat;

use super::types::DecodedFrame;

/// Guess the container format from a file name or URL path.
pub fn format_from_uri(uri: &str) -> Option<ImageFormat> {
    let path = uri.split(['?', '#']).next().unwrap_or(uri);
    let ext = Path::new(path).extension()?.to_str()?.to_lowercase();
    ImageFormat::from_extension(ext)
}

/// Decode an encoded still image (WebP, PNG, JPEG) into RGBA8.
///
/// `hint` is used when present; otherwise the format is sniffed from the bytes.
pub fn decode_image(bytes: &[u8], hint: Option<ImageFormat>) -> Result<DecodedFrame, String> {
    let img = match hint {
        Some(format) => image::load_from_memory_with_format(bytes, format),
        None => image::load_from_memory(bytes),
    }
    .map_err(|e| format!("Failed to decode image: {e}"))?;

    let rgba = img.to_rgba8();
    let (w, h) = rgba.dimensions();

    Ok(DecodedFrame {
        data: rgba.into_raw(),
        width: w,
        height: h,
    })
}

/// Wrap raw RGBA8 bytes from a capture pipe, checking the size.
pub fn from_rgba(data: Vec<u8>, width: u32, height: u32) -> Result<DecodedFrame, String> {
    let expected = (width as usize) * (height as usize) * 4;
    if data.len() != expected {
        return Err(format!(
            "RGBA buffer is {} bytes, expected {expected} for {width}x{height}",
            data.len()
        ));
    }
    Ok(DecodedFrame {
        data,
        width,
        height,
    })
}

#[cfg(test)]
pub(crate) fn encode_png(width: u32, height: u32, fill: [u8; 4]) -> Vec<u8> {
    let img = image::RgbaImage::from_pixel(width, height, image::Rgba(fill));
    let mut out = std::io::Cursor::new(Vec::new());
    img.write_to(&mut out, ImageFormat::Png).unwrap();
    out.into_inner()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn format_from_extension() {
        assert_eq!(format_from_uri("frames/frame_0001.webp"), Some(ImageFormat::WebP));
        assert_eq!(format_from_uri("http://host/a/frame_0001.PNG"), Some(ImageFormat::Png));
        assert_eq!(format_from_uri("x.jpg?v=3"), Some(ImageFormat::Jpeg));
        assert_eq!(format_from_uri("no_extension"), None);
    }

    #[test]
    fn decode_png_to_rgba() {
        let bytes = encode_png(3, 2, [10, 20, 30, 255]);
        let frame = decode_image(&bytes, Some(ImageFormat::Png)).unwrap();
        assert_eq!((frame.width, frame.height), (3, 2));
        assert_eq!(frame.data.len(), 3 * 2 * 4);
        assert_eq!(&frame.data[..4], &[10, 20, 30, 255]);
    }

    #[test]
    fn decode_sniffs_without_hint() {
        let bytes = encode_png(1, 1, [1, 2, 3, 4]);
        let frame = decode_image(&bytes, None).unwrap();
        assert_eq!(frame.data, vec![1, 2, 3, 4]);
    }

    #[test]
    fn decode_garbage_fails() {
        assert!(decode_image(b"not an image", None).is_err());
    }

    #[test]
    fn rgba_size_checked() {
        assert!(from_rgba(vec![0; 16], 2, 2).is_ok());
        assert!(from_rgba(vec![0; 15], 2, 2).is_err());
    }
}
