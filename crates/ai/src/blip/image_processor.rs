use crate::CaptionResult;
use candle_core::{DType, Device, Tensor};
use image::{imageops::FilterType, ImageReader, RgbImage};
use std::io::Cursor;

pub const IMAGE_SIZE: u32 = 384;

const IMAGE_MEAN: [f32; 3] = [0.48145466, 0.4578275, 0.40821073];
const IMAGE_STD: [f32; 3] = [0.26862954, 0.261_302_6, 0.275_777_1];

/// Decodes any guessable format into 8-bit RGB. Alpha is dropped, palette
/// and grayscale images are expanded.
pub fn decode_rgb(data: &[u8]) -> CaptionResult<RgbImage> {
    let img = ImageReader::new(Cursor::new(data))
        .with_guessed_format()?
        .decode()?;
    Ok(img.to_rgb8())
}

/// Turns encoded image bytes into a `(3, 384, 384)` f32 tensor on the cpu,
/// normalized with the CLIP mean and std.
pub fn load_image_from_bytes(data: &[u8]) -> CaptionResult<Tensor> {
    let img = decode_rgb(data)?;
    let img = image::imageops::resize(&img, IMAGE_SIZE, IMAGE_SIZE, FilterType::CatmullRom);

    let size = IMAGE_SIZE as usize;
    let data = Tensor::from_vec(img.into_raw(), (size, size, 3), &Device::Cpu)?.permute((2, 0, 1))?;
    let mean = Tensor::new(&IMAGE_MEAN, &Device::Cpu)?.reshape((3, 1, 1))?;
    let std = Tensor::new(&IMAGE_STD, &Device::Cpu)?.reshape((3, 1, 1))?;

    let normalized = (data.to_dtype(DType::F32)? / 255.)?
        .broadcast_sub(&mean)?
        .broadcast_div(&std)?;
    Ok(normalized)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::CaptionError;
    use image::{GrayImage, ImageFormat, Luma, Rgba, RgbaImage};

    fn encode(img: impl Into<image::DynamicImage>, format: ImageFormat) -> Vec<u8> {
        let mut buf = Cursor::new(Vec::new());
        img.into().write_to(&mut buf, format).unwrap();
        buf.into_inner()
    }

    fn expected(channel: usize, value: u8) -> f32 {
        (value as f32 / 255. - IMAGE_MEAN[channel]) / IMAGE_STD[channel]
    }

    fn corner(tensor: &Tensor) -> [f32; 3] {
        let values = tensor.to_vec3::<f32>().unwrap();
        [values[0][0][0], values[1][0][0], values[2][0][0]]
    }

    #[test_log::test]
    fn test_rgba_png_is_converted_to_rgb() {
        let png = encode(RgbaImage::from_pixel(1, 1, Rgba([255, 0, 0, 0])), ImageFormat::Png);

        let rgb = decode_rgb(&png).unwrap();
        assert_eq!(rgb.dimensions(), (1, 1));
        assert_eq!(rgb.get_pixel(0, 0).0, [255, 0, 0]);

        let tensor = load_image_from_bytes(&png).unwrap();
        assert_eq!(tensor.dims(), &[3, 384, 384]);
        assert_eq!(tensor.dtype(), DType::F32);

        let [r, g, b] = corner(&tensor);
        assert!((r - expected(0, 255)).abs() < 0.02);
        assert!((g - expected(1, 0)).abs() < 0.02);
        assert!((b - expected(2, 0)).abs() < 0.02);
    }

    #[test_log::test]
    fn test_grayscale_is_expanded() {
        let png = encode(GrayImage::from_pixel(7, 3, Luma([128])), ImageFormat::Png);

        let tensor = load_image_from_bytes(&png).unwrap();
        assert_eq!(tensor.dims(), &[3, 384, 384]);

        let [r, g, b] = corner(&tensor);
        assert!((r - expected(0, 128)).abs() < 0.02);
        assert!((g - expected(1, 128)).abs() < 0.02);
        assert!((b - expected(2, 128)).abs() < 0.02);
    }

    #[test_log::test]
    fn test_jpeg_is_decoded() {
        let jpeg = encode(
            image::RgbImage::from_pixel(32, 16, image::Rgb([255, 255, 255])),
            ImageFormat::Jpeg,
        );
        let tensor = load_image_from_bytes(&jpeg).unwrap();
        assert_eq!(tensor.dims(), &[3, 384, 384]);
    }

    #[test_log::test]
    fn test_malformed_bytes() {
        let err = load_image_from_bytes(b"definitely not an image").unwrap_err();
        assert!(matches!(err, CaptionError::Decode(_)), "{:?}", err);

        assert!(load_image_from_bytes(&[]).is_err());
    }

    #[test_log::test]
    fn test_truncated_png() {
        let png = encode(RgbaImage::from_pixel(16, 16, Rgba([1, 2, 3, 4])), ImageFormat::Png);
        assert!(decode_rgb(&png[..png.len() / 2]).is_err());
    }
}
