use image::imageops::FilterType;
use image::{DynamicImage, ImageFormat, ImageReader, Rgb, RgbImage};
use ndarray::Array4;
use std::io::Cursor;

pub const INPUT_HEIGHT: usize = 32;
pub const INPUT_WIDTH: usize = 32;
pub const INPUT_CHANNELS: usize = 3;

/// Model input: one NHWC image, `[1, 32, 32, 3]`, values in [0, 1].
pub type PreprocessedTensor = Array4<f32>;

#[derive(Debug, thiserror::Error)]
pub enum PreprocessError {
    #[error("Failed to decode image: {0}")]
    Decode(#[source] image::ImageError),
    #[error("Failed to encode image: {0}")]
    Encode(#[source] image::ImageError),
    #[error("Unexpected tensor shape {0:?}")]
    Shape(Vec<usize>),
}

pub struct Preprocessed {
    pub tensor: PreprocessedTensor,
    /// Container format detected from the upload's content.
    pub format: Option<ImageFormat>,
}

pub fn preprocess(image: &[u8]) -> Result<Preprocessed, PreprocessError> {
    let reader = ImageReader::new(Cursor::new(image))
        .with_guessed_format()
        .map_err(|e| PreprocessError::Decode(image::ImageError::IoError(e)))?;
    let format = reader.format();
    let decoded = reader.decode().map_err(PreprocessError::Decode)?;

    log::debug!(
        "Decoded {:?} image {}x{}",
        format,
        decoded.width(),
        decoded.height()
    );

    Ok(Preprocessed {
        tensor: to_tensor(&decoded),
        format,
    })
}

/// Nearest-neighbour resize to 32x32 RGB, scaled to [0, 1].
pub fn to_tensor(image: &DynamicImage) -> PreprocessedTensor {
    let resized = image
        .resize_exact(INPUT_WIDTH as u32, INPUT_HEIGHT as u32, FilterType::Nearest)
        .to_rgb8();

    Array4::from_shape_fn(
        (1, INPUT_HEIGHT, INPUT_WIDTH, INPUT_CHANNELS),
        |(_, y, x, c)| resized.get_pixel(x as u32, y as u32)[c] as f32 / 255.0,
    )
}

/// Inverse of [`to_tensor`]: back to 0..=255 pixels.
pub fn to_image(tensor: &PreprocessedTensor) -> Result<RgbImage, PreprocessError> {
    if tensor.shape() != [1, INPUT_HEIGHT, INPUT_WIDTH, INPUT_CHANNELS] {
        return Err(PreprocessError::Shape(tensor.shape().to_vec()));
    }

    let denormalize = |v: f32| (v * 255.0).round().clamp(0.0, 255.0) as u8;
    Ok(RgbImage::from_fn(
        INPUT_WIDTH as u32,
        INPUT_HEIGHT as u32,
        |x, y| {
            let (x, y) = (x as usize, y as usize);
            Rgb([
                denormalize(tensor[[0, y, x, 0]]),
                denormalize(tensor[[0, y, x, 1]]),
                denormalize(tensor[[0, y, x, 2]]),
            ])
        },
    ))
}

pub fn encode(image: &RgbImage, format: ImageFormat) -> Result<Vec<u8>, PreprocessError> {
    let mut buffer = Vec::new();
    image
        .write_to(&mut Cursor::new(&mut buffer), format)
        .map_err(PreprocessError::Encode)?;
    Ok(buffer)
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;

    pub(crate) fn image_bytes(width: u32, height: u32, format: ImageFormat) -> Vec<u8> {
        let image = RgbImage::from_fn(width, height, |x, y| {
            Rgb([(x * 4 % 256) as u8, (y * 4 % 256) as u8, 128])
        });
        encode(&image, format).unwrap()
    }

    pub(crate) fn png_bytes(width: u32, height: u32) -> Vec<u8> {
        image_bytes(width, height, ImageFormat::Png)
    }

    /// Farbfeld stores 16-bit RGBA, so the 8-bit RGB encoder cannot write it.
    pub(crate) fn farbfeld_bytes(width: u32, height: u32) -> Vec<u8> {
        let mut bytes = b"farbfeld".to_vec();
        bytes.extend_from_slice(&width.to_be_bytes());
        bytes.extend_from_slice(&height.to_be_bytes());
        for i in 0..width * height {
            let v = ((i * 997) % 65536) as u16;
            for channel in [v, v / 2, 0x8000, 0xffff] {
                bytes.extend_from_slice(&channel.to_be_bytes());
            }
        }
        bytes
    }

    #[test]
    fn tensor_has_model_shape_and_range() {
        let out = preprocess(&png_bytes(64, 48)).unwrap();
        assert_eq!(out.tensor.shape(), &[1, 32, 32, 3]);
        assert_eq!(out.format, Some(ImageFormat::Png));
        assert!(out.tensor.iter().all(|v| (0.0..=1.0).contains(v)));
    }

    #[test]
    fn same_bytes_give_identical_tensors() {
        let bytes = png_bytes(100, 70);
        let a = preprocess(&bytes).unwrap().tensor;
        let b = preprocess(&bytes).unwrap().tensor;
        let a_bits: Vec<u32> = a.iter().map(|v| v.to_bits()).collect();
        let b_bits: Vec<u32> = b.iter().map(|v| v.to_bits()).collect();
        assert_eq!(a_bits, b_bits);
    }

    #[test]
    fn grayscale_input_becomes_three_channels() {
        let gray = image::GrayImage::from_pixel(10, 10, image::Luma([51]));
        let mut bytes = Vec::new();
        DynamicImage::ImageLuma8(gray)
            .write_to(&mut Cursor::new(&mut bytes), ImageFormat::Png)
            .unwrap();

        let tensor = preprocess(&bytes).unwrap().tensor;
        assert!(tensor.iter().all(|v| (*v - 0.2).abs() < 1e-6));
    }

    #[test]
    fn decodable_format_may_not_be_writable() {
        let out = preprocess(&farbfeld_bytes(40, 40)).unwrap();
        assert_eq!(out.format, Some(ImageFormat::Farbfeld));

        let image = to_image(&out.tensor).unwrap();
        let err = encode(&image, ImageFormat::Farbfeld).err().unwrap();
        assert!(matches!(err, PreprocessError::Encode(_)));
    }

    #[test]
    fn garbage_is_a_decode_error() {
        let err = preprocess(b"\xff\xd8\xff\xe0 definitely not a jpeg").err().unwrap();
        assert!(matches!(err, PreprocessError::Decode(_)));

        let err = preprocess(&[]).err().unwrap();
        assert!(matches!(err, PreprocessError::Decode(_)));
    }

    #[test]
    fn to_image_round_trips_pixels() {
        let source = DynamicImage::ImageRgb8(RgbImage::from_fn(32, 32, |x, y| {
            Rgb([x as u8 * 7, y as u8 * 5, 200])
        }));
        let tensor = to_tensor(&source);
        let restored = to_image(&tensor).unwrap();
        assert_eq!(&restored, source.as_rgb8().unwrap());
    }

    #[test]
    fn to_image_rejects_wrong_shape() {
        let tensor = Array4::<f32>::zeros((1, 16, 16, 3));
        assert!(matches!(to_image(&tensor), Err(PreprocessError::Shape(_))));
    }
}
