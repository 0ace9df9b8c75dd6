use burn::data::dataloader::batcher::Batcher;
use burn::data::dataset::Dataset;
use burn::prelude::*;
use image::{DynamicImage, ImageReader, imageops::FilterType};
use indicatif::{ProgressBar, ProgressStyle};
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

use crate::error::{DehazeError, Result};
use crate::model::constants::{CHANNELS, HEIGHT, WIDTH};
use crate::utils::natural_cmp;

const IMAGE_EXTENSIONS: [&str; 7] = ["jpg", "jpeg", "png", "bmp", "tiff", "tif", "webp"];

/// A preprocessed image: 256x256 RGB, interleaved (HWC), values in [0, 1].
#[derive(Debug, Clone, PartialEq)]
pub struct ImageSample {
    pub pixels: Vec<f32>,
}

impl ImageSample {
    /// Converts to RGB, resizes to the training resolution and scales intensities by 1/255.
    pub fn from_image(image: &DynamicImage) -> Self {
        let rgb = image.to_rgb8();
        let rgb = if rgb.dimensions() == (WIDTH as u32, HEIGHT as u32) {
            rgb
        } else {
            image::imageops::resize(&rgb, WIDTH as u32, HEIGHT as u32, FilterType::Triangle)
        };
        let pixels = rgb.as_raw().iter().map(|&v| v as f32 / 255.0).collect();
        Self { pixels }
    }

    pub fn shape(&self) -> [usize; 3] {
        [HEIGHT, WIDTH, CHANNELS]
    }

    /// Planar `[channels, height, width]` tensor, burn's image layout.
    pub fn into_tensor<B: Backend>(self, device: &B::Device) -> Tensor<B, 3> {
        Tensor::<B, 3>::from_data(
            TensorData::new(self.pixels, [HEIGHT, WIDTH, CHANNELS]).convert::<B::FloatElem>(),
            device,
        )
        .permute([2, 0, 1])
    }
}

/// Maps [0, 1] samples into the [-1, 1] range both networks operate in.
pub fn to_model_range<B: Backend, const D: usize>(tensor: Tensor<B, D>) -> Tensor<B, D> {
    tensor.mul_scalar(2.0).sub_scalar(1.0)
}

/// Inverse of [`to_model_range`].
pub fn from_model_range<B: Backend, const D: usize>(tensor: Tensor<B, D>) -> Tensor<B, D> {
    tensor.add_scalar(1.0).div_scalar(2.0)
}

/// Decodes any supported format, guessing from content rather than the extension.
pub fn decode_image<P: AsRef<Path>>(path: P) -> Result<DynamicImage> {
    let path = path.as_ref();
    let io_err = |source| DehazeError::Io {
        path: path.to_path_buf(),
        source,
    };
    ImageReader::open(path)
        .map_err(io_err)?
        .with_guessed_format()
        .map_err(io_err)?
        .decode()
        .map_err(|source| DehazeError::Decode {
            path: path.to_path_buf(),
            source,
        })
}

pub fn load_image<P: AsRef<Path>>(path: P) -> Result<ImageSample> {
    Ok(ImageSample::from_image(&decode_image(path)?))
}

fn has_image_extension(path: &Path) -> bool {
    path.extension()
        .and_then(|s| s.to_str())
        .map(|ext| IMAGE_EXTENSIONS.contains(&ext.to_lowercase().as_str()))
        .unwrap_or(false)
}

fn file_name(path: &Path) -> String {
    path.file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_default()
}

/// Lists the image files of `dir` in natural filename order.
pub fn list_images<P: AsRef<Path>>(dir: P, label: &str) -> Result<Vec<PathBuf>> {
    let dir = dir.as_ref();
    if !dir.exists() {
        return Err(DehazeError::PathNotFound {
            label: label.to_string(),
            path: dir.to_path_buf(),
        });
    }

    let io_err = |source| DehazeError::Io {
        path: dir.to_path_buf(),
        source,
    };
    let mut image_paths = Vec::new();
    for entry in std::fs::read_dir(dir).map_err(io_err)? {
        let path = entry.map_err(io_err)?.path();
        if path.is_file() && has_image_extension(&path) {
            image_paths.push(path);
        }
    }
    if image_paths.is_empty() {
        return Err(DehazeError::EmptyDirectory(dir.to_path_buf()));
    }

    image_paths.sort_by(|a, b| natural_cmp(&file_name(a), &file_name(b)));
    debug!("found {} {} images in {}", image_paths.len(), label, dir.display());
    Ok(image_paths)
}

/// Decodes every path in order. The first failure aborts the whole load.
pub fn load_images(paths: &[PathBuf], label: &str) -> Result<Vec<ImageSample>> {
    let bar = ProgressBar::new(paths.len() as u64);
    bar.set_style(
        ProgressStyle::with_template("{msg} [{bar:40}] {pos}/{len} ({eta})")
            .unwrap_or_else(|_| ProgressStyle::default_bar())
            .progress_chars("=> "),
    );
    bar.set_message(format!("Loading {label} images"));

    let mut samples = Vec::with_capacity(paths.len());
    for path in paths {
        samples.push(load_image(path)?);
        bar.inc(1);
    }
    bar.finish_and_clear();

    info!("loaded {} {} images", samples.len(), label);
    Ok(samples)
}

pub fn load_image_dir<P: AsRef<Path>>(dir: P, label: &str) -> Result<Vec<ImageSample>> {
    let paths = list_images(dir, label)?;
    load_images(&paths, label)
}

/// How clean and noisy files are matched up.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum PairingMode {
    /// i-th clean file goes with the i-th noisy file; nothing is checked.
    #[default]
    ByOrder,
    /// Counts must match and the files at each position must share a stem.
    Strict,
}

pub fn verify_pairing(clean: &[PathBuf], noisy: &[PathBuf]) -> Result<()> {
    if clean.len() != noisy.len() {
        return Err(DehazeError::Pairing(format!(
            "{} clean images but {} noisy images",
            clean.len(),
            noisy.len()
        )));
    }
    for (index, (c, n)) in clean.iter().zip(noisy).enumerate() {
        if c.file_stem() != n.file_stem() {
            return Err(DehazeError::Pairing(format!(
                "position {index}: clean `{}` does not match noisy `{}`",
                file_name(c),
                file_name(n)
            )));
        }
    }
    Ok(())
}

#[derive(Debug, Clone)]
pub struct DehazeItem {
    pub noisy: ImageSample,
    pub clean: ImageSample,
}

/// Positionally zipped noisy/clean samples.
pub struct DehazeDataset {
    noisy: Vec<ImageSample>,
    clean: Vec<ImageSample>,
}

impl DehazeDataset {
    /// Pairs samples by position; the longer side is truncated.
    pub fn new(mut noisy: Vec<ImageSample>, mut clean: Vec<ImageSample>) -> Self {
        if noisy.len() != clean.len() {
            let len = noisy.len().min(clean.len());
            warn!(
                "{} noisy and {} clean images, truncating to {}",
                noisy.len(),
                clean.len(),
                len
            );
            noisy.truncate(len);
            clean.truncate(len);
        }
        Self { noisy, clean }
    }

    /// Lists both directories before decoding anything, so a missing path fails fast.
    pub fn from_dirs<P: AsRef<Path>>(clean_dir: P, noisy_dir: P, mode: PairingMode) -> Result<Self> {
        let clean_paths = list_images(clean_dir, "clean")?;
        let noisy_paths = list_images(noisy_dir, "noisy")?;
        if mode == PairingMode::Strict {
            verify_pairing(&clean_paths, &noisy_paths)?;
        }

        let clean = load_images(&clean_paths, "clean")?;
        let noisy = load_images(&noisy_paths, "noisy")?;
        Ok(Self::new(noisy, clean))
    }
}

impl Dataset<DehazeItem> for DehazeDataset {
    fn len(&self) -> usize {
        self.noisy.len()
    }

    fn get(&self, index: usize) -> Option<DehazeItem> {
        Some(DehazeItem {
            noisy: self.noisy.get(index)?.clone(),
            clean: self.clean.get(index)?.clone(),
        })
    }
}

#[derive(Clone, Default)]
pub struct DehazeBatcher {}

#[derive(Clone, Debug)]
pub struct DehazeBatch<B: Backend> {
    pub noisy: Tensor<B, 4>, // Shape: [batch_size, channels, height, width]
    pub clean: Tensor<B, 4>,
}

impl<B: Backend> Batcher<B, DehazeItem, DehazeBatch<B>> for DehazeBatcher {
    fn batch(&self, items: Vec<DehazeItem>, device: &B::Device) -> DehazeBatch<B> {
        let (noisy, clean): (Vec<_>, Vec<_>) = items
            .into_iter()
            .map(|item| {
                (
                    item.noisy.into_tensor::<B>(device),
                    item.clean.into_tensor::<B>(device),
                )
            })
            .unzip();

        DehazeBatch {
            noisy: Tensor::stack(noisy, 0),
            clean: Tensor::stack(clean, 0),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use burn::backend::NdArray;
    use burn::data::dataloader::DataLoaderBuilder;
    use image::{GrayImage, Luma, Rgb, RgbImage};

    type TestBackend = NdArray;

    fn write_rgb(dir: &Path, name: &str, width: u32, height: u32) -> PathBuf {
        let path = dir.join(name);
        RgbImage::from_fn(width, height, |x, y| {
            Rgb([(x % 256) as u8, (y % 256) as u8, ((x + y) % 256) as u8])
        })
        .save(&path)
        .unwrap();
        path
    }

    fn flat_sample(value: f32) -> ImageSample {
        ImageSample {
            pixels: vec![value; HEIGHT * WIDTH * CHANNELS],
        }
    }

    #[test]
    fn normalization_is_invertible() {
        let source = RgbImage::from_fn(WIDTH as u32, HEIGHT as u32, |x, y| {
            Rgb([x as u8, y as u8, (x as u8).wrapping_add(y as u8)])
        });
        let sample = ImageSample::from_image(&DynamicImage::ImageRgb8(source.clone()));

        assert_eq!(sample.pixels.len(), source.as_raw().len());
        for (&value, &raw) in sample.pixels.iter().zip(source.as_raw()) {
            assert!((0.0..=1.0).contains(&value));
            assert_eq!((value * 255.0).round() as u8, raw);
        }
    }

    #[test]
    fn loader_output_is_always_training_resolution() {
        let dir = tempfile::tempdir().unwrap();
        for (name, w, h) in [("wide.png", 37, 53), ("big.png", 300, 260), ("tiny.png", 1, 1)] {
            let path = write_rgb(dir.path(), name, w, h);
            let sample = load_image(&path).unwrap();
            assert_eq!(sample.shape(), [256, 256, 3]);
            assert_eq!(sample.pixels.len(), 256 * 256 * 3);
        }
    }

    #[test]
    fn grayscale_is_expanded_to_rgb() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("gray.png");
        GrayImage::from_pixel(8, 8, Luma([51])).save(&path).unwrap();

        let sample = load_image(&path).unwrap();
        assert_eq!(sample.pixels.len(), HEIGHT * WIDTH * CHANNELS);
        assert!(sample.pixels.iter().all(|&v| (v - 0.2).abs() < 1e-6));
    }

    #[test]
    fn missing_directory_is_path_not_found() {
        let dir = tempfile::tempdir().unwrap();
        let err = list_images(dir.path().join("absent"), "clean").unwrap_err();
        assert!(matches!(err, DehazeError::PathNotFound { .. }));
        assert!(err.to_string().contains("clean"));
    }

    #[test]
    fn empty_directory_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("README.txt"), "not an image").unwrap();
        let err = list_images(dir.path(), "noisy").unwrap_err();
        assert!(matches!(err, DehazeError::EmptyDirectory(_)));
    }

    #[test]
    fn listing_is_natural_and_skips_non_images() {
        let dir = tempfile::tempdir().unwrap();
        for name in ["img10.png", "img2.png", "img1.png"] {
            write_rgb(dir.path(), name, 4, 4);
        }
        std::fs::write(dir.path().join("notes.txt"), "x").unwrap();
        std::fs::write(dir.path().join("img3.gif"), "x").unwrap();
        std::fs::create_dir(dir.path().join("img0.png")).unwrap();

        let names: Vec<String> = list_images(dir.path(), "clean")
            .unwrap()
            .iter()
            .map(|p| file_name(p))
            .collect();
        assert_eq!(names, vec!["img1.png", "img2.png", "img10.png"]);
    }

    #[test]
    fn extension_filter_is_case_insensitive() {
        for name in ["a.jpg", "b.JPEG", "c.Png", "d.bmp", "e.TIFF", "f.tif", "g.webp"] {
            assert!(has_image_extension(Path::new(name)), "{name}");
        }
        for name in ["h.gif", "i.txt", "noext", ".png.bak"] {
            assert!(!has_image_extension(Path::new(name)), "{name}");
        }
    }

    #[test]
    fn undecodable_training_image_is_fatal() {
        let dir = tempfile::tempdir().unwrap();
        write_rgb(dir.path(), "a1.png", 4, 4);
        std::fs::write(dir.path().join("a2.png"), b"definitely not a png").unwrap();

        let err = load_image_dir(dir.path(), "clean").unwrap_err();
        match err {
            DehazeError::Decode { path, .. } => assert!(path.ends_with("a2.png")),
            other => panic!("expected decode error, got {other:?}"),
        }
    }

    #[test]
    fn mismatched_counts_truncate_to_shorter() {
        let dataset = DehazeDataset::new(vec![flat_sample(0.1); 3], vec![flat_sample(0.9); 2]);
        assert_eq!(dataset.len(), 2);
        assert!(dataset.get(2).is_none());
    }

    #[test]
    fn strict_pairing_checks_counts_and_stems() {
        let p = |names: &[&str]| names.iter().map(PathBuf::from).collect::<Vec<_>>();

        assert!(verify_pairing(&p(&["1.png", "2.png"]), &p(&["1.jpg", "2.jpg"])).is_ok());
        assert!(matches!(
            verify_pairing(&p(&["1.png", "2.png"]), &p(&["1.png"])),
            Err(DehazeError::Pairing(_))
        ));
        let err = verify_pairing(&p(&["1.png", "2.png"]), &p(&["1.png", "3.png"])).unwrap_err();
        assert!(err.to_string().contains("position 1"));
    }

    #[test]
    fn strict_mode_rejects_before_decoding() {
        let clean = tempfile::tempdir().unwrap();
        let noisy = tempfile::tempdir().unwrap();
        write_rgb(clean.path(), "scene1.png", 4, 4);
        std::fs::write(noisy.path().join("other1.png"), b"garbage").unwrap();

        let err = DehazeDataset::from_dirs(clean.path(), noisy.path(), PairingMode::Strict)
            .err()
            .unwrap();
        assert!(matches!(err, DehazeError::Pairing(_)));
    }

    #[test]
    fn batcher_produces_planar_tensors() {
        let mut pixels = vec![0.0; HEIGHT * WIDTH * CHANNELS];
        pixels[0] = 0.25; // R of (0, 0)
        pixels[1] = 0.5; // G of (0, 0)
        pixels[CHANNELS] = 0.75; // R of (0, 1)
        let item = DehazeItem {
            noisy: ImageSample { pixels },
            clean: flat_sample(1.0),
        };

        let device = Default::default();
        let batch: DehazeBatch<TestBackend> = DehazeBatcher::default().batch(vec![item], &device);
        assert_eq!(batch.noisy.dims(), [1, CHANNELS, HEIGHT, WIDTH]);
        assert_eq!(batch.clean.dims(), [1, CHANNELS, HEIGHT, WIDTH]);

        let values = batch.noisy.to_data().to_vec::<f32>().unwrap();
        let plane = HEIGHT * WIDTH;
        assert_eq!(values[0], 0.25);
        assert_eq!(values[plane], 0.5);
        assert_eq!(values[1], 0.75);
    }

    #[test]
    fn last_batch_keeps_the_remainder() {
        let dataset = DehazeDataset::new(vec![flat_sample(0.2); 20], vec![flat_sample(0.8); 20]);
        let loader = DataLoaderBuilder::new(DehazeBatcher::default())
            .batch_size(8)
            .build(dataset);

        let sizes: Vec<usize> = loader
            .iter()
            .map(|batch: DehazeBatch<TestBackend>| {
                assert_eq!(batch.noisy.dims()[0], batch.clean.dims()[0]);
                batch.noisy.dims()[0]
            })
            .collect();
        assert_eq!(sizes, vec![8, 8, 4]);
    }

    #[test]
    fn model_range_round_trips() {
        let device = Default::default();
        let t = Tensor::<TestBackend, 1>::from_floats([0.0, 0.5, 1.0], &device);
        let mapped = to_model_range(t.clone());
        assert_eq!(mapped.to_data().to_vec::<f32>().unwrap(), vec![-1.0, 0.0, 1.0]);
        let back = from_model_range(mapped);
        assert_eq!(back.to_data().to_vec::<f32>().unwrap(), vec![0.0, 0.5, 1.0]);
    }
}
