use crate::error::{DehazeError, Result};
use crate::model::{
    architecture::GeneratorModel,
    constants::{HEIGHT, WIDTH},
    data::{ImageSample, decode_image, from_model_range, to_model_range},
    training::TrainingConfig,
};
use crate::utils::{chw_vec_to_image, float_vec_to_image, side_by_side};

use burn::{prelude::*, record::CompactRecorder};
use image::{DynamicImage, RgbImage};
use std::path::{Path, PathBuf};
use tracing::{error, info};

const GENERATOR_FILE: &str = "generator";

/// The preprocessed input next to the generator's output, both 256x256.
pub struct Comparison {
    pub input: RgbImage,
    pub output: RgbImage,
}

/// A trained generator ready to dehaze single images.
pub struct Dehazer<B: Backend> {
    generator: GeneratorModel<B>,
    device: B::Device,
}

impl<B: Backend> Dehazer<B> {
    pub fn new(generator: GeneratorModel<B>) -> Self {
        let device = generator.devices().into_iter().next().unwrap_or_default();
        Self { generator, device }
    }

    /// Restores a generator written by [`Dehazer::save`] next to its `config.json`.
    pub fn load<P: AsRef<Path>>(artifact_dir: P, device: &B::Device) -> anyhow::Result<Self> {
        let dir = artifact_dir.as_ref();
        let config_path = dir.join("config.json");
        let config = TrainingConfig::load(&config_path).map_err(|err| {
            anyhow::anyhow!("failed to load {}: {err:?}", config_path.display())
        })?;

        let generator = config
            .model
            .init_generator::<B>(device)
            .load_file(dir.join(GENERATOR_FILE), &CompactRecorder::new(), device)
            .map_err(|err| {
                anyhow::anyhow!("failed to load generator from {}: {err:?}", dir.display())
            })?;
        info!("loaded generator from {}", dir.display());
        Ok(Self::new(generator))
    }

    pub fn save<P: AsRef<Path>>(&self, artifact_dir: P) -> anyhow::Result<()> {
        let dir = artifact_dir.as_ref();
        self.generator
            .clone()
            .save_file(dir.join(GENERATOR_FILE), &CompactRecorder::new())
            .map_err(|err| {
                anyhow::anyhow!("failed to save generator to {}: {err:?}", dir.display())
            })?;
        info!("saved generator to {}", dir.display());
        Ok(())
    }

    fn run(&self, sample: ImageSample) -> Result<RgbImage> {
        let input: Tensor<B, 4> = sample.into_tensor::<B>(&self.device).unsqueeze();
        let output = self.generator.forward(to_model_range(input));
        let output: Tensor<B, 3> = from_model_range(output).clamp(0.0, 1.0).squeeze(0);

        let data = output
            .into_data()
            .convert::<f32>()
            .to_vec::<f32>()
            .map_err(|err| DehazeError::Tensor(format!("{err:?}")))?;
        chw_vec_to_image(&data, HEIGHT, WIDTH)
            .ok_or_else(|| DehazeError::Tensor(format!("unexpected output length {}", data.len())))
    }

    /// Preprocesses like the training data, runs the generator and returns an 8-bit image.
    pub fn infer(&self, image: &DynamicImage) -> Result<RgbImage> {
        self.run(ImageSample::from_image(image))
    }

    pub fn infer_file<P: AsRef<Path>>(&self, path: P) -> Result<Comparison> {
        let sample = ImageSample::from_image(&decode_image(path)?);
        let input = float_vec_to_image(&sample.pixels, HEIGHT, WIDTH)
            .ok_or_else(|| DehazeError::Tensor("input sample has unexpected length".into()))?;
        let output = self.run(sample)?;
        Ok(Comparison { input, output })
    }

    /// Writes `<stem>_dehazed.png` into `output_dir`: input on the left, output on the right.
    pub fn render_comparison<P: AsRef<Path>, Q: AsRef<Path>>(
        &self,
        path: P,
        output_dir: Q,
    ) -> Result<PathBuf> {
        let path = path.as_ref();
        let output_dir = output_dir.as_ref();
        let comparison = self.infer_file(path)?;

        std::fs::create_dir_all(output_dir).map_err(|source| DehazeError::Io {
            path: output_dir.to_path_buf(),
            source,
        })?;
        let stem = path
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_else(|| "image".to_string());
        let out_path = output_dir.join(format!("{stem}_dehazed.png"));

        side_by_side(&comparison.input, &comparison.output)
            .save(&out_path)
            .map_err(|source| DehazeError::Encode {
                path: out_path.clone(),
                source,
            })?;
        Ok(out_path)
    }

    /// Renders each path in turn. A failing image is logged and skipped.
    /// Returns the number of images rendered.
    pub fn render_all<I, P>(&self, paths: I, output_dir: &Path) -> usize
    where
        I: IntoIterator<Item = P>,
        P: AsRef<Path>,
    {
        let mut rendered = 0;
        for path in paths {
            let path = path.as_ref();
            match self.render_comparison(path, output_dir) {
                Ok(out_path) => {
                    info!("{} -> {}", path.display(), out_path.display());
                    rendered += 1;
                }
                Err(err) => error!("error processing file {}: {}", path.display(), err),
            }
        }
        rendered
    }
}
