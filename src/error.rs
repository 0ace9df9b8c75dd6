use std::path::PathBuf;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum DehazeError {
    #[error("path to {label} images not found: {}", path.display())]
    PathNotFound { label: String, path: PathBuf },

    #[error("no image files found in {}", .0.display())]
    EmptyDirectory(PathBuf),

    #[error("failed to read {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to decode image {}: {source}", path.display())]
    Decode {
        path: PathBuf,
        #[source]
        source: image::ImageError,
    },

    #[error("failed to write image {}: {source}", path.display())]
    Encode {
        path: PathBuf,
        #[source]
        source: image::ImageError,
    },

    #[error("clean and noisy images are not paired: {0}")]
    Pairing(String),

    #[error("tensor conversion failed: {0}")]
    Tensor(String),
}

pub type Result<T> = std::result::Result<T, DehazeError>;
