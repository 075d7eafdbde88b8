use image::codecs::jpeg::JpegEncoder;
use image::imageops::FilterType;
use rayon::prelude::*;
use std::fs;
use std::io::Cursor;
use std::path::{Path, PathBuf};
use tempfile::TempDir;
use thiserror::Error;

use crate::core::photo::{Photo, SkippedPhoto, ThumbnailEntry};
use crate::core::policy::Resolution;

#[derive(Debug, Error)]
pub enum PreprocessError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Image processing error: {0}")]
    Image(#[from] image::ImageError),

    #[error("Invalid path: {path}")]
    InvalidPath { path: String },

    #[error("Preprocessing worker failed: {0}")]
    Worker(String),
}

/// Thumbnails produced for one clustering pass at one resolution.
///
/// The compressed artifacts live in `artifacts`; dropping the batch after
/// clustering for that resolution completes releases them.
#[derive(Debug)]
pub struct ThumbnailBatch {
    pub entries: Vec<ThumbnailEntry>,
    pub skipped: Vec<SkippedPhoto>,
    artifacts: TempDir,
}

impl ThumbnailBatch {
    pub fn artifact_dir(&self) -> &Path {
        self.artifacts.path()
    }
}

/// Downsamples photos into transmittable JPEG payloads.
///
/// Deterministic: the same photo bytes, resolution and quality always yield
/// the same payload.
pub struct ThumbnailService {
    quality: u8,
}

impl ThumbnailService {
    pub fn new() -> Self {
        Self { quality: 85 }
    }

    /// Preprocess a single photo at the target resolution, writing the
    /// compressed artifact into `artifact_dir`.
    pub fn preprocess(
        &self,
        photo: &Photo,
        resolution: Resolution,
        artifact_dir: &Path,
    ) -> Result<ThumbnailEntry, PreprocessError> {
        let source = Path::new(&photo.uri);
        if !source.exists() {
            return Err(PreprocessError::InvalidPath {
                path: photo.uri.clone(),
            });
        }

        let img = image::open(source)?;
        // The similarity oracle compares fixed-size frames, so the resize is
        // exact rather than aspect-preserving.
        let resized = img.resize_exact(resolution.width, resolution.height, FilterType::Triangle);
        let rgb = resized.to_rgb8();

        let mut cursor = Cursor::new(Vec::new());
        let encoder = JpegEncoder::new_with_quality(&mut cursor, self.quality);
        rgb.write_with_encoder(encoder)?;
        let payload = cursor.into_inner();

        let compressed_path = artifact_dir.join(artifact_name(photo.id.as_str(), resolution));
        fs::write(&compressed_path, &payload)?;

        Ok(ThumbnailEntry {
            id: photo.id.clone(),
            original_uri: photo.uri.clone(),
            compressed_path,
            payload,
        })
    }

    /// Preprocess a whole working set in parallel. Photos that cannot be
    /// decoded or resized are skipped and reported, not fatal to the batch.
    pub async fn preprocess_batch(
        &self,
        photos: &[Photo],
        resolution: Resolution,
    ) -> Result<ThumbnailBatch, PreprocessError> {
        let artifacts = tempfile::tempdir()?;
        let artifact_dir = artifacts.path().to_path_buf();
        let photos = photos.to_vec();
        let quality = self.quality;

        let results = tokio::task::spawn_blocking(move || {
            let service = ThumbnailService { quality };
            photos
                .par_iter()
                .map(|photo| {
                    service
                        .preprocess(photo, resolution, &artifact_dir)
                        .map_err(|err| SkippedPhoto {
                            id: photo.id.clone(),
                            uri: photo.uri.clone(),
                            reason: err.to_string(),
                        })
                })
                .collect::<Vec<_>>()
        })
        .await
        .map_err(|err| PreprocessError::Worker(err.to_string()))?;

        let mut entries = Vec::new();
        let mut skipped = Vec::new();
        for result in results {
            match result {
                Ok(entry) => entries.push(entry),
                Err(skip) => {
                    log::warn!("excluding photo {} from run: {}", skip.id, skip.reason);
                    skipped.push(skip);
                }
            }
        }

        Ok(ThumbnailBatch {
            entries,
            skipped,
            artifacts,
        })
    }
}

impl Default for ThumbnailService {
    fn default() -> Self {
        Self::new()
    }
}

fn artifact_name(photo_id: &str, resolution: Resolution) -> String {
    let safe: String = photo_id
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() { c } else { '_' })
        .collect();
    format!("{}_{}.jpg", safe, resolution)
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::GenericImageView;
    use tempfile::TempDir;

    fn create_test_image(path: &Path, width: u32, height: u32) {
        use image::{ImageBuffer, Rgb};

        let img = ImageBuffer::from_fn(width, height, |x, y| {
            let intensity = ((x + y) % 256) as u8;
            Rgb([intensity, intensity, intensity])
        });

        img.save(path).unwrap();
    }

    #[test]
    fn preprocess_resizes_to_exact_resolution() {
        let temp_dir = TempDir::new().unwrap();
        let source = temp_dir.path().join("photo.jpg");
        create_test_image(&source, 640, 480);

        let service = ThumbnailService::new();
        let photo = Photo::new("p1", source.to_string_lossy());
        let entry = service
            .preprocess(&photo, Resolution::square(30), temp_dir.path())
            .unwrap();

        assert!(!entry.payload.is_empty());
        assert!(entry.compressed_path.exists());

        let thumb = image::load_from_memory(&entry.payload).unwrap();
        assert_eq!(thumb.dimensions(), (30, 30));
    }

    #[test]
    fn preprocess_is_deterministic() {
        let temp_dir = TempDir::new().unwrap();
        let source = temp_dir.path().join("photo.jpg");
        create_test_image(&source, 200, 100);

        let service = ThumbnailService::new();
        let photo = Photo::new("p1", source.to_string_lossy());

        let first = service
            .preprocess(&photo, Resolution::new(40, 40), temp_dir.path())
            .unwrap();
        let second = service
            .preprocess(&photo, Resolution::new(40, 40), temp_dir.path())
            .unwrap();

        assert_eq!(first.payload, second.payload);
    }

    #[test]
    fn preprocess_missing_file_fails() {
        let temp_dir = TempDir::new().unwrap();
        let service = ThumbnailService::new();
        let photo = Photo::new("gone", temp_dir.path().join("gone.jpg").to_string_lossy());

        let result = service.preprocess(&photo, Resolution::square(10), temp_dir.path());
        assert!(matches!(result, Err(PreprocessError::InvalidPath { .. })));
    }

    #[tokio::test]
    async fn batch_skips_undecodable_photos() {
        let temp_dir = TempDir::new().unwrap();
        let good = temp_dir.path().join("good.jpg");
        create_test_image(&good, 100, 100);
        let bad = temp_dir.path().join("bad.jpg");
        fs::write(&bad, b"not an image").unwrap();

        let service = ThumbnailService::new();
        let photos = vec![
            Photo::new("good", good.to_string_lossy()),
            Photo::new("bad", bad.to_string_lossy()),
        ];

        let batch = service
            .preprocess_batch(&photos, Resolution::square(10))
            .await
            .unwrap();

        assert_eq!(batch.entries.len(), 1);
        assert_eq!(batch.entries[0].id.as_str(), "good");
        assert_eq!(batch.skipped.len(), 1);
        assert_eq!(batch.skipped[0].id.as_str(), "bad");
        assert!(!batch.skipped[0].reason.is_empty());
    }

    #[tokio::test]
    async fn batch_artifacts_live_in_batch_directory() {
        let temp_dir = TempDir::new().unwrap();
        let source = temp_dir.path().join("photo.jpg");
        create_test_image(&source, 64, 64);

        let service = ThumbnailService::new();
        let photos = vec![Photo::new("p1", source.to_string_lossy())];
        let batch = service
            .preprocess_batch(&photos, Resolution::square(16))
            .await
            .unwrap();

        let artifact = batch.entries[0].compressed_path.clone();
        assert!(artifact.starts_with(batch.artifact_dir()));
        assert!(artifact.exists());

        drop(batch);
        assert!(!artifact.exists());
    }
}
