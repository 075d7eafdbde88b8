use async_trait::async_trait;
use image::imageops::{self, FilterType};
use image::RgbImage;

use crate::core::photo::ThumbnailEntry;
use crate::services::oracle::{CompareMethod, OracleError, SimilarityOracle};

/// Frame size both payloads are normalized to before pixel differencing.
const PIXEL_COMPARE_SIZE: u32 = 20;

/// Bins per channel for the color histogram method.
const HISTOGRAM_BINS: u32 = 8;

/// In-process similarity oracle implementing the same scoring algorithms as
/// the remote endpoint, so grouping works without a network service.
#[derive(Debug, Default)]
pub struct LocalOracle;

impl LocalOracle {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl SimilarityOracle for LocalOracle {
    async fn compare(
        &self,
        a: &ThumbnailEntry,
        b: &ThumbnailEntry,
        method: CompareMethod,
    ) -> Result<f64, OracleError> {
        let img_a = decode(&a.payload)?;
        let img_b = decode(&b.payload)?;

        let score = match method {
            CompareMethod::Pixel => pixel_score(&img_a, &img_b),
            CompareMethod::ColorHistogram => histogram_score(&img_a, &img_b),
        };

        Ok(score.clamp(0.0, 100.0))
    }
}

fn decode(payload: &[u8]) -> Result<RgbImage, OracleError> {
    image::load_from_memory(payload)
        .map(|img| img.to_rgb8())
        .map_err(|err| OracleError::Protocol(format!("undecodable payload: {err}")))
}

/// Mean absolute pixel difference on a normalized frame, inverted into a
/// similarity percentage.
fn pixel_score(a: &RgbImage, b: &RgbImage) -> f64 {
    let a = imageops::resize(a, PIXEL_COMPARE_SIZE, PIXEL_COMPARE_SIZE, FilterType::Triangle);
    let b = imageops::resize(b, PIXEL_COMPARE_SIZE, PIXEL_COMPARE_SIZE, FilterType::Triangle);

    let mut diff = 0.0f64;
    for (pa, pb) in a.pixels().zip(b.pixels()) {
        for channel in 0..3 {
            diff += (f64::from(pa[channel]) - f64::from(pb[channel])).abs();
        }
    }

    let max_diff = f64::from(PIXEL_COMPARE_SIZE * PIXEL_COMPARE_SIZE * 3) * 255.0;
    (1.0 - diff / max_diff) * 100.0
}

/// Correlation of 8x8x8 RGB histograms, scaled to a percentage.
fn histogram_score(a: &RgbImage, b: &RgbImage) -> f64 {
    let hist_a = histogram(a);
    let hist_b = histogram(b);
    correlation(&hist_a, &hist_b) * 100.0
}

fn histogram(img: &RgbImage) -> Vec<f64> {
    let bins = HISTOGRAM_BINS as usize;
    let bin_width = 256 / HISTOGRAM_BINS;
    let mut hist = vec![0.0f64; bins * bins * bins];

    for pixel in img.pixels() {
        let r = (u32::from(pixel[0]) / bin_width) as usize;
        let g = (u32::from(pixel[1]) / bin_width) as usize;
        let b = (u32::from(pixel[2]) / bin_width) as usize;
        hist[(r * bins + g) * bins + b] += 1.0;
    }

    hist
}

/// Pearson correlation. Normalization of the histograms cancels out here,
/// so raw counts are fine.
fn correlation(x: &[f64], y: &[f64]) -> f64 {
    let n = x.len() as f64;
    let mean_x = x.iter().sum::<f64>() / n;
    let mean_y = y.iter().sum::<f64>() / n;

    let mut covariance = 0.0;
    let mut var_x = 0.0;
    let mut var_y = 0.0;
    for (&xi, &yi) in x.iter().zip(y.iter()) {
        let dx = xi - mean_x;
        let dy = yi - mean_y;
        covariance += dx * dy;
        var_x += dx * dx;
        var_y += dy * dy;
    }

    if var_x == 0.0 || var_y == 0.0 {
        return if x == y { 1.0 } else { 0.0 };
    }

    covariance / (var_x * var_y).sqrt()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::photo::PhotoId;
    use image::codecs::jpeg::JpegEncoder;
    use image::{ImageBuffer, Rgb};
    use std::io::Cursor;
    use std::path::PathBuf;

    fn solid_entry(id: &str, color: [u8; 3]) -> ThumbnailEntry {
        let img: RgbImage = ImageBuffer::from_pixel(20, 20, Rgb(color));
        let mut cursor = Cursor::new(Vec::new());
        let encoder = JpegEncoder::new_with_quality(&mut cursor, 85);
        img.write_with_encoder(encoder).unwrap();

        ThumbnailEntry {
            id: PhotoId::new(id),
            original_uri: format!("/photos/{id}.jpg"),
            compressed_path: PathBuf::new(),
            payload: cursor.into_inner(),
        }
    }

    #[tokio::test]
    async fn identical_payloads_score_100_on_pixel() {
        let oracle = LocalOracle::new();
        let a = solid_entry("a", [200, 30, 30]);
        let b = a.clone();

        let score = oracle.compare(&a, &b, CompareMethod::Pixel).await.unwrap();
        assert_eq!(score, 100.0);
    }

    #[tokio::test]
    async fn different_colors_score_low_on_pixel() {
        let oracle = LocalOracle::new();
        let red = solid_entry("red", [255, 0, 0]);
        let blue = solid_entry("blue", [0, 0, 255]);

        let score = oracle
            .compare(&red, &blue, CompareMethod::Pixel)
            .await
            .unwrap();
        assert!(score < 50.0, "expected low similarity, got {score}");
    }

    #[tokio::test]
    async fn histogram_self_similarity_is_100() {
        let oracle = LocalOracle::new();
        let a = solid_entry("a", [10, 200, 90]);
        let b = a.clone();

        let score = oracle
            .compare(&a, &b, CompareMethod::ColorHistogram)
            .await
            .unwrap();
        assert_eq!(score, 100.0);
    }

    #[tokio::test]
    async fn histogram_distinguishes_colors() {
        let oracle = LocalOracle::new();
        let red = solid_entry("red", [255, 0, 0]);
        let blue = solid_entry("blue", [0, 0, 255]);

        let score = oracle
            .compare(&red, &blue, CompareMethod::ColorHistogram)
            .await
            .unwrap();
        assert!(score < 10.0, "expected near-zero similarity, got {score}");
    }

    #[tokio::test]
    async fn garbage_payload_is_a_protocol_error() {
        let oracle = LocalOracle::new();
        let mut bad = solid_entry("bad", [0, 0, 0]);
        bad.payload = vec![0xde, 0xad, 0xbe, 0xef];
        let good = solid_entry("good", [0, 0, 0]);

        let result = oracle.compare(&bad, &good, CompareMethod::Pixel).await;
        assert!(matches!(result, Err(OracleError::Protocol(_))));
    }
}
