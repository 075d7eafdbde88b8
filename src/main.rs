use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use indicatif::{ProgressBar, ProgressStyle};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use walkdir::WalkDir;

use grouprs::core::policy::STANDARD_PASS_RESOLUTION;
use grouprs::{
    CompareMethod, GroupingService, GroupingStrategy, HttpOracle, LocalOracle, OracleConfig,
    Photo, SimilarityOracle, ThumbnailService,
};

#[derive(Parser, Debug)]
#[command(name = "grouprs", version, about = "Groups visually similar photos")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Find groups of similar photos in a directory
    Group {
        /// Directory to scan
        #[arg(short, long, value_name = "DIR")]
        path: PathBuf,

        /// Similarity threshold in percent
        #[arg(short, long, default_value_t = 80.0)]
        threshold: f64,

        /// Grouping strategy
        #[arg(short, long, value_enum, default_value_t = GroupingStrategy::Recursive)]
        strategy: GroupingStrategy,

        /// Remote scoring endpoint; compares locally when omitted
        #[arg(long, value_name = "URL")]
        endpoint: Option<String>,

        /// Per-comparison timeout for the remote endpoint, in seconds
        #[arg(long, default_value_t = 10)]
        timeout: u64,

        /// Keep cached scores from a previous run instead of starting fresh
        #[arg(long)]
        cache_reuse: bool,

        /// Emit the partition as JSON instead of human-readable output
        #[arg(long)]
        json: bool,
    },

    /// Score a single pair of images
    Compare {
        #[arg(long, value_name = "FILE")]
        a: PathBuf,

        #[arg(long, value_name = "FILE")]
        b: PathBuf,

        #[arg(short, long, value_enum, default_value_t = CompareMethod::Pixel)]
        method: CompareMethod,

        /// Remote scoring endpoint; compares locally when omitted
        #[arg(long, value_name = "URL")]
        endpoint: Option<String>,

        #[arg(long, default_value_t = 10)]
        timeout: u64,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    env_logger::init();
    let cli = Cli::parse();

    match cli.command {
        Commands::Group {
            path,
            threshold,
            strategy,
            endpoint,
            timeout,
            cache_reuse,
            json,
        } => {
            let photos = scan_directory(&path)?;
            if photos.is_empty() {
                println!("No images found in {}", path.display());
                return Ok(());
            }

            let oracle = build_oracle(endpoint, timeout)?;
            let service = GroupingService::new(oracle);

            println!(
                "▶ Grouping {} photo(s) (strategy {}, threshold {})",
                photos.len(),
                strategy,
                threshold
            );
            let partition = service
                .group_photos(&photos, threshold, strategy, cache_reuse)
                .await
                .context("grouping run failed")?;

            if json {
                println!("{}", serde_json::to_string_pretty(&partition)?);
                return Ok(());
            }

            for skip in &partition.report.skipped {
                eprintln!("⚠️  Skipped {}: {}", skip.uri, skip.reason);
            }

            if partition.groups.is_empty() {
                println!("No similar photos found.");
            } else {
                for (i, group) in partition.groups.iter().enumerate() {
                    println!("\n✨ Group {}:", i + 1);
                    for photo in group {
                        println!("   ▶ {}", photo.uri);
                    }
                }
            }

            println!(
                "\n✅ {} group(s), {} oracle call(s), {} failed comparison(s) in {}ms",
                partition.groups.len(),
                partition.report.oracle_calls,
                partition.report.failed_comparisons,
                partition.report.elapsed_ms
            );
        }

        Commands::Compare {
            a,
            b,
            method,
            endpoint,
            timeout,
        } => {
            let oracle = build_oracle(endpoint, timeout)?;
            let thumbnails = ThumbnailService::new();
            let artifacts = tempfile::tempdir()?;

            let photo_a = Photo::new(a.to_string_lossy(), a.to_string_lossy());
            let photo_b = Photo::new(b.to_string_lossy(), b.to_string_lossy());
            let entry_a = thumbnails
                .preprocess(&photo_a, STANDARD_PASS_RESOLUTION, artifacts.path())
                .with_context(|| format!("Failed to preprocess {}", a.display()))?;
            let entry_b = thumbnails
                .preprocess(&photo_b, STANDARD_PASS_RESOLUTION, artifacts.path())
                .with_context(|| format!("Failed to preprocess {}", b.display()))?;

            let score = oracle
                .compare(&entry_a, &entry_b, method)
                .await
                .context("comparison failed")?;
            println!("similarity ({method}): {score:.1}");
        }
    }

    Ok(())
}

fn build_oracle(endpoint: Option<String>, timeout: u64) -> Result<Arc<dyn SimilarityOracle>> {
    match endpoint {
        Some(endpoint) => {
            let oracle = HttpOracle::new(OracleConfig {
                endpoint,
                timeout: Duration::from_secs(timeout),
            })
            .context("Failed to build oracle client")?;
            Ok(Arc::new(oracle))
        }
        None => Ok(Arc::new(LocalOracle::new())),
    }
}

/// Recursively walk `dir`, returning a photo per image file. The file path
/// doubles as the photo id.
fn scan_directory(dir: &Path) -> Result<Vec<Photo>> {
    let spinner = ProgressBar::new_spinner();
    spinner.set_style(ProgressStyle::with_template("{spinner:.green} {msg}")?);
    spinner.set_message("Scanning for images…");
    spinner.enable_steady_tick(Duration::from_millis(100));

    let allowed_exts = ["jpg", "jpeg", "png", "gif", "bmp", "tiff", "webp"];
    let mut photos = Vec::new();
    for entry in WalkDir::new(dir).into_iter().filter_map(Result::ok) {
        let path = entry.path();
        if path.is_file() {
            if let Some(ext) = path.extension().and_then(|s| s.to_str()) {
                if allowed_exts.contains(&ext.to_lowercase().as_str()) {
                    let uri = path.to_string_lossy().to_string();
                    photos.push(Photo::new(uri.clone(), uri));
                }
            }
        }
        spinner.tick();
    }
    spinner.finish_with_message("Scan complete");
    Ok(photos)
}
