use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use facelens_core::recognizer::decide;
use facelens_core::MatchConfig;
use facelens_core::{
    BoundingBox, Decision, Embedding, EmbeddingStore, IdentityRecord, MemoryStore,
};
use facelens_geometry::{CameraConfig, MirrorPolicy, TransformState};
use facelens_pipeline::Config;
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "facelens", about = "facelens live face recognition tools")]
struct Cli {
    /// TOML config file (defaults to FACELENS_* environment variables)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Match a query embedding against a JSON gallery of identity records
    Match {
        /// Gallery file: JSON array of {identity_id, identity_name, embedding: {values}}
        #[arg(short, long)]
        gallery: PathBuf,
        /// Query embedding, comma separated (e.g. "1,0,0")
        #[arg(short, long)]
        query: String,
        /// Override the similarity threshold
        #[arg(short, long)]
        threshold: Option<f32>,
    },
    /// Map a detection box from sensor frame space onto the overlay
    MapBox {
        /// Sensor rotation in degrees (0, 90, 180, 270)
        #[arg(short, long, default_value_t = 0)]
        rotation: i32,
        /// Front-facing camera
        #[arg(long)]
        front: bool,
        /// Sensor size, WIDTHxHEIGHT
        #[arg(long)]
        sensor: String,
        /// Overlay size, WIDTHxHEIGHT
        #[arg(long)]
        overlay: String,
        /// Box in upright-image coordinates: x,y,width,height
        #[arg(long)]
        bbox: String,
        /// Override the configured mirror policy
        #[arg(long, value_enum)]
        mirror: Option<MirrorArg>,
    },
}

#[derive(Clone, Copy, ValueEnum)]
enum MirrorArg {
    Overlay,
    Image,
    None,
}

impl From<MirrorArg> for MirrorPolicy {
    fn from(arg: MirrorArg) -> Self {
        match arg {
            MirrorArg::Overlay => MirrorPolicy::Overlay,
            MirrorArg::Image => MirrorPolicy::Image,
            MirrorArg::None => MirrorPolicy::None,
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();
    let config = match &cli.config {
        Some(path) => Config::from_file(path)
            .with_context(|| format!("loading config {}", path.display()))?,
        None => Config::from_env(),
    };
    tracing::debug!(?config, "configuration loaded");

    match cli.command {
        Commands::Match {
            gallery,
            query,
            threshold,
        } => {
            let threshold = resolve_threshold(threshold, &config.matching)?;
            let query = Embedding::new(parse_floats(&query)?);

            let raw = std::fs::read_to_string(&gallery)
                .with_context(|| format!("reading gallery {}", gallery.display()))?;
            let records: Vec<IdentityRecord> =
                serde_json::from_str(&raw).context("parsing gallery JSON")?;
            if let Some(first) = records.first() {
                if first.embedding.dim() != query.dim() {
                    bail!(
                        "query has {} dimensions, gallery holds {}",
                        query.dim(),
                        first.embedding.dim()
                    );
                }
            }
            let store = MemoryStore::from_records(records)?;
            let records = store.len().await?;
            tracing::info!(records, threshold, "gallery loaded");

            let decision = match store.nearest_neighbor(&query).await? {
                Some(record) => decide(&query, &record, threshold),
                None => Decision::NotRecognized,
            };
            let similarity = match &decision {
                Decision::Recognized { similarity, .. } => Some(*similarity),
                Decision::NotRecognized => None,
            };
            println!(
                "{}",
                serde_json::json!({
                    "label": decision.label(),
                    "recognized": decision.is_recognized(),
                    "similarity": similarity,
                })
            );
        }
        Commands::MapBox {
            rotation,
            front,
            sensor,
            overlay,
            bbox,
            mirror,
        } => {
            let (sensor_width, sensor_height) = parse_size(&sensor)?;
            let (overlay_width, overlay_height) = parse_size(&overlay)?;
            let policy = mirror
                .map(MirrorPolicy::from)
                .unwrap_or(config.pipeline.mirror_policy);

            let camera = CameraConfig {
                rotation_degrees: rotation,
                is_front_facing: front,
                sensor_width,
                sensor_height,
            };
            let state = TransformState::build(camera, overlay_width, overlay_height, policy)?;

            let b = match parse_floats(&bbox)?.as_slice() {
                &[x, y, w, h] => BoundingBox::new(x, y, w, h),
                other => bail!("--bbox needs 4 numbers, got {}", other.len()),
            };
            let mapped = state.map_box(&b);
            println!(
                "{}",
                serde_json::json!({
                    "upright": [state.image.upright_width, state.image.upright_height],
                    "image_mirrored": state.image.mirrored,
                    "bbox": mapped,
                })
            );
        }
    }

    Ok(())
}

/// The `--threshold` override, held to the same range as the config file.
fn resolve_threshold(cli: Option<f32>, matching: &MatchConfig) -> Result<f32> {
    let Some(similarity_threshold) = cli else {
        return Ok(matching.similarity_threshold);
    };
    MatchConfig {
        similarity_threshold,
    }
    .validate()
    .context("--threshold")?;
    Ok(similarity_threshold)
}

fn parse_floats(s: &str) -> Result<Vec<f32>> {
    s.split(',')
        .map(|v| {
            v.trim()
                .parse::<f32>()
                .with_context(|| format!("not a number: {v:?}"))
        })
        .collect()
}

fn parse_size(s: &str) -> Result<(u32, u32)> {
    let (w, h) = s
        .split_once(|c| c == 'x' || c == 'X')
        .with_context(|| format!("expected WIDTHxHEIGHT, got {s:?}"))?;
    Ok((w.trim().parse()?, h.trim().parse()?))
}
