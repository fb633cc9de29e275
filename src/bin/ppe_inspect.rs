//! ppe_inspect - single-shot PPE check of one image file

use anyhow::{anyhow, Context, Result};
use clap::Parser;
use std::path::PathBuf;

use ppe_monitor::compliance::PpeCategory;
use ppe_monitor::encode::encode_jpeg;
use ppe_monitor::inspect::decode_image;
use ppe_monitor::{
    Annotator, ComplianceAggregator, Inspector, MonitorConfig, PpeDetector, RequiredSet,
};

#[derive(Parser, Debug)]
#[command(author, version, about)]
struct Args {
    /// Image to inspect (JPEG or PNG).
    image: PathBuf,
    /// Where to write the annotated JPEG.
    #[arg(long, default_value = "annotated.jpg")]
    out: PathBuf,
    /// Model path; overrides PPE_MODEL_PATH.
    #[arg(long)]
    model: Option<PathBuf>,
    /// Confidence threshold; overrides PPE_CONFIDENCE_THRESHOLD.
    #[arg(long)]
    confidence: Option<f32>,
    /// Required categories as csv, e.g. "helmet,gloves".
    #[arg(long)]
    required: Option<String>,
}

fn main() -> Result<()> {
    let args = Args::parse();
    let mut cfg = MonitorConfig::load().context("load configuration")?;
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(&cfg.log_level))
        .init();

    if let Some(model) = args.model {
        cfg.model.path = model;
    }
    if let Some(required) = args.required.as_deref() {
        let categories = required
            .split(',')
            .map(str::trim)
            .filter(|name| !name.is_empty())
            .map(|name| {
                PpeCategory::from_class_name(name)
                    .ok_or_else(|| anyhow!("unknown PPE category '{}'", name))
            })
            .collect::<Result<Vec<_>>>()?;
        cfg.required = RequiredSet::new(categories)?;
    }
    let threshold = args.confidence.unwrap_or(cfg.model.confidence_threshold);

    let bytes = std::fs::read(&args.image)
        .with_context(|| format!("read image {}", args.image.display()))?;
    let image = decode_image(&bytes)?;
    let mut detector = PpeDetector::load(&cfg.model)?;

    let inspector = Inspector::new(
        ComplianceAggregator::new(cfg.required.clone()),
        Annotator::default(),
    );
    let inspection = inspector.inspect(&mut detector, &image, threshold)?;

    let jpeg = encode_jpeg(&inspection.annotated, cfg.jpeg_quality)?;
    std::fs::write(&args.out, jpeg)
        .with_context(|| format!("write annotated image {}", args.out.display()))?;
    log::info!("annotated image written to {}", args.out.display());

    let summary = serde_json::json!({
        "image": args.image.display().to_string(),
        "annotated": args.out.display().to_string(),
        "detections": inspection.detections,
        "compliant": inspection.record.compliant,
        "missing": inspection.record.missing,
    });
    println!("{}", serde_json::to_string_pretty(&summary)?);
    Ok(())
}
