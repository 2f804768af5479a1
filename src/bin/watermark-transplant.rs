use std::path::PathBuf;
use std::process;

use clap::{ArgAction, Parser, ValueEnum};
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use watermark_transplant::inference::ChannelOrder;
use watermark_transplant::onnx::{OnnxAdapter, OnnxConfig};
use watermark_transplant::{
    pair_directories, ImagePair, PaddingPolicy, ProcessOptions, SharedAdapter, TransplantEngine,
    DEFAULT_CONFIDENCE_THRESHOLD, DEFAULT_JPEG_QUALITY, DEFAULT_OUTPUT_PREFIX,
};

#[derive(Clone, Copy, Debug, ValueEnum)]
enum Policy {
    /// Stretch right-half detections to the image edge, widen the rest
    ExtendRight,
    /// Pad all four sides equally
    Symmetric,
}

#[derive(Clone, Copy, Debug, ValueEnum)]
enum InputOrder {
    /// [1, 3, H, W]
    Nchw,
    /// [1, H, W, 3]
    Nhwc,
}

#[derive(Parser)]
#[command(
    name = "watermark-transplant",
    about = "Remove watermarks by copying the detected region from a clean reference image",
    version,
    after_help = "Example: watermark-transplant --model wm.onnx --pair photo.jpg photo_clean.jpg -o out\n\n\
                  NOTE: the reference image must show the same scene without the watermark;\n\
                  pixels are replaced, not inpainted."
)]
struct Cli {
    /// ONNX detection model file
    #[arg(short, long)]
    model: PathBuf,

    /// Square model input size in pixels
    #[arg(long, default_value_t = 640)]
    input_size: u32,

    /// Intra-op threads for the model runtime (runtime default if unset)
    #[arg(long)]
    threads: Option<usize>,

    /// Model input memory order
    #[arg(long, value_enum, default_value_t = InputOrder::Nchw)]
    input_order: InputOrder,

    /// A watermarked image and its clean reference (repeatable)
    #[arg(
        long,
        num_args = 2,
        value_names = ["WATERMARKED", "REFERENCE"],
        action = ArgAction::Append
    )]
    pair: Vec<PathBuf>,

    /// Directory of watermarked images, paired by file name with --reference-dir
    #[arg(long, requires = "reference_dir")]
    watermarked_dir: Option<PathBuf>,

    /// Directory of clean reference images
    #[arg(long, requires = "watermarked_dir")]
    reference_dir: Option<PathBuf>,

    /// Output directory
    #[arg(short, long, default_value = "cleaned")]
    output_dir: PathBuf,

    /// Detection confidence threshold (0.0-1.0)
    #[arg(short, long, default_value_t = DEFAULT_CONFIDENCE_THRESHOLD)]
    confidence: f32,

    /// Padding added around the detected box, as a fraction of its size
    #[arg(short, long, default_value_t = 0.1)]
    padding: f32,

    /// Region widening policy
    #[arg(long, value_enum, default_value_t = Policy::ExtendRight)]
    policy: Policy,

    /// Width multiplier for left-half detections (extend-right policy)
    #[arg(long, default_value_t = 3.5)]
    widen_factor: f32,

    /// Output file name prefix
    #[arg(long, default_value = DEFAULT_OUTPUT_PREFIX)]
    prefix: String,

    /// JPEG output quality (1-100)
    #[arg(long, default_value_t = DEFAULT_JPEG_QUALITY)]
    jpeg_quality: u8,

    /// Enable verbose output
    #[arg(short, long, conflicts_with = "quiet")]
    verbose: bool,

    /// Suppress all non-error output
    #[arg(short, long)]
    quiet: bool,
}

fn init_logging(cli: &Cli) {
    let default_level = if cli.verbose {
        "debug"
    } else if cli.quiet {
        "warn"
    } else {
        "info"
    };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));

    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();
}

fn collect_pairs(cli: &Cli) -> Vec<ImagePair> {
    let mut pairs: Vec<ImagePair> = cli
        .pair
        .chunks_exact(2)
        .map(|p| ImagePair::new(&p[0], &p[1]))
        .collect();

    if let (Some(wm_dir), Some(ref_dir)) = (&cli.watermarked_dir, &cli.reference_dir) {
        match pair_directories(wm_dir, ref_dir) {
            Ok(found) => pairs.extend(found),
            Err(e) => {
                error!("failed to pair directories: {e}");
                process::exit(1);
            }
        }
    }

    pairs
}

fn main() {
    let cli = Cli::parse();
    init_logging(&cli);

    let policy = match cli.policy {
        Policy::ExtendRight => PaddingPolicy::ExtendRight {
            widen_factor: cli.widen_factor,
        },
        Policy::Symmetric => PaddingPolicy::Symmetric,
    };

    let opts = ProcessOptions {
        confidence_threshold: cli.confidence,
        padding_ratio: cli.padding,
        policy,
        output_prefix: cli.prefix.clone(),
        jpeg_quality: cli.jpeg_quality,
    };

    let pairs = collect_pairs(&cli);
    if pairs.is_empty() {
        error!("no image pairs given; use --pair or --watermarked-dir/--reference-dir");
        process::exit(1);
    }

    let config = OnnxConfig {
        input_size: cli.input_size,
        channel_order: match cli.input_order {
            InputOrder::Nchw => ChannelOrder::Nchw,
            InputOrder::Nhwc => ChannelOrder::Nhwc,
        },
        intra_threads: cli.threads,
        ..OnnxConfig::new(&cli.model)
    };
    let engine = TransplantEngine::new(SharedAdapter::lazy(move || OnnxAdapter::load(&config)));

    info!(
        pairs = pairs.len(),
        threshold = opts.confidence_threshold,
        padding = opts.padding_ratio,
        "processing"
    );

    let report = match engine.process_batch(&pairs, &cli.output_dir, &opts) {
        Ok(report) => report,
        Err(e) => {
            error!("Fatal: {e}");
            process::exit(1);
        }
    };

    let log = report.log();
    if cli.quiet {
        for line in log.lines().filter(|l| l.starts_with("[FAIL]")) {
            eprintln!("{line}");
        }
    } else {
        eprint!("{log}");
        eprintln!();
        eprint!("[Summary] Repaired: {}", report.success_count());
        if report.not_found_count() > 0 {
            eprint!(", Not found: {}", report.not_found_count());
        }
        if report.failed_count() > 0 {
            eprint!(", Failed: {}", report.failed_count());
        }
        eprintln!(" (Total: {})", report.results.len());
    }

    if report.failed_count() > 0 {
        process::exit(1);
    }
}
