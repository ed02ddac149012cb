//! Image Classifier CLI
//!
//! Main entry point: trains (or loads) a classifier from an assets folder and
//! classifies the images in its test folder.

use std::path::{Path, PathBuf};

use anyhow::{bail, Result};
use clap::{Args, Parser, Subcommand};
use colored::Colorize;
use tracing::info;

use image_classifier::backend::{backend_name, default_device, DefaultBackend};
use image_classifier::config::{AppConfig, BackendConfig, BackendKind, PretrainedGraphConfig};
use image_classifier::dataset::{
    ClassFolderSource, FlatFolderSource, LabeledDataset, PayloadKind, PayloadMode, SampleSource,
};
use image_classifier::inference::{classify_all, format_prediction, PredictionEngine};
use image_classifier::model::TrainedModel;
use image_classifier::pipeline::DecodePolicy;
use image_classifier::strategy::{ClassifierBackend, FeatureBackend};
use image_classifier::utils::format_duration;
use image_classifier::utils::logging::{init_logging, LogConfig, LogLevel, TrainingLogger};
use image_classifier::{ModelCache, Trainer};

/// Folder-driven image classification with Burn
///
/// Trains a classifier from `<assets>/<training-folder>/<label>/<image>` and
/// classifies every image in `<assets>/<test-folder>`.
#[derive(Parser, Debug)]
#[command(name = "image_classifier")]
#[command(author = "Warre Snaet")]
#[command(version = "0.1.0")]
#[command(about = "Train and run folder-driven image classifiers with Burn", long_about = None)]
struct Cli {
    #[command(flatten)]
    global: GlobalArgs,

    /// Subcommand to execute
    #[command(subcommand)]
    command: Commands,
}

#[derive(Args, Debug)]
struct GlobalArgs {
    /// Assets root (overrides the config file)
    #[arg(long, global = true)]
    assets: Option<PathBuf>,

    /// JSON configuration file
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Strategy: pretrained-graph or end-to-end
    #[arg(long, global = true)]
    backend: Option<String>,

    /// Random seed for reproducibility
    #[arg(long, global = true)]
    seed: Option<u64>,

    /// Always retrain and do not write the model file
    #[arg(long, global = true, default_value = "false")]
    no_cache: bool,

    /// Skip undecodable images instead of failing
    #[arg(long, global = true, default_value = "false")]
    skip_bad_images: bool,

    /// Enable verbose logging
    #[arg(short, long, global = true, default_value = "false")]
    verbose: bool,

    /// Only log errors
    #[arg(short, long, global = true, default_value = "false", conflicts_with = "verbose")]
    quiet: bool,

    /// Log level: trace, debug, info, warn or error
    #[arg(long, global = true, default_value = "info")]
    log_level: String,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Train or load the model, then classify the test folder
    Run,

    /// Train the model and save it
    Train,

    /// Classify images with a saved model
    Classify {
        /// Folder to classify (defaults to the configured test folder)
        #[arg(short, long)]
        input: Option<PathBuf>,
    },

    /// Print the stages of the selected strategy
    Pipeline,

    /// Write a freshly initialized feature graph file
    InitGraph {
        /// Output file (defaults to the configured graph file)
        #[arg(short, long)]
        output: Option<PathBuf>,

        /// Overwrite an existing file
        #[arg(long, default_value = "false")]
        force: bool,
    },

    /// Write the effective configuration as JSON
    WriteConfig {
        /// Output file
        #[arg(short, long, default_value = "assets/config.json")]
        output: PathBuf,
    },
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    let _ = init_logging(&log_config(&cli.global));

    let config = resolve_config(&cli.global)?;
    print_banner(&config);

    match cli.command {
        Commands::Run => cmd_run(&config)?,
        Commands::Train => cmd_train(&config)?,
        Commands::Classify { input } => cmd_classify(&config, input.as_deref())?,
        Commands::Pipeline => cmd_pipeline(&config)?,
        Commands::InitGraph { output, force } => cmd_init_graph(&config, output, force)?,
        Commands::WriteConfig { output } => {
            config.save(&output)?;
            println!("{} {}", "Configuration written to".green(), output.display());
        }
    }

    Ok(())
}

/// `--quiet` and `--verbose` take precedence over `--log-level`
fn log_config(args: &GlobalArgs) -> LogConfig {
    if args.quiet {
        LogConfig::quiet()
    } else if args.verbose {
        LogConfig::verbose()
    } else {
        LogConfig {
            level: LogLevel::parse(&args.log_level),
            ..LogConfig::default()
        }
    }
}

/// Config file (or defaults) with command-line overrides applied
fn resolve_config(args: &GlobalArgs) -> Result<AppConfig> {
    let mut config = match &args.config {
        Some(path) => AppConfig::load(path)?,
        None => AppConfig::default(),
    };

    if let Some(root) = &args.assets {
        config.assets.root = root.clone();
    }
    if let Some(backend) = &args.backend {
        let kind: BackendKind = backend.parse()?;
        if kind != config.backend.kind() {
            config.backend = BackendConfig::for_kind(kind);
        }
    }
    if let Some(seed) = args.seed {
        config.seed = seed;
    }
    if args.no_cache {
        config.use_cache = false;
    }
    if args.skip_bad_images {
        config.on_decode_error = DecodePolicy::Skip;
    }

    config.validate()?;
    Ok(config)
}

fn print_banner(config: &AppConfig) {
    println!("{}", "Image Classifier".green().bold());
    println!("  Backend:  {}", config.backend.kind());
    println!("  Assets:   {}", config.assets.root.display());
    println!("  Model:    {}", config.model_path().display());
    println!("  Device:   {}", backend_name());
    println!();
}

fn load_training_set(config: &AppConfig) -> image_classifier::Result<LabeledDataset> {
    let dir = config.assets.training_dir();
    let samples = ClassFolderSource::new(&dir, PayloadMode::Lazy).samples()?;
    let dataset = LabeledDataset::new(samples)?;
    println!(
        "{} {} images in {} classes from {}",
        "Loaded".cyan(),
        dataset.len(),
        dataset.classes().len(),
        dir.display()
    );
    Ok(dataset)
}

fn train_model(config: &AppConfig) -> image_classifier::Result<TrainedModel> {
    let dataset = load_training_set(config)?;
    let trainer = Trainer::new(config.backend_for_run(), config.seed);
    let mut logger = TrainingLogger::new();
    trainer.fit(&dataset, &mut logger)
}

fn classify_folder(config: &AppConfig, model: &TrainedModel, folder: &Path) -> Result<()> {
    let samples = FlatFolderSource::new(folder, PayloadMode::Lazy).samples()?;
    if samples.is_empty() {
        println!("{} no images found in {}", "Warning:".yellow(), folder.display());
        return Ok(());
    }

    let start = std::time::Instant::now();
    let engine = PredictionEngine::new(model);
    let output = classify_all(&engine, &samples, config.on_decode_error)?;

    println!();
    for prediction in &output.predictions {
        println!("{}", format_prediction(prediction));
    }
    if !output.skipped.is_empty() {
        println!(
            "{} {} images skipped: {}",
            "Warning:".yellow(),
            output.skipped.len(),
            output.skipped.join(", ")
        );
    }
    if let Some(accuracy) = output.accuracy() {
        println!("Accuracy: {:.2}%", accuracy * 100.0);
    }
    info!(
        "Classified {} images in {}",
        output.predictions.len(),
        format_duration(start.elapsed().as_secs_f64())
    );
    Ok(())
}

fn cmd_run(config: &AppConfig) -> Result<()> {
    let cache = ModelCache::new(config.model_path());
    let outcome = cache.get_or_train(config.use_cache, || train_model(config))?;

    if outcome.is_hit() {
        println!("{} {}", "Using cached model".green(), cache.path().display());
    } else {
        println!("{}", "Model trained".green());
    }

    classify_folder(config, outcome.model(), &config.assets.test_dir())
}

fn cmd_train(config: &AppConfig) -> Result<()> {
    let model = train_model(config)?;
    if config.use_cache {
        let cache = ModelCache::new(config.model_path());
        cache.save(&model)?;
        println!("{} {}", "Model saved to".green(), cache.path().display());
    } else {
        println!("{}", "Model trained (not saved: --no-cache)".yellow());
    }
    Ok(())
}

fn cmd_classify(config: &AppConfig, input: Option<&Path>) -> Result<()> {
    let cache = ModelCache::new(config.model_path());
    let Some(model) = cache.load()? else {
        bail!(
            "no trained model at {} (run `image_classifier train` first)",
            cache.path().display()
        );
    };

    let folder = input.map(Path::to_path_buf).unwrap_or_else(|| config.assets.test_dir());
    classify_folder(config, &model, &folder)
}

fn cmd_pipeline(config: &AppConfig) -> Result<()> {
    let backend = FeatureBackend::from_config(&config.backend_for_run());
    let pipeline = backend.pipeline(PayloadKind::Path)?;

    println!("{} ({} stages)", format!("{} pipeline", backend.kind()).cyan().bold(), pipeline.len());
    for (i, line) in pipeline.describe().iter().enumerate() {
        println!("  {}. {}", i + 1, line);
    }
    Ok(())
}

fn cmd_init_graph(config: &AppConfig, output: Option<PathBuf>, force: bool) -> Result<()> {
    // backend_for_run has already joined the graph file onto the assets root
    let graph_config = match config.backend_for_run() {
        BackendConfig::PretrainedGraph(graph) => graph,
        BackendConfig::EndToEnd(_) => {
            let graph = PretrainedGraphConfig::default();
            PretrainedGraphConfig {
                graph_file: config.assets.resolve(&graph.graph_file),
                ..graph
            }
        }
    };
    let path = output.unwrap_or(graph_config.graph_file);

    if path.exists() && !force {
        bail!("{} already exists (use --force to overwrite)", path.display());
    }

    let graph = graph_config
        .graph
        .init_seeded::<DefaultBackend>(config.seed, &default_device());
    graph.save_graph(&path)?;
    println!(
        "{} {} (seed {})",
        "Feature graph written to".green(),
        path.display(),
        config.seed
    );
    Ok(())
}
