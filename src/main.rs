use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use simplegen::models::{DcganConfig, ImageShape};
use simplegen::{generate_from_checkpoint, run_training, ModelSpec, RunConfig};
use std::io::{self, IsTerminal};
use std::path::PathBuf;
use tracing::info;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer};

#[derive(Parser)]
#[command(name = "simplegen")]
#[command(about = "Train autoencoders, VAEs and DCGANs on image folders", long_about = None)]
struct Cli {
    /// Increase log verbosity (-v debug, -vv trace)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    /// Emit logs as JSON lines
    #[arg(long, global = true)]
    json_logs: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Train the model described by a run file
    Train {
        /// Run configuration (JSON or YAML)
        #[arg(short, long, default_value = "run.json")]
        config: PathBuf,
    },

    /// Write samples from a trained DCGAN generator
    Generate {
        /// Generator checkpoint file
        #[arg(short = 'k', long)]
        checkpoint: PathBuf,

        /// Output directory for sample_{i}.jpg files
        #[arg(short, long)]
        output: PathBuf,

        /// Number of samples
        #[arg(short, long, default_value_t = 16)]
        count: usize,

        /// Run file whose DCGAN settings and image shape built the checkpoint
        #[arg(short = 'c', long)]
        config: Option<PathBuf>,

        /// Noise seed
        #[arg(long)]
        seed: Option<u64>,
    },

    /// Validate a run file
    Validate {
        /// Run configuration to validate
        #[arg(short, long)]
        file: PathBuf,
    },

    /// Show build information
    Info,
}

fn init_logging(verbosity: u8, json_output: bool) {
    let default_level = match verbosity {
        0 => "simplegen=info",
        1 => "simplegen=debug",
        _ => "simplegen=trace",
    };
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));

    if json_output {
        let json_layer = fmt::layer()
            .json()
            .with_current_span(true)
            .with_filter(env_filter);
        tracing_subscriber::registry().with(json_layer).init();
    } else {
        let fmt_layer = fmt::layer()
            .with_target(false)
            .with_ansi(io::stderr().is_terminal())
            .with_writer(io::stderr)
            .with_filter(env_filter);
        tracing_subscriber::registry().with(fmt_layer).init();
    }
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(cli.verbose, cli.json_logs);

    match cli.command {
        Commands::Train { config } => train(config)?,
        Commands::Generate {
            checkpoint,
            output,
            count,
            config,
            seed,
        } => generate(checkpoint, output, count, config, seed)?,
        Commands::Validate { file } => validate_config(file)?,
        Commands::Info => show_system_info(),
    }

    Ok(())
}

fn train(config_path: PathBuf) -> Result<()> {
    let run = RunConfig::from_file(&config_path).context("Failed to load run configuration")?;
    info!(
        "Training {} on {} ({}x{}x{})",
        run.model.name(),
        run.data.dir.display(),
        run.data.height,
        run.data.width,
        run.data.channels
    );

    let report = run_training(&run, &candle_core::Device::Cpu).context("Training failed")?;
    if let Some(last) = report.history.last() {
        info!("Final epoch: {}", last.summary());
    }
    if report.samples_written > 0 {
        if let Some(dir) = &run.sample_dir {
            info!("Wrote {} samples to {}", report.samples_written, dir.display());
        }
    }
    Ok(())
}

fn generate(
    checkpoint: PathBuf,
    output: PathBuf,
    count: usize,
    config_path: Option<PathBuf>,
    seed: Option<u64>,
) -> Result<()> {
    let (config, shape) = match config_path {
        Some(path) => {
            let run = RunConfig::from_file(&path).context("Failed to load run configuration")?;
            match run.model {
                ModelSpec::Dcgan { config, .. } => (config, run.data.image_shape()),
                other => anyhow::bail!("{} does not describe a DCGAN (found {})", path.display(), other.name()),
            }
        }
        None => (DcganConfig::default(), ImageShape::new(28, 28, 1)),
    };

    std::fs::create_dir_all(&output).context("Failed to create output directory")?;
    let written = generate_from_checkpoint(
        &config,
        &checkpoint,
        shape,
        count,
        &output,
        seed,
        &candle_core::Device::Cpu,
    )
    .context("Failed to generate samples")?;

    info!("Wrote {} samples to {}", written, output.display());
    Ok(())
}

fn validate_config(config_path: PathBuf) -> Result<()> {
    info!("Validating run file: {}", config_path.display());

    // from_file validates after loading
    let run = RunConfig::from_file(&config_path).context("Failed to load run configuration")?;

    info!("Configuration is valid");
    info!("  - Model: {}", run.model.name());
    info!(
        "  - Data: {} ({}x{}x{}, batch size {})",
        run.data.dir.display(),
        run.data.height,
        run.data.width,
        run.data.channels,
        run.data.batch_size
    );
    info!("  - Samples: {}", run.samples);
    Ok(())
}

fn show_system_info() {
    println!("SimpleGen - generative image models");
    println!();
    println!("Version: {}", env!("CARGO_PKG_VERSION"));
    println!();
    println!("Models:");
    println!("  - convolutional autoencoder (kind: autoencoder)");
    println!("  - variational autoencoder (kind: vae)");
    println!("  - DCGAN (kind: dcgan)");
    println!();
    println!("Hardware support:");

    #[cfg(feature = "cuda")]
    println!("  + NVIDIA CUDA (compiled)");
    #[cfg(not(feature = "cuda"))]
    println!("  - CUDA (not compiled)");

    #[cfg(feature = "metal")]
    println!("  + Apple Metal (compiled)");
    #[cfg(not(feature = "metal"))]
    println!("  - Metal (not compiled)");

    println!("  + CPU");
    println!();
    println!("Usage:");
    println!("  simplegen train -c run.yaml");
    println!("  simplegen generate -k out/generator_checkpoint -o samples -c run.yaml");
    println!("  simplegen validate -f run.yaml");
    println!("  simplegen info");
    println!();
    println!("Environment overrides use the SIMPLEGEN__ prefix, e.g. SIMPLEGEN__MODEL__FIT__EPOCHS=5");
}
