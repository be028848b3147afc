use std::fs;
use std::io::Write;
use std::path::PathBuf;

use anyhow::Context;
use candle_core::{DType, Device, Tensor};
use clap::{Args, Parser, Subcommand};
use seqgen_core::{generate::BigramOracle, BeamSearchStrategy};
use tracing::info;

use seqgen_cli::config::{DecodeConfig, OracleSection, SearchSection};
use seqgen_cli::logging::{self, LogFormat};
use seqgen_cli::report::DecodeReport;

#[derive(Parser)]
#[command(name = "seqgen", about = "Beam-search decoding over a bigram oracle")]
struct Cli {
    /// Log level when RUST_LOG is unset (e.g. debug, warn)
    #[arg(long, global = true)]
    log_level: Option<String>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Decode a batch with a bigram table and print the hypotheses as JSON
    Decode {
        #[command(flatten)]
        overrides: Overrides,
    },
    /// Print the merged configuration as TOML
    Config {
        #[command(flatten)]
        overrides: Overrides,

        /// Write the merged configuration back to the config file
        #[arg(long)]
        save: bool,
    },
}

/// Flags layered over the config file.
#[derive(Args)]
struct Overrides {
    /// Config file (default: ~/.config/seqgen/config.toml)
    #[arg(long)]
    config: Option<PathBuf>,

    /// JSON bigram table: {"logits": [[...], ...]}
    #[arg(long)]
    oracle: Option<PathBuf>,

    /// Number of source sequences
    #[arg(long)]
    batch: Option<usize>,

    /// Source length; bounds the generated length
    #[arg(long)]
    src_len: Option<usize>,

    /// Forced prefix, e.g. 1,5,7 (BOS is not added)
    #[arg(long, value_delimiter = ',')]
    prefix: Option<Vec<u32>>,

    #[arg(long)]
    beam_size: Option<usize>,

    #[arg(long)]
    max_len: Option<usize>,

    #[arg(long)]
    min_len: Option<usize>,

    /// Logit divisor; 0 leaves logits unscaled
    #[arg(long)]
    temperature: Option<f32>,

    /// Report only the best k hypotheses per source
    #[arg(long)]
    top: Option<usize>,
}

impl Overrides {
    fn as_config(&self) -> DecodeConfig {
        DecodeConfig {
            search: SearchSection {
                beam_size: self.beam_size,
                min_len: self.min_len,
                max_len: self.max_len,
                temperature: self.temperature,
                top: self.top,
                ..Default::default()
            },
            oracle: OracleSection {
                path: self.oracle.clone(),
                batch: self.batch,
                src_len: self.src_len,
                prefix: self.prefix.clone(),
            },
            ..Default::default()
        }
    }

    /// File config (or defaults) with these flags merged on top.
    fn resolve(&self) -> anyhow::Result<DecodeConfig> {
        let mut config = match &self.config {
            Some(path) => DecodeConfig::load_from(path)
                .with_context(|| format!("failed to load config from {}", path.display()))?,
            None => {
                if let Some(path) = DecodeConfig::default_path() {
                    if path.exists() {
                        eprintln!("Loaded config from: {}", path.display());
                    }
                }
                DecodeConfig::load()
            }
        };
        config.merge(&self.as_config());
        Ok(config)
    }
}

fn decode(config: &DecodeConfig) -> anyhow::Result<DecodeReport> {
    let path = config
        .oracle
        .path
        .as_ref()
        .context("no bigram table given (use --oracle or [oracle] path)")?;
    let table = fs::read_to_string(path)
        .with_context(|| format!("failed to read bigram table {}", path.display()))?;
    let mut oracle = BigramOracle::from_json(&table)?;

    let vocab = config.vocab.resolve(oracle.vocab_size())?;
    let search = config.search.resolve();
    let beam_size = search.beam_size;
    let strategy = BeamSearchStrategy::new(vocab, search)?;

    let batch = config.oracle.batch.unwrap_or(1);
    let src_len = config.oracle.src_len.unwrap_or(8);
    let src = Tensor::zeros((batch, src_len), DType::U32, &Device::Cpu)?;
    let prefix = match &config.oracle.prefix {
        Some(tokens) if !tokens.is_empty() => Some(Tensor::new(tokens.as_slice(), &Device::Cpu)?),
        _ => None,
    };
    let n_prefix_tokens = prefix.as_ref().map_or(1, |p| p.elem_count());

    info!(
        table = %path.display(),
        vocab_size = vocab.size,
        batch,
        src_len,
        beam_size,
        max_len = strategy.job_max_len(src_len),
        "decoding"
    );

    let result = strategy.generate(&mut oracle, &src, prefix.as_ref(), config.search.top)?;
    Ok(DecodeReport::from_result(
        &result,
        &vocab,
        beam_size,
        n_prefix_tokens,
    )?)
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    logging::init_with_level_and_format(cli.log_level.as_deref(), LogFormat::from_env())?;

    match cli.command {
        Command::Decode { overrides } => {
            let config = overrides.resolve()?;
            let report = decode(&config)?;

            let mut stdout = std::io::stdout().lock();
            serde_json::to_writer_pretty(&mut stdout, &report)?;
            writeln!(stdout)?;
        }
        Command::Config { overrides, save } => {
            let config = overrides.resolve()?;
            print!("{}", toml::to_string_pretty(&config)?);

            if save {
                let path = match &overrides.config {
                    Some(path) => {
                        config.save_to(path)?;
                        path.clone()
                    }
                    None => config.save()?,
                };
                eprintln!("Saved config to: {}", path.display());
            }
        }
    }

    Ok(())
}
