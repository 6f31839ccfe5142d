use anyhow::Result;
use clap::{Parser, Subcommand};
use std::path::PathBuf;

use harvest_acquire::{PoliteDelay, ScrapeConfig};
use harvest_infer::{ChatTemplate, GenerationConfig, SamplingConfig, StdoutSink};
use harvest_model::Category;
use harvest_wrangle::PreprocessConfig;

#[derive(Parser)]
#[command(name = "harvest")]
#[command(about = "Stack Overflow Q&A harvesting and fine-tuned model prompting tool")]
#[command(version = concat!(env!("CARGO_PKG_VERSION"), " (", env!("BUILD_HASH"), ")"))]
struct Cli {
    /// Log level: error, warn, info, debug, trace
    #[arg(long, global = true, default_value = "info", value_enum)]
    log_level: LogLevel,

    /// Use UTC timestamps instead of local time
    #[arg(long, global = true)]
    utc: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Clone, clap::ValueEnum)]
enum LogLevel {
    Error,
    Warn,
    Info,
    Debug,
    Trace,
}

#[derive(Subcommand)]
enum Commands {
    /// Scrape top-voted questions and answers for one tag
    Scrape {
        /// Category to scrape: ds, ml, ai, or the full site tag
        #[arg(short, long)]
        tag: Category,

        /// Listing pages to walk (default depends on the tag: ds=5, ml=8, ai=8)
        #[arg(short, long)]
        pages: Option<u32>,

        /// First listing page to fetch
        #[arg(long, default_value_t = 1)]
        start_page: u32,

        /// Stop after collecting this many records
        #[arg(long)]
        max_records: Option<usize>,

        /// Output file (default: data/<category>.json)
        #[arg(short, long)]
        output: Option<PathBuf>,

        /// Questions per listing page
        #[arg(long, default_value_t = 50)]
        page_size: u32,

        /// Answers kept per question
        #[arg(long, default_value_t = 3)]
        max_answers: usize,

        /// Total attempts per URL before giving up
        #[arg(long, default_value_t = 5)]
        max_attempts: u32,

        /// Skip the 1-3s pause between successful requests
        #[arg(long)]
        no_delay: bool,

        /// Also save every fetched page as raw HTML in this directory
        #[arg(long)]
        cache_dir: Option<PathBuf>,

        /// Site root to scrape
        #[arg(long, default_value = harvest_acquire::stackoverflow::DEFAULT_BASE_URL)]
        base_url: String,
    },

    /// Clean and de-duplicate category files into one corpus
    Combine {
        /// Category files to combine (default: the three category outputs)
        #[arg(short, long, num_args = 1..)]
        input: Vec<String>,

        /// Output file for the combined corpus
        #[arg(short, long, default_value = harvest_wrangle::DEFAULT_COMBINED_PATH)]
        output: String,
    },

    /// Derive bag-of-words features and vocabularies from the combined corpus
    Preprocess {
        /// Combined corpus to read
        #[arg(short, long, default_value = harvest_wrangle::DEFAULT_COMBINED_PATH)]
        input: String,

        /// Directory for the feature, vocabulary and sample files
        #[arg(short, long, default_value = harvest_wrangle::preprocess::DEFAULT_PREPROCESSED_DIR)]
        output_dir: PathBuf,

        /// Most frequent terms kept in each vocabulary
        #[arg(long, default_value_t = harvest_wrangle::preprocess::DEFAULT_MAX_VOCAB_SIZE)]
        max_vocab_size: usize,
    },

    /// Validate a scraped category file
    Validate {
        /// Path to the category JSON file
        file: String,

        /// Category the file was scraped for: ds, ml, ai, or the full site tag
        #[arg(short, long)]
        tag: Category,
    },

    /// Extract an adapter bundle and prompt it
    Generate {
        /// Bundle name; <workdir>/<archive>.zip is extracted
        #[arg(short, long, default_value = "lora_model")]
        archive: String,

        /// Directory holding the archive; extraction happens here too
        #[arg(short, long, default_value = ".")]
        workdir: PathBuf,

        /// User message to send
        #[arg(short, long)]
        prompt: String,

        /// Maximum tokens to generate
        #[arg(long, default_value_t = harvest_infer::DEFAULT_MAX_NEW_TOKENS)]
        max_new_tokens: usize,

        /// Sampling temperature; 0 selects greedy decoding
        #[arg(long, default_value_t = harvest_infer::DEFAULT_TEMPERATURE)]
        temperature: f32,

        /// Min-p cutoff relative to the most likely token
        #[arg(long, default_value_t = harvest_infer::DEFAULT_MIN_P)]
        min_p: f32,

        /// Chat template the adapter was trained with: llama-3 or chatml
        #[arg(long, default_value = "llama-3")]
        template: ChatTemplate,

        /// Seed for reproducible sampling
        #[arg(long)]
        seed: Option<u64>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Map log level, suppressing noisy HTML-parsing crates at debug/trace
    let level = match cli.log_level {
        LogLevel::Error => "error",
        LogLevel::Warn  => "warn",
        LogLevel::Info  => "info",
        LogLevel::Debug => "debug,selectors=warn,html5ever=warn,hyper_util=info",
        LogLevel::Trace => "trace,selectors=warn,html5ever=warn,hyper_util=info",
    };
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(level));

    // Timestamp format: 2026-02-14 19:44:09.123 -08:00
    let time_format = "%Y-%m-%d %H:%M:%S%.3f %:z";

    // Logs go to stderr so generated text on stdout stays clean
    if cli.utc {
        tracing_subscriber::fmt()
            .with_env_filter(env_filter)
            .with_writer(std::io::stderr)
            .with_timer(tracing_subscriber::fmt::time::ChronoUtc::new(time_format.to_string()))
            .init();
    } else {
        tracing_subscriber::fmt()
            .with_env_filter(env_filter)
            .with_writer(std::io::stderr)
            .with_timer(tracing_subscriber::fmt::time::ChronoLocal::new(time_format.to_string()))
            .init();
    }

    match cli.command {
        Commands::Scrape {
            tag: category,
            pages,
            start_page,
            max_records,
            output,
            page_size,
            max_answers,
            max_attempts,
            no_delay,
            cache_dir,
            base_url,
        } => {
            let mut config = ScrapeConfig::for_category(category);
            if let Some(pages) = pages {
                config.pages = pages;
            }
            if let Some(output) = output {
                config.output_path = output;
            }
            config.start_page = start_page;
            config.max_records = max_records;
            config.page_size = page_size;
            config.max_answers = max_answers;
            config.retry.max_attempts = max_attempts.max(1);
            config.cache_dir = cache_dir;
            config.base_url = base_url;
            if no_delay {
                config.polite = PoliteDelay::none();
            }

            tracing::info!(
                tag = category.tag(),
                start_page = config.start_page,
                pages = config.pages,
                "Scraping"
            );
            let summary = harvest_acquire::scrape(&config).await?;
            println!(
                "{}: {} records from {} pages -> {}",
                category.tag(),
                summary.records,
                summary.pages_fetched,
                summary.output_path.display()
            );
        }
        Commands::Combine { input, output } => {
            let inputs = if input.is_empty() {
                Category::all_output_paths()
                    .into_iter()
                    .map(String::from)
                    .collect()
            } else {
                input
            };
            tracing::info!(inputs = ?inputs, output = %output, "Combining");
            let stats = harvest_wrangle::combine(&inputs, &output)?;
            print!("{}", stats.report());
        }
        Commands::Preprocess {
            input,
            output_dir,
            max_vocab_size,
        } => {
            let config = PreprocessConfig {
                max_vocab_size,
                ..PreprocessConfig::default()
            };
            let stats = harvest_wrangle::preprocess(&input, &output_dir, &config)?;
            println!(
                "{} entries, {} code terms, {} text terms -> {}",
                stats.entries,
                stats.code_terms,
                stats.text_terms,
                stats.output_dir.display()
            );
        }
        Commands::Validate { file, tag } => {
            tracing::info!(file = %file, "Validating");
            harvest_validate::validate_file(&file, tag)?;
        }
        Commands::Generate {
            archive,
            workdir,
            prompt,
            max_new_tokens,
            temperature,
            min_p,
            template,
            seed,
        } => {
            let config = GenerationConfig {
                max_new_tokens,
                sampling: SamplingConfig { temperature, min_p },
                template,
                seed,
            };
            let loader = harvest_infer::default_loader();
            let generation = harvest_infer::run(
                &workdir,
                &archive,
                loader.as_ref(),
                &prompt,
                &config,
                &mut StdoutSink,
            )?;
            tracing::info!(
                tokens = generation.tokens.len(),
                finish = ?generation.finish,
                "Generation complete"
            );
        }
    }

    Ok(())
}
