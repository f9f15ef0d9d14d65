//! prompt-shaper CLI - Fit agent prompts into per-task token budgets

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use prompt_shaper::{
    classify::TaskClassifier,
    config::Config,
    optimization::PromptOptimizer,
    OptimizeRequest, TaskType,
};
use std::path::{Path, PathBuf};
use tracing::{info, Level};
use tracing_subscriber::{filter::LevelFilter, EnvFilter, FmtSubscriber};

#[derive(Parser)]
#[command(name = "prompt-shaper")]
#[command(about = "Shape agent prompts to fit per-task token budgets")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Verbosity level
    #[arg(short, long, default_value = "info")]
    log_level: String,

    /// Config file (default: ~/.config/prompt-shaper/config.toml)
    #[arg(long, global = true)]
    config: Option<PathBuf>,
}

#[derive(Subcommand)]
enum Commands {
    /// Optimize a JSON request and print the shaped messages
    Optimize {
        /// Request file (JSON with system_prompt, persona, conversation_history, code_context, user_query)
        #[arg(short, long)]
        input: PathBuf,

        /// Task type, overriding the request's hint and the classifier
        #[arg(short, long)]
        task: Option<String>,

        /// Output file (default: stdout)
        #[arg(short, long)]
        output: Option<PathBuf>,

        /// Print only the stats report
        #[arg(long)]
        stats_only: bool,
    },

    /// Classify a query into a task type
    Classify {
        /// Query text
        query: String,

        /// Explicit task label
        #[arg(long)]
        hint: Option<String>,
    },

    /// Show the budget table
    Budgets {
        /// Show only this task type
        #[arg(short, long)]
        task: Option<String>,
    },

    /// Optimize the same request repeatedly to show cache reuse
    CacheDemo {
        /// Request file
        #[arg(short, long)]
        input: PathBuf,

        /// Number of calls
        #[arg(short, long, default_value = "3")]
        runs: usize,
    },

    /// Manage configuration
    #[command(subcommand)]
    Config(ConfigCommands),
}

#[derive(Subcommand)]
enum ConfigCommands {
    /// Initialize configuration file with defaults
    Init {
        /// Overwrite existing config
        #[arg(long)]
        force: bool,
    },

    /// Show current configuration
    Show {
        /// Show only specific section (estimator, cache, trimming, budgets)
        #[arg(short, long)]
        section: Option<String>,
    },

    /// Show configuration file path
    Path,

    /// Validate configuration
    Validate,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Setup logging
    let log_level = match cli.log_level.to_lowercase().as_str() {
        "trace" => Level::TRACE,
        "debug" => Level::DEBUG,
        "info" => Level::INFO,
        "warn" => Level::WARN,
        "error" => Level::ERROR,
        _ => Level::INFO,
    };

    // RUST_LOG takes precedence over --log-level
    let filter = EnvFilter::builder()
        .with_default_directive(LevelFilter::from_level(log_level).into())
        .from_env_lossy();

    let subscriber = FmtSubscriber::builder()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;

    let config_path = cli.config.unwrap_or_else(Config::default_path);

    match cli.command {
        Commands::Optimize {
            input,
            task,
            output,
            stats_only,
        } => {
            run_optimize(&config_path, input, task, output, stats_only).await?;
        }
        Commands::Classify { query, hint } => {
            run_classify(&query, hint.as_deref());
        }
        Commands::Budgets { task } => {
            show_budgets(&config_path, task.as_deref())?;
        }
        Commands::CacheDemo { input, runs } => {
            run_cache_demo(&config_path, input, runs).await?;
        }
        Commands::Config(cmd) => {
            run_config_command(&config_path, cmd)?;
        }
    }

    Ok(())
}

fn load_config(path: &Path) -> Result<Config> {
    let config = Config::load_from(path)
        .with_context(|| format!("loading config from {}", path.display()))?;
    config.validate()?;
    Ok(config)
}

async fn load_request(path: &Path) -> Result<OptimizeRequest> {
    let raw = tokio::fs::read_to_string(path)
        .await
        .with_context(|| format!("reading request {}", path.display()))?;
    let request = serde_json::from_str(&raw)
        .with_context(|| format!("parsing request {}", path.display()))?;
    Ok(request)
}

async fn run_optimize(
    config_path: &Path,
    input: PathBuf,
    task: Option<String>,
    output: Option<PathBuf>,
    stats_only: bool,
) -> Result<()> {
    let config = load_config(config_path)?;
    let optimizer = PromptOptimizer::from_config(&config)?;

    let mut request = load_request(&input).await?;
    if let Some(task) = task {
        let parsed: TaskType = task.parse()?;
        request.task_type = Some(parsed.label().to_string());
    }

    info!("Optimizing request from {}", input.display());
    let result = optimizer.optimize_request(&request);

    if !stats_only {
        let rendered = serde_json::to_string_pretty(&result)?;
        if let Some(path) = output {
            tokio::fs::write(&path, &rendered).await?;
            println!("Optimized request written to: {}", path.display());
        } else {
            println!("{}", rendered);
        }
        println!();
    }

    print!("{}", result.stats);
    Ok(())
}

fn run_classify(query: &str, hint: Option<&str>) {
    let task = TaskClassifier::default().classify(query, hint);
    println!("{}", task);
}

fn show_budgets(config_path: &Path, task: Option<&str>) -> Result<()> {
    let config = load_config(config_path)?;
    let optimizer = PromptOptimizer::from_config(&config)?;

    let budgets = match task {
        Some(label) => {
            let task: TaskType = label.parse()?;
            vec![optimizer.budget_for(task)]
        }
        None => optimizer.budgets().budgets(),
    };

    println!("=== Budget Table ===\n");
    println!(
        "{:<12} {:>10} {:>8} {:>8} {:>12} {:>8} {:>8}",
        "Task", "Input", "Output", "System", "Conversation", "Context", "Query"
    );
    println!("{}", "-".repeat(72));
    for budget in budgets {
        println!(
            "{:<12} {:>10} {:>8} {:>8} {:>12} {:>8} {:>8}",
            budget.task_type.label(),
            budget.total_input,
            budget.total_output,
            budget.system,
            budget.conversation,
            budget.context,
            budget.query
        );
    }

    Ok(())
}

async fn run_cache_demo(config_path: &Path, input: PathBuf, runs: usize) -> Result<()> {
    let config = load_config(config_path)?;
    if !config.cache.enabled {
        bail!("cache is disabled in {}", config_path.display());
    }
    let optimizer = PromptOptimizer::from_config(&config)?;
    let request = load_request(&input).await?;

    println!("=== Cache Reuse ===\n");
    println!(
        "{:<5} {:>6} {:>6} {:>12} {:>12} {:>10}",
        "Run", "Hits", "Misses", "Original", "Optimized", "Reduction"
    );
    println!("{}", "-".repeat(56));

    for run in 1..=runs {
        let result = optimizer.optimize_request(&request);
        let stats = &result.stats;
        println!(
            "{:<5} {:>6} {:>6} {:>12} {:>12} {:>9.1}%",
            run,
            stats.cache_hits,
            stats.cache_misses,
            stats.original_tokens,
            stats.optimized_tokens,
            stats.reduction * 100.0
        );
    }

    println!();
    if let Some(cache) = optimizer.cache() {
        print!("{}", cache.get_stats());
    }
    println!();
    print!("{}", optimizer.metrics().summary());

    Ok(())
}

fn run_config_command(config_path: &Path, cmd: ConfigCommands) -> Result<()> {
    match cmd {
        ConfigCommands::Init { force } => {
            config_init(config_path, force)?;
        }
        ConfigCommands::Show { section } => {
            config_show(config_path, section)?;
        }
        ConfigCommands::Path => {
            config_show_path(config_path);
        }
        ConfigCommands::Validate => {
            config_validate(config_path)?;
        }
    }
    Ok(())
}

fn config_init(path: &Path, force: bool) -> Result<()> {
    if path.exists() && !force {
        println!("Configuration file already exists at: {}", path.display());
        println!("Use --force to overwrite");
        return Ok(());
    }

    Config::default().save_to(path)?;

    println!("Configuration file created at: {}", path.display());
    println!();
    println!("Environment overrides:");
    println!("  PROMPT_SHAPER_CHARS_PER_TOKEN");
    println!("  PROMPT_SHAPER_CACHE_TTL_SECS");
    println!("  PROMPT_SHAPER_CACHE_ENABLED");
    println!("  PROMPT_SHAPER_CONSOLIDATION_THRESHOLD");

    Ok(())
}

fn config_show(path: &Path, section: Option<String>) -> Result<()> {
    let config = Config::load_from(path)?;

    let display = if let Some(sec) = section {
        match sec.to_lowercase().as_str() {
            "estimator" => toml::to_string_pretty(&config.estimator)?,
            "cache" => toml::to_string_pretty(&config.cache)?,
            "trimming" => toml::to_string_pretty(&config.trimming)?,
            "budgets" => toml::to_string_pretty(&config.budgets)?,
            _ => {
                println!("Unknown section: {}", sec);
                println!("Available: estimator, cache, trimming, budgets");
                return Ok(());
            }
        }
    } else {
        toml::to_string_pretty(&config)?
    };

    println!("{}", display);
    Ok(())
}

fn config_show_path(path: &Path) {
    println!("{}", path.display());

    if path.exists() {
        println!("(file exists)");
    } else {
        println!("(file does not exist - run 'config init' to create)");
    }
}

fn config_validate(path: &Path) -> Result<()> {
    let config = Config::load_from(path)?;

    match config.validate() {
        Ok(()) => {
            println!("Configuration is valid!");
            println!();
            println!(
                "Estimator: {:?} ({} chars/token, {} overhead/message)",
                config.estimator.backend,
                config.estimator.chars_per_token,
                config.estimator.message_overhead
            );
            if config.cache.enabled {
                println!(
                    "Cache: enabled (ttl {}s, max {} entries)",
                    config.cache.ttl_secs, config.cache.max_entries
                );
            } else {
                println!("Cache: disabled");
            }
            println!("Budget overrides: {}", config.budgets.overrides.len());
        }
        Err(e) => {
            println!("Configuration validation failed:");
            println!("  {}", e);
        }
    }

    Ok(())
}
