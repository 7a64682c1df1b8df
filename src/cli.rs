//! Command-line surface and top-level flow.
use clap::Parser;
use eyre::{Result, eyre};
use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use crate::driver::{self, ProjectConfig};
use crate::glossary;
use crate::logging;
use crate::prompt::GenerationParams;

/// Batch-translate visual-novel scripts through streaming chat-completion
/// endpoints.
#[derive(Debug, Parser)]
#[command(version, about)]
pub struct Cli {
    /// Project directory holding the work files (`**/*.json`).
    pub project_path: PathBuf,

    /// One or more endpoint URLs; one concurrent worker per endpoint.
    #[arg(required = true)]
    pub endpoints: Vec<String>,

    /// Entries per request; halves automatically when the model merges lines.
    #[arg(long, default_value_t = 7)]
    pub batch_size: usize,

    /// Completed entries carried as context into the next prompt.
    #[arg(long, default_value_t = 2)]
    pub history_size: usize,

    /// Wall-clock limit per request, in seconds.
    #[arg(long, default_value_t = 30.0)]
    pub timeout: f64,

    /// Echo reply fragments to stdout as they arrive (single endpoint only).
    #[arg(long)]
    pub stream_output: bool,

    /// Extra pre-translation dictionary; repeatable.
    #[arg(long = "pre-dict", value_name = "FILE")]
    pub pre_dicts: Vec<PathBuf>,

    /// Extra post-translation dictionary; repeatable.
    #[arg(long = "post-dict", value_name = "FILE")]
    pub post_dicts: Vec<PathBuf>,

    /// Extra model-facing dictionary; repeatable.
    #[arg(long = "gpt-dict", value_name = "FILE")]
    pub gpt_dicts: Vec<PathBuf>,

    /// Skip the built-in pre-translation dictionary.
    #[arg(long)]
    pub no_builtin_pre_dict: bool,

    /// Skip the built-in post-translation dictionary.
    #[arg(long)]
    pub no_builtin_post_dict: bool,

    /// Skip the built-in model-facing dictionary.
    #[arg(long)]
    pub no_builtin_gpt_dict: bool,

    /// Proxy for endpoint traffic.
    #[arg(long, value_name = "URL")]
    pub proxy: Option<String>,

    #[arg(long, default_value_t = 0.8)]
    pub top_p: f32,

    #[arg(long, default_value_t = 0.3)]
    pub temperature: f32,

    #[arg(long, default_value_t = 0.0)]
    pub presence_penalty: f32,

    #[arg(long, default_value_t = 0.0)]
    pub frequency_penalty: f32,

    /// Model name sent in the request body.
    #[arg(long, default_value = "sakura")]
    pub model: String,
}

/// Entrypoint: parse arguments, wire logging and Ctrl-C, run the driver.
pub async fn run() -> Result<()> {
    logging::setup_tracing();
    let cli = Cli::parse();

    if cli.batch_size == 0 {
        return Err(eyre!("--batch-size must be at least 1"));
    }
    if !(cli.timeout > 0.0) {
        return Err(eyre!("--timeout must be positive"));
    }
    if cli.stream_output && cli.endpoints.len() > 1 {
        tracing::warn!("--stream-output is ignored with more than one endpoint");
    }

    let pre_dict = glossary::load_rewrites(
        (!cli.no_builtin_pre_dict).then_some(glossary::BUILTIN_PRE_DICT),
        &cli.pre_dicts,
    )
    .await?;
    let post_dict = glossary::load_rewrites(
        (!cli.no_builtin_post_dict).then_some(glossary::BUILTIN_POST_DICT),
        &cli.post_dicts,
    )
    .await?;
    let gpt_dict = glossary::load_terms(
        (!cli.no_builtin_gpt_dict).then_some(glossary::BUILTIN_GPT_DICT),
        &cli.gpt_dicts,
    )
    .await?;

    // One Ctrl-C finishes in-flight batches and persists what landed.
    let interrupt = Arc::new(AtomicBool::new(false));
    let flag = interrupt.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::info!("interrupt received; finishing in-flight batches");
            flag.store(true, Ordering::Relaxed);
        }
    });

    driver::run_project(ProjectConfig {
        project_path: cli.project_path,
        endpoints: cli.endpoints,
        model: cli.model,
        batch_size: cli.batch_size,
        history_size: cli.history_size,
        timeout: Duration::from_secs_f64(cli.timeout),
        proxy: cli.proxy,
        stream_output: cli.stream_output,
        tick: Duration::from_secs(1),
        params: GenerationParams {
            temperature: cli.temperature,
            top_p: cli.top_p,
            presence_penalty: cli.presence_penalty,
            frequency_penalty: cli.frequency_penalty,
        },
        pre_dict,
        post_dict,
        gpt_dict,
        interrupt,
    })
    .await
}
