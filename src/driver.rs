//! Walks a project, runs the dispatcher over each work file, writes the
//! translations back in place.
use eyre::{Result, eyre};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use crate::dispatch::{DispatchConfig, Dispatcher};
use crate::endpoint;
use crate::glossary::{Rewrite, Term, apply_rewrites};
use crate::placeholder::PlaceholderSet;
use crate::prompt::GenerationParams;
use crate::script;
use crate::worker::{Worker, WorkerConfig};


/// Everything one project run needs, assembled by the CLI layer.
pub struct ProjectConfig {
    pub project_path: PathBuf,
    pub endpoints: Vec<String>,
    pub model: String,
    pub batch_size: usize,
    pub history_size: usize,
    pub timeout: Duration,
    pub proxy: Option<String>,
    pub stream_output: bool,
    pub tick: Duration,
    pub params: GenerationParams,
    pub pre_dict: Vec<Rewrite>,
    pub post_dict: Vec<Rewrite>,
    pub gpt_dict: Vec<Term>,
    pub interrupt: Arc<AtomicBool>,
}

/// Translate every work file under the project root.
pub async fn run_project(config: ProjectConfig) -> Result<()> {
    let files = collect_work_files(&config.project_path)?;
    if files.is_empty() {
        tracing::warn!(path = %config.project_path.display(), "no work files found");
        return Ok(());
    }

    let client = endpoint::build_client(config.timeout, config.proxy.as_deref())?;
    // Interleaved fragments from several endpoints are meaningless, so the
    // echo only runs with a single worker.
    let echo_stream = config.stream_output && config.endpoints.len() == 1;
    let runner = FileRunner {
        post_dict: Arc::new(config.post_dict.clone()),
        glossary: Arc::new(config.gpt_dict.clone()),
        client,
        echo_stream,
        config: &config,
    };

    for path in &files {
        runner.translate_file(path).await?;
        if config.interrupt.load(Ordering::Relaxed) {
            tracing::info!("interrupted; stopping after the current file");
            break;
        }
    }
    Ok(())
}

struct FileRunner<'a> {
    config: &'a ProjectConfig,
    client: reqwest::Client,
    post_dict: Arc<Vec<Rewrite>>,
    glossary: Arc<Vec<Term>>,
    echo_stream: bool,
}

impl FileRunner<'_> {
    /// Load one work file, push its pending entries through the dispatcher,
    /// and merge the completed translations back.
    async fn translate_file(&self, path: &Path) -> Result<()> {
        let mut array = script::load_work_file(path).await?;
        let mut pending = script::pending_entries(&array);
        if pending.is_empty() {
            tracing::debug!(file = %path.display(), "nothing to translate");
            return Ok(());
        }

        // Pre-translation substitutions only change what the model sees;
        // the `source` field on disk stays as written.
        for entry in &mut pending {
            entry.source = apply_rewrites(&self.config.pre_dict, &entry.source);
        }

        let corpus = pending
            .iter()
            .map(|entry| entry.source.as_str())
            .collect::<Vec<_>>()
            .join("\n");
        let placeholders = PlaceholderSet::mint_for(&corpus)
            .map_err(|e| eyre!("{}: {e}", path.display()))?;

        tracing::info!(file = %path.display(), pending = pending.len(), "translating");

        let workers: Vec<Worker> = self
            .config
            .endpoints
            .iter()
            .map(|endpoint| {
                Worker::spawn(
                    self.client.clone(),
                    WorkerConfig {
                        endpoint: endpoint.clone(),
                        model: self.config.model.clone(),
                        params: self.config.params,
                        glossary: self.glossary.clone(),
                        placeholders: placeholders.clone(),
                        echo_stream: self.echo_stream,
                    },
                )
            })
            .collect();

        let dispatcher = Dispatcher::new(
            pending,
            &DispatchConfig {
                batch_size: self.config.batch_size,
                history_size: self.config.history_size,
                tick: self.config.tick,
            },
            self.post_dict.clone(),
            self.config.interrupt.clone(),
        );
        let outcome = dispatcher.run(&workers).await;

        script::merge_entries(&mut array, &outcome.done);
        script::save_work_file(path, &array).await?;

        tracing::info!(
            file = %path.display(),
            done = outcome.done.len(),
            excluded = outcome.excluded.len(),
            "file written"
        );
        Ok(())
    }
}

/// Every `*.json` under `root`, sorted for a deterministic order. A path
/// that is itself a file is taken as a one-file project.
fn collect_work_files(root: &Path) -> Result<Vec<PathBuf>> {
    fn walk(dir: &Path, files: &mut Vec<PathBuf>) -> std::io::Result<()> {
        for item in std::fs::read_dir(dir)? {
            let path = item?.path();
            if path.is_dir() {
                walk(&path, files)?;
            } else if path.extension().is_some_and(|ext| ext == "json") {
                files.push(path);
            }
        }
        Ok(())
    }

    if root.is_file() {
        return Ok(vec![root.to_path_buf()]);
    }
    if !root.is_dir() {
        return Err(eyre!("project path not found: {}", root.display()));
    }
    let mut files = Vec::new();
    walk(root, &mut files).map_err(|e| eyre!("scanning {}: {e}", root.display()))?;
    files.sort();
    Ok(files)
}
