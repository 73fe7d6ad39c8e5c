use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use ferret_core::{FieldSpec, Language, SearchHandle, SearchRequest, SledEngine};
use serde_json::Value;
use tracing_subscriber::{fmt, EnvFilter};
use walkdir::WalkDir;

use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::{Path, PathBuf};

#[derive(Parser)]
#[command(name = "ferret-indexer")]
#[command(about = "Load documents and maintain persisted search indexes", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Load JSON/JSONL documents (each with a string `_id`) into the store
    Load {
        /// Input path (file or directory)
        #[arg(long)]
        input: String,
        /// Data directory
        #[arg(long)]
        data: String,
    },
    /// Eagerly build the persisted index for a field set
    Build {
        /// Data directory
        #[arg(long)]
        data: String,
        /// Field to index (repeatable, dotted paths allowed)
        #[arg(long = "field", required = true)]
        fields: Vec<String>,
        /// Language codes for the tokenizer pipeline
        #[arg(long, default_value = "en", value_delimiter = ',')]
        language: Vec<String>,
    },
    /// Destroy the persisted index for a field set
    Destroy {
        /// Data directory
        #[arg(long)]
        data: String,
        /// Field the index was built over (repeatable)
        #[arg(long = "field", required = true)]
        fields: Vec<String>,
        /// Language codes the index was built with
        #[arg(long, default_value = "en", value_delimiter = ',')]
        language: Vec<String>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    fmt().with_env_filter(EnvFilter::from_default_env()).init();
    let cli = Cli::parse();

    match cli.command {
        Commands::Load { input, data } => load(&input, &data),
        Commands::Build {
            data,
            fields,
            language,
        } => maintain(&data, fields, language, false).await,
        Commands::Destroy {
            data,
            fields,
            language,
        } => maintain(&data, fields, language, true).await,
    }
}

fn load(input: &str, data: &str) -> Result<()> {
    let engine = SledEngine::open(data)?;
    let input_path = Path::new(input);

    let mut files: Vec<PathBuf> = Vec::new();
    if input_path.is_dir() {
        for entry in WalkDir::new(input_path).into_iter().filter_map(|e| e.ok()) {
            let p = entry.path();
            if p.is_file() {
                if let Some(ext) = p.extension().and_then(|s| s.to_str()) {
                    if matches!(ext, "json" | "jsonl") {
                        files.push(p.to_path_buf());
                    }
                }
            }
        }
    } else if input_path.is_file() {
        files.push(input_path.to_path_buf());
    }

    let mut loaded = 0usize;
    let mut skipped = 0usize;
    for file in files {
        if file.extension().and_then(|s| s.to_str()) == Some("jsonl") {
            load_jsonl(&engine, &file, &mut loaded, &mut skipped)?;
        } else {
            load_json(&engine, &file, &mut loaded, &mut skipped)?;
        }
    }

    tracing::info!(loaded, skipped, "documents loaded");
    Ok(())
}

fn load_jsonl(
    engine: &SledEngine,
    file: &Path,
    loaded: &mut usize,
    skipped: &mut usize,
) -> Result<()> {
    let f = File::open(file).with_context(|| format!("opening {}", file.display()))?;
    for line in BufReader::new(f).lines() {
        let line = line?;
        if line.trim().is_empty() {
            continue;
        }
        let doc: Value = serde_json::from_str(&line)?;
        ingest(engine, doc, loaded, skipped)?;
    }
    Ok(())
}

fn load_json(
    engine: &SledEngine,
    file: &Path,
    loaded: &mut usize,
    skipped: &mut usize,
) -> Result<()> {
    let f = File::open(file).with_context(|| format!("opening {}", file.display()))?;
    let json: Value = serde_json::from_reader(BufReader::new(f))?;
    match json {
        Value::Array(docs) => {
            for doc in docs {
                ingest(engine, doc, loaded, skipped)?;
            }
        }
        doc @ Value::Object(_) => ingest(engine, doc, loaded, skipped)?,
        _ => {}
    }
    Ok(())
}

fn ingest(engine: &SledEngine, doc: Value, loaded: &mut usize, skipped: &mut usize) -> Result<()> {
    let Some(id) = doc.get("_id").and_then(Value::as_str).map(str::to_string) else {
        tracing::warn!("skipping document without a string _id");
        *skipped += 1;
        return Ok(());
    };
    engine.put_doc(&id, &doc)?;
    *loaded += 1;
    Ok(())
}

async fn maintain(data: &str, fields: Vec<String>, language: Vec<String>, destroy: bool) -> Result<()> {
    let engine = SledEngine::open(data)?;
    let handle = SearchHandle::new(engine);
    let mut request = SearchRequest::new("", FieldSpec::Named(fields));
    request.language = Language::Many(language);
    if destroy {
        handle.destroy(request).await?;
        tracing::info!("index destroyed");
    } else {
        handle.build(request).await?;
        tracing::info!("index built");
    }
    Ok(())
}
