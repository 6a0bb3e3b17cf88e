use std::path::{Path, PathBuf};

use clap::Parser;
use kdam::{BarExt, tqdm};
use preppal::{
    CatalogDb,
    DataDir,
    Error,
    ModelManager,
    Result,
    Retriever,
    chunking::ChunkingConfig,
    cli::{AddArgs, Cli, Command, ContextArgs, ModelAction, SearchArgs},
    ingestion,
    mcp,
    model_manager::{DEFAULT_MODEL_ID, MODEL_ENV_VAR, MODEL_SETTING},
    retriever::IndexOutcome,
    search,
    walker,
};
use serde::Serialize;
use tracing::warn;
use tracing_subscriber::EnvFilter;

fn init_tracing(verbose: u8, quiet: bool) {
    let filter = if let Ok(env) = std::env::var("PREPPAL_LOG") {
        EnvFilter::new(env)
    } else if quiet {
        EnvFilter::new("warn")
    } else {
        match verbose {
            0 => EnvFilter::new("info"),
            1 => EnvFilter::new("debug"),
            _ => EnvFilter::new("trace"),
        }
    };

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .without_time()
        .init();
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.verbose, cli.quiet);

    if let Command::Completions(args) = &cli.command {
        args.generate();
        return Ok(());
    }

    let data_dir = DataDir::resolve(cli.data_dir.as_deref())?;
    let catalog = CatalogDb::open(&data_dir.catalog_db())?;

    match &cli.command {
        Command::Model { action } => {
            return cmd_model(&catalog, cli.model.as_deref(), action);
        }
        Command::Materials(args) => {
            return cmd_materials(&catalog, args.json);
        }
        _ => {}
    }

    let model = match &cli.model {
        Some(id) => ModelManager::with_model_id(id.clone()),
        None => ModelManager::new(catalog.get_setting(MODEL_SETTING)?),
    };
    let embedder = model.load()?;
    let chunking = ChunkingConfig::new(cli.chunk_size, cli.chunk_overlap);
    let retriever =
        Retriever::open_with_catalog(data_dir, catalog, embedder, chunking)?;

    match cli.command {
        Command::Add(args) => cmd_add(&retriever, &args)?,
        Command::Search(args) => cmd_search(&retriever, &args)?,
        Command::Context(args) => cmd_context(&retriever, &args)?,
        Command::Status(args) => cmd_status(&retriever, args.json)?,
        Command::Mcp => mcp::run_mcp(retriever)?,
        Command::Model { .. }
        | Command::Materials(_)
        | Command::Completions(_) => {}
    }

    Ok(())
}

#[derive(Serialize)]
struct AddReport<'a> {
    path: String,
    #[serde(flatten)]
    outcome: &'a IndexOutcome,
}

fn collect_files(paths: &[PathBuf]) -> Result<Vec<PathBuf>> {
    let mut files = Vec::new();
    for path in paths {
        if path.is_dir() {
            let found = walker::discover_files(path)?;
            if found.is_empty() {
                warn!(path = %path.display(), "no supported files found");
            }
            files.extend(found.into_iter().map(|f| f.absolute_path));
        } else if path.is_file() {
            files.push(path.clone());
        } else {
            return Err(Error::NotFound {
                kind: "file",
                name: path.display().to_string(),
            });
        }
    }
    Ok(files)
}

fn cmd_add(retriever: &Retriever, args: &AddArgs) -> Result<()> {
    let files = collect_files(&args.paths)?;
    if args.title.is_some() && files.len() > 1 {
        return Err(Error::Config(
            "--title can only be used when adding a single file".into(),
        ));
    }

    let mut pb = (files.len() > 1 && !args.json)
        .then(|| tqdm!(total = files.len(), desc = "Indexing"));

    let mut results = Vec::with_capacity(files.len());
    for file in &files {
        let outcome = ingestion::add_file(
            retriever,
            file,
            args.title.as_deref(),
            !args.no_import,
        )?;
        if let Some(pb) = pb.as_mut() {
            pb.update(1)?;
        }
        results.push((file, outcome));
    }
    if let Some(pb) = pb.as_mut() {
        pb.refresh()?;
        eprintln!();
    }

    if args.json {
        let reports: Vec<AddReport> = results
            .iter()
            .map(|(file, outcome)| AddReport {
                path: file.display().to_string(),
                outcome,
            })
            .collect();
        println!("{}", serde_json::to_string(&reports)?);
        return Ok(());
    }

    let mut failed = 0;
    for (file, outcome) in &results {
        print_outcome(file, outcome);
        if !outcome.ok {
            failed += 1;
        }
    }
    if results.len() > 1 {
        println!(
            "\n{} indexed, {failed} failed",
            results.len() - failed
        );
    }
    Ok(())
}

fn print_outcome(file: &Path, outcome: &IndexOutcome) {
    if outcome.ok {
        println!(
            "Indexed {} [{}] {} chunks #{}",
            file.display(),
            outcome.kind,
            outcome.chunk_count.unwrap_or_default(),
            outcome.material_id.as_deref().unwrap_or_default()
        );
    } else {
        println!(
            "Failed  {} [{}] {}",
            file.display(),
            outcome.kind,
            outcome.error.as_deref().unwrap_or("unknown error")
        );
    }
}

fn cmd_search(retriever: &Retriever, args: &SearchArgs) -> Result<()> {
    let hits = retriever.search(&args.query, args.count)?;
    if args.json {
        search::format_json(&hits, &args.query);
    } else {
        search::format_human(&hits);
    }
    Ok(())
}

fn cmd_context(retriever: &Retriever, args: &ContextArgs) -> Result<()> {
    let hits = retriever.search(&args.query, args.count)?;
    let context = search::build_context(&hits, args.max_chars);
    if context.is_empty() {
        eprintln!("No matching material.");
    } else {
        println!("{context}");
    }
    Ok(())
}

fn cmd_materials(catalog: &CatalogDb, json: bool) -> Result<()> {
    let materials = catalog.list_materials()?;

    if json {
        println!("{}", serde_json::to_string(&materials)?);
    } else if materials.is_empty() {
        println!("No materials indexed.");
    } else {
        for m in &materials {
            println!(
                "{}\t{}\t{}\t{} chunks",
                m.material_id, m.kind, m.title, m.chunk_count
            );
        }
    }
    Ok(())
}

fn cmd_status(retriever: &Retriever, json: bool) -> Result<()> {
    let stats = retriever.stats()?;
    let root = retriever.data_dir().root().display().to_string();

    if json {
        let mut value = serde_json::to_value(&stats)?;
        value["data_dir"] = serde_json::Value::String(root);
        println!("{value}");
    } else {
        println!("Data directory: {root}");
        println!("Model: {} (dimension {})", stats.model_id, stats.dimension);
        println!("Materials: {}", stats.materials);
        println!("Vectors: {}", stats.vectors);
        println!("Metadata records: {}", stats.metadata_slots);
        if stats.malformed_records > 0 {
            println!("Malformed records: {}", stats.malformed_records);
        }
        if stats.trimmed_vectors > 0 || stats.trimmed_records > 0 {
            println!(
                "Repaired on open: {} vectors, {} records trimmed",
                stats.trimmed_vectors, stats.trimmed_records
            );
        }
    }
    Ok(())
}

fn cmd_model(
    catalog: &CatalogDb,
    cli_model: Option<&str>,
    action: &ModelAction,
) -> Result<()> {
    match action {
        ModelAction::Show { json } => {
            let stored = catalog.get_setting(MODEL_SETTING)?;
            let env = std::env::var(MODEL_ENV_VAR).ok();
            let (resolved, source) = if let Some(m) = cli_model {
                (m.to_string(), "cli")
            } else if let Some(m) = env.clone() {
                (m, "env")
            } else if let Some(m) = stored.clone() {
                (m, "config")
            } else {
                (DEFAULT_MODEL_ID.to_string(), "default")
            };

            if *json {
                let value = serde_json::json!({
                    "resolved": resolved,
                    "source": source,
                    "cli": cli_model,
                    "env": env,
                    "config": stored,
                    "default": DEFAULT_MODEL_ID,
                });
                println!("{value}");
            } else {
                println!("Resolved model: {resolved} ({source})");
                if let Some(m) = cli_model {
                    println!("  CLI override: {m}");
                }
                if let Some(m) = &env {
                    println!("  {MODEL_ENV_VAR}: {m}");
                }
                if let Some(m) = &stored {
                    println!("  Stored setting: {m}");
                }
                println!("  Default: {DEFAULT_MODEL_ID}");
            }
        }
        ModelAction::Set { model } => {
            catalog.set_setting(MODEL_SETTING, model)?;
            println!("Default model set to {model}");
        }
        ModelAction::Clear => {
            if catalog.remove_setting(MODEL_SETTING)? {
                println!("Cleared stored model; using {DEFAULT_MODEL_ID}");
            } else {
                println!("No stored model setting.");
            }
        }
    }
    Ok(())
}
