use std::env;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{anyhow, bail, Context};
use serde::Deserialize;
use tokio_util::sync::CancellationToken;
use tracing::info;
use tracing_subscriber::EnvFilter;

use docstore_core::config::{resolve_with_base, Config, FederationConfig};
use docstore_core::descriptor::parse_weights;
use docstore_core::types::sanitize_collection_name;
use docstore_core::{CollectionRef, DenseMatch, Fusion, FusionMethod, Metric, QueryDescriptor, SearchRequest, TextMatch};
use docstore_hybrid::Federation;
use docstore_sqlite::{SqliteBackend, SqliteStore};
use docstore_text::TantivyBackend;

const USAGE: &str = "Usage: docstore-cli <search|hybrid|health> [args...]

  search <query> --collections backend:name[,backend:name...]
         [--field content] [--offset N] [--limit N] [--msm F]
         [--select a,b] [--filter backend=expr]... [--timeout-ms N]
  hybrid <query> --vector f,f,... (plus every search option)
         [--method rrf|weighted_sum] [--weights w,w] [--metric l2|cosine] [--topk N] [--similarity F]
  health";

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
struct StoresConfig {
    text_dir: String,
    sqlite_path: String,
}

impl Default for StoresConfig {
    fn default() -> Self {
        Self { text_dir: "../dev_data/indexes/tantivy".to_string(), sqlite_path: "../dev_data/docstore.db".to_string() }
    }
}

#[derive(Debug, Clone, PartialEq)]
struct SearchArgs {
    query: String,
    field: String,
    collections: Vec<CollectionRef>,
    offset: usize,
    limit: usize,
    minimum_should_match: f64,
    select: Vec<String>,
    filters: Vec<(String, String)>,
    timeout: Option<Duration>,
    vector: Option<Vec<f32>>,
    method: FusionMethod,
    weights: Option<Vec<f64>>,
    metric: Metric,
    topk: usize,
    similarity: Option<f64>,
}

fn value<'a>(args: &'a [String], i: usize, flag: &str) -> anyhow::Result<&'a str> {
    args.get(i + 1).map(String::as_str).ok_or_else(|| anyhow!("{flag} requires a value"))
}

fn parse_collections(list: &str) -> anyhow::Result<Vec<CollectionRef>> {
    list.split(',')
        .map(|entry| {
            let (backend, name) = entry.trim().split_once(':').ok_or_else(|| anyhow!("expected backend:name, got {entry:?}"))?;
            Ok(CollectionRef::new(backend, sanitize_collection_name(name)))
        })
        .collect()
}

fn parse_search_args(args: &[String]) -> anyhow::Result<SearchArgs> {
    let mut parsed = SearchArgs {
        query: String::new(),
        field: "content".to_string(),
        collections: Vec::new(),
        offset: 0,
        limit: 10,
        minimum_should_match: 0.0,
        select: Vec::new(),
        filters: Vec::new(),
        timeout: None,
        vector: None,
        method: FusionMethod::RankFusion,
        weights: None,
        metric: Metric::L2,
        topk: 10,
        similarity: None,
    };
    let mut i = 0;
    while i < args.len() {
        let flag = args[i].as_str();
        match flag {
            "--collections" | "-c" => { parsed.collections = parse_collections(value(args, i, flag)?)?; i += 1; }
            "--field" => { parsed.field = value(args, i, flag)?.to_string(); i += 1; }
            "--offset" => { parsed.offset = value(args, i, flag)?.parse().context("--offset requires a number")?; i += 1; }
            "--limit" => { parsed.limit = value(args, i, flag)?.parse().context("--limit requires a number")?; i += 1; }
            "--msm" => { parsed.minimum_should_match = value(args, i, flag)?.parse().context("--msm requires a number")?; i += 1; }
            "--select" => { parsed.select = value(args, i, flag)?.split(',').map(|s| s.trim().to_string()).collect(); i += 1; }
            "--filter" => {
                let (backend, expr) = value(args, i, flag)?.split_once('=').ok_or_else(|| anyhow!("--filter expects backend=expr"))?;
                parsed.filters.push((backend.to_string(), expr.to_string()));
                i += 1;
            }
            "--timeout-ms" => { parsed.timeout = Some(Duration::from_millis(value(args, i, flag)?.parse().context("--timeout-ms requires a number")?)); i += 1; }
            "--vector" => {
                let floats = parse_weights(value(args, i, flag)?)?;
                #[allow(clippy::cast_possible_truncation)]
                let vector = floats.into_iter().map(|f| f as f32).collect();
                parsed.vector = Some(vector);
                i += 1;
            }
            "--method" => { parsed.method = value(args, i, flag)?.parse()?; i += 1; }
            "--weights" => { parsed.weights = Some(parse_weights(value(args, i, flag)?)?); i += 1; }
            "--metric" => { parsed.metric = value(args, i, flag)?.parse()?; i += 1; }
            "--topk" => { parsed.topk = value(args, i, flag)?.parse().context("--topk requires a number")?; i += 1; }
            "--similarity" => { parsed.similarity = Some(value(args, i, flag)?.parse().context("--similarity requires a number")?); i += 1; }
            _ if !flag.starts_with('-') && parsed.query.is_empty() => parsed.query = flag.to_string(),
            _ => bail!("unexpected argument {flag:?}"),
        }
        i += 1;
    }
    if parsed.query.is_empty() {
        bail!("missing query text");
    }
    Ok(parsed)
}

fn build_request(args: &SearchArgs) -> anyhow::Result<SearchRequest> {
    let text = TextMatch::new(args.field.clone(), args.query.clone())?.with_minimum_should_match(args.minimum_should_match)?;
    let descriptor: QueryDescriptor = match &args.vector {
        None => text.into(),
        Some(vector) => {
            let mut dense = DenseMatch::new("embedding", vector.clone(), args.metric, args.topk)?;
            if let Some(threshold) = args.similarity {
                dense = dense.with_similarity(threshold)?;
            }
            let children = vec![text.into(), dense.into()];
            let fusion = match &args.weights {
                Some(weights) => Fusion::new(children, args.method, weights.clone())?,
                None => Fusion::equal_weights(children, args.method)?,
            };
            fusion.into()
        }
    };
    let mut request = SearchRequest::new(descriptor, args.collections.clone(), args.offset, args.limit)?
        .with_select_fields(args.select.clone());
    for (backend, expr) in &args.filters {
        request = request.with_filter(backend.clone(), expr.clone());
    }
    if let Some(timeout) = args.timeout {
        request = request.with_timeout(timeout);
    }
    Ok(request)
}

fn open_federation(config: &Config) -> anyhow::Result<Federation> {
    let federation_config = FederationConfig::from_config(config)?;
    let stores: StoresConfig = config.get_or_default("stores")?;
    let base = env::current_dir()?;
    let text_dir: PathBuf = resolve_with_base(&base, &stores.text_dir);
    let sqlite_path: PathBuf = resolve_with_base(&base, &stores.sqlite_path);

    let text = if text_dir.is_dir() {
        TantivyBackend::open_dir("text", &text_dir)?
    } else {
        tracing::warn!(path = %text_dir.display(), "text index directory missing, no text collections");
        TantivyBackend::new("text")
    };
    let store = SqliteStore::open(&sqlite_path).with_context(|| format!("opening {}", sqlite_path.display()))?;
    Ok(Federation::new(federation_config)
        .with_backend(Arc::new(text))
        .with_backend(Arc::new(SqliteBackend::new("sqlite", Arc::new(store)))))
}

fn parse_args() -> (String, Vec<String>) {
    let mut args: Vec<String> = env::args().skip(1).collect();
    if args.is_empty() { eprintln!("{USAGE}"); std::process::exit(1); }
    let cmd = args.remove(0);
    (cmd, args)
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")))
        .with_writer(std::io::stderr)
        .init();

    let config = Config::load().map_err(|e| { eprintln!("Error loading config: {}", e); e })?;
    let (cmd, args) = parse_args();
    let federation = open_federation(&config)?;
    match cmd.as_str() {
        "search" | "hybrid" => {
            let search_args = parse_search_args(&args)?;
            if cmd == "hybrid" && search_args.vector.is_none() {
                bail!("hybrid requires --vector");
            }
            let request = build_request(&search_args)?;

            let cancel = CancellationToken::new();
            let on_interrupt = cancel.clone();
            tokio::spawn(async move {
                if tokio::signal::ctrl_c().await.is_ok() {
                    info!("received Ctrl+C, cancelling search");
                    on_interrupt.cancel();
                }
            });
            let response = federation.search_with_cancel(&request, &cancel).await?;
            println!("{}", serde_json::to_string_pretty(&response)?);
        }
        "health" => {
            for (backend, status) in federation.health().await {
                match status {
                    Ok(()) => println!("{backend}: ok"),
                    Err(err) => println!("{backend}: {err}"),
                }
            }
        }
        _ => { eprintln!("Unknown command: {}\n{USAGE}", cmd); std::process::exit(1); }
    }
    Ok(())
}
