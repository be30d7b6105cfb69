use std::io::Read;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use limn_core::annotate::AnnotatedDocument;
use limn_core::{
    Annotator, ClientConfig, HttpClient, MemoryCache, Registry, Resolver, DEFAULT_ENTITY_TYPE,
    DEFAULT_LANGUAGE,
};

const VIEWER_TEMPLATE: &str = include_str!("../assets/viewer.html");

#[derive(Parser)]
#[command(
    name = "limn",
    version,
    about = "Knowledge graph entity resolution and document annotation"
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Resolve an identifier into a merged entity record
    Entity {
        /// Identifier, optionally namespace-qualified, e.g. Q17 or wd:Q90
        id: String,
        #[arg(long, default_value = DEFAULT_LANGUAGE)]
        language: String,
        #[arg(long, default_value = DEFAULT_ENTITY_TYPE)]
        entity_type: String,
        /// Namespace for unqualified identifiers
        #[arg(long)]
        namespace: Option<String>,
    },
    /// Fetch a wiki page and annotate its entities
    Page {
        title: String,
        #[arg(long, default_value = "en.wikipedia.org")]
        site: String,
        #[arg(long, default_value = DEFAULT_LANGUAGE)]
        language: String,
        /// Print the raw wikitext instead of annotating
        #[arg(long)]
        wikitext: bool,
        #[arg(long, value_enum, default_value_t = Format::Html)]
        format: Format,
    },
    /// Annotate a local HTML document ("-" reads stdin)
    Annotate {
        file: String,
        #[arg(long, default_value = DEFAULT_LANGUAGE)]
        language: String,
        #[arg(long, value_enum, default_value_t = Format::Html)]
        format: Format,
    },
}

#[derive(Clone, Copy, ValueEnum)]
enum Format {
    Json,
    Html,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let client = HttpClient::new(&ClientConfig::default())?;
    let registry = Arc::new(Registry::default());

    match cli.command {
        Commands::Entity {
            id,
            language,
            entity_type,
            namespace,
        } => {
            let id = match namespace {
                Some(ns) if !id.contains(':') => format!("{ns}:{id}"),
                _ => id,
            };
            let resolver = Resolver::new(client, registry, Arc::new(MemoryCache::new()));
            let record = resolver.resolve(&id, &language, &entity_type).await?;
            println!("{}", serde_json::to_string_pretty(&record)?);
        }
        Commands::Page {
            title,
            site,
            language,
            wikitext,
            format,
        } => {
            if wikitext {
                let text = limn_core::wiki::fetch_page_wikitext(&client, &site, &title).await?;
                println!("{text}");
                return Ok(());
            }
            let html = limn_core::wiki::fetch_page_html(&client, &site, &title).await?;
            let doc = Annotator::new(client, registry)
                .annotate(&html, &language)
                .await?;
            print_document(&title, &doc, format)?;
        }
        Commands::Annotate {
            file,
            language,
            format,
        } => {
            let html = read_input(&file)?;
            let doc = Annotator::new(client, registry)
                .annotate(&html, &language)
                .await?;
            print_document(&file, &doc, format)?;
        }
    }
    Ok(())
}

fn read_input(file: &str) -> Result<String> {
    if file == "-" {
        let mut buf = String::new();
        std::io::stdin().read_to_string(&mut buf)?;
        Ok(buf)
    } else {
        std::fs::read_to_string(file).with_context(|| format!("reading {file}"))
    }
}

fn print_document(title: &str, doc: &AnnotatedDocument, format: Format) -> Result<()> {
    match format {
        Format::Json => println!("{}", serde_json::to_string_pretty(doc)?),
        Format::Html => {
            let page = VIEWER_TEMPLATE
                .replace("{{title}}", title)
                .replace("{{article}}", &doc.html);
            println!("{page}");
        }
    }
    Ok(())
}
