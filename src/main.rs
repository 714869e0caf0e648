use std::sync::Arc;
use std::time::Duration;

use mailbridge::actions::ActionExecutor;
use mailbridge::classify::catalog::CatalogHandle;
use mailbridge::classify::escalation::{EscalationClassifier, EscalationConfig};
use mailbridge::classify::rules::RulesClassifier;
use mailbridge::classify::types::EmailDocument;
use mailbridge::config::PipelineConfig;
use mailbridge::erp::{ErpClient, HttpErpClient, HttpErpConfig, StubErpClient};
use mailbridge::llm::{OllamaClient, OllamaConfig};
use mailbridge::pipeline::EmailProcessor;
use mailbridge::retrieval::{
    EmbeddingConfig, OllamaEmbeddings, RetrieverConfig, SimilarityRetriever,
};
use mailbridge::store::{ActionStore, ExemplarStore, LibSqlStore};

use tokio::io::{AsyncBufReadExt, BufReader};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    let rules_path = std::env::var("MAILBRIDGE_RULES_PATH")
        .unwrap_or_else(|_| "config/classification_rules.yaml".to_string());
    let db_path =
        std::env::var("MAILBRIDGE_DB_PATH").unwrap_or_else(|_| "./data/mailbridge.db".to_string());
    let llm_host = std::env::var("MAILBRIDGE_LLM_HOST")
        .unwrap_or_else(|_| "http://localhost:11434".to_string());
    let llm_model =
        std::env::var("MAILBRIDGE_LLM_MODEL").unwrap_or_else(|_| "mistral:7b".to_string());
    let embed_model = std::env::var("MAILBRIDGE_EMBED_MODEL")
        .unwrap_or_else(|_| "nomic-embed-text:latest".to_string());
    let embed_dims: usize = match std::env::var("MAILBRIDGE_EMBED_DIM") {
        Ok(raw) => raw
            .parse()
            .map_err(|_| mailbridge::error::ConfigError::InvalidValue {
                key: "MAILBRIDGE_EMBED_DIM".to_string(),
                message: format!("not a number: {raw}"),
            })?,
        Err(_) => 768,
    };

    eprintln!("📮 mailbridge v{}", env!("CARGO_PKG_VERSION"));
    eprintln!("   Rules: {rules_path}");
    eprintln!("   Database: {db_path}");
    eprintln!("   LLM: {llm_host} ({llm_model})");
    eprintln!("   Reading EmailDocument JSON lines from stdin.\n");

    // ── Rule catalog ─────────────────────────────────────────────────
    let catalog = Arc::new(CatalogHandle::from_path(&rules_path).unwrap_or_else(|e| {
        eprintln!("Error: failed to load rules from {rules_path}: {e}");
        std::process::exit(1);
    }));

    // ── Storage ──────────────────────────────────────────────────────
    let store = Arc::new(
        LibSqlStore::new_local(std::path::Path::new(&db_path))
            .await
            .unwrap_or_else(|e| {
                eprintln!("Error: failed to open database at {db_path}: {e}");
                std::process::exit(1);
            }),
    );

    // ── LLM + embeddings ─────────────────────────────────────────────
    let llm = Arc::new(OllamaClient::new(OllamaConfig {
        host: llm_host.clone(),
        model: llm_model,
        timeout: Duration::from_secs(30),
        max_retries: 3,
    })?);
    let embeddings = Arc::new(OllamaEmbeddings::new(EmbeddingConfig {
        host: llm_host,
        model: embed_model,
        dimensions: embed_dims,
        timeout: Duration::from_secs(30),
    })?);

    // ── ERP client ───────────────────────────────────────────────────
    let erp: Arc<dyn ErpClient> = match std::env::var("MAILBRIDGE_ERP_URL") {
        Ok(base_url) => {
            let api_key = std::env::var("MAILBRIDGE_ERP_API_KEY")
                .ok()
                .map(secrecy::SecretString::from);
            eprintln!("   ERP: {base_url}");
            Arc::new(HttpErpClient::new(HttpErpConfig {
                base_url,
                api_key,
                timeout: Duration::from_secs(30),
            })?)
        }
        Err(_) => {
            eprintln!("   ERP: in-process stub (set MAILBRIDGE_ERP_URL for a real endpoint)");
            Arc::new(StubErpClient::new())
        }
    };

    // ── Pipeline ─────────────────────────────────────────────────────
    let retriever = SimilarityRetriever::new(
        embeddings,
        Arc::clone(&store) as Arc<dyn ExemplarStore>,
        RetrieverConfig::default(),
    );
    let executor = ActionExecutor::new(erp, Arc::clone(&store) as Arc<dyn ActionStore>);
    let processor = EmailProcessor::new(
        RulesClassifier::new(catalog),
        EscalationClassifier::new(llm, EscalationConfig::default()),
        retriever,
        executor,
        Arc::clone(&store) as Arc<dyn ActionStore>,
        Arc::clone(&store) as Arc<dyn ExemplarStore>,
        PipelineConfig::default(),
    );

    // ── Stdin loop ───────────────────────────────────────────────────
    // One JSON EmailDocument per line; results go to stdout as JSON lines.
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    while let Some(line) = lines.next_line().await? {
        let line = line.trim().to_string();
        if line.is_empty() {
            continue;
        }

        let (email, context) = match parse_input(&line) {
            Ok(parsed) => parsed,
            Err(e) => {
                tracing::error!(error = %e, "Skipping unparsable input line");
                continue;
            }
        };

        match processor.process_with_context(&email, context).await {
            Ok(processed) => println!("{}", serde_json::to_string(&processed)?),
            Err(e) => {
                tracing::error!(message_id = %email.message_id, error = %e, "Processing failed");
            }
        }
    }

    let stats = processor.stats();
    eprintln!("\n{}", serde_json::to_string_pretty(&stats)?);
    Ok(())
}

/// Accept either a bare `EmailDocument` or `{"email": {...}, "context": {...}}`.
fn parse_input(line: &str) -> Result<(EmailDocument, serde_json::Value), serde_json::Error> {
    #[derive(serde::Deserialize)]
    struct Wrapped {
        email: EmailDocument,
        #[serde(default)]
        context: serde_json::Value,
    }

    if let Ok(wrapped) = serde_json::from_str::<Wrapped>(line) {
        return Ok((wrapped.email, wrapped.context));
    }
    serde_json::from_str::<EmailDocument>(line).map(|e| (e, serde_json::Value::Null))
}
