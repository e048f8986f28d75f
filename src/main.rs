use anyhow::{bail, Context, Result};
use margin_lib::config::load_config;
use margin_lib::database::get_db_path;
use margin_lib::identity::{anonymous_id_path, load_or_create_anonymous_id, AdminPolicy, Identity};
use margin_lib::logger;
use margin_lib::parsers::MarkdownParser;
use margin_lib::store::{
    AnnotationClient, AnnotationStore, HttpAnnotationStore, LocalAnnotationStore, QueryCache,
};
use margin_lib::ui::{ArticleSession, ListState, MemoryClipboard};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::info;

const USAGE: &str = "usage: margin <markdown-file> <post-id> [db-path | --remote]";

enum Backend {
    Local(Option<PathBuf>),
    Remote,
}

/// Renders a post with its annotations marked inline and prints the HTML.
#[tokio::main]
async fn main() -> Result<()> {
    logger::init_logging();

    let args: Vec<String> = std::env::args().skip(1).collect();
    let (markdown_path, post_id, backend) = match args.as_slice() {
        [path, post] => (path, post, Backend::Local(None)),
        [path, post, flag] if flag == "--remote" => (path, post, Backend::Remote),
        [path, post, db] => (path, post, Backend::Local(Some(PathBuf::from(db)))),
        _ => bail!(USAGE),
    };

    let config = load_config().context("Failed to load config")?;
    let anonymous_id = load_or_create_anonymous_id(&anonymous_id_path()?)?;
    let caller = AdminPolicy::new(&config.admin_emails).caller(Identity::Anonymous(anonymous_id));

    let store: Arc<dyn AnnotationStore> = match backend {
        Backend::Remote => {
            info!("Using annotation API at {}", config.api_base_url);
            Arc::new(HttpAnnotationStore::from_config(&config)?)
        }
        Backend::Local(path) => {
            let db_path = match path {
                Some(path) => path,
                None => get_db_path()?,
            };
            Arc::new(
                LocalAnnotationStore::open(&db_path, &config)
                    .with_context(|| format!("Failed to open {}", db_path.display()))?,
            )
        }
    };
    let client = AnnotationClient::new(store, Arc::new(QueryCache::new()), caller);

    let markdown = MarkdownParser::new(markdown_path)?.read()?;
    let mut session = ArticleSession::new(
        config,
        client,
        post_id,
        &markdown,
        Box::new(MemoryClipboard::default()),
    )?;

    session.load_annotations().await;
    if let ListState::Failed { message } = session.list_state() {
        bail!("Failed to load annotations: {}", message);
    }

    if let Some(report) = session.tick().await {
        info!(
            "{} paragraph(s), {} annotation(s) placed, {} unresolved",
            session.paragraphs().len(),
            report.placed.len(),
            report.unresolved.len()
        );
    }

    println!("{}", session.html());
    Ok(())
}
