mod display;

use std::io::Read;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, bail};
use apimock_ai::{MockGenerator, OllamaModel, Readiness};
use apimock_core::template::{field_annotations, strip_for_schema};
use apimock_core::{
    DEFAULT_MARKER, MockDraft, MockId, Verb, compile, derive_schema, extract_drafts, parse_archive,
};
use apimock_rules::{
    DATA_URL_PREFIX, MemoryRuleEngine, Reconciler, RequestInfo, RequestMethod, ResourceType,
    RuleAction, RuleEngine,
};
use apimock_store::{LocalStore, MockRepository};
use clap::{Args, Parser, Subcommand, ValueEnum};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, fmt};

#[derive(Parser)]
#[command(
    name = "apimock",
    version,
    about = "Compose API mocks from annotated JSON and keep redirect rules in step"
)]
struct Cli {
    /// Directory holding store.json and rules.json
    #[arg(long, global = true, env = "APIMOCK_DATA_DIR", default_value = ".apimock")]
    data_dir: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Compile an endpoint into its URL template
    Compile {
        url: String,
        /// Verb used when the endpoint carries no MT parameter
        #[arg(long, default_value = "GET")]
        verb: String,
    },
    /// Print the JSON Schema and annotations of a template (stdin if no file)
    Schema {
        #[arg(short, long)]
        file: Option<PathBuf>,
    },
    /// Save a mock from an endpoint and an annotated template
    Add {
        #[command(flatten)]
        source: MockSource,
    },
    /// Fill a template with a local model and save the result as a mock
    Generate {
        #[command(flatten)]
        source: MockSource,
        #[command(flatten)]
        model: ModelArgs,
    },
    /// List saved mocks
    List,
    /// Show one mock with its editable fields
    Show { id: i64 },
    /// Enable or disable one mock
    Toggle { id: i64 },
    /// Delete one mock
    Delete { id: i64 },
    /// Delete every mock
    Clear,
    /// Show or set the global mocking switch
    Global { state: Option<Switch> },
    /// Change a mock's verb
    SetVerb { id: i64, verb: String },
    /// Change a mock's endpoint
    SetUrl { id: i64, url: String },
    /// Set a body field, e.g. `Data.Items[0].Name`
    SetField { id: i64, path: String, value: String },
    /// Append an item to a body array
    AddItem { id: i64, path: String },
    /// Remove an item from a body array
    RemoveItem { id: i64, path: String, index: usize },
    /// Import mocks from a HAR capture
    ImportHar {
        file: PathBuf,
        /// Only requests whose URL contains this text are imported
        #[arg(long, default_value = DEFAULT_MARKER)]
        marker: String,
    },
    /// Print the installed rule table
    Rules,
    /// Show which rule, if any, a request would hit
    Match {
        url: String,
        #[arg(long, default_value = "post")]
        method: String,
        #[arg(long, default_value = "xmlhttprequest")]
        resource_type: String,
    },
}

#[derive(Args)]
struct MockSource {
    /// Endpoint, e.g. `/ISAPI/System/<id>/status?MT=GET`
    url: String,
    /// Template file (stdin if omitted)
    #[arg(short, long)]
    file: Option<PathBuf>,
    /// Verb used when the endpoint carries no MT parameter
    #[arg(long, default_value = "GET")]
    verb: String,
    /// Print the draft without saving it
    #[arg(long)]
    dry_run: bool,
}

#[derive(Args)]
struct ModelArgs {
    /// Ollama server
    #[arg(long, env = "APIMOCK_MODEL_ENDPOINT", default_value = "http://localhost:11434")]
    endpoint: String,
    #[arg(long, env = "APIMOCK_MODEL", default_value = "llama3.2")]
    model: String,
}

#[derive(Clone, Copy, ValueEnum)]
enum Switch {
    On,
    Off,
}

struct App {
    repo: MockRepository<LocalStore>,
    reconciler: Reconciler<LocalStore, MemoryRuleEngine>,
}

impl App {
    async fn open(data_dir: &Path) -> anyhow::Result<Self> {
        let store = LocalStore::open(&data_dir.join("store.json"))
            .with_context(|| format!("opening store in {}", data_dir.display()))?;
        let engine = MemoryRuleEngine::open(&data_dir.join("rules.json"))
            .with_context(|| format!("opening rule table in {}", data_dir.display()))?;

        let repo = MockRepository::new(Arc::new(store));
        repo.initialize().await?;
        let reconciler = Reconciler::new(repo.clone(), Arc::new(engine));
        Ok(Self { repo, reconciler })
    }

    async fn sync(&self) -> anyhow::Result<()> {
        let report = self.reconciler.reconcile().await?;
        display::print_report(&report);
        Ok(())
    }

    async fn save(&self, draft: MockDraft, dry_run: bool) -> anyhow::Result<()> {
        if dry_run {
            println!("{} {}", draft.verb, draft.url_template);
            println!("{}", serde_json::to_string_pretty(&draft.body)?);
            return Ok(());
        }
        let saved = self.repo.save_draft(draft).await?;
        println!("Saved mock {} ({} {})", saved.id, saved.verb, saved.url_template);
        self.sync().await
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| "apimock=info,warn".into()))
        .with(fmt::layer().with_writer(std::io::stderr))
        .init();

    let cli = Cli::parse();
    tracing::debug!(data_dir = %cli.data_dir.display(), "apimock v{}", env!("CARGO_PKG_VERSION"));

    match cli.command {
        Commands::Compile { url, verb } => {
            let compiled = compile(&url, &Verb::new(verb))?;
            display::print_compiled(&compiled);
        }
        Commands::Schema { file } => {
            let text = read_input(file.as_deref())?;
            let schema = derive_schema(&strip_for_schema(&text));
            println!("{}", serde_json::to_string_pretty(&schema.to_json())?);
            println!();
            display::print_annotations(&field_annotations(&text));
        }
        Commands::Add { source } => {
            let template = read_input(source.file.as_deref())?;
            let draft = MockDraft::compose(&source.url, &Verb::new(&source.verb), &template)?;
            let app = App::open(&cli.data_dir).await?;
            app.save(draft, source.dry_run).await?;
        }
        Commands::Generate { source, model } => {
            let template = read_input(source.file.as_deref())?;
            let tree = generate(&template, model).await?;
            let draft = MockDraft::from_generated(&source.url, &Verb::new(&source.verb), tree)?;
            let app = App::open(&cli.data_dir).await?;
            app.save(draft, source.dry_run).await?;
        }
        Commands::List => {
            let app = App::open(&cli.data_dir).await?;
            let mocks = app.repo.mocks().await?;
            display::print_mock_table(&mocks, app.repo.global_enabled().await?);
        }
        Commands::Show { id } => {
            let app = App::open(&cli.data_dir).await?;
            display::print_mock_card(&app.repo.get(MockId(id)).await?)?;
        }
        Commands::Toggle { id } => {
            let app = App::open(&cli.data_dir).await?;
            let enabled = app.repo.toggle(MockId(id)).await?;
            println!("Mock {id} {}", if enabled { "enabled" } else { "disabled" });
            app.sync().await?;
        }
        Commands::Delete { id } => {
            let app = App::open(&cli.data_dir).await?;
            app.repo.delete(MockId(id)).await?;
            println!("Deleted mock {id}");
            app.sync().await?;
        }
        Commands::Clear => {
            let app = App::open(&cli.data_dir).await?;
            app.repo.delete_all().await?;
            println!("Deleted all mocks");
            app.sync().await?;
        }
        Commands::Global { state } => {
            let app = App::open(&cli.data_dir).await?;
            match state {
                None => {
                    let on = app.repo.global_enabled().await?;
                    println!("Mocking is {}", if on { "ON" } else { "OFF" });
                }
                Some(state) => {
                    app.repo
                        .set_global_enabled(matches!(state, Switch::On))
                        .await?;
                    app.sync().await?;
                }
            }
        }
        Commands::SetVerb { id, verb } => {
            let app = App::open(&cli.data_dir).await?;
            let updated = app.repo.update_verb(MockId(id), Verb::new(verb)).await?;
            println!("Mock {id} now answers {}", updated.url_template);
            app.sync().await?;
        }
        Commands::SetUrl { id, url } => {
            let app = App::open(&cli.data_dir).await?;
            if app.repo.update_url(MockId(id), &url).await? {
                app.sync().await?;
            } else {
                println!("Mock {id}: template unchanged");
            }
        }
        Commands::SetField { id, path, value } => {
            let app = App::open(&cli.data_dir).await?;
            let updated = app.repo.update_body_field(MockId(id), &path, &value).await?;
            display::print_mock_card(&updated)?;
            app.sync().await?;
        }
        Commands::AddItem { id, path } => {
            let app = App::open(&cli.data_dir).await?;
            let updated = app.repo.push_array_item(MockId(id), &path).await?;
            display::print_mock_card(&updated)?;
            app.sync().await?;
        }
        Commands::RemoveItem { id, path, index } => {
            let app = App::open(&cli.data_dir).await?;
            let updated = app.repo.remove_array_item(MockId(id), &path, index).await?;
            display::print_mock_card(&updated)?;
            app.sync().await?;
        }
        Commands::ImportHar { file, marker } => {
            let text = std::fs::read_to_string(&file)
                .with_context(|| format!("reading {}", file.display()))?;
            let archive = parse_archive(&text)?;
            let drafts = extract_drafts(&archive, &marker);
            if drafts.is_empty() {
                println!("No requests matching {marker:?} with a JSON response");
                return Ok(());
            }
            let app = App::open(&cli.data_dir).await?;
            let added = app.repo.import(drafts).await?;
            println!("Imported {} mocks", added.len());
            app.sync().await?;
        }
        Commands::Rules => {
            let app = App::open(&cli.data_dir).await?;
            display::print_rules(&app.reconciler.engine().dynamic_rules().await?);
        }
        Commands::Match {
            url,
            method,
            resource_type,
        } => {
            let request = RequestInfo {
                url,
                method: RequestMethod::parse(&method)
                    .with_context(|| format!("unknown request method {method:?}"))?,
                resource_type: parse_resource_type(&resource_type)?,
            };
            let app = App::open(&cli.data_dir).await?;
            match app.reconciler.engine().evaluate(&request).await? {
                None => println!("No rule matches; the request goes to the network"),
                Some(rule) => {
                    println!("Rule {} ({})", rule.id, rule.condition.url_filter);
                    if let RuleAction::Redirect { redirect } = &rule.action {
                        let encoded = redirect
                            .url
                            .strip_prefix(DATA_URL_PREFIX)
                            .unwrap_or(&redirect.url);
                        println!("{}", urlencoding::decode(encoded)?);
                    }
                }
            }
        }
    }

    Ok(())
}

// ── Helpers ──

const DOWNLOAD_POLL: Duration = Duration::from_secs(2);

/// Probe the model, waiting out a download, then generate and tear the
/// session down. Ctrl-C cancels the in-flight call.
async fn generate(template: &str, args: ModelArgs) -> anyhow::Result<serde_json::Value> {
    let generator = Arc::new(MockGenerator::new(OllamaModel::new(
        args.endpoint,
        args.model.clone(),
    )));
    let mut readiness = generator.probe().await;
    if readiness == Readiness::Downloading {
        eprintln!("Downloading model {}, waiting for it to finish...", args.model);
    }
    while readiness == Readiness::Downloading {
        tokio::time::sleep(DOWNLOAD_POLL).await;
        readiness = generator.probe().await;
    }
    match readiness {
        Readiness::Ready => {}
        Readiness::Unavailable(reason) => bail!("cannot generate: {reason}"),
        Readiness::Unprobed | Readiness::Downloading => bail!("cannot generate: model is not ready"),
    }

    let canceller = {
        let generator = Arc::clone(&generator);
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                generator.cancel().await;
            }
        })
    };
    let result = generator.generate(template).await;
    canceller.abort();
    generator.destroy().await;

    Ok(result?)
}

fn read_input(file: Option<&Path>) -> anyhow::Result<String> {
    match file {
        Some(path) => {
            std::fs::read_to_string(path).with_context(|| format!("reading {}", path.display()))
        }
        None => {
            let mut text = String::new();
            std::io::stdin()
                .read_to_string(&mut text)
                .context("reading template from stdin")?;
            Ok(text)
        }
    }
}

fn parse_resource_type(text: &str) -> anyhow::Result<ResourceType> {
    serde_json::from_value(serde_json::Value::String(text.trim().to_ascii_lowercase()))
        .with_context(|| format!("unknown resource type {text:?}"))
}
