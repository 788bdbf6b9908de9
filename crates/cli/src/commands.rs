//! Command parsing and execution.
//!
//! Every command except `watch` produces one JSON document that `main`
//! prints to stdout.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{bail, Context};
use chrono::Utc;
use serde_json::{json, Value};
use slidepin_core::anchor::Point;
use slidepin_core::document::resolve_document_id;
use slidepin_core::feedback::FeedbackParser;
use slidepin_core::persistence::{storage_usage, JsonFileStore, KeyValueStore};
use slidepin_core::pins::{PinStore, SyncStatus};
use slidepin_core::project::{find_similar, Discovery, ProjectContextStore};
use slidepin_core::types::SlidePage;
use slidepin_events::{event_types, EventBus, ReviewEvent};
use tokio::io::AsyncReadExt;

use crate::config::CliConfig;

pub const USAGE: &str = "\
usage: slidepin [--document <id|url>] <command> [args]

commands:
  review <file|->                    parse reviewer output into pins
  pins                               print the stored pins
  place <page> <x> <y> [feedback]    add a manual pin at a slide-relative point
  open [title]                       resolve the document's project
  link <project-id>                  link the document to a project
  similar <title>                    list projects with similar names
  context                            print the project context prompt
  fill <project-id> <context-id> <text>
                                     fill an external context
  maintain                           run one maintenance pass
  usage                              report storage usage
  watch                              run maintenance periodically until stopped
";

// ---------------------------------------------------------------------------
// Parsing
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq)]
pub enum Command {
    Review { input: PathBuf },
    Pins,
    Place {
        slide_page: SlidePage,
        x: f64,
        y: f64,
        feedback_id: Option<String>,
    },
    Open { title: Option<String> },
    Link { project_id: String },
    Similar { title: String },
    Context,
    Fill {
        project_id: String,
        context_id: String,
        content: String,
    },
    Maintain,
    Usage,
    Watch,
    Help,
}

/// A parsed command line.
#[derive(Debug, Clone, PartialEq)]
pub struct Invocation {
    /// `--document` / `-d`, a document id or presentation URL.
    pub document: Option<String>,
    pub command: Command,
}

impl Invocation {
    /// Parse arguments without the program name.
    pub fn parse<I, S>(args: I) -> anyhow::Result<Self>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut document = None;
        let mut rest = Vec::new();
        let mut args = args.into_iter().map(Into::into);
        while let Some(arg) = args.next() {
            match arg.as_str() {
                "--document" | "-d" => {
                    document = Some(args.next().context("--document needs a value")?);
                }
                "--help" | "-h" => rest.push("help".to_string()),
                _ => rest.push(arg),
            }
        }

        let Some((name, operands)) = rest.split_first() else {
            return Ok(Self { document, command: Command::Help });
        };

        let command = match (name.as_str(), operands) {
            ("review", [input]) => Command::Review { input: PathBuf::from(input) },
            ("pins", []) => Command::Pins,
            ("place", [page, x, y, feedback @ ..]) if feedback.len() <= 1 => Command::Place {
                slide_page: page
                    .parse()
                    .with_context(|| format!("slide page must be a positive integer, got {page:?}"))?,
                x: parse_ratio("x", x)?,
                y: parse_ratio("y", y)?,
                feedback_id: feedback.first().cloned(),
            },
            ("open", []) => Command::Open { title: None },
            ("open", title) => Command::Open { title: Some(title.join(" ")) },
            ("link", [project_id]) => Command::Link { project_id: project_id.clone() },
            ("similar", title) if !title.is_empty() => Command::Similar { title: title.join(" ") },
            ("context", []) => Command::Context,
            ("fill", [project_id, context_id, content @ ..]) if !content.is_empty() => Command::Fill {
                project_id: project_id.clone(),
                context_id: context_id.clone(),
                content: content.join(" "),
            },
            ("maintain", []) => Command::Maintain,
            ("usage", []) => Command::Usage,
            ("watch", []) => Command::Watch,
            ("help", _) => Command::Help,
            (other, _) => bail!("invalid arguments for {other:?}\n\n{USAGE}"),
        };

        Ok(Self { document, command })
    }
}

fn parse_ratio(name: &str, raw: &str) -> anyhow::Result<f64> {
    let value: f64 = raw
        .parse()
        .with_context(|| format!("{name} must be a number, got {raw:?}"))?;
    anyhow::ensure!(
        (0.0..=1.0).contains(&value),
        "{name} must be a slide-relative ratio within 0..=1, got {value}"
    );
    Ok(value)
}

// ---------------------------------------------------------------------------
// Execution
// ---------------------------------------------------------------------------

/// Shared services for one CLI run.
pub struct App {
    config: CliConfig,
    store: Arc<dyn KeyValueStore>,
    projects: Arc<ProjectContextStore>,
    bus: Arc<EventBus>,
}

impl App {
    /// Open the file store under `config.store_dir`.
    pub async fn open(config: CliConfig) -> anyhow::Result<Self> {
        let store = JsonFileStore::open(&config.store_dir)
            .await
            .with_context(|| format!("Failed to open store at {}", config.store_dir.display()))?;
        Ok(Self::with_store(config, Arc::new(store)))
    }

    pub fn with_store(config: CliConfig, store: Arc<dyn KeyValueStore>) -> Self {
        let projects = Arc::new(
            ProjectContextStore::new(Arc::clone(&store))
                .with_similarity_threshold(config.similarity_threshold),
        );
        Self {
            config,
            store,
            projects,
            bus: Arc::new(EventBus::default()),
        }
    }

    pub fn bus(&self) -> &Arc<EventBus> {
        &self.bus
    }

    pub fn projects(&self) -> &Arc<ProjectContextStore> {
        &self.projects
    }

    pub fn config(&self) -> &CliConfig {
        &self.config
    }

    fn document_id(&self, document: Option<&str>) -> anyhow::Result<String> {
        let raw = document.unwrap_or(&self.config.document_id);
        resolve_document_id(raw).with_context(|| format!("Not a document id or presentation URL: {raw:?}"))
    }

    async fn pin_store(&self, document_id: &str) -> anyhow::Result<PinStore> {
        PinStore::restore(document_id, Arc::clone(&self.store))
            .await
            .with_context(|| format!("Failed to load pins for {document_id}"))
    }

    fn report(&self, document_id: &str, operation: &str, status: &SyncStatus) {
        if let Some(event) = ReviewEvent::from_sync_status(document_id, operation, status) {
            self.bus.publish(event);
        }
    }

    /// Run a one-shot command and return its JSON output.
    pub async fn execute(&self, invocation: Invocation) -> anyhow::Result<Value> {
        let document = invocation.document.as_deref();
        match invocation.command {
            Command::Review { input } => {
                let raw = read_input(&input).await?;
                self.review(&self.document_id(document)?, &raw).await
            }
            Command::Pins => {
                let document_id = self.document_id(document)?;
                let pins = self.pin_store(&document_id).await?;
                Ok(json!({
                    "documentId": document_id,
                    "total": pins.total_pins(),
                    "pins": pins.snapshot().as_ref(),
                }))
            }
            Command::Place { slide_page, x, y, feedback_id } => {
                let document_id = self.document_id(document)?;
                let pins = self.pin_store(&document_id).await?;
                if let Some(id) = &feedback_id {
                    if pins.feedback_item(id).is_none() {
                        tracing::warn!(feedback_id = %id, "Placing pin for unknown feedback item");
                    }
                }
                let (pin, status) = pins
                    .add_manual_pin(feedback_id.as_deref(), slide_page, Point { x, y })
                    .await;
                self.bus.publish(
                    ReviewEvent::new(event_types::PIN_PLACED)
                        .for_document(&document_id)
                        .with_payload(json!({ "pinId": pin.pin_id, "slidePage": pin.slide_page })),
                );
                self.report(&document_id, "add_manual_pin", &status);
                Ok(json!({ "pin": pin, "saved": status.is_saved() }))
            }
            Command::Open { title } => self.open_document(&self.document_id(document)?, title).await,
            Command::Link { project_id } => {
                let document_id = self.document_id(document)?;
                self.projects.link_document(&document_id, &project_id).await?;
                Ok(json!({ "documentId": document_id, "projectId": project_id }))
            }
            Command::Similar { title } => {
                let projects = self.projects.list().await?;
                let similar = find_similar(&title, &projects, self.config.similarity_threshold);
                Ok(json!({ "title": title, "projects": similar }))
            }
            Command::Context => {
                let document_id = self.document_id(document)?;
                let prompt = self.projects.context_prompt_for_document(&document_id).await?;
                Ok(json!({ "documentId": document_id, "prompt": prompt }))
            }
            Command::Fill { project_id, context_id, content } => {
                let project = self.projects.fill_context(&project_id, &context_id, &content).await?;
                Ok(json!({ "project": project }))
            }
            Command::Maintain => {
                let report = self.projects.maintain_all(Utc::now()).await?;
                Ok(json!({ "report": report }))
            }
            Command::Usage => {
                let usage = storage_usage(self.store.as_ref()).await?;
                if usage.is_over_quota() {
                    tracing::warn!(bytes_used = usage.bytes_used, "Storage quota exceeded");
                }
                Ok(json!({
                    "bytesUsed": usage.bytes_used,
                    "quotaBytes": usage.quota_bytes,
                    "fraction": usage.fraction(),
                }))
            }
            Command::Help => Ok(json!({ "usage": USAGE })),
            Command::Watch => bail!("watch runs in the foreground, not as a one-shot command"),
        }
    }

    /// Parse `raw` and regenerate the document's pins from it.
    pub async fn review(&self, document_id: &str, raw: &str) -> anyhow::Result<Value> {
        let outcome = FeedbackParser::parse_with_tier(raw);
        let pins = self.pin_store(document_id).await?;
        let status = pins.regenerate(outcome.items.clone()).await;

        self.bus.publish(
            ReviewEvent::new(event_types::PINS_REGENERATED)
                .for_document(document_id)
                .with_payload(json!({ "items": outcome.items.len(), "pins": pins.total_pins() })),
        );
        self.report(document_id, "regenerate", &status);
        tracing::info!(
            document_id,
            tier = outcome.tier.as_str(),
            items = outcome.items.len(),
            pins = pins.total_pins(),
            "Review applied"
        );

        let items: Vec<Value> = outcome
            .items
            .iter()
            .map(|item| {
                json!({
                    "id": item.id,
                    "title": item.title,
                    "anchors": item.anchors.len(),
                    "positioned": item.is_positioned(),
                })
            })
            .collect();

        Ok(json!({
            "documentId": document_id,
            "tier": outcome.tier,
            "items": items,
            "pins": pins.total_pins(),
            "saved": status.is_saved(),
        }))
    }

    /// Linked project, link candidates, or a freshly created project when
    /// nothing resembles `title`.
    async fn open_document(&self, document_id: &str, title: Option<String>) -> anyhow::Result<Value> {
        let title = title.unwrap_or_default();
        let now = Utc::now();
        match self.projects.discover(document_id, &title).await? {
            Discovery::Linked(project) => {
                let reminder = self.projects.pending_reminder(&project.project_id, now).await?;
                Ok(json!({ "status": "linked", "project": project, "reminder": reminder }))
            }
            Discovery::Candidates(candidates) => {
                Ok(json!({ "status": "candidates", "documentId": document_id, "candidates": candidates }))
            }
            Discovery::Unmatched => {
                let project = self
                    .projects
                    .load_or_create_for_document(document_id, Some(&title))
                    .await?;
                Ok(json!({ "status": "created", "project": project }))
            }
        }
    }
}

async fn read_input(input: &Path) -> anyhow::Result<String> {
    if input.as_os_str() == "-" {
        let mut raw = String::new();
        tokio::io::stdin()
            .read_to_string(&mut raw)
            .await
            .context("Failed to read review from stdin")?;
        return Ok(raw);
    }
    tokio::fs::read_to_string(input)
        .await
        .with_context(|| format!("Failed to read review from {}", input.display()))
}
