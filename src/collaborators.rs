//! Narrow interfaces the studio depends on, plus the in-memory versions the
//! service runs with.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};

use async_trait::async_trait;
use chrono::Utc;
use include_dir::{include_dir, Dir};
use parking_lot::RwLock;
use thiserror::Error;
use tracing::{info, warn};
use uuid::Uuid;

use crate::models::{ClientId, ClientRecord, Lookbook, NewStyleRequest, StyleDescriptor, StyleReferenceBundle, StyleSource};

static BUILT_IN_STYLES: Dir<'_> = include_dir!("$CARGO_MANIFEST_DIR/assets/styles");

#[derive(Debug, Error, Clone, PartialEq)]
pub enum CollaboratorError {
    #[error("persistence failed: {0}")]
    Persistence(String),
    #[error("unknown client: {0}")]
    UnknownClient(ClientId),
    #[error("invalid input: {0}")]
    InvalidInput(String),
}

/// Counts successful generations for billing/quota display.
pub trait UsageCounter: Send + Sync {
    fn record_generation(&self);
}

#[async_trait]
pub trait LookbookStore: Send + Sync {
    async fn save(&self, lookbook: &Lookbook) -> Result<(), CollaboratorError>;
    async fn get(&self, id: Uuid) -> Option<Lookbook>;
    async fn list_for_client(&self, client_id: &ClientId) -> Vec<Lookbook>;
}

#[async_trait]
pub trait ClientRoster: Send + Sync {
    async fn list(&self) -> Vec<ClientRecord>;
    async fn contains(&self, id: &ClientId) -> bool;
    async fn create(&self, name: &str) -> Result<ClientId, CollaboratorError>;
}

#[async_trait]
pub trait StyleCatalog: Send + Sync {
    /// Styles used to seed the initial batch. The user-authored library wins
    /// over the built-in catalog whenever it is non-empty.
    async fn initial_styles(&self) -> Vec<StyleDescriptor>;
    async fn reference_bundle(&self, style_id: &str) -> Option<StyleReferenceBundle>;
}

// --- In-memory implementations ---

#[derive(Debug, Default)]
pub struct InMemoryUsageCounter {
    count: AtomicU64,
}

impl InMemoryUsageCounter {
    pub fn count(&self) -> u64 {
        self.count.load(Ordering::Relaxed)
    }
}

impl UsageCounter for InMemoryUsageCounter {
    fn record_generation(&self) {
        self.count.fetch_add(1, Ordering::Relaxed);
    }
}

#[derive(Debug, Default)]
pub struct InMemoryLookbookStore {
    store: RwLock<HashMap<Uuid, Lookbook>>,
}

#[async_trait]
impl LookbookStore for InMemoryLookbookStore {
    async fn save(&self, lookbook: &Lookbook) -> Result<(), CollaboratorError> {
        let mut guard = self.store.write();
        if guard.contains_key(&lookbook.id) {
            return Err(CollaboratorError::Persistence(format!("lookbook {} already exists", lookbook.id)));
        }
        guard.insert(lookbook.id, lookbook.clone());
        Ok(())
    }

    async fn get(&self, id: Uuid) -> Option<Lookbook> {
        self.store.read().get(&id).cloned()
    }

    async fn list_for_client(&self, client_id: &ClientId) -> Vec<Lookbook> {
        let mut books: Vec<Lookbook> = self.store.read().values().filter(|l| &l.client_id == client_id).cloned().collect();
        books.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        books
    }
}

#[derive(Debug, Default)]
pub struct InMemoryClientRoster {
    clients: RwLock<Vec<ClientRecord>>,
}

#[async_trait]
impl ClientRoster for InMemoryClientRoster {
    async fn list(&self) -> Vec<ClientRecord> {
        self.clients.read().clone()
    }

    async fn contains(&self, id: &ClientId) -> bool {
        self.clients.read().iter().any(|c| &c.id == id)
    }

    async fn create(&self, name: &str) -> Result<ClientId, CollaboratorError> {
        let name = name.trim();
        if name.is_empty() {
            return Err(CollaboratorError::InvalidInput("client name is empty".into()));
        }
        let record = ClientRecord { id: Uuid::new_v4().to_string(), name: name.to_string(), created_at: Utc::now() };
        info!("👤 Created client '{}' ({})", record.name, record.id);
        let id = record.id.clone();
        self.clients.write().push(record);
        Ok(id)
    }
}

#[derive(Debug, Default)]
pub struct InMemoryStyleCatalog {
    built_in: Vec<StyleDescriptor>,
    user_authored: RwLock<Vec<(StyleDescriptor, StyleReferenceBundle)>>,
}

impl InMemoryStyleCatalog {
    /// Catalog seeded with the styles bundled under `assets/styles`.
    pub fn with_built_in() -> Self {
        let mut files: Vec<_> = BUILT_IN_STYLES.files().collect();
        files.sort_by_key(|f| f.path().to_path_buf());
        let built_in = files
            .into_iter()
            .filter_map(|file| {
                let parsed = file.contents_utf8().map(serde_json::from_str::<StyleDescriptor>);
                match parsed {
                    Some(Ok(style)) => Some(style),
                    Some(Err(e)) => {
                        warn!("Skipping built-in style {}: {}", file.path().display(), e);
                        None
                    }
                    None => None,
                }
            })
            .collect();
        Self::new(built_in)
    }

    pub fn new(built_in: Vec<StyleDescriptor>) -> Self {
        Self { built_in, user_authored: RwLock::default() }
    }

    pub fn add_user_style(&self, request: NewStyleRequest) -> Result<StyleDescriptor, CollaboratorError> {
        if request.display_name.trim().is_empty() || request.text_prompt.trim().is_empty() {
            return Err(CollaboratorError::InvalidInput("style needs a name and a prompt".into()));
        }
        let references = request.references.unwrap_or_default();
        let style = StyleDescriptor {
            id: format!("user-{}", Uuid::new_v4()),
            display_name: request.display_name.trim().to_string(),
            text_prompt: request.text_prompt.trim().to_string(),
            reference_image: references.front.clone(),
            source: StyleSource::UserAuthored,
        };
        info!("🎨 Added user style '{}' ({} reference views)", style.display_name, [&references.front, &references.back, &references.left, &references.right, &references.top].iter().filter(|r| r.is_some()).count());
        self.user_authored.write().push((style.clone(), references));
        Ok(style)
    }

    pub fn all_styles(&self) -> Vec<StyleDescriptor> {
        let mut styles: Vec<_> = self.user_authored.read().iter().map(|(s, _)| s.clone()).collect();
        styles.extend(self.built_in.iter().cloned());
        styles
    }
}

#[async_trait]
impl StyleCatalog for InMemoryStyleCatalog {
    async fn initial_styles(&self) -> Vec<StyleDescriptor> {
        let user = self.user_authored.read();
        if user.is_empty() {
            self.built_in.clone()
        } else {
            user.iter().map(|(s, _)| s.clone()).collect()
        }
    }

    async fn reference_bundle(&self, style_id: &str) -> Option<StyleReferenceBundle> {
        self.user_authored
            .read()
            .iter()
            .find(|(s, _)| s.id == style_id)
            .map(|(_, bundle)| bundle.clone())
            .filter(|bundle| !bundle.is_empty())
    }
}
