//! Scripted collaborators shared by the unit tests.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::sync::Semaphore;

use crate::collaborators::{ClientRoster, CollaboratorError, InMemoryClientRoster, InMemoryLookbookStore, LookbookStore};
use crate::gateway::{GenerationError, GenerationGateway, GenerationRequest};
use crate::models::{ClientId, ClientRecord, Lookbook};

#[derive(Debug, Clone)]
pub enum Outcome {
    Image(String),
    Declined,
    Fail(GenerationError),
}

struct Rule {
    key: String,
    outcome: Outcome,
    delay: Duration,
    gate: Option<Arc<Semaphore>>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct RecordedCall {
    pub prompt: String,
    pub source_image: String,
    pub reference_image: Option<String>,
}

/// Gateway whose answers are picked by prompt substring. Rules are checked in
/// the order they were added; unmatched prompts are declined.
#[derive(Default)]
pub struct ScriptedGateway {
    rules: Mutex<Vec<Rule>>,
    calls: Mutex<Vec<RecordedCall>>,
    completed: Mutex<Vec<String>>,
}

impl ScriptedGateway {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn on(&self, key: &str, outcome: Outcome) {
        self.on_delayed(key, outcome, Duration::ZERO);
    }

    pub fn on_delayed(&self, key: &str, outcome: Outcome, delay: Duration) {
        self.rules.lock().push(Rule { key: key.to_string(), outcome, delay, gate: None });
    }

    /// Matching calls block until the returned semaphore receives permits.
    pub fn on_gated(&self, key: &str, outcome: Outcome) -> Arc<Semaphore> {
        let gate = Arc::new(Semaphore::new(0));
        self.rules.lock().push(Rule { key: key.to_string(), outcome, delay: Duration::ZERO, gate: Some(gate.clone()) });
        gate
    }

    pub fn clear_rules(&self) {
        self.rules.lock().clear();
    }

    pub fn calls(&self) -> Vec<RecordedCall> {
        self.calls.lock().clone()
    }

    pub fn completion_order(&self) -> Vec<String> {
        self.completed.lock().clone()
    }
}

#[async_trait]
impl GenerationGateway for ScriptedGateway {
    async fn generate(&self, request: GenerationRequest<'_>) -> Result<Option<String>, GenerationError> {
        self.calls.lock().push(RecordedCall {
            prompt: request.prompt.to_string(),
            source_image: request.source_image.to_string(),
            reference_image: request.reference_image.map(str::to_string),
        });

        let (outcome, delay, gate) = {
            let rules = self.rules.lock();
            match rules.iter().find(|r| request.prompt.contains(&r.key)) {
                Some(r) => (r.outcome.clone(), r.delay, r.gate.clone()),
                None => (Outcome::Declined, Duration::ZERO, None),
            }
        };

        if let Some(gate) = gate {
            if let Ok(permit) = gate.acquire().await {
                permit.forget();
            }
        }
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
        self.completed.lock().push(request.prompt.to_string());

        match outcome {
            Outcome::Image(data) => Ok(Some(data)),
            Outcome::Declined => Ok(None),
            Outcome::Fail(e) => Err(e),
        }
    }
}

/// Store that always fails, for checking that persistence errors stay contained.
#[derive(Default)]
pub struct FailingLookbookStore;

#[async_trait]
impl LookbookStore for FailingLookbookStore {
    async fn save(&self, _lookbook: &Lookbook) -> Result<(), CollaboratorError> {
        Err(CollaboratorError::Persistence("disk full".into()))
    }

    async fn get(&self, _id: uuid::Uuid) -> Option<Lookbook> {
        None
    }

    async fn list_for_client(&self, _client_id: &ClientId) -> Vec<Lookbook> {
        Vec::new()
    }
}

/// Blocks each call until `release` is called, counting how many arrived.
struct Gate {
    arrived: AtomicUsize,
    permits: Semaphore,
}

impl Default for Gate {
    fn default() -> Self {
        Self { arrived: AtomicUsize::new(0), permits: Semaphore::new(0) }
    }
}

impl Gate {
    async fn pass(&self) {
        self.arrived.fetch_add(1, Ordering::SeqCst);
        if let Ok(permit) = self.permits.acquire().await {
            permit.forget();
        }
    }
}

/// In-memory lookbook store whose saves wait for `release`.
#[derive(Default)]
pub struct GatedLookbookStore {
    inner: InMemoryLookbookStore,
    gate: Gate,
}

impl GatedLookbookStore {
    pub fn calls(&self) -> usize {
        self.gate.arrived.load(Ordering::SeqCst)
    }

    pub fn release(&self) {
        self.gate.permits.add_permits(1);
    }
}

#[async_trait]
impl LookbookStore for GatedLookbookStore {
    async fn save(&self, lookbook: &Lookbook) -> Result<(), CollaboratorError> {
        self.gate.pass().await;
        self.inner.save(lookbook).await
    }

    async fn get(&self, id: uuid::Uuid) -> Option<Lookbook> {
        self.inner.get(id).await
    }

    async fn list_for_client(&self, client_id: &ClientId) -> Vec<Lookbook> {
        self.inner.list_for_client(client_id).await
    }
}

/// In-memory roster whose `create` waits for `release`.
#[derive(Default)]
pub struct GatedClientRoster {
    inner: InMemoryClientRoster,
    gate: Gate,
}

impl GatedClientRoster {
    pub fn calls(&self) -> usize {
        self.gate.arrived.load(Ordering::SeqCst)
    }

    pub fn release(&self) {
        self.gate.permits.add_permits(1);
    }
}

#[async_trait]
impl ClientRoster for GatedClientRoster {
    async fn list(&self) -> Vec<ClientRecord> {
        self.inner.list().await
    }

    async fn contains(&self, id: &ClientId) -> bool {
        self.inner.contains(id).await
    }

    async fn create(&self, name: &str) -> Result<ClientId, CollaboratorError> {
        self.gate.pass().await;
        self.inner.create(name).await
    }
}
