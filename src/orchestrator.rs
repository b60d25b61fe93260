//! Runs one Design Studio session.

use std::sync::Arc;

use parking_lot::Mutex;
use serde::Serialize;
use tokio::sync::broadcast;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::batch::{generate_batch, generate_one, BatchItem};
use crate::collaborators::{ClientRoster, LookbookStore, StyleCatalog, UsageCounter};
use crate::error::StudioError;
use crate::gateway::GenerationGateway;
use crate::history::{HistoryEntry, HistoryOrigin, SessionHistory};
use crate::lookbook::LookbookAssembler;
use crate::models::{ClientId, GeneratedImage, Lookbook, SourceImage, StyleSource, ViewLabel};
use crate::pipeline::{
    entry_effect, transition, Effect, FinalLook, PipelineError, PipelineEvent, PipelineState, RecoveryAction, RunToken, Stage,
};
use crate::prompts::build_angle_prompt;

/// The collaborators a studio session talks to.
#[derive(Clone)]
pub struct StudioCollaborators {
    pub gateway: Arc<dyn GenerationGateway>,
    pub usage: Arc<dyn UsageCounter>,
    pub lookbooks: Arc<dyn LookbookStore>,
    pub roster: Arc<dyn ClientRoster>,
    pub catalog: Arc<dyn StyleCatalog>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "signal", rename_all = "snake_case")]
pub enum RunSignal {
    LookbookPersisted { lookbook_id: Uuid, client_id: ClientId },
    RunAbandoned,
    /// One-shot UI effect when a final look is shown.
    Celebrate,
}

#[derive(Debug, Clone)]
pub enum ClientChoice {
    Existing(ClientId),
    New(String),
}

#[derive(Debug, Clone, Serialize)]
pub struct StudioSnapshot {
    pub session_id: Uuid,
    pub stage: Stage,
    pub run: RunToken,
    pub client_id: Option<ClientId>,
    pub source_image: Option<SourceImage>,
    pub candidates: Vec<GeneratedImage>,
    pub base_style: Option<GeneratedImage>,
    pub prompt: Option<String>,
    pub final_look: Option<FinalLook>,
    pub error_message: Option<String>,
    pub recovery_action: Option<RecoveryAction>,
    pub lookbook_id: Option<Uuid>,
    pub history_len: usize,
    pub last_signal: Option<RunSignal>,
}

#[derive(Default)]
struct Inner {
    state: PipelineState,
    history: SessionHistory,
    /// Set once the current run's lookbook is persisted.
    lookbook: Option<Lookbook>,
    last_signal: Option<RunSignal>,
    resolving_client: bool,
}

/// Holds the session's client slot while the roster is consulted.
struct ClientClaim<'a>(&'a Mutex<Inner>);

impl Drop for ClientClaim<'_> {
    fn drop(&mut self) {
        self.0.lock().resolving_client = false;
    }
}

pub struct Orchestrator {
    session_id: Uuid,
    inner: Mutex<Inner>,
    collaborators: StudioCollaborators,
    assembler: LookbookAssembler,
    initial_style_count: usize,
    signals: broadcast::Sender<RunSignal>,
}

impl Orchestrator {
    pub fn new(collaborators: StudioCollaborators, initial_style_count: usize) -> Self {
        let (signals, _) = broadcast::channel(16);
        Self {
            session_id: Uuid::new_v4(),
            inner: Mutex::new(Inner::default()),
            assembler: LookbookAssembler::new(collaborators.lookbooks.clone()),
            collaborators,
            initial_style_count: initial_style_count.max(1),
            signals,
        }
    }

    pub fn session_id(&self) -> Uuid {
        self.session_id
    }

    pub fn subscribe(&self) -> broadcast::Receiver<RunSignal> {
        self.signals.subscribe()
    }

    pub fn snapshot(&self) -> StudioSnapshot {
        let inner = self.inner.lock();
        let state = &inner.state;
        StudioSnapshot {
            session_id: self.session_id,
            stage: state.stage,
            run: state.run,
            client_id: state.client_id.clone(),
            source_image: state.source_image.clone(),
            candidates: state.candidates.clone(),
            base_style: state.base_style.clone(),
            prompt: state.style_being_refined.clone(),
            final_look: state.final_look.clone(),
            error_message: state.error_message.clone(),
            recovery_action: state.recovery_action(),
            lookbook_id: inner.lookbook.as_ref().map(|l| l.id),
            history_len: inner.history.len(),
            last_signal: inner.last_signal.clone(),
        }
    }

    pub fn history(&self) -> Vec<HistoryEntry> {
        self.inner.lock().history.entries().to_vec()
    }

    // --- User actions ---

    pub async fn select_client(&self, choice: ClientChoice) -> Result<StudioSnapshot, StudioError> {
        let claim = {
            let mut inner = self.inner.lock();
            let stage = inner.state.stage;
            if stage != Stage::SelectClient || inner.resolving_client {
                return Err(PipelineError::InvalidTransition { stage, event: "select a client" }.into());
            }
            inner.resolving_client = true;
            ClientClaim(&self.inner)
        };
        let roster = &self.collaborators.roster;
        let client_id = match choice {
            ClientChoice::Existing(id) => {
                if !roster.contains(&id).await {
                    return Err(crate::collaborators::CollaboratorError::UnknownClient(id).into());
                }
                id
            }
            ClientChoice::New(name) => roster.create(&name).await?,
        };
        let selected = self.advance(PipelineEvent::ClientSelected(client_id)).await;
        drop(claim);
        selected
    }

    pub async fn open_magic_capture(&self) -> Result<StudioSnapshot, StudioError> {
        self.advance(PipelineEvent::MagicCaptureOpened).await
    }

    pub async fn report_capture_failure(&self, reason: impl Into<String>) -> Result<StudioSnapshot, StudioError> {
        self.advance(PipelineEvent::CaptureFailed(reason.into())).await
    }

    /// Stores the photo and runs the initial style batch before returning.
    pub async fn capture_photo(&self, image: SourceImage) -> Result<StudioSnapshot, StudioError> {
        self.advance(PipelineEvent::PhotoCaptured(image)).await
    }

    pub async fn select_base_style(&self, index: usize) -> Result<StudioSnapshot, StudioError> {
        self.advance(PipelineEvent::BaseStyleSelected(index)).await
    }

    pub async fn edit_prompt(&self, prompt: impl Into<String>) -> Result<StudioSnapshot, StudioError> {
        self.advance(PipelineEvent::PromptEdited(prompt.into())).await
    }

    pub async fn apply_modifier(&self, modifier: impl Into<String>) -> Result<StudioSnapshot, StudioError> {
        self.advance(PipelineEvent::ModifierApplied(modifier.into())).await
    }

    /// Runs the final stage (main image plus angle views) and, on success,
    /// persists the lookbook before returning.
    pub async fn finalize(&self) -> Result<StudioSnapshot, StudioError> {
        self.advance(PipelineEvent::Finalized).await
    }

    pub async fn retry(&self) -> Result<StudioSnapshot, StudioError> {
        self.advance(PipelineEvent::Retried).await
    }

    pub async fn reset(&self) -> Result<StudioSnapshot, StudioError> {
        self.advance(PipelineEvent::Reset).await
    }

    // --- Event loop ---

    async fn advance(&self, event: PipelineEvent) -> Result<StudioSnapshot, StudioError> {
        let mut effect = self.dispatch(event)?;
        while let Some(current) = effect.take() {
            effect = self.run_effect(current).await;
        }
        Ok(self.snapshot())
    }

    /// Applies one event under the lock and returns the effect of the stage entered.
    fn dispatch(&self, event: PipelineEvent) -> Result<Option<Effect>, PipelineError> {
        let is_reset = matches!(event, PipelineEvent::Reset);
        let produced = produced_images(&event);

        let mut inner = self.inner.lock();
        let next = transition(&inner.state, event)?;
        let mut effect = entry_effect(&inner.state, &next);
        let from = inner.state.stage;

        match (from, next.stage) {
            (Stage::GeneratingInitial, Stage::ShowInitial) | (Stage::GeneratingFinal, Stage::ShowFinal) => {
                for (origin, images) in produced {
                    inner.history.append(next.run, origin, images);
                }
            }
            _ => {}
        }
        if is_reset {
            if inner.lookbook.is_some() && effect == Some(Effect::AnnounceAbandoned) {
                effect = None;
            }
            inner.history.clear();
            inner.lookbook = None;
        }

        info!(session = %self.session_id, run = %next.run, "🔀 {:?} → {:?}", from, next.stage);
        inner.state = next;
        Ok(effect)
    }

    /// Feeds a generation result back in. Results for abandoned runs are dropped.
    fn settle(&self, event: PipelineEvent) -> Option<Effect> {
        match self.dispatch(event) {
            Ok(effect) => effect,
            Err(PipelineError::StaleRun { received, current }) => {
                debug!(session = %self.session_id, "Ignoring result of abandoned run {} (current {})", received, current);
                None
            }
            Err(e) => {
                warn!(session = %self.session_id, "Generation result rejected: {}", e);
                None
            }
        }
    }

    async fn run_effect(&self, effect: Effect) -> Option<Effect> {
        match effect {
            Effect::GenerateInitial { run, source } => {
                let event = self.generate_initial(run, &source).await;
                self.settle(event)
            }
            Effect::GenerateFinal { run, source, base_style, prompt } => {
                let event = self.generate_final(run, &source, &base_style, &prompt).await;
                self.settle(event)
            }
            Effect::CompleteRun { run } => {
                self.complete_run(run).await;
                None
            }
            Effect::AnnounceAbandoned => {
                info!(session = %self.session_id, "🧹 Run abandoned");
                self.emit(&mut self.inner.lock(), RunSignal::RunAbandoned);
                None
            }
        }
    }

    async fn generate_initial(&self, run: RunToken, source: &SourceImage) -> PipelineEvent {
        let styles = self.collaborators.catalog.initial_styles().await;
        let items: Vec<BatchItem> = styles
            .into_iter()
            .take(self.initial_style_count)
            .map(|style| BatchItem {
                origin_style_id: (style.source == StyleSource::UserAuthored).then(|| style.id.clone()),
                style_id: style.id,
                style_name: style.display_name,
                prompt: style.text_prompt,
                reference_image: style.reference_image,
            })
            .collect();

        info!(session = %self.session_id, run = %run, "✂️ Generating {} initial styles", items.len());
        let outcome = generate_batch(self.collaborators.gateway.as_ref(), source, &items).await;
        for _ in outcome.successes() {
            self.collaborators.usage.record_generation();
        }
        PipelineEvent::InitialSettled { run, outcome }
    }

    async fn generate_final(&self, run: RunToken, source: &SourceImage, base_style: &GeneratedImage, prompt: &str) -> PipelineEvent {
        let bundle = match &base_style.origin_style_id {
            Some(style_id) => self.collaborators.catalog.reference_bundle(style_id).await,
            None => None,
        };

        let main_item = BatchItem {
            style_id: base_style.style_id.clone(),
            style_name: base_style.style_name.clone(),
            prompt: prompt.to_string(),
            reference_image: bundle.as_ref().and_then(|b| b.front.clone()),
            origin_style_id: base_style.origin_style_id.clone(),
        };
        let angle_items: Vec<BatchItem> = ViewLabel::ALL
            .iter()
            .map(|view| BatchItem {
                style_id: base_style.style_id.clone(),
                style_name: format!("{} ({} view)", base_style.style_name, view),
                prompt: build_angle_prompt(prompt, *view),
                reference_image: bundle.as_ref().and_then(|b| b.for_view(*view).cloned()),
                origin_style_id: base_style.origin_style_id.clone(),
            })
            .collect();

        info!(session = %self.session_id, run = %run, with_references = bundle.is_some(), "🎬 Generating final look and {} angle views", angle_items.len());
        let gateway = self.collaborators.gateway.as_ref();
        let (main, angles) = tokio::join!(
            generate_one(gateway, source, &main_item),
            generate_batch(gateway, source, &angle_items)
        );

        let successes = usize::from(matches!(main, Ok(Some(_)))) + angles.success_count();
        for _ in 0..successes {
            self.collaborators.usage.record_generation();
        }
        if let Err(e) = &main {
            warn!(session = %self.session_id, "❌ Main image failed: {}", e);
        }

        PipelineEvent::FinalSettled {
            run,
            main,
            angles: ViewLabel::ALL.into_iter().zip(angles.slots).collect(),
        }
    }

    async fn complete_run(&self, run: RunToken) {
        let lookbook = {
            let mut inner = self.inner.lock();
            if inner.state.run != run {
                return;
            }
            self.emit(&mut inner, RunSignal::Celebrate);
            LookbookAssembler::assemble(&inner.state)
        };

        let Some(lookbook) = lookbook else {
            warn!(session = %self.session_id, "Final look shown without the inputs for a lookbook");
            return;
        };
        if !self.assembler.persist(&lookbook).await {
            return;
        }

        let mut inner = self.inner.lock();
        if inner.state.run != run {
            debug!(session = %self.session_id, "Lookbook {} saved after its run was abandoned", lookbook.id);
            return;
        }
        let signal = RunSignal::LookbookPersisted { lookbook_id: lookbook.id, client_id: lookbook.client_id.clone() };
        self.emit(&mut inner, signal);
        inner.lookbook = Some(lookbook);
    }

    fn emit(&self, inner: &mut Inner, signal: RunSignal) {
        inner.last_signal = Some(signal.clone());
        self.signals.send(signal).ok();
    }
}

/// Images carried by a settle event, grouped by where they belong in history.
fn produced_images(event: &PipelineEvent) -> Vec<(HistoryOrigin, Vec<GeneratedImage>)> {
    match event {
        PipelineEvent::InitialSettled { outcome, .. } => {
            vec![(HistoryOrigin::InitialStyle, outcome.successes().cloned().collect())]
        }
        PipelineEvent::FinalSettled { main: Ok(Some(main)), angles, .. } => {
            let mut groups = vec![(HistoryOrigin::FinalLook, vec![main.clone()])];
            groups.extend(
                angles
                    .iter()
                    .filter_map(|(view, slot)| slot.clone().map(|image| (HistoryOrigin::Angle(*view), vec![image]))),
            );
            groups
        }
        _ => Vec::new(),
    }
}
