//! Design Studio state machine. `transition` is pure; effects run in the orchestrator.

use serde::Serialize;
use thiserror::Error;

use crate::batch::BatchOutcome;
use crate::gateway::GenerationError;
use crate::models::{AngleView, ClientId, GeneratedImage, SourceImage, ViewLabel};
use crate::prompts::apply_modifier;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    SelectClient,
    Upload,
    MagicCapture,
    GeneratingInitial,
    ShowInitial,
    Refining,
    GeneratingFinal,
    ShowFinal,
    Error,
}

/// Identifies one launch of a generating stage. Results carrying an older
/// token than the state's are stale and get dropped.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub struct RunToken(u64);

impl RunToken {
    fn next(self) -> Self {
        RunToken(self.0.wrapping_add(1))
    }
}

impl std::fmt::Display for RunToken {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "#{}", self.0)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum PipelineFailure {
    /// No candidate style came back from the initial batch.
    ZeroSuccess { cause: Option<GenerationError> },
    /// The load-bearing final image failed or was declined.
    MainImageFailure { cause: Option<GenerationError> },
    CaptureFailure { reason: String },
}

impl PipelineFailure {
    pub fn user_message(&self) -> String {
        match self {
            PipelineFailure::ZeroSuccess { cause: Some(GenerationError::RateLimited) }
            | PipelineFailure::MainImageFailure { cause: Some(GenerationError::RateLimited) } => {
                GenerationError::RateLimited.user_message().to_string()
            }
            PipelineFailure::ZeroSuccess { .. } => "We couldn't create any styles from this photo. Please try again.".to_string(),
            PipelineFailure::MainImageFailure { cause: Some(e) } => e.user_message().to_string(),
            PipelineFailure::MainImageFailure { cause: None } => "We couldn't create the final look. Please try again.".to_string(),
            PipelineFailure::CaptureFailure { reason } => format!("The camera capture didn't work ({reason}). Please try again."),
        }
    }

    /// Stage re-entered by "try again".
    pub fn retry_stage(&self) -> Stage {
        match self {
            PipelineFailure::ZeroSuccess { .. } => Stage::GeneratingInitial,
            PipelineFailure::MainImageFailure { .. } => Stage::GeneratingFinal,
            PipelineFailure::CaptureFailure { .. } => Stage::MagicCapture,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RecoveryAction {
    TryAgain,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FinalLook {
    pub main_image: GeneratedImage,
    pub angle_views: Vec<AngleView>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PipelineState {
    pub stage: Stage,
    pub run: RunToken,
    pub client_id: Option<ClientId>,
    pub source_image: Option<SourceImage>,
    pub candidates: Vec<GeneratedImage>,
    pub base_style: Option<GeneratedImage>,
    /// Prompt being edited in `Refining`, seeded from the base style's prompt.
    pub style_being_refined: Option<String>,
    pub final_look: Option<FinalLook>,
    pub failure: Option<PipelineFailure>,
    pub error_message: Option<String>,
}

impl Default for PipelineState {
    fn default() -> Self {
        Self {
            stage: Stage::SelectClient,
            run: RunToken::default(),
            client_id: None,
            source_image: None,
            candidates: Vec::new(),
            base_style: None,
            style_being_refined: None,
            final_look: None,
            failure: None,
            error_message: None,
        }
    }
}

impl PipelineState {
    pub fn recovery_action(&self) -> Option<RecoveryAction> {
        (self.stage == Stage::Error).then_some(RecoveryAction::TryAgain)
    }

    fn fail(&mut self, failure: PipelineFailure) {
        self.error_message = Some(failure.user_message());
        self.failure = Some(failure);
        self.stage = Stage::Error;
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum PipelineEvent {
    ClientSelected(ClientId),
    MagicCaptureOpened,
    CaptureFailed(String),
    PhotoCaptured(SourceImage),
    InitialSettled { run: RunToken, outcome: BatchOutcome },
    BaseStyleSelected(usize),
    PromptEdited(String),
    ModifierApplied(String),
    Finalized,
    FinalSettled {
        run: RunToken,
        main: Result<Option<GeneratedImage>, GenerationError>,
        angles: Vec<(ViewLabel, Option<GeneratedImage>)>,
    },
    Retried,
    Reset,
}

impl PipelineEvent {
    pub fn name(&self) -> &'static str {
        match self {
            PipelineEvent::ClientSelected(_) => "select a client",
            PipelineEvent::MagicCaptureOpened => "open magic capture",
            PipelineEvent::CaptureFailed(_) => "report a capture failure",
            PipelineEvent::PhotoCaptured(_) => "capture a photo",
            PipelineEvent::InitialSettled { .. } => "settle the initial batch",
            PipelineEvent::BaseStyleSelected(_) => "select a base style",
            PipelineEvent::PromptEdited(_) => "edit the prompt",
            PipelineEvent::ModifierApplied(_) => "apply a modifier",
            PipelineEvent::Finalized => "finalize",
            PipelineEvent::FinalSettled { .. } => "settle the final stage",
            PipelineEvent::Retried => "try again",
            PipelineEvent::Reset => "start over",
        }
    }

    fn run(&self) -> Option<RunToken> {
        match self {
            PipelineEvent::InitialSettled { run, .. } | PipelineEvent::FinalSettled { run, .. } => Some(*run),
            _ => None,
        }
    }
}

#[derive(Debug, Error, Clone, PartialEq)]
pub enum PipelineError {
    #[error("cannot {event} while in {stage:?}")]
    InvalidTransition { stage: Stage, event: &'static str },
    #[error("result for run {received} arrived after the studio moved on to run {current}")]
    StaleRun { received: RunToken, current: RunToken },
    #[error("no candidate style at position {0}")]
    InvalidSelection(usize),
    #[error("invalid input: {0}")]
    InvalidInput(String),
}

pub fn transition(state: &PipelineState, event: PipelineEvent) -> Result<PipelineState, PipelineError> {
    use PipelineEvent as E;

    if let Some(received) = event.run() {
        if received != state.run {
            return Err(PipelineError::StaleRun { received, current: state.run });
        }
    }

    let mut next = state.clone();
    match (state.stage, event) {
        (_, E::Reset) => {
            return Ok(PipelineState { run: state.run.next(), ..PipelineState::default() });
        }
        (Stage::SelectClient, E::ClientSelected(client_id)) => {
            if client_id.trim().is_empty() {
                return Err(PipelineError::InvalidInput("client id is empty".into()));
            }
            next.client_id = Some(client_id);
            next.stage = Stage::Upload;
        }
        (Stage::Upload, E::MagicCaptureOpened) => {
            next.stage = Stage::MagicCapture;
        }
        (Stage::MagicCapture, E::CaptureFailed(reason)) => {
            next.fail(PipelineFailure::CaptureFailure { reason });
        }
        (Stage::Upload | Stage::MagicCapture, E::PhotoCaptured(image)) => {
            if !image.is_usable() {
                return Err(PipelineError::InvalidInput("photo is empty or not an image".into()));
            }
            next.source_image = Some(image);
            next.stage = Stage::GeneratingInitial;
            next.run = state.run.next();
        }
        (Stage::GeneratingInitial, E::InitialSettled { outcome, .. }) => {
            let cause = outcome.dominant_error();
            let successes: Vec<GeneratedImage> = outcome.slots.into_iter().flatten().collect();
            if successes.is_empty() {
                next.fail(PipelineFailure::ZeroSuccess { cause });
            } else {
                next.candidates = successes;
                next.stage = Stage::ShowInitial;
            }
        }
        (Stage::ShowInitial, E::BaseStyleSelected(index)) => {
            let chosen = state.candidates.get(index).cloned().ok_or(PipelineError::InvalidSelection(index))?;
            next.style_being_refined = Some(chosen.prompt_used.clone());
            next.base_style = Some(chosen);
            next.stage = Stage::Refining;
        }
        (Stage::Refining, E::PromptEdited(prompt)) => {
            next.style_being_refined = Some(prompt);
        }
        (Stage::Refining, E::ModifierApplied(modifier)) => {
            let current = state.style_being_refined.as_deref().unwrap_or_default();
            next.style_being_refined = Some(apply_modifier(current, &modifier));
        }
        (Stage::Refining, E::Finalized) => {
            if state.style_being_refined.as_deref().map_or(true, |p| p.trim().is_empty()) {
                return Err(PipelineError::InvalidInput("refined prompt is empty".into()));
            }
            next.stage = Stage::GeneratingFinal;
            next.run = state.run.next();
        }
        (Stage::GeneratingFinal, E::FinalSettled { main, angles, .. }) => match main {
            Ok(Some(main_image)) => {
                let angle_views = angles
                    .into_iter()
                    .filter_map(|(view_label, slot)| slot.map(|image| AngleView { view_label, image_data: image.image_data }))
                    .collect();
                next.final_look = Some(FinalLook { main_image, angle_views });
                next.stage = Stage::ShowFinal;
            }
            Ok(None) => next.fail(PipelineFailure::MainImageFailure { cause: None }),
            Err(e) => next.fail(PipelineFailure::MainImageFailure { cause: Some(e) }),
        },
        (Stage::Error, E::Retried) => {
            let failure = state.failure.clone().ok_or(PipelineError::InvalidTransition { stage: Stage::Error, event: "try again" })?;
            let stage = failure.retry_stage();
            next.failure = None;
            next.error_message = None;
            next.stage = stage;
            if matches!(stage, Stage::GeneratingInitial | Stage::GeneratingFinal) {
                next.run = state.run.next();
            }
        }
        (stage, event) => {
            return Err(PipelineError::InvalidTransition { stage, event: event.name() });
        }
    }
    Ok(next)
}

/// Work the orchestrator must perform after moving from `previous` to `next`.
#[derive(Debug, Clone, PartialEq)]
pub enum Effect {
    GenerateInitial { run: RunToken, source: SourceImage },
    GenerateFinal { run: RunToken, source: SourceImage, base_style: GeneratedImage, prompt: String },
    CompleteRun { run: RunToken },
    /// A started run was left. It only counts as abandoned if its lookbook was never persisted.
    AnnounceAbandoned,
}

pub fn entry_effect(previous: &PipelineState, next: &PipelineState) -> Option<Effect> {
    let entered = previous.stage != next.stage || previous.run != next.run;
    if !entered {
        return None;
    }
    match next.stage {
        Stage::GeneratingInitial => next
            .source_image
            .clone()
            .map(|source| Effect::GenerateInitial { run: next.run, source }),
        Stage::GeneratingFinal => match (&next.source_image, &next.base_style, &next.style_being_refined) {
            (Some(source), Some(base_style), Some(prompt)) => Some(Effect::GenerateFinal {
                run: next.run,
                source: source.clone(),
                base_style: base_style.clone(),
                prompt: prompt.clone(),
            }),
            _ => None,
        },
        Stage::ShowFinal => Some(Effect::CompleteRun { run: next.run }),
        Stage::SelectClient if previous.stage != Stage::SelectClient || previous.client_id.is_some() => {
            Some(Effect::AnnounceAbandoned)
        }
        _ => None,
    }
}
