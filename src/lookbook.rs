use std::sync::Arc;

use chrono::Utc;
use tracing::{error, info};
use uuid::Uuid;

use crate::collaborators::LookbookStore;
use crate::models::Lookbook;
use crate::pipeline::{PipelineState, Stage};

/// Builds the composite record of a finished run and hands it to the store.
pub struct LookbookAssembler {
    store: Arc<dyn LookbookStore>,
}

impl LookbookAssembler {
    pub fn new(store: Arc<dyn LookbookStore>) -> Self {
        Self { store }
    }

    /// Returns `None` unless the run reached `ShowFinal` with every input present.
    pub fn assemble(state: &PipelineState) -> Option<Lookbook> {
        if state.stage != Stage::ShowFinal {
            return None;
        }
        let final_look = state.final_look.as_ref()?;
        Some(Lookbook {
            id: Uuid::new_v4(),
            client_id: state.client_id.clone()?,
            source_image: state.source_image.clone()?,
            base_style: state.base_style.clone()?,
            final_image: final_look.main_image.clone(),
            angle_views: final_look.angle_views.clone(),
            created_at: Utc::now(),
        })
    }

    /// Persists the lookbook. Failures are logged and reported as `false`;
    /// they never turn into a pipeline error.
    pub async fn persist(&self, lookbook: &Lookbook) -> bool {
        match self.store.save(lookbook).await {
            Ok(()) => {
                info!("📚 Lookbook {} saved for client {} ({} angle views)", lookbook.id, lookbook.client_id, lookbook.angle_views.len());
                true
            }
            Err(e) => {
                error!("❌ Failed to save lookbook {} for client {}: {}", lookbook.id, lookbook.client_id, e);
                false
            }
        }
    }
}
