//! Concurrent fan-out of gateway calls against one source image.

use futures_util::future::join_all;
use tracing::{debug, info, warn};

use crate::gateway::{GenerationError, GenerationGateway, GenerationRequest};
use crate::models::{GeneratedImage, SourceImage};

/// One slot in a batch: a style (or view) with its own prompt and optional reference.
#[derive(Debug, Clone, PartialEq)]
pub struct BatchItem {
    pub style_id: String,
    pub style_name: String,
    pub prompt: String,
    pub reference_image: Option<String>,
    pub origin_style_id: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct BatchOutcome {
    pub slots: Vec<Option<GeneratedImage>>,
    pub rate_limited: usize,
    pub transport_failures: usize,
    pub declined: usize,
}

impl BatchOutcome {
    pub fn successes(&self) -> impl Iterator<Item = &GeneratedImage> {
        self.slots.iter().flatten()
    }

    pub fn success_count(&self) -> usize {
        self.slots.iter().filter(|s| s.is_some()).count()
    }

    /// The failure that best explains an empty batch, used for the error message.
    pub fn dominant_error(&self) -> Option<GenerationError> {
        if self.rate_limited > 0 {
            Some(GenerationError::RateLimited)
        } else if self.transport_failures > 0 {
            Some(GenerationError::Transport(format!("{} request(s) failed", self.transport_failures)))
        } else {
            None
        }
    }
}

/// Runs a single item. Shared by the batch and the final-stage main call so
/// that provenance is attached the same way everywhere.
pub async fn generate_one(
    gateway: &dyn GenerationGateway,
    source: &SourceImage,
    item: &BatchItem,
) -> Result<Option<GeneratedImage>, GenerationError> {
    let request = GenerationRequest {
        source_image: &source.image_data,
        mime_type: &source.mime_type,
        prompt: &item.prompt,
        reference_image: item.reference_image.as_deref(),
    };
    let image = gateway.generate(request).await?;
    Ok(image.map(|image_data| GeneratedImage {
        image_data,
        prompt_used: item.prompt.clone(),
        style_id: item.style_id.clone(),
        style_name: item.style_name.clone(),
        origin_style_id: item.origin_style_id.clone(),
    }))
}

pub async fn generate_batch(gateway: &dyn GenerationGateway, source: &SourceImage, items: &[BatchItem]) -> BatchOutcome {
    info!("🚀 Dispatching batch of {} generation calls", items.len());

    let results = join_all(items.iter().map(|item| generate_one(gateway, source, item))).await;

    let mut outcome = BatchOutcome { slots: Vec::with_capacity(items.len()), ..Default::default() };
    for (item, result) in items.iter().zip(results) {
        match result {
            Ok(Some(image)) => {
                debug!(style = %item.style_name, "✅ Batch item produced an image");
                outcome.slots.push(Some(image));
            }
            Ok(None) => {
                warn!(style = %item.style_name, "⚠️ Batch item declined by image service");
                outcome.declined += 1;
                outcome.slots.push(None);
            }
            Err(e) => {
                warn!(style = %item.style_name, error = %e, "❌ Batch item failed");
                match e {
                    GenerationError::RateLimited => outcome.rate_limited += 1,
                    _ => outcome.transport_failures += 1,
                }
                outcome.slots.push(None);
            }
        }
    }

    info!("✅ Batch settled: {}/{} succeeded", outcome.success_count(), items.len());
    outcome
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{Outcome, ScriptedGateway};
    use pretty_assertions::assert_eq;
    use std::time::Duration;

    fn items(n: usize) -> Vec<BatchItem> {
        (1..=n)
            .map(|i| BatchItem {
                style_id: format!("s{i}"),
                style_name: format!("Style {i}"),
                prompt: format!("prompt-{i}"),
                reference_image: None,
                origin_style_id: None,
            })
            .collect()
    }

    fn source() -> SourceImage {
        SourceImage::new("cGhvdG8=", "image/jpeg")
    }

    #[tokio::test]
    async fn slots_follow_input_order_when_completion_is_reversed() {
        let n = 5;
        let gateway = ScriptedGateway::new();
        for i in 1..=n {
            // last item resolves first
            let delay = Duration::from_millis(((n - i) * 20) as u64);
            gateway.on_delayed(&format!("prompt-{i}"), Outcome::Image(format!("img-{i}")), delay);
        }

        let outcome = generate_batch(&gateway, &source(), &items(n)).await;

        let completion = gateway.completion_order();
        assert_eq!(completion.first().map(String::as_str), Some("prompt-5"));
        let names: Vec<_> = outcome.slots.iter().map(|s| s.as_ref().map(|g| g.style_name.clone())).collect();
        let expected: Vec<_> = (1..=n).map(|i| Some(format!("Style {i}"))).collect();
        assert_eq!(names, expected);
        for (i, slot) in outcome.slots.iter().enumerate() {
            assert_eq!(slot.as_ref().unwrap().image_data, format!("img-{}", i + 1));
        }
    }

    #[tokio::test]
    async fn calls_are_dispatched_before_any_completes() {
        let gateway = ScriptedGateway::new();
        for i in 1..=3 {
            gateway.on_delayed(&format!("prompt-{i}"), Outcome::Image("x".into()), Duration::from_millis(100));
        }
        let started = tokio::time::Instant::now();
        let outcome = generate_batch(&gateway, &source(), &items(3)).await;
        assert_eq!(outcome.success_count(), 3);
        // sequential execution would take at least 300ms
        assert!(started.elapsed() < Duration::from_millis(280));
    }

    #[tokio::test]
    async fn item_failures_become_empty_slots_without_aborting_siblings() {
        let gateway = ScriptedGateway::new();
        gateway.on("prompt-1", Outcome::Image("one".into()));
        gateway.on("prompt-2", Outcome::Declined);
        gateway.on("prompt-3", Outcome::Fail(GenerationError::RateLimited));
        gateway.on("prompt-4", Outcome::Fail(GenerationError::Transport("reset".into())));

        let outcome = generate_batch(&gateway, &source(), &items(4)).await;

        assert_eq!(outcome.success_count(), 1);
        assert!(outcome.slots[0].is_some());
        assert!(outcome.slots[1..].iter().all(Option::is_none));
        assert_eq!((outcome.declined, outcome.rate_limited, outcome.transport_failures), (1, 1, 1));
        assert_eq!(outcome.dominant_error(), Some(GenerationError::RateLimited));
        assert_eq!(gateway.calls().len(), 4);
    }

    #[tokio::test]
    async fn each_image_carries_its_prompt_and_reference() {
        let gateway = ScriptedGateway::new();
        gateway.on("prompt-1", Outcome::Image("one".into()));
        let mut batch = items(1);
        batch[0].reference_image = Some("cmVm".into());
        batch[0].origin_style_id = Some("user-1".into());

        let outcome = generate_batch(&gateway, &source(), &batch).await;

        let image = outcome.slots[0].clone().unwrap();
        assert_eq!(image.prompt_used, "prompt-1");
        assert_eq!(image.origin_style_id.as_deref(), Some("user-1"));
        assert_eq!(gateway.calls()[0].reference_image.as_deref(), Some("cmVm"));
    }
}
