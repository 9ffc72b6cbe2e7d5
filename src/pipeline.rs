//! Sequences one invocation: validate the event, fetch and measure
//! the source, plan the sizes, render every derivative, and upload
//! them all concurrently.

use crate::error::{Error, Result};
use crate::event::{interpret, IncomingEvent};
use crate::keys::{KeyAssembler, SourceContext};
use crate::plan::{plan, FRACTIONS};
use crate::render::{measure, Renderer};
use crate::storage::Storage;
use futures::future::join_all;
use serde::Serialize;
use std::fmt;
use tracing::{debug, info, instrument, warn};

/// The stages an invocation goes through, in order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Validating,
    Fetching,
    Measuring,
    Planning,
    Rendering,
    Uploading,
    Completed,
    Failed,
}

impl Stage {
    /// The stage an invocation with this outcome ends in.
    pub fn terminal<T>(outcome: &Result<T>) -> Self {
        if outcome.is_ok() {
            Stage::Completed
        } else {
            Stage::Failed
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

fn enter(stage: Stage) {
    debug!(%stage, "Entering stage");
}

/// One stored derivative, as reported to the invoking host.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Derivative {
    pub size_label: &'static str,
    pub key: String,
    pub width: u32,
    pub height: u32,
    pub content_type: String,
    pub e_tag: Option<String>,
}

/// The derivative pipeline, configured once per process.
#[derive(Debug, Clone, Default)]
pub struct Pipeline {
    pub renderer: Renderer,
    pub assembler: KeyAssembler,
}

impl Pipeline {
    pub fn new(renderer: Renderer, assembler: KeyAssembler) -> Self {
        Self {
            renderer,
            assembler,
        }
    }

    /// Run one invocation for `event`. Results are in size-plan
    /// order. Any failure fails the whole invocation; uploads that
    /// already succeeded are left in place.
    #[instrument(
        skip(self, event, storage),
        fields(event = %event.event_name, key = %event.object_key)
    )]
    pub async fn run(
        &self,
        event: &IncomingEvent,
        storage: &dyn Storage,
    ) -> Result<Vec<Derivative>> {
        let outcome = self.run_stages(event, storage).await;
        let stage = Stage::terminal(&outcome);
        match &outcome {
            Ok(_) => enter(stage),
            Err(e) => warn!(%stage, error = %e, "Invocation failed"),
        }
        outcome
    }

    async fn run_stages(
        &self,
        event: &IncomingEvent,
        storage: &dyn Storage,
    ) -> Result<Vec<Derivative>> {
        enter(Stage::Validating);
        let key = interpret(event)?;

        enter(Stage::Fetching);
        let source = storage.fetch(&key).await?;

        enter(Stage::Measuring);
        let dimensions = measure(&source.bytes)?;
        let (width, height) = dimensions.after(&self.renderer.pre_operations);
        debug!(
            width,
            height,
            content_type = %source.content_type,
            "Measured source image"
        );

        enter(Stage::Planning);
        let sizes = plan(width, height)?;
        debug!(?sizes, "Planned derivative sizes");

        enter(Stage::Rendering);
        let rendered = self.renderer.render(source.bytes, &sizes).await?;

        enter(Stage::Uploading);
        let context = SourceContext {
            key: &key,
            content_type: &source.content_type,
        };
        let results = join_all(rendered.into_iter().map(|derivative| async move {
            let label = derivative.label;
            let (width, height) = (derivative.width, derivative.height);
            let request = self.assembler.assemble(derivative, context)?;
            let content_type = request.content_type.clone();
            let stored = storage.upload(request).await?;
            Ok::<_, Error>(Derivative {
                size_label: label,
                key: stored.key,
                width,
                height,
                content_type,
                e_tag: stored.e_tag,
            })
        }))
        .await;

        let failures = results.iter().filter(|result| result.is_err()).count();
        if failures > 0 {
            warn!(
                failures,
                total = results.len(),
                "Some derivatives failed to upload; the others are kept"
            );
        }
        let derivatives = results.into_iter().collect::<Result<Vec<_>>>()?;
        info!(source = %key, derivatives = derivatives.len(), "Stored derivatives");
        Ok(derivatives)
    }

    /// The keys every derivative of `source_key` is stored under.
    pub fn destination_keys(&self, source_key: &str) -> Result<Vec<String>> {
        let format = self.renderer.options.format.name();
        FRACTIONS
            .iter()
            .map(|(label, _, _)| self.assembler.destination_key(source_key, label, format))
            .collect()
    }

    /// Delete every derivative of `source_key`. The source itself is
    /// not touched.
    #[instrument(skip(self, storage))]
    pub async fn purge(&self, source_key: &str, storage: &dyn Storage) -> Result<Vec<String>> {
        let keys = self.destination_keys(source_key)?;
        storage.delete(&keys).await?;
        info!(derivatives = keys.len(), "Deleted derivatives");
        Ok(keys)
    }
}
