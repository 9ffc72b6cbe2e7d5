//! Defines the read-only application state and hub for utility
//! functions.

use crate::conf::Settings;
use crate::event::{decode_key, IncomingEvent};
use crate::keys::{KeyAssembler, KeyTemplate};
use crate::pipeline::{Derivative, Pipeline};
use crate::render::{CodecOptions, OutputFormat, PreOperation, Renderer};
use crate::storage::{S3Storage, UploadParams};
use anyhow::{anyhow, Context, Result};
use envy::from_env;
use once_cell::sync::OnceCell;
use regex::Regex;
use tracing::{info, instrument};

/// An App is an initialized application state, derived from
/// settings. This is only useful to pre-compute stuff that will be
/// used constantly.
pub struct App {
    /// The original settings.
    pub settings: Settings,

    /// The regex that matches S3 event keys.
    pub match_key_re: Regex,

    /// The configured derivative pipeline.
    pub pipeline: Pipeline,
}

/// Turn a key glob into an anchored regex, where `*` matches any
/// number of non-slash characters.
fn glob_regex(glob: &str) -> Result<Regex> {
    Ok(Regex::new(&format!(
        "^{}$",
        glob.split('*')
            .map(regex::escape)
            .collect::<Vec<String>>()
            .join("[^/]*?")
    ))?)
}

impl App {
    /// Initialize an App instance given a settings struct. Consumes
    /// the settings struct.
    pub fn new(settings: Settings) -> Result<Self> {
        // Parse regexes
        let match_key_re = if let Some(match_key) = &settings.match_key {
            glob_regex(match_key)
        } else {
            Ok(Regex::new("")?)
        }
        .context("Invalid MATCH_KEY")?;
        // Parse codec settings
        let format: OutputFormat = settings
            .output_format
            .parse()
            .context("Invalid OUTPUT_FORMAT")?;
        if !(1..=100).contains(&settings.quality) {
            return Err(anyhow!(
                "QUALITY must be between 1 and 100, got {}",
                settings.quality
            ));
        }
        let pre_operations =
            PreOperation::parse_list(&settings.pre_operations).context("Invalid PRE_OPERATIONS")?;
        // Parse key settings
        let template = KeyTemplate::new(&settings.key_template).context("Invalid KEY_TEMPLATE")?;
        let upload_params = UploadParams {
            acl: settings.upload_acl.clone(),
            cache_control: settings.upload_cache_control.clone(),
            storage_class: settings.upload_storage_class.clone(),
        };
        let pipeline = Pipeline::new(
            Renderer::new(
                pre_operations,
                CodecOptions {
                    format,
                    quality: settings.quality,
                    progressive: settings.progressive,
                },
            ),
            KeyAssembler::new(settings.output_dir.clone(), template, upload_params),
        );
        // Done
        Ok(App {
            settings,
            match_key_re,
            pipeline,
        })
    }

    /// Whether a decoded source key passes the `match_key` filter.
    pub fn matches(&self, key: &str) -> bool {
        self.match_key_re.is_match(key)
    }

    /// Build the storage for an invocation, resolving the source
    /// bucket from the event or the settings.
    fn storage<'a>(
        &self,
        bucket: Option<&str>,
        client: &'a aws_sdk_s3::Client,
    ) -> Result<S3Storage<'a>> {
        let source_bucket = bucket
            .map(String::from)
            .or_else(|| self.settings.source_bucket.clone())
            .ok_or_else(|| anyhow!("No source bucket in the event and SOURCE_BUCKET is not set"))?;
        let target_bucket = self
            .settings
            .target_bucket
            .clone()
            .unwrap_or_else(|| source_bucket.clone());
        Ok(S3Storage::new(client, source_bucket, target_bucket))
    }

    /// Handle a single triggering event. Events for keys filtered out
    /// by `match_key` are skipped and produce no derivatives.
    #[instrument(skip(self, client))]
    pub async fn handle(
        &self,
        event: &IncomingEvent,
        client: &aws_sdk_s3::Client,
    ) -> Result<Vec<Derivative>> {
        if !self.matches(&decode_key(&event.object_key)) {
            info!("Skipped event since its key doesn't match");
            return Ok(Vec::new());
        }
        let storage = self.storage(event.bucket.as_deref(), client)?;
        Ok(self.pipeline.run(event, &storage).await?)
    }

    /// Delete the derivatives of a source key.
    #[instrument(skip(self, client))]
    pub async fn purge(&self, key: &str, client: &aws_sdk_s3::Client) -> Result<Vec<String>> {
        let storage = self.storage(None, client)?;
        Ok(self.pipeline.purge(key, &storage).await?)
    }
}

/// Global App instance.
static CURRENT: OnceCell<App> = OnceCell::new();

/// Initialize the global App instance.
pub fn init() -> Result<()> {
    let settings = from_env()?;
    let app = App::new(settings)?;
    CURRENT
        .set(app)
        .map_err(|_| anyhow!("app::CURRENT was already initialized"))
}

/// Get the current App instance, or panic if it hasn't been
/// initialized.
pub fn current() -> &'static App {
    CURRENT.get().expect("app is not initialized")
}
