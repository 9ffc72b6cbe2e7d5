//! Assembles destination keys and upload requests for rendered
//! derivatives.

use crate::error::{Error, Result};
use crate::render::RenderedDerivative;
use crate::storage::{UploadParams, UploadRequest};
use anyhow::anyhow;
use once_cell::sync::Lazy;
use regex::{Captures, Regex};

/// Default destination key template.
pub const DEFAULT_KEY_TEMPLATE: &str = "{dir}/{name}_{size}.{ext}";

/// Recognized formats, their content types and key extensions.
static FORMATS: [(&str, &str, &str); 5] = [
    ("jpeg", "image/jpeg", "jpg"),
    ("png", "image/png", "png"),
    ("webp", "image/webp", "webp"),
    ("gif", "image/gif", "gif"),
    ("svg", "image/svg+xml", "svg"),
];

/// Placeholders a key template may use.
const PLACEHOLDERS: [&str; 5] = ["dir", "parent", "name", "size", "ext"];

static PLACEHOLDER_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\{([A-Za-z_]+)\}").expect("placeholder regex is valid"));

fn lookup(format: &str) -> Result<&'static (&'static str, &'static str, &'static str)> {
    FORMATS
        .iter()
        .find(|(name, _, _)| *name == format)
        .ok_or_else(|| Error::UnsupportedFormat(String::from(format)))
}

/// The content type of a rendered format.
pub fn content_type(format: &str) -> Result<&'static str> {
    lookup(format).map(|(_, content_type, _)| *content_type)
}

/// The key extension of a rendered format.
pub fn extension(format: &str) -> Result<&'static str> {
    lookup(format).map(|(_, _, extension)| *extension)
}

/// A destination key template, validated on construction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeyTemplate(String);

impl KeyTemplate {
    pub fn new(template: &str) -> anyhow::Result<Self> {
        for captures in PLACEHOLDER_RE.captures_iter(template) {
            let name = &captures[1];
            if !PLACEHOLDERS.contains(&name) {
                return Err(anyhow!(
                    "unknown placeholder {{{}}} in key template {:?}",
                    name,
                    template
                ));
            }
        }
        if !template.contains("{size}") {
            return Err(anyhow!(
                "key template {:?} must contain {{size}}, or every derivative would share a key",
                template
            ));
        }
        Ok(KeyTemplate(String::from(template)))
    }

    /// Render the template. Empty path segments are dropped, so an
    /// empty output directory or a top-level source key yields no
    /// stray slashes.
    pub fn render(
        &self,
        output_dir: &str,
        source_key: &str,
        label: &str,
        extension: &str,
    ) -> String {
        let (parent, file_name) = source_key.rsplit_once('/').unwrap_or(("", source_key));
        let name = match file_name.rsplit_once('.') {
            Some((stem, _)) if !stem.is_empty() => stem,
            _ => file_name,
        };
        let rendered = PLACEHOLDER_RE.replace_all(&self.0, |captures: &Captures| {
            match &captures[1] {
                "dir" => output_dir,
                "parent" => parent,
                "name" => name,
                "size" => label,
                "ext" => extension,
                _ => "",
            }
            .to_string()
        });
        rendered
            .split('/')
            .filter(|segment| !segment.is_empty())
            .collect::<Vec<_>>()
            .join("/")
    }
}

impl Default for KeyTemplate {
    fn default() -> Self {
        KeyTemplate(String::from(DEFAULT_KEY_TEMPLATE))
    }
}

/// The source an upload is derived from.
#[derive(Debug, Clone, Copy)]
pub struct SourceContext<'a> {
    pub key: &'a str,
    pub content_type: &'a str,
}

/// Builds upload requests from rendered derivatives.
#[derive(Debug, Clone, Default)]
pub struct KeyAssembler {
    pub output_dir: String,
    pub template: KeyTemplate,
    pub upload_params: UploadParams,
}

impl KeyAssembler {
    pub fn new(
        output_dir: impl Into<String>,
        template: KeyTemplate,
        upload_params: UploadParams,
    ) -> Self {
        Self {
            output_dir: output_dir.into(),
            template,
            upload_params,
        }
    }

    /// The destination key for a derivative of `source_key`.
    pub fn destination_key(&self, source_key: &str, label: &str, format: &str) -> Result<String> {
        Ok(self
            .template
            .render(&self.output_dir, source_key, label, extension(format)?))
    }

    /// Build the upload request for `derivative`.
    pub fn assemble(
        &self,
        derivative: RenderedDerivative,
        source: SourceContext<'_>,
    ) -> Result<UploadRequest> {
        let content_type = content_type(&derivative.format)?;
        let key = self.destination_key(source.key, derivative.label, &derivative.format)?;
        Ok(UploadRequest {
            key,
            content_type: String::from(content_type),
            body: derivative.bytes,
            params: self.upload_params.clone(),
        })
    }
}
