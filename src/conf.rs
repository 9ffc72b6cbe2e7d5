//! Defines configuration as read from the environment.

use serde::Deserialize;

/// Default `output_dir` value.
fn default_output_dir() -> String {
    String::from("resized")
}

/// Default `key_template` value.
fn default_key_template() -> String {
    String::from(crate::keys::DEFAULT_KEY_TEMPLATE)
}

/// Default `output_format` value.
fn default_output_format() -> String {
    String::from("jpeg")
}

/// Default `quality` value.
fn default_quality() -> u8 {
    crate::render::DEFAULT_QUALITY
}

/// Default `progressive` value.
fn default_progressive() -> bool {
    true
}

/// Default `pre_operations` value.
fn default_pre_operations() -> String {
    String::from("auto_orient")
}

/// The pipeline is configured to fetch images from S3, render a fixed
/// family of derivatives, and push them to S3. The configuration must
/// be given as environment variables.
#[derive(Debug, Deserialize)]
pub struct Settings {
    /// Defines a filter to select only matching keys. The star (*)
    /// can be used as a wildcard matching any number of non-slash
    /// characters. E.g. to match any file in a folder, use
    /// `"folder/*"`. Omitting this will make it match any file.
    #[serde(default)]
    pub match_key: Option<String>,

    /// Defines the bucket to fetch sources from when the triggering
    /// event doesn't name one, as is the case for manual runs.
    #[serde(default)]
    pub source_bucket: Option<String>,

    /// Defines a bucket to receive the derivatives. If omitted, it
    /// will be the same bucket as the source one. When they are the
    /// same, `match_key` should exclude the output directory, or each
    /// derivative would trigger another run.
    #[serde(default)]
    pub target_bucket: Option<String>,

    /// The directory derivatives are written to, available as `{dir}`
    /// in the key template.
    #[serde(default = "default_output_dir")]
    pub output_dir: String,

    /// The template for derivative keys. Recognized placeholders are
    /// `{dir}`, `{parent}`, `{name}`, `{size}` and `{ext}`.
    #[serde(default = "default_key_template")]
    pub key_template: String,

    /// The format every derivative is encoded to: one of `jpeg`,
    /// `png`, `webp` or `gif`.
    #[serde(default = "default_output_format")]
    pub output_format: String,

    /// The JPEG quality, from 1 to 100.
    #[serde(default = "default_quality")]
    pub quality: u8,

    /// Whether JPEG derivatives are written progressive.
    #[serde(default = "default_progressive")]
    pub progressive: bool,

    /// Comma-separated whole-image operations applied to the source
    /// before resizing.
    #[serde(default = "default_pre_operations")]
    pub pre_operations: String,

    /// A canned ACL given to every derivative.
    #[serde(default)]
    pub upload_acl: Option<String>,

    /// A Cache-Control header given to every derivative.
    #[serde(default)]
    pub upload_cache_control: Option<String>,

    /// A storage class given to every derivative.
    #[serde(default)]
    pub upload_storage_class: Option<String>,
}
