//! Defines the global S3 client.

use anyhow::{anyhow, Result};
use aws_config::{from_env, SdkConfig};
use aws_sdk_s3::config::Region;
use aws_sdk_s3::Client;
use once_cell::sync::OnceCell;
use std::env;

/// Load the shared AWS configuration, honoring an
/// `AWS_ENDPOINT_URL` override for S3-compatible services.
pub async fn aws_service_config() -> SdkConfig {
    let endpoint_url_var = env::var("AWS_ENDPOINT_URL");
    if let Ok(endpoint_url) = endpoint_url_var {
        from_env()
            .endpoint_url(
                if endpoint_url.starts_with("http://") || endpoint_url.starts_with("https://") {
                    endpoint_url
                } else {
                    format!("https://{}", endpoint_url)
                },
            )
            .region(Region::new("us-east-1")) // should be OK since the endpoint was overridden
            .load()
            .await
    } else {
        from_env().load().await
    }
}

/// Global S3 client instance.
static CURRENT: OnceCell<Client> = OnceCell::new();

/// Initialize the global S3 client.
pub async fn init() -> Result<()> {
    let config = aws_service_config().await;
    let s3_config = aws_sdk_s3::config::Builder::from(&config)
        // overridden endpoints are usually S3-compatible services
        .force_path_style(env::var("AWS_ENDPOINT_URL").is_ok())
        .build();
    let client = Client::from_conf(s3_config);
    CURRENT
        .set(client)
        .map_err(|_| anyhow!("client::CURRENT was already initialized"))
}

/// Get the current S3 client instance, or panic if it hasn't been initialized.
pub fn current() -> &'static Client {
    CURRENT.get().expect("client is not initialized")
}
