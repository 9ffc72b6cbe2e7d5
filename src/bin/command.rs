use anyhow::{anyhow, Context, Result};
use s3_image_derivatives::event::encode_key;
use s3_image_derivatives::{app, client, IncomingEvent};
use std::env::var;
use tracing::info;

/// Render the derivatives of a single source key, or delete them with
/// `ACTION=purge`. Meant for redriving failed invocations by hand.
#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_max_level(tracing::Level::INFO)
        .with_target(false)
        .without_time()
        .init();
    app::init()?;
    client::init().await?;

    let key = var("SOURCE_KEY").context("SOURCE_KEY is required")?;
    let action = var("ACTION").unwrap_or(String::from("render"));

    match action.as_str() {
        "render" => {
            let event = IncomingEvent::new("ObjectCreated:Manual", encode_key(&key));
            let derivatives = app::current()
                .handle(&event, client::current())
                .await
                .with_context(|| format!("Failed to render derivatives of {:?}", &key))?;
            println!("{}", serde_json::to_string_pretty(&derivatives)?);
        }
        "purge" => {
            let keys = app::current()
                .purge(&key, client::current())
                .await
                .with_context(|| format!("Failed to purge derivatives of {:?}", &key))?;
            info!("Deleted {} derivatives", keys.len());
        }
        other => return Err(anyhow!("ACTION must be render or purge, got {:?}", other)),
    }
    Ok(())
}
