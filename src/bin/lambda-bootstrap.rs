use anyhow::{anyhow, Context, Result};
use aws_lambda_events::event::s3::S3Event;
use lambda_runtime::{run, service_fn, LambdaEvent};
use s3_image_derivatives::{app, client, Derivative, IncomingEvent};

/// Render and store the derivatives of every S3 event record
async fn function_handler(event: LambdaEvent<S3Event>) -> Result<Vec<Derivative>> {
    let mut derivatives = Vec::new();
    for record in &event.payload.records {
        let incoming = IncomingEvent::from(record);
        derivatives.extend(
            app::current()
                .handle(&incoming, client::current())
                .await
                .with_context(|| format!("Failed to handle record {:?}", &incoming))?,
        );
    }
    Ok(derivatives)
}

/// Run an AWS Lambda function that listens to S3 object-creation
/// events, and that renders and uploads a fixed family of resized
/// derivatives of each created image.
#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_max_level(tracing::Level::INFO)
        .with_target(false)
        .without_time()
        .init();
    app::init()?;
    client::init().await?;

    run(service_fn(function_handler))
        .await
        .map_err(|e| anyhow!("{:?}", e))
}
