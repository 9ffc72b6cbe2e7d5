use anyhow::{Context, Result};
use aws_lambda_events::event::s3::S3Event;
use aws_sdk_sqs::types::{DeleteMessageBatchRequestEntry, Message};
use aws_sdk_sqs::Client;
use core::time::Duration;
use s3_image_derivatives::{app, client, IncomingEvent};
use std::env::var;
use tokio::time::sleep;
use tracing::{info, instrument, warn};

/// The minimum time to wait between ticks, in milliseconds.
const BASE_LAPSE_TIME: u64 = 300;

/// The base of the exponential backoff sequence.
const BACKOFF_BASE: u64 = 2;

/// The maximum amount of milliseconds to sleep between ticks. Set to
/// the equivalent of 20 minutes.
const MAX_SLEEP: u64 = 1200000;

/// Wrapper structure that executes successive SQS consumption cycles:
/// receive messages, parse their contents into S3 events, render the
/// derivatives of each record, and finally delete messages.
struct SQSConsumer {
    queue_url: String,
    visibility_timeout: i32,
    max_number_of_messages: i32,
    client: Client,
    backoff: u32,
}

impl SQSConsumer {
    /// Record a success and wait a little while.
    async fn pass(&mut self) {
        self.backoff = 0;
        sleep(Duration::from_millis(BASE_LAPSE_TIME)).await;
    }

    /// Record a failure and wait a while.
    async fn fail(&mut self) {
        sleep(Duration::from_millis(std::cmp::min(
            BASE_LAPSE_TIME.saturating_mul(BACKOFF_BASE.saturating_pow(self.backoff)),
            MAX_SLEEP,
        )))
        .await;
        self.backoff = self.backoff.saturating_add(1);
    }

    /// Long-poll the queue for the next messages.
    async fn receive(&self) -> Result<Vec<Message>> {
        let output = self
            .client
            .receive_message()
            .queue_url(&self.queue_url)
            .visibility_timeout(self.visibility_timeout)
            .max_number_of_messages(self.max_number_of_messages)
            .wait_time_seconds(30)
            .send()
            .await
            .context("Couldn't receive messages from the SQS queue")?;
        Ok(output.messages().unwrap_or_default().to_vec())
    }

    /// Render the derivatives of every record carried by `messages`.
    /// Messages whose body isn't an S3 event are skipped. Every record
    /// is attempted; the last failure is returned.
    async fn handle(messages: &[Message]) -> Result<usize> {
        let mut stored = 0;
        let mut failure = None;
        for body in messages.iter().filter_map(Message::body) {
            let event = match serde_json::from_str::<S3Event>(body) {
                Ok(event) => event,
                Err(e) => {
                    warn!(error = %e, "Skipped an SQS message that isn't an S3 event");
                    continue;
                }
            };
            for record in &event.records {
                let incoming = IncomingEvent::from(record);
                match app::current().handle(&incoming, client::current()).await {
                    Ok(derivatives) => stored += derivatives.len(),
                    Err(e) => {
                        warn!(key = %incoming.object_key, error = ?e, "Couldn't handle record");
                        failure = Some(e);
                    }
                }
            }
        }
        failure.map_or(Ok(stored), Err)
    }

    /// Delete handled messages from the queue.
    async fn acknowledge(&self, messages: &[Message]) -> Result<()> {
        let entries = messages
            .iter()
            .map(|message| {
                DeleteMessageBatchRequestEntry::builder()
                    .set_id(message.message_id().map(String::from))
                    .set_receipt_handle(message.receipt_handle().map(String::from))
                    .build()
            })
            .collect();
        let output = self
            .client
            .delete_message_batch()
            .queue_url(&self.queue_url)
            .set_entries(Some(entries))
            .send()
            .await
            .context("Couldn't delete SQS messages")?;
        let failed = output.failed().unwrap_or_default().len();
        if failed > 0 {
            warn!(failed, total = messages.len(), "Some SQS messages weren't deleted");
        }
        Ok(())
    }

    /// Perform a single pass of the SQS consumption cycle. Messages
    /// are only deleted once every record in them was handled, so
    /// failed records are redelivered after the visibility timeout.
    #[instrument(skip(self))]
    pub async fn tick(&mut self) {
        let messages = match self.receive().await {
            Ok(messages) => messages,
            Err(e) => {
                warn!(error = ?e, "Receive failed");
                return self.fail().await;
            }
        };
        if messages.is_empty() {
            return self.pass().await;
        }
        match Self::handle(&messages).await {
            Ok(stored) => info!(messages = messages.len(), stored, "Handled SQS messages"),
            Err(_) => {
                warn!("Records failed; SQS messages are left for redelivery");
                return self.pass().await;
            }
        }
        if let Err(e) = self.acknowledge(&messages).await {
            warn!(error = ?e, "Acknowledge failed");
            return self.fail().await;
        }
        self.pass().await;
    }
}

/// Consume S3 events from an SQS queue, rendering and uploading the
/// derivatives of every created image.
#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_max_level(tracing::Level::INFO)
        .with_target(false)
        .without_time()
        .init();
    app::init()?;
    client::init().await?;

    let queue_url = var("SQS_QUEUE_URL").context("SQS_QUEUE_URL is required")?;
    let visibility_timeout = var("SQS_VISIBILITY_TIMEOUT")
        .unwrap_or(String::from("30"))
        .parse::<i32>()
        .context("SQS_VISIBILITY_TIMEOUT must be a number")?;
    let max_number_of_messages = var("SQS_MAX_NUMBER_OF_MESSAGES")
        .unwrap_or(String::from("1"))
        .parse::<i32>()
        .context("SQS_MAX_NUMBER_OF_MESSAGES must be a number")?;
    let sqs_client = Client::new(&client::aws_service_config().await);

    let mut consumer = SQSConsumer {
        queue_url,
        visibility_timeout,
        max_number_of_messages,
        client: sqs_client,
        backoff: 0,
    };

    // Listen for abort signals
    let (stop_processing, mut should_stop) = tokio::sync::oneshot::channel();
    tokio::spawn(async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!("Couldn't listen for CTRL-C: {:?}", e);
            return;
        }
        info!("CTRL-C");
        let _ = stop_processing.send(());
    });

    // Continuously receive messages and render the derivatives of
    // each record
    loop {
        tokio::select! {
            _ = consumer.tick() => (),
            _ = &mut should_stop => break
        }
    }
    Ok(())
}
