//! # Telegram Bot Integration
//!
//! This module delivers batch warnings and completion summaries to a Telegram
//! chat through the Bot API `sendMessage` method.
//!
//! ## Delivery Model
//!
//! The crawl engine only needs fire-and-forget semantics, so notifications are
//! split in two halves:
//!
//! - [`NotifierHandle`]: a cheap, cloneable handle implementing
//!   [`Notifier`]. Calling `notify` queues the text and returns immediately.
//! - [`spawn_worker`]: a background task that owns the [`TelegramNotifier`]
//!   and sends queued messages one at a time, in the order they were queued.
//!   The returned [`NotificationWorker`] flushes the queue on shutdown.
//!
//! Delivery failures are logged by the worker and never reach the pipeline.
//!
//! ## Limits
//!
//! Telegram rejects messages longer than 4096 characters; longer summaries
//! are cut and end with an ellipsis.
//!
//! ## Environment Configuration
//!
//! Set `TELEGRAM_TOKEN` and `TELEGRAM_CHAT_ID`. If either is missing,
//! notifications are disabled but still logged.

use anyhow::{Context, Result};
use reqwest::Client;
use tokio::sync::{mpsc, oneshot};
use tokio::task::{JoinError, JoinHandle};
use tracing::{error, info, warn};

use crate::models::TelegramMessage;
use crate::traits::Notifier;

const TELEGRAM_API: &str = "https://api.telegram.org";
const MAX_MESSAGE_CHARS: usize = 4096;

/// Telegram Bot API client bound to one chat.
///
/// ## Fields
///
/// - `client`: Reusable HTTP client for Bot API requests
/// - `api_base`: Bot API root, overridable for tests
/// - `credentials`: Bot token and chat id, `None` when unconfigured
#[derive(Clone)]
pub struct TelegramNotifier {
    client: Client,
    api_base: String,
    credentials: Option<(String, String)>,
}

impl TelegramNotifier {
    /// Creates a notifier; `None` for either value disables sending.
    pub fn new(token: Option<String>, chat_id: Option<String>) -> Self {
        Self::with_api_base(TELEGRAM_API, token, chat_id)
    }

    pub fn with_api_base(api_base: &str, token: Option<String>, chat_id: Option<String>) -> Self {
        let credentials = token.zip(chat_id);
        if credentials.is_none() {
            warn!("TELEGRAM_TOKEN or TELEGRAM_CHAT_ID not set - Telegram notifications will be disabled");
        }

        Self {
            client: Client::new(),
            api_base: api_base.trim_end_matches('/').to_string(),
            credentials,
        }
    }

    /// Sends one text message to the configured chat.
    ///
    /// ## Error Handling
    ///
    /// - **Missing credentials**: message logged, returns `Ok(())`
    /// - **Network failures**: propagated as `anyhow::Error`
    /// - **HTTP errors**: logged with status code, returns `Ok(())`
    pub async fn send_message(&self, text: &str) -> Result<()> {
        let Some((token, chat_id)) = &self.credentials else {
            info!("Telegram disabled, message not sent: {}", text);
            return Ok(());
        };

        let message = TelegramMessage {
            chat_id: chat_id.clone(),
            text: truncate(text),
            disable_web_page_preview: true,
        };
        let url = format!("{}/bot{}/sendMessage", self.api_base, token);

        let response = self
            .client
            .post(url)
            .json(&message)
            .send()
            .await
            .context("Failed to reach Telegram")?;

        if response.status().is_success() {
            info!("Telegram notification sent");
        } else {
            error!("Failed to send Telegram notification: {}", response.status());
        }

        Ok(())
    }
}

fn truncate(text: &str) -> String {
    if text.chars().count() <= MAX_MESSAGE_CHARS {
        return text.to_string();
    }
    let mut cut: String = text.chars().take(MAX_MESSAGE_CHARS - 1).collect();
    cut.push('…');
    cut
}

/// Queues notification text for the background worker
#[derive(Clone)]
pub struct NotifierHandle {
    tx: mpsc::UnboundedSender<String>,
}

impl Notifier for NotifierHandle {
    fn notify(&self, text: String) {
        if self.tx.send(text).is_err() {
            warn!("Notification worker has stopped, message dropped");
        }
    }
}

/// Background task delivering queued notifications
pub struct NotificationWorker {
    shutdown: Option<oneshot::Sender<()>>,
    task: JoinHandle<()>,
}

impl NotificationWorker {
    /// Deliver everything queued so far, then stop the worker.
    ///
    /// Handles still held elsewhere (for example by scheduled jobs) do not
    /// keep the worker alive; messages queued after the flush are dropped.
    pub async fn flush(mut self) -> Result<(), JoinError> {
        if let Some(shutdown) = self.shutdown.take() {
            let _ = shutdown.send(());
        }
        self.task.await
    }
}

/// Starts the worker that owns `telegram`.
///
/// The worker exits once every [`NotifierHandle`] is dropped or
/// [`NotificationWorker::flush`] is called, after draining the queue.
pub fn spawn_worker(telegram: TelegramNotifier) -> (NotifierHandle, NotificationWorker) {
    let (tx, mut rx) = mpsc::unbounded_channel::<String>();
    let (shutdown_tx, mut shutdown_rx) = oneshot::channel::<()>();

    let task = tokio::spawn(async move {
        loop {
            tokio::select! {
                biased;
                received = rx.recv() => match received {
                    Some(text) => deliver(&telegram, &text).await,
                    None => break,
                },
                _ = &mut shutdown_rx => {
                    rx.close();
                    while let Some(text) = rx.recv().await {
                        deliver(&telegram, &text).await;
                    }
                    break;
                }
            }
        }
        info!("Notification worker stopped");
    });

    let worker = NotificationWorker {
        shutdown: Some(shutdown_tx),
        task,
    };
    (NotifierHandle { tx }, worker)
}

async fn deliver(telegram: &TelegramNotifier, text: &str) {
    if let Err(e) = telegram.send_message(text).await {
        error!("Error sending Telegram notification: {:#}", e);
    }
}
