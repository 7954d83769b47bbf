use std::sync::Arc;
use std::time::Duration;

use log::{debug, info, warn};
use mongodb::bson::doc;
use mongodb::bson::oid::ObjectId;
use reqwest::header;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

use crate::db::MongoDB;
use crate::errors::ChatError;
use crate::models::PushToken;

/// One queued push notification, addressed by user rather than by token so
/// the worker always reads the freshest token row.
#[derive(Debug)]
pub struct PushJob {
    pub user_id: ObjectId,
    pub title: String,
    pub body: String,
    pub data: serde_json::Value,
}

/// Producer half handed to the event routers. Enqueueing never blocks and
/// never fails the send-message path.
#[derive(Clone)]
pub struct PushQueue {
    tx: mpsc::UnboundedSender<PushJob>,
}

impl PushQueue {
    pub fn enqueue(&self, job: PushJob) {
        // The receiver lives for the process lifetime; a send only fails
        // during shutdown, when a lost push is acceptable.
        if self.tx.send(job).is_err() {
            warn!("Push queue closed, dropping notification");
        }
    }
}

pub fn channel() -> (PushQueue, mpsc::UnboundedReceiver<PushJob>) {
    let (tx, rx) = mpsc::unbounded_channel();
    (PushQueue { tx }, rx)
}

/// Ceiling on one provider call. The worker drains jobs sequentially, so
/// an unanswered POST would otherwise stall every job queued behind it.
const PROVIDER_TIMEOUT: Duration = Duration::from_secs(10);

fn http_client(timeout: Duration) -> reqwest::Client {
    reqwest::Client::builder()
        .timeout(timeout)
        .build()
        .expect("Failed to build push HTTP client")
}

/// Starts the delivery worker on the actix runtime. Jobs are consumed
/// sequentially; every failure is logged and swallowed here, nothing
/// propagates back to the chat paths that enqueued the job.
pub fn spawn_worker(mut rx: mpsc::UnboundedReceiver<PushJob>, db: Arc<MongoDB>, endpoint: String) {
    let client = http_client(PROVIDER_TIMEOUT);
    actix_web::rt::spawn(async move {
        info!("Push worker started (endpoint: {})", endpoint);
        while let Some(job) = rx.recv().await {
            if let Err(err) = deliver(&client, &db, &endpoint, &job).await {
                warn!("Push delivery for user {} failed: {}", job.user_id.to_hex(), err);
            }
        }
    });
}

pub fn is_expo_token(token: &str) -> bool {
    token.starts_with("ExponentPushToken[") || token.starts_with("ExpoPushToken[")
}

#[derive(Debug, Serialize)]
struct ExpoPushMessage {
    to: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    sound: Option<String>,
    title: String,
    body: String,
    data: serde_json::Value,
}

#[derive(Debug, Deserialize)]
struct ExpoPushReceipt {
    data: Option<ExpoReceiptData>,
}

#[derive(Debug, Deserialize)]
struct ExpoReceiptData {
    status: Option<String>,
    message: Option<String>,
    details: Option<ExpoReceiptDetails>,
}

#[derive(Debug, Deserialize)]
struct ExpoReceiptDetails {
    error: Option<String>,
}

async fn deliver(
    client: &reqwest::Client,
    db: &MongoDB,
    endpoint: &str,
    job: &PushJob,
) -> Result<(), ChatError> {
    let tokens = db.db.collection::<PushToken>("pushtokens");
    let stored = match tokens
        .find_one(doc! { "userId": job.user_id, "isActive": true })
        .await?
    {
        Some(stored) => stored,
        None => {
            debug!("No active push token for user {}", job.user_id.to_hex());
            return Ok(());
        }
    };

    if !is_expo_token(&stored.token) {
        debug!("Push token for user {} has no Expo shape", job.user_id.to_hex());
        return Ok(());
    }

    let message = ExpoPushMessage {
        to: stored.token.clone(),
        sound: Some("default".to_string()),
        title: job.title.clone(),
        body: job.body.clone(),
        data: job.data.clone(),
    };

    let response = client
        .post(endpoint)
        .header(header::ACCEPT, "application/json")
        .header(header::ACCEPT_ENCODING, "gzip, deflate")
        .json(&message)
        .send()
        .await
        .map_err(|e| ChatError::PushUnreachable(e.to_string()))?;
    let receipt: ExpoPushReceipt = response
        .json()
        .await
        .map_err(|e| ChatError::PushUnreachable(e.to_string()))?;

    if let Some(data) = receipt.data {
        if data.status.as_deref() == Some("error") {
            // A permanently dead token gets retired so the queue stops
            // paying for it on every message.
            if data.details.as_ref().and_then(|d| d.error.as_deref())
                == Some("DeviceNotRegistered")
            {
                tokens
                    .update_one(
                        doc! { "_id": stored.id },
                        doc! { "$set": { "isActive": false } },
                    )
                    .await?;
                info!(
                    "Deactivated unregistered push token for user {}",
                    job.user_id.to_hex()
                );
            }
            return Err(ChatError::PushRejected(
                data.message
                    .unwrap_or_else(|| "unknown provider error".to_string()),
            ));
        }
    }

    debug!("Push delivered to user {}", job.user_id.to_hex());
    Ok(())
}
