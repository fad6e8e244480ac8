use lambda_runtime::{service_fn, Error, LambdaEvent};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use mailproc_ingest::{DeliveryEvent, IngestOutcome, Ingestor};

/// What the SES receipt rule hands to the function, reduced to what we
/// use. SES stored the raw message before invoking us, under its own
/// message id.
#[derive(Deserialize, Debug, Clone)]
pub struct SesEvent {
    #[serde(rename = "Records")]
    pub records: Vec<SesRecord>,
}

#[derive(Deserialize, Debug, Clone)]
pub struct SesRecord {
    pub ses: SesMessage,
}

#[derive(Deserialize, Debug, Clone)]
pub struct SesMessage {
    pub mail: SesMail,
    pub receipt: Option<SesReceipt>,
}

#[derive(Deserialize, Debug, Clone)]
#[serde(rename_all = "camelCase")]
pub struct SesMail {
    pub message_id: String,
    pub timestamp: Option<String>,
    pub source: Option<String>,
}

#[derive(Deserialize, Debug, Clone)]
pub struct SesReceipt {
    pub action: Option<SesAction>,
}

#[derive(Deserialize, Debug, Clone)]
pub struct SesAction {
    #[serde(rename = "type")]
    pub kind: String,
}

#[derive(Deserialize, Debug, Clone)]
#[serde(untagged)]
pub enum Invocation {
    Ses(SesEvent),
    /// Operator replay, `{ "storage_key": ..., "delivery_id": ... }`
    Direct(DeliveryEvent),
}

#[derive(Serialize, Debug, Clone, PartialEq, Eq)]
pub struct InvocationReport {
    /// Receipt rules invoked synchronously read this to continue the rule set
    pub disposition: &'static str,
    pub outcomes: Vec<DeliveryReport>,
}

#[derive(Serialize, Debug, Clone, PartialEq, Eq)]
pub struct DeliveryReport {
    pub storage_key: String,
    pub delivery_id: String,
    pub status: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl Invocation {
    pub fn deliveries(self, object_key_prefix: &str) -> Vec<DeliveryEvent> {
        match self {
            Self::Direct(event) => vec![event],
            Self::Ses(ses) => ses
                .records
                .into_iter()
                .map(|record| {
                    let mail = record.ses.mail;
                    if let Some(action) = record.ses.receipt.and_then(|r| r.action) {
                        tracing::trace!(
                            delivery_id = %mail.message_id,
                            action = %action.kind,
                            received = ?mail.timestamp,
                            source = ?mail.source,
                            "ses record"
                        );
                    }
                    DeliveryEvent {
                        storage_key: format!("{}{}", object_key_prefix, mail.message_id),
                        delivery_id: mail.message_id,
                    }
                })
                .collect(),
        }
    }
}

/// Process every delivery of one invocation, in order.
///
/// Terminal failures are reported in the body: redelivering them would
/// fail the same way. If any delivery failed in a retryable way the whole
/// invocation fails, so the trigger delivers again; deliveries that did
/// succeed are no-ops the second time.
pub async fn handle(
    ingestor: &Ingestor,
    object_key_prefix: &str,
    payload: Value,
) -> Result<InvocationReport, Error> {
    let invocation: Invocation = serde_json::from_value(payload).map_err(|e| {
        tracing::error!("unsupported invocation payload: {}", e);
        e
    })?;

    let mut outcomes = vec![];
    let mut retry = None;
    for event in invocation.deliveries(object_key_prefix) {
        let res = ingestor.ingest(&event).await;
        let (status, message_id, error) = match res {
            Ok(IngestOutcome::Committed { message_id }) => ("committed", Some(message_id), None),
            Ok(IngestOutcome::Duplicate { message_id }) => ("duplicate", Some(message_id), None),
            Err(e) if e.is_retryable() => {
                let kind = e.kind();
                retry.get_or_insert(e);
                ("retry", None, Some(kind.to_string()))
            }
            Err(e) => ("failed", None, Some(format!("{}: {}", e.kind(), e))),
        };
        outcomes.push(DeliveryReport {
            storage_key: event.storage_key,
            delivery_id: event.delivery_id,
            status,
            message_id,
            error,
        });
    }

    if let Some(e) = retry {
        return Err(e.into());
    }
    Ok(InvocationReport {
        disposition: "CONTINUE",
        outcomes,
    })
}

pub async fn run(ingestor: Ingestor, object_key_prefix: String) -> Result<(), Error> {
    tracing::info!(prefix = %object_key_prefix, "waiting for SES receipt events");
    let ingestor = &ingestor;
    let prefix = object_key_prefix.as_str();
    lambda_runtime::run(service_fn(move |event: LambdaEvent<Value>| async move {
        tracing::debug!(request_id = %event.context.request_id, "invocation");
        handle(ingestor, prefix, event.payload).await
    }))
    .await
}
