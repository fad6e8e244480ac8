use std::sync::Arc;

use aws_sdk_dynamodb::{
    self as dynamodb, operation::put_item::PutItemError, types::AttributeValue,
};
use aws_sdk_s3::{self as s3, error::SdkError, operation::get_object::GetObjectError};

use super::*;
use crate::record::PARTITION_KEY;

/// Holds the AWS configuration (credentials chain, region, HTTP client)
/// resolved once per process; every store built from it shares it.
#[derive(Clone, Debug)]
pub struct AwsRoot {
    sdk_config: aws_config::SdkConfig,
}

impl AwsRoot {
    pub async fn new(region: Option<String>) -> Self {
        let mut loader = aws_config::from_env();
        if let Some(region) = region {
            loader = loader.region(aws_config::Region::new(region));
        }
        Self {
            sdk_config: loader.load().await,
        }
    }

    pub fn store(&self, conf: AwsConf) -> Arc<AwsBuilder> {
        Arc::new(AwsBuilder {
            conf,
            sdk_config: self.sdk_config.clone(),
        })
    }
}

#[derive(Clone, Debug)]
pub struct AwsConf {
    pub bucket: String,
    pub table: String,
    /// Overrides for S3-compatible or local deployments
    pub s3_endpoint: Option<String>,
    pub dynamodb_endpoint: Option<String>,
}

#[derive(Clone, Debug)]
pub struct AwsBuilder {
    conf: AwsConf,
    sdk_config: aws_config::SdkConfig,
}

#[async_trait]
impl IBuilder for AwsBuilder {
    async fn build(&self) -> Result<Store, StorageError> {
        let mut s3_config = s3::config::Builder::from(&self.sdk_config);
        if let Some(endpoint) = &self.conf.s3_endpoint {
            s3_config = s3_config
                .endpoint_url(endpoint.clone())
                .force_path_style(true);
        }
        let s3_client = s3::Client::from_conf(s3_config.build());

        let mut dynamodb_config = dynamodb::config::Builder::from(&self.sdk_config);
        if let Some(endpoint) = &self.conf.dynamodb_endpoint {
            dynamodb_config = dynamodb_config.endpoint_url(endpoint.clone());
        }
        let dynamodb_client = dynamodb::Client::from_conf(dynamodb_config.build());

        Ok(Box::new(AwsStore {
            bucket: self.conf.bucket.clone(),
            table: self.conf.table.clone(),
            s3: s3_client,
            dynamodb: dynamodb_client,
        }))
    }
}

pub struct AwsStore {
    bucket: String,
    table: String,
    s3: s3::Client,
    dynamodb: dynamodb::Client,
}

#[async_trait]
impl IStore for AwsStore {
    async fn blob_fetch(&self, blob_ref: &BlobRef) -> Result<BlobVal, StorageError> {
        tracing::trace!(entry=%blob_ref, command="blob_fetch");
        let maybe_out = self
            .s3
            .get_object()
            .bucket(self.bucket.to_string())
            .key(blob_ref.0.to_string())
            .send()
            .await;

        let object_output = match maybe_out {
            Ok(output) => output,
            Err(SdkError::ServiceError(x)) => match x.err() {
                GetObjectError::NoSuchKey(_) => return Err(StorageError::NotFound),
                e => {
                    tracing::warn!("Blob Fetch Error, Service Error: {}", e);
                    return Err(StorageError::Internal);
                }
            },
            Err(e) => {
                tracing::warn!("Blob Fetch Error, {}", e);
                return Err(StorageError::Internal);
            }
        };

        let buffer = match object_output.body.collect().await {
            Ok(aggreg) => aggreg.to_vec(),
            Err(e) => {
                tracing::warn!("Fetching body failed with {}", e);
                return Err(StorageError::Internal);
            }
        };

        let mut bv = BlobVal::new(blob_ref.clone(), buffer);
        if let Some(meta) = object_output.metadata {
            bv.meta = meta;
        }
        tracing::debug!("Fetched {}/{}", self.bucket, blob_ref.0);
        Ok(bv)
    }

    async fn record_fetch(&self, message_id: &str) -> Result<MetadataRecord, StorageError> {
        tracing::trace!(message_id = message_id, command = "record_fetch");
        let maybe_out = self
            .dynamodb
            .get_item()
            .table_name(self.table.to_string())
            .key(PARTITION_KEY, AttributeValue::S(message_id.to_string()))
            .consistent_read(true)
            .send()
            .await;

        let item = match maybe_out {
            Ok(output) => match output.item {
                Some(item) => item,
                None => {
                    tracing::debug!(
                        "DynamoDB item not found message_id={}, table={}",
                        message_id,
                        self.table
                    );
                    return Err(StorageError::NotFound);
                }
            },
            Err(e) => {
                tracing::error!(
                    "DynamoDB get item message_id={}, table={} failed: {}",
                    message_id,
                    self.table,
                    e
                );
                return Err(StorageError::Internal);
            }
        };

        attrs::record_from_item(&item).map_err(|e| {
            tracing::error!(
                "DynamoDB item message_id={}, table={} is not a metadata record: {}",
                message_id,
                self.table,
                e
            );
            StorageError::Internal
        })
    }

    async fn record_put(
        &self,
        record: &MetadataRecord,
        cond: &Condition,
    ) -> Result<(), StorageError> {
        tracing::trace!(message_id=%record.message_id, condition=?cond, command="record_put");
        let expr = attrs::condition_expression(cond);

        let maybe_put = self
            .dynamodb
            .put_item()
            .table_name(self.table.to_string())
            .set_item(Some(attrs::record_to_item(record)))
            .condition_expression(expr.expression)
            .set_expression_attribute_names(Some(expr.names))
            .set_expression_attribute_values(Some(expr.values))
            .send()
            .await;

        match maybe_put {
            Ok(_) => {
                tracing::debug!(
                    "Put {}/{} as {}",
                    self.table,
                    record.message_id,
                    record.processing_status
                );
                Ok(())
            }
            Err(SdkError::ServiceError(x)) => match x.err() {
                PutItemError::ConditionalCheckFailedException(_) => {
                    tracing::debug!(
                        "Condition {:?} does not hold for {}/{}",
                        cond,
                        self.table,
                        record.message_id
                    );
                    Err(StorageError::PreconditionFailed)
                }
                e => {
                    tracing::error!("DynamoDB put item, Service Error: {}", e);
                    Err(StorageError::Internal)
                }
            },
            Err(e) => {
                tracing::error!(
                    "unable to put item {} (table: {}), error: {}",
                    record.message_id,
                    self.table,
                    e
                );
                Err(StorageError::Internal)
            }
        }
    }
}
