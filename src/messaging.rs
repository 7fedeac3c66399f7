use async_trait::async_trait;
use aws_sdk_sns::Client as SnsClient;
use aws_sdk_sqs::Client as SqsClient;
use aws_sdk_sqs::error::{DisplayErrorContext, SdkError};
use tracing::instrument;

use crate::broker::Broker;
use crate::error::BrokerError;

/// Topics with this prefix go to SNS, everything else is an SQS queue URL.
const SNS_PREFIX: &str = "SNS::";

/// Where a topic string points.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Channel<'a> {
    Sns { topic_arn: &'a str },
    Sqs { queue_url: &'a str },
}

impl<'a> Channel<'a> {
    pub fn parse(topic: &'a str) -> Self {
        match topic.strip_prefix(SNS_PREFIX) {
            Some(topic_arn) => Channel::Sns { topic_arn },
            None => Channel::Sqs { queue_url: topic },
        }
    }
}

/// [`Broker`] backed by AWS SNS topics and SQS queues.
#[derive(Debug, Clone)]
pub struct AwsBroker {
    sqs_client: SqsClient,
    sns_client: SnsClient,
}

impl AwsBroker {
    pub fn new(sqs_client: SqsClient, sns_client: SnsClient) -> Self {
        Self { sqs_client, sns_client }
    }
}

#[async_trait]
impl Broker for AwsBroker {
    #[instrument(skip(self, payload), fields(bytes = payload.len()))]
    async fn publish(&self, topic: &str, payload: &[u8]) -> Result<(), BrokerError> {
        let body = std::str::from_utf8(payload)
            .map_err(|e| BrokerError::Rejected(format!("payload is not valid UTF-8: {}", e)))?;

        match Channel::parse(topic) {
            Channel::Sns { topic_arn } => {
                self.sns_client
                    .publish()
                    .topic_arn(topic_arn)
                    .message(body)
                    .send()
                    .await
                    .map_err(sdk_error)?;
            }
            Channel::Sqs { queue_url } => {
                self.sqs_client
                    .send_message()
                    .queue_url(queue_url)
                    .message_body(body)
                    .send()
                    .await
                    .map_err(sdk_error)?;
            }
        }

        Ok(())
    }
}

/// Service errors mean AWS looked at the request and refused it; anything
/// else (dispatch, timeout, unparseable response) is a transport problem.
fn sdk_error<E, R>(err: SdkError<E, R>) -> BrokerError
where
    E: std::error::Error + 'static,
    R: std::fmt::Debug,
{
    let detail = format!("{}", DisplayErrorContext(&err));
    match err {
        SdkError::ServiceError(_) => BrokerError::Rejected(detail),
        _ => BrokerError::Transport(detail),
    }
}
