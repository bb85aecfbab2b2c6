//! Inbound request handling over the relay broker
//!
//! Client-facing operations arrive on a request queue; this module
//! deserializes them and dispatches to the service layer.

use crate::error::{DuelError, Result};
use crate::relay::messages::RequestUtils;
use crate::types::ClientRequest;
use amqprs::{
    channel::{BasicCancelArguments, BasicConsumeArguments, Channel},
    consumer::AsyncConsumer,
    BasicProperties, Deliver,
};
use async_trait::async_trait;
use std::sync::Arc;
use tracing::{error, info};

/// Interface for handling inbound client requests
#[async_trait]
pub trait RequestHandler: Send + Sync {
    /// Handle a search/create/join/leave request
    async fn handle_request(&self, request: ClientRequest) -> Result<()>;

    /// Handle processing errors
    async fn handle_error(&self, error: DuelError, message_data: &[u8]);
}

/// Consumer attached to the client request queue
pub struct ClientRequestConsumer {
    handler: Arc<dyn RequestHandler>,
    channel: Channel,
    consumer_tag: String,
}

impl ClientRequestConsumer {
    pub fn new(handler: Arc<dyn RequestHandler>, channel: Channel) -> Self {
        let consumer_tag = format!("request-consumer-{}", uuid::Uuid::new_v4());

        Self {
            handler,
            channel,
            consumer_tag,
        }
    }

    pub async fn start_consuming(&self, queue_name: &str) -> Result<()> {
        let args = BasicConsumeArguments::new(queue_name, &self.consumer_tag);

        self.channel
            .basic_consume(RequestConsumer::new(self.handler.clone()), args)
            .await
            .map_err(|e| DuelError::RelayError {
                message: format!("Failed to start consuming: {}", e),
            })?;

        info!("Started consuming client requests from queue: {}", queue_name);
        Ok(())
    }

    pub async fn stop_consuming(&self) -> Result<()> {
        let args = BasicCancelArguments::new(&self.consumer_tag);

        self.channel.basic_cancel(args).await.map_err(|e| {
            DuelError::RelayError {
                message: format!("Failed to stop consuming: {}", e),
            }
        })?;

        info!("Stopped consuming client requests");
        Ok(())
    }
}

struct RequestConsumer {
    handler: Arc<dyn RequestHandler>,
}

impl RequestConsumer {
    fn new(handler: Arc<dyn RequestHandler>) -> Self {
        Self { handler }
    }

    async fn process_message(&self, content: &[u8]) -> Result<()> {
        let request = RequestUtils::deserialize_request(content)?;
        self.handler.handle_request(request).await
    }
}

#[async_trait]
impl AsyncConsumer for RequestConsumer {
    async fn consume(
        &mut self,
        _channel: &Channel,
        deliver: Deliver,
        _basic_properties: BasicProperties,
        content: Vec<u8>,
    ) {
        let delivery_tag = deliver.delivery_tag();

        if let Err(e) = self.process_message(&content).await {
            error!(
                "Request processing failed - delivery_tag: {}, error: {}",
                delivery_tag, e
            );
            self.handler
                .handle_error(
                    DuelError::InternalError {
                        message: e.to_string(),
                    },
                    &content,
                )
                .await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{LeaveRoomRequest, MatchPreference, Participant, SearchRequest};
    use crate::utils::current_timestamp;
    use std::sync::Mutex;

    #[derive(Default)]
    struct RecordingHandler {
        requests: Mutex<Vec<ClientRequest>>,
        errors: Mutex<usize>,
    }

    #[async_trait]
    impl RequestHandler for RecordingHandler {
        async fn handle_request(&self, request: ClientRequest) -> Result<()> {
            self.requests.lock().unwrap().push(request);
            Ok(())
        }

        async fn handle_error(&self, _error: DuelError, _message_data: &[u8]) {
            *self.errors.lock().unwrap() += 1;
        }
    }

    #[tokio::test]
    async fn test_request_dispatch() {
        let handler = Arc::new(RecordingHandler::default());
        let consumer = RequestConsumer::new(handler.clone());

        let request = ClientRequest::Search(SearchRequest {
            participant: Participant::new("a", "Alice"),
            preference: MatchPreference {
                language: "en".to_string(),
                max_passage_length: 100,
            },
            timestamp: current_timestamp(),
        });
        let bytes = RequestUtils::serialize_request(&request).unwrap();

        consumer.process_message(&bytes).await.unwrap();
        assert_eq!(handler.requests.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_malformed_request_is_rejected() {
        let handler = Arc::new(RecordingHandler::default());
        let consumer = RequestConsumer::new(handler.clone());

        assert!(consumer.process_message(b"not json").await.is_err());
        assert!(handler.requests.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_invalid_request_is_rejected() {
        let handler = Arc::new(RecordingHandler::default());
        let consumer = RequestConsumer::new(handler.clone());

        let request = ClientRequest::LeaveRoom(LeaveRoomRequest {
            room_id: "ABCD".to_string(),
            participant_id: "".to_string(),
            timestamp: current_timestamp(),
        });
        let bytes = serde_json::to_vec(&request).unwrap();

        assert!(consumer.process_message(&bytes).await.is_err());
    }
}
