//! Bedrock-backed implementation of the stream seam.
//!
//! `invoke_model_with_bidirectional_stream` takes its input as an event stream
//! supplied up front with the request, so the sink half is a bounded mpsc
//! channel feeding an `async_stream` that wraps each serialized frame in a
//! payload part. Dropping the channel sender ends the input stream, which is
//! how the SDK signals end-of-input to the service.

use async_trait::async_trait;
use aws_config::BehaviorVersion;
use aws_sdk_bedrockruntime::operation::invoke_model_with_bidirectional_stream::InvokeModelWithBidirectionalStreamOutput as StreamOutput;
use aws_sdk_bedrockruntime::types::{
    BidirectionalInputPayloadPart, InvokeModelWithBidirectionalStreamInput as InputEvent,
    InvokeModelWithBidirectionalStreamOutput as OutputEvent,
};
use aws_smithy_types::Blob;
use tokio::sync::mpsc;
use tracing::{debug, info};

use crate::core::credentials::ResolvedCredentials;
use crate::core::session::events::{ClientEvent, ServerEvent};

use super::{EventSink, EventSource, StreamConnector, StreamError};

/// Bounded so a stalled request applies backpressure to the caller instead of
/// buffering unbounded audio.
const INPUT_CHANNEL_BUFFER_SIZE: usize = 32;

/// Connector for Amazon Bedrock's bidirectional streaming operation.
#[derive(Debug, Clone)]
pub struct BedrockConnector {
    model_id: String,
    region: String,
    credentials: Option<ResolvedCredentials>,
}

impl BedrockConnector {
    /// `credentials` is the value resolved once at startup; `None` falls back
    /// to the SDK's default provider chain, in which case a host with no
    /// ambient credentials fails at the first handshake step.
    pub fn new(model_id: &str, region: &str, credentials: Option<ResolvedCredentials>) -> Self {
        Self {
            model_id: model_id.to_string(),
            region: region.to_string(),
            credentials,
        }
    }

    async fn load_sdk_config(&self) -> aws_config::SdkConfig {
        let loader =
            aws_config::defaults(BehaviorVersion::latest()).region(aws_config::Region::new(self.region.clone()));
        match &self.credentials {
            Some(creds) => {
                let provider = aws_credential_types::Credentials::new(
                    creds.access_key_id.clone(),
                    creds.secret_access_key.clone(),
                    creds.session_token.clone(),
                    None,
                    "sonic-bridge",
                );
                loader.credentials_provider(provider).load().await
            }
            None => loader.load().await,
        }
    }
}

#[async_trait]
impl StreamConnector for BedrockConnector {
    async fn connect(&self) -> Result<(Box<dyn EventSink>, Box<dyn EventSource>), StreamError> {
        let sdk_config = self.load_sdk_config().await;
        let client = aws_sdk_bedrockruntime::Client::new(&sdk_config);

        let (input_tx, mut input_rx) = mpsc::channel::<Vec<u8>>(INPUT_CHANNEL_BUFFER_SIZE);

        let input_stream = async_stream::stream! {
            while let Some(payload) = input_rx.recv().await {
                let part = BidirectionalInputPayloadPart::builder()
                    .bytes(Blob::new(payload))
                    .build();
                yield Ok(InputEvent::Chunk(part));
            }
            debug!("input channel closed, ending bidirectional input stream");
        };

        let output = client
            .invoke_model_with_bidirectional_stream()
            .model_id(&self.model_id)
            .body(input_stream.into())
            .send()
            .await
            .map_err(|e| StreamError::ConnectFailed(e.to_string()))?;

        info!(model_id = %self.model_id, "bidirectional stream opened");

        Ok((
            Box::new(BedrockSink {
                input_tx: Some(input_tx),
            }),
            Box::new(BedrockSource { output }),
        ))
    }
}

struct BedrockSink {
    input_tx: Option<mpsc::Sender<Vec<u8>>>,
}

#[async_trait]
impl EventSink for BedrockSink {
    async fn send(&mut self, event: ClientEvent) -> Result<(), StreamError> {
        let payload = event.encode()?;
        let tx = self
            .input_tx
            .as_ref()
            .ok_or_else(|| StreamError::SendFailed("input stream already closed".to_string()))?;
        tx.send(payload)
            .await
            .map_err(|_| StreamError::SendFailed("input stream task has terminated".to_string()))
    }

    async fn close(&mut self) -> Result<(), StreamError> {
        self.input_tx = None;
        Ok(())
    }
}

struct BedrockSource {
    output: StreamOutput,
}

#[async_trait]
impl EventSource for BedrockSource {
    async fn recv(&mut self) -> Result<Option<ServerEvent>, StreamError> {
        loop {
            match self.output.body.recv().await {
                Ok(Some(OutputEvent::Chunk(part))) => {
                    if let Some(blob) = part.bytes() {
                        return Ok(Some(ServerEvent::decode(blob.as_ref())?));
                    }
                    // Payload part with no bytes; keep reading.
                }
                Ok(Some(_)) => {
                    debug!("skipping unrecognized output stream variant");
                }
                Ok(None) => return Ok(None),
                Err(e) => return Err(StreamError::ReceiveFailed(e.to_string())),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_connector_without_credentials() {
        let connector = BedrockConnector::new("amazon.nova-sonic-v1:0", "us-east-1", None);
        assert_eq!(connector.model_id, "amazon.nova-sonic-v1:0");
        assert!(connector.credentials.is_none());
    }

    #[tokio::test]
    async fn test_sink_send_after_close_fails() {
        let (tx, _rx) = mpsc::channel(1);
        let mut sink = BedrockSink { input_tx: Some(tx) };
        sink.close().await.unwrap();
        let err = sink.send(ClientEvent::session_end()).await.unwrap_err();
        assert!(matches!(err, StreamError::SendFailed(_)));
    }

    #[tokio::test]
    async fn test_sink_sends_framed_payload() {
        let (tx, mut rx) = mpsc::channel(1);
        let mut sink = BedrockSink { input_tx: Some(tx) };
        sink.send(ClientEvent::prompt_end("p-1")).await.unwrap();
        let payload = rx.recv().await.unwrap();
        let value: serde_json::Value = serde_json::from_slice(&payload).unwrap();
        assert_eq!(value["event"]["promptEnd"]["promptName"], "p-1");
    }
}
