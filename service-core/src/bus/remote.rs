//! gRPC transport for the bus.
//!
//! The envelope body travels as a JSON string so the reply contract is
//! byte-for-byte the one the in-process [`EventBus`] produces.

use async_trait::async_trait;
use serde_json::Value;
use std::time::Duration;
use tonic::transport::{Channel, Endpoint};
use tonic::{Request, Response, Status};

use super::envelope::{Dispatcher, Envelope, FailureKind, Reply, ServiceFailure};
use super::local::EventBus;
use crate::grpc::proto::{
    self, Envelope as ProtoEnvelope, message_bus_client::MessageBusClient,
    message_bus_server::MessageBus, reply::Outcome,
};

const CONNECT_TIMEOUT: Duration = Duration::from_secs(5);

/// Client side: forwards envelopes to a bus hosted by another process.
#[derive(Clone)]
pub struct RemoteBus {
    client: MessageBusClient<Channel>,
    endpoint: String,
}

impl RemoteBus {
    /// Create a client for `endpoint` without connecting.
    ///
    /// The connection is made on the first call, so the remote unit may start
    /// after this one.
    pub fn connect_lazy(endpoint: &str) -> Result<Self, tonic::transport::Error> {
        let channel = Endpoint::from_shared(endpoint.to_string())?
            .connect_timeout(CONNECT_TIMEOUT)
            .connect_lazy();

        tracing::info!(endpoint = %endpoint, "Remote bus client configured");

        Ok(Self {
            client: MessageBusClient::new(channel),
            endpoint: endpoint.to_string(),
        })
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }
}

#[async_trait]
impl Dispatcher for RemoteBus {
    async fn send(&self, envelope: Envelope) -> Reply {
        let body = serde_json::to_string(&envelope.body)
            .map_err(|e| ServiceFailure::internal(format!("Failed to encode body: {}", e)))?;

        let request = ProtoEnvelope {
            address: envelope.address,
            action: envelope.action,
            body,
        };

        let mut client = self.client.clone();
        let reply = client
            .send(Request::new(request))
            .await
            .map_err(|status| {
                tracing::warn!(
                    endpoint = %self.endpoint,
                    code = ?status.code(),
                    "Remote bus call failed"
                );
                ServiceFailure::transport(format!(
                    "Remote bus at {} failed: {}",
                    self.endpoint,
                    status.message()
                ))
            })?
            .into_inner();

        reply_from_proto(reply)
    }
}

/// Server side: exposes a local [`EventBus`] to remote callers.
pub struct BusGrpcService {
    bus: EventBus,
}

impl BusGrpcService {
    pub fn new(bus: EventBus) -> Self {
        Self { bus }
    }
}

#[tonic::async_trait]
impl MessageBus for BusGrpcService {
    async fn send(&self, request: Request<ProtoEnvelope>) -> Result<Response<proto::Reply>, Status> {
        let envelope = request.into_inner();

        let reply = match serde_json::from_str::<Value>(&envelope.body) {
            Ok(body) => {
                Dispatcher::send(
                    &self.bus,
                    Envelope::new(envelope.address, envelope.action, body),
                )
                .await
            }
            Err(e) => Err(ServiceFailure::decode(format!(
                "Malformed envelope body: {}",
                e
            ))),
        };

        // Failures are part of the reply, not gRPC errors; a non-OK status
        // means the transport itself broke.
        Ok(Response::new(reply_to_proto(reply)))
    }
}

impl From<FailureKind> for proto::FailureKind {
    fn from(kind: FailureKind) -> Self {
        match kind {
            FailureKind::Decode => proto::FailureKind::Decode,
            FailureKind::Store => proto::FailureKind::Store,
            FailureKind::NoHandler => proto::FailureKind::NoHandler,
            FailureKind::UnknownAction => proto::FailureKind::UnknownAction,
            FailureKind::Transport => proto::FailureKind::Transport,
            FailureKind::Internal => proto::FailureKind::Internal,
        }
    }
}

fn kind_from_proto(kind: i32) -> FailureKind {
    match proto::FailureKind::try_from(kind) {
        Ok(proto::FailureKind::Decode) => FailureKind::Decode,
        Ok(proto::FailureKind::Store) => FailureKind::Store,
        Ok(proto::FailureKind::NoHandler) => FailureKind::NoHandler,
        Ok(proto::FailureKind::UnknownAction) => FailureKind::UnknownAction,
        Ok(proto::FailureKind::Transport) => FailureKind::Transport,
        Ok(proto::FailureKind::Internal) | Ok(proto::FailureKind::Unspecified) | Err(_) => {
            FailureKind::Internal
        }
    }
}

fn reply_to_proto(reply: Reply) -> proto::Reply {
    let outcome = match reply {
        Ok(body) => Outcome::Body(body.to_string()),
        Err(failure) => Outcome::Failure(proto::Failure {
            kind: proto::FailureKind::from(failure.kind) as i32,
            message: failure.message,
        }),
    };

    proto::Reply {
        outcome: Some(outcome),
    }
}

fn reply_from_proto(reply: proto::Reply) -> Reply {
    match reply.outcome {
        Some(Outcome::Body(body)) => serde_json::from_str(&body)
            .map_err(|e| ServiceFailure::decode(format!("Malformed reply body: {}", e))),
        Some(Outcome::Failure(failure)) => Err(ServiceFailure::new(
            kind_from_proto(failure.kind),
            failure.message,
        )),
        None => Err(ServiceFailure::internal("Empty reply from remote bus")),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bus::Consumer;
    use crate::grpc::BusServer;
    use serde_json::json;

    struct Upper;

    #[async_trait]
    impl Consumer for Upper {
        async fn handle(&self, action: &str, body: Value) -> Reply {
            match action {
                "upper" => Ok(json!(body.as_str().unwrap_or_default().to_uppercase())),
                "missing" => Ok(Value::Null),
                _ => Err(ServiceFailure::store("write rejected")),
            }
        }
    }

    async fn remote_pair() -> (BusServer, RemoteBus) {
        let bus = EventBus::new();
        let _handle = bus.register("upper", Upper);
        let server = BusServer::start(0, bus).await.unwrap();
        let client = RemoteBus::connect_lazy(&format!("http://127.0.0.1:{}", server.port())).unwrap();
        (server, client)
    }

    #[test]
    fn test_reply_conversion_keeps_failure_kind() {
        let proto = reply_to_proto(Err(ServiceFailure::no_handler("catalog-service")));
        let reply = reply_from_proto(proto).unwrap_err();
        assert_eq!(reply.kind, FailureKind::NoHandler);
    }

    #[test]
    fn test_unknown_proto_kind_is_internal() {
        assert_eq!(kind_from_proto(42), FailureKind::Internal);
    }

    #[tokio::test]
    async fn test_remote_call_round_trips_payload() {
        let (server, client) = remote_pair().await;

        let reply = client
            .send(Envelope::new("upper", "upper", json!("forge")))
            .await
            .unwrap();
        assert_eq!(reply, json!("FORGE"));

        let reply = client
            .send(Envelope::new("upper", "missing", Value::Null))
            .await
            .unwrap();
        assert_eq!(reply, Value::Null);

        server.stop().await;
    }

    #[tokio::test]
    async fn test_remote_failure_keeps_kind() {
        let (server, client) = remote_pair().await;

        let failure = client
            .send(Envelope::new("upper", "write", Value::Null))
            .await
            .unwrap_err();
        assert_eq!(failure, ServiceFailure::store("write rejected"));

        let failure = client
            .send(Envelope::new("elsewhere", "upper", Value::Null))
            .await
            .unwrap_err();
        assert_eq!(failure.kind, FailureKind::NoHandler);

        server.stop().await;
    }

    #[tokio::test]
    async fn test_unreachable_endpoint_is_transport_failure() {
        let port = {
            let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
            listener.local_addr().unwrap().port()
        };
        let client = RemoteBus::connect_lazy(&format!("http://127.0.0.1:{}", port)).unwrap();

        let failure = client
            .send(Envelope::new("upper", "upper", json!("x")))
            .await
            .unwrap_err();

        assert_eq!(failure.kind, FailureKind::Transport);
    }
}
