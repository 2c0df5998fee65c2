//! Internal wire messages of the passthrough dispatch path
//!
//! Every request crossing into the server thread is first encoded to bytes,
//! mirroring what a real transport would put on a socket. The encoding is an
//! internal detail of the passthrough; entity message payloads inside it
//! stay opaque.

use serde::{Deserialize, Serialize};

use crate::invocation::builder::{ClientInstanceId, InvocationRequest};
use crate::invocation::error::TransportResult;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub(crate) enum PassthroughMessage {
    Invoke {
        entity_type: String,
        entity_name: String,
        entity_version: u64,
        client_instance: ClientInstanceId,
        payload: Vec<u8>,
        replicate: bool,
    },
    Exists {
        entity_type: String,
        entity_name: String,
        entity_version: u64,
    },
    Create {
        entity_type: String,
        entity_name: String,
        entity_version: u64,
        configuration: Vec<u8>,
    },
    Destroy {
        entity_type: String,
        entity_name: String,
    },
    Fetch {
        entity_type: String,
        entity_name: String,
        entity_version: u64,
        client_identifier: String,
    },
    Release {
        entity_type: String,
        entity_name: String,
        client_identifier: String,
    },
}

impl PassthroughMessage {
    pub(crate) fn invoke(request: &InvocationRequest) -> Self {
        PassthroughMessage::Invoke {
            entity_type: request.entity_type().to_string(),
            entity_name: request.entity_name().to_string(),
            entity_version: request.entity_version(),
            client_instance: request.client_instance(),
            payload: request.payload().to_vec(),
            replicate: request.replicate(),
        }
    }

    pub(crate) fn encode(&self) -> Result<Vec<u8>, serde_json::Error> {
        serde_json::to_vec(self)
    }

    pub(crate) fn decode(bytes: &[u8]) -> TransportResult<Self> {
        Ok(serde_json::from_slice(bytes)?)
    }
}
