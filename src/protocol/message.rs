use serde::{Deserialize, Serialize};
use std::fmt;

use crate::bulk::BulkDescriptor;
use crate::core::packet::Packet;
use crate::error::Result;
use crate::protocol::status::{FaultCode, RpcStatus};

/// The four store operations, shared by client stubs and daemon handlers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Operation {
    Set,
    Get,
    Exists,
    Evict,
}

impl Operation {
    pub const ALL: [Operation; 4] = [
        Operation::Set,
        Operation::Get,
        Operation::Exists,
        Operation::Evict,
    ];

    pub fn name(self) -> &'static str {
        match self {
            Operation::Set => "set",
            Operation::Get => "get",
            Operation::Exists => "exists",
            Operation::Evict => "evict",
        }
    }
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// RPC envelope: operation, caller's descriptor, declared size and key.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RpcRequest {
    pub operation: Operation,
    pub bulk: Option<BulkDescriptor>,
    pub size: u64,
    pub key_id: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Message {
    Request(RpcRequest),
    Response {
        operation: Operation,
        key_id: String,
        status: RpcStatus,
    },
    /// Daemon asks the caller for bytes of one of its registered regions.
    BulkPull {
        descriptor: u64,
        offset: u64,
        length: u64,
    },
    BulkData(Vec<u8>),
    /// Daemon writes bytes into one of the caller's registered regions.
    BulkPush {
        descriptor: u64,
        offset: u64,
        data: Vec<u8>,
    },
    BulkAck,
    /// A bulk step or a whole frame was refused.
    Fault(FaultCode),
    Shutdown,
    ShutdownAck,
}

impl Message {
    pub fn to_packet(&self) -> Result<Packet> {
        Ok(Packet::new(bincode::serialize(self)?))
    }

    pub fn from_packet(packet: &Packet) -> Result<Self> {
        Ok(bincode::deserialize(&packet.payload)?)
    }

    /// Short name for logs.
    pub fn kind(&self) -> &'static str {
        match self {
            Message::Request(_) => "request",
            Message::Response { .. } => "response",
            Message::BulkPull { .. } => "bulk-pull",
            Message::BulkData(_) => "bulk-data",
            Message::BulkPush { .. } => "bulk-push",
            Message::BulkAck => "bulk-ack",
            Message::Fault(_) => "fault",
            Message::Shutdown => "shutdown",
            Message::ShutdownAck => "shutdown-ack",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bulk::AccessMode;

    #[test]
    #[allow(clippy::unwrap_used)]
    fn test_request_survives_packet_encoding() {
        let msg = Message::Request(RpcRequest {
            operation: Operation::Set,
            bulk: Some(BulkDescriptor {
                id: 3,
                size: 5,
                mode: AccessMode::ReadWrite,
            }),
            size: 5,
            key_id: "abc".to_string(),
        });
        let packet = msg.to_packet().unwrap();
        assert_eq!(Message::from_packet(&packet).unwrap(), msg);
    }

    #[test]
    fn test_garbage_payload_is_a_serialization_error() {
        let packet = Packet::new(vec![0xFF; 3]);
        assert!(matches!(
            Message::from_packet(&packet),
            Err(crate::error::DimError::Serialization(_))
        ));
    }

    #[test]
    fn test_operation_names() {
        let names: Vec<&str> = Operation::ALL.iter().map(|op| op.name()).collect();
        assert_eq!(names, ["set", "get", "exists", "evict"]);
    }
}
