//! Dynamic DNS updates against the zone master.
//!
//! Each refresh batch becomes one RFC 2136 update transaction: for every
//! address either a replace (delete all RRsets at the owner, add the fresh
//! PTR and TXT) or a bare delete when the address has left the telemetry
//! view. The transport speaks TCP with the standard two-byte length prefix
//! and treats the zone master as the serialization point; no locking is
//! done on this side.

use std::net::SocketAddr;
use std::time::Duration;

use async_trait::async_trait;
use hickory_proto::op::{Message, MessageType, OpCode, Query, ResponseCode};
use hickory_proto::rr::rdata::{PTR, TXT};
use hickory_proto::rr::{DNSClass, Name, RData, Record, RecordType};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tracing::debug;

use crate::error::AgentError;

/// One owner-level operation inside an update transaction.
#[derive(Debug, Clone)]
pub enum UpdateOp {
    /// Replace whatever the owner holds with a fresh PTR and TXT pair.
    Replace {
        /// Owner name (`<reverse>.<zone>.`).
        owner: Name,
        /// PTR target.
        ptr: Name,
        /// TXT metadata payload.
        txt: String,
    },
    /// Delete all RRsets at the owner.
    Delete {
        /// Owner name (`<reverse>.<zone>.`).
        owner: Name,
    },
}

/// Build a single update transaction for the zone.
pub fn build_update(zone: &Name, ops: &[UpdateOp], ttl: u32) -> Result<Message, AgentError> {
    let mut message = Message::new();
    message.set_id(rand::random());
    message.set_message_type(MessageType::Query);
    message.set_op_code(OpCode::Update);
    message.set_recursion_desired(false);

    let mut zone_section = Query::new();
    zone_section.set_name(zone.clone());
    zone_section.set_query_type(RecordType::SOA);
    zone_section.set_query_class(DNSClass::IN);
    message.add_query(zone_section);

    for op in ops {
        match op {
            UpdateOp::Replace { owner, ptr, txt } => {
                let mut wipe = Record::update0(owner.clone(), 0, RecordType::ANY);
                wipe.set_dns_class(DNSClass::ANY);
                message.add_name_server(wipe);

                let mut ptr_record =
                    Record::from_rdata(owner.clone(), ttl, RData::PTR(PTR(ptr.clone())));
                ptr_record.set_dns_class(DNSClass::IN);
                message.add_name_server(ptr_record);

                let mut txt_record = Record::from_rdata(
                    owner.clone(),
                    ttl,
                    RData::TXT(TXT::new(vec![txt.clone()])),
                );
                txt_record.set_dns_class(DNSClass::IN);
                message.add_name_server(txt_record);
            }
            UpdateOp::Delete { owner } => {
                let mut wipe = Record::update0(owner.clone(), 0, RecordType::ANY);
                wipe.set_dns_class(DNSClass::ANY);
                message.add_name_server(wipe);
            }
        }
    }

    Ok(message)
}

/// Outcome of one update transaction that got a response.
#[derive(Debug, Clone, Copy)]
pub struct UpdateOutcome {
    /// Response code from the zone master.
    pub rcode: ResponseCode,
    /// Request size on the wire, length prefix excluded.
    pub request_bytes: usize,
    /// Response size on the wire, length prefix excluded.
    pub response_bytes: usize,
}

/// The seam to the zone master.
///
/// The engine only ever has one transaction outstanding; implementations do
/// not need to multiplex.
#[async_trait]
pub trait UpdateClient: Send + Sync {
    /// Send one update transaction and await its response.
    async fn send_update(&self, request: Message) -> Result<UpdateOutcome, AgentError>;
}

/// TCP transport for update transactions, one connection per transaction.
#[derive(Debug, Clone)]
pub struct TcpUpdateClient {
    target: SocketAddr,
    timeout: Duration,
}

impl TcpUpdateClient {
    /// Create a client for the given zone master.
    pub fn new(target: SocketAddr, timeout: Duration) -> Self {
        Self { target, timeout }
    }

    async fn exchange(&self, wire: &[u8]) -> Result<Vec<u8>, AgentError> {
        let mut stream = TcpStream::connect(self.target).await?;
        let mut framed = Vec::with_capacity(wire.len() + 2);
        framed.extend_from_slice(&(wire.len() as u16).to_be_bytes());
        framed.extend_from_slice(wire);
        stream.write_all(&framed).await?;

        let mut length = [0u8; 2];
        stream.read_exact(&mut length).await?;
        let mut response = vec![0u8; u16::from_be_bytes(length) as usize];
        stream.read_exact(&mut response).await?;
        Ok(response)
    }
}

#[async_trait]
impl UpdateClient for TcpUpdateClient {
    async fn send_update(&self, request: Message) -> Result<UpdateOutcome, AgentError> {
        let wire = request.to_vec()?;
        let request_bytes = wire.len();

        let response = tokio::time::timeout(self.timeout, self.exchange(&wire))
            .await
            .map_err(|_| {
                AgentError::UpdateTransport(format!(
                    "no response from {} within {:?}",
                    self.target, self.timeout
                ))
            })?
            .map_err(|e| AgentError::UpdateTransport(e.to_string()))?;

        let response_bytes = response.len();
        let parsed = Message::from_vec(&response)
            .map_err(|e| AgentError::UpdateTransport(format!("unparseable response: {e}")))?;

        debug!(
            id = parsed.id(),
            rcode = %parsed.response_code(),
            request_bytes,
            response_bytes,
            "update transaction answered"
        );

        Ok(UpdateOutcome {
            rcode: parsed.response_code(),
            request_bytes,
            response_bytes,
        })
    }
}
