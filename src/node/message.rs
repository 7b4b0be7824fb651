use bincode::{Decode, Encode};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::core::transaction::Transaction;

/// Reserved, answers basic node information
pub const COMMAND_GET_INFO: u8 = 0;

/// The body carries a freshly broadcast transaction
pub const COMMAND_NEW_TRANSACTION: u8 = 1;

/// Reserved. Block propagation goes through the stored-block path, not
/// through fan-out messages.
pub const COMMAND_NEW_BLOCK: u8 = 2;

#[derive(Error, Debug)]
pub enum MessageError {
    #[error("Failed to encode message: {0}")]
    Encode(String),

    #[error("Failed to decode message: {0}")]
    Decode(String),
}

/// A fan-out message: one command byte and an opaque body in the canonical
/// encoding
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Encode, Decode)]
pub struct BroadcastMessage {
    pub command: u8,
    pub data: Vec<u8>,
}

impl BroadcastMessage {
    pub fn new_transaction(tx: &Transaction) -> Result<BroadcastMessage, MessageError> {
        let data = bincode::encode_to_vec(tx, bincode::config::standard())
            .map_err(|e| MessageError::Encode(e.to_string()))?;

        Ok(BroadcastMessage {
            command: COMMAND_NEW_TRANSACTION,
            data,
        })
    }

    pub fn encode(&self) -> Result<Vec<u8>, MessageError> {
        bincode::encode_to_vec(self, bincode::config::standard())
            .map_err(|e| MessageError::Encode(e.to_string()))
    }

    pub fn decode(raw: &[u8]) -> Result<BroadcastMessage, MessageError> {
        let (message, _) = bincode::decode_from_slice(raw, bincode::config::standard())
            .map_err(|e| MessageError::Decode(e.to_string()))?;

        Ok(message)
    }

    /// Decode the body as a transaction
    pub fn decode_transaction(&self) -> Result<Transaction, MessageError> {
        let (tx, _) = bincode::decode_from_slice(&self.data, bincode::config::standard())
            .map_err(|e| MessageError::Decode(e.to_string()))?;

        Ok(tx)
    }
}
