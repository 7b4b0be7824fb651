use log::warn;

use crate::{
    core::{block::Block, blockchain::Blockchain},
    node::message::{BroadcastMessage, COMMAND_GET_INFO, COMMAND_NEW_BLOCK, COMMAND_NEW_TRANSACTION},
};

/// Route an inbound fan-out message. Messages arriving before the initial
/// sync completes are dropped silently.
pub fn on_broadcast(blockchain: &Blockchain, message: BroadcastMessage) {
    if !blockchain.synced() {
        return;
    }

    match message.command {
        COMMAND_NEW_TRANSACTION => match message.decode_transaction() {
            Ok(tx) => {
                blockchain.accept_transaction(tx);
            }
            Err(e) => warn!("Dropping malformed transaction broadcast: {e}"),
        },
        // Blocks travel through stored keys and the sync poll
        COMMAND_NEW_BLOCK => {}
        COMMAND_GET_INFO => {}
        other => warn!("Dropping broadcast with unknown command {other}"),
    }
}

/// Decide whether a block a peer wants to store with us is acceptable. A
/// direct successor gets the full validation; a historic block only its
/// stamp and proof-of-work checks; anything past the tip is refused.
pub fn on_store(blockchain: &Blockchain, raw: &[u8]) -> bool {
    let block: Block = match bincode::decode_from_slice(raw, bincode::config::standard()) {
        Ok((block, _)) => block,
        Err(e) => {
            warn!("Dropping malformed stored block: {e}");
            return false;
        }
    };

    let tip = blockchain.tip();
    if block.header.height == tip.height + 1 {
        match blockchain.check_new(&block) {
            Ok(()) => true,
            Err(e) => {
                warn!("Refusing stored block {}: {e}", block.header.hash.dump_hex());
                false
            }
        }
    } else if block.header.height <= tip.height {
        block.verify_old().is_ok()
    } else {
        false
    }
}
