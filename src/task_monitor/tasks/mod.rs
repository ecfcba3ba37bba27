pub mod anchor_batches;
pub mod poll_confirmations;
pub mod seal_batches;
pub mod sync_peers;
