pub mod bloom;
pub mod consumer;
pub mod poller;
pub mod rpc_client;

pub use bloom::Bloom;
pub use consumer::BlockConsumer;
pub use poller::ChainPoller;
pub use rpc_client::{Block, Log, NodeClient, Receipt, RpcClient, Transaction};
