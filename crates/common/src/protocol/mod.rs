// Daemon socket protocol.

pub mod jsonrpc;
pub mod lease;
pub mod rpc_methods;
