// JSON-RPC server: lease method dispatch over a Unix socket.

pub mod methods;
pub mod unix;
