// tessera-daemon library entry point.

pub mod clock;
pub mod config;
pub mod editor;
pub mod lease;
pub mod ledger;
pub mod rpc;
pub mod runtime;
pub mod security;
pub mod startup;
