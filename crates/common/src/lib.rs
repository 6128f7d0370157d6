// tessera-common: shared types for the Tessera lease protocol

pub mod editor;
pub mod lease;
pub mod path;
pub mod protocol;
