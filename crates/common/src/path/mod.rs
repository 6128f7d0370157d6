// Resource id normalization.

pub mod normalize;

pub use normalize::{normalize_resource_id, ResourceIdError};
