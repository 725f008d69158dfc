//! Entity types.

mod handle;
mod id;

pub use handle::{AttributeAccessor, Entity, Object, Ref};
pub use id::{EntityId, ENTITY_ID_LEN};
