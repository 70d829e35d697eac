//! Pure data structures shared across the recon knowledge graph workspace:
//! node/edge kinds, typed property bags, and natural-key derivation.
//! No I/O, no SQL — see `reconkg-graph` for the storage layer that uses these.

pub mod edge;
pub mod error;
pub mod node;
pub mod props;

pub use edge::{Edge, EdgeKind};
pub use error::ValidationError;
pub use node::{Node, NodeKind};
pub use props::NodeProps;
