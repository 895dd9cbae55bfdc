//! [Arena memory allocated](https://en.wikipedia.org/wiki/Region-based_memory_management)
//! tree structures for fast, directional traversal of the joint tree.

pub mod depth;
pub mod directed;
mod utils;

pub use depth::DepthFirstArenaTree;
pub use directed::{ArenaIndex, ArenaNode, DirectedArenaTree};
