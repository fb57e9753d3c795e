// Replicated text engine: RGA sequence, state vectors, binary updates.

pub mod document;
pub mod ids;
pub mod state_vector;
pub mod update;
pub mod wire;

pub use document::{Document, EditError, MergeError};
pub use ids::{ElementId, OpId, PeerId};
pub use state_vector::StateVector;
pub use update::{Op, Update, MAX_LAMPORT};
pub use wire::CodecError;
