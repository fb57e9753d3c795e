// tandem-common: replicated text engine, presence, and wire protocol shared by the relay and clients

pub mod awareness;
pub mod crdt;
pub mod protocol;
pub mod sync;
pub mod types;
