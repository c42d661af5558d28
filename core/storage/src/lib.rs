//! Key-value persistence stores for Courier.
//!
//! The delivery engine keeps its whole durable state under a single key, so
//! the contract here is deliberately small: byte values addressed by string
//! keys. Backends are picked by name through [`StoreBackend`].
//!
//! # Design Principles
//! - Backend isolation: the engine never knows which store it talks to
//! - Async operations: all I/O operations are async
//! - Unified error semantics: every backend reports `Error::Persistence`

pub mod store;
pub mod backend;
pub mod memory;
pub mod local;

pub use store::KeyValueStore;
pub use backend::StoreBackend;
pub use memory::MemoryStore;
pub use local::FileStore;
