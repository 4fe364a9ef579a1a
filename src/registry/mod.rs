//! Session registry
//!
//! Authoritative map of live session id to owning connection. A session is
//! present iff its owner is still connected and has not ended it.
//!
//! The registry itself does no I/O and no locking. The lifecycle service
//! owns it together with the membership tracker under one lock, so that
//! every mutation and the snapshot broadcast that follows it happen
//! atomically with respect to other connections:
//!
//! ```text
//!        start-session / end-session / disconnect
//!                          │
//!                          ▼
//!                 SignalingService (Mutex)
//!        ┌─────────────────┴──────────────────┐
//!        │ registry.register() / unregister() │
//!        │ hub.broadcast(registry.snapshot()) │
//!        └────────────────────────────────────┘
//! ```

pub mod entry;
pub mod error;
pub mod store;

pub use entry::SessionEntry;
pub use error::RegistryError;
pub use store::SessionRegistry;
