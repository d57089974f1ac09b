//! Session management for concurrent clients.
//!
//! Every client conversation is keyed by an opaque session ID supplied by the
//! transport. The first reference to an ID creates its [`Session`]; sessions
//! stay alive until the idle reaper evicts them.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────┐
//! │                    SessionManager                        │
//! │  sessions: RwLock<HashMap<SessionId, Arc<SessionSlot>>>  │
//! └──────────────────────────────────────────────────────────┘
//!          │                    │                    │
//!          ▼                    ▼                    ▼
//! ┌────────────────┐   ┌────────────────┐   ┌────────────────┐
//! │ Session "s1"   │   │ Session "s2"   │   │ Session "sN"   │
//! │ (async mutex)  │   │ (async mutex)  │   │ (async mutex)  │
//! │ ├ resolver     │   │ ├ resolver     │   │ ├ resolver     │
//! │ ├ analyzer st. │   │ ├ analyzer st. │   │ ├ analyzer st. │
//! │ └ pipeline?    │   │ └ pipeline?    │   │ └ pipeline?    │
//! └────────────────┘   └────────────────┘   └────────────────┘
//! ```

mod manager;
mod types;

pub use manager::{SessionGuard, SessionManager, SessionSlot, SessionStats};
pub use types::{Session, SessionInfo};
