//! # beacon-core
//!
//! Core types and routing for the Beacon signaling relay.
//!
//! This crate provides the building blocks:
//!
//! - **Resolver** - Map a client's target reference to a canonical address
//! - **Presence** - Liveness timestamps and last-known endpoints
//! - **Locality** - Same-network hint for forwarded messages
//! - **Registry** - Identity to open-session fan-out
//! - **Router** - Per-session state machine
//! - **Directory** - Privacy-masked listing of online peers
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────┐     ┌─────────────┐     ┌─────────────┐
//! │   Session   │────▶│   Router    │────▶│  Registry   │
//! └─────────────┘     └─────────────┘     └─────────────┘
//!                       │         │
//!                       ▼         ▼
//!               ┌──────────┐ ┌──────────┐    ┌───────────┐
//!               │ Resolver │ │ Presence │◀───│ Directory │
//!               └──────────┘ └──────────┘    └───────────┘
//! ```

pub mod clock;
pub mod directory;
pub mod identity;
pub mod locality;
pub mod presence;
pub mod registry;
pub mod resolver;
pub mod router;
pub mod store;

pub use clock::{Clock, ManualClock, Millis, SystemClock};
pub use directory::{PeerDirectory, PeerView};
pub use identity::{Endpoint, Identity, NewIdentity, SurrogateKey};
pub use locality::{annotate, same_network};
pub use presence::{LivenessPolicy, PolicyError, PresenceStore};
pub use registry::{ConnectionRegistry, DeliveryReceiver, RegistryStats, SessionHandle, SessionId};
pub use resolver::{IdentityResolver, Resolution};
pub use router::{DropReason, Outcome, RouterConfig, Session, SessionState, SignalingRouter};
pub use store::{IdentityStore, MemoryStore, SqliteStore, StoreError};
