//! Session and role resolution for the sync engine.
//!
//! This crate provides:
//! - `Role` and the versioned profile decode (`decode_profile`)
//! - An explicit session lifecycle state machine (rust-fsm)
//! - `SessionResolver`: loads identity, roles and authorized remote ids and
//!   exposes the "ready" gate the pipelines wait on
//! - Seams for the identity provider, profile store and role preference store

mod error;
mod preferences;
mod profile;
mod provider;
mod resolver;
mod session_fsm;

pub use error::{SessionError, SessionResult};
pub use preferences::{MemoryPreferences, RolePreferenceStore};
pub use profile::{decode_profile, DecodedProfile, Role};
pub use provider::{IdentityProvider, MemoryProfileStore, ProfileStore, StaticIdentity};
pub use resolver::{SessionResolver, SessionState};
pub use session_fsm::{SessionMachine, SessionMachineInput, SessionMachineState, SessionPhase};
