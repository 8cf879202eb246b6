//! # dropsim - Drop-Style Physics Sessions
//!
//! dropsim manages short-lived physics sessions on top of a host application
//! that owns the actual solvers. A session drops the selected objects onto an
//! automatically built collider, lets the host simulate, and then either keeps
//! the result or puts everything back exactly as it was.
//!
//! ## Core Concepts
//!
//! - **Handle**: A generation-checked reference to a host entity that may die at any time
//! - **StateStore**: The partitioned registry of every handle a session tracks
//! - **SessionOrchestrator**: Start / Apply / Reset / Bake and the auxiliary commands
//! - **SceneHost**: The boundary every host call goes through
//!
//! ## Usage
//!
//! ```rust,ignore
//! use dropsim::{InMemoryScene, Mode, SessionContext, SessionOrchestrator};
//!
//! let scene = InMemoryScene::new();
//! let ground = scene.add_mesh("Ground", [0.0; 3])?;
//! let rock = scene.add_mesh("Rock", [0.0, 0.0, 4.0])?;
//! scene.select(rock, true)?;
//!
//! let mut ctx = SessionContext::default();
//! let orchestrator = SessionOrchestrator::new(&scene);
//! orchestrator.connect(&ctx)?;
//!
//! let outcome = orchestrator.start(&mut ctx, Mode::Rigid);
//! assert!(outcome.is_finished());
//! orchestrator.apply(&mut ctx);
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

// Core types
pub mod config;
pub mod error;
pub mod handle;
pub mod physics;

// Host boundary
pub mod host;
pub mod notify;
pub mod validator;

// Session state and components
pub mod proxy;
pub mod session;
pub mod shake;
pub mod store;
pub mod world;

// Re-export primary types at crate root for convenience
pub use config::{OptimizationSettings, RetryPolicy, SessionSettings, ShakeSettings, WorldSettings};
pub use error::{DropError, DropResult, ErrorKind, ValidationError};
pub use handle::{Handle, HandleKind};
pub use host::{HostError, InMemoryScene, SceneHost};
pub use notify::{EventQueue, EventSink};
pub use physics::{ClothPreset, ClothSettings, CollisionSettings, ForceFieldSettings, RigidBodyProps};
pub use session::{CommandOutcome, Mode, OutcomeStatus, SessionContext, SessionId, SessionOrchestrator, SessionPhase};
pub use store::{Partition, StateStore, SweepReport};
pub use world::{WorldSettingsManager, WorldSnapshot};
