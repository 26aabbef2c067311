//! Import side: resources, ownership, lifecycle and supervision
//!
//! ```text
//! ┌──────────────────┐  schedule   ┌──────────────────┐  try_claim  ┌──────────────────┐
//! │ ImporterFactory  │────────────▶│ ImportSupervisor │────────────▶│ ResourceRegistry │
//! └──────────────────┘             └────────┬─────────┘             └──────────────────┘
//!                                           │ spawn
//!                                           ▼
//!                          Importer::accept(ImportContext)
//!                              record ─▶ Formatter ─▶ RowWriter
//! ```

pub mod commit;
pub mod lifecycle;
pub mod registry;
pub mod resource;
pub mod supervisor;

pub use commit::CommitTracker;
pub use lifecycle::{ImporterLifecycle, ImporterPhase, StopSignal};
pub use registry::{ClaimInfo, ResourceClaim, ResourceRegistry, WorkerId};
pub use resource::{parse_property, require_property, ResourceDescriptor, ResourceId};
pub use supervisor::{ImportOptions, ImportSupervisor, ImporterHandle};
