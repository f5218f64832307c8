//! Data store
//!
//! Arena of fixed-capacity buffers handing out compact [`EntryRef`] handles
//! instead of addresses. Freed buffers are not reused until every reader
//! has moved past the generation in which they were freed.
//!
//! # Architecture
//!
//! ```text
//! DataStore
//!   ├─→ Type(0) u64     → active: 4, buffers: [0 hold, 4 active]
//!   ├─→ Type(1) String  → active: 2, buffers: [2 active]
//!   │
//!   ├─→ Buffer 0  [v v d v d v v v]   extent 8, dead 2
//!   ├─→ Buffer 3  pending reclaim @ gen 6
//!   │
//!   ├─→ HoldList: [(3, gen 6)]
//!   └─→ GenerationHandler: current 7, guards {6: 1}
//!
//! EntryRef (u32) = [ buffer id : 10 | offset : 22 ]
//! ```
//!
//! Buffer lifecycle: `Free -> Active -> Hold -> PendingReclaim -> Free`.

pub mod buffer;
pub mod buffer_type;
pub mod entry_ref;
pub mod generation;
pub mod hold_list;
pub mod store;

pub use buffer::BufferState;
pub use buffer_type::{BufferTypeConfig, TypeId};
pub use entry_ref::EntryRef;
pub use generation::{Generation, GenerationGuard, GenerationHandler};
pub use hold_list::GenerationHoldList;
pub use store::{CapacityStats, Compaction, DataStore};
