//! Concurrent secret tree construction
//!
//! Architecture:
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                        TreeBuilder                          │
//! │  probe root ─► seed queue ─► spawn pool ─► drain N results  │
//! │                                   │        ─► prune / sort  │
//! └───────────────────────────────────┼─────────────────────────┘
//!                                     │
//!        ┌────────────────────────────┼────────────────────────┐
//!        ▼                            ▼                        ▼
//!  ┌────────────┐              ┌────────────┐           ┌────────────┐
//!  │  Worker 0  │◄────────────►│ WorkQueue  │◄─────────►│  Worker 2  │
//!  │ GET LIST   │  pop / push  │ (awake cnt │ pop/push  │ GET LIST   │
//!  │ MOUNTS VER │              │  + closed) │           │ MOUNTS VER │
//!  └─────┬──────┘              └────────────┘           └─────┬──────┘
//!        │                                                    │
//!        └─────────────────────► Backend ◄────────────────────┘
//! ```
//!
//! Each work order carries the only `&mut` to the node it expands, so
//! workers grow disjoint parts of the tree without any per-node locking.

mod builder;
mod classify;
mod draw;
mod node;
mod queue;
mod worker;

pub use builder::{construct_tree, default_workers, TreeBuilder, MAX_WORKERS};
pub use classify::{classify, Operations, TreeOptions};
pub use node::{NodeType, TreeNode};
pub use queue::WorkQueue;
pub use worker::{CrawlProgress, CrawlStats};
