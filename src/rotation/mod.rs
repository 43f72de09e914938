//! Rotation core - keeps one fixed address pointed at freshly spawned workers
//!
//! On every reload the controller, for each worker slot:
//! - allocates a free ephemeral port
//! - retires the oldest worker (SIGTERM, grace period, SIGKILL)
//! - spawns the replacement on the new port
//! - moves the live pointer so new connections reach the replacement
//!
//! # Architecture
//!
//! ```text
//!  clients ──> RelayListener (host:port) ──snapshot──> LivePointer
//!                     │                                    ▲
//!                     └── relay ──> worker @ 127.0.0.1:5xxxx│ set
//!                                                          │
//!  reload ──> RotationController ──┬── AddrAllocator ──────┤
//!                                  ├── WorkerSupervisor    │
//!                                  └── WorkerSlots (FIFO) ─┘
//! ```

pub mod addr;
pub mod controller;
pub mod relay;
pub mod slots;
pub mod supervisor;

pub use addr::{AddrAllocator, Address};
pub use controller::{RotationController, RotationReport};
pub use relay::{LivePointer, LiveTarget, RelayListener};
pub use slots::WorkerSlots;
pub use supervisor::{RetireOutcome, Worker, WorkerEntry, WorkerSupervisor};
