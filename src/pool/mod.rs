//! Admission-controlled worker processes for the document engine.
//!
//! The engine can run only one job per process, so parallelism comes from
//! sibling processes. Each job that goes remote gets its own worker, which
//! is launched, used once and torn down.
//!
//! # Architecture
//!
//! ```text
//!   caller ──► Dispatcher ──► PoolGate (slot) ──► PortBroker (2 ports)
//!                  │                                     │
//!                  │ max = 0                             ▼
//!                  ▼                              launch worker
//!            EngineHost (mutex)                          │
//!                                                        ▼
//!                                          await_listening (readiness)
//!                                                        │
//!         ┌────────────────────┐   JSON lines   ┌────────▼────────┐
//!         │  Parent process    │◄──────────────►│  Worker process │
//!         │  RemoteProxy       │   loopback TCP │  serve()        │
//!         │  lifeline listener │◄───────────────│  EngineHost     │
//!         └────────────────────┘                └─────────────────┘
//! ```
//!
//! # Features
//!
//! - **Bounded concurrency**: at most `max_process_count` workers per component
//! - **Deterministic teardown**: worker, ports and slot released on every path
//! - **Transparent errors**: job errors raised in a worker reach the caller unchanged
//! - **Orphan protection**: workers exit when the parent's lifeline closes

pub mod channel;
pub mod dispatch;
pub mod gate;
pub mod launch;
pub mod port;
pub mod protocol;
pub mod ready;
pub mod termination;
pub mod worker_main;

pub use dispatch::{DispatchState, DispatchStats, Dispatcher};
pub use gate::{PoolGate, PoolSlot};
pub use launch::{LaunchSpec, WorkerProcess, await_exit_barrier, launch};
pub use port::{PortBroker, PortLease, find_free_port};
pub use ready::await_listening;
pub use termination::TerminationReason;
pub use worker_main::run_worker_main;
