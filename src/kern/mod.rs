//! Kern subsystem - Core kernel primitives
//!
//! Based on Mach4 kern/ directory
//! Contains the queue, sleep/wakeup and counter primitives the VM layer
//! builds on.

pub mod counters;
pub mod queue;
pub mod sched_prim;

pub use counters::{CounterSnapshot, MachCounter, VmPageCounters};
pub use queue::{QueueChain, QueueHead, QueueIndex};
pub use sched_prim::{event_from_addr, WaitEvent, WaitQueue, WaitTicket};
