//! The Reconciler (spec §4.7): the long-running component that turns
//! committed Store mutations into pushed WireGuard/iptables/DNS artifacts.
//! Subscribes to the Change Bus, debounces per network, recomputes only
//! what a batch of events could have affected, and enqueues changed
//! artifacts onto the Agent Hub.

pub mod alert;
pub mod engine;
pub mod scope;

pub use alert::{AlertKind, AlertSink, LoggingAlertSink};
pub use engine::{Reconciler, ReconcilerConfig, ReconcilerHandle};
pub use scope::CompileScope;
