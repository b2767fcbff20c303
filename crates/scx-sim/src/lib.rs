//! SCX Simulator
//!
//! Seeded random sessions against a [`scx_core::Workbench`] over a scripted
//! backend, with invariant checks after every operation.

#![warn(unreachable_pub)]
#![allow(missing_docs)]

pub mod simulator;

pub use simulator::{
    run_simulator, InvariantCheck, OperationDistribution, OperationStats, ScriptKind,
    SimulatedOperation, SimulatorConfig, SimulatorReport, Violation,
};
