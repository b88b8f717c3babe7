//! Trellis operator: ControlPlane orchestration and the cross-cluster worker

#![deny(missing_docs)]

pub mod component;
pub mod components;
pub mod config;
pub mod controller;
pub mod controller_runner;
pub mod registry;
pub mod worker;
