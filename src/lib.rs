//! Core library for the duratest durability rig controller.
//!
//! The library brings a power supply, a pump and a temperature controller up
//! over their serial lines, samples them on a fixed interval while checking
//! every reading against the configured safety bounds, and resets all of them
//! on the way out, however the run ends. The `duratest` binary is a thin
//! command line front end over [`experiment::Experiment`].

pub mod adapters;
pub mod config;
pub mod data;
pub mod error;
pub mod events;
pub mod experiment;
pub mod instrument;
