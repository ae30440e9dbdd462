//! `sorter-jobs` -- lifecycle control for the perception services.
//!
//! The [`JobController`] polls the job table for pending commands and
//! drives the [`ProcessSupervisor`], which owns every launched
//! process handle. Model artifacts referenced by start commands are
//! resolved through the [`ModelArtifactCache`].

pub mod artifact;
pub mod controller;
pub mod process;

pub use artifact::ModelArtifactCache;
pub use controller::{JobController, ServiceCommands};
pub use process::{ProcessError, ProcessSupervisor, StartOutcome, StopOutcome};
