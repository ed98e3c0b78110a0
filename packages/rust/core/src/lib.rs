//! Core pipeline orchestration and domain logic for RepoTutor.
//!
//! This crate ties together crawling, text generation, chapter ordering,
//! diagram rendering and tutorial assembly into the end-to-end
//! [`generate_tutorial`] workflow.

pub mod abstractions;
pub mod assembler;
pub mod chapters;
pub mod context;
pub mod diagrams;
pub mod parse;
pub mod pipeline;
pub mod relationships;
pub mod sequencer;
mod tools;

#[cfg(test)]
mod testutil;

pub use assembler::{DocumentExporter, MdToPdf};
pub use diagrams::{DiagramRenderer, MermaidCli};
pub use pipeline::{
    ProgressReporter, Services, SilentProgress, TutorialConfig, TutorialResult, generate_tutorial,
};
pub use sequencer::order_chapters;
