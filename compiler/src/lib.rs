//! MIL Compiler Backend
//!
//! The back half of a compiler toolkit for a monadic intermediate
//! language: takes MIL blocks, closure definitions, and initialization
//! statements produced by the (external) front end, builds one
//! control-flow graph per entry point, lowers inter-block value flow to
//! minimal SSA form (direct substitution for single-predecessor blocks,
//! explicit phi merges elsewhere), and emits register-oriented target
//! functions. A graphviz exporter is included for visualizing the
//! constructed graphs.

pub mod internal;
pub mod logging;

pub mod cfg;
pub mod mil;
pub mod target;
