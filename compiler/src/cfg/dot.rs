//! Graphviz export of constructed CFGs
//!
//! Purely diagnostic: renders every node and successor edge of a list of
//! CFGs as a single `digraph`, with fill colors distinguishing the entry
//! nodes and the three label kinds. Never required for correctness and
//! always safe to omit.

use log::error;
use std::fmt::Write as _;
use std::path::Path;

use super::{Cfg, LabelKind, NodeRef};
use crate::mil::Program;

/// Dot display attributes for an entry node.
const ENTRY_ATTRS: &str = "style=filled, fillcolor=white";

/// Dot display attributes per label kind.
fn label_attrs(kind: LabelKind) -> &'static str {
    match kind {
        LabelKind::BlockBody { .. } => "style=filled, fillcolor=lightblue",
        LabelKind::TailOnly { .. } => "style=filled, fillcolor=palegreen",
        LabelKind::PureJump { .. } => "style=filled, fillcolor=thistle1",
    }
}

/// Render a list of CFGs as one dot digraph.
pub fn cfgs_to_dot(program: &Program, cfgs: &[Cfg]) -> String {
    let mut out = String::from("digraph CFGs {\n");
    for (index, cfg) in cfgs.iter().enumerate() {
        write_cfg(program, cfg, index, &mut out);
    }
    out.push_str("}\n");
    out
}

/// Node identifiers are prefixed with the CFG's position in the list so
/// that per-CFG numbering stays unique within the combined digraph (the
/// entry node is 0, labels follow at their arena index plus one).
fn dot_id(index: usize, node: NodeRef) -> String {
    match node {
        NodeRef::Entry => format!("c{}n0", index),
        NodeRef::Node(id) => format!("c{}n{}", index, id.0 + 1),
    }
}

fn write_cfg(program: &Program, cfg: &Cfg, index: usize, out: &mut String) {
    // The entry node and its edges
    writeln!(
        out,
        "{}[label=\"{}\",{}];",
        dot_id(index, NodeRef::Entry),
        cfg.func_name(program),
        ENTRY_ATTRS
    )
    .unwrap();
    for &succ in cfg.entry_succs() {
        writeln!(
            out,
            "{} -> {};",
            dot_id(index, NodeRef::Entry),
            dot_id(index, NodeRef::Node(succ))
        )
        .unwrap();
    }

    // One declaration per label, one edge per successor
    for (id, label) in cfg.labels() {
        writeln!(
            out,
            "{}[label=\"{}\",{}];",
            dot_id(index, NodeRef::Node(id)),
            cfg.node_name(program, NodeRef::Node(id)),
            label_attrs(label.kind)
        )
        .unwrap();
        for &succ in label.succs(id) {
            writeln!(
                out,
                "{} -> {};",
                dot_id(index, NodeRef::Node(id)),
                dot_id(index, NodeRef::Node(succ))
            )
            .unwrap();
        }
    }
}

/// Write the dot rendering of `cfgs` to a file. An I/O failure is
/// reported on the error log and otherwise ignored; graph export never
/// aborts a compilation.
pub fn write_dot_file(path: &Path, program: &Program, cfgs: &[Cfg]) {
    if let Err(e) = std::fs::write(path, cfgs_to_dot(program, cfgs)) {
        error!(
            "attempt to create dot output in \"{}\" failed: {}",
            path.display(),
            e
        );
    }
}
