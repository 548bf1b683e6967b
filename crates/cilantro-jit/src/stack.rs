//! The abstract evaluation stack.
//!
//! Each entry pairs the full tracked type (`None` for the null type) with
//! the MIR register holding the value; value-type entries hold the address
//! of their stack-allocated backing buffer. Snapshots are recorded at every
//! branch target and handler entry and merged when control paths meet.

use crate::error::{JitError, jit_bail, jit_check};
use cilantro_mir::{Label, Reg};
use cilantro_types::Universe;
use cilantro_utils::TypeId;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct StackEntry {
    pub ty: Option<TypeId>,
    pub reg: Reg,
}

#[derive(Debug, Clone, Default)]
pub struct EvalStack {
    pub entries: Vec<StackEntry>,
}

impl EvalStack {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn snapshot(&self) -> EvalStack {
        self.clone()
    }
}

/// The recorded state at a branch target: its placement label and the stack
/// shape every incoming edge must agree with.
#[derive(Debug, Clone)]
pub struct Snapshot {
    pub label: Label,
    pub stack: EvalStack,
}

/// Merge the current stack into a snapshot.
///
/// Both stacks must have the same depth, and each pair of types must have a
/// common verifier-assignable supertype. Forward targets may widen the
/// snapshot to the merged type; for backward targets the merge must be a
/// no-op, because code consuming the snapshot types is already emitted.
pub fn merge(
    universe: &Universe,
    current: &EvalStack,
    snapshot: &mut EvalStack,
    allow_change: bool,
) -> Result<(), JitError> {
    jit_check!(
        current.entries.len() == snapshot.entries.len(),
        "stack depth mismatch at merge point: {} vs {}",
        current.entries.len(),
        snapshot.entries.len()
    );

    for (cur, snap) in current.entries.iter().zip(snapshot.entries.iter_mut()) {
        let t = cur.ty;
        let s = snap.ty;

        let merged = if universe.verifier_assignable_to(t, s) {
            s
        } else if universe.verifier_assignable_to(s, t) {
            t
        } else {
            jit_bail!("unmergeable stack entry types at branch target");
        };

        if allow_change {
            snap.ty = merged;
        } else {
            jit_check!(
                snap.ty == merged,
                "backward branch changes an already-fixed stack type"
            );
        }
    }
    Ok(())
}
