//! Symbolic expression trees over IR values.

use rustc_hash::{FxHashMap, FxHashSet};

use relift_decode::Config;
use relift_ir::{BinOp, InstId, InstKind, Module, Value};

use crate::rda::ReachingDefinitions;

/// Expansion bound. Reaching definitions can form cycles through loops; the
/// visited set breaks them and the depth cap bounds degenerate chains.
const MAX_DEPTH: usize = 32;

/// Constants folded out of earlier stores.
///
/// Keyed both by the store instruction and by the frame offset its pointer
/// folded to; the latter lets a later load at the same offset observe the
/// stored constant.
#[derive(Debug, Default)]
pub struct Val2Val {
    by_store: FxHashMap<InstId, i64>,
    by_offset: FxHashMap<i64, i64>,
}

impl Val2Val {
    pub fn insert(&mut self, store: InstId, folded: i64, offset: Option<i64>) {
        self.by_store.insert(store, folded);
        if let Some(k) = offset {
            self.by_offset.insert(k, folded);
        }
    }

    pub fn store_value(&self, store: InstId) -> Option<i64> {
        self.by_store.get(&store).copied()
    }

    pub fn at_offset(&self, offset: i64) -> Option<i64> {
        self.by_offset.get(&offset).copied()
    }

    pub fn is_empty(&self) -> bool {
        self.by_store.is_empty()
    }
}

/// A finite expression tree over IR values, built by following def chains.
///
/// Register reads expand through their reaching `WriteReg` definitions;
/// binary operators, casts, and loads expand through their operands.
/// Registers with no definition (entry values), memory, and calls terminate
/// a branch.
#[derive(Clone, Debug)]
pub struct SymbolicTree {
    pub value: Value,
    pub ops: Vec<SymbolicTree>,
}

impl SymbolicTree {
    pub fn build(module: &Module, rda: &ReachingDefinitions, value: Value) -> Self {
        let mut visited = FxHashSet::default();
        Self::expand(module, rda, value, &mut visited, 0)
    }

    fn expand(
        module: &Module,
        rda: &ReachingDefinitions,
        value: Value,
        visited: &mut FxHashSet<InstId>,
        depth: usize,
    ) -> Self {
        let leaf = |value| Self {
            value,
            ops: Vec::new(),
        };

        if depth >= MAX_DEPTH {
            return leaf(value);
        }
        let Value::Inst(id) = value else {
            return leaf(value);
        };
        if !visited.insert(id) {
            return leaf(value);
        }

        let tree = match &module.inst(id).kind {
            InstKind::ReadReg(reg) => {
                let defs = rda.defs(id);
                if defs.is_empty() {
                    // Entry value: the register itself terminates the branch.
                    leaf(Value::Reg(*reg))
                } else {
                    let ops = defs
                        .iter()
                        .map(|&d| match &module.inst(d).kind {
                            InstKind::WriteReg { value, .. } => {
                                Self::expand(module, rda, *value, visited, depth + 1)
                            }
                            // A clobbering call terminates the branch.
                            _ => leaf(Value::Inst(d)),
                        })
                        .collect();
                    Self { value, ops }
                }
            }
            InstKind::Binary { lhs, rhs, .. } => Self {
                value,
                ops: vec![
                    Self::expand(module, rda, *lhs, visited, depth + 1),
                    Self::expand(module, rda, *rhs, visited, depth + 1),
                ],
            },
            InstKind::Cast { value: inner, .. } => Self {
                value,
                ops: vec![Self::expand(module, rda, *inner, visited, depth + 1)],
            },
            InstKind::Load { addr, .. } => Self {
                value,
                ops: vec![Self::expand(module, rda, *addr, visited, depth + 1)],
            },
            _ => leaf(value),
        };

        visited.remove(&id);
        tree
    }

    /// Nodes in post order (children before parents).
    pub fn post_order(&self) -> Vec<&SymbolicTree> {
        let mut out = Vec::new();
        fn walk<'t>(node: &'t SymbolicTree, out: &mut Vec<&'t SymbolicTree>) {
            for op in &node.ops {
                walk(op, out);
            }
            out.push(node);
        }
        walk(self, &mut out);
        out
    }

    /// Nodes in level order (root first, then each depth).
    pub fn level_order(&self) -> Vec<&SymbolicTree> {
        let mut out = Vec::new();
        let mut queue = std::collections::VecDeque::from([self]);
        while let Some(node) = queue.pop_front() {
            out.push(node);
            queue.extend(node.ops.iter());
        }
        out
    }

    /// Fold constants bottom-up over `+ - & | << >>`, collapse the stack
    /// pointer's entry value to frame offset zero, and fold loads through
    /// the map of already-folded stores. Returns whether `val2val` was
    /// consulted.
    pub fn simplify(&mut self, module: &Module, config: &Config, val2val: &Val2Val) -> bool {
        let mut used = false;
        self.simplify_node(module, config, val2val, &mut used);
        used
    }

    fn simplify_node(&mut self, module: &Module, config: &Config, val2val: &Val2Val, used: &mut bool) {
        for op in &mut self.ops {
            op.simplify_node(module, config, val2val, used);
        }

        // The stack pointer's entry value anchors the frame at offset zero.
        if config.is_stack_pointer(self.value) {
            self.value = Value::Int(0);
            return;
        }

        let Value::Inst(id) = self.value else {
            return;
        };
        match &module.inst(id).kind {
            InstKind::Binary { op, .. } => {
                if let [lhs, rhs] = self.ops.as_slice() {
                    if let (Value::Int(l), Value::Int(r)) = (lhs.value, rhs.value) {
                        if let Some(v) = fold_binop(*op, l, r) {
                            self.value = Value::Int(v);
                            self.ops.clear();
                        }
                    }
                }
            }
            InstKind::Cast { .. } => {
                if let [inner] = self.ops.as_slice() {
                    if let Value::Int(v) = inner.value {
                        self.value = Value::Int(v);
                        self.ops.clear();
                    }
                }
            }
            InstKind::ReadReg(_) => {
                // Collapses when every reaching definition folded to the
                // same constant.
                if let Some(Value::Int(first)) = self.ops.first().map(|o| o.value) {
                    if self.ops.iter().all(|o| o.value == Value::Int(first)) {
                        self.value = Value::Int(first);
                        self.ops.clear();
                    }
                }
            }
            InstKind::Load { .. } => {
                if let [ptr] = self.ops.as_slice() {
                    if let Value::Int(offset) = ptr.value {
                        if let Some(v) = val2val.at_offset(offset) {
                            *used = true;
                            self.value = Value::Int(v);
                            self.ops.clear();
                        }
                    }
                }
            }
            _ => {}
        }
    }
}

fn fold_binop(op: BinOp, l: i64, r: i64) -> Option<i64> {
    match op {
        BinOp::Add => Some(l.wrapping_add(r)),
        BinOp::Sub => Some(l.wrapping_sub(r)),
        BinOp::And => Some(l & r),
        BinOp::Or => Some(l | r),
        BinOp::Shl => (0..64).contains(&r).then(|| ((l as u64) << r) as i64),
        BinOp::Shr => (0..64).contains(&r).then(|| ((l as u64) >> r) as i64),
        BinOp::Mul | BinOp::Xor => None,
    }
}
