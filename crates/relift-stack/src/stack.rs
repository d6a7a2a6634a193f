//! The stack reconstruction pass.

use tracing::{debug, trace};

use relift_decode::{AddressIndex, Config, DebugInfo, DebugVariable};
use relift_image::Address;
use relift_ir::{
    BinOp, CastOp, FunctionId, InstId, InstKind, IrModifier, Module, SlotId, Ty, Value,
};

use crate::rda::ReachingDefinitions;
use crate::symbolic::{SymbolicTree, Val2Val};

/// A deferred access rewrite: `inst`'s operand `from` becomes slot `to`.
#[derive(Clone, Copy, Debug)]
struct ReplaceItem {
    inst: InstId,
    from: Value,
    to: SlotId,
}

/// Rewrites frame-pointer-relative memory accesses into named stack slots.
///
/// The pass never fails: anything that does not fold to a constant frame
/// offset is left untouched, and running the pass a second time changes
/// nothing (rewritten accesses no longer reference the stack pointer).
pub struct StackAnalysis;

impl StackAnalysis {
    /// Run on every function. Returns whether any access was rewritten.
    pub fn run_on_module(
        module: &mut Module,
        config: &Config,
        debug: Option<&DebugInfo>,
        index: &AddressIndex,
    ) -> bool {
        let rda = ReachingDefinitions::run_on_module(module, config);
        let mut changed = false;
        for f in module.functions().collect::<Vec<_>>() {
            changed |= Self::run_on_function(module, config, debug, index, &rda, f);
        }
        changed
    }

    fn run_on_function(
        module: &mut Module,
        config: &Config,
        debug: Option<&DebugInfo>,
        index: &AddressIndex,
        rda: &ReachingDefinitions,
        function: FunctionId,
    ) -> bool {
        debug!(name = %module.function(function).name, "stack pass");

        let insts: Vec<InstId> = module
            .function(function)
            .blocks()
            .iter()
            .flat_map(|&b| module.block(b).insts().iter().copied())
            .collect();

        let mut val2val = Val2Val::default();
        let mut items: Vec<ReplaceItem> = Vec::new();

        // Pass 1: stored values. A store whose value folds to a stack
        // address feeds val2val so later loads can observe it.
        for &i in &insts {
            if let InstKind::Store { value, ty, .. } = module.inst(i).kind.clone() {
                if !module.inst(i).is_lifted() {
                    continue;
                }
                Self::handle_instruction(
                    module, config, debug, index, rda, function, i, value, &ty, &mut items,
                    &mut val2val,
                );
            }
        }

        // Pass 2: pointer operands of non-boolean loads and stores.
        for &i in &insts {
            match module.inst(i).kind.clone() {
                InstKind::Load { addr, ty } => {
                    if ty.is_bool() || matches!(addr, Value::Reg(_)) {
                        continue;
                    }
                    Self::handle_instruction(
                        module, config, debug, index, rda, function, i, addr, &ty, &mut items,
                        &mut val2val,
                    );
                }
                InstKind::Store { addr, ty, .. } => {
                    if !module.inst(i).is_lifted() {
                        continue;
                    }
                    if ty.is_bool() || matches!(addr, Value::Reg(_)) {
                        continue;
                    }
                    Self::handle_instruction(
                        module, config, debug, index, rda, function, i, addr, &ty, &mut items,
                        &mut val2val,
                    );
                }
                _ => {}
            }
        }

        let changed = !items.is_empty();
        Self::apply(module, function, &items);
        changed
    }

    /// Evaluate one operand symbolically; on a constant fold, queue the
    /// rewrite to a stack slot. Returns whether a rewrite was queued.
    #[allow(clippy::too_many_arguments)]
    fn handle_instruction(
        module: &mut Module,
        config: &Config,
        debug: Option<&DebugInfo>,
        index: &AddressIndex,
        rda: &ReachingDefinitions,
        function: FunctionId,
        inst: InstId,
        operand: Value,
        access_ty: &Ty,
        items: &mut Vec<ReplaceItem>,
        val2val: &mut Val2Val,
    ) -> bool {
        let mut root = SymbolicTree::build(module, rda, operand);

        let has_sp = root
            .post_order()
            .iter()
            .any(|n| config.is_stack_pointer(n.value));

        // Debug variables may match the unsimplified shape (reg + const).
        let mut debug_var = find_debug_stack_variable(module, debug, index, function, &root);

        let used_val2val = root.simplify(module, config, val2val);
        if !has_sp && !used_val2val {
            trace!("no stack pointer reference, skipped");
            return false;
        }

        if debug_var.is_none() {
            debug_var = find_debug_stack_variable(module, debug, index, function, &root);
        }

        let Value::Int(offset) = root.value else {
            return false;
        };

        // A store whose value operand folded: record it so later loads at
        // the same frame offset observe the constant.
        if let InstKind::Store { value, addr, .. } = module.inst(inst).kind.clone() {
            if value == operand {
                let ptr_offset = fold_pointer(module, config, rda, addr, val2val);
                val2val.insert(inst, offset, ptr_offset);
            }
        }

        let (name, ty, from_debug) = match debug_var {
            Some(var) => (var.name.clone(), var.ty.clone(), true),
            None => (synth_name(offset), access_ty.clone(), false),
        };
        let slot = IrModifier::new(module).stack_slot(function, offset, ty, &name, from_debug);
        trace!(offset, slot = %module.slot(slot).name, "folded stack access");

        items.push(ReplaceItem {
            inst,
            from: operand,
            to: slot,
        });
        true
    }

    /// Apply the queued rewrites.
    fn apply(module: &mut Module, function: FunctionId, items: &[ReplaceItem]) {
        for ri in items {
            let slot_ty = module.slot(ri.to).ty.clone();
            match module.inst(ri.inst).kind.clone() {
                InstKind::Store { value, addr, ty } if addr == ri.from => {
                    if slot_ty.is_aggregate() {
                        // Keep the store; re-point it through a bitcast of
                        // the slot.
                        let cast = insert_cast_before(
                            module,
                            ri.inst,
                            CastOp::Bitcast,
                            Value::Slot(ri.to),
                            Ty::Ptr,
                        );
                        if let InstKind::Store { addr, .. } = &mut module.inst_mut(ri.inst).kind {
                            *addr = Value::Inst(cast);
                        }
                    } else {
                        let stored = convert(module, ri.inst, value, &ty, &slot_ty);
                        module.inst_mut(ri.inst).kind = InstKind::Store {
                            value: stored,
                            addr: Value::Slot(ri.to),
                            ty: slot_ty,
                        };
                    }
                }
                InstKind::Load { addr, ty } if addr == ri.from => {
                    if slot_ty.is_aggregate() {
                        let cast = insert_cast_before(
                            module,
                            ri.inst,
                            CastOp::Bitcast,
                            Value::Slot(ri.to),
                            Ty::Ptr,
                        );
                        if let InstKind::Load { addr, .. } = &mut module.inst_mut(ri.inst).kind {
                            *addr = Value::Inst(cast);
                        }
                    } else if slot_ty == ty {
                        module.inst_mut(ri.inst).kind = InstKind::Load {
                            addr: Value::Slot(ri.to),
                            ty,
                        };
                    } else {
                        // Load the slot's type and convert back to the
                        // access type for existing users.
                        module.inst_mut(ri.inst).kind = InstKind::Load {
                            addr: Value::Slot(ri.to),
                            ty: slot_ty.clone(),
                        };
                        let (bb, at) = module.position_of(ri.inst);
                        let cast = module.insert_inst(
                            bb,
                            at + 1,
                            InstKind::Cast {
                                op: cast_op(&slot_ty, &ty),
                                value: Value::Inst(ri.inst),
                                ty: ty.clone(),
                            },
                            Address::UNDEFINED,
                        );
                        module.replace_uses(function, Value::Inst(ri.inst), Value::Inst(cast), &[cast]);
                    }
                }
                _ => {
                    // The folded operand was not a pointer position (e.g. a
                    // stored stack address): substitute the slot's address.
                    let cast = insert_cast_before(
                        module,
                        ri.inst,
                        CastOp::Bitcast,
                        Value::Slot(ri.to),
                        Ty::Ptr,
                    );
                    let from = ri.from;
                    module.inst_mut(ri.inst).kind.for_each_value_mut(|v| {
                        if *v == from {
                            *v = Value::Inst(cast);
                        }
                    });
                }
            }
        }
    }
}

/// Fold a pointer operand to a frame offset, if it folds at all.
fn fold_pointer(
    module: &Module,
    config: &Config,
    rda: &ReachingDefinitions,
    ptr: Value,
    val2val: &Val2Val,
) -> Option<i64> {
    let mut tree = SymbolicTree::build(module, rda, ptr);
    tree.simplify(module, config, val2val);
    tree.value.as_int()
}

/// Debug variable whose declared stack offset matches the tree exactly.
fn find_debug_stack_variable<'d>(
    module: &Module,
    debug: Option<&'d DebugInfo>,
    index: &AddressIndex,
    function: FunctionId,
    root: &SymbolicTree,
) -> Option<&'d DebugVariable> {
    let debug = debug?;
    let debug_fn = debug.function_at(index.function_address(function))?;

    let base = match root.value {
        Value::Int(c) => Some(c),
        _ => {
            // First `reg + const` shape in level order.
            let mut base = None;
            for n in root.level_order() {
                let is_add = matches!(
                    n.value,
                    Value::Inst(id)
                        if matches!(module.inst(id).kind, InstKind::Binary { op: BinOp::Add, .. })
                );
                if is_add && n.ops.len() == 2 {
                    if let Value::Int(c) = n.ops[1].value {
                        if is_register_read(module, &n.ops[0]) {
                            base = Some(c);
                        }
                    }
                    break;
                }
            }
            base
        }
    }?;

    debug_fn
        .locals
        .iter()
        .find(|var| var.stack_offset() == Some(base))
}

fn is_register_read(module: &Module, node: &SymbolicTree) -> bool {
    match node.value {
        Value::Reg(_) => true,
        Value::Inst(id) => matches!(module.inst(id).kind, InstKind::ReadReg(_)),
        _ => false,
    }
}

fn synth_name(offset: i64) -> String {
    if offset < 0 {
        format!("local_-0x{:x}", offset.unsigned_abs())
    } else {
        format!("local_0x{offset:x}")
    }
}

fn insert_cast_before(
    module: &mut Module,
    inst: InstId,
    op: CastOp,
    value: Value,
    ty: Ty,
) -> InstId {
    let (bb, at) = module.position_of(inst);
    module.insert_inst(bb, at, InstKind::Cast { op, value, ty }, Address::UNDEFINED)
}

/// Convert `value` from `from` to `to`, inserting a cast when widths differ.
fn convert(module: &mut Module, before: InstId, value: Value, from: &Ty, to: &Ty) -> Value {
    if from == to {
        return value;
    }
    let cast = insert_cast_before(module, before, cast_op(from, to), value, to.clone());
    Value::Inst(cast)
}

fn cast_op(from: &Ty, to: &Ty) -> CastOp {
    match (from.bit_width(), to.bit_width()) {
        (Some(f), Some(t)) if t < f => CastOp::Trunc,
        (Some(f), Some(t)) if t > f => CastOp::ZExt,
        _ => CastOp::Bitcast,
    }
}
