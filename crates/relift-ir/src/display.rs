//! Human-readable module dump.

use std::fmt;

use crate::inst::{CalleeSlot, InstKind, TargetSlot};
use crate::module::Module;
use crate::ty::Ty;
use crate::value::Value;

impl fmt::Display for Ty {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Ty::Int(bits) => write!(f, "i{bits}"),
            Ty::Ptr => write!(f, "ptr"),
            Ty::Array { elem, len } => write!(f, "[{len} x {elem}]"),
            Ty::Struct(fields) => {
                write!(f, "{{ ")?;
                for (i, t) in fields.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{t}")?;
                }
                write!(f, " }}")
            }
        }
    }
}

struct DisplayValue<'m>(&'m Module, Value);

impl fmt::Display for DisplayValue<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.1 {
            Value::Int(v) => write!(f, "{v}"),
            Value::Reg(r) => write!(f, "reg{}", r.0),
            Value::Inst(i) => write!(f, "%{}", i.index()),
            Value::Slot(s) => write!(f, "@{}", self.0.slot(s).name),
            Value::Undef => write!(f, "undef"),
        }
    }
}

impl fmt::Display for Module {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let v = |val| DisplayValue(self, val);
        for func_id in self.functions() {
            let func = self.function(func_id);
            writeln!(f, "define {} {{", func.name)?;
            for slot_id in self.slots_of(func_id) {
                let slot = self.slot(slot_id);
                writeln!(f, "  slot @{} : {} ; offset {}", slot.name, slot.ty, slot.offset)?;
            }
            for &bb in func.blocks() {
                let block = self.block(bb);
                writeln!(f, "{}:", block.name)?;
                for &i in block.insts() {
                    let inst = self.inst(i);
                    write!(f, "  ")?;
                    match &inst.kind {
                        InstKind::Nop => write!(f, "nop")?,
                        InstKind::ReadReg(r) => write!(f, "%{} = read reg{}", i.index(), r.0)?,
                        InstKind::WriteReg { reg, value } => {
                            write!(f, "write reg{}, {}", reg.0, v(*value))?
                        }
                        InstKind::Load { addr, ty } => {
                            write!(f, "%{} = load {}, {}", i.index(), ty, v(*addr))?
                        }
                        InstKind::Store { value, addr, ty } => {
                            write!(f, "store {} {}, {}", ty, v(*value), v(*addr))?
                        }
                        InstKind::Binary { op, lhs, rhs } => write!(
                            f,
                            "%{} = {:?} {}, {}",
                            i.index(),
                            op,
                            v(*lhs),
                            v(*rhs)
                        )?,
                        InstKind::Cast { op, value, ty } => write!(
                            f,
                            "%{} = {:?} {} to {}",
                            i.index(),
                            op,
                            v(*value),
                            ty
                        )?,
                        InstKind::Call { target, callee } => {
                            write!(f, "call {}", v(*target))?;
                            match callee {
                                CalleeSlot::Function(callee) => {
                                    write!(f, " -> {}", self.function(*callee).name)?
                                }
                                CalleeSlot::Indirect => write!(f, " -> indirect")?,
                                CalleeSlot::Unresolved => write!(f, " -> ?")?,
                            }
                        }
                        InstKind::Ret { target } => write!(f, "ret {}", v(*target))?,
                        InstKind::Br { target, dest } => {
                            write!(f, "br {}", v(*target))?;
                            match dest {
                                TargetSlot::Block(b) => {
                                    write!(f, " -> {}", self.block(*b).name)?
                                }
                                TargetSlot::Function(t) => {
                                    write!(f, " -> {}", self.function(*t).name)?
                                }
                                TargetSlot::Indirect => write!(f, " -> indirect")?,
                                TargetSlot::Unresolved => write!(f, " -> ?")?,
                            }
                        }
                        InstKind::CondBr {
                            cond,
                            target,
                            taken,
                            fall,
                        } => {
                            write!(f, "condbr {}, {}", v(*cond), v(*target))?;
                            for (label, slot) in [("true", taken), ("false", fall)] {
                                match slot {
                                    TargetSlot::Block(b) => {
                                        write!(f, " {}:{}", label, self.block(*b).name)?
                                    }
                                    TargetSlot::Function(t) => {
                                        write!(f, " {}:{}", label, self.function(*t).name)?
                                    }
                                    TargetSlot::Indirect => write!(f, " {label}:indirect")?,
                                    TargetSlot::Unresolved => write!(f, " {label}:?")?,
                                }
                            }
                        }
                    }
                    if inst.address.is_defined() {
                        write!(f, " ; {}", inst.address)?;
                    }
                    writeln!(f)?;
                }
            }
            writeln!(f, "}}")?;
        }
        Ok(())
    }
}
