//! Minimal x86 lifter for driving the decoder in tests.
//!
//! Covers just enough of the 32-bit instruction set to exercise control-flow
//! discovery and the stack pass: push/pop, register and stack moves, nop,
//! ret, call, jmp, and jz.

use relift_image::Address;
use relift_ir::{
    BinOp, CalleeSlot, Cursor, InstId, InstKind, Module, RegId, TargetSlot, Ty, Value,
};

use crate::abi::{Abi, MachineInsn};
use crate::config::{Config, Mode, RegisterInfo};
use crate::lift::{InstructionLifter, LiftError, Translated};

pub const EAX: RegId = RegId(0);
pub const ECX: RegId = RegId(1);
pub const EDX: RegId = RegId(2);
pub const EBX: RegId = RegId(3);
pub const ESP: RegId = RegId(4);
pub const EBP: RegId = RegId(5);
pub const ESI: RegId = RegId(6);
pub const EDI: RegId = RegId(7);
pub const ZF: RegId = RegId(8);

const GPR_NAMES: [&str; 8] = ["eax", "ecx", "edx", "ebx", "esp", "ebp", "esi", "edi"];

/// Decoder configuration for the x86 subset.
pub fn x86_config() -> Config {
    let mut registers: Vec<RegisterInfo> = GPR_NAMES
        .iter()
        .enumerate()
        .map(|(i, name)| RegisterInfo::new(RegId(i as u16), name, 32))
        .collect();
    registers.push(RegisterInfo::new(ZF, "zf", 1));
    Config::new(registers, ESP)
}

/// ABI for the x86 subset; recognizes `0x90` as NOP.
pub fn x86_abi(config: &Config) -> Abi {
    Abi::from_config(config).with_nops(vec![vec![0x90]])
}

/// The test lifter. Stateless; every instruction lifts independently.
#[derive(Default, Debug)]
pub struct X86SubsetLifter;

impl X86SubsetLifter {
    pub fn new() -> Self {
        Self
    }
}

impl InstructionLifter for X86SubsetLifter {
    fn translate_one(
        &mut self,
        bytes: &[u8],
        addr: Address,
        _mode: Mode,
        module: &mut Module,
        cursor: &mut Cursor,
    ) -> Result<Translated, LiftError> {
        let mut emit = Emitter {
            module,
            cursor,
            addr,
            first: None,
        };

        let Some(&op) = bytes.first() else {
            return Err(LiftError::Empty { address: addr });
        };

        let (size, control) = match op {
            // push r32
            0x50..=0x57 => {
                let r = RegId((op - 0x50) as u16);
                let sp = emit.inst(InstKind::ReadReg(ESP));
                let nsp = emit.inst(InstKind::Binary {
                    op: BinOp::Sub,
                    lhs: Value::Inst(sp),
                    rhs: Value::Int(4),
                });
                emit.inst(InstKind::WriteReg {
                    reg: ESP,
                    value: Value::Inst(nsp),
                });
                let v = emit.inst(InstKind::ReadReg(r));
                emit.inst(InstKind::Store {
                    value: Value::Inst(v),
                    addr: Value::Inst(nsp),
                    ty: Ty::I32,
                });
                (1, None)
            }
            // pop r32
            0x58..=0x5f => {
                let r = RegId((op - 0x58) as u16);
                let sp = emit.inst(InstKind::ReadReg(ESP));
                let v = emit.inst(InstKind::Load {
                    addr: Value::Inst(sp),
                    ty: Ty::I32,
                });
                emit.inst(InstKind::WriteReg {
                    reg: r,
                    value: Value::Inst(v),
                });
                let nsp = emit.inst(InstKind::Binary {
                    op: BinOp::Add,
                    lhs: Value::Inst(sp),
                    rhs: Value::Int(4),
                });
                emit.inst(InstKind::WriteReg {
                    reg: ESP,
                    value: Value::Inst(nsp),
                });
                (1, None)
            }
            // mov r/m32, r32 (register form only)
            0x89 => {
                let modrm = need(bytes, 1, addr)?;
                if modrm >> 6 != 0b11 {
                    return Err(LiftError::UnknownOpcode { opcode: op, address: addr });
                }
                let src = RegId(((modrm >> 3) & 7) as u16);
                let dst = RegId((modrm & 7) as u16);
                let v = emit.inst(InstKind::ReadReg(src));
                emit.inst(InstKind::WriteReg {
                    reg: dst,
                    value: Value::Inst(v),
                });
                (2, None)
            }
            // mov r32, [esp + disp8]
            0x8b => {
                let (r, disp, size) = esp_disp8_operand(bytes, addr, op)?;
                let sp = emit.inst(InstKind::ReadReg(ESP));
                let a = emit.inst(InstKind::Binary {
                    op: BinOp::Add,
                    lhs: Value::Inst(sp),
                    rhs: Value::Int(disp),
                });
                let v = emit.inst(InstKind::Load {
                    addr: Value::Inst(a),
                    ty: Ty::I32,
                });
                emit.inst(InstKind::WriteReg {
                    reg: r,
                    value: Value::Inst(v),
                });
                (size, None)
            }
            // mov [esp + disp8], imm32
            0xc7 => {
                let (_, disp, head) = esp_disp8_operand(bytes, addr, op)?;
                let imm = imm32(bytes, head, addr)?;
                let sp = emit.inst(InstKind::ReadReg(ESP));
                let a = emit.inst(InstKind::Binary {
                    op: BinOp::Add,
                    lhs: Value::Inst(sp),
                    rhs: Value::Int(disp),
                });
                emit.inst(InstKind::Store {
                    value: Value::Int(imm),
                    addr: Value::Inst(a),
                    ty: Ty::I32,
                });
                (head + 4, None)
            }
            // mov r32, imm32
            0xb8..=0xbf => {
                let r = RegId((op - 0xb8) as u16);
                let imm = imm32(bytes, 1, addr)?;
                emit.inst(InstKind::WriteReg {
                    reg: r,
                    value: Value::Int(imm),
                });
                (5, None)
            }
            0x90 => {
                emit.inst(InstKind::Nop);
                (1, None)
            }
            0xc3 => {
                let ret = emit.inst(InstKind::Ret {
                    target: Value::Undef,
                });
                (1, Some(ret))
            }
            // call rel32
            0xe8 => {
                let rel = imm32(bytes, 1, addr)?;
                let dest = addr.value().wrapping_add(5).wrapping_add(rel as u64);
                let call = emit.inst(InstKind::Call {
                    target: Value::Int(dest as i64),
                    callee: CalleeSlot::Unresolved,
                });
                (5, Some(call))
            }
            // jmp rel32
            0xe9 => {
                let rel = imm32(bytes, 1, addr)?;
                let dest = addr.value().wrapping_add(5).wrapping_add(rel as u64);
                let br = emit.inst(InstKind::Br {
                    target: Value::Int(dest as i64),
                    dest: TargetSlot::Unresolved,
                });
                (5, Some(br))
            }
            // jmp rel8
            0xeb => {
                let rel = need(bytes, 1, addr)? as i8;
                let dest = addr.value().wrapping_add(2).wrapping_add(rel as u64);
                let br = emit.inst(InstKind::Br {
                    target: Value::Int(dest as i64),
                    dest: TargetSlot::Unresolved,
                });
                (2, Some(br))
            }
            // jz rel8
            0x74 => {
                let rel = need(bytes, 1, addr)? as i8;
                let dest = addr.value().wrapping_add(2).wrapping_add(rel as u64);
                let zf = emit.inst(InstKind::ReadReg(ZF));
                let cb = emit.inst(InstKind::CondBr {
                    cond: Value::Inst(zf),
                    target: Value::Int(dest as i64),
                    taken: TargetSlot::Unresolved,
                    fall: TargetSlot::Unresolved,
                });
                (2, Some(cb))
            }
            // jz rel32
            0x0f => {
                if need(bytes, 1, addr)? != 0x84 {
                    return Err(LiftError::UnknownOpcode { opcode: op, address: addr });
                }
                let rel = imm32(bytes, 2, addr)?;
                let dest = addr.value().wrapping_add(6).wrapping_add(rel as u64);
                let zf = emit.inst(InstKind::ReadReg(ZF));
                let cb = emit.inst(InstKind::CondBr {
                    cond: Value::Inst(zf),
                    target: Value::Int(dest as i64),
                    taken: TargetSlot::Unresolved,
                    fall: TargetSlot::Unresolved,
                });
                (6, Some(cb))
            }
            _ => {
                return Err(LiftError::UnknownOpcode { opcode: op, address: addr });
            }
        };

        if bytes.len() < size {
            return Err(LiftError::Truncated { address: addr });
        }

        let first = emit.first.expect("every lifted instruction emits IR");
        Ok(Translated {
            first,
            control,
            size,
            insn: MachineInsn {
                address: addr,
                size,
                bytes: bytes[..size].to_vec(),
            },
        })
    }
}

struct Emitter<'a> {
    module: &'a mut Module,
    cursor: &'a mut Cursor,
    addr: Address,
    first: Option<InstId>,
}

impl Emitter<'_> {
    fn inst(&mut self, kind: InstKind) -> InstId {
        let id = self.cursor.emit(self.module, kind, self.addr);
        self.first.get_or_insert(id);
        id
    }
}

fn need(bytes: &[u8], at: usize, addr: Address) -> Result<u8, LiftError> {
    bytes
        .get(at)
        .copied()
        .ok_or(LiftError::Truncated { address: addr })
}

fn imm32(bytes: &[u8], at: usize, addr: Address) -> Result<i64, LiftError> {
    if bytes.len() < at + 4 {
        return Err(LiftError::Truncated { address: addr });
    }
    let v = i32::from_le_bytes([bytes[at], bytes[at + 1], bytes[at + 2], bytes[at + 3]]);
    Ok(v as i64)
}

/// Decode a `[esp + disp8]` memory operand: modrm `x4`, SIB `24`, disp8.
/// Returns (reg field, displacement, bytes consumed so far).
fn esp_disp8_operand(bytes: &[u8], addr: Address, op: u8) -> Result<(RegId, i64, usize), LiftError> {
    let modrm = need(bytes, 1, addr)?;
    let sib = need(bytes, 2, addr)?;
    if modrm >> 6 != 0b01 || modrm & 7 != 0b100 || sib != 0x24 {
        return Err(LiftError::UnknownOpcode { opcode: op, address: addr });
    }
    let reg = RegId(((modrm >> 3) & 7) as u16);
    let disp = need(bytes, 3, addr)? as i8;
    Ok((reg, disp as i64, 4))
}
