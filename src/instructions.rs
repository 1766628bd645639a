// The 8051 instruction set, decoded into one `Instruction` per opcode
// and executed against a borrowed `CPU`/`Memory`/`Peripheral` triple.
// Every variant carries its operands pre-resolved (register numbers,
// direct/bit addresses, already-computed absolute jump targets) so
// `execute` never has to re-derive addressing-mode bits from a raw byte.

use crate::cpu::CPU;
use crate::fields::{self, AluOp, Operand, XSrc};
use crate::memory::Memory;
use crate::peripheral::Peripheral;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Instruction {
    Nop,

    // Arithmetic / logic on the accumulator.
    Alu { op: AluOp, src: Operand },
    AluDirect { op: AluOp, direct: u8, src: Operand },
    Inc(Operand),
    Dec(Operand),
    IncDptr,
    Mul,
    Div,
    Da,
    ClrA,
    CplA,
    RlA,
    RrA,
    RlcA,
    RrcA,
    SwapA,

    // Data transfer.
    Mov { dst: Operand, src: Operand },
    MovDptr(u16),
    MovBitToC(u8),
    MovCToBit(u8),
    MovcPc,
    MovcDptr,
    MovxLoad(XSrc),
    MovxStore(XSrc),
    Push(u8),
    Pop(u8),
    Xch(Operand),
    Xchd(u8),

    // Boolean / bit manipulation.
    ClrBit(u8),
    SetbBit(u8),
    CplBit(u8),
    ClrC,
    SetbC,
    CplC,
    AnlCBit(u8),
    AnlCNotBit(u8),
    OrlCBit(u8),
    OrlCNotBit(u8),

    // Control transfer.
    Ajmp(u16),
    Ljmp(u16),
    Sjmp(u16),
    JmpIndirect,
    Jz(u16),
    Jnz(u16),
    Jc(u16),
    Jnc(u16),
    Jb(u8, u16),
    Jnb(u8, u16),
    Jbc(u8, u16),
    Cjne { lhs: Operand, rhs: Operand, target: u16 },
    Djnz { operand: Operand, target: u16 },
    Acall(u16),
    Lcall(u16),
    Ret,
    Reti,

    Illegal(u8),
}

impl Instruction {
    /// Executes the instruction, returning the number of machine cycles
    /// it consumed. Flags are applied directly to PSW inside this
    /// function; callers never need to re-derive them.
    pub fn execute(&self, cpu: &mut CPU, memory: &mut Memory, peripheral: &mut Peripheral) -> u32 {
        match *self {
            Instruction::Nop => 1,

            Instruction::Alu { op, src } => {
                let a = memory.read_sfr(0xE0);
                let b = src.read(cpu, memory);
                let carry_in = cpu.carry(memory);
                let (result, flags) = fields::alu(op, a, b, carry_in);
                cpu.set_acc(memory, result);
                if matches!(op, AluOp::Add | AluOp::Addc | AluOp::Subb) {
                    flags.apply(memory);
                }
                alu_cycles(op, src)
            }
            Instruction::AluDirect { op, direct, src } => {
                let a = cpu.read_direct(memory, direct);
                let b = src.read(cpu, memory);
                let (result, _flags) = fields::alu(op, a, b, false);
                cpu.write_direct(memory, direct, result);
                matches!(src, Operand::Immediate(_)) as u32 + 1
            }
            Instruction::Inc(operand) => {
                let value = operand.read(cpu, memory);
                operand.write(cpu, memory, value.wrapping_add(1));
                1
            }
            Instruction::Dec(operand) => {
                let value = operand.read(cpu, memory);
                operand.write(cpu, memory, value.wrapping_sub(1));
                1
            }
            Instruction::IncDptr => {
                let dptr = cpu.dptr(memory).wrapping_add(1);
                cpu.set_dptr(memory, dptr);
                2
            }
            Instruction::Mul => {
                let a = memory.read_sfr(0xE0);
                let b = memory.read_sfr(0xF0);
                let (lo, hi, ov) = fields::mul(a, b);
                memory.write_sfr(0xE0, lo);
                memory.write_sfr(0xF0, hi);
                fields::Flags { cy: Some(false), ac: None, ov: Some(ov) }.apply(memory);
                cpu.update_parity(memory);
                4
            }
            Instruction::Div => {
                let a = memory.read_sfr(0xE0);
                let b = memory.read_sfr(0xF0);
                let (q, r, ov) = fields::div(a, b);
                memory.write_sfr(0xE0, q);
                memory.write_sfr(0xF0, r);
                fields::Flags { cy: Some(false), ac: None, ov: Some(ov) }.apply(memory);
                cpu.update_parity(memory);
                4
            }
            Instruction::Da => {
                let a = memory.read_sfr(0xE0);
                let ac = cpu.aux_carry(memory);
                let cy = cpu.carry(memory);
                let (result, new_cy) = fields::decimal_adjust(a, ac, cy);
                cpu.set_acc(memory, result);
                fields::Flags { cy: Some(new_cy), ac: None, ov: None }.apply(memory);
                1
            }
            Instruction::ClrA => {
                cpu.set_acc(memory, 0);
                1
            }
            Instruction::CplA => {
                let a = memory.read_sfr(0xE0);
                cpu.set_acc(memory, !a);
                1
            }
            Instruction::RlA => {
                let a = memory.read_sfr(0xE0);
                cpu.set_acc(memory, a.rotate_left(1));
                1
            }
            Instruction::RrA => {
                let a = memory.read_sfr(0xE0);
                cpu.set_acc(memory, a.rotate_right(1));
                1
            }
            Instruction::RlcA => {
                let a = memory.read_sfr(0xE0);
                let cy = cpu.carry(memory);
                let result = (a << 1) | (cy as u8);
                cpu.set_acc(memory, result);
                fields::Flags { cy: Some(a & 0x80 != 0), ac: None, ov: None }.apply(memory);
                1
            }
            Instruction::RrcA => {
                let a = memory.read_sfr(0xE0);
                let cy = cpu.carry(memory);
                let result = (a >> 1) | ((cy as u8) << 7);
                cpu.set_acc(memory, result);
                fields::Flags { cy: Some(a & 0x01 != 0), ac: None, ov: None }.apply(memory);
                1
            }
            Instruction::SwapA => {
                let a = memory.read_sfr(0xE0);
                cpu.set_acc(memory, a.rotate_left(4));
                1
            }

            Instruction::Mov { dst, src } => {
                let value = src.read(cpu, memory);
                dst.write(cpu, memory, value);
                mov_cycles(dst, src)
            }
            Instruction::MovDptr(value) => {
                cpu.set_dptr(memory, value);
                2
            }
            Instruction::MovBitToC(bit_addr) => {
                let value = memory.read_bit(bit_addr);
                cpu.set_carry(memory, value);
                1
            }
            Instruction::MovCToBit(bit_addr) => {
                let cy = cpu.carry(memory);
                memory.write_bit(bit_addr, cy);
                2
            }
            Instruction::MovcPc => {
                let a = memory.read_sfr(0xE0);
                let addr = cpu.pc.wrapping_add(a as u16);
                let value = memory.read_code(addr);
                cpu.set_acc(memory, value);
                2
            }
            Instruction::MovcDptr => {
                let a = memory.read_sfr(0xE0);
                let addr = cpu.dptr(memory).wrapping_add(a as u16);
                let value = memory.read_code(addr);
                cpu.set_acc(memory, value);
                2
            }
            Instruction::MovxLoad(src) => {
                let addr = src.address(cpu, memory);
                let value = memory.read_xdata(addr, peripheral);
                cpu.set_acc(memory, value);
                2
            }
            Instruction::MovxStore(dst) => {
                let addr = dst.address(cpu, memory);
                let value = memory.read_sfr(0xE0);
                memory.write_xdata(addr, value, peripheral);
                2
            }
            Instruction::Push(direct) => {
                let value = cpu.read_direct(memory, direct);
                cpu.push(memory, value);
                2
            }
            Instruction::Pop(direct) => {
                let value = cpu.pop(memory);
                cpu.write_direct(memory, direct, value);
                2
            }
            Instruction::Xch(operand) => {
                let a = memory.read_sfr(0xE0);
                let other = operand.read(cpu, memory);
                cpu.set_acc(memory, other);
                operand.write(cpu, memory, a);
                1
            }
            Instruction::Xchd(ri) => {
                let a = memory.read_sfr(0xE0);
                let addr = memory.read_idata(cpu.register_address(memory, ri));
                let m = memory.read_idata(addr);
                let new_a = (a & 0xF0) | (m & 0x0F);
                let new_m = (m & 0xF0) | (a & 0x0F);
                cpu.set_acc(memory, new_a);
                memory.write_idata(addr, new_m);
                1
            }

            Instruction::ClrBit(bit) => {
                memory.write_bit(bit, false);
                1
            }
            Instruction::SetbBit(bit) => {
                memory.write_bit(bit, true);
                1
            }
            Instruction::CplBit(bit) => {
                let value = memory.read_bit(bit);
                memory.write_bit(bit, !value);
                1
            }
            Instruction::ClrC => {
                cpu.set_carry(memory, false);
                1
            }
            Instruction::SetbC => {
                cpu.set_carry(memory, true);
                1
            }
            Instruction::CplC => {
                let cy = cpu.carry(memory);
                cpu.set_carry(memory, !cy);
                1
            }
            Instruction::AnlCBit(bit) => {
                let cy = cpu.carry(memory) && memory.read_bit(bit);
                cpu.set_carry(memory, cy);
                2
            }
            Instruction::AnlCNotBit(bit) => {
                let cy = cpu.carry(memory) && !memory.read_bit(bit);
                cpu.set_carry(memory, cy);
                2
            }
            Instruction::OrlCBit(bit) => {
                let cy = cpu.carry(memory) || memory.read_bit(bit);
                cpu.set_carry(memory, cy);
                2
            }
            Instruction::OrlCNotBit(bit) => {
                let cy = cpu.carry(memory) || !memory.read_bit(bit);
                cpu.set_carry(memory, cy);
                2
            }

            Instruction::Ajmp(target) | Instruction::Ljmp(target) | Instruction::Sjmp(target) => {
                cpu.pc = target;
                2
            }
            Instruction::JmpIndirect => {
                let a = memory.read_sfr(0xE0);
                cpu.pc = cpu.dptr(memory).wrapping_add(a as u16);
                2
            }
            Instruction::Jz(target) => branch_if(cpu, memory.read_sfr(0xE0) == 0, target),
            Instruction::Jnz(target) => branch_if(cpu, memory.read_sfr(0xE0) != 0, target),
            Instruction::Jc(target) => branch_if(cpu, cpu.carry(memory), target),
            Instruction::Jnc(target) => branch_if(cpu, !cpu.carry(memory), target),
            Instruction::Jb(bit, target) => branch_if(cpu, memory.read_bit(bit), target),
            Instruction::Jnb(bit, target) => branch_if(cpu, !memory.read_bit(bit), target),
            Instruction::Jbc(bit, target) => {
                let set = memory.read_bit(bit);
                if set {
                    memory.write_bit(bit, false);
                    cpu.pc = target;
                }
                2
            }
            Instruction::Cjne { lhs, rhs, target } => {
                let a = lhs.read(cpu, memory);
                let b = rhs.read(cpu, memory);
                if a != b {
                    cpu.pc = target;
                }
                cpu.set_carry(memory, a < b);
                2
            }
            Instruction::Djnz { operand, target } => {
                let value = operand.read(cpu, memory).wrapping_sub(1);
                operand.write(cpu, memory, value);
                if value != 0 {
                    cpu.pc = target;
                }
                2
            }
            Instruction::Acall(target) | Instruction::Lcall(target) => {
                cpu.push_pc(memory);
                cpu.pc = target;
                2
            }
            Instruction::Ret => {
                cpu.pc = cpu.pop_pc(memory);
                2
            }
            Instruction::Reti => {
                cpu.pc = cpu.pop_pc(memory);
                cpu.leave_isr();
                2
            }

            Instruction::Illegal(opcode) => {
                cpu.fault(format!("illegal opcode {:#04x}", opcode));
                1
            }
        }
    }

    pub fn mnemonic(&self) -> String {
        format!("{:?}", self)
    }
}

fn branch_if(cpu: &mut CPU, condition: bool, target: u16) -> u32 {
    if condition {
        cpu.pc = target;
    }
    2
}

fn alu_cycles(_op: AluOp, _src: Operand) -> u32 {
    1
}

fn mov_cycles(dst: Operand, src: Operand) -> u32 {
    // Only MOV direct,A and MOV A,direct take a single cycle; every other
    // MOV touching a direct address on the non-accumulator side takes two.
    let dst_direct_not_acc = matches!(dst, Operand::Direct(_)) && src != Operand::Acc;
    let src_direct_not_acc = matches!(src, Operand::Direct(_)) && dst != Operand::Acc;
    if dst_direct_not_acc || src_direct_not_acc {
        2
    } else {
        1
    }
}
