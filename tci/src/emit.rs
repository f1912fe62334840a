//! Bytecode emitter: the producer side of the encoding.
//!
//! Front ends (and tests) build translation blocks with `gen_*` calls.
//! The emitter writes each instruction with its size byte, resolves
//! labels (back-patching forward references when the label is placed)
//! and records the `goto_tb` displacement fields the execution loop
//! later patches for chaining.
//!
//! Shapes are not checked here beyond what the encoding needs; the
//! `verify` pass checks a finished block.

use std::marker::PhantomData;

use tcg_core::{encode_tb_exit, tb::TB_EXIT_REQUESTED, Cond, Label, RelocKind, Type};

use crate::code_buffer::CodeBuffer;
use crate::host::{HostWord, NativeHost};
use crate::memory::MemOpIdx;
use crate::opcode::Opcode;
use crate::regs::TCG_CONST;

/// A register-or-constant source operand.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Src {
    Reg(u8),
    Const(u64),
}

impl From<u8> for Src {
    fn from(r: u8) -> Self {
        Src::Reg(r)
    }
}

/// Location of a finished translation block in the code buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EmittedTb {
    pub offset: usize,
    pub size: usize,
    /// `(displacement field, reset target)` per `goto_tb` slot.
    pub goto_tb: [Option<(u32, u32)>; 2],
}

/// Writes one translation block into a [`CodeBuffer`].
pub struct Emitter<'a, H: HostWord = NativeHost> {
    buf: &'a mut CodeBuffer,
    labels: Vec<Label>,
    tb_idx: usize,
    tb_start: usize,
    goto_tb: [Option<(u32, u32)>; 2],
    _host: PhantomData<H>,
}

impl<'a, H: HostWord> Emitter<'a, H> {
    /// Start a block at the buffer's current offset. `tb_idx` is the
    /// block's index in the TB store, used for chaining exit values.
    pub fn new(buf: &'a mut CodeBuffer, tb_idx: usize) -> Self {
        assert_eq!(
            buf.host_bits(),
            H::BITS,
            "code buffer was created for a different host word"
        );
        let tb_start = buf.offset();
        Self {
            buf,
            labels: Vec::new(),
            tb_idx,
            tb_start,
            goto_tb: [None; 2],
            _host: PhantomData,
        }
    }

    pub fn tb_idx(&self) -> usize {
        self.tb_idx
    }

    pub fn tb_start(&self) -> usize {
        self.tb_start
    }

    /// Current write offset.
    pub fn offset(&self) -> usize {
        self.buf.offset()
    }

    /// Finish the block.
    ///
    /// Panics if a label was referenced but never placed.
    pub fn finish(self) -> EmittedTb {
        for l in &self.labels {
            assert!(!l.has_pending_uses(), "label {} used but never placed", l.id);
        }
        EmittedTb {
            offset: self.tb_start,
            size: self.buf.offset() - self.tb_start,
            goto_tb: self.goto_tb,
        }
    }

    // -- Encoding primitives --

    fn begin(&mut self, opc: Opcode, ty: Type) -> usize {
        let start = self.buf.offset();
        self.buf.emit_u8(opc.encode(ty));
        self.buf.emit_u8(0);
        start
    }

    fn end(&mut self, start: usize) {
        let size = self.buf.offset() - start;
        assert!(size <= u8::MAX as usize, "instruction too long: {size} bytes");
        self.buf.patch_u8(start + 1, size as u8);
    }

    fn reg(&mut self, r: u8) {
        self.buf.emit_u8(r);
    }

    fn regs(&mut self, rs: &[u8]) {
        for &r in rs {
            self.reg(r);
        }
    }

    fn ri(&mut self, ty: Type, s: Src) {
        match s {
            Src::Reg(r) => self.reg(r),
            Src::Const(v) => {
                self.buf.emit_u8(TCG_CONST);
                match ty {
                    Type::I32 => self.buf.emit_u32(v as u32),
                    Type::I64 => self.buf.emit_u64(v),
                }
            }
        }
    }

    fn native(&mut self, v: u64) {
        if H::BITS == 32 {
            self.buf.emit_u32(v as u32);
        } else {
            self.buf.emit_u64(v);
        }
    }

    fn label_kind() -> RelocKind {
        if H::BITS == 32 {
            RelocKind::Abs32
        } else {
            RelocKind::Abs64
        }
    }

    fn label_ref(&mut self, id: u32) {
        let label = &mut self.labels[id as usize];
        if label.present {
            let v = label.value as u64;
            self.native(v);
        } else {
            let at = self.buf.offset();
            label.add_use(at, Self::label_kind());
            self.native(0);
        }
    }

    fn op_rr(&mut self, opc: Opcode, ty: Type, d: u8, s: u8) {
        let start = self.begin(opc, ty);
        self.reg(d);
        self.reg(s);
        self.end(start);
    }

    fn op_rrr(&mut self, opc: Opcode, ty: Type, d: u8, a: Src, b: Src) {
        let start = self.begin(opc, ty);
        self.reg(d);
        self.ri(ty, a);
        self.ri(ty, b);
        self.end(start);
    }

    fn op_ldst(&mut self, opc: Opcode, ty: Type, r: u8, base: u8, ofs: i32) {
        let start = self.begin(opc, ty);
        self.reg(r);
        self.reg(base);
        self.buf.emit_u32(ofs as u32);
        self.end(start);
    }

    // -- Labels --

    pub fn new_label(&mut self) -> u32 {
        let id = self.labels.len() as u32;
        self.labels.push(Label::new(id));
        id
    }

    /// Place `id` at the current offset and patch earlier references.
    pub fn set_label(&mut self, id: u32) {
        let at = self.buf.offset();
        for u in self.labels[id as usize].set_value(at) {
            match u.kind {
                RelocKind::Abs32 => self.buf.patch_u32(u.offset, at as u32),
                RelocKind::Abs64 => self.buf.patch_u64(u.offset, at as u64),
            }
        }
    }

    // -- Misc --

    pub fn gen_end(&mut self) {
        let start = self.begin(Opcode::End, Type::I32);
        self.end(start);
    }

    /// A no-op carrying `pad` bytes of padding.
    pub fn gen_nop(&mut self, pad: usize) {
        let start = self.begin(Opcode::Nop, Type::I32);
        self.buf.emit_bytes(&vec![0; pad]);
        self.end(start);
    }

    pub fn gen_discard(&mut self) {
        let start = self.begin(Opcode::Discard, Type::I32);
        self.end(start);
    }

    // -- Data movement --

    pub fn gen_mov(&mut self, ty: Type, d: u8, s: u8) {
        self.op_rr(Opcode::Mov, ty, d, s);
    }

    pub fn gen_movi(&mut self, ty: Type, d: u8, val: u64) {
        let start = self.begin(Opcode::MovI, ty);
        self.reg(d);
        match ty {
            Type::I32 => self.buf.emit_u32(val as u32),
            Type::I64 => self.buf.emit_u64(val),
        }
        self.end(start);
    }

    // -- Host memory --

    pub fn gen_ld8u(&mut self, ty: Type, d: u8, base: u8, ofs: i32) {
        self.op_ldst(Opcode::Ld8U, ty, d, base, ofs);
    }

    pub fn gen_ld8s(&mut self, ty: Type, d: u8, base: u8, ofs: i32) {
        self.op_ldst(Opcode::Ld8S, ty, d, base, ofs);
    }

    pub fn gen_ld16u(&mut self, ty: Type, d: u8, base: u8, ofs: i32) {
        self.op_ldst(Opcode::Ld16U, ty, d, base, ofs);
    }

    pub fn gen_ld16s(&mut self, ty: Type, d: u8, base: u8, ofs: i32) {
        self.op_ldst(Opcode::Ld16S, ty, d, base, ofs);
    }

    pub fn gen_ld32u(&mut self, d: u8, base: u8, ofs: i32) {
        self.op_ldst(Opcode::Ld32U, Type::I64, d, base, ofs);
    }

    pub fn gen_ld32s(&mut self, d: u8, base: u8, ofs: i32) {
        self.op_ldst(Opcode::Ld32S, Type::I64, d, base, ofs);
    }

    pub fn gen_ld(&mut self, ty: Type, d: u8, base: u8, ofs: i32) {
        self.op_ldst(Opcode::Ld, ty, d, base, ofs);
    }

    pub fn gen_st8(&mut self, ty: Type, s: u8, base: u8, ofs: i32) {
        self.op_ldst(Opcode::St8, ty, s, base, ofs);
    }

    pub fn gen_st16(&mut self, ty: Type, s: u8, base: u8, ofs: i32) {
        self.op_ldst(Opcode::St16, ty, s, base, ofs);
    }

    pub fn gen_st32(&mut self, s: u8, base: u8, ofs: i32) {
        self.op_ldst(Opcode::St32, Type::I64, s, base, ofs);
    }

    pub fn gen_st(&mut self, ty: Type, s: u8, base: u8, ofs: i32) {
        self.op_ldst(Opcode::St, ty, s, base, ofs);
    }

    // -- Arithmetic / logic --

    /// Emit any two-source opcode (`add` .. `rotr`).
    pub fn gen_binop(
        &mut self,
        opc: Opcode,
        ty: Type,
        d: u8,
        a: impl Into<Src>,
        b: impl Into<Src>,
    ) {
        self.op_rrr(opc, ty, d, a.into(), b.into());
    }

    pub fn gen_add(&mut self, ty: Type, d: u8, a: impl Into<Src>, b: impl Into<Src>) {
        self.op_rrr(Opcode::Add, ty, d, a.into(), b.into());
    }

    pub fn gen_sub(&mut self, ty: Type, d: u8, a: impl Into<Src>, b: impl Into<Src>) {
        self.op_rrr(Opcode::Sub, ty, d, a.into(), b.into());
    }

    pub fn gen_mul(&mut self, ty: Type, d: u8, a: impl Into<Src>, b: impl Into<Src>) {
        self.op_rrr(Opcode::Mul, ty, d, a.into(), b.into());
    }

    pub fn gen_and(&mut self, ty: Type, d: u8, a: impl Into<Src>, b: impl Into<Src>) {
        self.op_rrr(Opcode::And, ty, d, a.into(), b.into());
    }

    pub fn gen_or(&mut self, ty: Type, d: u8, a: impl Into<Src>, b: impl Into<Src>) {
        self.op_rrr(Opcode::Or, ty, d, a.into(), b.into());
    }

    pub fn gen_xor(&mut self, ty: Type, d: u8, a: impl Into<Src>, b: impl Into<Src>) {
        self.op_rrr(Opcode::Xor, ty, d, a.into(), b.into());
    }

    pub fn gen_shl(&mut self, ty: Type, d: u8, a: impl Into<Src>, b: impl Into<Src>) {
        self.op_rrr(Opcode::Shl, ty, d, a.into(), b.into());
    }

    pub fn gen_shr(&mut self, ty: Type, d: u8, a: impl Into<Src>, b: impl Into<Src>) {
        self.op_rrr(Opcode::Shr, ty, d, a.into(), b.into());
    }

    pub fn gen_sar(&mut self, ty: Type, d: u8, a: impl Into<Src>, b: impl Into<Src>) {
        self.op_rrr(Opcode::Sar, ty, d, a.into(), b.into());
    }

    /// Emit any one-source opcode (`not`, `neg`, extensions, swaps).
    pub fn gen_unop(&mut self, opc: Opcode, ty: Type, d: u8, s: u8) {
        self.op_rr(opc, ty, d, s);
    }

    pub fn gen_not(&mut self, ty: Type, d: u8, s: u8) {
        self.op_rr(Opcode::Not, ty, d, s);
    }

    pub fn gen_neg(&mut self, ty: Type, d: u8, s: u8) {
        self.op_rr(Opcode::Neg, ty, d, s);
    }

    pub fn gen_ext_i32_i64(&mut self, d: u8, s: u8) {
        self.op_rr(Opcode::ExtI32I64, Type::I64, d, s);
    }

    pub fn gen_extu_i32_i64(&mut self, d: u8, s: u8) {
        self.op_rr(Opcode::ExtUI32I64, Type::I64, d, s);
    }

    pub fn gen_deposit(&mut self, ty: Type, d: u8, a: u8, b: u8, pos: u8, len: u8) {
        let start = self.begin(Opcode::Deposit, ty);
        self.regs(&[d, a, b]);
        self.buf.emit_u8(pos);
        self.buf.emit_u8(len);
        self.end(start);
    }

    // -- Register pairs (32-bit host) --

    pub fn gen_add2_i32(&mut self, dl: u8, dh: u8, al: u8, ah: u8, bl: u8, bh: u8) {
        let start = self.begin(Opcode::Add2I32, Type::I32);
        self.regs(&[dl, dh, al, ah, bl, bh]);
        self.end(start);
    }

    pub fn gen_sub2_i32(&mut self, dl: u8, dh: u8, al: u8, ah: u8, bl: u8, bh: u8) {
        let start = self.begin(Opcode::Sub2I32, Type::I32);
        self.regs(&[dl, dh, al, ah, bl, bh]);
        self.end(start);
    }

    pub fn gen_mulu2_i32(&mut self, dl: u8, dh: u8, a: u8, b: u8) {
        let start = self.begin(Opcode::MulU2I32, Type::I32);
        self.regs(&[dl, dh, a, b]);
        self.end(start);
    }

    // -- Control flow --

    pub fn gen_setcond(
        &mut self,
        ty: Type,
        cond: Cond,
        d: u8,
        a: u8,
        b: impl Into<Src>,
    ) {
        let start = self.begin(Opcode::SetCond, ty);
        self.reg(d);
        self.reg(a);
        self.ri(ty, b.into());
        self.buf.emit_u8(cond as u8);
        self.end(start);
    }

    pub fn gen_brcond(
        &mut self,
        ty: Type,
        cond: Cond,
        a: u8,
        b: impl Into<Src>,
        label: u32,
    ) {
        let start = self.begin(Opcode::BrCond, ty);
        self.reg(a);
        self.ri(ty, b.into());
        self.buf.emit_u8(cond as u8);
        self.label_ref(label);
        self.end(start);
    }

    pub fn gen_setcond2_i32(
        &mut self,
        cond: Cond,
        d: u8,
        al: u8,
        ah: u8,
        bl: impl Into<Src>,
        bh: impl Into<Src>,
    ) {
        let start = self.begin(Opcode::SetCond2I32, Type::I32);
        self.regs(&[d, al, ah]);
        self.ri(Type::I32, bl.into());
        self.ri(Type::I32, bh.into());
        self.buf.emit_u8(cond as u8);
        self.end(start);
    }

    pub fn gen_brcond2_i32(
        &mut self,
        cond: Cond,
        al: u8,
        ah: u8,
        bl: impl Into<Src>,
        bh: impl Into<Src>,
        label: u32,
    ) {
        let start = self.begin(Opcode::BrCond2I32, Type::I32);
        self.regs(&[al, ah]);
        self.ri(Type::I32, bl.into());
        self.ri(Type::I32, bh.into());
        self.buf.emit_u8(cond as u8);
        self.label_ref(label);
        self.end(start);
    }

    pub fn gen_br(&mut self, label: u32) {
        let start = self.begin(Opcode::Br, Type::I32);
        self.label_ref(label);
        self.end(start);
    }

    /// Call a helper: a token in a register or a native-width constant.
    pub fn gen_call(&mut self, func: impl Into<Src>) {
        let start = self.begin(Opcode::Call, Type::I32);
        match func.into() {
            Src::Reg(r) => self.reg(r),
            Src::Const(v) => {
                self.buf.emit_u8(TCG_CONST);
                self.native(v);
            }
        }
        self.end(start);
    }

    /// Emit the chainable jump for exit `slot`, initially falling
    /// through to the next instruction.
    pub fn gen_goto_tb(&mut self, slot: usize) {
        assert!(slot < 2, "goto_tb slot {slot}");
        assert!(self.goto_tb[slot].is_none(), "goto_tb slot {slot} used twice");
        let start = self.begin(Opcode::GotoTb, Type::I32);
        let field = self.buf.offset();
        self.buf.emit_u32(0);
        self.end(start);
        self.goto_tb[slot] = Some((field as u32, self.buf.offset() as u32));
    }

    pub fn gen_exit_tb(&mut self, val: u64) {
        let start = self.begin(Opcode::ExitTb, Type::I32);
        self.native(val);
        self.end(start);
    }

    /// Exit asking the execution loop to chain `slot` to the next TB.
    pub fn gen_exit_tb_chain(&mut self, slot: usize) {
        self.gen_exit_tb(encode_tb_exit(self.tb_idx, slot as u64));
    }

    /// Exit asking the execution loop to return to its caller.
    pub fn gen_exit_tb_requested(&mut self) {
        self.gen_exit_tb(encode_tb_exit(self.tb_idx, TB_EXIT_REQUESTED));
    }

    // -- Guest memory --

    /// Emit a guest load. `d` holds one register, or a low/high pair for
    /// `qemu_ld64` on a 32-bit host; `addr` holds one register, or a
    /// low/high pair when guest addresses are wider than the host word.
    pub fn gen_qemu_ld(&mut self, opc: Opcode, d: &[u8], addr: &[u8], oi: MemOpIdx) {
        let start = self.begin(opc, Type::I32);
        self.regs(d);
        self.regs(addr);
        self.buf.emit_u32(oi.raw());
        self.end(start);
    }

    /// Emit a guest store; operand shapes as for [`Emitter::gen_qemu_ld`].
    pub fn gen_qemu_st(&mut self, opc: Opcode, s: &[u8], addr: &[u8], oi: MemOpIdx) {
        let start = self.begin(opc, Type::I32);
        self.regs(s);
        self.regs(addr);
        self.buf.emit_u32(oi.raw());
        self.end(start);
    }
}
