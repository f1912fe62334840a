use tcg_core::Type;

/// TCI bytecode opcodes.
///
/// Integer opcodes flagged [`OpFlags::INT`] are type-polymorphic: the
/// encoded opcode byte carries the width in bit 7 ([`OPC_I64_BIT`]) and
/// the interpreter instantiates one generic body per width. Opcodes with
/// a fixed width report it through [`Opcode::fixed_type`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum Opcode {
    // -- Misc --
    End = 0,
    Nop,
    Discard,

    // -- Control flow --
    Call,
    Br,
    BrCond,
    BrCond2I32, // 64-bit compare on register pairs (32-bit host)
    SetCond,
    SetCond2I32, // 64-bit setcond on register pairs (32-bit host)
    GotoTb,
    ExitTb,

    // -- Data movement --
    Mov,
    MovI,

    // -- Host memory (CPU state, TCG frame) --
    Ld8U,
    Ld8S,
    Ld16U,
    Ld16S,
    Ld32U,
    Ld32S,
    Ld, // width of the op
    St8,
    St16,
    St32,
    St, // width of the op

    // -- Arithmetic / logic --
    Add,
    Sub,
    Mul,
    DivS,
    DivU,
    RemS,
    RemU,
    And,
    Or,
    Xor,
    Shl,
    Shr,
    Sar,
    RotL,
    RotR,
    Not,
    Neg,
    Deposit,

    // -- Double-word arithmetic on register pairs (32-bit host) --
    Add2I32,
    Sub2I32,
    MulU2I32,

    // -- Extension --
    Ext8S,
    Ext8U,
    Ext16S,
    Ext16U,
    Ext32S,
    Ext32U,
    ExtI32I64,
    ExtUI32I64,

    // -- Byte swap --
    Bswap16,
    Bswap32,
    Bswap64,

    // -- Guest memory (through the memory bridge) --
    QemuLd8U,
    QemuLd8S,
    QemuLd16U,
    QemuLd16S,
    QemuLd32U,
    QemuLd32S,
    QemuLd64,
    QemuSt8,
    QemuSt16,
    QemuSt32,
    QemuSt64,

    // Sentinel, must be last
    Count,
}

/// Every opcode, indexed by its number.
static ALL: [Opcode; Opcode::Count as usize] = [
    Opcode::End,
    Opcode::Nop,
    Opcode::Discard,
    Opcode::Call,
    Opcode::Br,
    Opcode::BrCond,
    Opcode::BrCond2I32,
    Opcode::SetCond,
    Opcode::SetCond2I32,
    Opcode::GotoTb,
    Opcode::ExitTb,
    Opcode::Mov,
    Opcode::MovI,
    Opcode::Ld8U,
    Opcode::Ld8S,
    Opcode::Ld16U,
    Opcode::Ld16S,
    Opcode::Ld32U,
    Opcode::Ld32S,
    Opcode::Ld,
    Opcode::St8,
    Opcode::St16,
    Opcode::St32,
    Opcode::St,
    Opcode::Add,
    Opcode::Sub,
    Opcode::Mul,
    Opcode::DivS,
    Opcode::DivU,
    Opcode::RemS,
    Opcode::RemU,
    Opcode::And,
    Opcode::Or,
    Opcode::Xor,
    Opcode::Shl,
    Opcode::Shr,
    Opcode::Sar,
    Opcode::RotL,
    Opcode::RotR,
    Opcode::Not,
    Opcode::Neg,
    Opcode::Deposit,
    Opcode::Add2I32,
    Opcode::Sub2I32,
    Opcode::MulU2I32,
    Opcode::Ext8S,
    Opcode::Ext8U,
    Opcode::Ext16S,
    Opcode::Ext16U,
    Opcode::Ext32S,
    Opcode::Ext32U,
    Opcode::ExtI32I64,
    Opcode::ExtUI32I64,
    Opcode::Bswap16,
    Opcode::Bswap32,
    Opcode::Bswap64,
    Opcode::QemuLd8U,
    Opcode::QemuLd8S,
    Opcode::QemuLd16U,
    Opcode::QemuLd16S,
    Opcode::QemuLd32U,
    Opcode::QemuLd32S,
    Opcode::QemuLd64,
    Opcode::QemuSt8,
    Opcode::QemuSt16,
    Opcode::QemuSt32,
    Opcode::QemuSt64,
];

/// Bit set in the opcode byte for the 64-bit form of an `INT` opcode.
pub const OPC_I64_BIT: u8 = 0x80;

/// Flags describing properties of an opcode.
///
/// Maps to QEMU's `TCG_OPF_*` flags.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OpFlags(u16);

impl OpFlags {
    pub const NONE: OpFlags = OpFlags(0);
    /// Leaves the translation block.
    pub const BB_EXIT: OpFlags = OpFlags(0x01);
    /// Ends a basic block; the dispatch loop does not fall through
    /// without re-reading the cursor.
    pub const BB_END: OpFlags = OpFlags(0x02);
    /// Calls out to a helper.
    pub const CALL: OpFlags = OpFlags(0x04);
    /// Has side effects beyond its output registers.
    pub const SIDE_EFFECTS: OpFlags = OpFlags(0x08);
    /// Operands may be I32 or I64 (type-polymorphic).
    pub const INT: OpFlags = OpFlags(0x10);
    /// Only exists when the host word is 32 bits.
    pub const HOST32: OpFlags = OpFlags(0x20);
    /// Conditional branch.
    pub const COND_BRANCH: OpFlags = OpFlags(0x40);
    /// Accesses guest memory through the memory bridge.
    pub const GUEST_MEM: OpFlags = OpFlags(0x80);

    pub const fn bits(self) -> u16 {
        self.0
    }

    pub const fn contains(self, other: OpFlags) -> bool {
        self.0 & other.0 == other.0
    }

    pub const fn union(self, other: OpFlags) -> Self {
        Self(self.0 | other.0)
    }
}

/// Operand kinds, in encoding order.
///
/// The byte width of some kinds depends on the op width or on the host
/// word; see [`crate::insn`] for the exact rules.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Arg {
    /// Destination register (never a reserved slot).
    Out,
    /// Source register.
    In,
    /// Host base register for ld/st (may be `env` or `sp`).
    Base,
    /// Register, or `TCG_CONST` + constant of the op width.
    Ri,
    /// Call target: register, or `TCG_CONST` + native-width constant.
    Func,
    /// 64-bit destination: one register, or a low/high pair.
    Out64,
    /// 64-bit source: one register, or a low/high pair.
    In64,
    /// Guest address: one register, or a low/high pair.
    Addr,
    /// Signed 32-bit host offset.
    Ofs,
    /// Immediate of the op width.
    Imm,
    /// Native-width immediate.
    Native,
    /// Condition byte.
    Cond,
    /// Native-width absolute label.
    Label,
    /// Signed 32-bit displacement.
    Disp,
    /// Unsigned byte.
    U8,
    /// 32-bit memory operation token.
    MemIdx,
}

/// Static definition of an opcode: name, operand layout and flags.
///
/// Maps to QEMU's `TCGOpDef`.
#[derive(Debug, Clone, Copy)]
pub struct OpDef {
    pub name: &'static str,
    pub args: &'static [Arg],
    pub flags: OpFlags,
}

impl OpDef {
    pub const fn nb_args(&self) -> usize {
        self.args.len()
    }
}

use Arg::*;

const INT: OpFlags = OpFlags::INT;
const H32: OpFlags = OpFlags::HOST32;
const SE: OpFlags = OpFlags::SIDE_EFFECTS;
const BE: OpFlags = OpFlags::BB_END;
const BX: OpFlags = OpFlags::BB_EXIT;
const CB: OpFlags = OpFlags::COND_BRANCH;
const CL: OpFlags = OpFlags::CALL;
const GM: OpFlags = OpFlags::GUEST_MEM;
const N: OpFlags = OpFlags::NONE;

const fn f(a: OpFlags, b: OpFlags) -> OpFlags {
    a.union(b)
}

const fn def(name: &'static str, args: &'static [Arg], flags: OpFlags) -> OpDef {
    OpDef { name, args, flags }
}

const BINOP: &[Arg] = &[Out, Ri, Ri];
const UNOP: &[Arg] = &[Out, In];
const LOAD: &[Arg] = &[Out, Base, Ofs];
const STORE: &[Arg] = &[In, Base, Ofs];
const QEMU_LD: &[Arg] = &[Out, Addr, MemIdx];
const QEMU_ST: &[Arg] = &[In, Addr, MemIdx];

/// Static opcode definition table, indexed by `Opcode as usize`.
pub static OPCODE_DEFS: [OpDef; Opcode::Count as usize] = [
    def("end", &[], N),
    def("nop", &[], N),
    def("discard", &[], N),
    def("call", &[Func], f(CL, SE)),
    def("br", &[Label], BE),
    def("brcond", &[In, Ri, Cond, Label], f(f(INT, BE), CB)),
    def("brcond2_i32", &[In, In, Ri, Ri, Cond, Label], f(f(H32, BE), CB)),
    def("setcond", &[Out, In, Ri, Cond], INT),
    def("setcond2_i32", &[Out, In, In, Ri, Ri, Cond], H32),
    def("goto_tb", &[Disp], f(BE, BX)),
    def("exit_tb", &[Native], f(BE, BX)),
    def("mov", &[Out, In], INT),
    def("movi", &[Out, Imm], INT),
    def("ld8u", LOAD, INT),
    def("ld8s", LOAD, INT),
    def("ld16u", LOAD, INT),
    def("ld16s", LOAD, INT),
    def("ld32u_i64", LOAD, N),
    def("ld32s_i64", LOAD, N),
    def("ld", LOAD, INT),
    def("st8", STORE, f(INT, SE)),
    def("st16", STORE, f(INT, SE)),
    def("st32_i64", STORE, SE),
    def("st", STORE, f(INT, SE)),
    def("add", BINOP, INT),
    def("sub", BINOP, INT),
    def("mul", BINOP, INT),
    def("div", BINOP, INT),
    def("divu", BINOP, INT),
    def("rem", BINOP, INT),
    def("remu", BINOP, INT),
    def("and", BINOP, INT),
    def("or", BINOP, INT),
    def("xor", BINOP, INT),
    def("shl", BINOP, INT),
    def("shr", BINOP, INT),
    def("sar", BINOP, INT),
    def("rotl", BINOP, INT),
    def("rotr", BINOP, INT),
    def("not", UNOP, INT),
    def("neg", UNOP, INT),
    def("deposit", &[Out, In, In, U8, U8], INT),
    def("add2_i32", &[Out, Out, In, In, In, In], H32),
    def("sub2_i32", &[Out, Out, In, In, In, In], H32),
    def("mulu2_i32", &[Out, Out, In, In], H32),
    def("ext8s", UNOP, INT),
    def("ext8u", UNOP, INT),
    def("ext16s", UNOP, INT),
    def("ext16u", UNOP, INT),
    def("ext32s_i64", UNOP, N),
    def("ext32u_i64", UNOP, N),
    def("ext_i32_i64", UNOP, N),
    def("extu_i32_i64", UNOP, N),
    def("bswap16", UNOP, INT),
    def("bswap32", UNOP, INT),
    def("bswap64_i64", UNOP, N),
    def("qemu_ld8u", QEMU_LD, GM),
    def("qemu_ld8s", QEMU_LD, GM),
    def("qemu_ld16u", QEMU_LD, GM),
    def("qemu_ld16s", QEMU_LD, GM),
    def("qemu_ld32u", QEMU_LD, GM),
    def("qemu_ld32s", QEMU_LD, GM),
    def("qemu_ld64", &[Out64, Addr, MemIdx], GM),
    def("qemu_st8", QEMU_ST, f(GM, SE)),
    def("qemu_st16", QEMU_ST, f(GM, SE)),
    def("qemu_st32", QEMU_ST, f(GM, SE)),
    def("qemu_st64", &[In64, Addr, MemIdx], f(GM, SE)),
];

impl Opcode {
    /// Look up the static definition for this opcode.
    pub fn def(self) -> &'static OpDef {
        &OPCODE_DEFS[self as usize]
    }

    /// Decode the 7-bit opcode number (without the width bit).
    pub fn from_u8(v: u8) -> Option<Opcode> {
        ALL.get(v as usize).copied()
    }

    /// Split an encoded opcode byte into opcode and operand width.
    ///
    /// Returns `None` for bytes that name no opcode, including the
    /// width bit on an opcode that is not type-polymorphic.
    pub fn decode(byte: u8) -> Option<(Opcode, Type)> {
        let opc = Self::from_u8(byte & !OPC_I64_BIT)?;
        let wide = byte & OPC_I64_BIT != 0;
        if opc.is_int_polymorphic() {
            Some((opc, if wide { Type::I64 } else { Type::I32 }))
        } else if wide {
            None
        } else {
            Some((opc, opc.fixed_type().unwrap_or(Type::I32)))
        }
    }

    /// Encode this opcode at width `ty` into its opcode byte.
    pub fn encode(self, ty: Type) -> u8 {
        if self.is_int_polymorphic() && ty == Type::I64 {
            self as u8 | OPC_I64_BIT
        } else {
            self as u8
        }
    }

    /// Return the fixed width of a non-polymorphic integer opcode.
    pub fn fixed_type(self) -> Option<Type> {
        match self {
            Opcode::Ld32U
            | Opcode::Ld32S
            | Opcode::St32
            | Opcode::Ext32S
            | Opcode::Ext32U
            | Opcode::ExtI32I64
            | Opcode::ExtUI32I64
            | Opcode::Bswap64 => Some(Type::I64),
            Opcode::BrCond2I32
            | Opcode::SetCond2I32
            | Opcode::Add2I32
            | Opcode::Sub2I32
            | Opcode::MulU2I32 => Some(Type::I32),
            _ => None,
        }
    }

    /// Whether this opcode is type-polymorphic (works on I32 or I64).
    pub fn is_int_polymorphic(self) -> bool {
        self.def().flags.contains(OpFlags::INT)
    }

    /// Whether a host with `host_bits`-wide registers implements this
    /// opcode at width `ty`.
    pub fn is_available(self, ty: Type, host_bits: u32) -> bool {
        if self.def().flags.contains(OpFlags::HOST32) && host_bits != 32 {
            return false;
        }
        ty == Type::I32 || host_bits == 64
    }

    /// Printable name including the width suffix of polymorphic opcodes.
    pub fn full_name(self, ty: Type) -> String {
        let name = self.def().name;
        if self.is_int_polymorphic() {
            format!("{name}{}", ty.suffix())
        } else {
            name.to_string()
        }
    }

    /// Access descriptor of a guest memory opcode.
    pub fn mem_op(self) -> Option<tcg_core::MemOp> {
        use tcg_core::MemOp;
        Some(match self {
            Opcode::QemuLd8U | Opcode::QemuSt8 => MemOp::ub(),
            Opcode::QemuLd8S => MemOp::sb(),
            Opcode::QemuLd16U | Opcode::QemuSt16 => MemOp::uw(),
            Opcode::QemuLd16S => MemOp::sw(),
            Opcode::QemuLd32U | Opcode::QemuSt32 => MemOp::ul(),
            Opcode::QemuLd32S => MemOp::sl(),
            Opcode::QemuLd64 | Opcode::QemuSt64 => MemOp::uq(),
            _ => return None,
        })
    }
}
