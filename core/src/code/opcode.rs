use std::fmt;

use crate::op::{BinaryOp, UnaryOp};

/// Opcodes at or above this value carry a 16-bit little-endian argument.
pub const HAVE_ARGUMENT: u8 = 90;

/// What an instruction's argument refers to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArgKind {
    None,
    /// Index into the constant pool.
    Const,
    /// Index into the name table.
    Name,
    /// Index into the local variable names.
    Local,
    /// Index into cellvars followed by freevars.
    Free,
    /// Jump measured from the next instruction.
    JRel,
    /// Jump to an absolute byte offset.
    JAbs,
    /// Comparison operator number.
    Compare,
    /// Item count or packed counts.
    Count,
}

macro_rules! opcodes {
    ($($name:ident = $num:literal, $text:literal, $kind:ident;)*) => {
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
        #[repr(u8)]
        pub enum Opcode {
            $($name = $num,)*
        }

        impl Opcode {
            pub const ALL: &'static [Opcode] = &[$(Opcode::$name,)*];

            pub fn from_byte(byte: u8) -> Option<Opcode> {
                match byte {
                    $($num => Some(Opcode::$name),)*
                    _ => None,
                }
            }

            pub fn from_name(name: &str) -> Option<Opcode> {
                match name {
                    $($text => Some(Opcode::$name),)*
                    _ => None,
                }
            }

            pub fn name(self) -> &'static str {
                match self {
                    $(Opcode::$name => $text,)*
                }
            }

            pub fn arg_kind(self) -> ArgKind {
                match self {
                    $(Opcode::$name => ArgKind::$kind,)*
                }
            }
        }
    };
}

opcodes! {
    PopTop = 1, "POP_TOP", None;
    RotTwo = 2, "ROT_TWO", None;
    RotThree = 3, "ROT_THREE", None;
    DupTop = 4, "DUP_TOP", None;
    RotFour = 5, "ROT_FOUR", None;
    Nop = 9, "NOP", None;
    UnaryPositive = 10, "UNARY_POSITIVE", None;
    UnaryNegative = 11, "UNARY_NEGATIVE", None;
    UnaryNot = 12, "UNARY_NOT", None;
    UnaryConvert = 13, "UNARY_CONVERT", None;
    UnaryInvert = 15, "UNARY_INVERT", None;
    BinaryPower = 19, "BINARY_POWER", None;
    BinaryMultiply = 20, "BINARY_MULTIPLY", None;
    BinaryDivide = 21, "BINARY_DIVIDE", None;
    BinaryModulo = 22, "BINARY_MODULO", None;
    BinaryAdd = 23, "BINARY_ADD", None;
    BinarySubtract = 24, "BINARY_SUBTRACT", None;
    BinarySubscr = 25, "BINARY_SUBSCR", None;
    BinaryFloorDivide = 26, "BINARY_FLOOR_DIVIDE", None;
    BinaryTrueDivide = 27, "BINARY_TRUE_DIVIDE", None;
    InplaceFloorDivide = 28, "INPLACE_FLOOR_DIVIDE", None;
    InplaceTrueDivide = 29, "INPLACE_TRUE_DIVIDE", None;
    Slice0 = 30, "SLICE+0", None;
    Slice1 = 31, "SLICE+1", None;
    Slice2 = 32, "SLICE+2", None;
    Slice3 = 33, "SLICE+3", None;
    StoreSlice0 = 40, "STORE_SLICE+0", None;
    StoreSlice1 = 41, "STORE_SLICE+1", None;
    StoreSlice2 = 42, "STORE_SLICE+2", None;
    StoreSlice3 = 43, "STORE_SLICE+3", None;
    DeleteSlice0 = 50, "DELETE_SLICE+0", None;
    DeleteSlice1 = 51, "DELETE_SLICE+1", None;
    DeleteSlice2 = 52, "DELETE_SLICE+2", None;
    DeleteSlice3 = 53, "DELETE_SLICE+3", None;
    StoreMap = 54, "STORE_MAP", None;
    InplaceAdd = 55, "INPLACE_ADD", None;
    InplaceSubtract = 56, "INPLACE_SUBTRACT", None;
    InplaceMultiply = 57, "INPLACE_MULTIPLY", None;
    InplaceDivide = 58, "INPLACE_DIVIDE", None;
    InplaceModulo = 59, "INPLACE_MODULO", None;
    StoreSubscr = 60, "STORE_SUBSCR", None;
    DeleteSubscr = 61, "DELETE_SUBSCR", None;
    BinaryLshift = 62, "BINARY_LSHIFT", None;
    BinaryRshift = 63, "BINARY_RSHIFT", None;
    BinaryAnd = 64, "BINARY_AND", None;
    BinaryXor = 65, "BINARY_XOR", None;
    BinaryOr = 66, "BINARY_OR", None;
    InplacePower = 67, "INPLACE_POWER", None;
    GetIter = 68, "GET_ITER", None;
    InplaceLshift = 75, "INPLACE_LSHIFT", None;
    InplaceRshift = 76, "INPLACE_RSHIFT", None;
    InplaceAnd = 77, "INPLACE_AND", None;
    InplaceXor = 78, "INPLACE_XOR", None;
    InplaceOr = 79, "INPLACE_OR", None;
    BreakLoop = 80, "BREAK_LOOP", None;
    LoadLocals = 82, "LOAD_LOCALS", None;
    ReturnValue = 83, "RETURN_VALUE", None;
    PopBlock = 87, "POP_BLOCK", None;
    EndFinally = 88, "END_FINALLY", None;
    BuildClass = 89, "BUILD_CLASS", None;
    StoreName = 90, "STORE_NAME", Name;
    DeleteName = 91, "DELETE_NAME", Name;
    UnpackSequence = 92, "UNPACK_SEQUENCE", Count;
    ForIter = 93, "FOR_ITER", JRel;
    ListAppend = 94, "LIST_APPEND", Count;
    StoreAttr = 95, "STORE_ATTR", Name;
    DeleteAttr = 96, "DELETE_ATTR", Name;
    StoreGlobal = 97, "STORE_GLOBAL", Name;
    DeleteGlobal = 98, "DELETE_GLOBAL", Name;
    DupTopx = 99, "DUP_TOPX", Count;
    LoadConst = 100, "LOAD_CONST", Const;
    LoadName = 101, "LOAD_NAME", Name;
    BuildTuple = 102, "BUILD_TUPLE", Count;
    BuildList = 103, "BUILD_LIST", Count;
    BuildMap = 105, "BUILD_MAP", Count;
    LoadAttr = 106, "LOAD_ATTR", Name;
    CompareOp = 107, "COMPARE_OP", Compare;
    JumpForward = 110, "JUMP_FORWARD", JRel;
    JumpIfFalseOrPop = 111, "JUMP_IF_FALSE_OR_POP", JAbs;
    JumpIfTrueOrPop = 112, "JUMP_IF_TRUE_OR_POP", JAbs;
    JumpAbsolute = 113, "JUMP_ABSOLUTE", JAbs;
    PopJumpIfFalse = 114, "POP_JUMP_IF_FALSE", JAbs;
    PopJumpIfTrue = 115, "POP_JUMP_IF_TRUE", JAbs;
    LoadGlobal = 116, "LOAD_GLOBAL", Name;
    ContinueLoop = 119, "CONTINUE_LOOP", JAbs;
    SetupLoop = 120, "SETUP_LOOP", JRel;
    SetupExcept = 121, "SETUP_EXCEPT", JRel;
    SetupFinally = 122, "SETUP_FINALLY", JRel;
    LoadFast = 124, "LOAD_FAST", Local;
    StoreFast = 125, "STORE_FAST", Local;
    DeleteFast = 126, "DELETE_FAST", Local;
    RaiseVarargs = 130, "RAISE_VARARGS", Count;
    CallFunction = 131, "CALL_FUNCTION", Count;
    MakeFunction = 132, "MAKE_FUNCTION", Count;
    BuildSlice = 133, "BUILD_SLICE", Count;
    MakeClosure = 134, "MAKE_CLOSURE", Count;
    LoadClosure = 135, "LOAD_CLOSURE", Free;
    LoadDeref = 136, "LOAD_DEREF", Free;
    StoreDeref = 137, "STORE_DEREF", Free;
    CallFunctionVar = 140, "CALL_FUNCTION_VAR", Count;
    CallFunctionKw = 141, "CALL_FUNCTION_KW", Count;
    CallFunctionVarKw = 142, "CALL_FUNCTION_VAR_KW", Count;
    ExtendedArg = 145, "EXTENDED_ARG", Count;
    MapAdd = 147, "MAP_ADD", Count;
}

impl Opcode {
    #[inline]
    pub fn byte(self) -> u8 {
        self as u8
    }

    #[inline]
    pub fn has_arg(self) -> bool {
        self.byte() >= HAVE_ARGUMENT
    }

    pub fn is_jump(self) -> bool {
        matches!(self.arg_kind(), ArgKind::JRel | ArgKind::JAbs)
    }

    /// Control never reaches the following instruction.
    pub fn is_terminator(self) -> bool {
        matches!(
            self,
            Opcode::ReturnValue
                | Opcode::RaiseVarargs
                | Opcode::JumpAbsolute
                | Opcode::JumpForward
                | Opcode::BreakLoop
                | Opcode::ContinueLoop
        )
    }

    /// Pushes a block whose handler starts at the jump target.
    pub fn is_block_setup(self) -> bool {
        matches!(self, Opcode::SetupLoop | Opcode::SetupExcept | Opcode::SetupFinally)
    }

    /// Net stack effect of the instruction on the fall-through path. Block
    /// setups and `END_FINALLY` report the normal-flow effect.
    pub fn stack_effect(self, arg: u32) -> i32 {
        use Opcode::*;
        let arg_i = arg as i32;
        match self {
            PopTop => -1,
            RotTwo | RotThree | RotFour | Nop => 0,
            DupTop => 1,
            UnaryPositive | UnaryNegative | UnaryNot | UnaryConvert | UnaryInvert => 0,
            BinaryPower | BinaryMultiply | BinaryDivide | BinaryModulo | BinaryAdd | BinarySubtract
            | BinarySubscr | BinaryFloorDivide | BinaryTrueDivide | BinaryLshift | BinaryRshift | BinaryAnd
            | BinaryXor | BinaryOr => -1,
            InplaceFloorDivide | InplaceTrueDivide | InplaceAdd | InplaceSubtract | InplaceMultiply
            | InplaceDivide | InplaceModulo | InplacePower | InplaceLshift | InplaceRshift | InplaceAnd
            | InplaceXor | InplaceOr => -1,
            Slice0 => 0,
            Slice1 | Slice2 => -1,
            Slice3 => -2,
            StoreSlice0 => -2,
            StoreSlice1 | StoreSlice2 => -3,
            StoreSlice3 => -4,
            DeleteSlice0 => -1,
            DeleteSlice1 | DeleteSlice2 => -2,
            DeleteSlice3 => -3,
            StoreMap => -2,
            StoreSubscr => -3,
            DeleteSubscr => -2,
            GetIter => 0,
            BreakLoop => 0,
            LoadLocals => 1,
            ReturnValue => -1,
            PopBlock => 0,
            EndFinally => -1,
            BuildClass => -2,
            StoreName => -1,
            DeleteName => 0,
            UnpackSequence => arg_i - 1,
            ForIter => 1,
            ListAppend => -1,
            StoreAttr => -2,
            DeleteAttr => -1,
            StoreGlobal => -1,
            DeleteGlobal => 0,
            DupTopx => arg_i,
            LoadConst | LoadName | LoadGlobal | LoadFast | LoadClosure | LoadDeref => 1,
            BuildTuple | BuildList => 1 - arg_i,
            BuildMap => 1,
            LoadAttr => 0,
            CompareOp => -1,
            JumpForward | JumpAbsolute | ContinueLoop => 0,
            JumpIfFalseOrPop | JumpIfTrueOrPop => -1,
            PopJumpIfFalse | PopJumpIfTrue => -1,
            SetupLoop | SetupExcept | SetupFinally => 0,
            StoreFast | StoreDeref => -1,
            DeleteFast => 0,
            RaiseVarargs => -arg_i,
            CallFunction | CallFunctionVar | CallFunctionKw | CallFunctionVarKw => {
                let extra = match self {
                    CallFunctionVar | CallFunctionKw => 1,
                    CallFunctionVarKw => 2,
                    _ => 0,
                };
                -((arg & 0xff) as i32) - 2 * ((arg >> 8) & 0xff) as i32 - extra
            }
            MakeFunction => -arg_i,
            MakeClosure => -arg_i - 1,
            BuildSlice => {
                if arg == 3 {
                    -2
                } else {
                    -1
                }
            }
            ExtendedArg => 0,
            MapAdd => -2,
        }
    }
}

impl Opcode {
    /// Operator of a `BINARY_*` arithmetic or bitwise opcode.
    pub fn binary_op(self) -> Option<BinaryOp> {
        Some(match self {
            Opcode::BinaryAdd => BinaryOp::Add,
            Opcode::BinarySubtract => BinaryOp::Sub,
            Opcode::BinaryMultiply => BinaryOp::Mul,
            Opcode::BinaryDivide => BinaryOp::Div,
            Opcode::BinaryTrueDivide => BinaryOp::TrueDiv,
            Opcode::BinaryFloorDivide => BinaryOp::FloorDiv,
            Opcode::BinaryModulo => BinaryOp::Mod,
            Opcode::BinaryPower => BinaryOp::Pow,
            Opcode::BinaryLshift => BinaryOp::LShift,
            Opcode::BinaryRshift => BinaryOp::RShift,
            Opcode::BinaryAnd => BinaryOp::And,
            Opcode::BinaryOr => BinaryOp::Or,
            Opcode::BinaryXor => BinaryOp::Xor,
            _ => return None,
        })
    }

    /// Operator of an `INPLACE_*` opcode.
    pub fn inplace_op(self) -> Option<BinaryOp> {
        Some(match self {
            Opcode::InplaceAdd => BinaryOp::Add,
            Opcode::InplaceSubtract => BinaryOp::Sub,
            Opcode::InplaceMultiply => BinaryOp::Mul,
            Opcode::InplaceDivide => BinaryOp::Div,
            Opcode::InplaceTrueDivide => BinaryOp::TrueDiv,
            Opcode::InplaceFloorDivide => BinaryOp::FloorDiv,
            Opcode::InplaceModulo => BinaryOp::Mod,
            Opcode::InplacePower => BinaryOp::Pow,
            Opcode::InplaceLshift => BinaryOp::LShift,
            Opcode::InplaceRshift => BinaryOp::RShift,
            Opcode::InplaceAnd => BinaryOp::And,
            Opcode::InplaceOr => BinaryOp::Or,
            Opcode::InplaceXor => BinaryOp::Xor,
            _ => return None,
        })
    }

    pub fn unary_op(self) -> Option<UnaryOp> {
        Some(match self {
            Opcode::UnaryPositive => UnaryOp::Positive,
            Opcode::UnaryNegative => UnaryOp::Negative,
            Opcode::UnaryNot => UnaryOp::Not,
            Opcode::UnaryConvert => UnaryOp::Convert,
            Opcode::UnaryInvert => UnaryOp::Invert,
            _ => return None,
        })
    }

    /// Number of explicit bounds (`start`, `stop`) a `*SLICE+n` opcode takes
    /// from the stack, as `(has_start, has_stop)`.
    pub fn slice_bounds(self) -> Option<(bool, bool)> {
        use Opcode::*;
        match self {
            Slice0 | StoreSlice0 | DeleteSlice0 => Some((false, false)),
            Slice1 | StoreSlice1 | DeleteSlice1 => Some((true, false)),
            Slice2 | StoreSlice2 | DeleteSlice2 => Some((false, true)),
            Slice3 | StoreSlice3 | DeleteSlice3 => Some((true, true)),
            _ => None,
        }
    }
}

impl fmt::Display for Opcode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}
