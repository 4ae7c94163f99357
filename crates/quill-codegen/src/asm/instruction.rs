//! EVM instruction set.
//!
//! Each instruction is a single byte. `PUSHn` carries `n` immediate bytes;
//! every other instruction is operand-free.

use num_enum::{IntoPrimitive, TryFromPrimitive};

/// EVM operation codes.
///
/// The machine is a 256-bit word stack machine. Instructions pop their
/// arguments from the top of the stack, first argument on top, and push
/// their results back.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, TryFromPrimitive, IntoPrimitive)]
#[repr(u8)]
pub enum Instruction {
    // =========================================================================
    // Arithmetic
    // =========================================================================
    /// Halt execution successfully with no return data.
    Stop = 0x00,
    /// `a + b` modulo 2^256.
    Add = 0x01,
    /// `a * b` modulo 2^256.
    Mul = 0x02,
    /// `a - b` modulo 2^256.
    Sub = 0x03,
    /// Unsigned `a / b`, zero when `b` is zero.
    Div = 0x04,
    /// Signed `a / b`, zero when `b` is zero.
    SDiv = 0x05,
    /// Unsigned `a % b`, zero when `b` is zero.
    Mod = 0x06,
    /// Signed `a % b` taking the sign of `a`.
    SMod = 0x07,
    /// `(a + b) % n` without intermediate overflow.
    AddMod = 0x08,
    /// `(a * b) % n` without intermediate overflow.
    MulMod = 0x09,
    /// `a ** b` modulo 2^256.
    Exp = 0x0a,
    /// Sign-extend `x` from byte `b` (counted from the low end).
    SignExtend = 0x0b,

    // =========================================================================
    // Comparison and Bitwise Logic
    // =========================================================================
    /// Unsigned `a < b`.
    Lt = 0x10,
    /// Unsigned `a > b`.
    Gt = 0x11,
    /// Signed `a < b`.
    Slt = 0x12,
    /// Signed `a > b`.
    Sgt = 0x13,
    /// `a == b`.
    Eq = 0x14,
    /// `a == 0`.
    IsZero = 0x15,
    /// Bitwise and.
    And = 0x16,
    /// Bitwise or.
    Or = 0x17,
    /// Bitwise xor.
    Xor = 0x18,
    /// Bitwise not.
    Not = 0x19,
    /// Byte `i` of `x`, counted from the most significant end.
    Byte = 0x1a,
    /// `value << shift`; operands are `shift, value`.
    Shl = 0x1b,
    /// Logical `value >> shift`; operands are `shift, value`.
    Shr = 0x1c,
    /// Arithmetic `value >> shift`; operands are `shift, value`.
    Sar = 0x1d,

    // =========================================================================
    // Hashing
    // =========================================================================
    /// keccak-256 of `memory[offset..offset + size]`.
    Keccak256 = 0x20,

    // =========================================================================
    // Environment
    // =========================================================================
    /// Address of the executing account.
    Address = 0x30,
    /// Balance of an account.
    Balance = 0x31,
    /// Sender of the transaction.
    Origin = 0x32,
    /// Sender of the current message.
    Caller = 0x33,
    /// Value sent with the current message.
    CallValue = 0x34,
    /// Word of call data at an offset, zero-padded past the end.
    CallDataLoad = 0x35,
    /// Size of call data.
    CallDataSize = 0x36,
    /// Copy call data to memory: `dest, offset, size`.
    CallDataCopy = 0x37,
    /// Size of the executing code.
    CodeSize = 0x38,
    /// Copy executing code to memory: `dest, offset, size`.
    CodeCopy = 0x39,
    /// Gas price of the transaction.
    GasPrice = 0x3a,
    /// Code size of an account.
    ExtCodeSize = 0x3b,
    /// Copy an account's code to memory.
    ExtCodeCopy = 0x3c,
    /// Size of the last call's return data.
    ReturnDataSize = 0x3d,
    /// Copy return data to memory: `dest, offset, size`.
    ReturnDataCopy = 0x3e,
    /// Hash of an account's code.
    ExtCodeHash = 0x3f,

    // =========================================================================
    // Block Information
    // =========================================================================
    /// Hash of one of the 256 most recent blocks.
    BlockHash = 0x40,
    /// Beneficiary of the current block.
    Coinbase = 0x41,
    /// Timestamp of the current block.
    Timestamp = 0x42,
    /// Number of the current block.
    Number = 0x43,
    /// Difficulty of the current block.
    Difficulty = 0x44,
    /// Gas limit of the current block.
    GasLimit = 0x45,
    /// Chain identifier.
    ChainId = 0x46,
    /// Balance of the executing account.
    SelfBalance = 0x47,

    // =========================================================================
    // Stack, Memory, Storage and Flow
    // =========================================================================
    /// Discard the top word.
    Pop = 0x50,
    /// Load a memory word.
    MLoad = 0x51,
    /// Store a memory word: `offset, value`.
    MStore = 0x52,
    /// Store the low byte of a word: `offset, value`.
    MStore8 = 0x53,
    /// Load a storage slot.
    SLoad = 0x54,
    /// Store a storage slot: `key, value`.
    SStore = 0x55,
    /// Jump to a `JUMPDEST`.
    Jump = 0x56,
    /// Jump when the condition is non-zero: `target, condition`.
    JumpI = 0x57,
    /// Program counter of this instruction.
    Pc = 0x58,
    /// Size of active memory.
    MSize = 0x59,
    /// Remaining gas.
    Gas = 0x5a,
    /// Valid jump target.
    JumpDest = 0x5b,

    // =========================================================================
    // Push
    // =========================================================================
    /// Push 1 immediate byte.
    Push1 = 0x60,
    /// Push 2 immediate bytes.
    Push2 = 0x61,
    /// Push 3 immediate bytes.
    Push3 = 0x62,
    /// Push 4 immediate bytes.
    Push4 = 0x63,
    /// Push 5 immediate bytes.
    Push5 = 0x64,
    /// Push 6 immediate bytes.
    Push6 = 0x65,
    /// Push 7 immediate bytes.
    Push7 = 0x66,
    /// Push 8 immediate bytes.
    Push8 = 0x67,
    /// Push 9 immediate bytes.
    Push9 = 0x68,
    /// Push 10 immediate bytes.
    Push10 = 0x69,
    /// Push 11 immediate bytes.
    Push11 = 0x6a,
    /// Push 12 immediate bytes.
    Push12 = 0x6b,
    /// Push 13 immediate bytes.
    Push13 = 0x6c,
    /// Push 14 immediate bytes.
    Push14 = 0x6d,
    /// Push 15 immediate bytes.
    Push15 = 0x6e,
    /// Push 16 immediate bytes.
    Push16 = 0x6f,
    /// Push 17 immediate bytes.
    Push17 = 0x70,
    /// Push 18 immediate bytes.
    Push18 = 0x71,
    /// Push 19 immediate bytes.
    Push19 = 0x72,
    /// Push 20 immediate bytes.
    Push20 = 0x73,
    /// Push 21 immediate bytes.
    Push21 = 0x74,
    /// Push 22 immediate bytes.
    Push22 = 0x75,
    /// Push 23 immediate bytes.
    Push23 = 0x76,
    /// Push 24 immediate bytes.
    Push24 = 0x77,
    /// Push 25 immediate bytes.
    Push25 = 0x78,
    /// Push 26 immediate bytes.
    Push26 = 0x79,
    /// Push 27 immediate bytes.
    Push27 = 0x7a,
    /// Push 28 immediate bytes.
    Push28 = 0x7b,
    /// Push 29 immediate bytes.
    Push29 = 0x7c,
    /// Push 30 immediate bytes.
    Push30 = 0x7d,
    /// Push 31 immediate bytes.
    Push31 = 0x7e,
    /// Push 32 immediate bytes.
    Push32 = 0x7f,

    // =========================================================================
    // Duplication
    // =========================================================================
    /// Duplicate the 1st word.
    Dup1 = 0x80,
    /// Duplicate the 2nd word.
    Dup2 = 0x81,
    /// Duplicate the 3rd word.
    Dup3 = 0x82,
    /// Duplicate the 4th word.
    Dup4 = 0x83,
    /// Duplicate the 5th word.
    Dup5 = 0x84,
    /// Duplicate the 6th word.
    Dup6 = 0x85,
    /// Duplicate the 7th word.
    Dup7 = 0x86,
    /// Duplicate the 8th word.
    Dup8 = 0x87,
    /// Duplicate the 9th word.
    Dup9 = 0x88,
    /// Duplicate the 10th word.
    Dup10 = 0x89,
    /// Duplicate the 11th word.
    Dup11 = 0x8a,
    /// Duplicate the 12th word.
    Dup12 = 0x8b,
    /// Duplicate the 13th word.
    Dup13 = 0x8c,
    /// Duplicate the 14th word.
    Dup14 = 0x8d,
    /// Duplicate the 15th word.
    Dup15 = 0x8e,
    /// Duplicate the 16th word.
    Dup16 = 0x8f,

    // =========================================================================
    // Exchange
    // =========================================================================
    /// Exchange the top with the 2nd word.
    Swap1 = 0x90,
    /// Exchange the top with the 3rd word.
    Swap2 = 0x91,
    /// Exchange the top with the 4th word.
    Swap3 = 0x92,
    /// Exchange the top with the 5th word.
    Swap4 = 0x93,
    /// Exchange the top with the 6th word.
    Swap5 = 0x94,
    /// Exchange the top with the 7th word.
    Swap6 = 0x95,
    /// Exchange the top with the 8th word.
    Swap7 = 0x96,
    /// Exchange the top with the 9th word.
    Swap8 = 0x97,
    /// Exchange the top with the 10th word.
    Swap9 = 0x98,
    /// Exchange the top with the 11th word.
    Swap10 = 0x99,
    /// Exchange the top with the 12th word.
    Swap11 = 0x9a,
    /// Exchange the top with the 13th word.
    Swap12 = 0x9b,
    /// Exchange the top with the 14th word.
    Swap13 = 0x9c,
    /// Exchange the top with the 15th word.
    Swap14 = 0x9d,
    /// Exchange the top with the 16th word.
    Swap15 = 0x9e,
    /// Exchange the top with the 17th word.
    Swap16 = 0x9f,

    // =========================================================================
    // Logging
    // =========================================================================
    /// Log without topics: `offset, size`.
    Log0 = 0xa0,
    /// Log with one topic.
    Log1 = 0xa1,
    /// Log with two topics.
    Log2 = 0xa2,
    /// Log with three topics.
    Log3 = 0xa3,
    /// Log with four topics.
    Log4 = 0xa4,

    // =========================================================================
    // System
    // =========================================================================
    /// Create a contract: `value, offset, size`.
    Create = 0xf0,
    /// Message call: `gas, address, value, in_offset, in_size, out_offset, out_size`.
    Call = 0xf1,
    /// Call with the caller's storage and the callee's code.
    CallCode = 0xf2,
    /// Halt returning `memory[offset..offset + size]`.
    Return = 0xf3,
    /// Call keeping sender, value and storage: no value operand.
    DelegateCall = 0xf4,
    /// Create at a salted address: `value, offset, size, salt`.
    Create2 = 0xf5,
    /// Call that may not modify state: no value operand.
    StaticCall = 0xfa,
    /// Halt reverting state, returning `memory[offset..offset + size]`.
    Revert = 0xfd,
    /// Designated invalid instruction.
    Invalid = 0xfe,
    /// Destroy the account, sending its balance to the operand.
    SelfDestruct = 0xff,
}

impl Instruction {
    /// Convert a byte to an instruction.
    #[inline]
    pub fn from_u8(value: u8) -> Option<Self> {
        Self::try_from(value).ok()
    }

    /// `DUPn` for `n` in `1..=16`.
    pub fn dup(n: usize) -> Option<Self> {
        if (1..=16).contains(&n) {
            Self::from_u8(0x7f + n as u8)
        } else {
            None
        }
    }

    /// `SWAPn` for `n` in `1..=16`.
    pub fn swap(n: usize) -> Option<Self> {
        if (1..=16).contains(&n) {
            Self::from_u8(0x8f + n as u8)
        } else {
            None
        }
    }

    /// `PUSHn` for `n` in `1..=32`.
    pub fn push(n: usize) -> Option<Self> {
        if (1..=32).contains(&n) {
            Self::from_u8(0x5f + n as u8)
        } else {
            None
        }
    }

    /// `LOGn` for `n` in `0..=4`.
    pub fn log(n: u8) -> Option<Self> {
        if n <= 4 { Self::from_u8(0xa0 + n) } else { None }
    }

    /// Immediate bytes following the opcode.
    pub fn immediate_size(self) -> usize {
        let byte = u8::from(self);
        if (0x60..=0x7f).contains(&byte) {
            usize::from(byte - 0x5f)
        } else {
            0
        }
    }

    /// Words popped from the stack.
    pub fn args(self) -> usize {
        use Instruction::*;
        let byte = u8::from(self);
        match self {
            Stop | JumpDest | Invalid => 0,
            Add | Mul | Sub | Div | SDiv | Mod | SMod | Exp | SignExtend => 2,
            AddMod | MulMod => 3,
            Lt | Gt | Slt | Sgt | Eq | And | Or | Xor | Byte | Shl | Shr | Sar => 2,
            IsZero | Not => 1,
            Keccak256 => 2,
            Address | Origin | Caller | CallValue | CallDataSize | CodeSize | GasPrice | ReturnDataSize => 0,
            Balance | CallDataLoad | ExtCodeSize | ExtCodeHash | BlockHash => 1,
            CallDataCopy | CodeCopy | ReturnDataCopy => 3,
            ExtCodeCopy => 4,
            Coinbase | Timestamp | Number | Difficulty | GasLimit | ChainId | SelfBalance => 0,
            Pop | MLoad | SLoad | Jump => 1,
            MStore | MStore8 | SStore | JumpI => 2,
            Pc | MSize | Gas => 0,
            Create => 3,
            Call | CallCode => 7,
            DelegateCall | StaticCall => 6,
            Create2 => 4,
            Return | Revert => 2,
            SelfDestruct => 1,
            _ if (0x60..=0x7f).contains(&byte) => 0,
            _ if (0x80..=0x8f).contains(&byte) => usize::from(byte - 0x7f),
            _ if (0x90..=0x9f).contains(&byte) => usize::from(byte - 0x8f) + 1,
            _ => usize::from(byte - 0xa0) + 2,
        }
    }

    /// Words pushed to the stack.
    pub fn rets(self) -> usize {
        use Instruction::*;
        let byte = u8::from(self);
        match self {
            Stop | JumpDest | Invalid | CallDataCopy | CodeCopy | ReturnDataCopy | ExtCodeCopy => 0,
            Pop | MStore | MStore8 | SStore | Jump | JumpI | Return | Revert | SelfDestruct => 0,
            _ if (0x80..=0x8f).contains(&byte) => usize::from(byte - 0x7f) + 1,
            _ if (0x90..=0x9f).contains(&byte) => usize::from(byte - 0x8f) + 1,
            _ if (0xa0..=0xa4).contains(&byte) => 0,
            _ => 1,
        }
    }

    /// Net change of the stack height.
    #[inline]
    pub fn stack_effect(self) -> i64 {
        self.rets() as i64 - self.args() as i64
    }

    /// Whether control never falls through to the next instruction.
    pub fn terminates(self) -> bool {
        matches!(
            self,
            Instruction::Stop
                | Instruction::Jump
                | Instruction::Return
                | Instruction::Revert
                | Instruction::Invalid
                | Instruction::SelfDestruct
        )
    }

    /// Mnemonic for listings.
    pub fn name(self) -> &'static str {
        use Instruction::*;
        match self {
            Stop => "STOP",
            Add => "ADD",
            Mul => "MUL",
            Sub => "SUB",
            Div => "DIV",
            SDiv => "SDIV",
            Mod => "MOD",
            SMod => "SMOD",
            AddMod => "ADDMOD",
            MulMod => "MULMOD",
            Exp => "EXP",
            SignExtend => "SIGNEXTEND",
            Lt => "LT",
            Gt => "GT",
            Slt => "SLT",
            Sgt => "SGT",
            Eq => "EQ",
            IsZero => "ISZERO",
            And => "AND",
            Or => "OR",
            Xor => "XOR",
            Not => "NOT",
            Byte => "BYTE",
            Shl => "SHL",
            Shr => "SHR",
            Sar => "SAR",
            Keccak256 => "KECCAK256",
            Address => "ADDRESS",
            Balance => "BALANCE",
            Origin => "ORIGIN",
            Caller => "CALLER",
            CallValue => "CALLVALUE",
            CallDataLoad => "CALLDATALOAD",
            CallDataSize => "CALLDATASIZE",
            CallDataCopy => "CALLDATACOPY",
            CodeSize => "CODESIZE",
            CodeCopy => "CODECOPY",
            GasPrice => "GASPRICE",
            ExtCodeSize => "EXTCODESIZE",
            ExtCodeCopy => "EXTCODECOPY",
            ReturnDataSize => "RETURNDATASIZE",
            ReturnDataCopy => "RETURNDATACOPY",
            ExtCodeHash => "EXTCODEHASH",
            BlockHash => "BLOCKHASH",
            Coinbase => "COINBASE",
            Timestamp => "TIMESTAMP",
            Number => "NUMBER",
            Difficulty => "DIFFICULTY",
            GasLimit => "GASLIMIT",
            ChainId => "CHAINID",
            SelfBalance => "SELFBALANCE",
            Pop => "POP",
            MLoad => "MLOAD",
            MStore => "MSTORE",
            MStore8 => "MSTORE8",
            SLoad => "SLOAD",
            SStore => "SSTORE",
            Jump => "JUMP",
            JumpI => "JUMPI",
            Pc => "PC",
            MSize => "MSIZE",
            Gas => "GAS",
            JumpDest => "JUMPDEST",
            Push1 => "PUSH1",
            Push2 => "PUSH2",
            Push3 => "PUSH3",
            Push4 => "PUSH4",
            Push5 => "PUSH5",
            Push6 => "PUSH6",
            Push7 => "PUSH7",
            Push8 => "PUSH8",
            Push9 => "PUSH9",
            Push10 => "PUSH10",
            Push11 => "PUSH11",
            Push12 => "PUSH12",
            Push13 => "PUSH13",
            Push14 => "PUSH14",
            Push15 => "PUSH15",
            Push16 => "PUSH16",
            Push17 => "PUSH17",
            Push18 => "PUSH18",
            Push19 => "PUSH19",
            Push20 => "PUSH20",
            Push21 => "PUSH21",
            Push22 => "PUSH22",
            Push23 => "PUSH23",
            Push24 => "PUSH24",
            Push25 => "PUSH25",
            Push26 => "PUSH26",
            Push27 => "PUSH27",
            Push28 => "PUSH28",
            Push29 => "PUSH29",
            Push30 => "PUSH30",
            Push31 => "PUSH31",
            Push32 => "PUSH32",
            Dup1 => "DUP1",
            Dup2 => "DUP2",
            Dup3 => "DUP3",
            Dup4 => "DUP4",
            Dup5 => "DUP5",
            Dup6 => "DUP6",
            Dup7 => "DUP7",
            Dup8 => "DUP8",
            Dup9 => "DUP9",
            Dup10 => "DUP10",
            Dup11 => "DUP11",
            Dup12 => "DUP12",
            Dup13 => "DUP13",
            Dup14 => "DUP14",
            Dup15 => "DUP15",
            Dup16 => "DUP16",
            Swap1 => "SWAP1",
            Swap2 => "SWAP2",
            Swap3 => "SWAP3",
            Swap4 => "SWAP4",
            Swap5 => "SWAP5",
            Swap6 => "SWAP6",
            Swap7 => "SWAP7",
            Swap8 => "SWAP8",
            Swap9 => "SWAP9",
            Swap10 => "SWAP10",
            Swap11 => "SWAP11",
            Swap12 => "SWAP12",
            Swap13 => "SWAP13",
            Swap14 => "SWAP14",
            Swap15 => "SWAP15",
            Swap16 => "SWAP16",
            Log0 => "LOG0",
            Log1 => "LOG1",
            Log2 => "LOG2",
            Log3 => "LOG3",
            Log4 => "LOG4",
            Create => "CREATE",
            Call => "CALL",
            CallCode => "CALLCODE",
            Return => "RETURN",
            DelegateCall => "DELEGATECALL",
            Create2 => "CREATE2",
            StaticCall => "STATICCALL",
            Revert => "REVERT",
            Invalid => "INVALID",
            SelfDestruct => "SELFDESTRUCT",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn byte_round_trip() {
        for byte in 0u8..=255 {
            if let Some(op) = Instruction::from_u8(byte) {
                assert_eq!(u8::from(op), byte);
            }
        }
        assert_eq!(Instruction::from_u8(0x0c), None);
        assert_eq!(Instruction::from_u8(0x5f), None);
    }

    #[test]
    fn families() {
        assert_eq!(Instruction::dup(1), Some(Instruction::Dup1));
        assert_eq!(Instruction::dup(16), Some(Instruction::Dup16));
        assert_eq!(Instruction::dup(17), None);
        assert_eq!(Instruction::swap(0), None);
        assert_eq!(Instruction::swap(16), Some(Instruction::Swap16));
        assert_eq!(Instruction::push(32), Some(Instruction::Push32));
        assert_eq!(Instruction::log(4), Some(Instruction::Log4));
        assert_eq!(Instruction::log(5), None);
    }

    #[test]
    fn stack_effects() {
        assert_eq!(Instruction::Add.stack_effect(), -1);
        assert_eq!(Instruction::Dup3.args(), 3);
        assert_eq!(Instruction::Dup3.rets(), 4);
        assert_eq!(Instruction::Swap2.stack_effect(), 0);
        assert_eq!(Instruction::Call.stack_effect(), -6);
        assert_eq!(Instruction::Log2.args(), 4);
        assert_eq!(Instruction::Push7.immediate_size(), 7);
        assert_eq!(Instruction::Push7.stack_effect(), 1);
        assert_eq!(Instruction::SStore.stack_effect(), -2);
    }

    #[test]
    fn names() {
        assert_eq!(Instruction::Keccak256.name(), "KECCAK256");
        assert_eq!(Instruction::Swap16.name(), "SWAP16");
    }
}
