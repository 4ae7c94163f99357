//! The interpreter and its host API.
//!
//! Every instruction costs one unit of gas. Value-carrying calls add the
//! 2300 stipend to the forwarded gas, and `SSTORE` refuses to run with the
//! stipend or less left. A frame that halts consumes its gas and discards
//! its state changes; a reverting frame only discards its state changes.

use std::rc::Rc;

use num_bigint::BigUint;
use num_traits::{One, ToPrimitive, Zero};
use quill_codegen::Instruction;
use quill_core::keccak256;
use quill_core::num::{from_word_signed, to_u64, to_word, two_pow, u256_max, word_from_bytes, word_to_bytes};
use tracing::{debug, trace};

use crate::assembler::jump_destinations;
use crate::error::{Halt, VmError};
use crate::memory::{Memory, to_usize};
use crate::state::{Address, Log, State};

/// Gas forwarded with every value transfer.
pub const CALL_STIPEND: u64 = 2300;
/// Deepest call nesting.
pub const MAX_CALL_DEPTH: usize = 1024;
/// Most words on a frame's stack.
pub const MAX_STACK: usize = 1024;
/// The identity precompile.
pub const IDENTITY: u64 = 4;
/// Highest reserved precompile address.
const LAST_PRECOMPILE: u64 = 9;

/// Block values visible to executed code.
#[derive(Debug, Clone)]
pub struct BlockEnv {
    pub number: u64,
    pub timestamp: u64,
    pub coinbase: Address,
    pub chain_id: u64,
    pub gas_limit: u64,
    pub gas_price: u64,
    pub difficulty: u64,
}

impl Default for BlockEnv {
    fn default() -> Self {
        Self {
            number: 1,
            timestamp: 1_700_000_000,
            coinbase: Address::from(0xc0ffee),
            chain_id: 1,
            gas_limit: 30_000_000,
            gas_price: 1,
            difficulty: 0,
        }
    }
}

/// Result of a host transaction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExecutionOutcome {
    /// Normal termination. `created` is set by deployments.
    Success {
        output: Vec<u8>,
        created: Option<Address>,
        gas_used: u64,
    },
    /// `REVERT` with its data.
    Revert { data: Vec<u8>, gas_used: u64 },
    /// Exceptional halt.
    Invalid { halt: Halt, gas_used: u64 },
}

impl ExecutionOutcome {
    pub fn is_success(&self) -> bool {
        matches!(self, ExecutionOutcome::Success { .. })
    }

    /// Return data of a successful call, empty otherwise.
    pub fn output(&self) -> &[u8] {
        match self {
            ExecutionOutcome::Success { output, .. } => output,
            _ => &[],
        }
    }

    pub fn created(&self) -> Option<Address> {
        match self {
            ExecutionOutcome::Success { created, .. } => *created,
            _ => None,
        }
    }

    pub fn revert_data(&self) -> Option<&[u8]> {
        match self {
            ExecutionOutcome::Revert { data, .. } => Some(data),
            _ => None,
        }
    }

    pub fn gas_used(&self) -> u64 {
        match self {
            ExecutionOutcome::Success { gas_used, .. }
            | ExecutionOutcome::Revert { gas_used, .. }
            | ExecutionOutcome::Invalid { gas_used, .. } => *gas_used,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum CallKind {
    Call,
    CallCode,
    DelegateCall,
    StaticCall,
    Create,
    Create2,
}

/// One message call or creation.
#[derive(Debug, Clone)]
struct Message {
    kind: CallKind,
    caller: Address,
    /// Account whose storage and balance the code runs against.
    address: Address,
    code_address: Address,
    code: Rc<Vec<u8>>,
    input: Vec<u8>,
    /// Value moved by the message.
    transfer: BigUint,
    /// Value reported by `CALLVALUE`.
    apparent_value: BigUint,
    gas: u64,
    is_static: bool,
    depth: usize,
}

#[derive(Debug)]
enum Status {
    Success,
    Revert,
    Halt(Halt),
}

#[derive(Debug)]
struct FrameResult {
    status: Status,
    output: Vec<u8>,
    gas_left: u64,
    created: Option<Address>,
}

impl FrameResult {
    fn failed(gas_left: u64) -> Self {
        Self {
            status: Status::Revert,
            output: Vec::new(),
            gas_left,
            created: None,
        }
    }

    fn is_success(&self) -> bool {
        matches!(self.status, Status::Success)
    }
}

/// How a frame stopped.
enum Exit {
    Stop,
    Return(Vec<u8>),
    Revert(Vec<u8>),
}

struct Frame {
    message: Message,
    pc: usize,
    stack: Vec<BigUint>,
    memory: Memory,
    gas_left: u64,
    returndata: Vec<u8>,
    jumpdests: Vec<bool>,
}

impl Frame {
    fn new(message: Message) -> Self {
        let jumpdests = jump_destinations(&message.code);
        Self {
            gas_left: message.gas,
            message,
            pc: 0,
            stack: Vec::with_capacity(32),
            memory: Memory::new(),
            returndata: Vec::new(),
            jumpdests,
        }
    }

    fn pop(&mut self) -> Result<BigUint, Halt> {
        self.stack.pop().ok_or(Halt::StackUnderflow)
    }

    fn pop_n<const N: usize>(&mut self) -> Result<[BigUint; N], Halt> {
        if self.stack.len() < N {
            return Err(Halt::StackUnderflow);
        }
        let mut out: [BigUint; N] = std::array::from_fn(|_| BigUint::zero());
        for slot in &mut out {
            *slot = self.pop()?;
        }
        Ok(out)
    }

    fn push(&mut self, value: BigUint) -> Result<(), Halt> {
        if self.stack.len() >= MAX_STACK {
            return Err(Halt::StackOverflow);
        }
        self.stack.push(value);
        Ok(())
    }

    fn push_bool(&mut self, value: bool) -> Result<(), Halt> {
        self.push(if value { BigUint::one() } else { BigUint::zero() })
    }

    fn push_u64(&mut self, value: u64) -> Result<(), Halt> {
        self.push(BigUint::from(value))
    }

    fn jump(&mut self, target: &BigUint) -> Result<(), Halt> {
        let target = to_u64(target)
            .and_then(|value| usize::try_from(value).ok())
            .ok_or(Halt::InvalidJump(usize::MAX))?;
        if !self.jumpdests.get(target).copied().unwrap_or(false) {
            return Err(Halt::InvalidJump(target));
        }
        self.pc = target;
        Ok(())
    }

    fn require_mutable(&self) -> Result<(), Halt> {
        if self.message.is_static {
            Err(Halt::StaticViolation)
        } else {
            Ok(())
        }
    }
}

/// The reference machine: world state plus the host API.
#[derive(Debug, Clone)]
pub struct Vm {
    state: State,
    block: BlockEnv,
    sender: Address,
    gas_limit: u64,
}

impl Default for Vm {
    fn default() -> Self {
        Self::new()
    }
}

impl Vm {
    /// A machine whose default sender holds 10^24 wei.
    pub fn new() -> Self {
        let block = BlockEnv::default();
        let mut vm = Self {
            state: State::default(),
            gas_limit: block.gas_limit,
            block,
            sender: Address::from(0x1_0000),
        };
        let sender = vm.sender;
        vm.set_balance(sender, BigUint::from(10u32).pow(24));
        vm
    }

    pub fn sender(&self) -> Address {
        self.sender
    }

    /// Account that signs subsequent transactions.
    pub fn set_sender(&mut self, sender: Address) {
        self.sender = sender;
    }

    pub fn set_gas_limit(&mut self, gas_limit: u64) {
        self.gas_limit = gas_limit;
    }

    pub fn block_mut(&mut self) -> &mut BlockEnv {
        &mut self.block
    }

    pub fn balance(&self, address: Address) -> BigUint {
        self.state.balance(&address)
    }

    pub fn set_balance(&mut self, address: Address, balance: BigUint) {
        self.state.account_mut(address).balance = balance;
    }

    pub fn code(&self, address: Address) -> Rc<Vec<u8>> {
        self.state.code(&address)
    }

    pub fn storage_at(&self, address: Address, slot: impl Into<BigUint>) -> BigUint {
        self.state.sload(&address, &slot.into())
    }

    /// Every log emitted by committed transactions, oldest first.
    pub fn logs(&self) -> &[Log] {
        self.state.logs()
    }

    /// Run `code` followed by `args` as creation code.
    pub fn deploy(&mut self, code: &[u8], args: &[u8], value: impl Into<BigUint>) -> Result<ExecutionOutcome, VmError> {
        let value = value.into();
        self.check_funds(&value)?;
        let sender = self.sender;
        let nonce = self.state.account_mut(sender).nonce;
        let mut init = code.to_vec();
        init.extend_from_slice(args);
        let message = Message {
            kind: CallKind::Create,
            caller: sender,
            address: Address::create(sender, nonce),
            code_address: Address::default(),
            code: Rc::new(init),
            input: Vec::new(),
            transfer: value.clone(),
            apparent_value: value,
            gas: self.gas_limit,
            is_static: false,
            depth: 0,
        };
        let outcome = self.transact(message);
        debug!(success = outcome.is_success(), created = ?outcome.created(), gas = outcome.gas_used(), "deploy finished");
        Ok(outcome)
    }

    /// Send `calldata` and `value` to the contract at `to`.
    pub fn call(&mut self, to: Address, calldata: &[u8], value: impl Into<BigUint>) -> Result<ExecutionOutcome, VmError> {
        let value = value.into();
        let code = self.state.code(&to);
        if code.is_empty() {
            return Err(VmError::NoCode(to));
        }
        self.check_funds(&value)?;
        let message = Message {
            kind: CallKind::Call,
            caller: self.sender,
            address: to,
            code_address: to,
            code,
            input: calldata.to_vec(),
            transfer: value.clone(),
            apparent_value: value,
            gas: self.gas_limit,
            is_static: false,
            depth: 0,
        };
        let outcome = self.transact(message);
        trace!(%to, success = outcome.is_success(), "call finished");
        Ok(outcome)
    }

    fn check_funds(&self, value: &BigUint) -> Result<(), VmError> {
        if self.state.balance(&self.sender) < *value {
            return Err(VmError::InsufficientBalance {
                account: self.sender,
                value: value.to_string(),
            });
        }
        Ok(())
    }

    fn transact(&mut self, message: Message) -> ExecutionOutcome {
        let gas = message.gas;
        let sender = message.caller;
        let is_call = !matches!(message.kind, CallKind::Create | CallKind::Create2);
        let result = match message.kind {
            CallKind::Create | CallKind::Create2 => self.create(message),
            _ => self.message_call(message),
        };
        // Creation bumps the nonce itself; calls bump it whatever their outcome.
        if is_call {
            self.state.account_mut(sender).nonce += 1;
        }
        self.state.sweep_destructed();
        let gas_used = gas.saturating_sub(result.gas_left);
        match result.status {
            Status::Success => ExecutionOutcome::Success {
                output: result.output,
                created: result.created,
                gas_used,
            },
            Status::Revert => ExecutionOutcome::Revert {
                data: result.output,
                gas_used,
            },
            Status::Halt(halt) => ExecutionOutcome::Invalid { halt, gas_used },
        }
    }

    // =========================================================================
    // Frames
    // =========================================================================

    fn message_call(&mut self, message: Message) -> FrameResult {
        if message.depth > MAX_CALL_DEPTH {
            return FrameResult::failed(message.gas);
        }
        trace!(
            kind = ?message.kind,
            from = %message.caller,
            to = %message.address,
            depth = message.depth,
            gas = message.gas,
            "enter call"
        );
        let checkpoint = self.state.checkpoint();
        if !self.state.transfer(message.caller, message.address, &message.transfer) {
            return FrameResult::failed(message.gas);
        }

        let precompile = message.code_address.to_word().to_u64().filter(|a| (1..=LAST_PRECOMPILE).contains(a));
        let result = match precompile {
            Some(IDENTITY) => FrameResult {
                status: Status::Success,
                output: message.input.clone(),
                gas_left: message.gas,
                created: None,
            },
            Some(_) => FrameResult::failed(message.gas),
            None if message.code.is_empty() => FrameResult {
                status: Status::Success,
                output: Vec::new(),
                gas_left: message.gas,
                created: None,
            },
            None => self.run(message),
        };
        if !result.is_success() {
            self.state.revert_to(checkpoint);
        }
        trace!(status = ?result.status, gas_left = result.gas_left, "leave call");
        result
    }

    fn create(&mut self, message: Message) -> FrameResult {
        if message.depth > MAX_CALL_DEPTH {
            return FrameResult::failed(message.gas);
        }
        let address = message.address;
        let creator = message.caller;
        self.state.account_mut(creator).nonce += 1;
        if self
            .state
            .account(&address)
            .is_some_and(|account| !account.code.is_empty() || account.nonce != 0)
        {
            return FrameResult::failed(0);
        }
        trace!(from = %creator, at = %address, depth = message.depth, "enter create");
        let checkpoint = self.state.checkpoint();
        self.state.account_mut(address).nonce = 1;
        if !self.state.transfer(creator, address, &message.transfer) {
            self.state.revert_to(checkpoint);
            return FrameResult::failed(message.gas);
        }
        let mut result = self.run(message);
        if result.is_success() {
            self.state.account_mut(address).code = Rc::new(std::mem::take(&mut result.output));
            result.created = Some(address);
        } else {
            self.state.revert_to(checkpoint);
        }
        trace!(status = ?result.status, at = %address, "leave create");
        result
    }

    fn run(&mut self, message: Message) -> FrameResult {
        let mut frame = Frame::new(message);
        loop {
            match self.execute_instruction(&mut frame) {
                Ok(None) => {}
                Ok(Some(exit)) => {
                    let (status, output) = match exit {
                        Exit::Stop => (Status::Success, Vec::new()),
                        Exit::Return(data) => (Status::Success, data),
                        Exit::Revert(data) => (Status::Revert, data),
                    };
                    return FrameResult {
                        status,
                        output,
                        gas_left: frame.gas_left,
                        created: None,
                    };
                }
                Err(halt) => {
                    trace!(%halt, pc = frame.pc, "frame halted");
                    return FrameResult {
                        status: Status::Halt(halt),
                        output: Vec::new(),
                        gas_left: 0,
                        created: None,
                    };
                }
            }
        }
    }

    fn execute_instruction(&mut self, frame: &mut Frame) -> Result<Option<Exit>, Halt> {
        let Some(&byte) = frame.message.code.get(frame.pc) else {
            return Ok(Some(Exit::Stop));
        };
        if frame.gas_left == 0 {
            return Err(Halt::OutOfGas);
        }
        frame.gas_left -= 1;
        let instruction = Instruction::from_u8(byte).ok_or(Halt::InvalidInstruction(byte))?;
        frame.pc += 1;

        match instruction {
            Instruction::Stop => return Ok(Some(Exit::Stop)),

            Instruction::Add => {
                let [a, b] = frame.pop_n()?;
                frame.push((a + b) & u256_max())?;
            }
            Instruction::Mul => {
                let [a, b] = frame.pop_n()?;
                frame.push((a * b) & u256_max())?;
            }
            Instruction::Sub => {
                let [a, b] = frame.pop_n()?;
                frame.push(wrapping_sub(a, b))?;
            }
            Instruction::Div => {
                let [a, b] = frame.pop_n()?;
                frame.push(if b.is_zero() { b } else { a / b })?;
            }
            Instruction::SDiv => {
                let [a, b] = frame.pop_n()?;
                let value = if b.is_zero() {
                    BigUint::zero()
                } else {
                    to_word(&(from_word_signed(&a) / from_word_signed(&b)))
                };
                frame.push(value)?;
            }
            Instruction::Mod => {
                let [a, b] = frame.pop_n()?;
                frame.push(if b.is_zero() { b } else { a % b })?;
            }
            Instruction::SMod => {
                let [a, b] = frame.pop_n()?;
                let value = if b.is_zero() {
                    BigUint::zero()
                } else {
                    to_word(&(from_word_signed(&a) % from_word_signed(&b)))
                };
                frame.push(value)?;
            }
            Instruction::AddMod => {
                let [a, b, n] = frame.pop_n()?;
                frame.push(if n.is_zero() { n } else { (a + b) % n })?;
            }
            Instruction::MulMod => {
                let [a, b, n] = frame.pop_n()?;
                frame.push(if n.is_zero() { n } else { (a * b) % n })?;
            }
            Instruction::Exp => {
                let [base, exponent] = frame.pop_n()?;
                frame.push(base.modpow(&exponent, &two_pow(256)))?;
            }
            Instruction::SignExtend => {
                let [b, x] = frame.pop_n()?;
                frame.push(sign_extend(&b, x))?;
            }

            Instruction::Lt => {
                let [a, b] = frame.pop_n()?;
                frame.push_bool(a < b)?;
            }
            Instruction::Gt => {
                let [a, b] = frame.pop_n()?;
                frame.push_bool(a > b)?;
            }
            Instruction::Slt => {
                let [a, b] = frame.pop_n()?;
                frame.push_bool(from_word_signed(&a) < from_word_signed(&b))?;
            }
            Instruction::Sgt => {
                let [a, b] = frame.pop_n()?;
                frame.push_bool(from_word_signed(&a) > from_word_signed(&b))?;
            }
            Instruction::Eq => {
                let [a, b] = frame.pop_n()?;
                frame.push_bool(a == b)?;
            }
            Instruction::IsZero => {
                let a = frame.pop()?;
                frame.push_bool(a.is_zero())?;
            }
            Instruction::And => {
                let [a, b] = frame.pop_n()?;
                frame.push(a & b)?;
            }
            Instruction::Or => {
                let [a, b] = frame.pop_n()?;
                frame.push(a | b)?;
            }
            Instruction::Xor => {
                let [a, b] = frame.pop_n()?;
                frame.push(a ^ b)?;
            }
            Instruction::Not => {
                let a = frame.pop()?;
                frame.push(u256_max() ^ a)?;
            }
            Instruction::Byte => {
                let [index, x] = frame.pop_n()?;
                let value = match index.to_usize() {
                    Some(index) if index < 32 => BigUint::from(word_to_bytes(&x)[index]),
                    _ => BigUint::zero(),
                };
                frame.push(value)?;
            }
            Instruction::Shl => {
                let [shift, value] = frame.pop_n()?;
                let result = match shift.to_u32() {
                    Some(shift) if shift < 256 => (value << shift) & u256_max(),
                    _ => BigUint::zero(),
                };
                frame.push(result)?;
            }
            Instruction::Shr => {
                let [shift, value] = frame.pop_n()?;
                let result = match shift.to_u32() {
                    Some(shift) if shift < 256 => value >> shift,
                    _ => BigUint::zero(),
                };
                frame.push(result)?;
            }
            Instruction::Sar => {
                let [shift, value] = frame.pop_n()?;
                let signed = from_word_signed(&value);
                let shift = shift.to_u32().filter(|shift| *shift < 256).unwrap_or(256);
                frame.push(to_word(&(signed >> shift)))?;
            }

            Instruction::Keccak256 => {
                let [offset, size] = frame.pop_n()?;
                let data = frame.memory.read(&offset, &size)?;
                frame.push(word_from_bytes(&keccak256(&data)))?;
            }

            Instruction::Address => {
                let address = frame.message.address.to_word();
                frame.push(address)?;
            }
            Instruction::Balance => {
                let address = Address::from_word(&frame.pop()?);
                frame.push(self.state.balance(&address))?;
            }
            Instruction::Origin => frame.push(self.sender.to_word())?,
            Instruction::Caller => {
                let caller = frame.message.caller.to_word();
                frame.push(caller)?;
            }
            Instruction::CallValue => {
                let value = frame.message.apparent_value.clone();
                frame.push(value)?;
            }
            Instruction::CallDataLoad => {
                let offset = frame.pop()?;
                let mut word = [0u8; 32];
                if let Some(start) = offset.to_usize() {
                    for (index, byte) in word.iter_mut().enumerate() {
                        *byte = start
                            .checked_add(index)
                            .and_then(|position| frame.message.input.get(position))
                            .copied()
                            .unwrap_or(0);
                    }
                }
                frame.push(word_from_bytes(&word))?;
            }
            Instruction::CallDataSize => {
                let size = frame.message.input.len() as u64;
                frame.push_u64(size)?;
            }
            Instruction::CallDataCopy => {
                let [dest, offset, size] = frame.pop_n()?;
                frame.memory.copy_from(&dest, &frame.message.input, &offset, &size)?;
            }
            Instruction::CodeSize => {
                let size = frame.message.code.len() as u64;
                frame.push_u64(size)?;
            }
            Instruction::CodeCopy => {
                let [dest, offset, size] = frame.pop_n()?;
                let code = Rc::clone(&frame.message.code);
                frame.memory.copy_from(&dest, &code, &offset, &size)?;
            }
            Instruction::GasPrice => frame.push_u64(self.block.gas_price)?,
            Instruction::ExtCodeSize => {
                let address = Address::from_word(&frame.pop()?);
                frame.push_u64(self.state.code(&address).len() as u64)?;
            }
            Instruction::ExtCodeCopy => {
                let [address, dest, offset, size] = frame.pop_n()?;
                let code = self.state.code(&Address::from_word(&address));
                frame.memory.copy_from(&dest, &code, &offset, &size)?;
            }
            Instruction::ReturnDataSize => {
                let size = frame.returndata.len() as u64;
                frame.push_u64(size)?;
            }
            Instruction::ReturnDataCopy => {
                let [dest, offset, size] = frame.pop_n()?;
                let end = offset.clone() + &size;
                if end > BigUint::from(frame.returndata.len()) {
                    return Err(Halt::ReturnDataOutOfBounds);
                }
                frame.memory.copy_from(&dest, &frame.returndata, &offset, &size)?;
            }
            Instruction::ExtCodeHash => {
                let address = Address::from_word(&frame.pop()?);
                let hash = if self.state.exists(&address) {
                    word_from_bytes(&keccak256(&self.state.code(&address)))
                } else {
                    BigUint::zero()
                };
                frame.push(hash)?;
            }
            Instruction::BlockHash => {
                let number = frame.pop()?;
                let hash = match number.to_u64() {
                    Some(n) if n < self.block.number && self.block.number - n <= 256 => {
                        word_from_bytes(&keccak256(&word_to_bytes(&number)))
                    }
                    _ => BigUint::zero(),
                };
                frame.push(hash)?;
            }
            Instruction::Coinbase => frame.push(self.block.coinbase.to_word())?,
            Instruction::Timestamp => frame.push_u64(self.block.timestamp)?,
            Instruction::Number => frame.push_u64(self.block.number)?,
            Instruction::Difficulty => frame.push_u64(self.block.difficulty)?,
            Instruction::GasLimit => frame.push_u64(self.block.gas_limit)?,
            Instruction::ChainId => frame.push_u64(self.block.chain_id)?,
            Instruction::SelfBalance => {
                let balance = self.state.balance(&frame.message.address);
                frame.push(balance)?;
            }

            Instruction::Pop => {
                frame.pop()?;
            }
            Instruction::MLoad => {
                let offset = frame.pop()?;
                let value = frame.memory.load(&offset)?;
                frame.push(value)?;
            }
            Instruction::MStore => {
                let [offset, value] = frame.pop_n()?;
                frame.memory.store(&offset, &value)?;
            }
            Instruction::MStore8 => {
                let [offset, value] = frame.pop_n()?;
                frame.memory.store_byte(&offset, &value)?;
            }
            Instruction::SLoad => {
                let key = frame.pop()?;
                let value = self.state.sload(&frame.message.address, &key);
                frame.push(value)?;
            }
            Instruction::SStore => {
                frame.require_mutable()?;
                if frame.gas_left <= CALL_STIPEND {
                    return Err(Halt::OutOfGas);
                }
                let [key, value] = frame.pop_n()?;
                self.state.sstore(frame.message.address, key, value);
            }
            Instruction::Jump => {
                let target = frame.pop()?;
                frame.jump(&target)?;
            }
            Instruction::JumpI => {
                let [target, condition] = frame.pop_n()?;
                if !condition.is_zero() {
                    frame.jump(&target)?;
                }
            }
            Instruction::Pc => {
                let pc = (frame.pc - 1) as u64;
                frame.push_u64(pc)?;
            }
            Instruction::MSize => {
                let size = frame.memory.len() as u64;
                frame.push_u64(size)?;
            }
            Instruction::Gas => {
                let gas = frame.gas_left;
                frame.push_u64(gas)?;
            }
            Instruction::JumpDest => {}

            Instruction::Create | Instruction::Create2 => {
                frame.require_mutable()?;
                let (value, offset, size, salt) = if instruction == Instruction::Create {
                    let [value, offset, size] = frame.pop_n()?;
                    (value, offset, size, None)
                } else {
                    let [value, offset, size, salt] = frame.pop_n()?;
                    (value, offset, size, Some(salt))
                };
                let init = frame.memory.read(&offset, &size)?;
                let creator = frame.message.address;
                frame.returndata.clear();
                if self.state.balance(&creator) < value || frame.message.depth >= MAX_CALL_DEPTH {
                    frame.push(BigUint::zero())?;
                    return Ok(None);
                }
                let address = match &salt {
                    Some(salt) => Address::create2(creator, salt, &init),
                    None => Address::create(creator, self.state.account_mut(creator).nonce),
                };
                let gas = frame.gas_left - frame.gas_left / 64;
                frame.gas_left -= gas;
                let result = self.create(Message {
                    kind: if salt.is_some() { CallKind::Create2 } else { CallKind::Create },
                    caller: creator,
                    address,
                    code_address: Address::default(),
                    code: Rc::new(init),
                    input: Vec::new(),
                    transfer: value.clone(),
                    apparent_value: value,
                    gas,
                    is_static: false,
                    depth: frame.message.depth + 1,
                });
                frame.gas_left += result.gas_left;
                match result.created {
                    Some(address) => frame.push(address.to_word())?,
                    None => {
                        if matches!(result.status, Status::Revert) {
                            frame.returndata = result.output;
                        }
                        frame.push(BigUint::zero())?;
                    }
                }
            }
            Instruction::Call | Instruction::CallCode | Instruction::DelegateCall | Instruction::StaticCall => {
                self.execute_call(frame, instruction)?;
            }
            Instruction::Return => {
                let [offset, size] = frame.pop_n()?;
                return Ok(Some(Exit::Return(frame.memory.read(&offset, &size)?)));
            }
            Instruction::Revert => {
                let [offset, size] = frame.pop_n()?;
                return Ok(Some(Exit::Revert(frame.memory.read(&offset, &size)?)));
            }
            Instruction::Invalid => return Err(Halt::InvalidInstruction(byte)),
            Instruction::SelfDestruct => {
                frame.require_mutable()?;
                let beneficiary = Address::from_word(&frame.pop()?);
                let address = frame.message.address;
                let balance = self.state.balance(&address);
                self.state.account_mut(address).balance = BigUint::zero();
                if beneficiary != address {
                    self.state.account_mut(beneficiary).balance += balance;
                }
                self.state.mark_destructed(address);
                return Ok(Some(Exit::Stop));
            }

            _ if instruction.immediate_size() > 0 => {
                let size = instruction.immediate_size();
                let code = &frame.message.code;
                let mut immediate = vec![0u8; size];
                for (index, byte) in immediate.iter_mut().enumerate() {
                    *byte = code.get(frame.pc + index).copied().unwrap_or(0);
                }
                frame.pc += size;
                frame.push(word_from_bytes(&immediate))?;
            }
            _ if (0x80..=0x8f).contains(&byte) => {
                let depth = usize::from(byte - 0x7f);
                let value = frame
                    .stack
                    .len()
                    .checked_sub(depth)
                    .map(|index| frame.stack[index].clone())
                    .ok_or(Halt::StackUnderflow)?;
                frame.push(value)?;
            }
            _ if (0x90..=0x9f).contains(&byte) => {
                let depth = usize::from(byte - 0x8f);
                let top = frame.stack.len().checked_sub(1).ok_or(Halt::StackUnderflow)?;
                let other = top.checked_sub(depth).ok_or(Halt::StackUnderflow)?;
                frame.stack.swap(top, other);
            }
            _ if (0xa0..=0xa4).contains(&byte) => {
                frame.require_mutable()?;
                let [offset, size] = frame.pop_n()?;
                let mut topics = Vec::with_capacity(usize::from(byte - 0xa0));
                for _ in 0..byte - 0xa0 {
                    topics.push(frame.pop()?);
                }
                let data = frame.memory.read(&offset, &size)?;
                self.state.push_log(Log {
                    address: frame.message.address,
                    topics,
                    data,
                });
            }
            _ => return Err(Halt::InvalidInstruction(byte)),
        }
        Ok(None)
    }

    fn execute_call(&mut self, frame: &mut Frame, instruction: Instruction) -> Result<(), Halt> {
        let gas = frame.pop()?;
        let target = Address::from_word(&frame.pop()?);
        let value = match instruction {
            Instruction::Call | Instruction::CallCode => frame.pop()?,
            _ => BigUint::zero(),
        };
        let [in_offset, in_size, out_offset, out_size] = frame.pop_n()?;
        if instruction == Instruction::Call && frame.message.is_static && !value.is_zero() {
            return Err(Halt::StaticViolation);
        }
        let input = frame.memory.read(&in_offset, &in_size)?;
        // Touch the output range so an invalid one halts before the call.
        frame.memory.read(&out_offset, &out_size)?;
        frame.returndata.clear();

        let available = frame.gas_left - frame.gas_left / 64;
        let mut forwarded = gas.to_u64().map_or(available, |gas| gas.min(available));
        frame.gas_left -= forwarded;
        if !value.is_zero() {
            forwarded += CALL_STIPEND;
        }

        let current = &frame.message;
        let (caller, address, transfer, apparent_value, is_static) = match instruction {
            Instruction::Call => (current.address, target, value.clone(), value, current.is_static),
            Instruction::CallCode => (current.address, current.address, BigUint::zero(), value, current.is_static),
            Instruction::DelegateCall => (
                current.caller,
                current.address,
                BigUint::zero(),
                current.apparent_value.clone(),
                current.is_static,
            ),
            _ => (current.address, target, BigUint::zero(), BigUint::zero(), true),
        };
        let depth = current.depth + 1;
        let kind = match instruction {
            Instruction::CallCode => CallKind::CallCode,
            Instruction::DelegateCall => CallKind::DelegateCall,
            Instruction::StaticCall => CallKind::StaticCall,
            _ => CallKind::Call,
        };
        let funded = instruction != Instruction::CallCode || self.state.balance(&current.address) >= apparent_value;
        let result = if depth > MAX_CALL_DEPTH || !funded {
            FrameResult::failed(forwarded)
        } else {
            self.message_call(Message {
                kind,
                caller,
                address,
                code_address: target,
                code: self.state.code(&target),
                input,
                transfer,
                apparent_value,
                gas: forwarded,
                is_static,
                depth,
            })
        };

        frame.gas_left += result.gas_left;
        let success = result.is_success();
        let size = to_usize(&out_size)?.min(result.output.len());
        frame
            .memory
            .copy_from(&out_offset, &result.output, &BigUint::zero(), &BigUint::from(size))?;
        frame.returndata = result.output;
        frame.push_bool(success)
    }
}

fn wrapping_sub(a: BigUint, b: BigUint) -> BigUint {
    if a >= b {
        a - b
    } else {
        two_pow(256) - (b - a)
    }
}

fn sign_extend(byte: &BigUint, value: BigUint) -> BigUint {
    let Some(byte) = byte.to_u32().filter(|byte| *byte < 31) else {
        return value;
    };
    let bit = 8 * byte + 7;
    let mask = two_pow(bit + 1) - BigUint::one();
    if value.bit(u64::from(bit)) {
        value | (u256_max() ^ mask)
    } else {
        value & mask
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::assembler::assemble;
    use pretty_assertions::assert_eq;
    use quill_codegen::Assembly;

    /// Runtime code returning the word computed by `body` (which leaves it
    /// on the stack).
    fn returning(body: impl FnOnce(&mut Assembly)) -> Vec<u8> {
        let mut asm = Assembly::new();
        body(&mut asm);
        asm.push(0u32);
        asm.op(Instruction::MStore);
        asm.push(32u32);
        asm.push(0u32);
        asm.op(Instruction::Return);
        assemble(&asm).unwrap().code
    }

    /// Creation code returning `runtime` verbatim:
    /// `codecopy(0, 15, len) return(0, len)`.
    fn deployer(runtime: &[u8]) -> Vec<u8> {
        let size = (runtime.len() as u16).to_be_bytes();
        let mut code = vec![0x61, size[0], size[1], 0x61, 0x00, 0x0f, 0x60, 0x00, 0x39];
        code.extend_from_slice(&[0x61, size[0], size[1], 0x60, 0x00, 0xf3]);
        assert_eq!(code.len(), 15);
        code.extend_from_slice(runtime);
        code
    }

    fn word(output: &[u8]) -> BigUint {
        word_from_bytes(output)
    }

    fn run_word(body: impl FnOnce(&mut Assembly)) -> BigUint {
        let mut vm = Vm::new();
        let created = vm.deploy(&deployer(&returning(body)), &[], 0u32).unwrap().created().unwrap();
        word(vm.call(created, &[], 0u32).unwrap().output())
    }

    fn binary(op: Instruction, a: BigUint, b: BigUint) -> BigUint {
        run_word(|asm| {
            asm.push(b);
            asm.push(a);
            asm.op(op);
        })
    }

    #[test]
    fn arithmetic_wraps_at_256_bits() {
        assert_eq!(binary(Instruction::Add, u256_max(), BigUint::from(2u32)), BigUint::one());
        assert_eq!(binary(Instruction::Sub, BigUint::zero(), BigUint::one()), u256_max());
        assert_eq!(binary(Instruction::Div, BigUint::from(7u32), BigUint::zero()), BigUint::zero());
        assert_eq!(binary(Instruction::Exp, BigUint::from(2u32), BigUint::from(256u32)), BigUint::zero());
    }

    #[test]
    fn signed_operations_use_twos_complement() {
        let minus_eight = u256_max() - BigUint::from(7u32);
        let minus_two = u256_max() - BigUint::one();
        assert_eq!(
            binary(Instruction::SDiv, minus_eight.clone(), BigUint::from(3u32)),
            minus_two
        );
        assert_eq!(binary(Instruction::Slt, minus_eight.clone(), BigUint::one()), BigUint::one());
        assert_eq!(
            binary(Instruction::Sar, BigUint::from(1u32), minus_eight),
            u256_max() - BigUint::from(3u32)
        );
        assert_eq!(
            binary(Instruction::SignExtend, BigUint::zero(), BigUint::from(0xffu32)),
            u256_max()
        );
    }

    #[test]
    fn storage_persists_between_calls() {
        let runtime = {
            let mut asm = Assembly::new();
            asm.push(0u32);
            asm.op(Instruction::SLoad);
            asm.push(1u32);
            asm.op(Instruction::Add);
            asm.push(0u32);
            asm.op(Instruction::SStore);
            asm.op(Instruction::Stop);
            assemble(&asm).unwrap().code
        };
        let mut vm = Vm::new();
        let created = vm.deploy(&deployer(&runtime), &[], 0u32).unwrap().created().unwrap();
        vm.call(created, &[], 0u32).unwrap();
        vm.call(created, &[], 0u32).unwrap();
        assert_eq!(vm.storage_at(created, 0u32), BigUint::from(2u32));
    }

    #[test]
    fn revert_discards_storage_writes() {
        let runtime = {
            let mut asm = Assembly::new();
            asm.push(5u32);
            asm.push(0u32);
            asm.op(Instruction::SStore);
            asm.push(0u32);
            asm.push(0u32);
            asm.op(Instruction::Revert);
            assemble(&asm).unwrap().code
        };
        let mut vm = Vm::new();
        let created = vm.deploy(&deployer(&runtime), &[], 0u32).unwrap().created().unwrap();
        let outcome = vm.call(created, &[], 0u32).unwrap();
        assert_eq!(outcome.revert_data(), Some(&[][..]));
        assert!(vm.storage_at(created, 0u32).is_zero());
    }

    #[test]
    fn jumps_must_land_on_jumpdests() {
        let runtime = {
            let mut asm = Assembly::new();
            asm.push(1u32);
            asm.op(Instruction::Jump);
            assemble(&asm).unwrap().code
        };
        let mut vm = Vm::new();
        let created = vm.deploy(&deployer(&runtime), &[], 0u32).unwrap().created().unwrap();
        let outcome = vm.call(created, &[], 0u32).unwrap();
        assert!(matches!(
            outcome,
            ExecutionOutcome::Invalid {
                halt: Halt::InvalidJump(1),
                ..
            }
        ));
    }

    #[test]
    fn identity_precompile_echoes_its_input() {
        let output = run_word(|asm| {
            asm.push(0xabcdu32);
            asm.push(0u32);
            asm.op(Instruction::MStore);
            // staticcall(gas, 4, 0, 32, 32, 32)
            asm.push(32u32);
            asm.push(32u32);
            asm.push(32u32);
            asm.push(0u32);
            asm.push(IDENTITY);
            asm.op(Instruction::Gas);
            asm.op(Instruction::StaticCall);
            asm.op(Instruction::Pop);
            asm.push(32u32);
            asm.op(Instruction::MLoad);
        });
        assert_eq!(output, BigUint::from(0xabcdu32));
    }

    #[test]
    fn unknown_targets_are_host_errors() {
        let mut vm = Vm::new();
        assert_eq!(
            vm.call(Address::from(77), &[], 0u32).unwrap_err(),
            VmError::NoCode(Address::from(77))
        );
    }

    #[test]
    fn value_transfers_need_funds() {
        let mut vm = Vm::new();
        vm.set_balance(vm.sender(), BigUint::from(3u32));
        let err = vm.deploy(&[0x00], &[], 5u32).unwrap_err();
        assert!(matches!(err, VmError::InsufficientBalance { .. }));
    }

    #[test]
    fn stipend_does_not_allow_storage_writes() {
        let receiver = {
            let mut asm = Assembly::new();
            asm.push(1u32);
            asm.push(0u32);
            asm.op(Instruction::SStore);
            asm.op(Instruction::Stop);
            assemble(&asm).unwrap().code
        };
        let mut vm = Vm::new();
        let target = vm.deploy(&deployer(&receiver), &[], 0u32).unwrap().created().unwrap();

        // call(0, target, 1, 0, 0, 0, 0) leaves only the stipend to the receiver
        let sender = returning(|asm| {
            for _ in 0..4 {
                asm.push(0u32);
            }
            asm.push(1u32);
            asm.push(target.to_word());
            asm.push(0u32);
            asm.op(Instruction::Call);
        });
        let created = vm.deploy(&deployer(&sender), &[], 10u32).unwrap().created().unwrap();
        let outcome = vm.call(created, &[], 0u32).unwrap();
        assert_eq!(word(outcome.output()), BigUint::zero());
        assert!(vm.storage_at(target, 0u32).is_zero());
        assert_eq!(vm.balance(created), BigUint::from(10u32));
        assert!(vm.balance(target).is_zero());
    }

    #[test]
    fn logs_record_topics_in_order() {
        let runtime = {
            let mut asm = Assembly::new();
            asm.push(2u32);
            asm.push(1u32);
            asm.push(0u32);
            asm.push(0u32);
            asm.op(Instruction::Log2);
            asm.op(Instruction::Stop);
            assemble(&asm).unwrap().code
        };
        let mut vm = Vm::new();
        let created = vm.deploy(&deployer(&runtime), &[], 0u32).unwrap().created().unwrap();
        vm.call(created, &[], 0u32).unwrap();
        assert_eq!(vm.logs().len(), 1);
        assert_eq!(vm.logs()[0].topics, vec![BigUint::from(1u32), BigUint::from(2u32)]);
        assert_eq!(vm.logs()[0].address, created);
    }
}
