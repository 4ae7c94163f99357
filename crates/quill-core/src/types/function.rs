//! Function types and the call-kind tag.
//!
//! A [`FunctionType`] describes a callable signature together with how the
//! code generator has to lower a call to it. Chained call options (`.gas(x)`,
//! `.value(y)`, `.salt(z)`) are recorded as [`CallOptions`] flags; the option
//! values themselves live on the stack in the fixed order gas, value, salt,
//! so the order in which the options were written does not matter.

use bitflags::bitflags;

use crate::env::{ContractId, EventId, FunctionId, TypeEnv, VariableId};
use crate::hash::selector_value;
use crate::types::{DataLocation, StateMutability, Type};

/// How a call to a function value is lowered.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FunctionKind {
    /// Jump to a subroutine in the same code.
    Internal,
    /// Message call through the ABI.
    External,
    /// Library call through `delegatecall`.
    DelegateCall,
    /// `address.call(bytes)`.
    BareCall,
    /// `address.callcode(bytes)`.
    BareCallCode,
    /// `address.delegatecall(bytes)`.
    BareDelegateCall,
    /// `address.staticcall(bytes)`.
    BareStaticCall,
    /// `new C(...)`.
    Creation,
    /// `address.send(amount)`.
    Send,
    /// `address.transfer(amount)`.
    Transfer,
    /// `keccak256(bytes)`.
    Keccak256,
    /// `selfdestruct(recipient)`.
    SelfDestruct,
    /// `revert()` / `revert(reason)`.
    Revert,
    /// `ecrecover(hash, v, r, s)`.
    EcRecover,
    /// `sha256(bytes)`.
    Sha256,
    /// `ripemd160(bytes)`.
    Ripemd160,
    /// `log0` .. `log4`.
    Log(u8),
    /// `emit E(...)`.
    Event,
    /// `.gas(x)` on an external function.
    SetGas,
    /// `.value(x)` on an external function.
    SetValue,
    /// `.salt(x)` on a creation function.
    SetSalt,
    /// `blockhash(number)`.
    BlockHash,
    /// `addmod(x, y, k)`.
    AddMod,
    /// `mulmod(x, y, k)`.
    MulMod,
    /// `array.push(value)` on a storage array.
    ArrayPush,
    /// `array.pop()` on a storage array.
    ArrayPop,
    /// `bytes.push(value)` on a storage byte array.
    ByteArrayPush,
    /// `gasleft()`.
    GasLeft,
    /// `assert(condition)`.
    Assert,
    /// `require(condition)` / `require(condition, reason)`.
    Require,
    /// `abi.encode(...)`.
    AbiEncode,
    /// `abi.encodePacked(...)`.
    AbiEncodePacked,
    /// `abi.encodeWithSelector(selector, ...)`.
    AbiEncodeWithSelector,
    /// `abi.encodeWithSignature(signature, ...)`.
    AbiEncodeWithSignature,
    /// `abi.decode(data, (types...))`.
    AbiDecode,
    /// `new T[](length)` in memory.
    ObjectCreation,
}

impl FunctionKind {
    /// Lower-case tag used in identifiers.
    pub fn identifier(self) -> String {
        match self {
            FunctionKind::Internal => "internal".into(),
            FunctionKind::External => "external".into(),
            FunctionKind::DelegateCall => "delegatecall".into(),
            FunctionKind::BareCall => "barecall".into(),
            FunctionKind::BareCallCode => "barecallcode".into(),
            FunctionKind::BareDelegateCall => "baredelegatecall".into(),
            FunctionKind::BareStaticCall => "barestaticcall".into(),
            FunctionKind::Creation => "creation".into(),
            FunctionKind::Send => "send".into(),
            FunctionKind::Transfer => "transfer".into(),
            FunctionKind::Keccak256 => "keccak256".into(),
            FunctionKind::SelfDestruct => "selfdestruct".into(),
            FunctionKind::Revert => "revert".into(),
            FunctionKind::EcRecover => "ecrecover".into(),
            FunctionKind::Sha256 => "sha256".into(),
            FunctionKind::Ripemd160 => "ripemd160".into(),
            FunctionKind::Log(n) => format!("log{n}"),
            FunctionKind::Event => "event".into(),
            FunctionKind::SetGas => "setgas".into(),
            FunctionKind::SetValue => "setvalue".into(),
            FunctionKind::SetSalt => "setsalt".into(),
            FunctionKind::BlockHash => "blockhash".into(),
            FunctionKind::AddMod => "addmod".into(),
            FunctionKind::MulMod => "mulmod".into(),
            FunctionKind::ArrayPush => "arraypush".into(),
            FunctionKind::ArrayPop => "arraypop".into(),
            FunctionKind::ByteArrayPush => "bytearraypush".into(),
            FunctionKind::GasLeft => "gasleft".into(),
            FunctionKind::Assert => "assert".into(),
            FunctionKind::Require => "require".into(),
            FunctionKind::AbiEncode => "abiencode".into(),
            FunctionKind::AbiEncodePacked => "abiencodepacked".into(),
            FunctionKind::AbiEncodeWithSelector => "abiencodewithselector".into(),
            FunctionKind::AbiEncodeWithSignature => "abiencodewithsignature".into(),
            FunctionKind::AbiDecode => "abidecode".into(),
            FunctionKind::ObjectCreation => "objectcreation".into(),
        }
    }

    /// `call`, `callcode`, `delegatecall` or `staticcall` on an address.
    pub fn is_bare_call(self) -> bool {
        matches!(
            self,
            FunctionKind::BareCall
                | FunctionKind::BareCallCode
                | FunctionKind::BareDelegateCall
                | FunctionKind::BareStaticCall
        )
    }

    /// Calls that leave the current code through a message call.
    pub fn is_external_call(self) -> bool {
        matches!(self, FunctionKind::External | FunctionKind::DelegateCall) || self.is_bare_call()
    }
}

bitflags! {
    /// Call options attached to a function value.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct CallOptions: u8 {
        /// Explicit gas stipend on the stack.
        const GAS = 0x01;
        /// Explicit value on the stack.
        const VALUE = 0x02;
        /// `create2` salt on the stack.
        const SALT = 0x04;
        /// First parameter is bound to a receiver (`using L for T`).
        const BOUND = 0x08;
    }
}

/// The declaration a function type was derived from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FunctionOrigin {
    /// A function definition.
    Function(FunctionId),
    /// An event definition.
    Event(EventId),
    /// The accessor of a public state variable.
    Getter(VariableId),
    /// The constructor of a contract, for `new C`.
    Constructor(ContractId),
}

/// A callable signature and its call convention.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct FunctionType {
    /// Call convention.
    pub kind: FunctionKind,
    /// Parameter types; the first is the receiver when bound.
    pub params: Vec<Type>,
    /// Return types.
    pub returns: Vec<Type>,
    /// Parameter names, possibly empty strings.
    pub param_names: Vec<String>,
    /// Return names, possibly empty strings.
    pub return_names: Vec<String>,
    /// State mutability.
    pub mutability: StateMutability,
    /// Declaration this type was derived from.
    pub origin: Option<FunctionOrigin>,
    /// Accepts any number of arguments of any type (`abi.encode`, `keccak256` style builtins).
    pub arbitrary_parameters: bool,
    /// Options already applied.
    pub options: CallOptions,
}

impl FunctionType {
    /// A builtin of `kind` with unnamed parameters.
    pub fn builtin(kind: FunctionKind, params: Vec<Type>, returns: Vec<Type>, mutability: StateMutability) -> Self {
        let param_names = vec![String::new(); params.len()];
        let return_names = vec![String::new(); returns.len()];
        Self {
            kind,
            params,
            returns,
            param_names,
            return_names,
            mutability,
            origin: None,
            arbitrary_parameters: false,
            options: CallOptions::empty(),
        }
    }

    /// Mark the builtin as taking arbitrary arguments after the fixed ones.
    pub fn with_arbitrary_parameters(mut self) -> Self {
        self.arbitrary_parameters = true;
        self
    }

    /// Type of a declared function. External types take their reference
    /// parameters and returns in memory, since that is where the caller
    /// encodes from and decodes into.
    pub fn from_declaration(env: &TypeEnv, id: FunctionId, external: bool) -> Self {
        let def = env.function(id);
        let in_library = def
            .contract
            .is_some_and(|c| env.contract(c).kind == crate::env::ContractKind::Library);
        let kind = match (external, in_library) {
            (false, _) => FunctionKind::Internal,
            (true, true) => FunctionKind::DelegateCall,
            (true, false) => FunctionKind::External,
        };
        let convert = |ty: &Type| {
            if external {
                ty.with_location(DataLocation::Memory, true)
            } else {
                ty.clone()
            }
        };
        Self {
            kind,
            params: def.params.iter().map(|p| convert(&p.ty)).collect(),
            returns: def.returns.iter().map(|p| convert(&p.ty)).collect(),
            param_names: def.params.iter().map(|p| p.name.clone()).collect(),
            return_names: def.returns.iter().map(|p| p.name.clone()).collect(),
            mutability: def.mutability,
            origin: Some(FunctionOrigin::Function(id)),
            arbitrary_parameters: false,
            options: CallOptions::empty(),
        }
    }

    /// Accessor type of a public state variable: one parameter per mapping
    /// key and array index, returning the final value (or the returnable
    /// members of a struct).
    pub fn for_getter(env: &TypeEnv, id: VariableId) -> Self {
        let def = env.variable(id);
        let mut params = Vec::new();
        let mut ty = def.ty.clone();
        loop {
            match ty {
                Type::Mapping(mapping) => {
                    params.push(mapping.key.with_location(DataLocation::Memory, true));
                    ty = *mapping.value;
                }
                Type::Array(ref array) if !array.is_byte_array() => {
                    params.push(Type::uint256());
                    ty = (*array.base).clone();
                }
                _ => break,
            }
        }
        let mut returns = Vec::new();
        let mut return_names = Vec::new();
        match &ty {
            Type::Struct(s) => {
                for (name, member) in env.struct_member_types(s.id, DataLocation::Memory) {
                    let skipped = matches!(member, Type::Mapping(_))
                        || matches!(&member, Type::Array(array) if !array.is_byte_array());
                    if !skipped {
                        returns.push(member.with_location(DataLocation::Memory, true));
                        return_names.push(name);
                    }
                }
            }
            other => {
                returns.push(other.with_location(DataLocation::Memory, true));
                return_names.push(String::new());
            }
        }
        Self {
            kind: FunctionKind::External,
            param_names: vec![String::new(); params.len()],
            params,
            returns,
            return_names,
            mutability: StateMutability::View,
            origin: Some(FunctionOrigin::Getter(id)),
            arbitrary_parameters: false,
            options: CallOptions::empty(),
        }
    }

    /// Creation function of a contract: constructor parameters returning the contract.
    pub fn for_creation(env: &TypeEnv, contract: ContractId) -> Self {
        let (params, names, mutability) = match env.constructor_of(contract) {
            Some(ctor) => {
                let def = env.function(ctor);
                (
                    def.params
                        .iter()
                        .map(|p| p.ty.with_location(DataLocation::Memory, true))
                        .collect(),
                    def.params.iter().map(|p| p.name.clone()).collect(),
                    def.mutability,
                )
            }
            None => (Vec::new(), Vec::new(), StateMutability::NonPayable),
        };
        Self {
            kind: FunctionKind::Creation,
            params,
            returns: vec![Type::contract(contract)],
            param_names: names,
            return_names: vec![String::new()],
            mutability,
            origin: Some(FunctionOrigin::Constructor(contract)),
            arbitrary_parameters: false,
            options: CallOptions::empty(),
        }
    }

    /// Number of stack slots a value of this function type occupies.
    pub fn size_on_stack(&self, env: &TypeEnv) -> usize {
        let mut size = match self.kind {
            FunctionKind::External | FunctionKind::DelegateCall => 2,
            FunctionKind::Internal
            | FunctionKind::BareCall
            | FunctionKind::BareCallCode
            | FunctionKind::BareDelegateCall
            | FunctionKind::BareStaticCall
            | FunctionKind::ArrayPush
            | FunctionKind::ArrayPop
            | FunctionKind::ByteArrayPush
            | FunctionKind::Send
            | FunctionKind::Transfer => 1,
            FunctionKind::SetGas | FunctionKind::SetValue | FunctionKind::SetSalt => {
                // The option function sits on top of the unmodified callee.
                return self
                    .returns
                    .first()
                    .map_or(0, |callee| callee.size_on_stack(env).saturating_sub(1));
            }
            _ => 0,
        };
        if self.options.contains(CallOptions::GAS) {
            size += 1;
        }
        if self.options.contains(CallOptions::VALUE) {
            size += 1;
        }
        if self.options.contains(CallOptions::SALT) {
            size += 1;
        }
        if self.bound()
            && let Some(receiver) = self.params.first()
        {
            size += receiver.size_on_stack(env);
        }
        size
    }

    /// Whether the first parameter is a bound receiver.
    pub fn bound(&self) -> bool {
        self.options.contains(CallOptions::BOUND)
    }

    /// `.gas` was applied.
    pub fn gas_set(&self) -> bool {
        self.options.contains(CallOptions::GAS)
    }

    /// `.value` was applied.
    pub fn value_set(&self) -> bool {
        self.options.contains(CallOptions::VALUE)
    }

    /// `.salt` was applied.
    pub fn salt_set(&self) -> bool {
        self.options.contains(CallOptions::SALT)
    }

    /// Payable functions accept `.value`.
    pub fn is_payable(&self) -> bool {
        self.mutability == StateMutability::Payable
    }

    /// Parameters the caller passes explicitly (the bound receiver excluded).
    pub fn call_params(&self) -> &[Type] {
        if self.bound() {
            &self.params[1..]
        } else {
            &self.params
        }
    }

    /// Copy with an additional call option.
    pub fn with_option(&self, option: CallOptions) -> Self {
        let mut copy = self.clone();
        copy.options |= option;
        copy
    }

    /// Copy bound to a receiver: the first parameter comes from the member
    /// access expression.
    pub fn as_bound(&self) -> Self {
        self.with_option(CallOptions::BOUND)
    }

    /// The option-setting function for `.gas`, `.value` or `.salt`.
    pub fn option_setter(&self, kind: FunctionKind) -> Self {
        let flag = match kind {
            FunctionKind::SetGas => CallOptions::GAS,
            FunctionKind::SetValue => CallOptions::VALUE,
            _ => CallOptions::SALT,
        };
        let mut setter = Self::builtin(
            kind,
            vec![if flag == CallOptions::SALT {
                Type::fixed_bytes(32)
            } else {
                Type::uint256()
            }],
            vec![Type::function(self.with_option(flag))],
            StateMutability::Pure,
        );
        setter.options = self.options - CallOptions::BOUND;
        setter
    }

    /// Name of the declaration, if any.
    pub fn declaration_name<'e>(&self, env: &'e TypeEnv) -> Option<&'e str> {
        match self.origin? {
            FunctionOrigin::Function(id) => Some(&env.function(id).name),
            FunctionOrigin::Event(id) => Some(&env.event(id).name),
            FunctionOrigin::Getter(id) => Some(&env.variable(id).name),
            FunctionOrigin::Constructor(id) => Some(&env.contract(id).name),
        }
    }

    /// Canonical signature `name(type,...)` used for selectors.
    pub fn external_signature(&self, env: &TypeEnv) -> String {
        let name = self.declaration_name(env).unwrap_or_default();
        let params: Vec<String> = self
            .call_params()
            .iter()
            .map(|p| p.canonical_name(env))
            .collect();
        format!("{name}({})", params.join(","))
    }

    /// Four-byte selector of the external signature.
    pub fn selector(&self, env: &TypeEnv) -> u32 {
        selector_value(&self.external_signature(env))
    }

    /// Whether `arguments` can be passed to this function.
    pub fn can_take_arguments(&self, env: &TypeEnv, arguments: &[Type]) -> bool {
        let params = self.call_params();
        if self.arbitrary_parameters {
            return arguments.len() >= params.len()
                && params
                    .iter()
                    .zip(arguments)
                    .all(|(p, a)| a.is_implicitly_convertible_to(env, p));
        }
        params.len() == arguments.len()
            && params
                .iter()
                .zip(arguments)
                .all(|(p, a)| a.is_implicitly_convertible_to(env, p))
    }

    /// Whether the call leaves a return data buffer the caller has to decode.
    pub fn returns_dynamic_data(&self, env: &TypeEnv) -> bool {
        self.returns.iter().any(|r| r.is_dynamically_encoded(env))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::env::{FunctionDef, Param, Visibility};

    fn external_transfer(env: &mut TypeEnv) -> FunctionType {
        let token = env.add_contract("Token", crate::env::ContractKind::Contract, &[]);
        let f = env.add_function(FunctionDef {
            name: "transfer".into(),
            contract: Some(token),
            params: vec![
                Param::new("to", Type::address()),
                Param::new("amount", Type::uint256()),
            ],
            returns: vec![Param::new("", Type::Bool)],
            visibility: Visibility::External,
            mutability: StateMutability::Payable,
            is_constructor: false,
        });
        FunctionType::from_declaration(env, f, true)
    }

    #[test]
    fn external_selector() {
        let mut env = TypeEnv::new();
        let f = external_transfer(&mut env);
        assert_eq!(f.external_signature(&env), "transfer(address,uint256)");
        assert_eq!(f.selector(&env), 0xa9059cbb);
    }

    #[test]
    fn option_order_does_not_matter() {
        let mut env = TypeEnv::new();
        let f = external_transfer(&mut env);
        let value_then_gas = f.with_option(CallOptions::VALUE).with_option(CallOptions::GAS);
        let gas_then_value = f.with_option(CallOptions::GAS).with_option(CallOptions::VALUE);
        assert_eq!(value_then_gas, gas_then_value);
        assert_eq!(value_then_gas.size_on_stack(&env), 4);
    }

    #[test]
    fn stack_sizes_by_kind() {
        let env = TypeEnv::new();
        let push = FunctionType::builtin(FunctionKind::ArrayPush, vec![], vec![], StateMutability::NonPayable);
        assert_eq!(push.size_on_stack(&env), 1);
        let keccak = FunctionType::builtin(FunctionKind::Keccak256, vec![], vec![], StateMutability::Pure);
        assert_eq!(keccak.size_on_stack(&env), 0);
    }

    #[test]
    fn option_setter_sits_on_callee() {
        let mut env = TypeEnv::new();
        let f = external_transfer(&mut env);
        let setter = f.option_setter(FunctionKind::SetValue);
        assert_eq!(setter.size_on_stack(&env), 2);
        let Some(Type::Function(result)) = setter.returns.first() else {
            panic!("setter returns a function");
        };
        assert!(result.value_set());
    }

    #[test]
    fn bound_receiver_is_not_an_argument() {
        let env = TypeEnv::new();
        let mut f = FunctionType::builtin(
            FunctionKind::Internal,
            vec![Type::uint256(), Type::uint256()],
            vec![Type::uint256()],
            StateMutability::Pure,
        );
        f = f.as_bound();
        assert_eq!(f.call_params().len(), 1);
        assert_eq!(f.size_on_stack(&env), 2);
        assert!(f.can_take_arguments(&env, &[Type::uint(8)]));
    }
}
