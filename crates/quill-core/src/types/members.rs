//! Member lookup.
//!
//! [`MemberList`] is computed per (type, scope) pair through
//! [`TypeEnv::members`](crate::env::TypeEnv::members) and cached there.
//! Besides the members native to a type category it contains library
//! functions attached with `using L for T` in the lookup scope.

use crate::env::{ContractId, ContractKind, EnumId, FunctionId, StructId, TypeEnv, VariableId, Visibility};
use crate::types::{
    ArrayKind, CallOptions, DataLocation, FunctionKind, FunctionType, MagicKind, StateMutability, Type,
};

/// What a member refers to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MemberOrigin {
    /// Builtin member of a type category.
    Builtin,
    /// A declared function (contract, library or bound function).
    Function(FunctionId),
    /// Accessor of a public state variable.
    Getter(VariableId),
    /// Struct field at the given member index.
    StructField(usize),
    /// Enum value at the given index.
    EnumValue(usize),
    /// A struct type nested in a contract.
    Struct(StructId),
    /// An enum type nested in a contract.
    Enum(EnumId),
}

/// One named member.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Member {
    /// Member name.
    pub name: String,
    /// Member type.
    pub ty: Type,
    /// What the member refers to.
    pub origin: MemberOrigin,
}

impl Member {
    fn builtin(name: &str, ty: Type) -> Self {
        Self {
            name: name.to_string(),
            ty,
            origin: MemberOrigin::Builtin,
        }
    }
}

/// Members of a type, in declaration order. Names may repeat for overloads.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MemberList {
    members: Vec<Member>,
}

impl MemberList {
    /// All members named `name`.
    pub fn lookup<'a, 'n>(&'a self, name: &'n str) -> impl Iterator<Item = &'a Member> + use<'a, 'n> {
        self.members.iter().filter(move |m| m.name == name)
    }

    /// The unique member named `name`.
    pub fn get(&self, name: &str) -> Option<&Member> {
        let mut matches = self.members.iter().filter(|m| m.name == name);
        let first = matches.next()?;
        matches.next().is_none().then_some(first)
    }

    /// Iterate all members.
    pub fn iter(&self) -> impl Iterator<Item = &Member> {
        self.members.iter()
    }

    /// Number of members.
    pub fn len(&self) -> usize {
        self.members.len()
    }

    /// Whether the type has no members.
    pub fn is_empty(&self) -> bool {
        self.members.is_empty()
    }

    /// Compute the members of `ty` seen from `scope`.
    pub fn compute(env: &TypeEnv, ty: &Type, scope: Option<ContractId>) -> Self {
        let mut members = native_members(env, ty, scope);
        if let Some(scope) = scope {
            bound_functions(env, ty, scope, &mut members);
        }
        Self { members }
    }
}

fn bare_call(kind: FunctionKind, mutability: StateMutability) -> Type {
    Type::function(FunctionType::builtin(
        kind,
        vec![Type::bytes(DataLocation::Memory)],
        vec![Type::Bool, Type::bytes(DataLocation::Memory)],
        mutability,
    ))
}

fn native_members(env: &TypeEnv, ty: &Type, scope: Option<ContractId>) -> Vec<Member> {
    let mut members = Vec::new();
    match ty {
        Type::Address { payable } => {
            members.push(Member::builtin("balance", Type::uint256()));
            members.push(Member::builtin(
                "call",
                bare_call(FunctionKind::BareCall, StateMutability::Payable),
            ));
            members.push(Member::builtin(
                "callcode",
                bare_call(FunctionKind::BareCallCode, StateMutability::Payable),
            ));
            members.push(Member::builtin(
                "delegatecall",
                bare_call(FunctionKind::BareDelegateCall, StateMutability::NonPayable),
            ));
            members.push(Member::builtin(
                "staticcall",
                bare_call(FunctionKind::BareStaticCall, StateMutability::View),
            ));
            if *payable {
                members.push(Member::builtin(
                    "send",
                    Type::function(FunctionType::builtin(
                        FunctionKind::Send,
                        vec![Type::uint256()],
                        vec![Type::Bool],
                        StateMutability::NonPayable,
                    )),
                ));
                members.push(Member::builtin(
                    "transfer",
                    Type::function(FunctionType::builtin(
                        FunctionKind::Transfer,
                        vec![Type::uint256()],
                        vec![],
                        StateMutability::NonPayable,
                    )),
                ));
            }
        }
        Type::FixedBytes(_) => members.push(Member::builtin("length", Type::uint(8))),
        Type::Array(array) => {
            if !array.is_string() {
                members.push(Member::builtin("length", Type::uint256()));
            }
            if array.location == DataLocation::Storage && array.is_dynamically_sized() && !array.is_string() {
                let (kind, element) = if array.kind == ArrayKind::Bytes {
                    (FunctionKind::ByteArrayPush, Type::fixed_bytes(1))
                } else {
                    (FunctionKind::ArrayPush, (*array.base).clone())
                };
                members.push(Member::builtin(
                    "push",
                    Type::function(FunctionType::builtin(
                        kind,
                        vec![element],
                        vec![Type::uint256()],
                        StateMutability::NonPayable,
                    )),
                ));
                members.push(Member::builtin(
                    "pop",
                    Type::function(FunctionType::builtin(
                        FunctionKind::ArrayPop,
                        vec![],
                        vec![],
                        StateMutability::NonPayable,
                    )),
                ));
            }
        }
        Type::Struct(s) => {
            for (index, member) in env.struct_def(s.id).members.iter().enumerate() {
                if s.location != DataLocation::Storage && !member.ty.can_live_outside_storage(env) {
                    continue;
                }
                members.push(Member {
                    name: member.name.clone(),
                    ty: member.ty.with_location_if_reference(s.location),
                    origin: MemberOrigin::StructField(index),
                });
            }
        }
        Type::Function(f) => function_members(f, &mut members),
        Type::Contract(contract) => {
            if contract.is_super {
                for base in env.contract(contract.id).bases.iter().skip(1) {
                    for function in &env.contract(*base).functions {
                        let def = env.function(*function);
                        if def.is_constructor || def.visibility == Visibility::External {
                            continue;
                        }
                        if members.iter().any(|m: &Member| m.name == def.name) {
                            continue;
                        }
                        members.push(Member {
                            name: def.name.clone(),
                            ty: Type::function(FunctionType::from_declaration(env, *function, false)),
                            origin: MemberOrigin::Function(*function),
                        });
                    }
                }
            } else {
                for entry in env.interface_functions(contract.id) {
                    let (name, ty, origin) = match entry.entry {
                        crate::env::InterfaceEntry::Function(id) => (
                            env.function(id).name.clone(),
                            FunctionType::from_declaration(env, id, true),
                            MemberOrigin::Function(id),
                        ),
                        crate::env::InterfaceEntry::Getter(id) => (
                            env.variable(id).name.clone(),
                            FunctionType::for_getter(env, id),
                            MemberOrigin::Getter(id),
                        ),
                    };
                    members.push(Member {
                        name,
                        ty: Type::function(ty),
                        origin,
                    });
                }
            }
        }
        Type::TypeType(inner) => match &**inner {
            Type::Contract(contract) => {
                let def = env.contract(contract.id);
                let derived_scope = scope.is_some_and(|s| env.contract(s).bases.contains(&contract.id));
                for function in &def.functions {
                    let f = env.function(*function);
                    if f.is_constructor {
                        continue;
                    }
                    if def.kind == ContractKind::Library {
                        if f.visibility == Visibility::Private && scope != Some(contract.id) {
                            continue;
                        }
                        let external = f.visibility.is_external();
                        members.push(Member {
                            name: f.name.clone(),
                            ty: Type::function(FunctionType::from_declaration(env, *function, external)),
                            origin: MemberOrigin::Function(*function),
                        });
                    } else if derived_scope && f.visibility != Visibility::External {
                        members.push(Member {
                            name: f.name.clone(),
                            ty: Type::function(FunctionType::from_declaration(env, *function, false)),
                            origin: MemberOrigin::Function(*function),
                        });
                    }
                }
                for s in &def.structs {
                    members.push(Member {
                        name: env.struct_def(*s).name.clone(),
                        ty: Type::TypeType(Box::new(Type::struct_type(*s, DataLocation::Storage))),
                        origin: MemberOrigin::Struct(*s),
                    });
                }
                for e in &def.enums {
                    members.push(Member {
                        name: env.enum_def(*e).name.clone(),
                        ty: Type::TypeType(Box::new(Type::Enum(*e))),
                        origin: MemberOrigin::Enum(*e),
                    });
                }
            }
            Type::Enum(id) => {
                for (index, value) in env.enum_def(*id).values.iter().enumerate() {
                    members.push(Member {
                        name: value.clone(),
                        ty: Type::Enum(*id),
                        origin: MemberOrigin::EnumValue(index),
                    });
                }
            }
            _ => {}
        },
        Type::Magic(kind) => magic_members(kind, &mut members),
        _ => {}
    }
    members
}

fn function_members(f: &FunctionType, members: &mut Vec<Member>) {
    let applies = matches!(f.kind, FunctionKind::External | FunctionKind::Creation) || f.kind.is_bare_call();
    if !applies {
        return;
    }
    if f.kind == FunctionKind::External {
        members.push(Member::builtin("selector", Type::fixed_bytes(4)));
        members.push(Member::builtin("address", Type::address()));
    }
    if f.kind != FunctionKind::BareDelegateCall && f.is_payable() {
        members.push(Member::builtin(
            "value",
            Type::function(f.option_setter(FunctionKind::SetValue)),
        ));
    }
    if f.kind != FunctionKind::Creation {
        members.push(Member::builtin("gas", Type::function(f.option_setter(FunctionKind::SetGas))));
    } else {
        members.push(Member::builtin("salt", Type::function(f.option_setter(FunctionKind::SetSalt))));
    }
}

fn magic_members(kind: &MagicKind, members: &mut Vec<Member>) {
    let encoder = |kind: FunctionKind, params: Vec<Type>| {
        Type::function(
            FunctionType::builtin(kind, params, vec![Type::bytes(DataLocation::Memory)], StateMutability::Pure)
                .with_arbitrary_parameters(),
        )
    };
    match kind {
        MagicKind::Block => {
            members.push(Member::builtin("coinbase", Type::address_payable()));
            members.push(Member::builtin("timestamp", Type::uint256()));
            members.push(Member::builtin(
                "blockhash",
                Type::function(FunctionType::builtin(
                    FunctionKind::BlockHash,
                    vec![Type::uint256()],
                    vec![Type::fixed_bytes(32)],
                    StateMutability::View,
                )),
            ));
            members.push(Member::builtin("difficulty", Type::uint256()));
            members.push(Member::builtin("number", Type::uint256()));
            members.push(Member::builtin("gaslimit", Type::uint256()));
        }
        MagicKind::Message => {
            members.push(Member::builtin("sender", Type::address_payable()));
            members.push(Member::builtin("gas", Type::uint256()));
            members.push(Member::builtin("value", Type::uint256()));
            members.push(Member::builtin("data", Type::bytes(DataLocation::CallData)));
            members.push(Member::builtin("sig", Type::fixed_bytes(4)));
        }
        MagicKind::Transaction => {
            members.push(Member::builtin("origin", Type::address_payable()));
            members.push(Member::builtin("gasprice", Type::uint256()));
        }
        MagicKind::Abi => {
            members.push(Member::builtin("encode", encoder(FunctionKind::AbiEncode, vec![])));
            members.push(Member::builtin("encodePacked", encoder(FunctionKind::AbiEncodePacked, vec![])));
            members.push(Member::builtin(
                "encodeWithSelector",
                encoder(FunctionKind::AbiEncodeWithSelector, vec![Type::fixed_bytes(4)]),
            ));
            members.push(Member::builtin(
                "encodeWithSignature",
                encoder(FunctionKind::AbiEncodeWithSignature, vec![Type::string(DataLocation::Memory)]),
            ));
            members.push(Member::builtin(
                "decode",
                Type::function(
                    FunctionType::builtin(
                        FunctionKind::AbiDecode,
                        vec![Type::bytes(DataLocation::Memory)],
                        vec![],
                        StateMutability::Pure,
                    )
                    .with_arbitrary_parameters(),
                ),
            ));
        }
        MagicKind::MetaType(_) => {
            members.push(Member::builtin("creationCode", Type::bytes(DataLocation::Memory)));
            members.push(Member::builtin("runtimeCode", Type::bytes(DataLocation::Memory)));
            members.push(Member::builtin("name", Type::string(DataLocation::Memory)));
        }
    }
}

/// Strip locations so that `using L for T[]` matches every `T[]`.
fn location_free(ty: &Type) -> Type {
    ty.with_location(DataLocation::Storage, false)
}

fn bound_functions(env: &TypeEnv, ty: &Type, scope: ContractId, members: &mut Vec<Member>) {
    if matches!(ty, Type::TypeType(_) | Type::Magic(_) | Type::Tuple(_)) {
        return;
    }
    let mut seen: Vec<FunctionId> = Vec::new();
    for base in &env.contract(scope).bases {
        for using in &env.contract(*base).using_for {
            if let Some(target) = &using.target
                && location_free(target) != location_free(ty)
            {
                continue;
            }
            for function in &env.contract(using.library).functions {
                if seen.contains(function) {
                    continue;
                }
                let def = env.function(*function);
                if def.is_constructor || def.visibility == Visibility::Private {
                    continue;
                }
                let Some(receiver) = def.params.first() else {
                    continue;
                };
                if !ty.is_implicitly_convertible_to(env, &receiver.ty) {
                    continue;
                }
                seen.push(*function);
                let external = def.visibility.is_external();
                let mut bound = FunctionType::from_declaration(env, *function, external);
                if external {
                    // the receiver keeps its declared location for delegatecall
                    bound.params[0] = receiver.ty.clone();
                }
                bound.options |= CallOptions::BOUND;
                members.push(Member {
                    name: def.name.clone(),
                    ty: Type::function(bound),
                    origin: MemberOrigin::Function(*function),
                });
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::env::{FunctionDef, Param, UsingFor};

    #[test]
    fn address_members() {
        let env = TypeEnv::new();
        let plain = MemberList::compute(&env, &Type::address(), None);
        assert!(plain.get("balance").is_some());
        assert!(plain.get("transfer").is_none());
        let payable = MemberList::compute(&env, &Type::address_payable(), None);
        assert!(payable.get("transfer").is_some());
    }

    #[test]
    fn found_members_outlive_the_queried_name() {
        let env = TypeEnv::new();
        let members = MemberList::compute(&env, &Type::address(), None);
        let balance = {
            let name = String::from("balance");
            members.get(&name)
        };
        assert_eq!(balance.map(|m| m.origin), Some(MemberOrigin::Builtin));
        let calls: Vec<&Member> = {
            let name = String::from("call");
            members.lookup(&name).collect()
        };
        assert_eq!(calls.len(), 1);
    }

    #[test]
    fn storage_array_push_and_pop() {
        let env = TypeEnv::new();
        let array = Type::array(Type::uint256(), None, DataLocation::Storage);
        let members = MemberList::compute(&env, &array, None);
        let push = members.get("push").and_then(|m| m.ty.as_function()).unwrap();
        assert_eq!(push.kind, FunctionKind::ArrayPush);
        assert_eq!(push.returns, vec![Type::uint256()]);
        let memory = Type::array(Type::uint256(), None, DataLocation::Memory);
        assert!(MemberList::compute(&env, &memory, None).get("push").is_none());
        let bytes = MemberList::compute(&env, &Type::bytes(DataLocation::Storage), None);
        assert_eq!(
            bytes.get("push").and_then(|m| m.ty.as_function()).map(|f| f.kind),
            Some(FunctionKind::ByteArrayPush)
        );
        let string = MemberList::compute(&env, &Type::string(DataLocation::Storage), None);
        assert!(string.get("length").is_none());
    }

    #[test]
    fn memory_struct_hides_mappings() {
        let mut env = TypeEnv::new();
        let s = env.add_struct(
            "S",
            None,
            vec![
                ("x".into(), Type::uint256()),
                ("m".into(), Type::mapping(Type::uint256(), Type::uint256())),
            ],
        );
        let storage = MemberList::compute(&env, &Type::struct_type(s, DataLocation::Storage), None);
        assert_eq!(storage.len(), 2);
        let memory = MemberList::compute(&env, &Type::struct_type(s, DataLocation::Memory), None);
        assert_eq!(memory.len(), 1);
        assert_eq!(memory.get("x").map(|m| m.origin), Some(MemberOrigin::StructField(0)));
    }

    #[test]
    fn external_function_options() {
        let env = TypeEnv::new();
        let f = FunctionType::builtin(FunctionKind::External, vec![], vec![], StateMutability::Payable);
        let members = MemberList::compute(&env, &Type::function(f), None);
        assert!(members.get("value").is_some());
        assert!(members.get("gas").is_some());
        assert!(members.get("selector").is_some());
        let view = FunctionType::builtin(FunctionKind::External, vec![], vec![], StateMutability::View);
        assert!(MemberList::compute(&env, &Type::function(view), None).get("value").is_none());
    }

    #[test]
    fn using_for_binds_library_functions() {
        let mut env = TypeEnv::new();
        let lib = env.add_contract("Math", ContractKind::Library, &[]);
        let c = env.add_contract("C", ContractKind::Contract, &[]);
        env.add_function(FunctionDef {
            name: "double".into(),
            contract: Some(lib),
            params: vec![Param::new("x", Type::uint256())],
            returns: vec![Param::new("", Type::uint256())],
            visibility: Visibility::Internal,
            mutability: StateMutability::Pure,
            is_constructor: false,
        });
        env.contract_mut(c).using_for.push(UsingFor {
            library: lib,
            target: Some(Type::uint256()),
        });
        let members = env.members(&Type::uint256(), Some(c));
        let double = members.get("double").and_then(|m| m.ty.as_function()).unwrap();
        assert!(double.bound());
        assert_eq!(double.kind, FunctionKind::Internal);
        assert!(env.members(&Type::uint(8), Some(c)).get("double").is_none());
        // cached per type and scope
        let again = env.members(&Type::uint256(), Some(c));
        assert!(std::rc::Rc::ptr_eq(&members, &again));
    }

    #[test]
    fn enum_values() {
        let mut env = TypeEnv::new();
        let e = env.add_enum("Color", None, &["Red", "Green"]);
        let members = MemberList::compute(&env, &Type::TypeType(Box::new(Type::Enum(e))), None);
        assert_eq!(members.get("Green").map(|m| m.origin), Some(MemberOrigin::EnumValue(1)));
    }
}
