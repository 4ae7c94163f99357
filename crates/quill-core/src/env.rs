//! Declaration arena and layout cache.
//!
//! [`TypeEnv`] owns every declaration the code generator can refer to
//! (contracts, structs, enums, events, functions, state variables) behind
//! copyable ids, plus the interned types attached to expression nodes. It is
//! populated by the semantic phase (or a test) and read-only afterwards,
//! except for the memo tables: struct layouts, contract storage layouts,
//! member lists and recursion flags are computed on first request and never
//! changed after that.

use std::cell::RefCell;
use std::rc::Rc;

use num_bigint::BigUint;
use rustc_hash::{FxHashMap, FxHashSet};

use crate::error::LayoutError;
use crate::hash::{TypeHash, selector_value};
use crate::layout::StorageOffsets;
use crate::types::{DataLocation, FunctionType, MemberList, StateMutability, Type};

macro_rules! arena_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
        pub struct $name(pub u32);

        impl $name {
            /// Position in the arena.
            #[inline]
            pub fn index(self) -> usize {
                self.0 as usize
            }
        }
    };
}

arena_id!(
    /// Contract, interface or library.
    ContractId
);
arena_id!(
    /// Struct declaration.
    StructId
);
arena_id!(
    /// Enum declaration.
    EnumId
);
arena_id!(
    /// Event declaration.
    EventId
);
arena_id!(
    /// Function declaration.
    FunctionId
);
arena_id!(
    /// State variable declaration.
    VariableId
);
arena_id!(
    /// Interned type attached to an expression node.
    TypeIdx
);

// ============================================================================
// Declarations
// ============================================================================

/// What a contract-like declaration is.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ContractKind {
    /// Deployable contract.
    Contract,
    /// Interface without implementation.
    Interface,
    /// Library called through delegatecall.
    Library,
}

/// `using L for T` (or `for *` when `target` is `None`).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UsingFor {
    /// Library providing the functions.
    pub library: ContractId,
    /// Attached type; location is ignored when matching.
    pub target: Option<Type>,
}

/// A contract-like declaration.
#[derive(Debug, Clone)]
pub struct ContractDef {
    /// Name.
    pub name: String,
    /// Contract, interface or library.
    pub kind: ContractKind,
    /// Linearized base contracts, most derived (this contract) first.
    pub bases: Vec<ContractId>,
    /// State variables in declaration order.
    pub state_variables: Vec<VariableId>,
    /// Functions defined directly in this contract.
    pub functions: Vec<FunctionId>,
    /// Structs defined in this contract.
    pub structs: Vec<StructId>,
    /// Enums defined in this contract.
    pub enums: Vec<EnumId>,
    /// Events defined in this contract.
    pub events: Vec<EventId>,
    /// Using-for directives in effect.
    pub using_for: Vec<UsingFor>,
    /// Whether plain value transfers (empty calldata) are accepted.
    pub receives_ether: bool,
}

/// One struct member.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StructMember {
    /// Member name.
    pub name: String,
    /// Declared type; reference types are storage references.
    pub ty: Type,
}

/// A struct declaration.
#[derive(Debug, Clone)]
pub struct StructDef {
    /// Name.
    pub name: String,
    /// Members in declaration order.
    pub members: Vec<StructMember>,
    /// Defining contract.
    pub scope: Option<ContractId>,
}

/// An enum declaration.
#[derive(Debug, Clone)]
pub struct EnumDef {
    /// Name.
    pub name: String,
    /// Value names in order.
    pub values: Vec<String>,
}

/// One event parameter.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EventParam {
    /// Name.
    pub name: String,
    /// Type.
    pub ty: Type,
    /// Whether the value goes into a topic.
    pub indexed: bool,
}

/// An event declaration.
#[derive(Debug, Clone)]
pub struct EventDef {
    /// Name.
    pub name: String,
    /// Parameters.
    pub params: Vec<EventParam>,
    /// Anonymous events have no signature topic.
    pub anonymous: bool,
}

impl EventDef {
    /// Canonical signature, e.g. `Transfer(address,address,uint256)`.
    pub fn signature(&self, env: &TypeEnv) -> String {
        let params: Vec<String> = self
            .params
            .iter()
            .map(|p| p.ty.canonical_name(env))
            .collect();
        format!("{}({})", self.name, params.join(","))
    }
}

/// Function and state variable visibility.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Visibility {
    /// Only this contract.
    Private,
    /// This and derived contracts.
    Internal,
    /// Internal plus external interface.
    Public,
    /// External interface only.
    External,
}

impl Visibility {
    /// Part of the external interface.
    pub fn is_external(self) -> bool {
        matches!(self, Visibility::Public | Visibility::External)
    }
}

/// A named parameter.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Param {
    /// Name, possibly empty.
    pub name: String,
    /// Declared type.
    pub ty: Type,
}

impl Param {
    /// Create a parameter.
    pub fn new(name: impl Into<String>, ty: Type) -> Self {
        Self {
            name: name.into(),
            ty,
        }
    }
}

/// A function declaration.
#[derive(Debug, Clone)]
pub struct FunctionDef {
    /// Name (empty for constructors).
    pub name: String,
    /// Defining contract.
    pub contract: Option<ContractId>,
    /// Parameters.
    pub params: Vec<Param>,
    /// Return parameters.
    pub returns: Vec<Param>,
    /// Visibility.
    pub visibility: Visibility,
    /// State mutability.
    pub mutability: StateMutability,
    /// Whether this is the contract constructor.
    pub is_constructor: bool,
}

/// A state variable declaration.
#[derive(Debug, Clone)]
pub struct VariableDef {
    /// Name.
    pub name: String,
    /// Type; reference types are storage references.
    pub ty: Type,
    /// Defining contract.
    pub contract: ContractId,
    /// Visibility; public variables get an accessor.
    pub visibility: Visibility,
    /// Assigned once during construction and baked into the runtime code.
    pub immutable: bool,
}

/// Position of a state variable in storage.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StateSlot {
    /// Variable.
    pub variable: VariableId,
    /// Slot.
    pub slot: BigUint,
    /// Byte offset inside the slot.
    pub offset: u8,
}

/// Storage positions of every non-immutable state variable of a contract,
/// including inherited ones.
#[derive(Debug, Clone, Default)]
pub struct ContractLayout {
    slots: Vec<StateSlot>,
    storage_size: BigUint,
}

impl ContractLayout {
    /// Position of `variable`.
    pub fn slot_of(&self, variable: VariableId) -> Option<&StateSlot> {
        self.slots.iter().find(|s| s.variable == variable)
    }

    /// All positions in layout order.
    pub fn slots(&self) -> &[StateSlot] {
        &self.slots
    }

    /// Total slots used.
    pub fn storage_size(&self) -> &BigUint {
        &self.storage_size
    }
}

/// Entry of a contract's external interface.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InterfaceEntry {
    /// Public or external function.
    Function(FunctionId),
    /// Accessor of a public state variable.
    Getter(VariableId),
}

/// Externally callable entry with its selector.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InterfaceFunction {
    /// Four-byte selector.
    pub selector: u32,
    /// Canonical signature.
    pub signature: String,
    /// What the selector dispatches to.
    pub entry: InterfaceEntry,
}

// ============================================================================
// Arena
// ============================================================================

/// Declaration arena with memoized layout side-tables.
#[derive(Debug, Default)]
pub struct TypeEnv {
    contracts: Vec<ContractDef>,
    structs: Vec<StructDef>,
    enums: Vec<EnumDef>,
    events: Vec<EventDef>,
    functions: Vec<FunctionDef>,
    variables: Vec<VariableDef>,

    types: Vec<Type>,
    type_index: FxHashMap<String, TypeIdx>,

    struct_layouts: RefCell<FxHashMap<TypeHash, Rc<StorageOffsets>>>,
    contract_layouts: RefCell<FxHashMap<ContractId, Rc<ContractLayout>>>,
    member_lists: RefCell<FxHashMap<TypeHash, Rc<MemberList>>>,
    recursive_structs: RefCell<FxHashMap<StructId, bool>>,
}

impl TypeEnv {
    /// Create an empty arena.
    pub fn new() -> Self {
        Self::default()
    }

    // ------------------------------------------------------------------------
    // Registration
    // ------------------------------------------------------------------------

    /// Declare a contract. `bases` lists inherited contracts most derived
    /// first, without the contract itself.
    pub fn add_contract(&mut self, name: impl Into<String>, kind: ContractKind, bases: &[ContractId]) -> ContractId {
        let id = ContractId(self.contracts.len() as u32);
        let mut linearized = vec![id];
        linearized.extend_from_slice(bases);
        self.contracts.push(ContractDef {
            name: name.into(),
            kind,
            bases: linearized,
            state_variables: Vec::new(),
            functions: Vec::new(),
            structs: Vec::new(),
            enums: Vec::new(),
            events: Vec::new(),
            using_for: Vec::new(),
            receives_ether: false,
        });
        id
    }

    /// Mutable access to a contract during registration.
    pub fn contract_mut(&mut self, id: ContractId) -> &mut ContractDef {
        &mut self.contracts[id.index()]
    }

    /// Declare a struct.
    pub fn add_struct(
        &mut self,
        name: impl Into<String>,
        scope: Option<ContractId>,
        members: Vec<(String, Type)>,
    ) -> StructId {
        let id = StructId(self.structs.len() as u32);
        self.structs.push(StructDef {
            name: name.into(),
            members: members
                .into_iter()
                .map(|(name, ty)| StructMember {
                    name,
                    ty: ty.with_location_if_reference(DataLocation::Storage),
                })
                .collect(),
            scope,
        });
        if let Some(contract) = scope {
            self.contracts[contract.index()].structs.push(id);
        }
        id
    }

    /// Fill in struct members after the id was handed out (for recursive structs).
    pub fn set_struct_members(&mut self, id: StructId, members: Vec<(String, Type)>) {
        self.structs[id.index()].members = members
            .into_iter()
            .map(|(name, ty)| StructMember {
                name,
                ty: ty.with_location_if_reference(DataLocation::Storage),
            })
            .collect();
    }

    /// Declare an enum.
    pub fn add_enum(&mut self, name: impl Into<String>, scope: Option<ContractId>, values: &[&str]) -> EnumId {
        let id = EnumId(self.enums.len() as u32);
        self.enums.push(EnumDef {
            name: name.into(),
            values: values.iter().map(|v| v.to_string()).collect(),
        });
        if let Some(contract) = scope {
            self.contracts[contract.index()].enums.push(id);
        }
        id
    }

    /// Declare an event.
    pub fn add_event(
        &mut self,
        contract: ContractId,
        name: impl Into<String>,
        params: Vec<EventParam>,
        anonymous: bool,
    ) -> EventId {
        let id = EventId(self.events.len() as u32);
        self.events.push(EventDef {
            name: name.into(),
            params,
            anonymous,
        });
        self.contracts[contract.index()].events.push(id);
        id
    }

    /// Declare a function.
    pub fn add_function(&mut self, def: FunctionDef) -> FunctionId {
        let id = FunctionId(self.functions.len() as u32);
        if let Some(contract) = def.contract {
            self.contracts[contract.index()].functions.push(id);
        }
        self.functions.push(def);
        id
    }

    /// Declare a state variable.
    pub fn add_state_variable(
        &mut self,
        contract: ContractId,
        name: impl Into<String>,
        ty: Type,
        visibility: Visibility,
        immutable: bool,
    ) -> VariableId {
        let id = VariableId(self.variables.len() as u32);
        self.variables.push(VariableDef {
            name: name.into(),
            ty: ty.with_location_if_reference(DataLocation::Storage),
            contract,
            visibility,
            immutable,
        });
        self.contracts[contract.index()].state_variables.push(id);
        id
    }

    /// Intern a type for attachment to expression nodes.
    pub fn intern(&mut self, ty: Type) -> TypeIdx {
        let mut key = ty.identifier(self);
        if let Type::RationalNumber(rational) = &ty
            && let Some(bytes) = rational.compatible_bytes
        {
            key.push_str(&format!("_hex{bytes}"));
        }
        if let Some(idx) = self.type_index.get(&key) {
            return *idx;
        }
        let idx = TypeIdx(self.types.len() as u32);
        self.types.push(ty);
        self.type_index.insert(key, idx);
        idx
    }

    // ------------------------------------------------------------------------
    // Lookup
    // ------------------------------------------------------------------------

    /// Interned type.
    pub fn ty(&self, idx: TypeIdx) -> &Type {
        &self.types[idx.index()]
    }

    /// Number of interned types.
    pub fn interned_count(&self) -> usize {
        self.types.len()
    }

    /// Contract declaration.
    pub fn contract(&self, id: ContractId) -> &ContractDef {
        &self.contracts[id.index()]
    }

    /// Struct declaration.
    pub fn struct_def(&self, id: StructId) -> &StructDef {
        &self.structs[id.index()]
    }

    /// Enum declaration.
    pub fn enum_def(&self, id: EnumId) -> &EnumDef {
        &self.enums[id.index()]
    }

    /// Event declaration.
    pub fn event(&self, id: EventId) -> &EventDef {
        &self.events[id.index()]
    }

    /// Function declaration.
    pub fn function(&self, id: FunctionId) -> &FunctionDef {
        &self.functions[id.index()]
    }

    /// State variable declaration.
    pub fn variable(&self, id: VariableId) -> &VariableDef {
        &self.variables[id.index()]
    }

    /// Constructor of a contract, if declared.
    pub fn constructor_of(&self, contract: ContractId) -> Option<FunctionId> {
        self.contract(contract)
            .functions
            .iter()
            .copied()
            .find(|f| self.function(*f).is_constructor)
    }

    /// Struct member types at `location`.
    pub fn struct_member_types(&self, id: StructId, location: DataLocation) -> Vec<(String, Type)> {
        self.struct_def(id)
            .members
            .iter()
            .map(|m| (m.name.clone(), m.ty.with_location_if_reference(location)))
            .collect()
    }

    /// Members that exist outside storage (mappings are dropped in memory and calldata).
    pub fn struct_memory_members(&self, id: StructId) -> Vec<(String, Type)> {
        self.struct_member_types(id, DataLocation::Memory)
            .into_iter()
            .filter(|(_, ty)| ty.can_live_outside_storage(self))
            .collect()
    }

    // ------------------------------------------------------------------------
    // Memoized layouts
    // ------------------------------------------------------------------------

    /// Storage layout of a struct's members, computed once.
    pub fn struct_layout(&self, id: StructId) -> Result<Rc<StorageOffsets>, LayoutError> {
        let key = TypeHash::from_identifier(&format!("t_struct${}${}", self.struct_def(id).name, id.0));
        if let Some(layout) = self.struct_layouts.borrow().get(&key) {
            return Ok(Rc::clone(layout));
        }
        let members = &self.struct_def(id).members;
        let layout = Rc::new(StorageOffsets::for_types(self, members.iter().map(|m| &m.ty))?);
        self.struct_layouts
            .borrow_mut()
            .entry(key)
            .or_insert_with(|| Rc::clone(&layout));
        Ok(layout)
    }

    /// Storage layout of a contract's state variables (bases first), computed once.
    pub fn contract_layout(&self, id: ContractId) -> Result<Rc<ContractLayout>, LayoutError> {
        if let Some(layout) = self.contract_layouts.borrow().get(&id) {
            return Ok(Rc::clone(layout));
        }
        let variables: Vec<VariableId> = self
            .contract(id)
            .bases
            .iter()
            .rev()
            .flat_map(|base| self.contract(*base).state_variables.iter().copied())
            .filter(|v| !self.variable(*v).immutable)
            .collect();
        let offsets = StorageOffsets::for_types(self, variables.iter().map(|v| &self.variable(*v).ty))?;
        let slots = variables
            .iter()
            .zip(offsets.iter())
            .map(|(variable, (slot, offset))| StateSlot {
                variable: *variable,
                slot: slot.clone(),
                offset,
            })
            .collect();
        let layout = Rc::new(ContractLayout {
            slots,
            storage_size: offsets.storage_size().clone(),
        });
        self.contract_layouts
            .borrow_mut()
            .insert(id, Rc::clone(&layout));
        Ok(layout)
    }

    /// Immutable state variables of a contract in layout order.
    pub fn immutables_of(&self, id: ContractId) -> Vec<VariableId> {
        self.contract(id)
            .bases
            .iter()
            .rev()
            .flat_map(|base| self.contract(*base).state_variables.iter().copied())
            .filter(|v| self.variable(*v).immutable)
            .collect()
    }

    /// Member list of `ty` seen from `scope`, computed once per type and scope.
    pub fn members(&self, ty: &Type, scope: Option<ContractId>) -> Rc<MemberList> {
        let scope_key = scope.map_or(u64::MAX, |c| u64::from(c.0));
        let key = TypeHash::from_identifier(&ty.identifier(self)).with_scope(scope_key);
        if let Some(list) = self.member_lists.borrow().get(&key) {
            return Rc::clone(list);
        }
        let list = Rc::new(MemberList::compute(self, ty, scope));
        self.member_lists
            .borrow_mut()
            .insert(key, Rc::clone(&list));
        list
    }

    /// Number of memoized member lists.
    pub fn cached_member_lists(&self) -> usize {
        self.member_lists.borrow().len()
    }

    /// Number of memoized struct layouts.
    pub fn cached_struct_layouts(&self) -> usize {
        self.struct_layouts.borrow().len()
    }

    // ------------------------------------------------------------------------
    // Struct graph
    // ------------------------------------------------------------------------

    fn referenced_structs(ty: &Type, out: &mut Vec<StructId>) {
        match ty {
            Type::Struct(s) => out.push(s.id),
            Type::Array(array) => Self::referenced_structs(&array.base, out),
            Type::Mapping(mapping) => Self::referenced_structs(&mapping.value, out),
            _ => {}
        }
    }

    /// Whether a struct can reach itself through its members, memoized per struct.
    pub fn is_recursive_struct(&self, id: StructId) -> bool {
        if let Some(flag) = self.recursive_structs.borrow().get(&id) {
            return *flag;
        }
        let mut visited = FxHashSet::default();
        let mut stack = Vec::new();
        for member in &self.struct_def(id).members {
            Self::referenced_structs(&member.ty, &mut stack);
        }
        let mut recursive = false;
        while let Some(next) = stack.pop() {
            if next == id {
                recursive = true;
                break;
            }
            if !visited.insert(next) {
                continue;
            }
            for member in &self.struct_def(next).members {
                Self::referenced_structs(&member.ty, &mut stack);
            }
        }
        self.recursive_structs.borrow_mut().insert(id, recursive);
        recursive
    }

    /// Whether a struct (transitively, outside mappings) contains a mapping.
    pub fn struct_contains_mapping(&self, id: StructId) -> bool {
        let mut visited = FxHashSet::default();
        let mut stack = vec![id];
        while let Some(next) = stack.pop() {
            if !visited.insert(next) {
                continue;
            }
            for member in &self.struct_def(next).members {
                let mut ty = &member.ty;
                while let Type::Array(array) = ty {
                    ty = &array.base;
                }
                match ty {
                    Type::Mapping(_) => return true,
                    Type::Struct(s) => stack.push(s.id),
                    _ => {}
                }
            }
        }
        false
    }

    // ------------------------------------------------------------------------
    // External interface
    // ------------------------------------------------------------------------

    /// External function type of a declared function.
    pub fn external_function_type(&self, id: FunctionId) -> FunctionType {
        FunctionType::from_declaration(self, id, true)
    }

    /// Selector-dispatched entries of a contract: public/external functions
    /// (most derived override wins) and accessors of public state variables.
    pub fn interface_functions(&self, id: ContractId) -> Vec<InterfaceFunction> {
        let mut seen = FxHashSet::default();
        let mut out = Vec::new();
        for base in &self.contract(id).bases {
            let contract = self.contract(*base);
            for function in &contract.functions {
                let def = self.function(*function);
                if def.is_constructor || !def.visibility.is_external() {
                    continue;
                }
                let signature = self.external_function_type(*function).external_signature(self);
                if seen.insert(signature.clone()) {
                    out.push(InterfaceFunction {
                        selector: selector_value(&signature),
                        signature,
                        entry: InterfaceEntry::Function(*function),
                    });
                }
            }
            for variable in &contract.state_variables {
                let def = self.variable(*variable);
                if def.visibility != Visibility::Public {
                    continue;
                }
                let signature = FunctionType::for_getter(self, *variable).external_signature(self);
                if seen.insert(signature.clone()) {
                    out.push(InterfaceFunction {
                        selector: selector_value(&signature),
                        signature,
                        entry: InterfaceEntry::Getter(*variable),
                    });
                }
            }
        }
        out
    }
}
