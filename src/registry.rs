mod standard;

use std::{fmt::Debug, rc::Rc};

use rustc_hash::FxHashMap;

use crate::{
    ast::Expression,
    interpreter::{context::RuntimeContext, RuntimeErrorKind},
    types::{
        select_overload, GenericConstructor, MemberError, MemberOwner, Overload, ScriptType,
        TypeRef, TypeSystem,
    },
    value::Value,
};

/// Host implementation of a member. Instance members receive the receiver
/// as the first argument.
pub type HostFn = Rc<dyn Fn(&RuntimeContext, &[Value]) -> Result<Value, RuntimeErrorKind>>;

/// Compile-time validation of a call's argument expressions.
pub type ArgumentCheck = fn(&[Expression]) -> Result<(), String>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MemberKind {
    Property,
    Method,
}

pub struct HostMember {
    pub name: String,
    pub kind: MemberKind,
    pub params: Vec<ScriptType>,
    /// Element type of a trailing `params` array.
    pub variadic: Option<ScriptType>,
    pub returns: ScriptType,
    pub call: HostFn,
    pub check: Option<ArgumentCheck>,
}

impl Overload for HostMember {
    fn accepts(&self, arguments: &[ScriptType], exact: bool, types: &dyn TypeSystem) -> bool {
        let count_fits = match self.variadic {
            Some(_) => arguments.len() >= self.params.len(),
            None => arguments.len() == self.params.len(),
        };
        count_fits
            && arguments.iter().enumerate().all(|(i, argument)| {
                self.parameter_type(i).is_some_and(|param| {
                    if exact {
                        param == argument
                    } else {
                        types.is_assignable_or_convertible(param, argument)
                    }
                })
            })
    }
}

impl Debug for HostMember {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "HostMember({})", self.signature())
    }
}

impl HostMember {
    pub fn method(
        name: impl Into<String>,
        params: Vec<ScriptType>,
        returns: ScriptType,
        call: impl Fn(&RuntimeContext, &[Value]) -> Result<Value, RuntimeErrorKind> + 'static,
    ) -> Self {
        Self {
            name: name.into(),
            kind: MemberKind::Method,
            params,
            variadic: None,
            returns,
            call: Rc::new(call),
            check: None,
        }
    }

    pub fn property(
        name: impl Into<String>,
        returns: ScriptType,
        call: impl Fn(&RuntimeContext, &[Value]) -> Result<Value, RuntimeErrorKind> + 'static,
    ) -> Self {
        Self {
            kind: MemberKind::Property,
            ..Self::method(name, vec![], returns, call)
        }
    }

    pub fn variadic(mut self, element: ScriptType) -> Self {
        self.variadic = Some(element);
        self
    }

    pub fn with_check(mut self, check: ArgumentCheck) -> Self {
        self.check = Some(check);
        self
    }

    /// Declared type of the argument at `index`.
    pub fn parameter_type(&self, index: usize) -> Option<&ScriptType> {
        self.params.get(index).or(self.variadic.as_ref())
    }

    pub fn signature(&self) -> String {
        match self.kind {
            MemberKind::Property => format!("{}: {}", self.name, self.returns),
            MemberKind::Method => {
                let mut params: Vec<_> = self.params.iter().map(ToString::to_string).collect();
                if let Some(variadic) = &self.variadic {
                    params.push(format!("params {}[]", variadic));
                }
                format!("{}({}) -> {}", self.name, params.join(", "), self.returns)
            }
        }
    }
}

/// A host class. Capabilities are other registered classes that act as
/// interfaces.
#[derive(Debug, Clone)]
pub struct ClassDef {
    pub name: Rc<str>,
    pub parent: Option<Rc<str>>,
    pub capabilities: Vec<Rc<str>>,
}

impl ClassDef {
    pub fn new(name: &str) -> Self {
        Self {
            name: Rc::from(name),
            parent: None,
            capabilities: vec![],
        }
    }

    pub fn parent(mut self, parent: &str) -> Self {
        self.parent = Some(Rc::from(parent));
        self
    }

    pub fn capability(mut self, capability: &str) -> Self {
        self.capabilities.push(Rc::from(capability));
        self
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RegistryError {
    #[error("Type alias \"{0}\" is already registered")]
    AliasTaken(String),
    #[error("Class \"{class}\" refers to unregistered class \"{missing}\"")]
    UnknownClass { class: String, missing: String },
}

type MemberTable = FxHashMap<String, FxHashMap<String, Vec<Rc<HostMember>>>>;

/// The host type registry: aliases, classes and their members, and the
/// static facilities scripts can reach.
pub struct HostRegistry {
    aliases: FxHashMap<String, TypeRef>,
    classes: FxHashMap<Rc<str>, ClassDef>,
    statics: MemberTable,
    instance: MemberTable,
}

impl Default for HostRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl HostRegistry {
    /// A registry with the built-in aliases and standard facilities.
    pub fn new() -> Self {
        let mut registry = Self {
            aliases: FxHashMap::default(),
            classes: FxHashMap::default(),
            statics: FxHashMap::default(),
            instance: FxHashMap::default(),
        };

        for (alias, ty) in [
            ("bool", ScriptType::Bool),
            ("int", ScriptType::Int),
            ("long", ScriptType::Long),
            ("float", ScriptType::Float),
            ("double", ScriptType::Double),
            ("string", ScriptType::String),
            ("object", ScriptType::Object),
        ] {
            registry
                .aliases
                .insert(alias.to_string(), TypeRef::Concrete(ty));
        }
        for (alias, constructor) in [
            ("List", GenericConstructor::List),
            ("Queue", GenericConstructor::Queue),
            ("Stack", GenericConstructor::Stack),
            ("Dictionary", GenericConstructor::Dictionary),
        ] {
            registry
                .aliases
                .insert(alias.to_string(), TypeRef::Generic(constructor));
        }

        standard::install(&mut registry);
        registry
    }

    pub fn register_alias(&mut self, alias: &str, target: TypeRef) -> Result<(), RegistryError> {
        if self.aliases.contains_key(alias) {
            return Err(RegistryError::AliasTaken(alias.to_string()));
        }
        self.aliases.insert(alias.to_string(), target);
        Ok(())
    }

    pub fn register_class(&mut self, class: ClassDef) -> Result<(), RegistryError> {
        for related in class.parent.iter().chain(class.capabilities.iter()) {
            if !self.classes.contains_key(related) {
                return Err(RegistryError::UnknownClass {
                    class: class.name.to_string(),
                    missing: related.to_string(),
                });
            }
        }
        self.register_alias(&class.name, TypeRef::Concrete(ScriptType::Class(class.name.clone())))?;
        self.classes.insert(class.name.clone(), class);
        Ok(())
    }

    /// Registers a member of a facility (`Math`) or a type (`string`).
    pub fn register_static(&mut self, owner: &str, member: HostMember) {
        insert(&mut self.statics, owner, member);
    }

    pub fn register_instance(&mut self, owner: &ScriptType, member: HostMember) {
        insert(&mut self.instance, &owner.to_string(), member);
    }

    /// Constructors are reached with `new Class(args)`.
    pub fn register_constructor(
        &mut self,
        class: &str,
        params: Vec<ScriptType>,
        call: impl Fn(&RuntimeContext, &[Value]) -> Result<Value, RuntimeErrorKind> + 'static,
    ) {
        let member = HostMember::method("new", params, ScriptType::class(class), call);
        insert(&mut self.statics, class, member);
    }

    /// `name` followed by its parents and capabilities, nearest first.
    fn ancestors(&self, name: &str) -> Vec<Rc<str>> {
        let mut found: Vec<Rc<str>> = Vec::new();
        let mut pending: Vec<Rc<str>> = self
            .classes
            .get(name)
            .map(|class| vec![class.name.clone()])
            .unwrap_or_default();

        while let Some(next) = pending.pop() {
            if found.contains(&next) {
                continue;
            }
            if let Some(class) = self.classes.get(&next) {
                pending.extend(class.capabilities.iter().rev().cloned());
                pending.extend(class.parent.iter().cloned());
            }
            found.push(next);
        }

        found
    }

    fn select(
        &self,
        candidates: &[Rc<HostMember>],
        arguments: Option<&[ScriptType]>,
    ) -> Result<Rc<HostMember>, MemberError> {
        let kind = match arguments {
            Some(_) => MemberKind::Method,
            None => MemberKind::Property,
        };
        let mut matching = candidates.iter().filter(|member| member.kind == kind).peekable();
        if matching.peek().is_none() {
            return Err(match kind {
                MemberKind::Method => MemberError::NotAMethod,
                MemberKind::Property => MemberError::NotAProperty,
            });
        }

        let Some(arguments) = arguments else {
            return matching.next().cloned().ok_or(MemberError::Unknown);
        };
        let overloads: Vec<&HostMember> = matching.map(Rc::as_ref).collect();
        let chosen = select_overload(self, &overloads, arguments)?;
        candidates
            .iter()
            .filter(|member| member.kind == kind)
            .nth(chosen)
            .cloned()
            .ok_or(MemberError::Unknown)
    }

    fn lookup<'a>(table: &'a MemberTable, owner: &str, name: &str) -> Option<&'a [Rc<HostMember>]> {
        table
            .get(owner)
            .and_then(|members| members.get(name))
            .map(Vec::as_slice)
    }
}

fn insert(table: &mut MemberTable, owner: &str, member: HostMember) {
    table
        .entry(owner.to_string())
        .or_default()
        .entry(member.name.clone())
        .or_default()
        .push(Rc::new(member));
}

impl TypeSystem for HostRegistry {
    fn resolve_alias(&self, alias: &str) -> Option<TypeRef> {
        self.aliases.get(alias).cloned()
    }

    fn is_subtype(&self, child: &ScriptType, ancestor: &ScriptType) -> bool {
        match (child, ancestor) {
            (ScriptType::Class(child), ScriptType::Class(ancestor)) => {
                self.ancestors(child).contains(ancestor)
            }
            _ => false,
        }
    }

    fn resolve_member(
        &self,
        owner: MemberOwner<'_>,
        name: &str,
        arguments: Option<&[ScriptType]>,
    ) -> Result<Rc<HostMember>, MemberError> {
        match owner {
            MemberOwner::Facility(facility) => {
                let candidates =
                    Self::lookup(&self.statics, facility, name).ok_or(MemberError::Unknown)?;
                self.select(candidates, arguments)
            }
            MemberOwner::Type(ty) => {
                let candidates = Self::lookup(&self.statics, &ty.to_string(), name)
                    .ok_or(MemberError::Unknown)?;
                self.select(candidates, arguments)
            }
            MemberOwner::Instance(ty) => {
                let members = standard::collection_members(ty, name);
                if !members.is_empty() {
                    return self.select(&members, arguments);
                }

                let owners = match ty {
                    ScriptType::Class(class) => self.ancestors(class),
                    other => vec![Rc::from(other.to_string())],
                };
                for owner in owners {
                    if let Some(candidates) = Self::lookup(&self.instance, &owner, name) {
                        return self.select(candidates, arguments);
                    }
                }

                let universal = standard::universal_members(name);
                if universal.is_empty() {
                    Err(MemberError::Unknown)
                } else {
                    self.select(&universal, arguments)
                }
            }
        }
    }
}
