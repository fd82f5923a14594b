use std::{cell::RefCell, fmt::Debug, io::Write, rc::Rc};

use rustc_hash::FxHashMap;

use super::{
    monitor::{Checkpoint, ExecutionMonitor, Limits},
    Access, RuntimeErrorKind,
};
use crate::{
    types::{ScriptType, TypeSystem},
    value::{ScriptValue, Value},
};

#[derive(Debug, Clone)]
pub struct Binding {
    pub ty: ScriptType,
    pub value: Value,
}

type Scope = FxHashMap<String, Binding>;

/// Globals shared by every runtime context created from it. Cloning the
/// `Rc` shares the bindings; writes through any context are visible to all.
pub struct GlobalContext {
    types: Rc<dyn TypeSystem>,
    bindings: RefCell<Scope>,
}

impl Debug for GlobalContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GlobalContext")
            .field("bindings", &self.bindings.borrow())
            .finish()
    }
}

impl GlobalContext {
    pub fn new(types: Rc<dyn TypeSystem>) -> Rc<Self> {
        Rc::new(Self {
            types,
            bindings: RefCell::new(Scope::default()),
        })
    }

    pub fn types(&self) -> &dyn TypeSystem {
        self.types.as_ref()
    }

    /// Adds or updates a global. An existing global keeps its type; the new
    /// value must be assignable to it.
    pub fn define(&self, name: &str, ty: ScriptType, value: Value) -> Result<(), RuntimeErrorKind> {
        let mut bindings = self.bindings.borrow_mut();
        let ty = match bindings.get(name) {
            Some(existing) if !self.types.is_assignable_or_convertible(&existing.ty, &ty) => {
                return Err(RuntimeErrorKind::GlobalTypeConflict {
                    name: name.to_string(),
                    existing: existing.ty.clone(),
                    declared: ty,
                })
            }
            Some(existing) => existing.ty.clone(),
            None => ty,
        };

        let attempted = value.runtime_type();
        if !self.types.is_assignable_or_convertible(&ty, &attempted) {
            return Err(RuntimeErrorKind::TypeMismatch {
                identifier: name.to_string(),
                declared: ty,
                attempted,
                access: Access::Write,
            });
        }

        let value = value.coerce(&ty);
        bindings.insert(name.to_string(), Binding { ty, value });
        Ok(())
    }

    pub fn get(&self, name: &str) -> Option<Binding> {
        self.bindings.borrow().get(name).cloned()
    }

    /// Reads a global as `T`, converting along the implicit widenings.
    pub fn get_as<T: ScriptValue>(&self, name: &str) -> Result<T, RuntimeErrorKind> {
        let binding = self
            .get(name)
            .ok_or_else(|| RuntimeErrorKind::UndefinedVariable(name.to_string()))?;
        let requested = T::script_type();
        let mismatch = |attempted| RuntimeErrorKind::TypeMismatch {
            identifier: name.to_string(),
            declared: binding.ty.clone(),
            attempted,
            access: Access::Read,
        };
        if !self
            .types
            .is_assignable_or_convertible(&requested, &binding.ty)
        {
            return Err(mismatch(requested));
        }

        T::from_value(binding.value.clone().coerce(&requested)).ok_or_else(|| {
            match binding.value.runtime_type() {
                ScriptType::Null => RuntimeErrorKind::NullValue(name.to_string()),
                found => mismatch(found),
            }
        })
    }

    /// Overwrites an existing binding's value. Returns false when `name` is
    /// not a global.
    fn assign(&self, name: &str, value: Value) -> bool {
        match self.bindings.borrow_mut().get_mut(name) {
            Some(binding) => {
                binding.value = value;
                true
            }
            None => false,
        }
    }
}

/// Bindings for one execution: the shared globals, this script's members,
/// and a stack of function frames, each a stack of block scopes.
///
/// Names resolve innermost first: the current frame's scopes, then members,
/// then globals. A frame never sees its caller's locals.
pub struct RuntimeContext {
    globals: Rc<GlobalContext>,
    members: Scope,
    frames: Vec<Vec<Scope>>,
    output: Rc<RefCell<dyn Write>>,
    monitor: Box<dyn ExecutionMonitor>,
    limits: Limits,
}

impl Debug for RuntimeContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RuntimeContext")
            .field("globals", &self.globals)
            .field("members", &self.members)
            .field("frames", &self.frames.len())
            .field("limits", &self.limits)
            .finish()
    }
}

impl RuntimeContext {
    /// A context with its own, initially empty, globals.
    pub fn new(types: Rc<dyn TypeSystem>) -> Self {
        Self::with_globals(GlobalContext::new(types))
    }

    /// A context sharing `globals` with every other context built from it.
    pub fn with_globals(globals: Rc<GlobalContext>) -> Self {
        let limits = Limits::default();
        Self {
            globals,
            members: Scope::default(),
            frames: vec![],
            output: Rc::new(RefCell::new(std::io::stdout())),
            monitor: limits.monitor(),
            limits,
        }
    }

    /// Where `Debug.Log` and friends write.
    pub fn with_output(mut self, output: Rc<RefCell<dyn Write>>) -> Self {
        self.output = output;
        self
    }

    pub fn with_limits(mut self, limits: Limits) -> Self {
        self.monitor = limits.monitor();
        self.limits = limits;
        self
    }

    /// Replaces the monitor built from the limits. The call depth limit
    /// still applies.
    pub fn with_monitor(mut self, monitor: Box<dyn ExecutionMonitor>) -> Self {
        self.monitor = monitor;
        self
    }

    pub fn types(&self) -> &dyn TypeSystem {
        self.globals.types()
    }

    pub fn globals(&self) -> &Rc<GlobalContext> {
        &self.globals
    }

    pub fn output(&self) -> &Rc<RefCell<dyn Write>> {
        &self.output
    }

    pub fn limits(&self) -> &Limits {
        &self.limits
    }

    /// See [`GlobalContext::define`].
    pub fn define_global(
        &self,
        name: &str,
        ty: ScriptType,
        value: Value,
    ) -> Result<(), RuntimeErrorKind> {
        self.globals.define(name, ty, value)
    }

    pub fn global(&self, name: &str) -> Option<Binding> {
        self.globals.get(name)
    }

    pub fn get_global_as<T: ScriptValue>(&self, name: &str) -> Result<T, RuntimeErrorKind> {
        self.globals.get_as(name)
    }

    pub fn member(&self, name: &str) -> Option<&Binding> {
        self.members.get(name)
    }

    pub(crate) fn define_member(&mut self, name: &str, ty: ScriptType, value: Value) {
        self.members.insert(name.to_string(), Binding { ty, value });
    }

    fn local(&self, name: &str) -> Option<&Binding> {
        self.frames
            .last()
            .and_then(|frame| frame.iter().rev().find_map(|scope| scope.get(name)))
            .or_else(|| self.members.get(name))
    }

    /// The current value of `name`, innermost binding first.
    pub fn lookup(&self, name: &str) -> Option<Value> {
        match self.local(name) {
            Some(binding) => Some(binding.value.clone()),
            None => self.globals.get(name).map(|binding| binding.value),
        }
    }

    /// Overwrites the innermost binding of `name`. Returns false when no
    /// binding is visible.
    pub fn assign(&mut self, name: &str, value: Value) -> bool {
        let local = self
            .frames
            .last_mut()
            .and_then(|frame| frame.iter_mut().rev().find_map(|scope| scope.get_mut(name)));
        if let Some(binding) = local.or_else(|| self.members.get_mut(name)) {
            binding.value = value;
            return true;
        }
        self.globals.assign(name, value)
    }

    /// Binds a local in the innermost scope, or a member outside any call.
    pub(crate) fn declare(&mut self, name: &str, ty: ScriptType, value: Value) {
        let binding = Binding { ty, value };
        match self.frames.last_mut().and_then(|frame| frame.last_mut()) {
            Some(scope) => scope.insert(name.to_string(), binding),
            None => self.members.insert(name.to_string(), binding),
        };
    }

    pub(crate) fn push_scope(&mut self) {
        if let Some(frame) = self.frames.last_mut() {
            frame.push(Scope::default());
        }
    }

    pub(crate) fn pop_scope(&mut self) {
        if let Some(frame) = self.frames.last_mut() {
            frame.pop();
        }
    }

    /// Opens a frame for a script function call.
    pub(crate) fn enter_call(&mut self) -> Result<(), RuntimeErrorKind> {
        if self.frames.len() >= self.limits.max_call_depth {
            return Err(RuntimeErrorKind::CallDepthExceeded(self.limits.max_call_depth));
        }
        self.monitor.check(Checkpoint::FunctionEntry)?;
        self.frames.push(vec![Scope::default()]);
        Ok(())
    }

    pub(crate) fn exit_call(&mut self) {
        self.frames.pop();
    }

    pub(crate) fn checkpoint(&mut self, checkpoint: Checkpoint) -> Result<(), RuntimeErrorKind> {
        self.monitor.check(checkpoint)
    }

    /// Whether no script function is currently running.
    pub fn is_idle(&self) -> bool {
        self.frames.is_empty()
    }

    /// Restarts step budgets and relative deadlines.
    pub fn reset_limits(&mut self) {
        self.monitor.reset();
    }
}
