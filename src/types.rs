use std::{fmt::Display, rc::Rc};

use crate::registry::HostMember;

/// A fully applied script type.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum ScriptType {
    Void,
    /// The type of the `null` literal.
    Null,
    Bool,
    Int,
    Long,
    Float,
    Double,
    String,
    Object,
    List(Box<ScriptType>),
    /// Fixed length, `T[]`.
    Array(Box<ScriptType>),
    Queue(Box<ScriptType>),
    Stack(Box<ScriptType>),
    Dictionary(Box<ScriptType>, Box<ScriptType>),
    /// A host class registered by name.
    Class(Rc<str>),
}

/// The element-holding collections, which share one runtime representation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SequenceKind {
    List,
    Array,
    Queue,
    Stack,
}

impl SequenceKind {
    pub fn of(self, element: ScriptType) -> ScriptType {
        let element = Box::new(element);
        match self {
            SequenceKind::List => ScriptType::List(element),
            SequenceKind::Array => ScriptType::Array(element),
            SequenceKind::Queue => ScriptType::Queue(element),
            SequenceKind::Stack => ScriptType::Stack(element),
        }
    }
}

impl ScriptType {
    pub fn list(element: ScriptType) -> Self {
        ScriptType::List(Box::new(element))
    }

    pub fn array(element: ScriptType) -> Self {
        ScriptType::Array(Box::new(element))
    }

    pub fn dictionary(key: ScriptType, value: ScriptType) -> Self {
        ScriptType::Dictionary(Box::new(key), Box::new(value))
    }

    /// The collection kind and element type of a sequence type.
    pub fn sequence(&self) -> Option<(SequenceKind, &ScriptType)> {
        match self {
            ScriptType::List(element) => Some((SequenceKind::List, element)),
            ScriptType::Array(element) => Some((SequenceKind::Array, element)),
            ScriptType::Queue(element) => Some((SequenceKind::Queue, element)),
            ScriptType::Stack(element) => Some((SequenceKind::Stack, element)),
            _ => None,
        }
    }

    pub fn class(name: &str) -> Self {
        ScriptType::Class(Rc::from(name))
    }

    /// Reference types accept `null`.
    pub fn is_reference(&self) -> bool {
        matches!(
            self,
            ScriptType::String
                | ScriptType::Object
                | ScriptType::List(_)
                | ScriptType::Array(_)
                | ScriptType::Queue(_)
                | ScriptType::Stack(_)
                | ScriptType::Dictionary(..)
                | ScriptType::Class(_)
                | ScriptType::Null
        )
    }

    pub fn is_numeric(&self) -> bool {
        self.numeric_rank().is_some()
    }

    pub fn is_integral(&self) -> bool {
        matches!(self, ScriptType::Int | ScriptType::Long)
    }

    fn numeric_rank(&self) -> Option<u8> {
        match self {
            ScriptType::Int => Some(0),
            ScriptType::Long => Some(1),
            ScriptType::Float => Some(2),
            ScriptType::Double => Some(3),
            _ => None,
        }
    }

    /// The narrowest numeric type both operands widen to, if both are numeric.
    pub fn promote(left: &ScriptType, right: &ScriptType) -> Option<ScriptType> {
        let (l, r) = (left.numeric_rank()?, right.numeric_rank()?);
        Some(if l >= r { left.clone() } else { right.clone() })
    }
}

impl Display for ScriptType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ScriptType::Void => write!(f, "void"),
            ScriptType::Null => write!(f, "null"),
            ScriptType::Bool => write!(f, "bool"),
            ScriptType::Int => write!(f, "int"),
            ScriptType::Long => write!(f, "long"),
            ScriptType::Float => write!(f, "float"),
            ScriptType::Double => write!(f, "double"),
            ScriptType::String => write!(f, "string"),
            ScriptType::Object => write!(f, "object"),
            ScriptType::List(element) => write!(f, "List<{}>", element),
            ScriptType::Array(element) => write!(f, "{}[]", element),
            ScriptType::Queue(element) => write!(f, "Queue<{}>", element),
            ScriptType::Stack(element) => write!(f, "Stack<{}>", element),
            ScriptType::Dictionary(key, value) => write!(f, "Dictionary<{}, {}>", key, value),
            ScriptType::Class(name) => write!(f, "{}", name),
        }
    }
}

/// A type constructor that still needs type arguments.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GenericConstructor {
    List,
    Queue,
    Stack,
    Dictionary,
}

impl GenericConstructor {
    pub fn arity(&self) -> usize {
        match self {
            GenericConstructor::Dictionary => 2,
            _ => 1,
        }
    }

    pub fn apply(&self, mut arguments: Vec<ScriptType>) -> Option<ScriptType> {
        if arguments.len() != self.arity() {
            return None;
        }
        let last = arguments.pop()?;
        Some(match self {
            GenericConstructor::List => SequenceKind::List.of(last),
            GenericConstructor::Queue => SequenceKind::Queue.of(last),
            GenericConstructor::Stack => SequenceKind::Stack.of(last),
            GenericConstructor::Dictionary => ScriptType::dictionary(arguments.pop()?, last),
        })
    }
}

impl Display for GenericConstructor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            GenericConstructor::List => write!(f, "List<>"),
            GenericConstructor::Queue => write!(f, "Queue<>"),
            GenericConstructor::Stack => write!(f, "Stack<>"),
            GenericConstructor::Dictionary => write!(f, "Dictionary<,>"),
        }
    }
}

/// What a type alias resolves to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TypeRef {
    Concrete(ScriptType),
    Generic(GenericConstructor),
}

impl Display for TypeRef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TypeRef::Concrete(ty) => write!(f, "{}", ty),
            TypeRef::Generic(constructor) => write!(f, "{}", constructor),
        }
    }
}

/// Where a member is looked up.
#[derive(Debug, Clone, Copy)]
pub enum MemberOwner<'a> {
    /// A static facility keyword such as `Math`.
    Facility(&'a str),
    /// Static members of a type, e.g. `string.Format`.
    Type(&'a ScriptType),
    /// Members of a value of this type.
    Instance(&'a ScriptType),
}

impl Display for MemberOwner<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            MemberOwner::Facility(name) => write!(f, "{}", name),
            MemberOwner::Type(ty) | MemberOwner::Instance(ty) => write!(f, "{}", ty),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum MemberError {
    #[error("no member with that name")]
    Unknown,
    #[error("no overload accepts ({0})")]
    NoMatchingOverload(String),
    #[error("call is ambiguous between {0} overloads")]
    Ambiguous(usize),
    #[error("member is a property, not a method")]
    NotAMethod,
    #[error("member is a method, not a property")]
    NotAProperty,
}

/// Something a call may resolve to when a name is overloaded.
pub trait Overload {
    /// Whether `arguments` fit, either exactly or through the assignability
    /// predicate.
    fn accepts(&self, arguments: &[ScriptType], exact: bool, types: &dyn TypeSystem) -> bool;
}

/// Index of the candidate taking exactly `arguments`, or else of the only
/// candidate they convert to.
pub fn select_overload<O: Overload + ?Sized>(
    types: &dyn TypeSystem,
    candidates: &[&O],
    arguments: &[ScriptType],
) -> Result<usize, MemberError> {
    if let Some(exact) = candidates
        .iter()
        .position(|candidate| candidate.accepts(arguments, true, types))
    {
        return Ok(exact);
    }

    let loose: Vec<usize> = candidates
        .iter()
        .enumerate()
        .filter(|(_, candidate)| candidate.accepts(arguments, false, types))
        .map(|(i, _)| i)
        .collect();
    match loose.as_slice() {
        [only] => Ok(*only),
        [] => Err(MemberError::NoMatchingOverload(
            arguments
                .iter()
                .map(ToString::to_string)
                .collect::<Vec<_>>()
                .join(", "),
        )),
        many => Err(MemberError::Ambiguous(many.len())),
    }
}

/// The host capabilities the compiler and evaluator rely on.
pub trait TypeSystem {
    /// Looks up a textual type name.
    fn resolve_alias(&self, alias: &str) -> Option<TypeRef>;

    /// Whether `ancestor` is a registered parent class or capability of `child`.
    fn is_subtype(&self, child: &ScriptType, ancestor: &ScriptType) -> bool;

    /// Resolves a member. `arguments` is `None` for property access and the
    /// argument types for a call.
    fn resolve_member(
        &self,
        owner: MemberOwner<'_>,
        name: &str,
        arguments: Option<&[ScriptType]>,
    ) -> Result<Rc<HostMember>, MemberError>;

    fn is_assignable_or_convertible(&self, target: &ScriptType, source: &ScriptType) -> bool {
        is_assignable_or_convertible(self, target, source)
    }
}

/// Whether a value of type `source` may be stored where `target` is declared.
///
/// Checked in order: identical types, `null` into a reference type, an
/// ancestor or capability of the source (every non-void type is an `object`),
/// then implicit numeric widening.
pub fn is_assignable_or_convertible<T: TypeSystem + ?Sized>(
    types: &T,
    target: &ScriptType,
    source: &ScriptType,
) -> bool {
    if target == source {
        return true;
    }
    if *source == ScriptType::Null {
        return target.is_reference();
    }
    if *target == ScriptType::Object && *source != ScriptType::Void {
        return true;
    }
    if types.is_subtype(source, target) {
        return true;
    }
    is_implicit_widening(source, target)
}

pub fn is_implicit_widening(source: &ScriptType, target: &ScriptType) -> bool {
    matches!(
        (source, target),
        (ScriptType::Int, ScriptType::Long | ScriptType::Float | ScriptType::Double)
            | (ScriptType::Long, ScriptType::Float | ScriptType::Double)
            | (ScriptType::Float, ScriptType::Double)
    )
}

/// Whether `(target)value` is accepted at compile time. Narrowing casts are
/// re-checked against the runtime value.
pub fn is_castable<T: TypeSystem + ?Sized>(
    types: &T,
    target: &ScriptType,
    source: &ScriptType,
) -> bool {
    if *target == ScriptType::Void {
        return false;
    }
    if types.is_assignable_or_convertible(target, source) {
        return true;
    }
    if target.is_numeric() && source.is_numeric() {
        return true;
    }
    if *source == ScriptType::Object {
        return true;
    }
    matches!(source, ScriptType::Class(_)) && types.is_subtype(target, source)
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::registry::{ClassDef, HostRegistry};

    fn registry() -> HostRegistry {
        let mut registry = HostRegistry::new();
        registry
            .register_class(ClassDef::new("IGreeter"))
            .expect("class registers");
        registry
            .register_class(ClassDef::new("Animal").capability("IGreeter"))
            .expect("class registers");
        registry
            .register_class(ClassDef::new("Dog").parent("Animal"))
            .expect("class registers");
        registry
    }

    #[test]
    fn identical_types_are_assignable() {
        let types = registry();
        assert!(types.is_assignable_or_convertible(&ScriptType::Int, &ScriptType::Int));
        assert!(types.is_assignable_or_convertible(
            &ScriptType::list(ScriptType::String),
            &ScriptType::list(ScriptType::String)
        ));
    }

    #[test]
    fn null_only_fits_reference_types() {
        let types = registry();
        assert!(types.is_assignable_or_convertible(&ScriptType::String, &ScriptType::Null));
        assert!(types.is_assignable_or_convertible(&ScriptType::class("Dog"), &ScriptType::Null));
        assert!(!types.is_assignable_or_convertible(&ScriptType::Int, &ScriptType::Null));
        assert!(!types.is_assignable_or_convertible(&ScriptType::Bool, &ScriptType::Null));
    }

    #[test]
    fn ancestors_and_capabilities_accept_descendants() {
        let types = registry();
        let dog = ScriptType::class("Dog");
        assert!(types.is_assignable_or_convertible(&ScriptType::class("Animal"), &dog));
        assert!(types.is_assignable_or_convertible(&ScriptType::class("IGreeter"), &dog));
        assert!(types.is_assignable_or_convertible(&ScriptType::Object, &dog));
        assert!(!types.is_assignable_or_convertible(&dog, &ScriptType::class("Animal")));
    }

    #[test]
    fn numeric_widening_only_goes_up() {
        let types = registry();
        assert!(types.is_assignable_or_convertible(&ScriptType::Double, &ScriptType::Int));
        assert!(types.is_assignable_or_convertible(&ScriptType::Long, &ScriptType::Int));
        assert!(types.is_assignable_or_convertible(&ScriptType::Double, &ScriptType::Float));
        assert!(!types.is_assignable_or_convertible(&ScriptType::Int, &ScriptType::Double));
        assert!(!types.is_assignable_or_convertible(&ScriptType::Int, &ScriptType::Long));
        assert!(!types.is_assignable_or_convertible(&ScriptType::String, &ScriptType::Int));
    }

    #[test]
    fn lists_are_invariant() {
        let types = registry();
        assert!(!types.is_assignable_or_convertible(
            &ScriptType::list(ScriptType::Double),
            &ScriptType::list(ScriptType::Int)
        ));
    }

    #[test]
    fn casts_accept_numeric_conversions_and_downcasts() {
        let types = registry();
        assert!(is_castable(&types, &ScriptType::Int, &ScriptType::Double));
        assert!(is_castable(&types, &ScriptType::String, &ScriptType::Object));
        assert!(is_castable(&types, &ScriptType::class("Dog"), &ScriptType::class("Animal")));
        assert!(!is_castable(&types, &ScriptType::String, &ScriptType::Int));
        assert!(!is_castable(&types, &ScriptType::Bool, &ScriptType::Int));
    }

    #[test]
    fn generic_constructors_apply_in_order() {
        assert_eq!(
            GenericConstructor::Dictionary.apply(vec![ScriptType::String, ScriptType::Int]),
            Some(ScriptType::dictionary(ScriptType::String, ScriptType::Int))
        );
        assert_eq!(GenericConstructor::Dictionary.apply(vec![ScriptType::Int]), None);
        assert_eq!(
            GenericConstructor::Queue.apply(vec![ScriptType::Bool]),
            Some(SequenceKind::Queue.of(ScriptType::Bool))
        );
        assert_eq!(
            ScriptType::dictionary(ScriptType::String, ScriptType::array(ScriptType::Int))
                .to_string(),
            "Dictionary<string, int[]>"
        );
        assert!(ScriptType::array(ScriptType::Int).is_reference());
    }

    struct Arity(usize, ScriptType);

    impl Overload for Arity {
        fn accepts(&self, arguments: &[ScriptType], exact: bool, types: &dyn TypeSystem) -> bool {
            arguments.len() == self.0
                && arguments.iter().all(|argument| {
                    if exact {
                        *argument == self.1
                    } else {
                        types.is_assignable_or_convertible(&self.1, argument)
                    }
                })
        }
    }

    #[test]
    fn overloads_prefer_exact_then_a_unique_conversion() {
        let types = registry();
        let long = Arity(1, ScriptType::Long);
        let double = Arity(1, ScriptType::Double);
        let candidates = [&long, &double];

        assert_eq!(select_overload(&types, &candidates, &[ScriptType::Double]), Ok(1));
        assert_eq!(select_overload(&types, &candidates, &[ScriptType::Long]), Ok(0));
        assert_eq!(
            select_overload(&types, &candidates, &[ScriptType::Int]),
            Err(MemberError::Ambiguous(2))
        );
        assert_eq!(
            select_overload(&types, &candidates, &[ScriptType::String]),
            Err(MemberError::NoMatchingOverload("string".to_string()))
        );
    }

    #[test]
    fn promotion_picks_the_wider_operand() {
        assert_eq!(
            ScriptType::promote(&ScriptType::Int, &ScriptType::Double),
            Some(ScriptType::Double)
        );
        assert_eq!(
            ScriptType::promote(&ScriptType::Long, &ScriptType::Int),
            Some(ScriptType::Long)
        );
        assert_eq!(ScriptType::promote(&ScriptType::Bool, &ScriptType::Int), None);
    }
}
