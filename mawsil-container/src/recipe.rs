//! Type recipes — the reflective-metadata layer.
//!
//! Rust has no runtime reflection, so every auto-resolvable type carries
//! a [`TypeRecipe`]: a descriptor of its constructor parameters plus a
//! constructor thunk, computed once and memoized for the life of the
//! container. Recipes reach the cache two ways:
//!
//! - explicitly, via [`Container::register_recipe`](crate::container::Container::register_recipe);
//! - at link time, via [`inventory::submit!`] of a [`RecipeSubmission`] —
//!   the stand-in for "unregistered concrete classes are auto-resolvable".
//!
//! Class-level [`TypeMetadata`] drives auto-binding (including
//! environment-scoped declarative bindings), always-singleton and
//! always-scoped discovery, and class-level attributes.

use std::any::{Any, TypeId, type_name};
use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use dashmap::DashMap;

use crate::error::{ContainerError, Result};
use crate::invoker::MethodRecipe;
use crate::key::ServiceKey;

/// A type-erased resolved service value.
///
/// Singletons are shared, so every payload travels behind an `Arc`. For
/// trait objects the payload type is itself an `Arc<dyn Trait>`.
pub type Service = Arc<dyn Any + Send + Sync>;

/// Constructor thunk: consumes the resolved argument list, produces the
/// erased instance.
pub type ConstructorFn = Arc<dyn Fn(ArgumentList) -> Result<Service> + Send + Sync>;

/// Produces a parameter's default value on demand.
pub type DefaultFn = Arc<dyn Fn() -> Service + Send + Sync>;

// ============================================================
// Attributes
// ============================================================

/// An erased attribute instance attached to a type or parameter,
/// carrying its own type identity for strategy/callback lookup.
#[derive(Clone)]
pub struct AttributeRef {
    type_id: TypeId,
    type_name: &'static str,
    instance: Arc<dyn Any + Send + Sync>,
}

impl AttributeRef {
    pub fn new<A: Send + Sync + 'static>(attribute: A) -> Self {
        Self {
            type_id: TypeId::of::<A>(),
            type_name: type_name::<A>(),
            instance: Arc::new(attribute),
        }
    }

    #[inline]
    pub fn type_id(&self) -> TypeId {
        self.type_id
    }

    #[inline]
    pub fn type_name(&self) -> &'static str {
        self.type_name
    }

    pub fn downcast_ref<A: 'static>(&self) -> Option<&A> {
        self.instance.downcast_ref::<A>()
    }
}

impl fmt::Debug for AttributeRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "AttributeRef({})", self.type_name)
    }
}

// ============================================================
// Arguments
// ============================================================

/// One resolved constructor argument.
#[derive(Clone)]
pub(crate) enum Argument {
    /// A single resolved value.
    One(Service),
    /// A nullable parameter resolved to nothing.
    Absent,
    /// A variadic parameter's collected values (possibly empty).
    Many(Vec<Service>),
}

/// The resolved arguments handed to a constructor thunk, consumed in
/// declaration order.
pub struct ArgumentList {
    args: std::vec::IntoIter<Argument>,
}

impl ArgumentList {
    pub(crate) fn new(args: Vec<Argument>) -> Self {
        Self {
            args: args.into_iter(),
        }
    }

    fn next_arg(&mut self, expected: &'static str) -> Result<Argument> {
        self.args
            .next()
            .ok_or(ContainerError::ArgumentMismatch { expected })
    }

    /// Takes the next argument as a shared service payload.
    pub fn take<T: Send + Sync + 'static>(&mut self) -> Result<Arc<T>> {
        match self.next_arg(type_name::<T>())? {
            Argument::One(v) => v
                .downcast::<T>()
                .map_err(|_| ContainerError::ArgumentMismatch {
                    expected: type_name::<T>(),
                }),
            _ => Err(ContainerError::ArgumentMismatch {
                expected: type_name::<T>(),
            }),
        }
    }

    /// Takes the next argument and clones the payload out of the `Arc`.
    ///
    /// The usual way to consume primitives, `String`s, and `Arc<dyn Trait>`
    /// payloads.
    pub fn take_cloned<T: Clone + Send + Sync + 'static>(&mut self) -> Result<T> {
        Ok((*self.take::<T>()?).clone())
    }

    /// Takes the next argument as an optional payload (`None` when a
    /// nullable parameter resolved to nothing).
    pub fn take_opt<T: Send + Sync + 'static>(&mut self) -> Result<Option<Arc<T>>> {
        match self.next_arg(type_name::<T>())? {
            Argument::Absent => Ok(None),
            Argument::One(v) => v
                .downcast::<T>()
                .map(Some)
                .map_err(|_| ContainerError::ArgumentMismatch {
                    expected: type_name::<T>(),
                }),
            Argument::Many(_) => Err(ContainerError::ArgumentMismatch {
                expected: type_name::<T>(),
            }),
        }
    }

    /// Takes the next argument as a variadic collection.
    pub fn take_variadic<T: Send + Sync + 'static>(&mut self) -> Result<Vec<Arc<T>>> {
        match self.next_arg(type_name::<T>())? {
            Argument::Many(values) => values
                .into_iter()
                .map(|v| {
                    v.downcast::<T>()
                        .map_err(|_| ContainerError::ArgumentMismatch {
                            expected: type_name::<T>(),
                        })
                })
                .collect(),
            _ => Err(ContainerError::ArgumentMismatch {
                expected: type_name::<T>(),
            }),
        }
    }
}

// ============================================================
// Parameter descriptors
// ============================================================

/// Immutable descriptor of one constructor (or method) parameter.
#[derive(Clone)]
pub struct ParamRecipe {
    pub name: &'static str,
    pub position: usize,
    pub declared_by: ServiceKey,
    /// The service key of the parameter's class type; `None` for
    /// primitives and other values resolved by name/default only.
    pub class: Option<ServiceKey>,
    pub default: Option<DefaultFn>,
    pub variadic: bool,
    pub nullable: bool,
    /// A contextual attribute naming a resolution strategy; wins over
    /// type-based resolution.
    pub attribute: Option<AttributeRef>,
    /// Attributes fired through `after_resolving_attribute` once the
    /// parameter's value is resolved.
    pub metadata: Vec<AttributeRef>,
}

/// Builder for a [`ParamRecipe`]. Position and declaring type are filled
/// in by the owning recipe builder.
pub struct Param {
    name: &'static str,
    class: Option<ServiceKey>,
    default: Option<DefaultFn>,
    variadic: bool,
    nullable: bool,
    attribute: Option<AttributeRef>,
    metadata: Vec<AttributeRef>,
}

impl Param {
    fn new(name: &'static str, class: Option<ServiceKey>) -> Self {
        Self {
            name,
            class,
            default: None,
            variadic: false,
            nullable: false,
            attribute: None,
            metadata: Vec::new(),
        }
    }

    /// A service dependency with payload type `T`.
    pub fn of<T: ?Sized + Send + Sync + 'static>(name: &'static str) -> Self {
        Self::new(name, Some(ServiceKey::of::<T>()))
    }

    /// A service dependency under a symbolic key.
    pub fn keyed(name: &'static str, key: ServiceKey) -> Self {
        Self::new(name, Some(key))
    }

    /// A primitive parameter: filled from explicit overrides, `$name`
    /// contextual bindings, or its default.
    pub fn value(name: &'static str) -> Self {
        Self::new(name, None)
    }

    pub fn with_default<T: Send + Sync + 'static>(
        mut self,
        default: impl Fn() -> T + Send + Sync + 'static,
    ) -> Self {
        self.default = Some(Arc::new(move || Arc::new(default()) as Service));
        self
    }

    pub fn variadic(mut self) -> Self {
        self.variadic = true;
        self
    }

    pub fn nullable(mut self) -> Self {
        self.nullable = true;
        self
    }

    /// Attaches a contextual attribute; its registered resolver strategy
    /// supplies the value.
    pub fn with_attribute<A: Send + Sync + 'static>(mut self, attribute: A) -> Self {
        self.attribute = Some(AttributeRef::new(attribute));
        self
    }

    /// Attaches passive metadata, observed via `after_resolving_attribute`.
    pub fn with_metadata<A: Send + Sync + 'static>(mut self, attribute: A) -> Self {
        self.metadata.push(AttributeRef::new(attribute));
        self
    }

    pub(crate) fn finish(self, position: usize, declared_by: ServiceKey) -> ParamRecipe {
        ParamRecipe {
            name: self.name,
            position,
            declared_by,
            class: self.class,
            default: self.default,
            variadic: self.variadic,
            nullable: self.nullable,
            attribute: self.attribute,
            metadata: self.metadata,
        }
    }
}

// ============================================================
// Type metadata & recipes
// ============================================================

/// Class-level declarative metadata.
#[derive(Clone)]
pub enum TypeMetadata {
    /// Declarative auto-binding: when the type's key is resolved without
    /// an explicit binding, bind it to `target`. An empty environment
    /// list is the wildcard default; non-empty lists are consulted
    /// through the container's environment predicate.
    Bind {
        target: ServiceKey,
        environments: Vec<String>,
    },
    /// The type is always shared, binding or not.
    Singleton,
    /// The type is always shared within a scope.
    Scoped,
    /// A class-level attribute, fired through `after_resolving_attribute`
    /// on every fresh build.
    Attribute(AttributeRef),
}

/// Descriptor of a concrete type: its constructor parameters, class-level
/// metadata, and construction thunks. Computed once, cached by the
/// container's metadata cache.
#[derive(Clone)]
pub struct TypeRecipe {
    pub key: ServiceKey,
    pub params: Vec<ParamRecipe>,
    pub metadata: Vec<TypeMetadata>,
    pub constructor: Option<ConstructorFn>,
    /// Self-building capability: a named static constructor invoked in
    /// place of normal constructor injection.
    pub self_constructor: Option<MethodRecipe>,
    /// Methods addressable through `call_named("Type@method")`.
    pub methods: Vec<MethodRecipe>,
}

impl TypeRecipe {
    /// Starts a recipe for payload type `T`.
    pub fn of<T: Send + Sync + 'static>() -> TypeRecipeBuilder {
        Self::keyed(ServiceKey::of::<T>())
    }

    /// Starts a recipe under an explicit key.
    pub fn keyed(key: ServiceKey) -> TypeRecipeBuilder {
        TypeRecipeBuilder {
            key,
            params: Vec::new(),
            metadata: Vec::new(),
            self_constructor: None,
            methods: Vec::new(),
        }
    }

    pub fn is_instantiable(&self) -> bool {
        self.constructor.is_some() || self.self_constructor.is_some()
    }

    pub fn always_singleton(&self) -> bool {
        self.metadata
            .iter()
            .any(|m| matches!(m, TypeMetadata::Singleton))
    }

    pub fn always_scoped(&self) -> bool {
        self.metadata
            .iter()
            .any(|m| matches!(m, TypeMetadata::Scoped))
    }

    pub fn method(&self, name: &str) -> Option<&MethodRecipe> {
        self.methods.iter().find(|m| m.name == name)
    }

    /// Class-level attributes, in declaration order.
    pub(crate) fn attributes(&self) -> impl Iterator<Item = &AttributeRef> {
        self.metadata.iter().filter_map(|m| match m {
            TypeMetadata::Attribute(attr) => Some(attr),
            _ => None,
        })
    }
}

impl fmt::Debug for TypeRecipe {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TypeRecipe")
            .field("key", &self.key)
            .field("params", &self.params.len())
            .field("instantiable", &self.is_instantiable())
            .finish()
    }
}

/// Builder for a [`TypeRecipe`].
pub struct TypeRecipeBuilder {
    key: ServiceKey,
    params: Vec<Param>,
    metadata: Vec<TypeMetadata>,
    self_constructor: Option<MethodRecipe>,
    methods: Vec<MethodRecipe>,
}

impl TypeRecipeBuilder {
    /// Declares the next constructor parameter.
    pub fn needs(mut self, param: Param) -> Self {
        self.params.push(param);
        self
    }

    /// Marks the type as always shared.
    pub fn singleton(mut self) -> Self {
        self.metadata.push(TypeMetadata::Singleton);
        self
    }

    /// Marks the type as shared within a scope.
    pub fn scoped(mut self) -> Self {
        self.metadata.push(TypeMetadata::Scoped);
        self
    }

    /// Declares a wildcard auto-binding target.
    pub fn binds_to(mut self, target: ServiceKey) -> Self {
        self.metadata.push(TypeMetadata::Bind {
            target,
            environments: Vec::new(),
        });
        self
    }

    /// Declares an environment-scoped auto-binding target.
    pub fn binds_to_in(mut self, target: ServiceKey, environments: &[&str]) -> Self {
        self.metadata.push(TypeMetadata::Bind {
            target,
            environments: environments.iter().map(|e| e.to_string()).collect(),
        });
        self
    }

    /// Attaches a class-level attribute.
    pub fn with_metadata<A: Send + Sync + 'static>(mut self, attribute: A) -> Self {
        self.metadata
            .push(TypeMetadata::Attribute(AttributeRef::new(attribute)));
        self
    }

    /// Declares the self-building capability: `method` is invoked instead
    /// of constructor injection.
    pub fn self_constructing(mut self, method: MethodRecipe) -> Self {
        self.self_constructor = Some(method);
        self
    }

    /// Exposes a method for `call_named("Type@method")`.
    pub fn exposes(mut self, method: MethodRecipe) -> Self {
        self.methods.push(method);
        self
    }

    /// Finalizes the recipe with a constructor thunk.
    pub fn constructed_by<T: Send + Sync + 'static>(
        self,
        constructor: impl Fn(ArgumentList) -> Result<T> + Send + Sync + 'static,
    ) -> TypeRecipe {
        let key = self.key;
        let params = Self::position_params(self.params, &key);
        TypeRecipe {
            key,
            params,
            metadata: self.metadata,
            constructor: Some(Arc::new(move |args| {
                Ok(Arc::new(constructor(args)?) as Service)
            })),
            self_constructor: self.self_constructor,
            methods: self.methods,
        }
    }

    /// Finalizes a recipe with no usable constructor (interface-like
    /// keys with metadata only, or self-constructing types).
    pub fn not_instantiable(self) -> TypeRecipe {
        let key = self.key;
        let params = Self::position_params(self.params, &key);
        TypeRecipe {
            key,
            params,
            metadata: self.metadata,
            constructor: None,
            self_constructor: self.self_constructor,
            methods: self.methods,
        }
    }

    fn position_params(params: Vec<Param>, key: &ServiceKey) -> Vec<ParamRecipe> {
        params
            .into_iter()
            .enumerate()
            .map(|(position, p)| p.finish(position, key.clone()))
            .collect()
    }
}

// ============================================================
// Link-time submissions & the cache
// ============================================================

/// A recipe registered at link time via [`inventory::submit!`].
///
/// ```rust,ignore
/// inventory::submit! {
///     RecipeSubmission::new(|| {
///         TypeRecipe::of::<ConsoleLogger>()
///             .constructed_by(|_| Ok(ConsoleLogger::default()))
///     })
/// }
/// ```
pub struct RecipeSubmission {
    recipe: fn() -> TypeRecipe,
}

impl RecipeSubmission {
    pub const fn new(recipe: fn() -> TypeRecipe) -> Self {
        Self { recipe }
    }
}

inventory::collect!(RecipeSubmission);

/// Memoizes type recipes for the life of the container.
///
/// Link-time submissions are folded in lazily on first access; explicit
/// registrations take precedence over submissions for the same key.
/// `flush` exists for test isolation only.
pub(crate) struct MetadataCache {
    cache: DashMap<ServiceKey, Arc<TypeRecipe>>,
    scanned: AtomicBool,
}

impl MetadataCache {
    pub fn new() -> Self {
        Self {
            cache: DashMap::new(),
            scanned: AtomicBool::new(false),
        }
    }

    fn ensure_scanned(&self) {
        if self.scanned.swap(true, Ordering::SeqCst) {
            return;
        }
        for submission in inventory::iter::<RecipeSubmission> {
            let recipe = (submission.recipe)();
            self.cache
                .entry(recipe.key.clone())
                .or_insert_with(|| Arc::new(recipe));
        }
    }

    pub fn recipe_for(&self, key: &ServiceKey) -> Option<Arc<TypeRecipe>> {
        self.ensure_scanned();
        self.cache.get(key).map(|entry| Arc::clone(&entry))
    }

    pub fn register(&self, recipe: TypeRecipe) {
        self.cache.insert(recipe.key.clone(), Arc::new(recipe));
    }

    pub fn flush(&self) {
        self.cache.clear();
        self.scanned.store(false, Ordering::SeqCst);
    }
}
