//! Method invocation with container-supplied arguments.
//!
//! A [`MethodRecipe`] describes a callable the way a [`TypeRecipe`]
//! describes a constructor: named parameters plus an invoke thunk. The
//! container resolves each parameter through the same dependency
//! pipeline constructors use, then hands the argument list (and the
//! resolved receiver, for instance methods) to the thunk.

use std::sync::Arc;

use crate::container::Container;
use crate::context::{Parameters, ResolutionContext};
use crate::error::{ContainerError, Result};
use crate::key::ServiceKey;
use crate::recipe::{Argument, ArgumentList, Param, ParamRecipe, Service};

/// Invocation thunk: receives the resolved receiver (`None` for free
/// functions) and the resolved argument list.
pub type InvokeFn = Arc<dyn Fn(Option<Service>, ArgumentList) -> Result<Service> + Send + Sync>;

/// Descriptor of an invokable method or free function.
#[derive(Clone)]
pub struct MethodRecipe {
    pub name: &'static str,
    /// Receiver class; `None` for free functions and static constructors.
    pub class: Option<ServiceKey>,
    pub params: Vec<ParamRecipe>,
    invoke: InvokeFn,
}

impl MethodRecipe {
    /// Starts a recipe for a free function.
    pub fn function(name: &'static str) -> MethodRecipeBuilder {
        MethodRecipeBuilder {
            name,
            class: None,
            params: Vec::new(),
        }
    }

    /// Starts a recipe for an instance method on `T`. The receiver is
    /// resolved out of the container before the arguments.
    pub fn on<T: Send + Sync + 'static>(name: &'static str) -> MethodRecipeBuilder {
        MethodRecipeBuilder {
            name,
            class: Some(ServiceKey::of::<T>()),
            params: Vec::new(),
        }
    }

    pub(crate) fn invoke(&self, receiver: Option<Service>, args: ArgumentList) -> Result<Service> {
        (self.invoke)(receiver, args)
    }
}

pub struct MethodRecipeBuilder {
    name: &'static str,
    class: Option<ServiceKey>,
    params: Vec<Param>,
}

impl MethodRecipeBuilder {
    /// Declares the next parameter.
    pub fn needs(mut self, param: Param) -> Self {
        self.params.push(param);
        self
    }

    /// Finishes with a body that ignores the receiver.
    pub fn returning<R: Send + Sync + 'static>(
        self,
        body: impl Fn(ArgumentList) -> Result<R> + Send + Sync + 'static,
    ) -> MethodRecipe {
        self.finish(Arc::new(move |_receiver, args| {
            Ok(Arc::new(body(args)?) as Service)
        }))
    }

    /// Finishes with a body that receives the resolved `T` receiver.
    pub fn returning_with<T, R>(
        self,
        body: impl Fn(Arc<T>, ArgumentList) -> Result<R> + Send + Sync + 'static,
    ) -> MethodRecipe
    where
        T: Send + Sync + 'static,
        R: Send + Sync + 'static,
    {
        self.finish(Arc::new(move |receiver, args| {
            let receiver = receiver
                .ok_or(ContainerError::ArgumentMismatch {
                    expected: "an instance receiver",
                })?
                .downcast::<T>()
                .map_err(|_| ContainerError::ArgumentMismatch {
                    expected: std::any::type_name::<T>(),
                })?;
            Ok(Arc::new(body(receiver, args)?) as Service)
        }))
    }

    fn finish(self, invoke: InvokeFn) -> MethodRecipe {
        let declared_by = self
            .class
            .clone()
            .unwrap_or_else(|| ServiceKey::named(self.name));
        let params = self
            .params
            .into_iter()
            .enumerate()
            .map(|(position, p)| p.finish(position, declared_by.clone()))
            .collect();
        MethodRecipe {
            name: self.name,
            class: self.class,
            params,
            invoke,
        }
    }
}

impl Container {
    /// Invokes a method recipe, resolving its parameters (and receiver,
    /// for instance methods) from the container. Explicit `params` are
    /// consumed by name first; leftovers are appended positionally.
    pub fn call(&self, recipe: &MethodRecipe, params: Parameters) -> Result<Service> {
        let mut ctx = ResolutionContext::new();
        self.call_in(recipe, params, &mut ctx)
    }

    /// Invokes a `"Type@method"` string target.
    ///
    /// Targets registered through [`Container::bind_method`] short-circuit
    /// everything else. Otherwise the class part must have a recipe whose
    /// methods include the named one; a target with no `@` falls back to
    /// `default_method` when given.
    pub fn call_named(
        &self,
        target: &str,
        params: Parameters,
        default_method: Option<&str>,
    ) -> Result<Service> {
        if let Some(binding) = self.method_binding(target) {
            return binding(self);
        }
        let (class, method) = match target.split_once('@') {
            Some((class, method)) => (class, method),
            None => match default_method {
                Some(method) => (target, method),
                None => {
                    return Err(ContainerError::UnknownMethod {
                        target: target.to_string(),
                    });
                }
            },
        };
        let class_key = self.canonical(&ServiceKey::named(class.to_string()))?;
        let recipe = self
            .recipe_for(&class_key)
            .ok_or_else(|| ContainerError::UnknownMethod {
                target: target.to_string(),
            })?;
        let method = recipe
            .method(method)
            .cloned()
            .ok_or_else(|| ContainerError::UnknownMethod {
                target: target.to_string(),
            })?;
        self.call(&method, params)
    }

    /// Packages a call as a deferred closure.
    pub fn wrap(
        &self,
        recipe: MethodRecipe,
        params: Parameters,
    ) -> impl Fn() -> Result<Service> + Send + Sync + use<> {
        let container = self.clone();
        move || container.call(&recipe, params.clone())
    }

    pub(crate) fn call_in(
        &self,
        recipe: &MethodRecipe,
        params: Parameters,
        ctx: &mut ResolutionContext,
    ) -> Result<Service> {
        let receiver = match &recipe.class {
            Some(class) => Some(self.resolve_in(class.clone(), Parameters::new(), true, ctx)?),
            None => None,
        };

        let frame_key = recipe
            .class
            .clone()
            .unwrap_or_else(|| ServiceKey::named(recipe.name));
        ctx.push_type(frame_key);
        ctx.push_overrides(params);
        let args = self.resolve_dependencies(&recipe.params, ctx);
        // Unmatched explicit parameters become trailing positional args.
        let args = args.map(|mut list| {
            if let Some(frame) = ctx.last_overrides_mut() {
                for (_, value) in frame.drain_entries() {
                    list.push(Argument::One(value));
                }
            }
            list
        });
        ctx.pop_overrides();
        ctx.pop_frame();

        recipe.invoke(receiver, ArgumentList::new(args?))
    }
}
