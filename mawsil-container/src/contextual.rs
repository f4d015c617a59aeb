//! Fluent builder for contextual bindings.
//!
//! `container.when_type::<PhotoController>().needs::<dyn Filesystem>()
//! .give_key(..)` records an override that only applies while the named
//! consumer is on the build stack.

use std::sync::Arc;

use crate::container::Container;
use crate::error::ContainerError;
use crate::key::ServiceKey;
use crate::recipe::Service;
use crate::registry::{ContextualImpl, FactoryFn};

/// Source of configuration values for [`ContextualBindingBuilder::give_config`].
///
/// Bind an implementation into the container under its own key; config
/// injections resolve it on demand.
pub trait ConfigRepository: Send + Sync {
    fn get(&self, key: &str) -> Option<Service>;
}

/// Builder returned by [`Container::when`]. Holds the consumer keys until
/// `needs*` names the dependency and a `give*` call commits the override.
pub struct ContextualBindingBuilder {
    container: Container,
    consumers: Vec<ServiceKey>,
    needs: Option<ServiceKey>,
}

impl ContextualBindingBuilder {
    pub(crate) fn new(container: Container, consumers: Vec<ServiceKey>) -> Self {
        Self {
            container,
            consumers,
            needs: None,
        }
    }

    /// Names the dependency being overridden by type.
    pub fn needs<T: ?Sized + 'static>(mut self) -> Self {
        self.needs = Some(ServiceKey::of::<T>());
        self
    }

    /// Names the dependency being overridden by key.
    pub fn needs_key(mut self, key: impl Into<ServiceKey>) -> Self {
        self.needs = Some(key.into());
        self
    }

    /// Names a primitive constructor parameter (`$name`) being overridden.
    pub fn needs_value(mut self, name: &str) -> Self {
        self.needs = Some(ServiceKey::parameter(name));
        self
    }

    /// Resolve the dependency as `T` instead.
    pub fn give<T: ?Sized + 'static>(self) {
        self.commit(ContextualImpl::Key(ServiceKey::of::<T>()));
    }

    /// Resolve the dependency from `key` instead.
    pub fn give_key(self, key: impl Into<ServiceKey>) {
        self.commit(ContextualImpl::Key(key.into()));
    }

    /// Hand the consumer this exact value.
    pub fn give_value(self, value: Service) {
        self.commit(ContextualImpl::Value(value));
    }

    /// Run this factory in the consumer's build context.
    pub fn give_factory(self, factory: FactoryFn) {
        self.commit(ContextualImpl::Factory(factory));
    }

    /// Resolve every key; the consumer receives a `Vec<Service>` payload.
    pub fn give_keys(self, keys: Vec<ServiceKey>) {
        self.commit(ContextualImpl::Keys(keys));
    }

    /// Hand the consumer everything registered under `tag`, resolved
    /// eagerly at injection time into an `Arc<Vec<Service>>` payload.
    pub fn give_tagged(self, tag: impl Into<String>) {
        let tag = tag.into();
        self.commit(ContextualImpl::Factory(Arc::new(move |bcx| {
            let values = bcx.container().tagged(&tag).values()?;
            Ok(Arc::new(values) as Service)
        })));
    }

    /// Look the value up in the bound [`ConfigRepository`], falling back
    /// to `default` when the key is absent.
    pub fn give_config(self, key: impl Into<String>, default: Option<Service>) {
        let key = key.into();
        self.commit(ContextualImpl::Factory(Arc::new(move |bcx| {
            let repo_key = ServiceKey::of::<dyn ConfigRepository>();
            let repo = bcx
                .make_key(repo_key.clone())?
                .downcast::<Arc<dyn ConfigRepository>>()
                .map_err(|_| ContainerError::TypeMismatch {
                    key: repo_key,
                    expected: "Arc<dyn ConfigRepository>",
                })?;
            repo.get(&key)
                .or_else(|| default.clone())
                .ok_or_else(|| ContainerError::MissingConfig { key: key.clone() })
        })));
    }

    fn commit(self, implementation: ContextualImpl) {
        let Some(needs) = self.needs else {
            debug_assert!(false, "contextual give* called before needs* named a dependency");
            return;
        };
        self.container
            .add_contextual(self.consumers, needs, implementation);
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;
    use crate::lifetime::Lifetime;
    use crate::recipe::{Param, TypeRecipe};

    trait Rule: Send + Sync {
        fn name(&self) -> &'static str;
    }

    struct MinLength;
    impl Rule for MinLength {
        fn name(&self) -> &'static str {
            "min_length"
        }
    }

    struct Uppercase;
    impl Rule for Uppercase {
        fn name(&self) -> &'static str {
            "uppercase"
        }
    }

    struct Validator {
        rules: Vec<Arc<dyn Rule>>,
    }

    fn register_rule_world(container: &Container) {
        container
            .bind_key(
                ServiceKey::named("rule.min"),
                Arc::new(|_| Ok(Arc::new(Arc::new(MinLength) as Arc<dyn Rule>) as Service)),
                Lifetime::Transient,
            )
            .unwrap();
        container
            .bind_key(
                ServiceKey::named("rule.upper"),
                Arc::new(|_| Ok(Arc::new(Arc::new(Uppercase) as Arc<dyn Rule>) as Service)),
                Lifetime::Transient,
            )
            .unwrap();
        container.register_recipe(
            TypeRecipe::of::<Validator>()
                .needs(Param::of::<dyn Rule>("rules").variadic())
                .constructed_by(|mut args| {
                    let rules = args
                        .take_variadic::<Arc<dyn Rule>>()?
                        .into_iter()
                        .map(|r| (*r).clone())
                        .collect();
                    Ok(Validator { rules })
                }),
        );
    }

    #[test]
    fn give_keys_fills_a_variadic_parameter_in_order() {
        let container = Container::new();
        register_rule_world(&container);

        container
            .when_type::<Validator>()
            .needs::<dyn Rule>()
            .give_keys(vec![
                ServiceKey::named("rule.min"),
                ServiceKey::named("rule.upper"),
            ]);

        let validator = container.make::<Validator>().unwrap();
        let names: Vec<_> = validator.rules.iter().map(|r| r.name()).collect();
        assert_eq!(names, vec!["min_length", "uppercase"]);
    }

    #[test]
    fn give_tagged_flattens_the_tag_into_a_variadic_parameter() {
        let container = Container::new();
        register_rule_world(&container);
        container.tag(
            &[ServiceKey::named("rule.min"), ServiceKey::named("rule.upper")],
            "rules",
        );

        container
            .when_type::<Validator>()
            .needs::<dyn Rule>()
            .give_tagged("rules");

        let validator = container.make::<Validator>().unwrap();
        let names: Vec<_> = validator.rules.iter().map(|r| r.name()).collect();
        assert_eq!(names, vec!["min_length", "uppercase"]);
    }

    struct MapConfig {
        entries: HashMap<String, Service>,
    }

    impl ConfigRepository for MapConfig {
        fn get(&self, key: &str) -> Option<Service> {
            self.entries.get(key).cloned()
        }
    }

    #[derive(Debug)]
    struct Endpoint {
        url: String,
    }

    fn register_endpoint_world(container: &Container, entries: HashMap<String, Service>) {
        container
            .singleton_as::<dyn ConfigRepository, Arc<dyn ConfigRepository>, _>(move |_| {
                Ok(Arc::new(MapConfig {
                    entries: entries.clone(),
                }) as Arc<dyn ConfigRepository>)
            })
            .unwrap();
        container.register_recipe(
            TypeRecipe::of::<Endpoint>()
                .needs(Param::value("url"))
                .constructed_by(|mut args| {
                    Ok(Endpoint {
                        url: args.take_cloned::<String>()?,
                    })
                }),
        );
    }

    #[test]
    fn give_config_reads_the_bound_repository() {
        let container = Container::new();
        let mut entries = HashMap::new();
        entries.insert(
            String::from("endpoints.api"),
            Arc::new(String::from("https://api.example.test")) as Service,
        );
        register_endpoint_world(&container, entries);

        container
            .when_type::<Endpoint>()
            .needs_value("url")
            .give_config("endpoints.api", None);

        let endpoint = container.make::<Endpoint>().unwrap();
        assert_eq!(endpoint.url, "https://api.example.test");
    }

    #[test]
    fn give_config_falls_back_to_its_default() {
        let container = Container::new();
        register_endpoint_world(&container, HashMap::new());

        container
            .when_type::<Endpoint>()
            .needs_value("url")
            .give_config(
                "endpoints.api",
                Some(Arc::new(String::from("http://localhost")) as Service),
            );

        let endpoint = container.make::<Endpoint>().unwrap();
        assert_eq!(endpoint.url, "http://localhost");
    }

    #[test]
    fn give_config_without_a_value_or_default_errors() {
        let container = Container::new();
        register_endpoint_world(&container, HashMap::new());

        container
            .when_type::<Endpoint>()
            .needs_value("url")
            .give_config("endpoints.api", None);

        let err = container.make::<Endpoint>().unwrap_err();
        match err {
            ContainerError::MissingConfig { key } => assert_eq!(key, "endpoints.api"),
            other => panic!("expected MissingConfig, got {other}"),
        }
    }

    #[test]
    #[should_panic(expected = "needs*")]
    fn give_without_needs_is_rejected() {
        let container = Container::new();
        container
            .when_type::<Validator>()
            .give_key(ServiceKey::named("rule.min"));
    }
}
