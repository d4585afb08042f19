//! IoC container
//!
//! Records typed factories keyed by (runtime type, tag). `make` builds
//! lazily; singleton entries are built once and cached. The registry is
//! lock-protected so concurrent `make` calls are safe, and a singleton
//! factory runs at most once.

use anima_core::{Error, Result};
use std::any::{Any, TypeId};
use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, Mutex};

type Factory = Box<dyn Fn() -> Result<Box<dyn Any + Send + Sync>> + Send + Sync>;

struct Entry {
    factory: Factory,
    singleton: bool,
}

#[derive(Default)]
struct Registry {
    entries: HashMap<(TypeId, String), Entry>,
    objects: HashMap<(TypeId, String), Arc<dyn Any + Send + Sync>>,
}

/// A lock-protected IoC container.
#[derive(Default)]
pub struct Container {
    registry: Mutex<Registry>,
}

impl Container {
    /// Create an empty container.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a factory for `T` under `tag`. Rejects duplicates.
    pub fn register<T, F>(&self, tag: &str, factory: F, singleton: bool) -> Result<()>
    where
        T: Any + Send + Sync,
        F: Fn() -> Result<T> + Send + Sync + 'static,
    {
        let key = (TypeId::of::<T>(), tag.to_string());
        let mut registry = self.registry.lock().unwrap_or_else(|e| e.into_inner());

        if registry.entries.contains_key(&key) {
            return Err(Error::Container(format!(
                "entry `{}`.`{}` already exists",
                std::any::type_name::<T>(),
                tag
            )));
        }

        registry.entries.insert(
            key,
            Entry {
                factory: Box::new(move || Ok(Box::new(factory()?))),
                singleton,
            },
        );

        Ok(())
    }

    /// Instantiate (or fetch the cached singleton of) `T` under `tag`.
    pub fn make<T>(&self, tag: &str) -> Result<Arc<T>>
    where
        T: Any + Send + Sync,
    {
        let key = (TypeId::of::<T>(), tag.to_string());
        let mut registry = self.registry.lock().unwrap_or_else(|e| e.into_inner());
        let Registry { entries, objects } = &mut *registry;

        let entry = entries.get(&key).ok_or_else(|| {
            Error::Container(format!(
                "entry `{}`.`{}` is not registered",
                std::any::type_name::<T>(),
                tag
            ))
        })?;

        if !entry.singleton {
            let object = (entry.factory)()?;
            return downcast::<T>(object.into(), tag);
        }

        if let Some(cached) = objects.get(&key) {
            return downcast::<T>(Arc::clone(cached), tag);
        }

        let object: Arc<dyn Any + Send + Sync> = (entry.factory)()?.into();
        objects.insert(key, Arc::clone(&object));
        downcast::<T>(object, tag)
    }
}

fn downcast<T: Any + Send + Sync>(object: Arc<dyn Any + Send + Sync>, tag: &str) -> Result<Arc<T>> {
    object.downcast::<T>().map_err(|_| {
        Error::Container(format!(
            "entry `{}`.`{}` produced a value of another type",
            std::any::type_name::<T>(),
            tag
        ))
    })
}

impl fmt::Debug for Container {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let registry = self.registry.lock().unwrap_or_else(|e| e.into_inner());
        f.debug_struct("Container")
            .field("entries", &registry.entries.len())
            .field("singletons", &registry.objects.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[derive(Debug, PartialEq)]
    struct Connection {
        serial: usize,
    }

    #[test]
    fn test_make_unregistered_errors() {
        let container = Container::new();
        let err = container.make::<Connection>("primary").unwrap_err();
        assert!(matches!(err, Error::Container(_)));
    }

    #[test]
    fn test_duplicate_registration_rejected() {
        let container = Container::new();
        container
            .register::<Connection, _>("primary", || Ok(Connection { serial: 0 }), true)
            .unwrap();
        let err = container
            .register::<Connection, _>("primary", || Ok(Connection { serial: 1 }), true)
            .unwrap_err();
        assert!(matches!(err, Error::Container(_)));
    }

    #[test]
    fn test_singleton_factory_runs_once() {
        let container = Container::new();
        let built = Arc::new(AtomicUsize::new(0));

        let built_clone = built.clone();
        container
            .register::<Connection, _>(
                "primary",
                move || {
                    Ok(Connection {
                        serial: built_clone.fetch_add(1, Ordering::SeqCst),
                    })
                },
                true,
            )
            .unwrap();

        let a = container.make::<Connection>("primary").unwrap();
        let b = container.make::<Connection>("primary").unwrap();
        assert_eq!(built.load(Ordering::SeqCst), 1);
        assert!(Arc::ptr_eq(&a, &b));
    }

    #[test]
    fn test_transient_factory_runs_every_make() {
        let container = Container::new();
        let built = Arc::new(AtomicUsize::new(0));

        let built_clone = built.clone();
        container
            .register::<Connection, _>(
                "transient",
                move || {
                    Ok(Connection {
                        serial: built_clone.fetch_add(1, Ordering::SeqCst),
                    })
                },
                false,
            )
            .unwrap();

        let a = container.make::<Connection>("transient").unwrap();
        let b = container.make::<Connection>("transient").unwrap();
        assert_ne!(a.serial, b.serial);
        assert_eq!(built.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_same_tag_different_types_coexist() {
        let container = Container::new();
        container
            .register::<Connection, _>("shared", || Ok(Connection { serial: 7 }), true)
            .unwrap();
        container
            .register::<String, _>("shared", || Ok("seven".to_string()), true)
            .unwrap();

        assert_eq!(container.make::<Connection>("shared").unwrap().serial, 7);
        assert_eq!(*container.make::<String>("shared").unwrap(), "seven");
    }
}
