use super::HandlerContext;
use crate::core::{DbError, Entity, FieldMask, Result};
use async_trait::async_trait;
use std::any::{Any, TypeId};
use std::collections::HashMap;
use std::sync::Arc;

/// A before-save handler for entity type `E`.
///
/// `before` is the state the current convergence pass started from;
/// `proposed` is the live record and may be mutated in place.
#[async_trait]
pub trait BeforeSave<E: Entity>: Send + Sync {
    async fn before_save(&self, cx: &mut HandlerContext<'_>, before: &E, proposed: &mut E) -> Result<()>;
}

/// Adapter for handlers that never await.
pub struct FnHandler<F>(pub F);

#[async_trait]
impl<E, F> BeforeSave<E> for FnHandler<F>
where
    E: Entity,
    F: Fn(&mut HandlerContext<'_>, &E, &mut E) -> Result<()> + Send + Sync,
{
    async fn before_save(&self, cx: &mut HandlerContext<'_>, before: &E, proposed: &mut E) -> Result<()> {
        (self.0)(cx, before, proposed)
    }
}

pub struct Handler<E: Entity> {
    name: String,
    qualified_name: String,
    /// `None` fires on any changed field.
    trigger: Option<FieldMask>,
    function: Arc<dyn BeforeSave<E>>,
}

impl<E: Entity> Handler<E> {
    pub fn name(&self) -> &str {
        &self.name
    }

    /// `"<entity>.<handler>"`, used in errors and logs.
    pub fn qualified_name(&self) -> &str {
        &self.qualified_name
    }

    pub fn trigger(&self) -> Option<&FieldMask> {
        self.trigger.as_ref()
    }

    /// Fields of `mask` this handler reacts to.
    pub fn triggered_by(&self, mask: &FieldMask) -> FieldMask {
        match &self.trigger {
            Some(trigger) => trigger.intersect(mask),
            None => mask.clone(),
        }
    }

    pub(crate) fn function(&self) -> &Arc<dyn BeforeSave<E>> {
        &self.function
    }
}

impl<E: Entity> Clone for Handler<E> {
    fn clone(&self) -> Self {
        Self {
            name: self.name.clone(),
            qualified_name: self.qualified_name.clone(),
            trigger: self.trigger.clone(),
            function: Arc::clone(&self.function),
        }
    }
}

impl<E: Entity> std::fmt::Debug for Handler<E> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Handler")
            .field("name", &self.qualified_name)
            .field("trigger", &self.trigger.as_ref().map(|mask| mask.fields_set(E::schema())))
            .finish()
    }
}

/// Before-save handlers, partitioned by entity type and kept in
/// registration order.
///
/// Built once at startup and shared by every operation of an engine.
#[derive(Default)]
pub struct HandlerRegistry {
    by_entity: HashMap<TypeId, Box<dyn Any + Send + Sync>>,
    names: Vec<String>,
}

impl HandlerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers `handler` for `E`, fired when any field in `trigger`
    /// changes (or any field at all for `None`).
    pub fn register<E: Entity>(
        &mut self,
        name: &str,
        trigger: Option<&[&str]>,
        handler: impl BeforeSave<E> + 'static,
    ) -> Result<&mut Self> {
        let schema = E::schema();
        schema
            .validate()
            .map_err(|err| DbError::Registry(format!("{} has an invalid schema: {}", E::entity_type(), err)))?;

        let trigger = match trigger {
            None => None,
            Some([]) => {
                return Err(DbError::Registry(format!(
                    "{}.{} has an empty trigger list",
                    E::entity_type(),
                    name
                )));
            }
            Some(fields) => Some(FieldMask::from_names(schema, fields).map_err(|err| {
                DbError::Registry(format!("{}.{}: {}", E::entity_type(), name, err))
            })?),
        };

        let handlers = self
            .by_entity
            .entry(TypeId::of::<E>())
            .or_insert_with(|| Box::new(Vec::<Handler<E>>::new()))
            .downcast_mut::<Vec<Handler<E>>>()
            .ok_or_else(|| DbError::Registry(format!("handler table for {} is corrupt", E::entity_type())))?;

        if handlers.iter().any(|existing| existing.name == name) {
            return Err(DbError::Registry(format!(
                "handler {}.{} is already registered",
                E::entity_type(),
                name
            )));
        }

        let qualified_name = format!("{}.{}", E::entity_type(), name);
        self.names.push(qualified_name.clone());
        handlers.push(Handler {
            name: name.to_string(),
            qualified_name,
            trigger,
            function: Arc::new(handler),
        });
        Ok(self)
    }

    pub fn register_fn<E: Entity>(
        &mut self,
        name: &str,
        trigger: Option<&[&str]>,
        function: impl Fn(&mut HandlerContext<'_>, &E, &mut E) -> Result<()> + Send + Sync + 'static,
    ) -> Result<&mut Self> {
        self.register::<E>(name, trigger, FnHandler(function))
    }

    /// Handlers for `E` in registration order.
    pub fn handlers<E: Entity>(&self) -> &[Handler<E>] {
        self.by_entity
            .get(&TypeId::of::<E>())
            .and_then(|table| table.downcast_ref::<Vec<Handler<E>>>())
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    /// Qualified names of every handler, in registration order.
    pub fn qualified_names(&self) -> &[String] {
        &self.names
    }

    pub fn len(&self) -> usize {
        self.names.len()
    }

    pub fn is_empty(&self) -> bool {
        self.names.is_empty()
    }
}

impl std::fmt::Debug for HandlerRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HandlerRegistry")
            .field("handlers", &self.names)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Entity;

    #[derive(Debug, Clone, Default, Entity)]
    struct Invoice {
        #[entity(id)]
        id: String,
        status: String,
        total: i64,
    }

    #[derive(Debug, Clone, Default, Entity)]
    struct Customer {
        #[entity(id)]
        id: String,
        name: String,
    }

    fn noop<E: Entity>(_: &mut HandlerContext<'_>, _: &E, _: &mut E) -> Result<()> {
        Ok(())
    }

    #[test]
    fn handlers_keep_registration_order_per_entity() {
        let mut registry = HandlerRegistry::new();
        registry
            .register_fn::<Invoice>("void", Some(&["status"]), noop)
            .unwrap()
            .register_fn::<Customer>("rename", None, noop)
            .unwrap()
            .register_fn::<Invoice>("audit", None, noop)
            .unwrap();

        let names: Vec<_> = registry
            .handlers::<Invoice>()
            .iter()
            .map(|handler| handler.qualified_name().to_string())
            .collect();
        assert_eq!(names, vec!["invoice.void", "invoice.audit"]);
        assert_eq!(registry.handlers::<Customer>().len(), 1);
        assert_eq!(registry.len(), 3);
    }

    #[test]
    fn trigger_limits_what_fires_a_handler() {
        let mut registry = HandlerRegistry::new();
        registry
            .register_fn::<Invoice>("void", Some(&["status"]), noop)
            .unwrap();
        let handler = &registry.handlers::<Invoice>()[0];

        let total_only = FieldMask::of::<Invoice>(&["total"]).unwrap();
        let both = FieldMask::of::<Invoice>(&["status", "total"]).unwrap();
        assert!(handler.triggered_by(&total_only).is_empty());
        assert_eq!(handler.triggered_by(&both).fields_set(Invoice::schema()), vec!["status"]);
    }

    #[test]
    fn registration_rejects_bad_declarations() {
        let mut registry = HandlerRegistry::new();
        assert!(matches!(
            registry.register_fn::<Invoice>("bad", Some(&["missing"]), noop),
            Err(DbError::Registry(_))
        ));
        assert!(matches!(
            registry.register_fn::<Invoice>("empty", Some(&[]), noop),
            Err(DbError::Registry(_))
        ));

        registry.register_fn::<Invoice>("void", None, noop).unwrap();
        assert!(matches!(
            registry.register_fn::<Invoice>("void", None, noop),
            Err(DbError::Registry(_))
        ));
        assert!(registry.register_fn::<Customer>("void", None, noop).is_ok());
    }

    #[test]
    fn unknown_entity_has_no_handlers() {
        let registry = HandlerRegistry::new();
        assert!(registry.handlers::<Invoice>().is_empty());
        assert!(registry.is_empty());
    }
}
