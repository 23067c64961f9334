//! Publish-route declarations.
//!
//! Each outbound domain event type declares where it goes on the queue
//! broker. The outbox publisher looks the route up by the event's type name;
//! an undeclared type is a configuration error surfaced by the publisher.

use std::collections::HashMap;

use crate::registry::RegistryError;

/// Queue-broker routing mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExchangeKind {
    /// Route by key on a direct exchange.
    Direct,
    /// Broadcast on a fanout exchange; the route key is ignored.
    FanOut,
    /// No exchange: publish straight to a named queue.
    Default,
}

/// Declared destination for one event type.
#[derive(Debug, Clone)]
pub struct EventRoute {
    pub kind: ExchangeKind,
    pub exchange: String,
    /// Routing key for `Direct`, queue name for `Default`, unused for `FanOut`.
    pub route: String,
}

impl EventRoute {
    pub fn direct(exchange: impl Into<String>, route: impl Into<String>) -> Self {
        Self {
            kind: ExchangeKind::Direct,
            exchange: exchange.into(),
            route: route.into(),
        }
    }

    pub fn fan_out(exchange: impl Into<String>) -> Self {
        Self {
            kind: ExchangeKind::FanOut,
            exchange: exchange.into(),
            route: String::new(),
        }
    }

    pub fn queue(queue: impl Into<String>) -> Self {
        Self {
            kind: ExchangeKind::Default,
            exchange: String::new(),
            route: queue.into(),
        }
    }
}

/// Event-type-name -> route map, populated at startup next to the handler
/// registry.
#[derive(Default)]
pub struct RouteRegistry {
    routes: HashMap<String, EventRoute>,
}

impl RouteRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn declare(
        &mut self,
        type_name: impl Into<String>,
        route: EventRoute,
    ) -> Result<(), RegistryError> {
        let type_name = type_name.into();
        if self.routes.contains_key(&type_name) {
            return Err(RegistryError::DuplicateRoute(type_name));
        }
        self.routes.insert(type_name, route);
        Ok(())
    }

    pub fn route_for(&self, type_name: &str) -> Option<&EventRoute> {
        self.routes.get(type_name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn declares_and_resolves_routes() {
        let mut routes = RouteRegistry::new();
        routes
            .declare("OrderPlaced", EventRoute::direct("orders", "order.placed"))
            .unwrap();

        let route = routes.route_for("OrderPlaced").unwrap();
        assert_eq!(route.kind, ExchangeKind::Direct);
        assert_eq!(route.exchange, "orders");
        assert_eq!(route.route, "order.placed");
        assert!(routes.route_for("Unknown").is_none());
    }

    #[test]
    fn duplicate_declaration_is_rejected() {
        let mut routes = RouteRegistry::new();
        routes
            .declare("OrderPlaced", EventRoute::fan_out("orders"))
            .unwrap();
        assert!(routes
            .declare("OrderPlaced", EventRoute::fan_out("orders"))
            .is_err());
    }
}
