use std::sync::Arc;

use ifrit::handler::handler_registry::{HandlerQuery, HandlerRegistry};
use pretty_assertions::assert_eq;
use serde_json::json;

use super::common::{FixedHandler, Outcome, CAPABILITY};

fn registry() -> Arc<HandlerRegistry> {
    let registry = HandlerRegistry::isolated();
    for (id, priority) in [("H1", 1), ("H2", 5), ("H3", 3)] {
        registry.register(Arc::new(FixedHandler::new(
            id,
            priority,
            Outcome::Data(json!(id)),
        )));
    }
    registry
}

fn ids(registry: &HandlerRegistry, query: &HandlerQuery) -> Vec<String> {
    registry
        .handler_chain(query)
        .iter()
        .map(|handler| handler.id().to_string())
        .collect()
}

#[test]
fn test_chain_orders_by_priority() {
    let registry = registry();
    assert_eq!(ids(&registry, &HandlerQuery::new(CAPABILITY)), vec!["H2", "H3", "H1"]);
}

#[test]
fn test_preferred_handler_leads_the_chain() {
    let registry = registry();
    assert_eq!(
        ids(&registry, &HandlerQuery::new(CAPABILITY).prefer("H1")),
        vec!["H1", "H2", "H3"]
    );
}

#[test]
fn test_excluded_handler_never_appears() {
    let registry = registry();
    let chain = ids(&registry, &HandlerQuery::new(CAPABILITY).exclude(["H2"]));
    assert_eq!(chain, vec!["H3", "H1"]);
}

#[test]
fn test_overlapping_preference_and_fallbacks_stay_unique() {
    let registry = registry();
    let chain = ids(
        &registry,
        &HandlerQuery::new(CAPABILITY)
            .prefer("H3")
            .fallbacks(["H3", "H1", "H1"]),
    );
    assert_eq!(chain, vec!["H3", "H1", "H2"]);
}

#[test]
fn test_unavailable_handler_is_left_out() {
    let registry = registry();
    assert!(registry.set_available("H2", false));
    assert_eq!(ids(&registry, &HandlerQuery::new(CAPABILITY)), vec!["H3", "H1"]);
    assert!(registry.can_fulfill(CAPABILITY));
}
