use std::collections::HashMap;
use std::sync::{OnceLock, RwLock};

use crate::provider::ProviderRef;

#[derive(Clone)]
struct RegisteredProvider {
    provider: ProviderRef,
    source_id: Option<String>,
}

fn provider_registry() -> &'static RwLock<HashMap<String, RegisteredProvider>> {
    static REGISTRY: OnceLock<RwLock<HashMap<String, RegisteredProvider>>> = OnceLock::new();
    REGISTRY.get_or_init(|| RwLock::new(HashMap::new()))
}

/// Registers `provider` under its own name, replacing any earlier entry.
pub fn register_provider(provider: ProviderRef, source_id: Option<String>) {
    let mut registry = provider_registry()
        .write()
        .expect("provider registry lock poisoned");
    registry.insert(
        provider.name().to_string(),
        RegisteredProvider {
            provider,
            source_id,
        },
    );
}

pub fn get_provider(name: &str) -> Option<ProviderRef> {
    let registry = provider_registry()
        .read()
        .expect("provider registry lock poisoned");
    registry.get(name).map(|entry| entry.provider.clone())
}

pub fn get_providers() -> Vec<ProviderRef> {
    let registry = provider_registry()
        .read()
        .expect("provider registry lock poisoned");
    registry
        .values()
        .map(|entry| entry.provider.clone())
        .collect()
}

pub fn unregister_providers(source_id: &str) {
    let mut registry = provider_registry()
        .write()
        .expect("provider registry lock poisoned");
    registry.retain(|_, entry| entry.source_id.as_deref() != Some(source_id));
}

pub fn clear_providers() {
    let mut registry = provider_registry()
        .write()
        .expect("provider registry lock poisoned");
    registry.clear();
}
