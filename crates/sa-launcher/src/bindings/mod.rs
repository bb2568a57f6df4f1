//! Binding providers, one per host subsystem.
pub mod graphics;
pub mod platform;
pub mod runtime;
pub mod streams;
pub mod threading;

use crate::state::StateCells;
use crate::stubs;
use graphics::Graphics;
use so_loader::Result;
use so_loader::binding::{BindingProvider, BindingTable};

/// Composes every provider into one table, always in the same order.
pub fn build_table(graphics: &Graphics) -> Result<BindingTable> {
    let providers: [&dyn BindingProvider; 6] = [
        &runtime::Runtime,
        &threading::Threading,
        graphics,
        &streams::Streams,
        &StateCells,
        &platform::Platform,
    ];
    let mut table = BindingTable::new(stubs::stub_set());
    for provider in providers {
        table.register(provider)?;
    }
    log::info!("binding table holds {} entries", table.len());
    Ok(table)
}

#[cfg(test)]
mod tests {
    use super::*;
    use so_loader::binding::{BindingKind, SAFE_TO_STUB};

    #[test]
    fn providers_compose_without_duplicates() {
        let table = build_table(&Graphics::unavailable(false)).unwrap();
        for (name, kind) in SAFE_TO_STUB {
            assert_eq!(table.get(name).map(|b| b.kind), Some(BindingKind::Stub(*kind)), "{name}");
        }
        for name in ["malloc", "pthread_mutex_lock", "glClear", "fopen", "hasTouchScreen", "__android_log_print"] {
            assert!(table.get(name).is_some(), "{name}");
        }
    }

    #[test]
    fn only_safe_names_are_stubbed() {
        let table = build_table(&Graphics::unavailable(false)).unwrap();
        let stubbed = table
            .iter()
            .filter(|b| matches!(b.kind, BindingKind::Stub(_)))
            .count();
        assert_eq!(stubbed, SAFE_TO_STUB.len());
    }
}
