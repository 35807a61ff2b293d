#![no_main]
use libfuzzer_sys::fuzz_target;
use shape_planner_core::catalog::{load_catalog_from_bytes, CatalogOrder};

fuzz_target!(|data: &[u8]| {
    let Ok(catalog) = load_catalog_from_bytes(data, CatalogOrder::ByName) else {
        return;
    };
    for stop in catalog.selectable() {
        let position = stop.position().expect("selectable stops have a position");
        assert!(position.lat.abs() <= 90.0 && position.lon.abs() <= 180.0);
        assert!(catalog.get(&stop.stop_id).is_some());
    }
    assert!(catalog.skipped_count() <= catalog.len() + catalog.notices().len());
});
