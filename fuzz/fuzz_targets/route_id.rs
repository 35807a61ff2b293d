#![no_main]
use arbitrary::Arbitrary;
use libfuzzer_sys::fuzz_target;
use shape_planner_core::ShapeStore;
use shape_planner_model::RouteId;
use std::path::{Component, Path};

#[derive(Debug, Arbitrary)]
struct FuzzData {
    start_stop_id: String,
    end_stop_id: String,
}

fuzz_target!(|data: FuzzData| {
    let Ok(route_id) = RouteId::derive(&data.start_stop_id, &data.end_stop_id) else {
        return;
    };
    let store = ShapeStore::new("shapes");
    let path = store.path_for(&route_id);
    assert_eq!(path.parent(), Some(Path::new("shapes")));
    assert!(path
        .components()
        .all(|component| matches!(component, Component::Normal(_))));
});
