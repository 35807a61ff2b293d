#![no_main]
use libfuzzer_sys::fuzz_target;
use shape_planner_core::shapes_file::parse_shapes;

fuzz_target!(|data: &[u8]| {
    let _ = parse_shapes(data);
});
