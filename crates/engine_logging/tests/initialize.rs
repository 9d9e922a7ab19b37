use std::fs;

use engine_logging::{engine_info, initialize, LogDestination};
use log::LevelFilter;
use tempfile::TempDir;

#[test]
fn file_destination_receives_engine_logs() {
    let temp = TempDir::new().unwrap();
    let path = temp.path().join("engine.log");

    initialize(LogDestination::File(path.clone()), LevelFilter::Info);
    engine_info!("list applied: {} rows", 3);
    log::logger().flush();

    let content = fs::read_to_string(&path).unwrap();
    assert!(content.contains("list applied: 3 rows"));
}
