//! Tests for parameter grids

use serde_json::json;
use sweep_scheduler::core::{ParameterGrid, ParameterSource};

#[test]
fn test_zip_grid_pairs_values_by_position() {
    let grid = ParameterGrid::new("zip")
        .with_default("tau_ms", 10.0)
        .explore("rate", [1.0, 2.0, 4.0])
        .explore("seed", [7, 8, 9]);
    assert!(grid.validate().is_ok());

    let runs = grid.enumerate();
    assert_eq!(runs.len(), 3);
    let (index, params) = &runs[2];
    assert_eq!(*index, 2);
    assert_eq!(params["rate"], json!(4.0));
    assert_eq!(params["seed"], json!(9));
    assert_eq!(params["tau_ms"], json!(10.0));
}

#[test]
fn test_cartesian_grid_first_parameter_varies_slowest() {
    let grid = ParameterGrid::new("cart")
        .explore("a", [1, 2])
        .explore("b", ["x", "y", "z"])
        .cartesian();
    assert_eq!(grid.len(), 6);

    let runs = grid.enumerate();
    let pairs: Vec<(i64, String)> = runs
        .iter()
        .map(|(_, p)| (p["a"].as_i64().unwrap(), p["b"].as_str().unwrap().to_string()))
        .collect();
    assert_eq!(pairs[0], (1, "x".to_string()));
    assert_eq!(pairs[2], (1, "z".to_string()));
    assert_eq!(pairs[3], (2, "x".to_string()));
    let indices: Vec<u64> = runs.iter().map(|(i, _)| *i).collect();
    assert_eq!(indices, (0..6).collect::<Vec<_>>());
}

#[test]
fn test_enumeration_is_deterministic() {
    let grid = ParameterGrid::new("det")
        .explore("x", [3, 1, 2])
        .explore("y", [true, false])
        .cartesian();
    assert_eq!(grid.enumerate(), grid.enumerate());
}

#[test]
fn test_grid_without_exploration_is_one_run() {
    let grid = ParameterGrid::new("single").with_default("steps", 1000);
    assert_eq!(grid.len(), 1);
    assert_eq!(grid.enumerate()[0].1["steps"], json!(1000));
}

#[test]
fn test_invalid_grids() {
    let mismatched = ParameterGrid::new("bad")
        .explore("a", [1, 2, 3])
        .explore("b", [1, 2]);
    assert!(mismatched.validate().is_err());

    let empty_values = ParameterGrid::new("bad").explore("a", Vec::<i64>::new());
    assert!(empty_values.validate().is_err());

    assert!(ParameterGrid::new("").validate().is_err());
}
