use azpolicy_config::{default_matrix, load_matrix};
use azpolicy_domain::Expectation;
use std::io::Write;
use std::path::Path;

#[test]
fn load_valid_fixture() {
    let path = Path::new(env!("CARGO_MANIFEST_DIR")).join("tests/fixtures/matrix.yml");
    let matrix = load_matrix(&path).expect("should load without error");

    assert_eq!(matrix.network_region, "West US 2");
    assert_eq!(matrix.regions.len(), 2);
    assert_eq!(matrix.regions[0].expect, Expectation::deny("denied regions"));
    assert_eq!(matrix.regions[1].expect, Expectation::Allow);
    assert_eq!(matrix.security_groups[0].port, "22");
    assert_eq!(matrix.security_rules[0].source_prefix, "10.0.0.0/16");
}

#[test]
fn missing_sections_default_to_empty() {
    let mut file = tempfile::NamedTempFile::new().unwrap();
    writeln!(file, "regions:\n  - {{ region: East US, expect: allow }}").unwrap();

    let matrix = load_matrix(file.path()).unwrap();
    assert_eq!(matrix.regions.len(), 1);
    assert!(matrix.security_groups.is_empty());
    assert!(matrix.security_rules.is_empty());
    assert_eq!(matrix.network_region, "Switzerland West");
}

#[test]
fn malformed_yaml_is_a_parse_error() {
    let mut file = tempfile::NamedTempFile::new().unwrap();
    writeln!(file, "regions: [ {{ region: East US").unwrap();

    let err = load_matrix(file.path()).unwrap_err();
    assert!(err.to_string().contains("yaml parse error"), "got: {}", err);
}

#[test]
fn missing_file_returns_error() {
    let path = Path::new("/nonexistent/path/matrix.yml");
    assert!(load_matrix(path).is_err());
}

#[test]
fn default_matrix_is_available() {
    let matrix = default_matrix().unwrap();
    assert!(!matrix.regions.is_empty());
    assert!(!matrix.security_groups.is_empty());
    assert!(!matrix.security_rules.is_empty());
}
