//! Identifier, prefix, version and URL validation

use partner_tables::validation::InputValidator;

#[test]
fn test_validate_identifier_valid() {
    assert!(InputValidator::validate_identifier("location").is_ok());
    assert!(InputValidator::validate_identifier("wp_pt_location").is_ok());
    assert!(InputValidator::validate_identifier("_private").is_ok());
}

#[test]
fn test_validate_identifier_empty() {
    assert!(InputValidator::validate_identifier("").is_err());
}

#[test]
fn test_validate_identifier_rejects_sql() {
    assert!(InputValidator::validate_identifier("city; DROP TABLE items").is_err());
    assert!(InputValidator::validate_identifier("city\"").is_err());
    assert!(InputValidator::validate_identifier("1city").is_err());
}

#[test]
fn test_validate_identifier_too_long() {
    let name = "a".repeat(65);
    assert!(InputValidator::validate_identifier(&name).is_err());
    assert!(InputValidator::validate_identifier(&"a".repeat(64)).is_ok());
}

#[test]
fn test_validate_table_prefix() {
    assert!(InputValidator::validate_table_prefix("").is_ok());
    assert!(InputValidator::validate_table_prefix("wp_").is_ok());
    assert!(InputValidator::validate_table_prefix("wp-").is_err());
    assert!(InputValidator::validate_table_prefix(&"p".repeat(33)).is_err());
}

#[test]
fn test_validate_version() {
    assert!(InputValidator::validate_version("1.0.0").is_ok());
    assert!(InputValidator::validate_version("2.1").is_ok());
    assert!(InputValidator::validate_version("1.0.0-beta").is_ok());
    assert!(InputValidator::validate_version("").is_err());
    assert!(InputValidator::validate_version("one.two").is_err());
}

#[test]
fn test_row_ids_must_be_positive() {
    assert!(InputValidator::is_valid_row_id(1));
    assert!(!InputValidator::is_valid_row_id(0));
    assert!(!InputValidator::is_valid_row_id(-7));
}

#[test]
fn test_validate_database_url() {
    assert!(InputValidator::validate_database_url("sqlite:data/partner_tables.db").is_ok());
    assert!(InputValidator::validate_database_url("sqlite:///tmp/x.db").is_ok());
    assert!(InputValidator::validate_database_url(":memory:").is_ok());
    assert!(InputValidator::validate_database_url("").is_err());
    assert!(InputValidator::validate_database_url("mysql://localhost/wp").is_err());
}
