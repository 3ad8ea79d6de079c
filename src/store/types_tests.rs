use std::io::Write;

use super::*;
use crate::error::StoreError;

#[test]
fn parameter_validates_int_values() {
    assert!(Parameter::new("Reaction Time", "360", ParameterType::Int, "s").is_ok());

    let err = Parameter::new("Reaction Time", "abc", ParameterType::Int, "s").unwrap_err();
    assert!(matches!(err, StoreError::InvalidValue { .. }));
}

#[test]
fn parameter_validates_float_values() {
    assert!(Parameter::new("Temperature", "36.6", ParameterType::Float, "°C").is_ok());
    assert!(Parameter::new("Temperature", "-5", ParameterType::Float, "°C").is_ok());

    let err = Parameter::new("Temperature", "warm", ParameterType::Float, "°C").unwrap_err();
    assert!(matches!(err, StoreError::InvalidValue { .. }));
}

#[test]
fn parameter_validates_bool_tokens() {
    for token in ["true", "false", "1", "0", "True", "FALSE"] {
        assert!(
            Parameter::new("Stirred", token, ParameterType::Bool, "").is_ok(),
            "token {:?} should be accepted",
            token
        );
    }

    let err = Parameter::new("Stirred", "yes", ParameterType::Bool, "").unwrap_err();
    assert!(matches!(err, StoreError::InvalidValue { .. }));
}

#[test]
fn parameter_rejects_empty_name() {
    let err = Parameter::new("", "1", ParameterType::Int, "").unwrap_err();
    assert!(matches!(err, StoreError::InvalidInput { .. }));

    let err = Parameter::new("   ", "1", ParameterType::Int, "").unwrap_err();
    assert!(matches!(err, StoreError::InvalidInput { .. }));
}

#[test]
fn parameter_numeric_value() {
    let p = Parameter::new("pH", "7.4", ParameterType::Float, "").unwrap();
    assert_eq!(p.numeric_value(), Some(7.4));

    let p = Parameter::new("Label", "control", ParameterType::String, "").unwrap();
    assert_eq!(p.numeric_value(), None);
}

#[test]
fn version_requires_experiment_and_name() {
    assert!(ExperimentVersion::new("exp-1", "baseline", "").is_ok());

    let err = ExperimentVersion::new("", "baseline", "").unwrap_err();
    assert!(matches!(err, StoreError::InvalidInput { .. }));

    let err = ExperimentVersion::new("exp-1", "", "").unwrap_err();
    assert!(matches!(err, StoreError::InvalidInput { .. }));
}

#[test]
fn version_starts_as_draft() {
    let version = ExperimentVersion::new("exp-1", "baseline", "first run").unwrap();
    assert_eq!(version.status, VersionStatus::Draft);
    assert_eq!(version.version_number, 0);
    assert!(version.parent_version_id.is_none());
}

#[test]
fn add_parameter_rejects_case_insensitive_duplicates() {
    let mut version = ExperimentVersion::new("exp-1", "baseline", "").unwrap();
    version
        .add_parameter("Temperature", "36.6", ParameterType::Float, "°C")
        .unwrap();

    let err = version
        .add_parameter("temperature", "40", ParameterType::Float, "°C")
        .unwrap_err();
    assert!(matches!(err, StoreError::DuplicateParameter { .. }));
    assert_eq!(version.parameters.len(), 1);
}

#[test]
fn status_round_trips_through_strings() {
    for status in [
        VersionStatus::Draft,
        VersionStatus::Active,
        VersionStatus::Completed,
        VersionStatus::Archived,
    ] {
        let parsed: VersionStatus = status.to_string().parse().unwrap();
        assert_eq!(parsed, status);
    }

    assert!("finished".parse::<VersionStatus>().is_err());
}

#[test]
fn enum_parsing_is_case_insensitive() {
    assert_eq!("EXCEL".parse::<SourceType>().unwrap(), SourceType::Excel);
    assert_eq!("Dataset".parse::<FileKind>().unwrap(), FileKind::Dataset);
    assert_eq!("FLOAT".parse::<ParameterType>().unwrap(), ParameterType::Float);
}

#[test]
fn file_reference_remote_url_skips_hashing() {
    let file_ref = FileReference::new(
        SourceType::Api,
        "https://example.com/data.csv",
        Some(FileKind::Dataset),
    )
    .unwrap();

    assert!(file_ref.is_remote());
    assert!(file_ref.file_hash.is_empty());
    assert_eq!(file_ref.size_bytes, 0);
}

#[test]
fn file_reference_missing_local_path_fails() {
    let err = FileReference::new(SourceType::Excel, "/nonexistent/readings.xlsx", None)
        .unwrap_err();
    assert!(matches!(err, StoreError::FileMissing { .. }));
}

#[test]
fn file_reference_hashes_local_files() {
    let mut file = tempfile::NamedTempFile::new().unwrap();
    file.write_all(b"temperature,pressure\n36.6,760\n").unwrap();

    let file_ref = FileReference::new(
        SourceType::Excel,
        file.path().to_string_lossy().to_string(),
        Some(FileKind::Dataset),
    )
    .unwrap();

    assert_eq!(file_ref.file_hash.len(), 64);
    assert!(file_ref.file_hash.chars().all(|c| c.is_ascii_hexdigit()));
    assert!(file_ref.size_bytes > 0);
    assert!(!file_ref.is_remote());
}

#[test]
fn identical_content_hashes_identically() {
    let mut a = tempfile::NamedTempFile::new().unwrap();
    let mut b = tempfile::NamedTempFile::new().unwrap();
    a.write_all(b"same payload").unwrap();
    b.write_all(b"same payload").unwrap();

    let ref_a =
        FileReference::new(SourceType::Cloud, a.path().to_string_lossy().to_string(), None)
            .unwrap();
    let ref_b =
        FileReference::new(SourceType::Cloud, b.path().to_string_lossy().to_string(), None)
            .unwrap();

    assert_eq!(ref_a.file_hash, ref_b.file_hash);
}
