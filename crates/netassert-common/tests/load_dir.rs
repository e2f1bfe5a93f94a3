//! Integration tests for loading test documents from a directory
//!
//! These tests tell the story of an operator keeping one YAML file per team
//! in a directory and pointing netassert at it.

use std::fs;
use std::path::Path;

use netassert_common::testcase::{load_from_dir, load_from_file};
use netassert_common::Error;

fn test_doc(names: &[&str]) -> String {
    names
        .iter()
        .map(|name| {
            format!(
                r#"- name: {name}
  type: k8s
  targetPort: 80
  src:
    k8sResource: {{kind: deployment, name: client, namespace: default}}
  dst:
    k8sResource: {{kind: pod, name: server, namespace: default}}
"#
            )
        })
        .collect()
}

fn write(dir: &Path, file: &str, contents: &str) {
    fs::write(dir.join(file), contents).expect("fixture should be written");
}

/// Story: files are read in name order and their tests concatenated
#[test]
fn test_directory_tests_are_merged_in_file_order() {
    let dir = tempfile::tempdir().expect("tempdir");
    write(dir.path(), "b-team.yml", &test_doc(&["b1"]));
    write(dir.path(), "a-team.yaml", &test_doc(&["a1", "a2"]));

    let tests = load_from_dir(dir.path()).expect("directory should load");
    let names: Vec<&str> = tests.iter().map(|t| t.name.as_str()).collect();
    assert_eq!(names, vec!["a1", "a2", "b1"]);
}

/// Story: notes and scripts next to the test files are ignored
#[test]
fn test_non_yaml_files_and_subdirectories_ignored() {
    let dir = tempfile::tempdir().expect("tempdir");
    write(dir.path(), "tests.yaml", &test_doc(&["only"]));
    write(dir.path(), "README.md", "not yaml at all: [");
    fs::create_dir(dir.path().join("nested.yaml")).expect("subdir");
    write(
        &dir.path().join("nested.yaml"),
        "inner.yaml",
        &test_doc(&["hidden"]),
    );

    let tests = load_from_dir(dir.path()).expect("directory should load");
    assert_eq!(tests.len(), 1);
    assert_eq!(tests[0].name, "only");
}

/// Story: two teams picked the same test name in different files
#[test]
fn test_duplicate_names_across_files_rejected() {
    let dir = tempfile::tempdir().expect("tempdir");
    write(dir.path(), "one.yaml", &test_doc(&["shared"]));
    write(dir.path(), "two.yaml", &test_doc(&["shared"]));

    let err = load_from_dir(dir.path()).unwrap_err();
    assert!(err.is_validation());
    let msg = err.to_string();
    assert!(msg.contains("two.yaml"), "error should name the file: {}", msg);
    assert!(msg.contains("duplicate test name"));
}

/// Story: an empty directory is not an error, the run just has nothing to do
#[test]
fn test_empty_directory_yields_no_tests() {
    let dir = tempfile::tempdir().expect("tempdir");
    let tests = load_from_dir(dir.path()).expect("empty dir should load");
    assert!(tests.is_empty());
}

#[test]
fn test_missing_directory_is_io_error() {
    let dir = tempfile::tempdir().expect("tempdir");
    let err = load_from_dir(&dir.path().join("missing")).unwrap_err();
    assert!(matches!(err, Error::Io { .. }));
}

#[test]
fn test_broken_file_error_names_the_file() {
    let dir = tempfile::tempdir().expect("tempdir");
    let path = dir.path().join("broken.yaml");
    fs::write(&path, "- name: [unterminated").expect("fixture");

    let err = load_from_file(&path).unwrap_err();
    assert!(matches!(err, Error::Serialization { .. }));
    assert!(err.to_string().contains("broken.yaml"));
}
