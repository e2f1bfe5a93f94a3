//! Validate command

use clap::Args;

use super::InputArgs;
use crate::Result;

#[derive(Args, Debug)]
pub struct ValidateArgs {
    #[command(flatten)]
    pub input: InputArgs,
}

/// Load the test cases and report them; loading fails on the first invalid test
pub fn run(args: ValidateArgs) -> Result<()> {
    let tests = args.input.load()?;

    for test in &tests {
        println!("  {} valid", test.name);
    }
    println!();
    println!("{} test cases valid", tests.len());
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Error;

    #[test]
    fn test_invalid_document_fails() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(
            dir.path().join("bad.yaml"),
            "- name: no-port\n  type: k8s\n  src:\n    k8sResource:\n      kind: pod\n      name: a\n      namespace: default\n  dst:\n    host:\n      name: example.com\n",
        )
        .unwrap();

        let args = ValidateArgs {
            input: InputArgs {
                input_file: None,
                input_dir: Some(dir.path().to_path_buf()),
            },
        };
        let err = run(args).unwrap_err();
        assert!(matches!(err, Error::Common(_)));
    }
}
