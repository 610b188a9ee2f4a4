//! Command-line helpers for the wrapped test command.

/// A single argument is treated as a whole command line and split on
/// whitespace; several arguments are taken verbatim.
pub fn tokenize(args: &[String]) -> Vec<String> {
    match args {
        [single] => single.split_whitespace().map(str::to_string).collect(),
        many => many.to_vec(),
    }
}

/// `pkg.Class.method` -> `pkg.Class#method`, the form Surefire's `-Dtest` takes.
pub fn surefire_selector(test: &str) -> String {
    match test.rfind('.') {
        Some(idx) => format!("{}#{}", &test[..idx], &test[idx + 1..]),
        None => test.to_string(),
    }
}

/// Maven invocation running `tests` (all tests when empty), continuing past
/// module failures.
pub fn maven_test_command(tests: &[String]) -> Vec<String> {
    let mut cmd = vec![
        "mvn".to_string(),
        "-fae".to_string(),
        "-DfailIfNoTests=false".to_string(),
    ];
    let selectors: Vec<String> = tests
        .iter()
        .map(|t| t.trim())
        .filter(|t| !t.is_empty())
        .map(surefire_selector)
        .collect();
    if !selectors.is_empty() {
        cmd.push(format!("-Dtest={}", selectors.join(",")));
    }
    cmd.push("test".to_string());
    cmd
}

#[cfg(test)]
mod tests {
    use super::*;

    fn strings(v: &[&str]) -> Vec<String> {
        v.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn single_argument_is_split() {
        assert_eq!(
            tokenize(&strings(&["mvn  -q test"])),
            strings(&["mvn", "-q", "test"])
        );
        assert_eq!(
            tokenize(&strings(&["sh", "-c", "echo a b"])),
            strings(&["sh", "-c", "echo a b"])
        );
        assert!(tokenize(&[]).is_empty());
    }

    #[test]
    fn maven_command_selects_methods() {
        assert_eq!(
            maven_test_command(&strings(&["org.a.FooTest.testBar", "org.a.BazTest.x"])),
            strings(&[
                "mvn",
                "-fae",
                "-DfailIfNoTests=false",
                "-Dtest=org.a.FooTest#testBar,org.a.BazTest#x",
                "test"
            ])
        );
        assert_eq!(
            maven_test_command(&[]),
            strings(&["mvn", "-fae", "-DfailIfNoTests=false", "test"])
        );
    }

    #[test]
    fn selector_without_dot_is_unchanged() {
        assert_eq!(surefire_selector("FooTest"), "FooTest");
    }
}
