use std::sync::Once;

pub mod corpus;
pub mod json_tree;
pub mod strategies;

static INIT: Once = Once::new();

/// Route `log` output through the test harness; safe to call from every test.
pub fn init_test_logging() {
    INIT.call_once(|| {
        let _ = env_logger::builder().is_test(true).try_init();
    });
}

pub fn diff_lines(expected: &[String], actual: &[String]) -> String {
    use std::fmt::Write;
    let max = expected.len().max(actual.len());
    let missing = "<missing>";
    let mut out = String::new();
    let mismatch = (0..max).find(|&i| expected.get(i) != actual.get(i));
    if let Some(i) = mismatch {
        let start = i.saturating_sub(2);
        let end = (i + 3).min(max);
        let _ = writeln!(
            &mut out,
            "first mismatch at line {} (showing {}..={}):",
            i + 1,
            start + 1,
            end
        );
        for line_idx in start..end {
            let left = expected.get(line_idx).map(String::as_str).unwrap_or(missing);
            let right = actual.get(line_idx).map(String::as_str).unwrap_or(missing);
            let marker = if line_idx == i { ">" } else { " " };
            let _ = writeln!(&mut out, "{marker} {:>4}  expected: {left}", line_idx + 1);
            let _ = writeln!(&mut out, "{marker} {:>4}    actual: {right}", line_idx + 1);
        }
    }
    let _ = writeln!(
        &mut out,
        "expected {} lines, actual {} lines",
        expected.len(),
        actual.len()
    );
    out
}

/// Snapshot-compare two trees and panic with a line diff on mismatch.
pub fn assert_same_tree(expected: &vdom::Node, actual: &vdom::Node, context: &str) {
    use vdom::snapshot::{SnapshotOptions, TreeSnapshot, compare_trees};
    let options = SnapshotOptions::default();
    if let Err(mismatch) = compare_trees(expected, actual, options) {
        let expected_lines = TreeSnapshot::new(expected, options);
        let actual_lines = TreeSnapshot::new(actual, options);
        panic!(
            "{context}: {mismatch}\n{}",
            diff_lines(expected_lines.as_lines(), actual_lines.as_lines())
        );
    }
}

#[cfg(test)]
mod tests {
    use super::diff_lines;

    #[test]
    fn diff_lines_points_at_first_mismatch() {
        let expected = vec!["a".to_string(), "b".to_string(), "c".to_string()];
        let actual = vec!["a".to_string(), "x".to_string()];
        let out = diff_lines(&expected, &actual);
        assert!(out.contains("first mismatch at line 2"), "{out}");
        assert!(out.contains("expected: b"), "{out}");
        assert!(out.contains("actual: <missing>"), "{out}");
        assert!(out.contains("expected 3 lines, actual 2 lines"), "{out}");
    }
}
