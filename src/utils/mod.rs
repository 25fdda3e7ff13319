//! Utility functions and helpers.

pub mod http;
pub mod logging;
pub mod progress;
pub mod sql;

pub use progress::{LogProgress, NoProgress, ProgressReporter};

/// Substitute `{name}` in a URL template.
pub fn fill_template(template: &str, name: &str, value: impl ToString) -> String {
    template.replace(&format!("{{{name}}}"), &value.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fill_template() {
        assert_eq!(
            fill_template("https://x.test/g/{id}.js", "id", 42),
            "https://x.test/g/42.js"
        );
        assert_eq!(
            fill_template("https://x.test/list?page={page}", "page", 0),
            "https://x.test/list?page=0"
        );
    }
}
