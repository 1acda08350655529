//! Human-viewable console links reported alongside build progress.

/// Default console used to render build links.
pub const DEFAULT_CONSOLE_BASE_URL: &str = "https://console.anyscale.com";

/// Formats links into the web console.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct ConsoleLinks {
    base_url: String,
}

impl ConsoleLinks {
    /// Creates a formatter rooted at `base_url`. Trailing slashes are ignored.
    #[must_use]
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into().trim().trim_end_matches('/').to_owned(),
        }
    }

    /// Link to the detail page of an environment build.
    #[must_use]
    pub fn build(&self, build_id: &str) -> String {
        format!(
            "{}/configurations/app-config-details/{build_id}",
            self.base_url
        )
    }
}

impl Default for ConsoleLinks {
    fn default() -> Self {
        Self::new(DEFAULT_CONSOLE_BASE_URL)
    }
}
