use std::path::PathBuf;

#[derive(Debug, Clone)]
pub struct Paths {
    pub base: PathBuf,
}

impl Paths {
    pub fn new() -> Self {
        let base = dirs::home_dir()
            .map(|h| h.join(".pagemark"))
            .unwrap_or_else(|| PathBuf::from(".pagemark"));
        Self { base }
    }

    pub fn with_base(base: PathBuf) -> Self {
        Self { base }
    }

    pub fn config_file(&self) -> PathBuf {
        self.base.join("config.json")
    }

    /// Directory for saved page fixtures and snapshot dumps.
    pub fn fixtures_dir(&self) -> PathBuf {
        self.base.join("fixtures")
    }

    pub fn fixture_file(&self, name: &str) -> PathBuf {
        let safe_name = name.replace([':', '/', '\\'], "_");
        self.fixtures_dir().join(format!("{}.json", safe_name))
    }
}

impl Default for Paths {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_paths_with_base() {
        let paths = Paths::with_base(PathBuf::from("/tmp/pm"));
        assert_eq!(paths.config_file(), PathBuf::from("/tmp/pm/config.json"));
        assert_eq!(paths.fixtures_dir(), PathBuf::from("/tmp/pm/fixtures"));
    }

    #[test]
    fn test_fixture_file_sanitizes_name() {
        let paths = Paths::with_base(PathBuf::from("/tmp/pm"));
        assert_eq!(
            paths.fixture_file("shop/checkout:step1"),
            PathBuf::from("/tmp/pm/fixtures/shop_checkout_step1.json")
        );
    }
}
