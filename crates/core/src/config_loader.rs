use crate::config::AppConfig;
use anyhow::Result;
use figment::{
    providers::{Env, Format, Serialized, Toml},
    Figment,
};
use std::path::Path;

pub struct ConfigLoader;

impl ConfigLoader {
    /// Loads configuration by layering a TOML file and `ARB_`-prefixed
    /// environment variables over the built-in defaults.
    ///
    /// A missing file is not an error; defaults plus environment apply.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be parsed or a value fails
    /// validation.
    pub fn load(path: impl AsRef<Path>) -> Result<AppConfig> {
        let config: AppConfig = Figment::from(Serialized::defaults(AppConfig::default()))
            .merge(Toml::file(path.as_ref()))
            .merge(Env::prefixed("ARB_").split("__"))
            .extract()?;

        config.validate().map_err(anyhow::Error::msg)?;
        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;
    use std::io::Write;

    #[test]
    fn missing_file_yields_defaults() {
        let config = ConfigLoader::load("does/not/exist.toml").unwrap();
        assert_eq!(config.trading.min_profit_threshold, dec!(0.005));
    }

    #[test]
    fn toml_overrides_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("Config.toml");
        let mut file = std::fs::File::create(&path).unwrap();
        writeln!(
            file,
            "[trading]\nliquidity_fraction = \"0.30\"\ndry_run = true"
        )
        .unwrap();

        let config = ConfigLoader::load(&path).unwrap();
        assert_eq!(config.trading.liquidity_fraction, dec!(0.30));
        assert!(config.trading.dry_run);
        // Untouched fields keep their defaults.
        assert_eq!(config.trading.min_profit_threshold, dec!(0.005));
    }

    #[test]
    fn invalid_values_are_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("Config.toml");
        std::fs::write(&path, "[trading]\nliquidity_fraction = \"2.0\"\n").unwrap();
        assert!(ConfigLoader::load(&path).is_err());
    }
}
