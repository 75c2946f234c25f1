// --- Файл: src/config.rs ---

//! Чтение конфигураций датасетов из TOML или JSON.
//!
//! Формат выбирается по расширению файла: `.json` читается как JSON,
//! все остальное как TOML.

use crate::error::{DataError, Result};
use serde::de::DeserializeOwned;
use std::fs;
use std::path::Path;

/// Загружает конфигурацию из файла.
///
/// # Пример
///
/// ```rust,ignore
/// use rustymil::config::load_config;
/// use rustymil::data::MnistBagsConfig;
///
/// let config: MnistBagsConfig = load_config("mnist_bags.toml")?;
/// ```
pub fn load_config<T: DeserializeOwned, P: AsRef<Path>>(path: P) -> Result<T> {
    let path = path.as_ref();
    if !path.exists() {
        return Err(DataError::FileNotFound(path.to_path_buf()));
    }
    let content = fs::read_to_string(path)?;
    parse_config(&content, path)
}

fn parse_config<T: DeserializeOwned>(content: &str, path: &Path) -> Result<T> {
    let is_json = path
        .extension()
        .and_then(|ext| ext.to_str())
        .is_some_and(|ext| ext.eq_ignore_ascii_case("json"));

    if is_json {
        Ok(serde_json::from_str(content)?)
    } else {
        Ok(toml::from_str(content)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::MnistBagsConfig;
    use std::io::Write;

    #[test]
    fn test_toml_overrides_defaults() {
        let config: MnistBagsConfig = parse_config(
            "target_number = 3\nnum_bags_train = 10\n",
            Path::new("bags.toml"),
        )
        .unwrap();

        assert_eq!(config.target_number, 3);
        assert_eq!(config.num_bags_train, 10);
        // Остальные поля берутся по умолчанию
        assert_eq!(config.bag_length_min, 50);
        assert_eq!(config.seed, 7);
    }

    #[test]
    fn test_json_by_extension() {
        let mut file = tempfile::Builder::new().suffix(".json").tempfile().unwrap();
        writeln!(file, r#"{{"fold_id": 4, "train": false}}"#).unwrap();

        let config: MnistBagsConfig = load_config(file.path()).unwrap();
        assert_eq!(config.fold_id, 4);
        assert!(!config.train);
    }

    #[test]
    fn test_missing_file() {
        let result: Result<MnistBagsConfig> = load_config("/nonexistent/bags.toml");
        assert!(matches!(result, Err(DataError::FileNotFound(_))));
    }
}
