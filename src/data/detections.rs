// --- Файл: src/data/detections.rs ---

//! Чтение координат детекций ядер клеток.
//!
//! Рядом с каждым изображением `<name>.bmp` лежат файлы
//! `<name>_<тип>.mat` с переменной `detection` размера `N x 2`
//! (столбцы x, y). Если `.mat` отсутствует, читается `<name>_<тип>.csv`
//! со строками `x,y` без заголовка.

use crate::error::{DataError, Result};
use matfile::{MatFile, NumericData};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::fs::File;
use std::io::BufReader;
use std::path::{Path, PathBuf};
use std::str::FromStr;

/// Имя переменной с координатами в MAT-файле.
const DETECTION_VARIABLE: &str = "detection";

/// Центр ядра: x - столбец, y - строка.
pub type Detection = (f64, f64);

/// Тип ядра клетки.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NucleusType {
    Epithelial,
    Inflammatory,
    Fibroblast,
    Others,
}

impl NucleusType {
    /// Все типы в порядке сборки мешка.
    pub const ALL: [NucleusType; 4] = [
        NucleusType::Epithelial,
        NucleusType::Inflammatory,
        NucleusType::Fibroblast,
        NucleusType::Others,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            NucleusType::Epithelial => "epithelial",
            NucleusType::Inflammatory => "inflammatory",
            NucleusType::Fibroblast => "fibroblast",
            NucleusType::Others => "others",
        }
    }

    /// Метка экземпляра: эпителиальные ядра положительные.
    pub fn instance_label(&self) -> u8 {
        u8::from(*self == NucleusType::Epithelial)
    }
}

impl fmt::Display for NucleusType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for NucleusType {
    type Err = DataError;

    fn from_str(s: &str) -> Result<Self> {
        NucleusType::ALL
            .into_iter()
            .find(|t| t.as_str().eq_ignore_ascii_case(s.trim()))
            .ok_or_else(|| DataError::UnknownNucleusType(s.to_string()))
    }
}

/// Путь к файлу детекций: `<dir>/<name>_<тип>.<ext>`.
///
/// Имя изображения может содержать точки (`img.1`).
pub fn detection_path(image_dir: &Path, image_name: &str, nucleus: NucleusType, ext: &str) -> PathBuf {
    image_dir.join(format!("{}_{}.{}", image_name, nucleus, ext))
}

/// Загружает детекции заданного типа для изображения `image_name`.
pub fn load_detections(image_dir: &Path, image_name: &str, nucleus: NucleusType) -> Result<Vec<Detection>> {
    let mat_path = detection_path(image_dir, image_name, nucleus, "mat");
    let csv_path = detection_path(image_dir, image_name, nucleus, "csv");

    if mat_path.exists() {
        read_mat_detections(&mat_path)
    } else if csv_path.exists() {
        read_csv_detections(&csv_path)
    } else {
        Err(DataError::FileNotFound(mat_path))
    }
}

/// Читает матрицу `detection` из MAT-файла (MATLAB level 5).
pub fn read_mat_detections(path: &Path) -> Result<Vec<Detection>> {
    let file = File::open(path)?;
    let mat = MatFile::parse(BufReader::new(file)).map_err(|e| DataError::Mat {
        path: path.to_path_buf(),
        message: format!("{:?}", e),
    })?;

    let invalid = |reason: String| DataError::InvalidDetections {
        path: path.to_path_buf(),
        reason,
    };

    let array = mat
        .find_by_name(DETECTION_VARIABLE)
        .ok_or_else(|| invalid(format!("нет переменной '{}'", DETECTION_VARIABLE)))?;

    let values = numeric_to_f64(array.data());
    let size = array.size();
    if values.is_empty() {
        return Ok(Vec::new());
    }
    if size.len() != 2 || size[1] != 2 {
        return Err(invalid(format!("ожидалась матрица N x 2, получено {:?}", size)));
    }

    // MATLAB хранит матрицы по столбцам
    let rows = size[0];
    if values.len() != rows * 2 {
        return Err(invalid(format!(
            "{} значений для матрицы {} x 2",
            values.len(),
            rows
        )));
    }
    Ok((0..rows).map(|i| (values[i], values[rows + i])).collect())
}

fn numeric_to_f64(data: &NumericData) -> Vec<f64> {
    match data {
        NumericData::Double { real, .. } => real.clone(),
        NumericData::Single { real, .. } => real.iter().map(|&v| f64::from(v)).collect(),
        NumericData::Int8 { real, .. } => real.iter().map(|&v| f64::from(v)).collect(),
        NumericData::UInt8 { real, .. } => real.iter().map(|&v| f64::from(v)).collect(),
        NumericData::Int16 { real, .. } => real.iter().map(|&v| f64::from(v)).collect(),
        NumericData::UInt16 { real, .. } => real.iter().map(|&v| f64::from(v)).collect(),
        NumericData::Int32 { real, .. } => real.iter().map(|&v| f64::from(v)).collect(),
        NumericData::UInt32 { real, .. } => real.iter().map(|&v| f64::from(v)).collect(),
        NumericData::Int64 { real, .. } => real.iter().map(|&v| v as f64).collect(),
        NumericData::UInt64 { real, .. } => real.iter().map(|&v| v as f64).collect(),
    }
}

/// Читает координаты из CSV: по строке `x,y` на ядро, без заголовка.
pub fn read_csv_detections(path: &Path) -> Result<Vec<Detection>> {
    let mut reader = csv::ReaderBuilder::new()
        .has_headers(false)
        .trim(csv::Trim::All)
        .from_path(path)?;

    let mut detections = Vec::new();
    for (line, record) in reader.records().enumerate() {
        let record = record?;
        if record.len() != 2 {
            return Err(DataError::InvalidDetections {
                path: path.to_path_buf(),
                reason: format!("строка {}: ожидалось 2 значения, получено {}", line + 1, record.len()),
            });
        }
        let parse = |field: &str| {
            field.parse::<f64>().map_err(|e| DataError::InvalidDetections {
                path: path.to_path_buf(),
                reason: format!("строка {}: {}", line + 1, e),
            })
        };
        detections.push((parse(&record[0])?, parse(&record[1])?));
    }
    Ok(detections)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    #[test]
    fn test_nucleus_type_parse() {
        assert_eq!("epithelial".parse::<NucleusType>().unwrap(), NucleusType::Epithelial);
        assert_eq!("Others".parse::<NucleusType>().unwrap(), NucleusType::Others);
        assert!("macrophage".parse::<NucleusType>().is_err());
        assert_eq!(NucleusType::Fibroblast.to_string(), "fibroblast");
    }

    #[test]
    fn test_instance_labels() {
        assert_eq!(NucleusType::Epithelial.instance_label(), 1);
        assert_eq!(NucleusType::Inflammatory.instance_label(), 0);
    }

    #[test]
    fn test_csv_detections() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("img1_epithelial.csv"), "10.4, 20\n 499,0.6\n").unwrap();

        let detections = load_detections(dir.path(), "img1", NucleusType::Epithelial).unwrap();
        assert_eq!(detections, vec![(10.4, 20.0), (499.0, 0.6)]);
    }

    #[test]
    fn test_dotted_image_name() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("img.1_fibroblast.csv"), "3,4\n").unwrap();

        assert_eq!(
            detection_path(dir.path(), "img.1", NucleusType::Fibroblast, "mat"),
            dir.path().join("img.1_fibroblast.mat")
        );
        let detections = load_detections(dir.path(), "img.1", NucleusType::Fibroblast).unwrap();
        assert_eq!(detections, vec![(3.0, 4.0)]);
    }

    #[test]
    fn test_empty_csv() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("img1_others.csv"), "").unwrap();

        let detections = load_detections(dir.path(), "img1", NucleusType::Others).unwrap();
        assert!(detections.is_empty());
    }

    #[test]
    fn test_bad_csv() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("img1_others.csv"), "1,abc\n").unwrap();

        let result = load_detections(dir.path(), "img1", NucleusType::Others);
        assert!(matches!(result, Err(DataError::InvalidDetections { .. })));
    }

    #[test]
    fn test_missing_file() {
        let dir = tempfile::tempdir().unwrap();
        let result = load_detections(dir.path(), "img1", NucleusType::Fibroblast);
        assert!(matches!(result, Err(DataError::FileNotFound(_))));
    }
}
