// --- Файл: src/serialization/export.rs ---

//! Экспорт датасета мешков на диск и обратная загрузка.
//!
//! Структура директории экспорта:
//! ```text
//! export_dir/
//! ├── manifest.json        # Количество мешков, длины, метки, источник
//! └── bags.safetensors     # bag_{i}: f32 [n, C, H, W], label_{i}: i64 [1] или [n]
//! ```
//!
//! При наличии необработанных мешков (режим push) они сохраняются как `raw_{i}`.

use super::safetensors_io::{load_tensors, save_tensors, TensorData};
use crate::data::{BagLabel, BagSample, BagStats, Dataset, MilDataset};
use crate::error::{DataError, Result};
use log::info;
use ndarray::{Array1, Array4, ArrayD, Ix1, Ix4};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fs;
use std::path::Path;

/// Версия формата экспорта.
pub const EXPORT_VERSION: &str = "1.0";

const MANIFEST_FILE: &str = "manifest.json";
const TENSORS_FILE: &str = "bags.safetensors";

/// Описание одного мешка в манифесте.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BagEntry {
    /// Количество экземпляров
    pub length: usize,
    /// Метка мешка (максимум по тензору метки)
    pub label: i64,
    /// Форма тензора мешка `[n, C, H, W]`
    pub shape: Vec<usize>,
}

/// Манифест экспортированного датасета.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExportManifest {
    pub version: String,
    /// Откуда получены мешки (например, "mnist fold 0 train")
    pub source: String,
    pub num_bags: usize,
    /// Сохранены ли необработанные мешки
    pub has_raw: bool,
    pub stats: BagStats,
    pub bags: Vec<BagEntry>,
}

fn tensor_name(kind: &str, index: usize) -> String {
    format!("{}_{}", kind, index)
}

/// Материализует все мешки датасета и сохраняет их в директорию `dir`.
///
/// SafeTensors пишется одним файлом, поэтому перед записью все мешки
/// (и необработанные копии в режиме push) одновременно находятся в памяти.
/// Для мешков MNIST с настройками по умолчанию это порядка
/// `300 * 200 * 3 * 28 * 28 * 4` байт, около 560 МБ, и вдвое больше с push.
/// Для больших датасетов экспортируйте подмножество через [`SubsetDataset`].
///
/// [`SubsetDataset`]: crate::data::SubsetDataset
pub fn export_bags<D: MilDataset, P: AsRef<Path>>(
    dataset: &D,
    dir: P,
    source: &str,
) -> Result<ExportManifest> {
    let dir = dir.as_ref();
    fs::create_dir_all(dir)?;

    let mut tensors = Vec::with_capacity(dataset.len() * 2);
    let mut bags = Vec::with_capacity(dataset.len());
    let mut has_raw = false;

    for index in 0..dataset.len() {
        let (sample, label) = dataset.get(index).ok_or(DataError::IndexOutOfRange {
            index,
            len: dataset.len(),
        })?;

        bags.push(BagEntry {
            length: sample.len(),
            label: label.iter().copied().max().unwrap_or(0),
            shape: sample.bag.shape().to_vec(),
        });

        tensors.push((tensor_name("bag", index), TensorData::F32(sample.bag.into_dyn())));
        tensors.push((tensor_name("label", index), TensorData::I64(label.into_dyn())));
        if let Some(raw) = sample.raw {
            has_raw = true;
            tensors.push((tensor_name("raw", index), TensorData::F32(raw.into_dyn())));
        }
    }

    save_tensors(dir.join(TENSORS_FILE), &tensors)?;

    let manifest = ExportManifest {
        version: EXPORT_VERSION.to_string(),
        source: source.to_string(),
        num_bags: bags.len(),
        has_raw,
        stats: dataset.stats(),
        bags,
    };
    fs::write(dir.join(MANIFEST_FILE), serde_json::to_string_pretty(&manifest)?)?;

    info!(
        "Экспортировано {} мешков ({}) в {}",
        manifest.num_bags,
        source,
        dir.display()
    );
    Ok(manifest)
}

/// Датасет, прочитанный из директории экспорта.
#[derive(Debug, Clone)]
pub struct ExportedBags {
    manifest: ExportManifest,
    samples: Vec<BagSample>,
    labels: Vec<BagLabel>,
}

impl ExportedBags {
    pub fn manifest(&self) -> &ExportManifest {
        &self.manifest
    }
}

fn take_f32(tensors: &mut HashMap<String, TensorData>, name: &str) -> Result<Option<ArrayD<f32>>> {
    match tensors.remove(name) {
        Some(TensorData::F32(arr)) => Ok(Some(arr)),
        Some(TensorData::I64(_)) => Err(DataError::CorruptExport(format!(
            "тензор '{}' должен иметь тип f32",
            name
        ))),
        None => Ok(None),
    }
}

fn into_bag(arr: ArrayD<f32>, name: &str) -> Result<Array4<f32>> {
    arr.into_dimensionality::<Ix4>()
        .map_err(|_| DataError::CorruptExport(format!("тензор '{}' должен быть 4-мерным", name)))
}

/// Загружает датасет, сохраненный [`export_bags`].
pub fn load_exported<P: AsRef<Path>>(dir: P) -> Result<ExportedBags> {
    let dir = dir.as_ref();

    let manifest_path = dir.join(MANIFEST_FILE);
    if !manifest_path.exists() {
        return Err(DataError::FileNotFound(manifest_path));
    }
    let manifest: ExportManifest = serde_json::from_str(&fs::read_to_string(&manifest_path)?)?;
    if manifest.bags.len() != manifest.num_bags {
        return Err(DataError::CorruptExport(format!(
            "в манифесте {} мешков, но описано {}",
            manifest.num_bags,
            manifest.bags.len()
        )));
    }

    let mut tensors = load_tensors(dir.join(TENSORS_FILE))?;

    let mut samples = Vec::with_capacity(manifest.num_bags);
    let mut labels = Vec::with_capacity(manifest.num_bags);
    for (index, entry) in manifest.bags.iter().enumerate() {
        let bag_name = tensor_name("bag", index);
        let bag = take_f32(&mut tensors, &bag_name)?
            .ok_or_else(|| DataError::CorruptExport(format!("нет тензора '{}'", bag_name)))?;
        let bag = into_bag(bag, &bag_name)?;
        if bag.shape() != entry.shape.as_slice() {
            return Err(DataError::CorruptExport(format!(
                "форма '{}' {:?} не совпадает с манифестом {:?}",
                bag_name,
                bag.shape(),
                entry.shape
            )));
        }

        let raw_name = tensor_name("raw", index);
        let raw = take_f32(&mut tensors, &raw_name)?
            .map(|arr| into_bag(arr, &raw_name))
            .transpose()?;

        let label_name = tensor_name("label", index);
        let label: Array1<i64> = match tensors.remove(&label_name) {
            Some(TensorData::I64(arr)) => arr.into_dimensionality::<Ix1>().map_err(|_| {
                DataError::CorruptExport(format!("тензор '{}' должен быть 1-мерным", label_name))
            })?,
            _ => {
                return Err(DataError::CorruptExport(format!(
                    "нет тензора '{}' типа i64",
                    label_name
                )))
            }
        };

        samples.push(BagSample { bag, raw });
        labels.push(label);
    }

    info!("Загружено {} мешков из {}", samples.len(), dir.display());
    Ok(ExportedBags {
        manifest,
        samples,
        labels,
    })
}

impl Dataset for ExportedBags {
    type Item = BagSample;
    type Label = BagLabel;

    fn len(&self) -> usize {
        self.samples.len()
    }

    fn get(&self, index: usize) -> Option<(Self::Item, Self::Label)> {
        Some((self.samples.get(index)?.clone(), self.labels.get(index)?.clone()))
    }
}

impl MilDataset for ExportedBags {
    fn bag_len(&self, index: usize) -> Option<usize> {
        self.manifest.bags.get(index).map(|entry| entry.length)
    }

    fn bag_label(&self, index: usize) -> Option<u8> {
        self.labels
            .get(index)
            .map(|label| u8::from(label.iter().any(|&l| l > 0)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::SubsetDataset;

    /// Мешки фиксированной формы с заданными метками экземпляров.
    struct Fixed(Vec<Vec<u8>>);

    impl Dataset for Fixed {
        type Item = BagSample;
        type Label = BagLabel;

        fn len(&self) -> usize {
            self.0.len()
        }

        fn get(&self, index: usize) -> Option<(BagSample, BagLabel)> {
            let labels = self.0.get(index)?;
            let bag = Array4::from_elem((labels.len(), 3, 2, 2), index as f32);
            let label = Array1::from_elem(1, i64::from(crate::data::bag_label(labels)));
            Some((BagSample { bag, raw: None }, label))
        }
    }

    impl MilDataset for Fixed {
        fn bag_len(&self, index: usize) -> Option<usize> {
            self.0.get(index).map(Vec::len)
        }

        fn bag_label(&self, index: usize) -> Option<u8> {
            self.0.get(index).map(|l| crate::data::bag_label(l))
        }
    }

    #[test]
    fn test_export_and_load() {
        let dir = tempfile::tempdir().unwrap();
        let dataset = Fixed(vec![vec![0, 1, 0], vec![], vec![0, 0]]);

        let manifest = export_bags(&dataset, dir.path(), "fixed").unwrap();
        assert_eq!(manifest.num_bags, 3);
        assert_eq!(manifest.stats.positive_bags, 1);
        assert!(!manifest.has_raw);
        assert!(dir.path().join("manifest.json").exists());

        let loaded = load_exported(dir.path()).unwrap();
        assert_eq!(loaded.len(), 3);
        assert_eq!(loaded.manifest().source, "fixed");

        let (sample, label) = loaded.get(0).unwrap();
        assert_eq!(sample.bag.shape(), &[3, 3, 2, 2]);
        assert_eq!(label[0], 1);

        let (empty, label) = loaded.get(1).unwrap();
        assert!(empty.is_empty());
        assert_eq!(label[0], 0);

        assert_eq!(loaded.stats(), dataset.stats());
    }

    #[test]
    fn test_export_subset() {
        let dir = tempfile::tempdir().unwrap();
        let dataset = Fixed(vec![vec![0], vec![0, 1], vec![0, 0, 0], vec![1]]);
        let subset = SubsetDataset::new(&dataset, vec![2, 1]);

        let manifest = export_bags(&subset, dir.path(), "fixed subset").unwrap();
        assert_eq!(manifest.num_bags, 2);
        assert_eq!(manifest.bags[0].length, 3);
        assert_eq!(manifest.bags[1].label, 1);
        assert_eq!(manifest.stats.positive_bags, 1);

        let loaded = load_exported(dir.path()).unwrap();
        let (sample, _) = loaded.get(0).unwrap();
        assert_eq!(sample.bag[[0, 0, 0, 0]], 2.0);
    }

    #[test]
    fn test_missing_manifest() {
        let dir = tempfile::tempdir().unwrap();
        assert!(matches!(load_exported(dir.path()), Err(DataError::FileNotFound(_))));
    }

    #[test]
    fn test_missing_tensor() {
        let dir = tempfile::tempdir().unwrap();
        let dataset = Fixed(vec![vec![1]]);
        let mut manifest = export_bags(&dataset, dir.path(), "fixed").unwrap();

        // Манифест ссылается на мешок, которого нет в файле тензоров
        manifest.num_bags = 2;
        manifest.bags.push(manifest.bags[0].clone());
        fs::write(
            dir.path().join("manifest.json"),
            serde_json::to_string(&manifest).unwrap(),
        )
        .unwrap();

        assert!(matches!(
            load_exported(dir.path()),
            Err(DataError::CorruptExport(_))
        ));
    }
}
