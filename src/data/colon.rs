// --- Файл: src/data/colon.rs ---

//! Мешки патчей ядер клеток из гистологических изображений рака толстой кишки.
//!
//! Каждое изображение дает один мешок. Экземпляры - патчи 27x27 вокруг
//! заранее найденных центров ядер. Эпителиальные ядра помечаются 1,
//! остальные (воспалительные, фибробласты, прочие) - 0.
//!
//! Ожидаемая структура директорий:
//!
//! ```text
//! root/
//! ├── img1/
//! │   ├── img1.bmp
//! │   ├── img1_epithelial.mat
//! │   ├── img1_inflammatory.mat
//! │   ├── img1_fibroblast.mat
//! │   └── img1_others.mat
//! └── img2/
//!     └── ...
//! ```

use super::bag::{bag_label, stack_instances, BagLabel, BagSample, MilDataset};
use super::crop::{crop_cells, load_rgb, with_location_channels, CROP_SIZE};
use super::dataset::Dataset;
use super::detections::{load_detections, NucleusType};
use super::stain::{HistoNormalize, RandomHEStain};
use super::transforms::{
    Compose, RandomHorizontalFlip, RandomRotate, RandomVerticalFlip, ToTensor, Transform,
};
use crate::error::{DataError, Result};
use log::{debug, info};
use ndarray::{s, Array1, Array3, Axis};
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// Количество RGB каналов, проходящих через пайплайн преобразований.
const RGB_CHANNELS: usize = 3;

/// Параметры датасета колоректального рака.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ColonBagsConfig {
    /// Корневая директория с поддиректориями изображений
    pub path: PathBuf,
    /// Индексы директорий обучающей части
    pub train_val_idxs: Vec<usize>,
    /// Индексы директорий тестовой части
    pub test_idxs: Vec<usize>,
    pub train: bool,
    /// Перемешивать экземпляры внутри мешка
    pub shuffle_bag: bool,
    pub data_augmentation: bool,
    /// Добавлять каналы с координатами пикселей
    pub loc_info: bool,
    /// Возвращать дополнительно необработанный мешок
    pub push: bool,
    /// Строить мешки только из ядер одного типа
    pub nucleus_type: Option<NucleusType>,
    /// Seed для сдвигов, перемешивания и аугментаций (по умолчанию случайный)
    pub seed: Option<u64>,
}

impl Default for ColonBagsConfig {
    fn default() -> Self {
        Self {
            path: PathBuf::from("data/ColonCancer"),
            train_val_idxs: Vec::new(),
            test_idxs: Vec::new(),
            train: true,
            shuffle_bag: false,
            data_augmentation: false,
            loc_info: false,
            push: false,
            nucleus_type: None,
            seed: None,
        }
    }
}

/// Все поддиректории `root` (рекурсивно, без самого корня), отсортированные.
fn list_image_dirs(root: &Path) -> Result<Vec<PathBuf>> {
    if !root.is_dir() {
        return Err(DataError::FileNotFound(root.to_path_buf()));
    }
    let mut dirs = Vec::new();
    let mut pending = vec![root.to_path_buf()];
    while let Some(dir) = pending.pop() {
        for entry in fs::read_dir(&dir)? {
            let path = entry?.path();
            if path.is_dir() {
                dirs.push(path.clone());
                pending.push(path);
            }
        }
    }
    dirs.sort();
    Ok(dirs)
}

/// Делит директории изображений на обучающую и тестовую части по индексам.
///
/// Индексы относятся к отсортированному списку всех поддиректорий `path`.
pub fn split_dir_list(
    path: &Path,
    train_idxs: &[usize],
    test_idxs: &[usize],
) -> Result<(Vec<PathBuf>, Vec<PathBuf>)> {
    let dirs = list_image_dirs(path)?;

    let pick = |idxs: &[usize]| -> Result<Vec<PathBuf>> {
        let mut picked = idxs
            .iter()
            .map(|&index| {
                dirs.get(index).cloned().ok_or(DataError::IndexOutOfRange {
                    index,
                    len: dirs.len(),
                })
            })
            .collect::<Result<Vec<_>>>()?;
        picked.sort();
        Ok(picked)
    };

    Ok((pick(train_idxs)?, pick(test_idxs)?))
}

/// Экземпляры одного изображения и их метки.
#[derive(Debug)]
struct ColonBag {
    /// Патчи HWC: 3 канала RGB `[0, 255]` и, опционально, 2 канала координат
    instances: Vec<Array3<f32>>,
    labels: Vec<u8>,
}

/// Пайплайны преобразований экземпляров.
struct Pipelines {
    augment: Compose,
    evaluate: Compose,
    raw: Compose,
}

impl Pipelines {
    fn new(seed: Option<u64>) -> Self {
        let seeded = |offset: u64| seed.map(|s| s.wrapping_add(offset));

        let mut he_stain = RandomHEStain::new();
        let mut rotate = RandomRotate::new();
        let mut v_flip = RandomVerticalFlip::default();
        let mut h_flip = RandomHorizontalFlip::default();
        if let Some(s) = seeded(1) {
            he_stain = he_stain.with_seed(s);
        }
        if let Some(s) = seeded(2) {
            rotate = rotate.with_seed(s);
        }
        if let Some(s) = seeded(3) {
            v_flip = v_flip.with_seed(s);
        }
        if let Some(s) = seeded(4) {
            h_flip = h_flip.with_seed(s);
        }

        Self {
            augment: Compose::new()
                .add(he_stain)
                .add(HistoNormalize::new())
                .add(rotate)
                .add(v_flip)
                .add(h_flip)
                .add(ToTensor),
            evaluate: Compose::new().add(HistoNormalize::new()).add(ToTensor),
            raw: Compose::new().add(ToTensor),
        }
    }
}

/// Датасет мешков из патчей ядер.
pub struct ColonCancerBags {
    config: ColonBagsConfig,
    bags: Vec<Arc<ColonBag>>,
    pipelines: Pipelines,
}

impl ColonCancerBags {
    /// Читает изображения и детекции выбранной части и строит мешки.
    pub fn new(config: ColonBagsConfig) -> Result<Self> {
        let (train_dirs, test_dirs) =
            split_dir_list(&config.path, &config.train_val_idxs, &config.test_idxs)?;
        let dirs = if config.train { train_dirs } else { test_dirs };

        let mut rng = match config.seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_os_rng(),
        };
        let bags = create_bags(&config, &dirs, &mut rng)?;

        let dataset = Self {
            pipelines: Pipelines::new(config.seed),
            config,
            bags,
        };
        let stats = dataset.stats();
        info!(
            "Сформировано {} мешков ядер ({}) из {} изображений, положительных {}, средняя длина {:.1}",
            stats.num_bags,
            if dataset.config.train { "train" } else { "test" },
            dirs.len(),
            stats.positive_bags,
            stats.mean_len
        );
        Ok(dataset)
    }

    /// Конфигурация, с которой построен датасет.
    pub fn config(&self) -> &ColonBagsConfig {
        &self.config
    }

    /// Метки экземпляров мешка.
    pub fn instance_labels(&self, index: usize) -> Option<&[u8]> {
        self.bags.get(index).map(|bag| bag.labels.as_slice())
    }

    /// Количество каналов экземпляра после преобразований.
    pub fn channels(&self) -> usize {
        if self.config.loc_info {
            RGB_CHANNELS + 2
        } else {
            RGB_CHANNELS
        }
    }

    fn pipeline(&self) -> &Compose {
        if self.config.data_augmentation {
            &self.pipelines.augment
        } else {
            &self.pipelines.evaluate
        }
    }

    /// Прогоняет RGB каналы экземпляра через пайплайн, каналы координат
    /// добавляются без масштабирования.
    fn transform_instance(&self, instance: &Array3<f32>, pipeline: &Compose) -> Array3<f32> {
        let rgb = instance.slice(s![.., .., ..RGB_CHANNELS]).to_owned();
        let transformed = pipeline.apply(rgb);
        if !self.config.loc_info {
            return transformed;
        }

        let location = instance.slice(s![.., .., RGB_CHANNELS..]).permuted_axes([2, 0, 1]);
        let joined = ndarray::concatenate(Axis(0), &[transformed.view(), location]);
        joined.unwrap_or(transformed)
    }

    fn transform_bag(&self, bag: &ColonBag, pipeline: &Compose) -> ndarray::Array4<f32> {
        let tensors: Vec<Array3<f32>> = bag
            .instances
            .iter()
            .map(|instance| self.transform_instance(instance, pipeline))
            .collect();
        stack_instances(&tensors, (self.channels(), CROP_SIZE, CROP_SIZE))
    }
}

/// Вырезает патчи ядер заданных типов с одного изображения.
fn crop_types(
    dir: &Path,
    name: &str,
    image: &Array3<f32>,
    types: &[NucleusType],
    rng: Option<&mut StdRng>,
) -> Result<Vec<Array3<f32>>> {
    let mut detections = Vec::new();
    for &nucleus in types {
        detections.extend(load_detections(dir, name, nucleus)?);
    }
    crop_cells(image, &detections, rng)
}

fn create_bags(config: &ColonBagsConfig, dirs: &[PathBuf], rng: &mut StdRng) -> Result<Vec<Arc<ColonBag>>> {
    let mut bags = Vec::new();

    for dir in dirs {
        let name = dir
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();

        let mut image = load_rgb(&dir.join(format!("{}.bmp", name)))?;
        if config.loc_info {
            image = with_location_channels(image);
        }

        let (instances, labels) = match config.nucleus_type {
            Some(nucleus) => {
                let jitter = config.data_augmentation.then_some(&mut *rng);
                let crops = crop_types(dir, &name, &image, &[nucleus], jitter)?;
                if crops.is_empty() {
                    debug!("{}: нет ядер типа {}, изображение пропущено", name, nucleus);
                    continue;
                }
                let labels = vec![nucleus.instance_label(); crops.len()];
                (crops, labels)
            }
            None => {
                let epithelial = crop_types(
                    dir,
                    &name,
                    &image,
                    &[NucleusType::Epithelial],
                    config.data_augmentation.then_some(&mut *rng),
                )?;
                let others = crop_types(
                    dir,
                    &name,
                    &image,
                    &[
                        NucleusType::Inflammatory,
                        NucleusType::Fibroblast,
                        NucleusType::Others,
                    ],
                    config.data_augmentation.then_some(&mut *rng),
                )?;

                let mut labels = vec![1u8; epithelial.len()];
                labels.resize(epithelial.len() + others.len(), 0);
                let mut instances = epithelial;
                instances.extend(others);
                (instances, labels)
            }
        };

        let (instances, labels) = if config.shuffle_bag {
            let mut paired: Vec<(Array3<f32>, u8)> = instances.into_iter().zip(labels).collect();
            paired.shuffle(&mut *rng);
            paired.into_iter().unzip()
        } else {
            (instances, labels)
        };

        debug!(
            "{}: {} ядер, эпителиальных {}",
            name,
            labels.len(),
            labels.iter().filter(|&&l| l > 0).count()
        );

        let bag = Arc::new(ColonBag { instances, labels });
        // Обучающие мешки используются дважды за эпоху
        if config.train {
            bags.push(Arc::clone(&bag));
        }
        bags.push(bag);
    }

    Ok(bags)
}

impl Dataset for ColonCancerBags {
    type Item = BagSample;
    type Label = BagLabel;

    fn len(&self) -> usize {
        self.bags.len()
    }

    fn get(&self, index: usize) -> Option<(Self::Item, Self::Label)> {
        let bag = self.bags.get(index)?;

        let sample = BagSample {
            bag: self.transform_bag(bag, self.pipeline()),
            raw: self
                .config
                .push
                .then(|| self.transform_bag(bag, &self.pipelines.raw)),
        };
        let label = Array1::from_elem(1, i64::from(bag_label(&bag.labels)));

        Some((sample, label))
    }
}

impl MilDataset for ColonCancerBags {
    fn bag_len(&self, index: usize) -> Option<usize> {
        self.bags.get(index).map(|bag| bag.labels.len())
    }

    fn bag_label(&self, index: usize) -> Option<u8> {
        self.bags.get(index).map(|bag| bag_label(&bag.labels))
    }
}
