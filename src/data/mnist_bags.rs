// --- Файл: src/data/mnist_bags.rs ---

//! Синтетические мешки из цифр MNIST.
//!
//! Отрицательный мешок состоит только из цифр, отличных от целевой.
//! Положительный мешок содержит хотя бы одну целевую цифру и хотя бы
//! одну нецелевую. Длина мешка и доля положительных экземпляров
//! выбираются из нормальных распределений с фиксированным seed.

use super::bag::{bag_label, stack_instances, BagLabel, BagSample, MilDataset};
use super::dataset::{Dataset, SubsetDataset};
use super::kfold::KFold;
use super::mnist::MNIST_SIDE;
use super::transforms::{Compose, GrayToRgb, Normalize, ToTensor, Transform};
use crate::error::{DataError, Result};
use log::{debug, info};
use ndarray::{stack, Array1, Array2, Array3, ArrayView2, Axis};
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::{Rng, SeedableRng};
use rand_distr::{Distribution, Normal};
use serde::{Deserialize, Serialize};

/// Параметры генерации мешков MNIST.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MnistBagsConfig {
    /// Цифра, делающая мешок положительным
    pub target_number: u8,
    pub bag_length_mean: f64,
    pub bag_length_std: f64,
    pub bag_length_min: usize,
    pub bag_length_max: usize,
    /// Средняя доля целевых цифр в положительном мешке
    pub positive_samples_in_bag_ratio_mean: f64,
    pub positive_samples_in_bag_ratio_std: f64,
    pub num_bags_train: usize,
    pub num_bags_test: usize,
    /// Seed генерации мешков
    pub seed: u64,
    pub folds: usize,
    pub fold_id: usize,
    /// Seed перемешивания в k-fold разбиении
    pub kfold_seed: u64,
    pub train: bool,
    /// Возвращать дополнительно необработанный мешок
    pub push: bool,
    /// Возвращать метки всех экземпляров вместо метки мешка
    pub all_labels: bool,
    /// Нормализовать экземпляры статистикой MNIST
    pub normalize: bool,
}

impl Default for MnistBagsConfig {
    fn default() -> Self {
        Self {
            target_number: 9,
            bag_length_mean: 200.0,
            bag_length_std: 150.0,
            bag_length_min: 50,
            bag_length_max: 600,
            positive_samples_in_bag_ratio_mean: 0.3,
            positive_samples_in_bag_ratio_std: 0.25,
            num_bags_train: 300,
            num_bags_test: 300,
            seed: 7,
            folds: 10,
            fold_id: 0,
            kfold_seed: 3,
            train: true,
            push: false,
            all_labels: false,
            normalize: false,
        }
    }
}

impl MnistBagsConfig {
    /// Количество мешков для выбранной части.
    pub fn num_bags(&self) -> usize {
        if self.train {
            self.num_bags_train
        } else {
            self.num_bags_test
        }
    }

    /// Проверяет согласованность параметров.
    pub fn validate(&self) -> Result<()> {
        let invalid = |msg: String| Err(DataError::InvalidConfig(msg));

        if self.target_number > 9 {
            return invalid(format!("target_number {} не является цифрой", self.target_number));
        }
        if self.bag_length_min < 2 {
            return invalid("bag_length_min должен быть не меньше 2".to_string());
        }
        if self.bag_length_min > self.bag_length_max {
            return invalid(format!(
                "bag_length_min {} больше bag_length_max {}",
                self.bag_length_min, self.bag_length_max
            ));
        }
        for (name, std) in [
            ("bag_length_std", self.bag_length_std),
            ("positive_samples_in_bag_ratio_std", self.positive_samples_in_bag_ratio_std),
        ] {
            if !std.is_finite() || std < 0.0 {
                return invalid(format!("{} должно быть неотрицательным числом", name));
            }
        }
        if !self.bag_length_mean.is_finite() || !self.positive_samples_in_bag_ratio_mean.is_finite()
        {
            return invalid("средние значения должны быть конечными".to_string());
        }
        if self.fold_id >= self.folds {
            return invalid(format!("fold_id {} вне диапазона 0..{}", self.fold_id, self.folds));
        }
        Ok(())
    }
}

/// Мешок как набор ссылок на экземпляры пулов.
#[derive(Debug, Clone)]
struct BagIndices {
    /// Метка экземпляра определяет пул: 1 - положительный, 0 - отрицательный
    labels: Vec<u8>,
    /// Индекс внутри соответствующего пула
    indices: Vec<usize>,
}

/// Датасет мешков из цифр MNIST.
///
/// Мешки хранятся как индексы в пулах цифр, тензоры собираются
/// при каждом обращении к [`Dataset::get`].
pub struct MnistBags {
    config: MnistBagsConfig,
    positives: Array3<u8>,
    negatives: Array3<u8>,
    bags: Vec<BagIndices>,
    to_tensor: Compose,
    normalize: Compose,
}

impl MnistBags {
    /// Строит мешки из набора цифр.
    pub fn new<D>(digits: &D, config: MnistBagsConfig) -> Result<Self>
    where
        D: Dataset<Item = Array2<u8>, Label = u8>,
    {
        config.validate()?;

        let fold = KFold::new(config.folds, config.kfold_seed)?.fold(digits.len(), config.fold_id)?;
        let selected = if config.train { fold.train } else { fold.test };
        let subset = SubsetDataset::new(digits, selected);

        let mut positive_images = Vec::new();
        let mut negative_images = Vec::new();
        for i in 0..subset.len() {
            let Some((image, label)) = subset.get(i) else {
                continue;
            };
            if label == config.target_number {
                positive_images.push(image);
            } else {
                negative_images.push(image);
            }
        }
        debug!(
            "Пулы цифр: {} с цифрой {}, {} остальных",
            positive_images.len(),
            config.target_number,
            negative_images.len()
        );

        let positives = stack_pool(&positive_images, "положительный")?;
        let negatives = stack_pool(&negative_images, "отрицательный")?;

        let bags = form_bags(&config, positives.len_of(Axis(0)), negatives.len_of(Axis(0)))?;

        let normalize = if config.normalize {
            Compose::new().add(Normalize::mnist())
        } else {
            Compose::new()
        };

        let dataset = Self {
            to_tensor: Compose::new().add(GrayToRgb).add(ToTensor),
            normalize,
            config,
            positives,
            negatives,
            bags,
        };
        let stats = dataset.stats();
        info!(
            "Сформировано {} мешков MNIST ({}), положительных {}, средняя длина {:.1}",
            stats.num_bags,
            if dataset.config.train { "train" } else { "test" },
            stats.positive_bags,
            stats.mean_len
        );

        Ok(dataset)
    }

    /// Конфигурация, с которой построен датасет.
    pub fn config(&self) -> &MnistBagsConfig {
        &self.config
    }

    /// Метки экземпляров мешка.
    pub fn instance_labels(&self, index: usize) -> Option<&[u8]> {
        self.bags.get(index).map(|bag| bag.labels.as_slice())
    }

    /// Исходная цифра экземпляра в виде `[28, 28]`.
    fn instance(&self, label: u8, index: usize) -> ArrayView2<'_, u8> {
        let pool = if label > 0 { &self.positives } else { &self.negatives };
        pool.index_axis(Axis(0), index)
    }

    fn materialize(&self, bag: &BagIndices) -> (Vec<Array3<f32>>, Vec<Array3<f32>>) {
        bag.labels
            .iter()
            .zip(&bag.indices)
            .map(|(&label, &idx)| {
                let digit = self
                    .instance(label, idx)
                    .mapv(f32::from)
                    .insert_axis(Axis(2));
                let tensor = self.to_tensor.apply(digit);
                (tensor.clone(), self.normalize.apply(tensor))
            })
            .unzip()
    }
}

fn stack_pool(images: &[Array2<u8>], name: &str) -> Result<Array3<u8>> {
    if images.is_empty() {
        return Err(DataError::EmptyPool(format!("{} пул цифр", name)));
    }
    let views: Vec<ArrayView2<'_, u8>> = images.iter().map(|img| img.view()).collect();
    Ok(stack(Axis(0), &views)?)
}

/// Генерация состава мешков.
///
/// Первая половина мешков отрицательная, вторая положительная.
fn form_bags(config: &MnistBagsConfig, num_positive: usize, num_negative: usize) -> Result<Vec<BagIndices>> {
    let to_config_error = |e: rand_distr::NormalError| DataError::InvalidConfig(e.to_string());
    let length_dist =
        Normal::new(config.bag_length_mean, config.bag_length_std).map_err(to_config_error)?;
    let ratio_dist = Normal::new(
        config.positive_samples_in_bag_ratio_mean,
        config.positive_samples_in_bag_ratio_std,
    )
    .map_err(to_config_error)?;

    let mut rng = StdRng::seed_from_u64(config.seed);
    let num_bags = config.num_bags();
    let negative_bags = num_bags / 2;

    let mut bags = Vec::with_capacity(num_bags);
    for i in 0..num_bags {
        let length: f64 = length_dist.sample(&mut rng);
        let bag_length = (length as i64)
            .clamp(config.bag_length_min as i64, config.bag_length_max as i64) as usize;

        if i < negative_bags {
            let indices = (0..bag_length)
                .map(|_| rng.random_range(0..num_negative))
                .collect();
            bags.push(BagIndices {
                labels: vec![0; bag_length],
                indices,
            });
            continue;
        }

        let ratio: f64 = ratio_dist.sample(&mut rng);
        let positive_num = ((bag_length as f64 * ratio) as i64).clamp(1, bag_length as i64 - 1) as usize;
        let negative_num = bag_length - positive_num;

        let mut instances: Vec<(u8, usize)> = Vec::with_capacity(bag_length);
        instances.extend((0..positive_num).map(|_| (1, rng.random_range(0..num_positive))));
        instances.extend((0..negative_num).map(|_| (0, rng.random_range(0..num_negative))));
        instances.shuffle(&mut rng);

        let (labels, indices) = instances.into_iter().unzip();
        bags.push(BagIndices { labels, indices });
    }

    Ok(bags)
}

impl Dataset for MnistBags {
    type Item = BagSample;
    type Label = BagLabel;

    fn len(&self) -> usize {
        self.bags.len()
    }

    fn get(&self, index: usize) -> Option<(Self::Item, Self::Label)> {
        let bag = self.bags.get(index)?;
        let (raw, transformed) = self.materialize(bag);

        let shape = (3, MNIST_SIDE, MNIST_SIDE);
        let sample = BagSample {
            bag: stack_instances(&transformed, shape),
            raw: self.config.push.then(|| stack_instances(&raw, shape)),
        };

        let label = if self.config.all_labels {
            bag.labels.iter().map(|&l| i64::from(l)).collect()
        } else {
            Array1::from_elem(1, i64::from(bag_label(&bag.labels)))
        };

        Some((sample, label))
    }
}

impl MilDataset for MnistBags {
    fn bag_len(&self, index: usize) -> Option<usize> {
        self.bags.get(index).map(|bag| bag.labels.len())
    }

    fn bag_label(&self, index: usize) -> Option<u8> {
        self.bags.get(index).map(|bag| bag_label(&bag.labels))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::MnistDigits;

    /// Цифры, у которых все пиксели равны метке.
    fn digits(n: usize) -> MnistDigits {
        let labels: Vec<u8> = (0..n).map(|i| (i % 10) as u8).collect();
        let images = Array3::from_shape_fn((n, 28, 28), |(i, _, _)| labels[i]);
        MnistDigits::new(images, labels).unwrap()
    }

    fn small_config() -> MnistBagsConfig {
        MnistBagsConfig {
            bag_length_mean: 10.0,
            bag_length_std: 4.0,
            bag_length_min: 2,
            bag_length_max: 20,
            num_bags_train: 20,
            num_bags_test: 10,
            folds: 5,
            ..MnistBagsConfig::default()
        }
    }

    #[test]
    fn test_half_negative_half_positive() {
        let bags = MnistBags::new(&digits(200), small_config()).unwrap();

        assert_eq!(bags.len(), 20);
        for i in 0..10 {
            assert_eq!(MilDataset::bag_label(&bags, i), Some(0));
        }
        for i in 10..20 {
            let labels = bags.instance_labels(i).unwrap();
            assert_eq!(MilDataset::bag_label(&bags, i), Some(1));
            // Хотя бы один отрицательный экземпляр
            assert!(labels.contains(&0));
        }
    }

    #[test]
    fn test_lengths_clamped() {
        let config = MnistBagsConfig {
            bag_length_std: 100.0,
            ..small_config()
        };
        let bags = MnistBags::new(&digits(200), config).unwrap();

        for i in 0..bags.len() {
            let len = bags.bag_len(i).unwrap();
            assert!((2..=20).contains(&len));
        }
    }

    #[test]
    fn test_instances_match_labels() {
        let config = MnistBagsConfig {
            all_labels: true,
            ..small_config()
        };
        let bags = MnistBags::new(&digits(200), config).unwrap();
        let (sample, labels) = bags.get(15).unwrap();

        assert_eq!(&sample.bag.shape()[1..], &[3, 28, 28]);
        assert_eq!(sample.len(), labels.len());
        for (instance, &label) in sample.bag.axis_iter(Axis(0)).zip(labels.iter()) {
            let pixel = instance[[0, 0, 0]] * 255.0;
            let is_target = (pixel - 9.0).abs() < 1e-3;
            assert_eq!(is_target, label == 1);
        }
    }

    #[test]
    fn test_push_returns_raw() {
        let config = MnistBagsConfig {
            push: true,
            normalize: true,
            ..small_config()
        };
        let bags = MnistBags::new(&digits(200), config).unwrap();
        let (sample, label) = bags.get(0).unwrap();

        let raw = sample.raw.unwrap();
        assert_eq!(raw.shape(), sample.bag.shape());
        assert_ne!(raw, sample.bag);
        assert_eq!(label.len(), 1);
    }

    #[test]
    fn test_deterministic() {
        let a = MnistBags::new(&digits(200), small_config()).unwrap();
        let b = MnistBags::new(&digits(200), small_config()).unwrap();

        for i in 0..a.len() {
            assert_eq!(a.instance_labels(i), b.instance_labels(i));
            assert_eq!(a.bags[i].indices, b.bags[i].indices);
        }
    }

    #[test]
    fn test_invalid_config() {
        let config = MnistBagsConfig {
            target_number: 10,
            ..small_config()
        };
        assert!(matches!(
            MnistBags::new(&digits(100), config),
            Err(DataError::InvalidConfig(_))
        ));

        let config = MnistBagsConfig {
            fold_id: 5,
            ..small_config()
        };
        assert!(MnistBags::new(&digits(100), config).is_err());
    }

    #[test]
    fn test_missing_target_digit() {
        let labels = vec![1u8; 50];
        let images = Array3::zeros((50, 28, 28));
        let digits = MnistDigits::new(images, labels).unwrap();

        assert!(matches!(
            MnistBags::new(&digits, small_config()),
            Err(DataError::EmptyPool(_))
        ));
    }
}
