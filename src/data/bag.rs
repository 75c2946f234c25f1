// --- Файл: src/data/bag.rs ---

//! Мешки экземпляров и их метки.

use super::dataset::{Dataset, SubsetDataset};
use ndarray::{Array1, Array3, Array4, Axis};
use serde::{Deserialize, Serialize};

/// Метка, возвращаемая датасетами мешков.
///
/// Либо `[метка мешка]`, либо метки всех экземпляров.
pub type BagLabel = Array1<i64>;

/// Мешок, готовый для подачи в модель.
#[derive(Debug, Clone, PartialEq)]
pub struct BagSample {
    /// Экземпляры после пайплайна преобразований, форма `[n, C, H, W]`
    pub bag: Array4<f32>,
    /// Экземпляры после минимального пайплайна (только в режиме push)
    pub raw: Option<Array4<f32>>,
}

impl BagSample {
    /// Количество экземпляров в мешке.
    pub fn len(&self) -> usize {
        self.bag.len_of(Axis(0))
    }

    /// Проверяет, пуст ли мешок.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Метка мешка: максимум (логическое ИЛИ) меток экземпляров.
///
/// Пустой мешок считается отрицательным.
pub fn bag_label(instance_labels: &[u8]) -> u8 {
    instance_labels.iter().copied().max().unwrap_or(0)
}

/// Собирает CHW экземпляры в тензор `[n, C, H, W]`.
///
/// `instance_shape` задает форму экземпляра для пустого мешка.
pub fn stack_instances(instances: &[Array3<f32>], instance_shape: (usize, usize, usize)) -> Array4<f32> {
    let (c, h, w) = instances.first().map_or(instance_shape, |first| first.dim());
    let mut bag = Array4::zeros((instances.len(), c, h, w));
    for (mut slot, instance) in bag.axis_iter_mut(Axis(0)).zip(instances) {
        slot.assign(instance);
    }
    bag
}

/// Датасет мешков с дешевым доступом к длинам и меткам без
/// материализации тензоров.
pub trait MilDataset: Dataset<Item = BagSample, Label = BagLabel> {
    /// Количество экземпляров в мешке `index`.
    fn bag_len(&self, index: usize) -> Option<usize>;

    /// Метка мешка `index`.
    fn bag_label(&self, index: usize) -> Option<u8>;

    /// Сводная статистика по всем мешкам.
    fn stats(&self) -> BagStats {
        let lengths: Vec<usize> = (0..self.len()).filter_map(|i| self.bag_len(i)).collect();
        let labels: Vec<u8> = (0..self.len()).filter_map(|i| self.bag_label(i)).collect();
        BagStats::from_parts(&lengths, &labels)
    }
}

impl<D: MilDataset> MilDataset for SubsetDataset<'_, D> {
    fn bag_len(&self, index: usize) -> Option<usize> {
        self.inner().bag_len(*self.indices().get(index)?)
    }

    fn bag_label(&self, index: usize) -> Option<u8> {
        self.inner().bag_label(*self.indices().get(index)?)
    }
}

/// Статистика по набору мешков.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct BagStats {
    pub num_bags: usize,
    pub positive_bags: usize,
    pub min_len: usize,
    pub max_len: usize,
    pub mean_len: f64,
}

impl BagStats {
    /// Считает статистику по длинам и меткам мешков.
    pub fn from_parts(lengths: &[usize], labels: &[u8]) -> Self {
        if lengths.is_empty() {
            return Self::default();
        }
        Self {
            num_bags: lengths.len(),
            positive_bags: labels.iter().filter(|&&l| l > 0).count(),
            min_len: lengths.iter().copied().min().unwrap_or(0),
            max_len: lengths.iter().copied().max().unwrap_or(0),
            mean_len: lengths.iter().sum::<usize>() as f64 / lengths.len() as f64,
        }
    }
}
