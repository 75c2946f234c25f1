// --- Файл: src/data/dataloader.rs ---

//! DataLoader - итератор по батчам мешков.

use super::dataset::Dataset;
use super::sampler::{BatchSampler, RandomSampler, SequentialSampler};

/// Батч данных.
///
/// Мешки имеют разную длину, поэтому батч хранит элементы списком,
/// а не одним тензором.
#[derive(Debug, Clone)]
pub struct Batch<I, L> {
    /// Элементы батча
    pub items: Vec<I>,
    /// Метки батча
    pub labels: Vec<L>,
    /// Индексы образцов в этом батче
    pub indices: Vec<usize>,
}

impl<I, L> Batch<I, L> {
    /// Возвращает размер батча.
    pub fn len(&self) -> usize {
        self.indices.len()
    }

    /// Проверяет, пуст ли батч.
    pub fn is_empty(&self) -> bool {
        self.indices.is_empty()
    }
}

/// DataLoader - удобный интерфейс для итерации по датасету батчами.
///
/// # Пример
///
/// ```rust,ignore
/// let loader = DataLoader::new(bags, 1)
///     .shuffle(true)
///     .seed(7);
///
/// for batch in loader.iter() {
///     println!("Batch size: {}", batch.len());
/// }
/// ```
pub struct DataLoader<D: Dataset> {
    dataset: D,
    batch_size: usize,
    shuffle: bool,
    drop_last: bool,
    seed: Option<u64>,
}

impl<D: Dataset> DataLoader<D> {
    /// Создает новый DataLoader.
    ///
    /// # Аргументы
    ///
    /// * `dataset` - Датасет для загрузки
    /// * `batch_size` - Размер батча (0 трактуется как 1)
    pub fn new(dataset: D, batch_size: usize) -> Self {
        Self {
            dataset,
            batch_size: batch_size.max(1),
            shuffle: false,
            drop_last: false,
            seed: None,
        }
    }

    /// Включает/выключает перемешивание данных.
    pub fn shuffle(mut self, shuffle: bool) -> Self {
        self.shuffle = shuffle;
        self
    }

    /// Устанавливает, нужно ли отбрасывать последний неполный батч.
    pub fn drop_last(mut self, drop_last: bool) -> Self {
        self.drop_last = drop_last;
        self
    }

    /// Устанавливает seed для воспроизводимости.
    pub fn seed(mut self, seed: u64) -> Self {
        self.seed = Some(seed);
        self
    }

    /// Возвращает количество батчей.
    pub fn num_batches(&self) -> usize {
        let n = self.dataset.len();
        if self.drop_last {
            n / self.batch_size
        } else {
            n.div_ceil(self.batch_size)
        }
    }

    /// Возвращает размер датасета.
    pub fn len(&self) -> usize {
        self.dataset.len()
    }

    /// Проверяет, пуст ли DataLoader.
    pub fn is_empty(&self) -> bool {
        self.dataset.is_empty()
    }

    /// Возвращает размер батча.
    pub fn batch_size(&self) -> usize {
        self.batch_size
    }

    /// Доступ к исходному датасету.
    pub fn dataset(&self) -> &D {
        &self.dataset
    }

    /// Создает итератор по батчам.
    pub fn iter(&self) -> DataLoaderIterator<'_, D> {
        let len = self.dataset.len();
        let batch_sampler = if self.shuffle {
            let sampler = match self.seed {
                Some(seed) => RandomSampler::with_seed(len, seed),
                None => RandomSampler::new(len),
            };
            BatchSamplerEnum::Random(BatchSampler::new(sampler, self.batch_size, self.drop_last))
        } else {
            let sampler = SequentialSampler::new(len);
            BatchSamplerEnum::Sequential(BatchSampler::new(
                sampler,
                self.batch_size,
                self.drop_last,
            ))
        };

        DataLoaderIterator {
            dataset: &self.dataset,
            batch_sampler,
        }
    }
}

/// Enum для хранения разных типов batch sampler'ов.
enum BatchSamplerEnum {
    Sequential(BatchSampler<SequentialSampler>),
    Random(BatchSampler<RandomSampler>),
}

impl Iterator for BatchSamplerEnum {
    type Item = Vec<usize>;

    fn next(&mut self) -> Option<Self::Item> {
        match self {
            BatchSamplerEnum::Sequential(s) => s.next(),
            BatchSamplerEnum::Random(s) => s.next(),
        }
    }
}

/// Итератор по батчам данных.
pub struct DataLoaderIterator<'a, D: Dataset> {
    dataset: &'a D,
    batch_sampler: BatchSamplerEnum,
}

impl<D: Dataset> Iterator for DataLoaderIterator<'_, D> {
    type Item = Batch<D::Item, D::Label>;

    fn next(&mut self) -> Option<Self::Item> {
        let indices = self.batch_sampler.next()?;

        let mut items = Vec::with_capacity(indices.len());
        let mut labels = Vec::with_capacity(indices.len());
        for &idx in &indices {
            // Сэмплер выдает только индексы внутри датасета
            let (item, label) = self.dataset.get(idx)?;
            items.push(item);
            labels.push(label);
        }

        Some(Batch {
            items,
            labels,
            indices,
        })
    }
}

/// Конструктор DataLoader.
pub struct DataLoaderBuilder {
    batch_size: usize,
    shuffle: bool,
    drop_last: bool,
    seed: Option<u64>,
}

impl Default for DataLoaderBuilder {
    fn default() -> Self {
        Self {
            batch_size: 1,
            shuffle: false,
            drop_last: false,
            seed: None,
        }
    }
}

impl DataLoaderBuilder {
    /// Создает новый builder.
    pub fn new() -> Self {
        Self::default()
    }

    /// Устанавливает размер батча.
    pub fn batch_size(mut self, size: usize) -> Self {
        self.batch_size = size;
        self
    }

    /// Включает перемешивание.
    pub fn shuffle(mut self, shuffle: bool) -> Self {
        self.shuffle = shuffle;
        self
    }

    /// Устанавливает drop_last.
    pub fn drop_last(mut self, drop_last: bool) -> Self {
        self.drop_last = drop_last;
        self
    }

    /// Устанавливает seed.
    pub fn seed(mut self, seed: u64) -> Self {
        self.seed = Some(seed);
        self
    }

    /// Строит DataLoader.
    pub fn build<D: Dataset>(self, dataset: D) -> DataLoader<D> {
        let mut loader = DataLoader::new(dataset, self.batch_size)
            .shuffle(self.shuffle)
            .drop_last(self.drop_last);

        if let Some(seed) = self.seed {
            loader = loader.seed(seed);
        }

        loader
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Мешки разной длины: мешок i содержит i + 1 экземпляр.
    struct Ragged(usize);

    impl Dataset for Ragged {
        type Item = Vec<u8>;
        type Label = u8;

        fn len(&self) -> usize {
            self.0
        }

        fn get(&self, index: usize) -> Option<(Vec<u8>, u8)> {
            (index < self.0).then(|| (vec![0; index + 1], (index % 2) as u8))
        }
    }

    #[test]
    fn test_dataloader_basic() {
        let loader = DataLoader::new(Ragged(10), 3);

        assert_eq!(loader.num_batches(), 4);
        assert_eq!(loader.len(), 10);

        let batches: Vec<_> = loader.iter().collect();
        assert_eq!(batches.len(), 4);
        assert_eq!(batches[0].len(), 3);
        assert_eq!(batches[3].len(), 1); // Последний неполный батч
        assert_eq!(batches[0].items[2].len(), 3);
    }

    #[test]
    fn test_dataloader_drop_last() {
        let loader = DataLoader::new(Ragged(10), 3).drop_last(true);

        let batches: Vec<_> = loader.iter().collect();
        assert_eq!(batches.len(), 3);
    }

    #[test]
    fn test_dataloader_shuffle_visits_all() {
        let loader = DataLoader::new(Ragged(10), 1).shuffle(true).seed(42);

        let mut seen: Vec<usize> = loader.iter().flat_map(|b| b.indices).collect();
        seen.sort();
        assert_eq!(seen, (0..10).collect::<Vec<_>>());
    }

    #[test]
    fn test_dataloader_builder() {
        let loader = DataLoaderBuilder::new()
            .batch_size(4)
            .shuffle(true)
            .drop_last(false)
            .seed(123)
            .build(Ragged(10));

        assert_eq!(loader.batch_size(), 4);
        assert_eq!(loader.num_batches(), 3);
    }

    #[test]
    fn test_items_match_labels() {
        let loader = DataLoader::new(Ragged(4), 2);

        for batch in loader.iter() {
            for (item, (&idx, &label)) in batch
                .items
                .iter()
                .zip(batch.indices.iter().zip(batch.labels.iter()))
            {
                assert_eq!(item.len(), idx + 1);
                assert_eq!(label as usize, idx % 2);
            }
        }
    }
}
