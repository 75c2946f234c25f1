// --- Файл: src/data/sampler.rs ---

//! Стратегии сэмплирования индексов для DataLoader.

use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;

/// Трейт для сэмплеров - генераторов индексов.
pub trait Sampler: Iterator<Item = usize> {
    /// Возвращает общее количество образцов.
    fn len(&self) -> usize;

    /// Проверяет, пуст ли сэмплер.
    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Сбрасывает сэмплер в начальное состояние.
    fn reset(&mut self);
}

/// Последовательный сэмплер - возвращает индексы по порядку.
pub struct SequentialSampler {
    len: usize,
    current: usize,
}

impl SequentialSampler {
    /// Создает последовательный сэмплер для датасета заданного размера.
    pub fn new(len: usize) -> Self {
        Self { len, current: 0 }
    }
}

impl Iterator for SequentialSampler {
    type Item = usize;

    fn next(&mut self) -> Option<Self::Item> {
        if self.current < self.len {
            let idx = self.current;
            self.current += 1;
            Some(idx)
        } else {
            None
        }
    }
}

impl Sampler for SequentialSampler {
    fn len(&self) -> usize {
        self.len
    }

    fn reset(&mut self) {
        self.current = 0;
    }
}

/// Случайный сэмплер - возвращает индексы в случайном порядке.
///
/// С фиксированным seed генератор живет между эпохами, поэтому
/// каждый `reset` дает новую, но воспроизводимую перестановку.
pub struct RandomSampler {
    indices: Vec<usize>,
    current: usize,
    rng: StdRng,
}

impl RandomSampler {
    /// Создает случайный сэмплер для датасета заданного размера.
    pub fn new(len: usize) -> Self {
        Self::from_rng(len, StdRng::from_os_rng())
    }

    /// Создает случайный сэмплер с фиксированным seed для воспроизводимости.
    pub fn with_seed(len: usize, seed: u64) -> Self {
        Self::from_rng(len, StdRng::seed_from_u64(seed))
    }

    fn from_rng(len: usize, rng: StdRng) -> Self {
        let mut sampler = Self {
            indices: (0..len).collect(),
            current: 0,
            rng,
        };
        sampler.shuffle();
        sampler
    }

    fn shuffle(&mut self) {
        self.indices.shuffle(&mut self.rng);
    }
}

impl Iterator for RandomSampler {
    type Item = usize;

    fn next(&mut self) -> Option<Self::Item> {
        let idx = *self.indices.get(self.current)?;
        self.current += 1;
        Some(idx)
    }
}

impl Sampler for RandomSampler {
    fn len(&self) -> usize {
        self.indices.len()
    }

    fn reset(&mut self) {
        self.current = 0;
        self.shuffle();
    }
}

/// Батч-сэмплер - группирует индексы в батчи.
pub struct BatchSampler<S: Sampler> {
    sampler: S,
    batch_size: usize,
    drop_last: bool,
}

impl<S: Sampler> BatchSampler<S> {
    /// Создает батч-сэмплер.
    ///
    /// # Аргументы
    ///
    /// * `sampler` - Внутренний сэмплер для генерации индексов
    /// * `batch_size` - Размер батча (0 трактуется как 1)
    /// * `drop_last` - Отбросить последний неполный батч
    pub fn new(sampler: S, batch_size: usize, drop_last: bool) -> Self {
        Self {
            sampler,
            batch_size: batch_size.max(1),
            drop_last,
        }
    }

    /// Возвращает количество батчей.
    pub fn num_batches(&self) -> usize {
        let n = self.sampler.len();
        if self.drop_last {
            n / self.batch_size
        } else {
            n.div_ceil(self.batch_size)
        }
    }

    /// Сбрасывает сэмплер.
    pub fn reset(&mut self) {
        self.sampler.reset();
    }
}

impl<S: Sampler> Iterator for BatchSampler<S> {
    type Item = Vec<usize>;

    fn next(&mut self) -> Option<Self::Item> {
        let batch: Vec<usize> = self.sampler.by_ref().take(self.batch_size).collect();

        if batch.is_empty() {
            return None;
        }

        if batch.len() < self.batch_size && self.drop_last {
            return None;
        }

        Some(batch)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sequential_sampler() {
        let mut sampler = SequentialSampler::new(5);
        let indices: Vec<_> = sampler.by_ref().collect();
        assert_eq!(indices, vec![0, 1, 2, 3, 4]);

        sampler.reset();
        let indices: Vec<_> = sampler.by_ref().collect();
        assert_eq!(indices, vec![0, 1, 2, 3, 4]);
    }

    #[test]
    fn test_random_sampler() {
        let mut sampler = RandomSampler::with_seed(5, 42);
        let indices: Vec<_> = sampler.by_ref().collect();
        assert_eq!(indices.len(), 5);

        // Все индексы уникальны
        let mut sorted = indices.clone();
        sorted.sort();
        assert_eq!(sorted, vec![0, 1, 2, 3, 4]);
    }

    #[test]
    fn test_random_sampler_reproducible() {
        let a: Vec<_> = RandomSampler::with_seed(50, 7).collect();
        let b: Vec<_> = RandomSampler::with_seed(50, 7).collect();
        assert_eq!(a, b);
    }

    #[test]
    fn test_batch_sampler() {
        let sampler = SequentialSampler::new(10);
        let mut batch_sampler = BatchSampler::new(sampler, 3, false);

        assert_eq!(batch_sampler.num_batches(), 4);
        let batches: Vec<_> = batch_sampler.by_ref().collect();
        assert_eq!(batches.len(), 4);
        assert_eq!(batches[0], vec![0, 1, 2]);
        assert_eq!(batches[3], vec![9]); // Последний неполный батч
    }

    #[test]
    fn test_batch_sampler_drop_last() {
        let sampler = SequentialSampler::new(10);
        let mut batch_sampler = BatchSampler::new(sampler, 3, true);

        assert_eq!(batch_sampler.num_batches(), 3);
        let batches: Vec<_> = batch_sampler.by_ref().collect();
        assert_eq!(batches.len(), 3); // Последний неполный батч отброшен
    }
}
