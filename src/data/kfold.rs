// --- Файл: src/data/kfold.rs ---

//! K-fold разбиение индексов датасета.

use crate::error::{DataError, Result};
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;

/// Один фолд: индексы обучения и теста, отсортированные по возрастанию.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Fold {
    pub train: Vec<usize>,
    pub test: Vec<usize>,
}

/// K-fold разбиение с перемешиванием.
///
/// Индексы перемешиваются генератором с заданным seed и режутся на
/// `n_splits` непрерывных частей; первые `n % n_splits` частей получают
/// по одному дополнительному элементу.
#[derive(Debug, Clone, Copy)]
pub struct KFold {
    n_splits: usize,
    seed: u64,
}

impl KFold {
    /// Создает разбиение на `n_splits` фолдов.
    pub fn new(n_splits: usize, seed: u64) -> Result<Self> {
        if n_splits < 2 {
            return Err(DataError::InvalidConfig(format!(
                "k-fold требует минимум 2 фолда, получено {}",
                n_splits
            )));
        }
        Ok(Self { n_splits, seed })
    }

    /// Количество фолдов.
    pub fn n_splits(&self) -> usize {
        self.n_splits
    }

    /// Разбивает `n` индексов на фолды.
    pub fn split(&self, n: usize) -> Result<Vec<Fold>> {
        if self.n_splits > n {
            return Err(DataError::InvalidConfig(format!(
                "нельзя разбить {} образцов на {} фолдов",
                n, self.n_splits
            )));
        }

        let mut indices: Vec<usize> = (0..n).collect();
        let mut rng = StdRng::seed_from_u64(self.seed);
        indices.shuffle(&mut rng);

        let base = n / self.n_splits;
        let extra = n % self.n_splits;

        let mut folds = Vec::with_capacity(self.n_splits);
        let mut start = 0;
        for k in 0..self.n_splits {
            let size = base + usize::from(k < extra);
            let end = start + size;

            let mut test = indices[start..end].to_vec();
            let mut train: Vec<usize> = indices[..start]
                .iter()
                .chain(&indices[end..])
                .copied()
                .collect();
            test.sort_unstable();
            train.sort_unstable();

            folds.push(Fold { train, test });
            start = end;
        }

        Ok(folds)
    }

    /// Возвращает фолд с номером `fold_id`.
    pub fn fold(&self, n: usize, fold_id: usize) -> Result<Fold> {
        let mut folds = self.split(n)?;
        if fold_id >= folds.len() {
            return Err(DataError::InvalidConfig(format!(
                "fold_id {} вне диапазона 0..{}",
                fold_id, self.n_splits
            )));
        }
        Ok(folds.swap_remove(fold_id))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fold_sizes() {
        let folds = KFold::new(3, 3).unwrap().split(10).unwrap();

        let sizes: Vec<usize> = folds.iter().map(|f| f.test.len()).collect();
        assert_eq!(sizes, vec![4, 3, 3]);
        for fold in &folds {
            assert_eq!(fold.train.len() + fold.test.len(), 10);
        }
    }

    #[test]
    fn test_folds_partition_indices() {
        let folds = KFold::new(4, 1).unwrap().split(21).unwrap();

        let mut all_test: Vec<usize> = folds.iter().flat_map(|f| f.test.clone()).collect();
        all_test.sort_unstable();
        assert_eq!(all_test, (0..21).collect::<Vec<_>>());

        for fold in &folds {
            assert!(fold.test.windows(2).all(|w| w[0] < w[1]));
            assert!(fold.train.iter().all(|i| !fold.test.contains(i)));
        }
    }

    #[test]
    fn test_deterministic() {
        let a = KFold::new(5, 3).unwrap().fold(100, 2).unwrap();
        let b = KFold::new(5, 3).unwrap().fold(100, 2).unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn test_invalid_config() {
        assert!(KFold::new(1, 0).is_err());
        assert!(KFold::new(5, 0).unwrap().split(3).is_err());
        assert!(KFold::new(5, 0).unwrap().fold(10, 5).is_err());
    }
}
