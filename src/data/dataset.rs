// --- Файл: src/data/dataset.rs ---

//! Трейт Dataset и комбинаторы поверх него.

/// Трейт для источников данных с произвольным доступом по индексу.
///
/// Каждый датасет должен уметь:
/// - Возвращать количество элементов
/// - Возвращать элемент и метку по индексу
pub trait Dataset: Send + Sync {
    /// Тип элемента данных (изображение, мешок)
    type Item;
    /// Тип метки
    type Label;

    /// Возвращает количество элементов в датасете.
    fn len(&self) -> usize;

    /// Проверяет, пуст ли датасет.
    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Возвращает элемент и метку по индексу.
    ///
    /// Для индекса за пределами датасета возвращает `None`.
    fn get(&self, index: usize) -> Option<(Self::Item, Self::Label)>;

    /// Возвращает только элемент данных по индексу.
    fn get_item(&self, index: usize) -> Option<Self::Item> {
        self.get(index).map(|(item, _)| item)
    }

    /// Возвращает только метку по индексу.
    fn get_label(&self, index: usize) -> Option<Self::Label> {
        self.get(index).map(|(_, label)| label)
    }
}

/// Датасет, объединяющий несколько датасетов одного типа.
pub struct ConcatDataset<D: Dataset> {
    datasets: Vec<D>,
    cumulative_sizes: Vec<usize>,
    total_len: usize,
}

impl<D: Dataset> ConcatDataset<D> {
    /// Создает объединенный датасет из списка датасетов.
    pub fn new(datasets: Vec<D>) -> Self {
        let mut cumulative_sizes = Vec::with_capacity(datasets.len());
        let mut total = 0;

        for dataset in &datasets {
            total += dataset.len();
            cumulative_sizes.push(total);
        }

        Self {
            datasets,
            cumulative_sizes,
            total_len: total,
        }
    }

    /// Находит индекс датасета и локальный индекс для глобального индекса.
    fn find_dataset(&self, index: usize) -> Option<(usize, usize)> {
        if index >= self.total_len {
            return None;
        }

        let dataset_idx = self.cumulative_sizes.partition_point(|&x| x <= index);
        let local_idx = if dataset_idx == 0 {
            index
        } else {
            index - self.cumulative_sizes[dataset_idx - 1]
        };

        Some((dataset_idx, local_idx))
    }
}

impl<D: Dataset> Dataset for ConcatDataset<D> {
    type Item = D::Item;
    type Label = D::Label;

    fn len(&self) -> usize {
        self.total_len
    }

    fn get(&self, index: usize) -> Option<(Self::Item, Self::Label)> {
        let (dataset_idx, local_idx) = self.find_dataset(index)?;
        self.datasets[dataset_idx].get(local_idx)
    }
}

/// Датасет с подмножеством индексов.
///
/// Заимствует исходный датасет, поэтому фолды k-fold разбиения
/// не копируют данные.
pub struct SubsetDataset<'a, D: Dataset> {
    inner: &'a D,
    indices: Vec<usize>,
}

impl<'a, D: Dataset> SubsetDataset<'a, D> {
    /// Создает подмножество датасета по указанным индексам.
    pub fn new(dataset: &'a D, indices: Vec<usize>) -> Self {
        Self {
            inner: dataset,
            indices,
        }
    }

    /// Индексы исходного датасета, входящие в подмножество.
    pub fn indices(&self) -> &[usize] {
        &self.indices
    }

    /// Исходный датасет.
    pub fn inner(&self) -> &'a D {
        self.inner
    }
}

impl<D: Dataset> Dataset for SubsetDataset<'_, D> {
    type Item = D::Item;
    type Label = D::Label;

    fn len(&self) -> usize {
        self.indices.len()
    }

    fn get(&self, index: usize) -> Option<(Self::Item, Self::Label)> {
        let actual_idx = *self.indices.get(index)?;
        self.inner.get(actual_idx)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Range(usize, usize);

    impl Dataset for Range {
        type Item = usize;
        type Label = bool;

        fn len(&self) -> usize {
            self.1 - self.0
        }

        fn get(&self, index: usize) -> Option<(usize, bool)> {
            (index < self.len()).then(|| (self.0 + index, (self.0 + index) % 2 == 0))
        }
    }

    #[test]
    fn test_concat_dataset() {
        let concat = ConcatDataset::new(vec![Range(0, 3), Range(10, 12)]);

        assert_eq!(concat.len(), 5);
        assert_eq!(concat.get_item(2), Some(2));
        assert_eq!(concat.get_item(3), Some(10));
        assert_eq!(concat.get_item(4), Some(11));
        assert!(concat.get(5).is_none());
    }

    #[test]
    fn test_subset_dataset() {
        let base = Range(0, 10);
        let subset = SubsetDataset::new(&base, vec![7, 2]);

        assert_eq!(subset.len(), 2);
        assert_eq!(subset.get(0), Some((7, false)));
        assert_eq!(subset.get_label(1), Some(true));
        assert!(subset.get(2).is_none());
    }

    #[test]
    fn test_empty_concat() {
        let concat: ConcatDataset<Range> = ConcatDataset::new(Vec::new());
        assert!(concat.is_empty());
        assert!(concat.get(0).is_none());
    }
}
