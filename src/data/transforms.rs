// --- Файл: src/data/transforms.rs ---

//! Преобразования изображений экземпляров.
//!
//! До [`ToTensor`] изображение хранится в раскладке HWC со значениями
//! `[0, 255]`, после него в раскладке CHW со значениями `[0, 1]`.

use ndarray::{s, Array3, Axis};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::sync::{Mutex, PoisonError};

/// Изображение экземпляра.
pub type Image = Array3<f32>;

/// Трейт для преобразований изображений.
pub trait Transform: Send + Sync {
    /// Применяет преобразование к изображению.
    fn apply(&self, image: Image) -> Image;
}

/// Генератор случайных чисел, разделяемый между вызовами `apply`.
pub(crate) struct TransformRng(Mutex<StdRng>);

impl TransformRng {
    pub(crate) fn new(seed: Option<u64>) -> Self {
        let rng = match seed {
            Some(s) => StdRng::seed_from_u64(s),
            None => StdRng::from_os_rng(),
        };
        Self(Mutex::new(rng))
    }

    pub(crate) fn with<R>(&self, f: impl FnOnce(&mut StdRng) -> R) -> R {
        let mut rng = self.0.lock().unwrap_or_else(PoisonError::into_inner);
        f(&mut rng)
    }
}

/// Композиция нескольких преобразований.
pub struct Compose {
    transforms: Vec<Box<dyn Transform>>,
}

impl Compose {
    /// Создает пустую композицию (тождественное преобразование).
    pub fn new() -> Self {
        Self {
            transforms: Vec::new(),
        }
    }

    /// Создает композицию из списка преобразований.
    pub fn from_transforms(transforms: Vec<Box<dyn Transform>>) -> Self {
        Self { transforms }
    }

    /// Добавляет преобразование в композицию.
    pub fn add<T: Transform + 'static>(mut self, transform: T) -> Self {
        self.transforms.push(Box::new(transform));
        self
    }

    /// Количество преобразований в цепочке.
    pub fn len(&self) -> usize {
        self.transforms.len()
    }

    /// Проверяет, пуста ли цепочка.
    pub fn is_empty(&self) -> bool {
        self.transforms.is_empty()
    }
}

impl Default for Compose {
    fn default() -> Self {
        Self::new()
    }
}

impl Transform for Compose {
    fn apply(&self, mut image: Image) -> Image {
        for transform in &self.transforms {
            image = transform.apply(image);
        }
        image
    }
}

/// Повторяет единственный канал трижды (аналог `convert('RGB')`).
pub struct GrayToRgb;

impl Transform for GrayToRgb {
    fn apply(&self, image: Image) -> Image {
        let (h, w, c) = image.dim();
        if c != 1 {
            return image;
        }
        match image.broadcast((h, w, 3)) {
            Some(rgb) => rgb.to_owned(),
            None => image,
        }
    }
}

/// HWC `[0, 255]` -> CHW `[0, 1]`.
pub struct ToTensor;

impl Transform for ToTensor {
    fn apply(&self, image: Image) -> Image {
        let chw = image.permuted_axes([2, 0, 1]);
        chw.as_standard_layout().mapv(|x| x / 255.0)
    }
}

/// Поканальная нормализация CHW тензора: (x - mean) / std.
pub struct Normalize {
    mean: Vec<f32>,
    std: Vec<f32>,
}

impl Normalize {
    /// Создает нормализатор с поканальными параметрами.
    ///
    /// Если задано одно значение, оно применяется ко всем каналам.
    pub fn new(mean: Vec<f32>, std: Vec<f32>) -> Self {
        Self { mean, std }
    }

    /// Статистика MNIST.
    pub fn mnist() -> Self {
        Self::new(vec![0.1307], vec![0.3081])
    }

    fn channel_params(&self, channel: usize) -> (f32, f32) {
        let pick = |values: &[f32], default: f32| match values.len() {
            0 => default,
            1 => values[0],
            _ => values.get(channel).copied().unwrap_or(default),
        };
        (pick(&self.mean, 0.0), pick(&self.std, 1.0).max(1e-8))
    }
}

impl Transform for Normalize {
    fn apply(&self, mut image: Image) -> Image {
        for (c, mut channel) in image.axis_iter_mut(Axis(0)).enumerate() {
            let (mean, std) = self.channel_params(c);
            channel.mapv_inplace(|x| (x - mean) / std);
        }
        image
    }
}

/// Случайное отражение по горизонтали (по оси ширины).
pub struct RandomHorizontalFlip {
    p: f64,
    rng: TransformRng,
}

impl RandomHorizontalFlip {
    /// Отражение с вероятностью `p`.
    pub fn new(p: f64) -> Self {
        Self {
            p: p.clamp(0.0, 1.0),
            rng: TransformRng::new(None),
        }
    }

    /// Устанавливает seed для воспроизводимости.
    pub fn with_seed(mut self, seed: u64) -> Self {
        self.rng = TransformRng::new(Some(seed));
        self
    }
}

impl Default for RandomHorizontalFlip {
    fn default() -> Self {
        Self::new(0.5)
    }
}

impl Transform for RandomHorizontalFlip {
    fn apply(&self, image: Image) -> Image {
        if self.rng.with(|rng| rng.random_bool(self.p)) {
            image.slice(s![.., ..;-1, ..]).to_owned()
        } else {
            image
        }
    }
}

/// Случайное отражение по вертикали (по оси высоты).
pub struct RandomVerticalFlip {
    p: f64,
    rng: TransformRng,
}

impl RandomVerticalFlip {
    /// Отражение с вероятностью `p`.
    pub fn new(p: f64) -> Self {
        Self {
            p: p.clamp(0.0, 1.0),
            rng: TransformRng::new(None),
        }
    }

    /// Устанавливает seed для воспроизводимости.
    pub fn with_seed(mut self, seed: u64) -> Self {
        self.rng = TransformRng::new(Some(seed));
        self
    }
}

impl Default for RandomVerticalFlip {
    fn default() -> Self {
        Self::new(0.5)
    }
}

impl Transform for RandomVerticalFlip {
    fn apply(&self, image: Image) -> Image {
        if self.rng.with(|rng| rng.random_bool(self.p)) {
            image.slice(s![..;-1, .., ..]).to_owned()
        } else {
            image
        }
    }
}

/// Поворот на случайный угол из {0, 90, 180, 270} градусов.
pub struct RandomRotate {
    rng: TransformRng,
}

impl RandomRotate {
    pub fn new() -> Self {
        Self {
            rng: TransformRng::new(None),
        }
    }

    /// Устанавливает seed для воспроизводимости.
    pub fn with_seed(mut self, seed: u64) -> Self {
        self.rng = TransformRng::new(Some(seed));
        self
    }
}

impl Default for RandomRotate {
    fn default() -> Self {
        Self::new()
    }
}

impl Transform for RandomRotate {
    fn apply(&self, image: Image) -> Image {
        let quarter_turns = self.rng.with(|rng| rng.random_range(0..4));
        (0..quarter_turns).fold(image, |img, _| rot90(img))
    }
}

/// Поворот HWC изображения на 90 градусов против часовой стрелки.
pub fn rot90(image: Image) -> Image {
    let transposed = image.permuted_axes([1, 0, 2]);
    transposed.slice(s![..;-1, .., ..]).to_owned()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ramp(h: usize, w: usize, c: usize) -> Image {
        Array3::from_shape_fn((h, w, c), |(y, x, ch)| (y * 100 + x * 10 + ch) as f32)
    }

    #[test]
    fn test_to_tensor_layout() {
        let image = ramp(2, 3, 3);
        let tensor = ToTensor.apply(image.clone());

        assert_eq!(tensor.shape(), &[3, 2, 3]);
        assert!((tensor[[2, 1, 0]] - image[[1, 0, 2]] / 255.0).abs() < 1e-6);
        assert!(tensor.is_standard_layout());
    }

    #[test]
    fn test_gray_to_rgb() {
        let gray = ramp(4, 4, 1);
        let rgb = GrayToRgb.apply(gray.clone());

        assert_eq!(rgb.shape(), &[4, 4, 3]);
        assert_eq!(rgb[[3, 2, 0]], gray[[3, 2, 0]]);
        assert_eq!(rgb[[3, 2, 2]], gray[[3, 2, 0]]);
    }

    #[test]
    fn test_normalize_per_channel() {
        let tensor = Array3::from_elem((2, 1, 1), 1.0);
        let norm = Normalize::new(vec![0.5, 1.0], vec![0.5, 2.0]);
        let result = norm.apply(tensor);

        assert!((result[[0, 0, 0]] - 1.0).abs() < 1e-6);
        assert!((result[[1, 0, 0]] - 0.0).abs() < 1e-6);
    }

    #[test]
    fn test_flips_always() {
        let image = ramp(2, 3, 1);

        let h = RandomHorizontalFlip::new(1.0).with_seed(0).apply(image.clone());
        assert_eq!(h[[0, 0, 0]], image[[0, 2, 0]]);

        let v = RandomVerticalFlip::new(1.0).with_seed(0).apply(image.clone());
        assert_eq!(v[[0, 0, 0]], image[[1, 0, 0]]);

        let none = RandomVerticalFlip::new(0.0).apply(image.clone());
        assert_eq!(none, image);
    }

    #[test]
    fn test_rot90() {
        let image = ramp(2, 3, 1);
        let rotated = rot90(image.clone());

        assert_eq!(rotated.shape(), &[3, 2, 1]);
        // Правый верхний угол уходит в левый верхний
        assert_eq!(rotated[[0, 0, 0]], image[[0, 2, 0]]);
        assert_eq!(rotated[[2, 1, 0]], image[[1, 0, 0]]);

        let full_turn = (0..4).fold(image.clone(), |img, _| rot90(img));
        assert_eq!(full_turn, image);
    }

    #[test]
    fn test_random_rotate_preserves_pixels() {
        let image = ramp(5, 5, 3);
        let rotate = RandomRotate::new().with_seed(11);

        for _ in 0..8 {
            let rotated = rotate.apply(image.clone());
            assert_eq!(rotated.shape(), image.shape());
            assert_eq!(rotated.sum(), image.sum());
        }
    }

    #[test]
    fn test_compose() {
        let transform = Compose::new().add(GrayToRgb).add(ToTensor);
        assert_eq!(transform.len(), 2);

        let result = transform.apply(Array3::from_elem((28, 28, 1), 255.0));
        assert_eq!(result.shape(), &[3, 28, 28]);
        assert!(result.iter().all(|&x| (x - 1.0).abs() < 1e-6));
    }
}
