// --- Файл: src/data/mnist.rs ---

//! Исходные цифры MNIST.

use super::dataset::{ConcatDataset, Dataset};
use crate::error::{DataError, Result};
use log::info;
use mnist::{Mnist, MnistBuilder};
use ndarray::{Array2, Array3, Axis};
use std::fs::File;
use std::io::Read;
use std::path::Path;

/// Сторона изображения цифры.
pub const MNIST_SIDE: usize = 28;

const TRAIN_IMAGES: &str = "train-images-idx3-ubyte";
const TRAIN_LABELS: &str = "train-labels-idx1-ubyte";
const TEST_IMAGES: &str = "t10k-images-idx3-ubyte";
const TEST_LABELS: &str = "t10k-labels-idx1-ubyte";

const TRAIN_LEN: usize = 60_000;
const TEST_LEN: usize = 10_000;

const IMAGES_MAGIC: u32 = 2051;
const LABELS_MAGIC: u32 = 2049;

/// IDX файл: имя, magic, количество записей и размерности одной записи.
const IDX_FILES: [(&str, u32, usize, &[usize]); 4] = [
    (TRAIN_IMAGES, IMAGES_MAGIC, TRAIN_LEN, &[MNIST_SIDE, MNIST_SIDE]),
    (TRAIN_LABELS, LABELS_MAGIC, TRAIN_LEN, &[]),
    (TEST_IMAGES, IMAGES_MAGIC, TEST_LEN, &[MNIST_SIDE, MNIST_SIDE]),
    (TEST_LABELS, LABELS_MAGIC, TEST_LEN, &[]),
];

/// Проверяет заголовок и размер IDX файла до передачи его в `mnist`,
/// который паникует на некорректных данных.
fn check_idx_file(path: &Path, magic: u32, count: usize, item_dims: &[usize]) -> Result<()> {
    let invalid = |message: String| DataError::Mnist {
        path: path.to_path_buf(),
        message,
    };

    let header_len = 8 + 4 * item_dims.len();
    let mut file = File::open(path)?;
    let mut header = vec![0u8; header_len];
    file.read_exact(&mut header)
        .map_err(|_| invalid(format!("файл короче заголовка в {} байт", header_len)))?;

    let field = |i: usize| {
        u32::from_be_bytes([header[4 * i], header[4 * i + 1], header[4 * i + 2], header[4 * i + 3]])
    };
    if field(0) != magic {
        return Err(invalid(format!("magic {}, ожидался {}", field(0), magic)));
    }
    if field(1) as usize != count {
        return Err(invalid(format!("{} записей, ожидалось {}", field(1), count)));
    }
    for (k, &dim) in item_dims.iter().enumerate() {
        if field(2 + k) as usize != dim {
            return Err(invalid(format!(
                "размерность {} равна {}, ожидалось {}",
                k + 1,
                field(2 + k),
                dim
            )));
        }
    }

    let expected = (header_len + count * item_dims.iter().product::<usize>()) as u64;
    let actual = file.metadata()?.len();
    if actual != expected {
        return Err(invalid(format!("размер {} байт, ожидалось {}", actual, expected)));
    }
    Ok(())
}

/// Набор цифр в памяти: изображения `[n, 28, 28]` и метки 0-9.
#[derive(Debug, Clone)]
pub struct MnistDigits {
    images: Array3<u8>,
    labels: Vec<u8>,
}

impl MnistDigits {
    /// Создает набор из готовых массивов.
    pub fn new(images: Array3<u8>, labels: Vec<u8>) -> Result<Self> {
        let (n, h, w) = images.dim();
        if h != MNIST_SIDE || w != MNIST_SIDE {
            return Err(DataError::InvalidConfig(format!(
                "ожидались цифры {}x{}, получено {}x{}",
                MNIST_SIDE, MNIST_SIDE, h, w
            )));
        }
        if n != labels.len() {
            return Err(DataError::InvalidConfig(format!(
                "{} изображений, но {} меток",
                n,
                labels.len()
            )));
        }
        Ok(Self { images, labels })
    }

    /// Читает обучающую и тестовую части MNIST из IDX файлов в `dir`.
    ///
    /// С фичей `download` недостающие архивы предварительно скачиваются.
    pub fn load<P: AsRef<Path>>(dir: P) -> Result<(Self, Self)> {
        let dir = dir.as_ref();
        let base_path = dir.to_string_lossy().into_owned();

        let mut builder = MnistBuilder::new();
        builder
            .label_format_digit()
            .base_path(&base_path)
            .training_set_length(TRAIN_LEN as u32)
            .validation_set_length(0)
            .test_set_length(TEST_LEN as u32);

        for (name, magic, count, dims) in IDX_FILES {
            let path = dir.join(name);
            if path.exists() {
                check_idx_file(&path, magic, count, dims)?;
            } else if !cfg!(feature = "download") {
                return Err(DataError::FileNotFound(path));
            }
        }

        let Mnist {
            trn_img,
            trn_lbl,
            tst_img,
            tst_lbl,
            ..
        } = finalize(builder, dir)?;

        let train = Self::new(
            Array3::from_shape_vec((TRAIN_LEN, MNIST_SIDE, MNIST_SIDE), trn_img)?,
            trn_lbl,
        )?;
        let test = Self::new(
            Array3::from_shape_vec((TEST_LEN, MNIST_SIDE, MNIST_SIDE), tst_img)?,
            tst_lbl,
        )?;
        info!(
            "MNIST загружен из {}: {} обучающих, {} тестовых цифр",
            dir.display(),
            train.len(),
            test.len()
        );

        Ok((train, test))
    }

    /// Объединение обучающей и тестовой частей (70 000 цифр).
    pub fn load_all<P: AsRef<Path>>(dir: P) -> Result<ConcatDataset<Self>> {
        let (train, test) = Self::load(dir)?;
        Ok(ConcatDataset::new(vec![train, test]))
    }

    /// Метки всех цифр.
    pub fn labels(&self) -> &[u8] {
        &self.labels
    }
}

#[cfg(not(feature = "download"))]
fn finalize(builder: MnistBuilder<'_>, _dir: &Path) -> Result<Mnist> {
    Ok(builder.finalize())
}

/// Скачивание происходит внутри `finalize`, ошибки сети в `mnist` - паники.
#[cfg(feature = "download")]
fn finalize(mut builder: MnistBuilder<'_>, dir: &Path) -> Result<Mnist> {
    builder.download_and_extract();
    std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| builder.finalize())).map_err(|_| {
        DataError::Mnist {
            path: dir.to_path_buf(),
            message: "не удалось скачать или прочитать архивы".to_string(),
        }
    })
}

impl Dataset for MnistDigits {
    type Item = Array2<u8>;
    type Label = u8;

    fn len(&self) -> usize {
        self.labels.len()
    }

    fn get(&self, index: usize) -> Option<(Self::Item, Self::Label)> {
        let label = *self.labels.get(index)?;
        let image = self.images.index_axis(Axis(0), index).to_owned();
        Some((image, label))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_digits_dataset() {
        let images = Array3::from_shape_fn((3, 28, 28), |(i, _, _)| i as u8);
        let digits = MnistDigits::new(images, vec![4, 9, 1]).unwrap();

        assert_eq!(digits.len(), 3);
        let (image, label) = digits.get(1).unwrap();
        assert_eq!(label, 9);
        assert_eq!(image.dim(), (28, 28));
        assert_eq!(image[[5, 5]], 1);
        assert!(digits.get(3).is_none());
    }

    #[test]
    fn test_shape_validation() {
        let images = Array3::zeros((2, 27, 28));
        assert!(MnistDigits::new(images, vec![0, 1]).is_err());

        let images = Array3::zeros((2, 28, 28));
        assert!(MnistDigits::new(images, vec![0]).is_err());
    }

    #[test]
    #[cfg(not(feature = "download"))]
    fn test_load_missing_files() {
        let dir = tempfile::tempdir().unwrap();
        let result = MnistDigits::load(dir.path());
        assert!(matches!(result, Err(DataError::FileNotFound(_))));
    }

    fn idx_header(magic: u32, fields: &[u32]) -> Vec<u8> {
        std::iter::once(magic)
            .chain(fields.iter().copied())
            .flat_map(u32::to_be_bytes)
            .collect()
    }

    #[test]
    fn test_load_garbage_files() {
        let dir = tempfile::tempdir().unwrap();
        for (name, _, _, _) in IDX_FILES {
            std::fs::write(dir.path().join(name), b"not an idx file").unwrap();
        }

        let result = MnistDigits::load(dir.path());
        assert!(matches!(result, Err(DataError::Mnist { .. })));
    }

    #[test]
    fn test_idx_header_checks() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("labels");

        // Верный заголовок, но файл обрезан
        std::fs::write(&path, idx_header(LABELS_MAGIC, &[3])).unwrap();
        assert!(matches!(
            check_idx_file(&path, LABELS_MAGIC, 3, &[]),
            Err(DataError::Mnist { .. })
        ));

        let mut full = idx_header(LABELS_MAGIC, &[3]);
        full.extend_from_slice(&[1, 2, 3]);
        std::fs::write(&path, &full).unwrap();
        assert!(check_idx_file(&path, LABELS_MAGIC, 3, &[]).is_ok());
        assert!(check_idx_file(&path, LABELS_MAGIC, 4, &[]).is_err());
        assert!(check_idx_file(&path, IMAGES_MAGIC, 3, &[]).is_err());

        let images = dir.path().join("images");
        let mut data = idx_header(IMAGES_MAGIC, &[1, 28, 27]);
        data.resize(data.len() + 28 * 27, 0);
        std::fs::write(&images, &data).unwrap();
        assert!(check_idx_file(&images, IMAGES_MAGIC, 1, &[28, 28]).is_err());
    }
}
