// --- Файл: src/error.rs ---

//! Общий тип ошибок загрузчиков данных.

use std::path::PathBuf;
use thiserror::Error;

/// Ошибки, возникающие при построении и чтении датасетов из мешков.
#[derive(Error, Debug)]
pub enum DataError {
    #[error("Ошибка ввода/вывода: {0}")]
    Io(#[from] std::io::Error),

    #[error("Ошибка чтения изображения: {0}")]
    Image(#[from] image::ImageError),

    #[error("Ошибка чтения CSV: {0}")]
    Csv(#[from] csv::Error),

    #[error("Ошибка чтения MAT-файла {path}: {message}")]
    Mat { path: PathBuf, message: String },

    #[error("Некорректный IDX файл MNIST {path}: {message}")]
    Mnist { path: PathBuf, message: String },

    #[error("Ошибка JSON: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Ошибка TOML: {0}")]
    Toml(#[from] toml::de::Error),

    #[error("Ошибка SafeTensors: {0}")]
    SafeTensors(#[from] safetensors::SafeTensorError),

    #[error("Ошибка формы массива: {0}")]
    Shape(#[from] ndarray::ShapeError),

    #[error("Файл не найден: {0}")]
    FileNotFound(PathBuf),

    #[error("Некорректные координаты детекций в {path}: {reason}")]
    InvalidDetections { path: PathBuf, reason: String },

    #[error("Некорректная конфигурация: {0}")]
    InvalidConfig(String),

    #[error("Индекс {index} вне диапазона: найдено {len} директорий с изображениями")]
    IndexOutOfRange { index: usize, len: usize },

    #[error("Изображение {width}x{height} меньше окна вырезки {window}x{window}")]
    ImageTooSmall {
        width: usize,
        height: usize,
        window: usize,
    },

    #[error("Пул образцов пуст: {0}")]
    EmptyPool(String),

    #[error("Неизвестный тип ядра '{0}', ожидается epithelial, inflammatory, fibroblast или others")]
    UnknownNucleusType(String),

    #[error("Экспорт поврежден: {0}")]
    CorruptExport(String),
}

/// Результат операций загрузки данных.
pub type Result<T> = std::result::Result<T, DataError>;
