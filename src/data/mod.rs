// --- Файл: src/data/mod.rs ---

//! # Загрузка данных для обучения с множественными экземплярами
//!
//! Датасеты, где каждый элемент - мешок экземпляров с одной меткой:
//! мешок положителен, если положителен хотя бы один экземпляр.
//!
//! ## Основные компоненты
//!
//! - [`Dataset`], [`DataLoader`], [`Sampler`]: протокол доступа и батчинга
//! - [`Transform`]: преобразования изображений (нормализация, аугментации)
//! - [`MnistBags`]: синтетические мешки из цифр MNIST
//! - [`ColonCancerBags`]: мешки патчей ядер из гистологических изображений
//!
//! ## Пример
//!
//! ```ignore
//! use rustymil::data::{DataLoader, MnistBags, MnistBagsConfig, MnistDigits};
//!
//! let digits = MnistDigits::load_all("data/mnist")?;
//! let bags = MnistBags::new(&digits, MnistBagsConfig::default())?;
//!
//! let loader = DataLoader::new(bags, 1).shuffle(true);
//! for batch in loader.iter() {
//!     let (sample, label) = (&batch.items[0], &batch.labels[0]);
//!     // sample.bag: [n, 3, 28, 28], label: [1]
//! }
//! ```
//!
//! ## Состав
//!
//! ### Датасеты
//! - [`MnistDigits`]: исходные цифры в памяти
//! - [`ConcatDataset`], [`SubsetDataset`]: объединение и подвыборка
//!
//! ### Семплеры
//! - [`SequentialSampler`], [`RandomSampler`], [`BatchSampler`]
//!
//! ### Преобразования
//! - [`ToTensor`], [`Normalize`], [`GrayToRgb`]
//! - [`RandomHEStain`], [`HistoNormalize`]: работа с окраской H&E
//! - [`RandomRotate`], [`RandomHorizontalFlip`], [`RandomVerticalFlip`]

pub mod bag;
pub mod colon;
pub mod crop;
pub mod dataloader;
pub mod dataset;
pub mod detections;
pub mod kfold;
pub mod mnist;
pub mod mnist_bags;
pub mod sampler;
pub mod stain;
pub mod transforms;

pub use bag::{bag_label, stack_instances, BagLabel, BagSample, BagStats, MilDataset};
pub use colon::{split_dir_list, ColonBagsConfig, ColonCancerBags};
pub use crop::{crop_cells, crop_window, load_rgb, with_location_channels, CROP_SIZE};
pub use dataloader::{Batch, DataLoader, DataLoaderBuilder};
pub use dataset::{ConcatDataset, Dataset, SubsetDataset};
pub use detections::{load_detections, Detection, NucleusType};
pub use kfold::{Fold, KFold};
pub use mnist::{MnistDigits, MNIST_SIDE};
pub use mnist_bags::{MnistBags, MnistBagsConfig};
pub use sampler::{BatchSampler, RandomSampler, Sampler, SequentialSampler};
pub use stain::{HistoNormalize, RandomHEStain};
pub use transforms::{
    Compose, GrayToRgb, Image, Normalize, RandomHorizontalFlip, RandomRotate, RandomVerticalFlip,
    ToTensor, Transform,
};
