// --- Файл: src/serialization/mod.rs ---

//! Сохранение мешков на диск для внешних фреймворков.
//!
//! - **SafeTensors**: тензоры мешков и меток
//! - **JSON**: манифест с длинами, метками и источником
//!
//! # Пример
//!
//! ```rust,ignore
//! use rustymil::serialization::{export_bags, load_exported};
//!
//! export_bags(&bags, "out/mnist_train", "mnist fold 0 train")?;
//! let restored = load_exported("out/mnist_train")?;
//! ```

pub mod export;
pub mod safetensors_io;

pub use export::{export_bags, load_exported, BagEntry, ExportManifest, ExportedBags};
pub use safetensors_io::{list_tensors, load_tensors, save_tensors, TensorData};
