// --- Файл: src/serialization/safetensors_io.rs ---

//! Чтение и запись тензоров в формате SafeTensors.
//!
//! Поддерживаются два типа данных, которые нужны для мешков:
//! `f32` для экземпляров и `i64` для меток.

use crate::error::{DataError, Result};
use ndarray::{ArrayD, IxDyn};
use safetensors::serialize_to_file;
use safetensors::tensor::{SafeTensors, TensorView};
use safetensors::Dtype;
use std::collections::HashMap;
use std::fs;
use std::path::Path;

/// Тензор одного из поддерживаемых типов.
#[derive(Debug, Clone, PartialEq)]
pub enum TensorData {
    F32(ArrayD<f32>),
    I64(ArrayD<i64>),
}

impl TensorData {
    pub fn shape(&self) -> &[usize] {
        match self {
            TensorData::F32(arr) => arr.shape(),
            TensorData::I64(arr) => arr.shape(),
        }
    }

    fn dtype(&self) -> Dtype {
        match self {
            TensorData::F32(_) => Dtype::F32,
            TensorData::I64(_) => Dtype::I64,
        }
    }

    fn to_le_bytes(&self) -> Vec<u8> {
        match self {
            TensorData::F32(arr) => arr.iter().flat_map(|&x| x.to_le_bytes()).collect(),
            TensorData::I64(arr) => arr.iter().flat_map(|&x| x.to_le_bytes()).collect(),
        }
    }
}

/// Сохраняет именованные тензоры в файл SafeTensors.
///
/// # Пример
///
/// ```rust,ignore
/// use ndarray::{ArrayD, IxDyn};
/// use rustymil::serialization::{save_tensors, TensorData};
///
/// let tensors = vec![("bag_0".to_string(), TensorData::F32(ArrayD::zeros(IxDyn(&[2, 3, 27, 27]))))];
/// save_tensors("bags.safetensors", &tensors)?;
/// ```
pub fn save_tensors<P: AsRef<Path>>(path: P, tensors: &[(String, TensorData)]) -> Result<()> {
    // Сначала конвертируем все данные в байты, затем создаем TensorView на них
    let data_storage: Vec<Vec<u8>> = tensors.iter().map(|(_, t)| t.to_le_bytes()).collect();

    let mut tensor_views: Vec<(&str, TensorView<'_>)> = Vec::with_capacity(tensors.len());
    for ((name, tensor), data) in tensors.iter().zip(&data_storage) {
        tensor_views.push((
            name.as_str(),
            TensorView::new(tensor.dtype(), tensor.shape().to_vec(), data)?,
        ));
    }

    serialize_to_file(tensor_views, &None, path.as_ref())?;
    Ok(())
}

/// Загружает все тензоры из файла SafeTensors.
pub fn load_tensors<P: AsRef<Path>>(path: P) -> Result<HashMap<String, TensorData>> {
    let path = path.as_ref();
    if !path.exists() {
        return Err(DataError::FileNotFound(path.to_path_buf()));
    }
    let buffer = fs::read(path)?;
    let tensors = SafeTensors::deserialize(&buffer)?;

    let mut result = HashMap::new();
    for (name, tensor) in tensors.tensors() {
        let shape = IxDyn(tensor.shape());
        let data = tensor.data();

        let value = match tensor.dtype() {
            Dtype::F32 => {
                let floats: Vec<f32> = data
                    .chunks_exact(4)
                    .map(|chunk| f32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]))
                    .collect();
                TensorData::F32(ArrayD::from_shape_vec(shape, floats)?)
            }
            Dtype::I64 => {
                let ints: Vec<i64> = data
                    .chunks_exact(8)
                    .map(|chunk| {
                        i64::from_le_bytes([
                            chunk[0], chunk[1], chunk[2], chunk[3], chunk[4], chunk[5], chunk[6],
                            chunk[7],
                        ])
                    })
                    .collect();
                TensorData::I64(ArrayD::from_shape_vec(shape, ints)?)
            }
            other => {
                return Err(DataError::CorruptExport(format!(
                    "тензор '{}' имеет неподдерживаемый тип {:?}",
                    name, other
                )));
            }
        };
        result.insert(name, value);
    }

    Ok(result)
}

/// Возвращает список имен тензоров в файле SafeTensors.
pub fn list_tensors<P: AsRef<Path>>(path: P) -> Result<Vec<String>> {
    let buffer = fs::read(path)?;
    let tensors = SafeTensors::deserialize(&buffer)?;
    let mut names: Vec<String> = tensors.names().iter().map(|s| s.to_string()).collect();
    names.sort();
    Ok(names)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_save_load_tensors() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("test.safetensors");

        let bag = ArrayD::from_shape_vec(IxDyn(&[2, 3]), vec![1.0, 2.0, 3.0, 4.0, 5.0, 6.0]).unwrap();
        let label = ArrayD::from_shape_vec(IxDyn(&[1]), vec![1i64]).unwrap();
        let tensors = vec![
            ("bag_0".to_string(), TensorData::F32(bag.clone())),
            ("label_0".to_string(), TensorData::I64(label.clone())),
        ];

        save_tensors(&path, &tensors).unwrap();
        let loaded = load_tensors(&path).unwrap();

        assert_eq!(loaded.len(), 2);
        assert_eq!(loaded["bag_0"], TensorData::F32(bag));
        assert_eq!(loaded["label_0"], TensorData::I64(label));
        assert_eq!(list_tensors(&path).unwrap(), vec!["bag_0", "label_0"]);
    }

    #[test]
    fn test_empty_tensor() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("empty.safetensors");

        let empty = TensorData::F32(ArrayD::zeros(IxDyn(&[0, 3, 27, 27])));
        save_tensors(&path, &[("bag_0".to_string(), empty.clone())]).unwrap();

        let loaded = load_tensors(&path).unwrap();
        assert_eq!(loaded["bag_0"].shape(), &[0, 3, 27, 27]);
    }
}
