// --- Файл: src/data/crop.rs ---

//! Вырезка патчей 27x27 вокруг центров ядер.

use super::detections::Detection;
use crate::error::{DataError, Result};
use ndarray::{s, Array3, Axis};
use rand::Rng;
use rand_distr::StandardNormal;
use std::ops::Range;
use std::path::Path;

/// Сторона патча.
pub const CROP_SIZE: usize = 27;

/// Отступ от центра до левой (верхней) границы окна.
const CROP_OFFSET: i64 = 13;

/// Стандартное отклонение случайного сдвига центра при аугментации.
const JITTER_STD: f64 = 3.0;

/// Окно вырезки вдоль одной оси длины `extent`.
///
/// Окно прижимается к краю, если центр ближе 13 пикселей к началу
/// или ближе 14 пикселей к концу оси.
pub fn crop_window(center: i64, extent: usize) -> Range<usize> {
    let size = CROP_SIZE as i64;
    let extent = extent as i64;
    let (start, end) = if center < CROP_OFFSET {
        (0, size)
    } else if center > extent - (size - CROP_OFFSET) {
        (extent - size, extent)
    } else {
        (center - CROP_OFFSET, center + size - CROP_OFFSET)
    };
    start.max(0) as usize..end.max(0) as usize
}

/// Загружает изображение как HWC RGB массив со значениями `[0, 255]`.
///
/// Прозрачность накладывается на белый фон.
pub fn load_rgb(path: &Path) -> Result<Array3<f32>> {
    if !path.exists() {
        return Err(DataError::FileNotFound(path.to_path_buf()));
    }
    let img = image::open(path)?;
    let (w, h) = (img.width() as usize, img.height() as usize);

    if img.color().has_alpha() {
        let rgba = Array3::from_shape_vec((h, w, 4), img.to_rgba8().into_raw())?;
        Ok(Array3::from_shape_fn((h, w, 3), |(y, x, c)| {
            let alpha = f32::from(rgba[[y, x, 3]]) / 255.0;
            f32::from(rgba[[y, x, c]]) * alpha + 255.0 * (1.0 - alpha)
        }))
    } else {
        let rgb = Array3::from_shape_vec((h, w, 3), img.to_rgb8().into_raw())?;
        Ok(rgb.mapv(f32::from))
    }
}

/// Добавляет к изображению два канала: номер столбца и номер строки пикселя.
pub fn with_location_channels(image: Array3<f32>) -> Array3<f32> {
    let (h, w, _) = image.dim();
    let location = Array3::from_shape_fn((h, w, 2), |(y, x, c)| if c == 0 { x as f32 } else { y as f32 });
    // Оба массива имеют одинаковые H и W
    let joined = ndarray::concatenate(Axis(2), &[image.view(), location.view()]);
    joined.unwrap_or(image)
}

/// Вырезает патчи вокруг всех детекций.
///
/// Координаты округляются; при переданном `jitter` к каждой добавляется
/// округленный сдвиг из N(0, 3).
pub fn crop_cells<R: Rng + ?Sized>(
    image: &Array3<f32>,
    detections: &[Detection],
    mut jitter: Option<&mut R>,
) -> Result<Vec<Array3<f32>>> {
    let (height, width, _) = image.dim();
    if height < CROP_SIZE || width < CROP_SIZE {
        return Err(DataError::ImageTooSmall {
            width,
            height,
            window: CROP_SIZE,
        });
    }

    let mut crops = Vec::with_capacity(detections.len());
    for &(x, y) in detections {
        let mut x = x.round();
        let mut y = y.round();
        if let Some(rng) = jitter.as_deref_mut() {
            let dx: f64 = rng.sample(StandardNormal);
            let dy: f64 = rng.sample(StandardNormal);
            x += (dx * JITTER_STD).round();
            y += (dy * JITTER_STD).round();
        }

        let cols = crop_window(x as i64, width);
        let rows = crop_window(y as i64, height);
        crops.push(image.slice(s![rows, cols, ..]).to_owned());
    }
    Ok(crops)
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    #[test]
    fn test_crop_window_interior() {
        assert_eq!(crop_window(100, 500), 87..114);
        assert_eq!(crop_window(13, 500), 0..27);
        assert_eq!(crop_window(486, 500), 473..500);
    }

    #[test]
    fn test_crop_window_clamped() {
        assert_eq!(crop_window(12, 500), 0..27);
        assert_eq!(crop_window(-5, 500), 0..27);
        assert_eq!(crop_window(487, 500), 473..500);
        assert_eq!(crop_window(900, 500), 473..500);
    }

    #[test]
    fn test_crop_cells_content() {
        let image = Array3::from_shape_fn((60, 80, 3), |(y, x, c)| (y * 1000 + x * 10 + c) as f32);
        let crops = crop_cells::<StdRng>(&image, &[(40.2, 30.0), (0.0, 59.0)], None).unwrap();

        assert_eq!(crops.len(), 2);
        assert_eq!(crops[0].dim(), (27, 27, 3));
        // Левый верхний пиксель первого окна: строка 17, столбец 27
        assert_eq!(crops[0][[0, 0, 0]], image[[17, 27, 0]]);
        // Второе окно прижато к левому нижнему углу
        assert_eq!(crops[1][[26, 0, 1]], image[[59, 0, 1]]);
    }

    #[test]
    fn test_crop_cells_jitter_stays_inside() {
        let image = Array3::zeros((30, 30, 3));
        let mut rng = StdRng::seed_from_u64(5);
        let detections = vec![(0.0, 0.0), (29.0, 29.0), (15.0, 15.0)];

        for _ in 0..20 {
            let crops = crop_cells(&image, &detections, Some(&mut rng)).unwrap();
            assert!(crops.iter().all(|c| c.dim() == (27, 27, 3)));
        }
    }

    #[test]
    fn test_image_too_small() {
        let image = Array3::zeros((20, 30, 3));
        let result = crop_cells::<StdRng>(&image, &[(5.0, 5.0)], None);
        assert!(matches!(result, Err(DataError::ImageTooSmall { .. })));
    }

    #[test]
    fn test_location_channels() {
        let image = Array3::zeros((4, 5, 3));
        let with_loc = with_location_channels(image);

        assert_eq!(with_loc.dim(), (4, 5, 5));
        assert_eq!(with_loc[[2, 3, 3]], 3.0);
        assert_eq!(with_loc[[2, 3, 4]], 2.0);
    }
}
