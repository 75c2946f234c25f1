// --- Файл: src/data/stain.rs ---

//! Цветовые преобразования для гистологических срезов H&E.
//!
//! - [`RandomHEStain`]: случайное возмущение концентраций гематоксилина и эозина
//! - [`HistoNormalize`]: нормализация окраски методом Macenko
//!
//! Оба преобразования работают с HWC изображением со значениями `[0, 255]`
//! и используют только первые три канала.

use super::transforms::{Image, Transform, TransformRng};
use log::debug;
use ndarray::Axis;
use rand_distr::{Distribution, StandardNormal};
use std::sync::LazyLock;

type Mat3 = [[f64; 3]; 3];

/// Векторы окраски H, E и DAB в пространстве RGB (по строкам).
const RGB_FROM_HED: Mat3 = [[0.65, 0.70, 0.29], [0.07, 0.99, 0.11], [0.27, 0.57, 0.78]];

/// Обратная к [`RGB_FROM_HED`], считается один раз.
static HED_FROM_RGB: LazyLock<Mat3> =
    LazyLock::new(|| invert3(&RGB_FROM_HED).unwrap_or(RGB_FROM_HED));

/// Нижняя граница интенсивности перед логарифмом.
const LOG_FLOOR: f64 = 1e-6;

/// Перевод RGB пикселя `[0, 1]` в концентрации HED.
pub fn rgb_to_hed(rgb: [f64; 3]) -> [f64; 3] {
    let log_adjust = LOG_FLOOR.ln();
    let od = rgb.map(|v| v.max(LOG_FLOOR).ln() / log_adjust);
    row_times(&od, &HED_FROM_RGB).map(|v| v.max(0.0))
}

/// Обратный перевод концентраций HED в RGB `[0, 1]`.
pub fn hed_to_rgb(hed: [f64; 3]) -> [f64; 3] {
    let log_adjust = -LOG_FLOOR.ln();
    let scaled = hed.map(|v| v * log_adjust);
    row_times(&scaled, &RGB_FROM_HED).map(|v| (-v).exp().clamp(0.0, 1.0))
}

/// Случайное возмущение окраски в пространстве HED.
///
/// Каналы H и E умножаются на множители из N(1, sigma).
pub struct RandomHEStain {
    sigma: f64,
    rng: TransformRng,
}

impl RandomHEStain {
    /// Возмущение со стандартным отклонением 0.025.
    pub fn new() -> Self {
        Self::with_sigma(0.025)
    }

    /// Возмущение с заданным стандартным отклонением множителей.
    ///
    /// Некорректная sigma (отрицательная или NaN) заменяется нулем.
    pub fn with_sigma(sigma: f64) -> Self {
        let sigma = if sigma.is_finite() { sigma.max(0.0) } else { 0.0 };
        Self {
            sigma,
            rng: TransformRng::new(None),
        }
    }

    /// Устанавливает seed для воспроизводимости.
    pub fn with_seed(mut self, seed: u64) -> Self {
        self.rng = TransformRng::new(Some(seed));
        self
    }
}

impl Default for RandomHEStain {
    fn default() -> Self {
        Self::new()
    }
}

impl Transform for RandomHEStain {
    fn apply(&self, mut image: Image) -> Image {
        if image.dim().2 < 3 {
            return image;
        }
        let (h_factor, e_factor) = self.rng.with(|rng| {
            let h: f64 = StandardNormal.sample(rng);
            let e: f64 = StandardNormal.sample(rng);
            (1.0 + self.sigma * h, 1.0 + self.sigma * e)
        });

        for mut pixel in image.lanes_mut(Axis(2)) {
            let rgb = [pixel[0], pixel[1], pixel[2]].map(|v| f64::from(v) / 255.0);
            let mut hed = rgb_to_hed(rgb);
            hed[0] *= h_factor;
            hed[1] *= e_factor;
            let out = hed_to_rgb(hed);
            for c in 0..3 {
                pixel[c] = (out[c] * 255.0).round() as f32;
            }
        }
        image
    }
}

/// Нормализация окраски H&E методом Macenko.
///
/// Если на патче меньше двух пикселей ткани или оценка матрицы окраски
/// вырождена, изображение возвращается без изменений.
pub struct HistoNormalize {
    /// Интенсивность проходящего света
    io: f64,
    /// Процентиль для крайних углов
    alpha: f64,
    /// Порог оптической плотности для пикселей ткани
    beta: f64,
    he_ref: [[f64; 2]; 3],
    max_c_ref: [f64; 2],
}

impl HistoNormalize {
    pub fn new() -> Self {
        Self {
            io: 240.0,
            alpha: 1.0,
            beta: 0.15,
            he_ref: [[0.5626, 0.2159], [0.7201, 0.8012], [0.4062, 0.5581]],
            max_c_ref: [1.9705, 1.0308],
        }
    }

    /// Нормализует набор RGB пикселей. `None`, если оценка невозможна.
    fn normalize_pixels(&self, pixels: &[[f64; 3]]) -> Option<Vec<[f64; 3]>> {
        let od: Vec<[f64; 3]> = pixels
            .iter()
            .map(|p| p.map(|v| -((v + 1.0) / self.io).ln()))
            .collect();

        let tissue: Vec<[f64; 3]> = od
            .iter()
            .filter(|p| p.iter().all(|&v| v >= self.beta))
            .copied()
            .collect();
        if tissue.len() < 2 {
            return None;
        }

        let (_, vectors) = symmetric_eigen(covariance(&tissue));
        // Плоскость двух старших собственных векторов
        let e1 = column(&vectors, 1);
        let e2 = column(&vectors, 2);

        let mut phi: Vec<f64> = tissue
            .iter()
            .map(|p| dot(p, &e2).atan2(dot(p, &e1)))
            .collect();
        phi.sort_by(f64::total_cmp);
        let min_phi = percentile_sorted(&phi, self.alpha);
        let max_phi = percentile_sorted(&phi, 100.0 - self.alpha);

        let direction = |angle: f64| -> [f64; 3] {
            std::array::from_fn(|i| e1[i] * angle.cos() + e2[i] * angle.sin())
        };
        let v_min = direction(min_phi);
        let v_max = direction(max_phi);
        let (h_vec, e_vec) = if v_min[0] > v_max[0] {
            (v_min, v_max)
        } else {
            (v_max, v_min)
        };

        // Наименьшие квадраты через нормальные уравнения 2x2
        let g00 = dot(&h_vec, &h_vec);
        let g01 = dot(&h_vec, &e_vec);
        let g11 = dot(&e_vec, &e_vec);
        let det = g00 * g11 - g01 * g01;
        if det.abs() < 1e-12 {
            return None;
        }

        let concentrations: Vec<[f64; 2]> = od
            .iter()
            .map(|p| {
                let b0 = dot(&h_vec, p);
                let b1 = dot(&e_vec, p);
                [(g11 * b0 - g01 * b1) / det, (g00 * b1 - g01 * b0) / det]
            })
            .collect();

        let mut max_c = [0.0; 2];
        for (k, slot) in max_c.iter_mut().enumerate() {
            let mut values: Vec<f64> = concentrations.iter().map(|c| c[k]).collect();
            values.sort_by(f64::total_cmp);
            *slot = percentile_sorted(&values, 99.0);
        }
        if max_c.iter().any(|&m| !m.is_finite() || m.abs() < 1e-12) {
            return None;
        }
        let scale = [
            max_c[0] / self.max_c_ref[0],
            max_c[1] / self.max_c_ref[1],
        ];

        let normalized = concentrations
            .iter()
            .map(|c| {
                let c = [c[0] / scale[0], c[1] / scale[1]];
                std::array::from_fn(|i| {
                    let v = self.io
                        * (-(self.he_ref[i][0] * c[0] + self.he_ref[i][1] * c[1])).exp();
                    if v > 255.0 {
                        254.0
                    } else {
                        v.floor()
                    }
                })
            })
            .collect();
        Some(normalized)
    }
}

impl Default for HistoNormalize {
    fn default() -> Self {
        Self::new()
    }
}

impl Transform for HistoNormalize {
    fn apply(&self, mut image: Image) -> Image {
        if image.dim().2 < 3 {
            return image;
        }
        let pixels: Vec<[f64; 3]> = image
            .lanes(Axis(2))
            .into_iter()
            .map(|p| [p[0], p[1], p[2]].map(f64::from))
            .collect();

        let Some(normalized) = self.normalize_pixels(&pixels) else {
            debug!("Нормализация окраски пропущена: недостаточно пикселей ткани");
            return image;
        };

        for (mut pixel, value) in image.lanes_mut(Axis(2)).into_iter().zip(normalized) {
            for c in 0..3 {
                pixel[c] = value[c] as f32;
            }
        }
        image
    }
}

fn row_times(v: &[f64; 3], m: &Mat3) -> [f64; 3] {
    std::array::from_fn(|j| (0..3).map(|i| v[i] * m[i][j]).sum())
}

fn dot(a: &[f64; 3], b: &[f64; 3]) -> f64 {
    a.iter().zip(b).map(|(x, y)| x * y).sum()
}

fn column(m: &Mat3, j: usize) -> [f64; 3] {
    [m[0][j], m[1][j], m[2][j]]
}

fn invert3(m: &Mat3) -> Option<Mat3> {
    let cofactor = |r: usize, c: usize| {
        let (r0, r1) = ((r + 1) % 3, (r + 2) % 3);
        let (c0, c1) = ((c + 1) % 3, (c + 2) % 3);
        m[r0][c0] * m[r1][c1] - m[r0][c1] * m[r1][c0]
    };
    let det: f64 = (0..3).map(|c| m[0][c] * cofactor(0, c)).sum();
    if det.abs() < 1e-12 {
        return None;
    }
    // Обратная матрица = транспонированная матрица кофакторов / det
    Some(std::array::from_fn(|r| {
        std::array::from_fn(|c| cofactor(c, r) / det)
    }))
}

/// Выборочная ковариация (нормировка n - 1).
fn covariance(points: &[[f64; 3]]) -> Mat3 {
    let n = points.len() as f64;
    let mut mean = [0.0; 3];
    for p in points {
        for i in 0..3 {
            mean[i] += p[i] / n;
        }
    }
    let mut cov = [[0.0; 3]; 3];
    for p in points {
        for i in 0..3 {
            for j in 0..3 {
                cov[i][j] += (p[i] - mean[i]) * (p[j] - mean[j]);
            }
        }
    }
    let denom = (n - 1.0).max(1.0);
    cov.map(|row| row.map(|v| v / denom))
}

/// Собственные значения (по возрастанию) и векторы (по столбцам)
/// симметричной матрицы 3x3 методом Якоби.
///
/// Знак каждого вектора выбран так, чтобы сумма компонент была неотрицательной.
pub(crate) fn symmetric_eigen(mut a: Mat3) -> ([f64; 3], Mat3) {
    let mut v: Mat3 = [[1.0, 0.0, 0.0], [0.0, 1.0, 0.0], [0.0, 0.0, 1.0]];

    for _ in 0..64 {
        let off = a[0][1].powi(2) + a[0][2].powi(2) + a[1][2].powi(2);
        if off < 1e-24 {
            break;
        }
        for (p, q) in [(0, 1), (0, 2), (1, 2)] {
            if a[p][q].abs() < 1e-300 {
                continue;
            }
            let theta = (a[q][q] - a[p][p]) / (2.0 * a[p][q]);
            let t = theta.signum() / (theta.abs() + (theta * theta + 1.0).sqrt());
            let c = 1.0 / (t * t + 1.0).sqrt();
            let s = t * c;

            for row in a.iter_mut() {
                let (akp, akq) = (row[p], row[q]);
                row[p] = c * akp - s * akq;
                row[q] = s * akp + c * akq;
            }
            for k in 0..3 {
                let (apk, aqk) = (a[p][k], a[q][k]);
                a[p][k] = c * apk - s * aqk;
                a[q][k] = s * apk + c * aqk;
            }
            for row in v.iter_mut() {
                let (vkp, vkq) = (row[p], row[q]);
                row[p] = c * vkp - s * vkq;
                row[q] = s * vkp + c * vkq;
            }
        }
    }

    let mut order = [0usize, 1, 2];
    order.sort_by(|&i, &j| a[i][i].total_cmp(&a[j][j]));

    let values = order.map(|i| a[i][i]);
    let mut vectors = [[0.0; 3]; 3];
    for (dst, &src) in order.iter().enumerate() {
        let sign = if column(&v, src).iter().sum::<f64>() < 0.0 {
            -1.0
        } else {
            1.0
        };
        for (r, row) in vectors.iter_mut().enumerate() {
            row[dst] = sign * v[r][src];
        }
    }
    (values, vectors)
}

/// Процентиль отсортированного массива с линейной интерполяцией.
pub(crate) fn percentile_sorted(sorted: &[f64], q: f64) -> f64 {
    match sorted.len() {
        0 => f64::NAN,
        1 => sorted[0],
        n => {
            let rank = (q / 100.0).clamp(0.0, 1.0) * (n - 1) as f64;
            let lo = rank.floor() as usize;
            let hi = rank.ceil() as usize;
            sorted[lo] + (sorted[hi] - sorted[lo]) * (rank - lo as f64)
        }
    }
}
