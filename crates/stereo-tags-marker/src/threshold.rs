//! Global binarization threshold.

use stereo_tags_core::GrayImageView;

/// Otsu threshold of the image histogram.
///
/// Pixels `<= threshold` form the dark class. Images with at most two
/// distinct gray levels split halfway between them.
pub(crate) fn otsu_threshold(image: &GrayImageView<'_>) -> u8 {
    let mut hist = [0u32; 256];
    for &v in image.data {
        hist[v as usize] += 1;
    }
    otsu_from_histogram(&hist)
}

fn otsu_from_histogram(hist: &[u32; 256]) -> u8 {
    let occupied: Vec<usize> = (0..256).filter(|&i| hist[i] > 0).collect();
    let (Some(&min_v), Some(&max_v)) = (occupied.first(), occupied.last()) else {
        return 127;
    };
    if occupied.len() <= 2 {
        return ((min_v + max_v) / 2) as u8;
    }

    let total: f64 = hist.iter().map(|&h| h as f64).sum();
    let sum_total: f64 = hist
        .iter()
        .enumerate()
        .map(|(i, &h)| i as f64 * h as f64)
        .sum();

    let mut sum_b = 0f64;
    let mut w_b = 0f64;
    let mut best_var = -1f64;
    let mut best_t = 127u8;

    for (t, &h) in hist.iter().enumerate() {
        w_b += h as f64;
        if w_b < 1.0 {
            continue;
        }
        let w_f = total - w_b;
        if w_f < 1.0 {
            break;
        }

        sum_b += t as f64 * h as f64;
        let m_b = sum_b / w_b;
        let m_f = (sum_total - sum_b) / w_f;

        let var_between = w_b * w_f * (m_b - m_f) * (m_b - m_f);
        if var_between > best_var {
            best_var = var_between;
            best_t = t as u8;
        }
    }

    best_t
}

#[cfg(test)]
mod tests {
    use super::*;
    use stereo_tags_core::GrayImage;

    #[test]
    fn bimodal_image_splits_between_modes() {
        let mut data = vec![40u8; 50];
        data.extend(vec![45u8; 50]);
        data.extend(vec![200u8; 100]);
        let img = GrayImage::from_raw(20, 10, data).expect("buffer");
        let t = otsu_threshold(&img.view());
        assert!((45..200).contains(&t), "threshold {t}");
    }

    #[test]
    fn two_levels_split_halfway() {
        let img = GrayImage::from_raw(2, 1, vec![0, 255]).expect("buffer");
        assert_eq!(otsu_threshold(&img.view()), 127);
    }
}
