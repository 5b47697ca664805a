use image::{GrayImage, RgbImage};
use rayon::prelude::*;
use rayon::ThreadPool;

/// Rec. 601 luma in fixed point, rounded: (299 R + 587 G + 114 B) / 1000.
#[inline]
pub fn luma(r: u8, g: u8, b: u8) -> u8 {
    ((299 * r as u32 + 587 * g as u32 + 114 * b as u32 + 500) / 1000) as u8
}

pub fn convert_rgb_to_gray(rgb: &RgbImage) -> GrayImage {
    convert_rgb_to_gray_in_pool(rgb, None)
}

pub fn convert_rgb_to_gray_in_pool(rgb: &RgbImage, pool: Option<&ThreadPool>) -> GrayImage {
    let run = || {
        let (w, h) = rgb.dimensions();
        let mut gray = GrayImage::new(w, h);
        if w == 0 || h == 0 {
            return gray;
        }

        gray.par_chunks_mut(w as usize)
            .zip(rgb.as_raw().par_chunks(w as usize * 3))
            .for_each(|(g_row, rgb_row)| {
                for (g, px) in g_row.iter_mut().zip(rgb_row.chunks_exact(3)) {
                    *g = luma(px[0], px[1], px[2]);
                }
            });

        gray
    };

    if let Some(p) = pool {
        p.install(run)
    } else {
        run()
    }
}

pub fn to_gray(img: &RgbImage) -> GrayImage {
    convert_rgb_to_gray(img)
}
