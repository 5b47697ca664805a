use image::imageops::FilterType;
use image::GrayImage;
use rayon::prelude::*;

/// Halves both dimensions by averaging 2x2 blocks. A trailing odd row or
/// column is dropped.
pub fn downsample_2x(src: &GrayImage) -> GrayImage {
    let (w, h) = src.dimensions();
    let (nw, nh) = (w / 2, h / 2);
    let mut dst = GrayImage::new(nw, nh);
    if nw == 0 || nh == 0 {
        return dst;
    }

    let raw = src.as_raw();
    let stride = w as usize;
    dst.par_chunks_mut(nw as usize)
        .enumerate()
        .for_each(|(y, row)| {
            let r0 = 2 * y * stride;
            let r1 = r0 + stride;
            for (x, out) in row.iter_mut().enumerate() {
                let c = 2 * x;
                let sum = raw[r0 + c] as u32
                    + raw[r0 + c + 1] as u32
                    + raw[r1 + c] as u32
                    + raw[r1 + c + 1] as u32;
                *out = ((sum + 2) / 4) as u8;
            }
        });

    dst
}

/// Resamples to `1 / scale` of the original size with a triangle filter.
pub fn scale_down(src: &GrayImage, scale: f32) -> GrayImage {
    let new_width = (src.width() as f32 / scale).round().max(1.0) as u32;
    let new_height = (src.height() as f32 / scale).round().max(1.0) as u32;
    image::imageops::resize(src, new_width, new_height, FilterType::Triangle)
}

/// Nearest-neighbour resize, used for binary masks.
pub fn resize_nearest(src: &GrayImage, width: u32, height: u32) -> GrayImage {
    image::imageops::resize(src, width, height, FilterType::Nearest)
}

/// Successive 2x reductions until the larger side is at most `max_dim`.
/// Level 0 is the input itself.
pub fn build_pyramid(src: &GrayImage, max_dim: u32) -> Vec<GrayImage> {
    let mut levels = vec![src.clone()];
    loop {
        let Some(last) = levels.last() else { break };
        let (w, h) = last.dimensions();
        if w.max(h) <= max_dim.max(1) || w < 4 || h < 4 {
            break;
        }
        let next = downsample_2x(last);
        levels.push(next);
    }
    levels
}
