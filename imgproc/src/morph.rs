use image::GrayImage;

/// Binary erosion with a `(2r + 1)` square. Pixels outside the image count
/// as empty, so content touching the border is eroded as well.
///
/// Any non-zero input pixel is treated as set; output pixels are 0 or 255.
pub fn erode_mask(mask: &GrayImage, radius: u32) -> GrayImage {
    let (w, h) = mask.dimensions();
    let (wu, hu) = (w as usize, h as usize);
    let r = radius as usize;

    let set: Vec<bool> = mask.as_raw().iter().map(|&v| v != 0).collect();
    if r == 0 {
        return to_mask(w, h, &set);
    }

    let mut horizontal = vec![false; wu * hu];
    let mut runs = vec![0usize; wu.max(hu)];
    for y in 0..hu {
        let line: Vec<bool> = (0..wu).map(|x| set[y * wu + x]).collect();
        erode_line(&line, r, &mut runs);
        for x in 0..wu {
            horizontal[y * wu + x] = runs[x] > 0;
        }
    }

    let mut out = vec![false; wu * hu];
    for x in 0..wu {
        let line: Vec<bool> = (0..hu).map(|y| horizontal[y * wu + x]).collect();
        erode_line(&line, r, &mut runs);
        for y in 0..hu {
            out[y * wu + x] = runs[y] > 0;
        }
    }

    to_mask(w, h, &out)
}

/// One-dimensional erosion: `out[i] > 0` iff every element within `r` of
/// `i` is set. Works from forward and backward run lengths.
fn erode_line(line: &[bool], r: usize, out: &mut [usize]) {
    let n = line.len();
    let mut forward = vec![0usize; n];
    let mut run = 0;
    for i in 0..n {
        run = if line[i] { run + 1 } else { 0 };
        forward[i] = run;
    }
    run = 0;
    for i in (0..n).rev() {
        run = if line[i] { run + 1 } else { 0 };
        out[i] = usize::from(forward[i] > r && run > r);
    }
}

fn to_mask(w: u32, h: u32, set: &[bool]) -> GrayImage {
    let data = set.iter().map(|&s| if s { 255 } else { 0 }).collect();
    GrayImage::from_raw(w, h, data).unwrap_or_else(|| GrayImage::new(w, h))
}
