//! Synthetic image fixtures for unit tests

use std::path::Path;

use image::{Rgb, RgbImage};

/// Write a `size`x`size` PNG filled with `color` plus a faint diagonal gradient
pub fn write_png(path: &Path, color: [u8; 3], size: u32) {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).unwrap();
    }
    png_image(color, size).save(path).unwrap();
}

/// Encode the same fixture image as PNG bytes
pub fn png_bytes(color: [u8; 3], size: u32) -> Vec<u8> {
    let mut bytes = Vec::new();
    png_image(color, size)
        .write_to(&mut std::io::Cursor::new(&mut bytes), image::ImageFormat::Png)
        .unwrap();
    bytes
}

/// Create `<root>/<class>/NN.png` for every class, `per_class` images each
pub fn write_class_folders(root: &Path, classes: &[(&str, [u8; 3])], per_class: usize, size: u32) {
    for (name, color) in classes {
        for i in 0..per_class {
            let shade = (i as u8).wrapping_mul(3);
            let color = [
                color[0].saturating_sub(shade),
                color[1].saturating_sub(shade),
                color[2].saturating_sub(shade),
            ];
            write_png(&root.join(name).join(format!("{:02}.png", i)), color, size);
        }
    }
}

fn png_image(color: [u8; 3], size: u32) -> RgbImage {
    RgbImage::from_fn(size, size, |x, y| {
        let tint = ((x + y) % 4) as u8;
        Rgb([
            color[0].saturating_add(tint),
            color[1].saturating_add(tint),
            color[2].saturating_add(tint),
        ])
    })
}
