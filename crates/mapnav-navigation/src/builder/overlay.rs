use image::{DynamicImage, GrayImage, Rgb, RgbImage};
use imageproc::drawing::draw_filled_circle_mut;

use super::{EntrancePoint, Obstacle};

const MAX_MARKED_OBSTACLES: usize = 20;
const OBSTACLE_RADIUS: i32 = 5;
const ENTRANCE_RADIUS: i32 = 8;

/// Renders an inspection image: walkable pixels tinted green, the first twenty
/// obstacle centroids in red and entrances in cyan.
pub fn render_overlay(
    source: &DynamicImage,
    mask: &GrayImage,
    obstacles: &[Obstacle],
    entrances: &[EntrancePoint],
) -> RgbImage {
    let mut canvas = source.to_rgb8();
    for (pixel, m) in canvas.pixels_mut().zip(mask.pixels()) {
        let green = if m.0[0] != 0 { 100.0 } else { 0.0 };
        let [r, g, b] = pixel.0;
        *pixel = Rgb([
            (f32::from(r) * 0.7).round() as u8,
            (f32::from(g) * 0.7 + green * 0.3).round() as u8,
            (f32::from(b) * 0.7).round() as u8,
        ]);
    }

    for obstacle in obstacles.iter().take(MAX_MARKED_OBSTACLES) {
        let center = (obstacle.centroid[0] as i32, obstacle.centroid[1] as i32);
        draw_filled_circle_mut(&mut canvas, center, OBSTACLE_RADIUS, Rgb([255, 0, 0]));
    }

    let (width, height) = (f64::from(canvas.width()), f64::from(canvas.height()));
    for entrance in entrances {
        let center = (
            (entrance.position.x * width) as i32,
            (entrance.position.y * height) as i32,
        );
        draw_filled_circle_mut(&mut canvas, center, ENTRANCE_RADIUS, Rgb([0, 255, 255]));
    }
    canvas
}
