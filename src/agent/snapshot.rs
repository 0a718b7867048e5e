//! Renders fetched pages to PNG screenshots.
//!
//! The engine works on page text, not a real browser surface, so captures
//! are drawn: an address banner plus the visible text laid out in 8x8
//! glyphs. Good enough for the screenshot gallery and for vision models.

use anyhow::{Context, Result};
use font8x8::{UnicodeFonts, BASIC_FONTS};
use image::{Rgb, RgbImage};
use std::io::Cursor;

const COLS: usize = 100;
const BODY_LINES: usize = 60;
const CELL: u32 = 8;
const PITCH: u32 = 10;
const PAD: u32 = 8;

const PAGE_BG: [u8; 3] = [0xfa, 0xfa, 0xf7];
const PAGE_FG: [u8; 3] = [0x22, 0x22, 0x22];
const BANNER_BG: [u8; 3] = [0x1f, 0x3d, 0x5c];
const BANNER_FG: [u8; 3] = [0xf0, 0xf4, 0xf8];

/// Draw a capture of the given page and encode it as PNG.
pub fn render_page(url: &str, title: &str, body: &str) -> Result<Vec<u8>> {
    let width = PAD * 2 + (COLS as u32) * CELL;
    let height = PAD * 2 + PITCH * 2 + 4 + (BODY_LINES as u32) * PITCH;
    let mut img = RgbImage::from_pixel(width, height, Rgb(PAGE_BG));

    // address banner: title line, then the URL
    let banner_h = PAD + PITCH * 2 + 2;
    for y in 0..banner_h {
        for x in 0..width {
            img.put_pixel(x, y, Rgb(BANNER_BG));
        }
    }
    draw_line(&mut img, PAD, PAD, title, BANNER_FG, BANNER_BG);
    draw_line(&mut img, PAD, PAD + PITCH, url, BANNER_FG, BANNER_BG);

    let mut y = banner_h + 4;
    for line in wrap(body, COLS).into_iter().take(BODY_LINES) {
        draw_line(&mut img, PAD, y, &line, PAGE_FG, PAGE_BG);
        y += PITCH;
    }

    let mut bytes = Vec::new();
    img.write_to(&mut Cursor::new(&mut bytes), image::ImageFormat::Png)
        .context("failed to encode page capture as PNG")?;
    Ok(bytes)
}

fn draw_line(img: &mut RgbImage, x: u32, y: u32, text: &str, fg: [u8; 3], bg: [u8; 3]) {
    let mut cursor = x;
    for ch in text.chars().take(COLS) {
        draw_char(img, cursor, y, ch, fg, bg);
        cursor += CELL;
    }
}

fn draw_char(img: &mut RgbImage, x: u32, y: u32, ch: char, fg: [u8; 3], bg: [u8; 3]) {
    let glyph = BASIC_FONTS
        .get(ch)
        .or_else(|| BASIC_FONTS.get('?'))
        .unwrap_or([0u8; 8]);
    for (row_idx, row) in glyph.iter().enumerate() {
        let py = y + row_idx as u32;
        if py >= img.height() {
            break;
        }
        for bit in 0..8u32 {
            let px = x + bit;
            if px >= img.width() {
                break;
            }
            // font8x8 stores LSB as leftmost pixel
            let color = if (row >> bit) & 1 == 1 { fg } else { bg };
            img.put_pixel(px, py, Rgb(color));
        }
    }
}

/// Greedy word wrap to `cols` columns. Overlong words are hard-broken.
fn wrap(text: &str, cols: usize) -> Vec<String> {
    let mut lines = Vec::new();
    let mut current = String::new();
    for word in text.split_whitespace() {
        let mut word = word;
        while word.len() > cols {
            let mut cut = cols;
            while !word.is_char_boundary(cut) {
                cut -= 1;
            }
            if !current.is_empty() {
                lines.push(std::mem::take(&mut current));
            }
            lines.push(word[..cut].to_string());
            word = &word[cut..];
        }
        if current.is_empty() {
            current.push_str(word);
        } else if current.len() + 1 + word.len() <= cols {
            current.push(' ');
            current.push_str(word);
        } else {
            lines.push(std::mem::take(&mut current));
            current.push_str(word);
        }
    }
    if !current.is_empty() {
        lines.push(current);
    }
    lines
}
