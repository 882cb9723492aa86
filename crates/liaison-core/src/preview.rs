//! First-page raster preview of a generated letter
//!
//! A small rasterizer for the subset of PDF the composer emits: rectangles,
//! stroked lines, image XObjects (Flate RGB/Gray with soft masks, and JPEG)
//! and text. Text runs are drawn as greeked bars at their Helvetica advance
//! widths, which is enough to judge layout on screen without a font engine.

use crate::composer::metrics::{decode_win_ansi, text_width, Font};
use crate::error::{LiaisonError, Result};
use lopdf::content::{Content, Operation};
use flate2::read::ZlibDecoder;
use jpeg_decoder::PixelFormat;
use lopdf::{Dictionary, Document, Object, ObjectId, Stream};
use std::io::Read;
use std::path::Path;

const DEFAULT_MEDIA_BOX: [f32; 4] = [0.0, 0.0, 595.28, 841.89];
const MAX_PREVIEW_PIXELS: u64 = 40_000_000;
/// Neutral fill for images that do not decode
const PLACEHOLDER: [u8; 3] = [200, 200, 200];
/// Inflated stream size limit
const MAX_STREAM_BYTES: u64 = 256 * 1024 * 1024;
/// Share of the text color used for greeked bars
const GREEK_INTENSITY: f32 = 0.55;

/// 8-bit RGB image, rows top to bottom
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PreviewImage {
    pub width: u32,
    pub height: u32,
    pub rgb: Vec<u8>,
}

impl PreviewImage {
    fn blank(width: u32, height: u32) -> Self {
        Self {
            width,
            height,
            rgb: vec![u8::MAX; width as usize * height as usize * 3],
        }
    }

    pub fn pixel(&self, x: u32, y: u32) -> Option<[u8; 3]> {
        if x >= self.width || y >= self.height {
            return None;
        }
        let i = (y as usize * self.width as usize + x as usize) * 3;
        Some([self.rgb[i], self.rgb[i + 1], self.rgb[i + 2]])
    }

    fn blend(&mut self, x: i64, y: i64, color: [u8; 3], alpha: f32) {
        if x < 0 || y < 0 || x >= i64::from(self.width) || y >= i64::from(self.height) || alpha <= 0.0 {
            return;
        }
        let i = (y as usize * self.width as usize + x as usize) * 3;
        for (k, &c) in color.iter().enumerate() {
            let dst = f32::from(self.rgb[i + k]);
            self.rgb[i + k] = (dst + (f32::from(c) - dst) * alpha.min(1.0)).round() as u8;
        }
    }

    fn fill_box(&mut self, x0: f32, y0: f32, x1: f32, y1: f32, color: [u8; 3], alpha: f32) {
        let (left, right) = (x0.min(x1).floor() as i64, x0.max(x1).ceil() as i64);
        let (top, bottom) = (y0.min(y1).floor() as i64, y0.max(y1).ceil() as i64);
        for y in top.max(0)..bottom.min(i64::from(self.height)) {
            for x in left.max(0)..right.min(i64::from(self.width)) {
                self.blend(x, y, color, alpha);
            }
        }
    }

    /// Downscale to fit within `max_width` x `max_height`, keeping the aspect
    /// ratio. Images already inside the box are returned unchanged.
    pub fn thumbnail(&self, max_width: u32, max_height: u32) -> PreviewImage {
        let scale = (max_width as f32 / self.width as f32)
            .min(max_height as f32 / self.height as f32)
            .min(1.0);
        if scale >= 1.0 {
            return self.clone();
        }

        let width = ((self.width as f32 * scale).round() as u32).max(1);
        let height = ((self.height as f32 * scale).round() as u32).max(1);
        let mut out = Vec::with_capacity(width as usize * height as usize * 3);

        // Box filter: each output pixel averages the source block it covers
        for ty in 0..height {
            let sy0 = (ty as u64 * self.height as u64 / height as u64) as u32;
            let sy1 = (((ty + 1) as u64 * self.height as u64 / height as u64) as u32).max(sy0 + 1);
            for tx in 0..width {
                let sx0 = (tx as u64 * self.width as u64 / width as u64) as u32;
                let sx1 = (((tx + 1) as u64 * self.width as u64 / width as u64) as u32).max(sx0 + 1);
                let mut sum = [0u32; 3];
                let mut count = 0u32;
                for sy in sy0..sy1.min(self.height) {
                    for sx in sx0..sx1.min(self.width) {
                        let i = (sy as usize * self.width as usize + sx as usize) * 3;
                        for k in 0..3 {
                            sum[k] += u32::from(self.rgb[i + k]);
                        }
                        count += 1;
                    }
                }
                let count = count.max(1);
                out.extend(sum.iter().map(|s| (s / count) as u8));
            }
        }

        PreviewImage {
            width,
            height,
            rgb: out,
        }
    }

    pub fn to_png(&self) -> Result<Vec<u8>> {
        let mut out = Vec::new();
        {
            let mut encoder = png::Encoder::new(&mut out, self.width, self.height);
            encoder.set_color(png::ColorType::Rgb);
            encoder.set_depth(png::BitDepth::Eight);
            let mut writer = encoder
                .write_header()
                .map_err(|e| LiaisonError::Render(format!("png encode header failed: {}", e)))?;
            writer
                .write_image_data(&self.rgb)
                .map_err(|e| LiaisonError::Render(format!("png encode failed: {}", e)))?;
        }
        Ok(out)
    }

    pub fn save_png<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        std::fs::write(path.as_ref(), self.to_png()?)?;
        Ok(())
    }
}

/// Row-vector affine matrix `[a b c d e f]` as used by PDF
#[derive(Debug, Clone, Copy, PartialEq)]
struct Matrix([f32; 6]);

impl Matrix {
    const IDENTITY: Matrix = Matrix([1.0, 0.0, 0.0, 1.0, 0.0, 0.0]);

    fn translate(tx: f32, ty: f32) -> Self {
        Matrix([1.0, 0.0, 0.0, 1.0, tx, ty])
    }

    /// `self` applied first, then `other`
    fn then(&self, other: &Matrix) -> Matrix {
        let [a1, b1, c1, d1, e1, f1] = self.0;
        let [a2, b2, c2, d2, e2, f2] = other.0;
        Matrix([
            a1 * a2 + b1 * c2,
            a1 * b2 + b1 * d2,
            c1 * a2 + d1 * c2,
            c1 * b2 + d1 * d2,
            e1 * a2 + f1 * c2 + e2,
            e1 * b2 + f1 * d2 + f2,
        ])
    }

    fn apply(&self, x: f32, y: f32) -> (f32, f32) {
        let [a, b, c, d, e, f] = self.0;
        (a * x + c * y + e, b * x + d * y + f)
    }

    fn invert(&self) -> Option<Matrix> {
        let [a, b, c, d, e, f] = self.0;
        let det = a * d - b * c;
        if det.abs() < f32::EPSILON {
            return None;
        }
        Some(Matrix([
            d / det,
            -b / det,
            -c / det,
            a / det,
            (c * f - d * e) / det,
            (b * e - a * f) / det,
        ]))
    }

    fn scale_factor(&self) -> f32 {
        let [a, b, c, d, ..] = self.0;
        (a * d - b * c).abs().sqrt()
    }
}

#[derive(Debug, Clone, Copy)]
struct GraphicsState {
    ctm: Matrix,
    line_width: f32,
    fill: [u8; 3],
    stroke: [u8; 3],
}

impl Default for GraphicsState {
    fn default() -> Self {
        Self {
            ctm: Matrix::IDENTITY,
            line_width: 1.0,
            fill: [0, 0, 0],
            stroke: [0, 0, 0],
        }
    }
}

#[derive(Debug, Clone, Copy)]
struct TextState {
    matrix: Matrix,
    line_matrix: Matrix,
    font: Font,
    size: f32,
}

impl Default for TextState {
    fn default() -> Self {
        Self {
            matrix: Matrix::IDENTITY,
            line_matrix: Matrix::IDENTITY,
            font: Font::Regular,
            size: 12.0,
        }
    }
}

enum PathSegment {
    Line((f32, f32), (f32, f32)),
    Rect([(f32, f32); 4]),
}

fn corrupt(message: impl Into<String>) -> LiaisonError {
    LiaisonError::Render(message.into())
}

fn number(object: &Object) -> Option<f32> {
    match object {
        Object::Integer(i) => Some(*i as f32),
        Object::Real(r) => Some(*r),
        _ => None,
    }
}

fn numbers<const N: usize>(op: &Operation) -> Option<[f32; N]> {
    if op.operands.len() < N {
        return None;
    }
    let mut out = [0.0; N];
    for (slot, operand) in out.iter_mut().zip(&op.operands) {
        *slot = number(operand)?;
    }
    Some(out)
}

fn to_byte(component: f32) -> u8 {
    (component.clamp(0.0, 1.0) * 255.0).round() as u8
}

fn resolve<'a>(doc: &'a Document, object: &'a Object) -> Result<&'a Object> {
    match object {
        Object::Reference(id) => doc
            .get_object(*id)
            .map_err(|e| corrupt(format!("Dangling reference {:?}: {}", id, e))),
        other => Ok(other),
    }
}

/// Look up a page attribute, following the Parent chain for inherited keys
fn inherited<'a>(doc: &'a Document, page: &'a Dictionary, key: &[u8]) -> Option<&'a Object> {
    let mut current = page;
    for _ in 0..32 {
        if let Ok(value) = current.get(key) {
            return resolve(doc, value).ok();
        }
        let parent = current.get(b"Parent").ok()?;
        current = resolve(doc, parent).ok()?.as_dict().ok()?;
    }
    None
}

pub struct PreviewRenderer {
    dpi: u32,
}

impl PreviewRenderer {
    pub fn new(dpi: u32) -> Self {
        Self { dpi }
    }

    /// Rasterize page one of `document`. Fails with `Render` when the bytes
    /// are not a readable PDF.
    pub fn render_first_page(&self, document: &[u8]) -> Result<PreviewImage> {
        let doc = Document::load_mem(document)
            .map_err(|e| corrupt(format!("Not a readable PDF: {}", e)))?;
        let page_id = *doc
            .get_pages()
            .values()
            .next()
            .ok_or_else(|| corrupt("PDF has no pages"))?;
        let page = doc
            .get_object(page_id)
            .and_then(Object::as_dict)
            .map_err(|e| corrupt(format!("Page object unreadable: {}", e)))?;

        let media_box = inherited(&doc, page, b"MediaBox")
            .and_then(|o| o.as_array().ok())
            .and_then(|a| {
                let values: Vec<f32> = a.iter().filter_map(number).collect();
                (values.len() == 4).then(|| [values[0], values[1], values[2], values[3]])
            })
            .unwrap_or(DEFAULT_MEDIA_BOX);

        let scale = self.dpi as f32 / 72.0;
        let page_width = (media_box[2] - media_box[0]).abs();
        let page_height = (media_box[3] - media_box[1]).abs();
        let width = (page_width * scale).ceil().max(1.0) as u32;
        let height = (page_height * scale).ceil().max(1.0) as u32;
        if u64::from(width) * u64::from(height) > MAX_PREVIEW_PIXELS {
            return Err(corrupt(format!("Page too large to preview: {}x{} px", width, height)));
        }

        // User space to device pixels, y pointing down
        let device = Matrix([
            scale,
            0.0,
            0.0,
            -scale,
            -media_box[0] * scale,
            media_box[3] * scale,
        ]);

        let content = page_content(&doc, page_id)?;
        let operations = Content::decode(&content)
            .map_err(|e| corrupt(format!("Content stream unreadable: {}", e)))?
            .operations;

        let resources = inherited(&doc, page, b"Resources").and_then(|o| o.as_dict().ok());
        let mut raster = Rasterizer {
            doc: &doc,
            resources,
            image: PreviewImage::blank(width, height),
            device,
        };
        raster.run(&operations)?;

        log::debug!(
            "Rendered preview {}x{} at {} dpi ({} operations)",
            width,
            height,
            self.dpi,
            operations.len()
        );
        Ok(raster.image)
    }
}

fn page_content(doc: &Document, page_id: ObjectId) -> Result<Vec<u8>> {
    let mut content = Vec::new();
    for stream_id in doc.get_page_contents(page_id) {
        let stream = doc
            .get_object(stream_id)
            .and_then(Object::as_stream)
            .map_err(|e| corrupt(format!("Content stream {:?} unreadable: {}", stream_id, e)))?;
        content.extend_from_slice(&stream_data(stream)?);
        content.push(b'\n');
    }
    Ok(content)
}

struct Rasterizer<'a> {
    doc: &'a Document,
    resources: Option<&'a Dictionary>,
    image: PreviewImage,
    device: Matrix,
}

impl Rasterizer<'_> {
    fn to_device(&self, state: &GraphicsState, x: f32, y: f32) -> (f32, f32) {
        state.ctm.then(&self.device).apply(x, y)
    }

    fn run(&mut self, operations: &[Operation]) -> Result<()> {
        let mut state = GraphicsState::default();
        let mut stack: Vec<GraphicsState> = Vec::new();
        let mut text = TextState::default();
        let mut path: Vec<PathSegment> = Vec::new();
        let mut cursor = (0.0f32, 0.0f32);

        for op in operations {
            match op.operator.as_str() {
                "q" => stack.push(state),
                "Q" => state = stack.pop().unwrap_or_default(),
                "cm" => {
                    if let Some(m) = numbers::<6>(op) {
                        state.ctm = Matrix(m).then(&state.ctm);
                    }
                }
                "w" => {
                    if let Some([w]) = numbers::<1>(op) {
                        state.line_width = w;
                    }
                }
                "g" => {
                    if let Some([g]) = numbers::<1>(op) {
                        state.fill = [to_byte(g); 3];
                    }
                }
                "G" => {
                    if let Some([g]) = numbers::<1>(op) {
                        state.stroke = [to_byte(g); 3];
                    }
                }
                "rg" => {
                    if let Some([r, g, b]) = numbers::<3>(op) {
                        state.fill = [to_byte(r), to_byte(g), to_byte(b)];
                    }
                }
                "RG" => {
                    if let Some([r, g, b]) = numbers::<3>(op) {
                        state.stroke = [to_byte(r), to_byte(g), to_byte(b)];
                    }
                }
                "m" => {
                    if let Some([x, y]) = numbers::<2>(op) {
                        cursor = (x, y);
                    }
                }
                "l" => {
                    if let Some([x, y]) = numbers::<2>(op) {
                        path.push(PathSegment::Line(cursor, (x, y)));
                        cursor = (x, y);
                    }
                }
                "re" => {
                    if let Some([x, y, w, h]) = numbers::<4>(op) {
                        path.push(PathSegment::Rect([(x, y), (x + w, y), (x + w, y + h), (x, y + h)]));
                    }
                }
                "S" | "s" => {
                    for segment in path.drain(..) {
                        self.stroke(&state, &segment);
                    }
                }
                "f" | "F" | "f*" | "B" | "B*" | "b" | "b*" => {
                    for segment in path.drain(..) {
                        if let PathSegment::Rect(corners) = segment {
                            self.fill_polygon(&state, &corners, state.fill, 1.0);
                        }
                    }
                }
                "n" => path.clear(),
                "BT" => text = TextState { font: text.font, size: text.size, ..TextState::default() },
                "Tf" => {
                    if let Some(Object::Name(name)) = op.operands.first() {
                        text.font = Font::from_resource_name(name).unwrap_or(Font::Regular);
                    }
                    if let Some(size) = op.operands.get(1).and_then(number) {
                        text.size = size;
                    }
                }
                "Td" | "TD" => {
                    if let Some([tx, ty]) = numbers::<2>(op) {
                        text.line_matrix = Matrix::translate(tx, ty).then(&text.line_matrix);
                        text.matrix = text.line_matrix;
                    }
                }
                "Tm" => {
                    if let Some(m) = numbers::<6>(op) {
                        text.line_matrix = Matrix(m);
                        text.matrix = text.line_matrix;
                    }
                }
                "Tj" | "'" | "\"" => {
                    if let Some(Object::String(bytes, _)) = op.operands.last() {
                        self.show_text(&state, &mut text, bytes);
                    }
                }
                "TJ" => {
                    if let Some(Object::Array(items)) = op.operands.first() {
                        for item in items {
                            match item {
                                Object::String(bytes, _) => self.show_text(&state, &mut text, bytes),
                                other => {
                                    if let Some(adjust) = number(other) {
                                        let dx = -adjust / 1000.0 * text.size;
                                        text.matrix = Matrix::translate(dx, 0.0).then(&text.matrix);
                                    }
                                }
                            }
                        }
                    }
                }
                "Do" => {
                    if let Some(Object::Name(name)) = op.operands.first() {
                        self.draw_xobject(&state, name)?;
                    }
                }
                _ => {}
            }
        }
        Ok(())
    }

    fn fill_polygon(&mut self, state: &GraphicsState, corners: &[(f32, f32)], color: [u8; 3], alpha: f32) {
        let points: Vec<(f32, f32)> = corners
            .iter()
            .map(|&(x, y)| self.to_device(state, x, y))
            .collect();
        let (mut x0, mut y0, mut x1, mut y1) = (f32::MAX, f32::MAX, f32::MIN, f32::MIN);
        for (x, y) in points {
            x0 = x0.min(x);
            y0 = y0.min(y);
            x1 = x1.max(x);
            y1 = y1.max(y);
        }
        self.image.fill_box(x0, y0, x1, y1, color, alpha);
    }

    fn stroke(&mut self, state: &GraphicsState, segment: &PathSegment) {
        let edges: Vec<((f32, f32), (f32, f32))> = match segment {
            PathSegment::Line(a, b) => vec![(*a, *b)],
            PathSegment::Rect(c) => vec![(c[0], c[1]), (c[1], c[2]), (c[2], c[3]), (c[3], c[0])],
        };
        let thickness = (state.line_width * state.ctm.then(&self.device).scale_factor()).max(1.0);

        for (a, b) in edges {
            let (ax, ay) = self.to_device(state, a.0, a.1);
            let (bx, by) = self.to_device(state, b.0, b.1);
            let steps = ((bx - ax).abs().max((by - ay).abs()) * 2.0).ceil().max(1.0) as usize;
            let half = thickness / 2.0;
            for i in 0..=steps {
                let t = i as f32 / steps as f32;
                let (x, y) = (ax + (bx - ax) * t, ay + (by - ay) * t);
                self.image
                    .fill_box(x - half, y - half, x + half, y + half, state.stroke, 1.0);
            }
        }
    }

    fn show_text(&mut self, state: &GraphicsState, text: &mut TextState, bytes: &[u8]) {
        let decoded = decode_win_ansi(bytes);
        let advance = text_width(text.font, &decoded, text.size);
        let bar_height = text.size * 0.5;

        if !decoded.trim().is_empty() {
            let corners = [(0.0, 0.0), (advance, 0.0), (advance, bar_height), (0.0, bar_height)]
                .map(|(x, y)| text.matrix.apply(x, y));
            self.fill_polygon(state, &corners, state.fill, GREEK_INTENSITY);
        }
        text.matrix = Matrix::translate(advance, 0.0).then(&text.matrix);
    }

    fn draw_xobject(&mut self, state: &GraphicsState, name: &[u8]) -> Result<()> {
        let missing = || corrupt(format!("XObject {} not in page resources", String::from_utf8_lossy(name)));
        let xobjects = self
            .resources
            .and_then(|r| r.get(b"XObject").ok())
            .and_then(|o| resolve(self.doc, o).ok())
            .and_then(|o| o.as_dict().ok())
            .ok_or_else(missing)?;
        let stream = xobjects
            .get(name)
            .map_err(|_| missing())
            .and_then(|o| resolve(self.doc, o))?
            .as_stream()
            .map_err(|e| corrupt(format!("XObject is not a stream: {}", e)))?;

        let is_image = stream
            .dict
            .get(b"Subtype")
            .and_then(Object::as_name)
            .map(|n| n == b"Image")
            .unwrap_or(false);
        if !is_image {
            log::debug!("Skipping non-image XObject {}", String::from_utf8_lossy(name));
            return Ok(());
        }

        let raster = DecodedImage::from_stream(self.doc, stream)?;
        let to_device = state.ctm.then(&self.device);
        let Some(inverse) = to_device.invert() else {
            return Ok(());
        };

        let corners = [(0.0, 0.0), (1.0, 0.0), (1.0, 1.0), (0.0, 1.0)].map(|(x, y)| to_device.apply(x, y));
        let left = corners.iter().map(|c| c.0).fold(f32::MAX, f32::min).floor().max(0.0) as i64;
        let right = corners.iter().map(|c| c.0).fold(f32::MIN, f32::max).ceil() as i64;
        let top = corners.iter().map(|c| c.1).fold(f32::MAX, f32::min).floor().max(0.0) as i64;
        let bottom = corners.iter().map(|c| c.1).fold(f32::MIN, f32::max).ceil() as i64;

        for py in top..bottom.min(i64::from(self.image.height)) {
            for px in left..right.min(i64::from(self.image.width)) {
                let (u, v) = inverse.apply(px as f32 + 0.5, py as f32 + 0.5);
                if !(0.0..1.0).contains(&u) || !(0.0..1.0).contains(&v) {
                    continue;
                }
                // Image row 0 is the top edge of the unit square
                let col = ((u * raster.width as f32) as u32).min(raster.width - 1);
                let row = (((1.0 - v) * raster.height as f32) as u32).min(raster.height - 1);
                let (color, alpha) = raster.sample(col, row);
                self.image.blend(px, py, color, alpha);
            }
        }
        Ok(())
    }
}

/// Image XObject decoded to RGB with optional alpha
struct DecodedImage {
    width: u32,
    height: u32,
    rgb: Option<Vec<u8>>,
    alpha: Option<Vec<u8>>,
}

impl DecodedImage {
    fn from_stream(doc: &Document, stream: &Stream) -> Result<Self> {
        let dimension = |key: &[u8]| {
            stream
                .dict
                .get(key)
                .ok()
                .and_then(number)
                .filter(|v| *v >= 1.0)
                .map(|v| v as u32)
                .ok_or_else(|| corrupt(format!("Image without valid {}", String::from_utf8_lossy(key))))
        };
        let width = dimension(b"Width")?;
        let height = dimension(b"Height")?;

        let filter = stream
            .dict
            .get(b"Filter")
            .and_then(Object::as_name)
            .map(|n| n.to_vec())
            .unwrap_or_default();
        if filter == b"DCTDecode" {
            let rgb = match decode_jpeg(&stream.content, width, height) {
                Ok(rgb) => Some(rgb),
                Err(e) => {
                    log::warn!("Drawing JPEG image as a placeholder: {}", e);
                    None
                }
            };
            return Ok(Self {
                width,
                height,
                rgb,
                alpha: None,
            });
        }

        let components = match stream.dict.get(b"ColorSpace").and_then(Object::as_name) {
            Ok(b"DeviceGray") => 1,
            Ok(b"DeviceRGB") => 3,
            other => {
                return Err(corrupt(format!(
                    "Unsupported image color space {:?}",
                    other.map(String::from_utf8_lossy)
                )))
            }
        };

        let samples = image_samples(stream, width, height, components)?;
        let rgb = if components == 1 {
            samples.iter().flat_map(|&g| [g, g, g]).collect()
        } else {
            samples
        };

        let alpha = match stream.dict.get(b"SMask") {
            Ok(mask) => {
                let mask = resolve(doc, mask)?
                    .as_stream()
                    .map_err(|e| corrupt(format!("Soft mask is not a stream: {}", e)))?;
                Some(image_samples(mask, width, height, 1)?)
            }
            Err(_) => None,
        };

        Ok(Self {
            width,
            height,
            rgb: Some(rgb),
            alpha,
        })
    }

    fn sample(&self, col: u32, row: u32) -> ([u8; 3], f32) {
        let index = row as usize * self.width as usize + col as usize;
        let alpha = self
            .alpha
            .as_ref()
            .map(|a| f32::from(a[index]) / 255.0)
            .unwrap_or(1.0);
        match &self.rgb {
            Some(rgb) => ([rgb[index * 3], rgb[index * 3 + 1], rgb[index * 3 + 2]], alpha),
            None => (PLACEHOLDER, alpha),
        }
    }
}

/// Raw bytes of a stream with no filter or a single `FlateDecode`.
///
/// lopdf's own decompression refuses image streams, so all streams are
/// inflated here the same way.
fn stream_data(stream: &Stream) -> Result<Vec<u8>> {
    let filter = match stream.dict.get(b"Filter") {
        Err(_) => return Ok(stream.content.clone()),
        Ok(Object::Array(filters)) if filters.len() == 1 => filters[0].as_name().ok(),
        Ok(filter) => filter.as_name().ok(),
    };
    if filter != Some(b"FlateDecode".as_slice()) {
        return Err(corrupt(format!(
            "Unsupported stream filter {:?}",
            filter.map(String::from_utf8_lossy)
        )));
    }

    let mut data = Vec::new();
    ZlibDecoder::new(stream.content.as_slice())
        .take(MAX_STREAM_BYTES)
        .read_to_end(&mut data)
        .map_err(|e| corrupt(format!("Stream does not inflate: {}", e)))?;
    Ok(data)
}

fn decode_jpeg(data: &[u8], width: u32, height: u32) -> Result<Vec<u8>> {
    let mut decoder = jpeg_decoder::Decoder::new(data);
    let pixels = decoder
        .decode()
        .map_err(|e| corrupt(format!("JPEG does not decode: {}", e)))?;
    let info = decoder
        .info()
        .ok_or_else(|| corrupt("JPEG has no frame header"))?;
    if (u32::from(info.width), u32::from(info.height)) != (width, height) {
        return Err(corrupt(format!(
            "JPEG is {}x{} but the image dictionary says {}x{}",
            info.width, info.height, width, height
        )));
    }

    let rgb = match info.pixel_format {
        PixelFormat::RGB24 => pixels,
        PixelFormat::L8 => pixels.iter().flat_map(|&g| [g, g, g]).collect(),
        // Big-endian samples, keep the high byte
        PixelFormat::L16 => pixels.chunks_exact(2).flat_map(|g| [g[0], g[0], g[0]]).collect(),
        PixelFormat::CMYK32 => pixels
            .chunks_exact(4)
            .flat_map(|p| {
                let k = 255 - u32::from(p[3]);
                p[..3].iter().map(move |&c| ((255 - u32::from(c)) * k / 255) as u8)
            })
            .collect(),
    };
    Ok(rgb)
}

fn image_samples(stream: &Stream, width: u32, height: u32, components: usize) -> Result<Vec<u8>> {
    let data = stream_data(stream)?;

    let expected = width as usize * height as usize * components;
    if data.len() < expected {
        return Err(corrupt(format!(
            "Image data truncated: {} bytes, expected {}",
            data.len(),
            expected
        )));
    }
    Ok(data[..expected].to_vec())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::composer::assets::test_support::solid_png;
    use crate::composer::{ImageAsset, LetterAssets, LetterComposer};
    use crate::config::LiaisonConfig;
    use chrono::NaiveDate;
    use flate2::write::ZlibEncoder;
    use flate2::Compression;
    use liaison_types::{EmployeeRecord, LetterRequest};
    use lopdf::dictionary;
    use std::io::Write;

    /// Single page 100x50 pt with a red filled rectangle in the lower-left quarter
    fn red_square_pdf() -> Vec<u8> {
        let mut doc = Document::with_version("1.5");
        let pages_id = doc.new_object_id();
        let content = b"1 0 0 rg 0 0 50 25 re f".to_vec();
        let content_id = doc.add_object(Stream::new(dictionary! {}, content));
        let page_id = doc.add_object(dictionary! {
            "Type" => "Page",
            "Parent" => pages_id,
            "Contents" => content_id,
        });
        doc.objects.insert(
            pages_id,
            Object::Dictionary(dictionary! {
                "Type" => "Pages",
                "Kids" => vec![page_id.into()],
                "Count" => 1,
                "MediaBox" => vec![0.into(), 0.into(), 100.into(), 50.into()],
            }),
        );
        let catalog_id = doc.add_object(dictionary! { "Type" => "Catalog", "Pages" => pages_id });
        doc.trailer.set("Root", catalog_id);
        let mut bytes = Vec::new();
        doc.save_to(&mut bytes).unwrap();
        bytes
    }

    /// Single page 100x100 pt with `image` drawn over the whole page
    fn image_pdf(image: Stream) -> Vec<u8> {
        let mut doc = Document::with_version("1.5");
        let pages_id = doc.new_object_id();
        let image_id = doc.add_object(image);
        let content = b"q 100 0 0 100 0 0 cm /Im0 Do Q".to_vec();
        let content_id = doc.add_object(Stream::new(dictionary! {}, content));
        let page_id = doc.add_object(dictionary! {
            "Type" => "Page",
            "Parent" => pages_id,
            "Contents" => content_id,
            "MediaBox" => vec![0.into(), 0.into(), 100.into(), 100.into()],
            "Resources" => dictionary! { "XObject" => dictionary! { "Im0" => image_id } },
        });
        doc.objects.insert(
            pages_id,
            Object::Dictionary(dictionary! {
                "Type" => "Pages",
                "Kids" => vec![page_id.into()],
                "Count" => 1,
            }),
        );
        let catalog_id = doc.add_object(dictionary! { "Type" => "Catalog", "Pages" => pages_id });
        doc.trailer.set("Root", catalog_id);
        let mut bytes = Vec::new();
        doc.save_to(&mut bytes).unwrap();
        bytes
    }

    fn deflate(data: &[u8]) -> Vec<u8> {
        let mut encoder = ZlibEncoder::new(Vec::new(), Compression::default());
        encoder.write_all(data).unwrap();
        encoder.finish().unwrap()
    }

    #[test]
    fn test_flate_image_is_inflated() {
        let image = Stream::new(
            dictionary! {
                "Type" => "XObject",
                "Subtype" => "Image",
                "Width" => 2,
                "Height" => 1,
                "ColorSpace" => "DeviceGray",
                "BitsPerComponent" => 8,
                "Filter" => "FlateDecode",
            },
            deflate(&[0, 255]),
        );
        let preview = PreviewRenderer::new(72).render_first_page(&image_pdf(image)).unwrap();
        assert_eq!(preview.pixel(25, 50), Some([0, 0, 0]));
        assert_eq!(preview.pixel(75, 50), Some([255, 255, 255]));
    }

    /// Baseline 8x8 grayscale JPEG of value 64: DC coefficient only, unit quantization
    fn gray_jpeg() -> Vec<u8> {
        let mut jpeg = vec![0xFF, 0xD8, 0xFF, 0xDB, 0x00, 0x43, 0x00];
        jpeg.extend([1u8; 64]);
        jpeg.extend([0xFF, 0xC0, 0x00, 0x0B, 8, 0, 8, 0, 8, 1, 1, 0x11, 0]);
        // One-code Huffman tables: DC size category 10, AC end of block
        for (class, symbol) in [(0x00, 0x0A), (0x10, 0x00)] {
            jpeg.extend([0xFF, 0xC4, 0x00, 0x14, class, 1]);
            jpeg.extend([0u8; 15]);
            jpeg.push(symbol);
        }
        jpeg.extend([0xFF, 0xDA, 0x00, 0x08, 1, 1, 0x00, 0, 63, 0]);
        // DC -512, end of block, padding
        jpeg.extend([0x3F, 0xEF, 0xFF, 0xD9]);
        jpeg
    }

    fn dct_image(width: i64, height: i64, data: Vec<u8>) -> Stream {
        Stream::new(
            dictionary! {
                "Type" => "XObject",
                "Subtype" => "Image",
                "Width" => width,
                "Height" => height,
                "ColorSpace" => "DeviceGray",
                "BitsPerComponent" => 8,
                "Filter" => "DCTDecode",
            },
            data,
        )
    }

    #[test]
    fn test_jpeg_image_is_decoded() {
        let preview = PreviewRenderer::new(72)
            .render_first_page(&image_pdf(dct_image(8, 8, gray_jpeg())))
            .unwrap();
        let [r, g, b] = preview.pixel(50, 50).unwrap();
        assert!(r.abs_diff(64) <= 2 && r == g && g == b, "jpeg pixel {:?}", [r, g, b]);
    }

    #[test]
    fn test_undecodable_jpeg_draws_placeholder() {
        let image = dct_image(4, 4, b"not a jpeg".to_vec());
        let preview = PreviewRenderer::new(72).render_first_page(&image_pdf(image)).unwrap();
        assert_eq!(preview.pixel(50, 50), Some(PLACEHOLDER));

        // Decodes, but not to the size the dictionary declares
        let image = dct_image(16, 16, gray_jpeg());
        let preview = PreviewRenderer::new(72).render_first_page(&image_pdf(image)).unwrap();
        assert_eq!(preview.pixel(50, 50), Some(PLACEHOLDER));
    }

    #[test]
    fn test_composed_letter_shows_logo_and_stamp() {
        let config = LiaisonConfig::from_json_str(
            r#"{
                "employees": { "path": "lll.CSV" },
                "assets": { "logo": "logo.png", "stamp": "cachet.png" },
                "company": { "name": "CF MAIER ITAP", "address": "Z.I El Mazraa, 8024 Tazarka" },
                "hospitals": [{ "name": "CH Metz", "address": "1 allée du Château, 57000 Metz" }]
            }"#,
        )
        .unwrap();
        let assets = LetterAssets {
            logo: ImageAsset::from_bytes(&solid_png(20, 10, [0, 90, 170, 255])).unwrap(),
            stamp: ImageAsset::from_bytes(&solid_png(12, 12, [10, 10, 200, 160])).unwrap(),
        };
        let record = EmployeeRecord {
            id: "1042".to_string(),
            last_name: "Dupont".to_string(),
            first_name: "Jean".to_string(),
            cin: "08123456".to_string(),
            cnss: "1234567890".to_string(),
        };
        let request = LetterRequest::new(
            "1042",
            NaiveDate::from_ymd_opt(2024, 3, 1).unwrap(),
            "CH Metz",
            "Consultation médicale",
        );
        let document = LetterComposer::new(assets, &config).compose(&record, &request).unwrap();

        let preview = PreviewRenderer::new(72).render_first_page(&document.bytes).unwrap();
        assert_eq!((preview.width, preview.height), (596, 842));
        // Opaque logo, 40x20 mm in the top-right corner
        assert_eq!(preview.pixel(482, 85), Some([0, 90, 170]));
        // Translucent stamp, 40 mm square in the bottom-left corner, over white
        let [r, g, b] = preview.pixel(113, 728).unwrap();
        assert!(b > 200 && r < 130 && g < 130, "stamp pixel {:?}", [r, g, b]);
    }

    #[test]
    fn test_render_uses_inherited_media_box() {
        let image = PreviewRenderer::new(72).render_first_page(&red_square_pdf()).unwrap();
        assert_eq!((image.width, image.height), (100, 50));
        // Lower-left quarter is red, upper-right stays white
        assert_eq!(image.pixel(10, 40), Some([255, 0, 0]));
        assert_eq!(image.pixel(90, 10), Some([255, 255, 255]));
    }

    #[test]
    fn test_render_scales_with_dpi() {
        let image = PreviewRenderer::new(144).render_first_page(&red_square_pdf()).unwrap();
        assert_eq!((image.width, image.height), (200, 100));
    }

    #[test]
    fn test_garbage_is_render_error() {
        let err = PreviewRenderer::new(72).render_first_page(b"%PDF-1.4 garbage").unwrap_err();
        assert!(matches!(err, LiaisonError::Render(_)));
        assert!(err.is_recoverable());
    }

    #[test]
    fn test_matrix_inverse_round_trip() {
        let m = Matrix([2.0, 0.0, 0.0, -3.0, 10.0, 20.0]);
        let (x, y) = m.apply(4.0, 5.0);
        let (u, v) = m.invert().unwrap().apply(x, y);
        assert!((u - 4.0).abs() < 1e-4 && (v - 5.0).abs() < 1e-4);
    }

    #[test]
    fn test_thumbnail_fits_box_and_keeps_aspect() {
        let image = PreviewImage::blank(600, 800);
        let thumb = image.thumbnail(450, 600);
        assert_eq!((thumb.width, thumb.height), (450, 600));
        assert_eq!(thumb.rgb.len(), 450 * 600 * 3);

        let small = PreviewImage::blank(10, 10);
        assert_eq!(small.thumbnail(450, 600), small);
    }

    #[test]
    fn test_png_encoding_has_signature() {
        let png = PreviewImage::blank(3, 2).to_png().unwrap();
        assert!(png.starts_with(&[0x89, b'P', b'N', b'G']));
    }
}
