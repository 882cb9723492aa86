//! Low-level PDF assembly on top of lopdf

use super::assets::{ImageAsset, ImageData, LetterAssets};
use super::metrics::{encode_win_ansi, Font};
use crate::error::{LiaisonError, Result};
use flate2::write::ZlibEncoder;
use flate2::Compression;
use lopdf::content::{Content, Operation};
use lopdf::{dictionary, Dictionary, Document, Object, ObjectId, Stream, StringFormat};
use std::io::Write;

/// A4 portrait in points
pub const PAGE_WIDTH: f32 = 595.28;
pub const PAGE_HEIGHT: f32 = 841.89;

/// Points per millimetre
pub const MM: f32 = 72.0 / 25.4;

pub const LOGO_XOBJECT: &str = "Logo";
pub const STAMP_XOBJECT: &str = "Stamp";

fn deflate(data: &[u8]) -> Result<Vec<u8>> {
    let mut encoder = ZlibEncoder::new(Vec::new(), Compression::default());
    encoder
        .write_all(data)
        .and_then(|_| encoder.finish())
        .map_err(|e| LiaisonError::Template(format!("Failed to compress PDF stream: {}", e)))
}

fn assembly_error(e: lopdf::Error) -> LiaisonError {
    LiaisonError::Template(format!("PDF assembly failed: {}", e))
}

/// Drawing operations for one page, in PDF user space (origin bottom-left)
#[derive(Debug, Default)]
pub struct PageContent {
    operations: Vec<Operation>,
}

impl PageContent {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn text(&mut self, font: Font, size: f32, x: f32, y: f32, text: &str) {
        self.operations.extend([
            Operation::new("BT", vec![]),
            Operation::new(
                "Tf",
                vec![Object::Name(font.resource_name().as_bytes().to_vec()), size.into()],
            ),
            Operation::new("Td", vec![x.into(), y.into()]),
            Operation::new(
                "Tj",
                vec![Object::String(encode_win_ansi(text), StringFormat::Literal)],
            ),
            Operation::new("ET", vec![]),
        ]);
    }

    /// Place a registered image XObject in the box with lower-left corner (x, y)
    pub fn image(&mut self, name: &str, x: f32, y: f32, width: f32, height: f32) {
        self.operations.extend([
            Operation::new("q", vec![]),
            Operation::new(
                "cm",
                vec![width.into(), 0.into(), 0.into(), height.into(), x.into(), y.into()],
            ),
            Operation::new("Do", vec![Object::Name(name.as_bytes().to_vec())]),
            Operation::new("Q", vec![]),
        ]);
    }

    pub fn line(&mut self, x1: f32, y1: f32, x2: f32, y2: f32, width: f32) {
        self.operations.extend([
            Operation::new("w", vec![width.into()]),
            Operation::new("m", vec![x1.into(), y1.into()]),
            Operation::new("l", vec![x2.into(), y2.into()]),
            Operation::new("S", vec![]),
        ]);
    }
}

/// Builds a document whose pages share one resource dictionary holding
/// the two Helvetica fonts and the logo and stamp images.
///
/// Nothing time-dependent is written (no Info dictionary, no ID), so equal
/// input produces equal bytes.
pub struct PdfBuilder {
    doc: Document,
    pages_id: ObjectId,
    resources_id: ObjectId,
    page_ids: Vec<ObjectId>,
}

impl PdfBuilder {
    pub fn new(assets: &LetterAssets) -> Result<Self> {
        let mut doc = Document::with_version("1.5");
        let pages_id = doc.new_object_id();

        let mut fonts = Dictionary::new();
        for font in [Font::Regular, Font::Bold] {
            let font_id = doc.add_object(dictionary! {
                "Type" => "Font",
                "Subtype" => "Type1",
                "BaseFont" => font.base_font(),
                "Encoding" => "WinAnsiEncoding",
            });
            fonts.set(font.resource_name(), font_id);
        }

        let logo_id = add_image(&mut doc, &assets.logo)?;
        let stamp_id = add_image(&mut doc, &assets.stamp)?;

        let resources_id = doc.add_object(dictionary! {
            "Font" => fonts,
            "XObject" => dictionary! {
                LOGO_XOBJECT => logo_id,
                STAMP_XOBJECT => stamp_id,
            },
        });

        Ok(Self {
            doc,
            pages_id,
            resources_id,
            page_ids: Vec::new(),
        })
    }

    pub fn add_page(&mut self, page: PageContent) -> Result<()> {
        let content = Content {
            operations: page.operations,
        };
        let encoded = content.encode().map_err(assembly_error)?;
        let stream = Stream::new(
            dictionary! { "Filter" => "FlateDecode" },
            deflate(&encoded)?,
        );
        let content_id = self.doc.add_object(stream);

        let page_id = self.doc.add_object(dictionary! {
            "Type" => "Page",
            "Parent" => self.pages_id,
            "Contents" => content_id,
        });
        self.page_ids.push(page_id);
        Ok(())
    }

    /// Write the page tree and catalog, then serialize
    pub fn finish(mut self) -> Result<Vec<u8>> {
        if self.page_ids.is_empty() {
            return Err(LiaisonError::Template("Document has no pages".to_string()));
        }

        let kids: Vec<Object> = self.page_ids.iter().map(|id| Object::Reference(*id)).collect();
        let pages = dictionary! {
            "Type" => "Pages",
            "Kids" => kids,
            "Count" => self.page_ids.len() as i64,
            "Resources" => self.resources_id,
            "MediaBox" => vec![0.into(), 0.into(), PAGE_WIDTH.into(), PAGE_HEIGHT.into()],
        };
        self.doc.objects.insert(self.pages_id, Object::Dictionary(pages));

        let catalog_id = self.doc.add_object(dictionary! {
            "Type" => "Catalog",
            "Pages" => self.pages_id,
        });
        self.doc.trailer.set("Root", catalog_id);

        let mut bytes = Vec::new();
        self.doc.save_to(&mut bytes).map_err(|e| {
            LiaisonError::Template(format!("Failed to serialize PDF: {}", e))
        })?;
        Ok(bytes)
    }
}

fn add_image(doc: &mut Document, asset: &ImageAsset) -> Result<ObjectId> {
    let width = i64::from(asset.width);
    let height = i64::from(asset.height);

    let stream = match &asset.data {
        ImageData::Rgb { pixels, alpha } => {
            let mut dict = dictionary! {
                "Type" => "XObject",
                "Subtype" => "Image",
                "Width" => width,
                "Height" => height,
                "ColorSpace" => "DeviceRGB",
                "BitsPerComponent" => 8,
                "Filter" => "FlateDecode",
            };
            if let Some(alpha) = alpha {
                let mask = Stream::new(
                    dictionary! {
                        "Type" => "XObject",
                        "Subtype" => "Image",
                        "Width" => width,
                        "Height" => height,
                        "ColorSpace" => "DeviceGray",
                        "BitsPerComponent" => 8,
                        "Filter" => "FlateDecode",
                    },
                    deflate(alpha)?,
                );
                let mask_id = doc.add_object(mask);
                dict.set("SMask", mask_id);
            }
            Stream::new(dict, deflate(pixels)?)
        }
        ImageData::Jpeg { data, components } => {
            let color_space = match components {
                1 => "DeviceGray",
                4 => "DeviceCMYK",
                _ => "DeviceRGB",
            };
            Stream::new(
                dictionary! {
                    "Type" => "XObject",
                    "Subtype" => "Image",
                    "Width" => width,
                    "Height" => height,
                    "ColorSpace" => color_space,
                    "BitsPerComponent" => 8,
                    "Filter" => "DCTDecode",
                },
                data.clone(),
            )
        }
    };

    Ok(doc.add_object(stream))
}
