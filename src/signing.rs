//! Stamps the operator's signature image onto the last page of a PDF.

use std::path::Path;

use lopdf::{Document, Object, Stream, dictionary};
use tracing::debug;

use crate::error::{ConfigError, SignError};

/// XObject resource name used for the stamped image.
const SIGNATURE_XOBJECT: &str = "MailsignSig";

/// Image formats accepted for the signature.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SignatureFormat {
    Png,
    Jpeg,
}

impl SignatureFormat {
    /// Infer the format from a file extension (`.png`, `.jpg`, `.jpeg`).
    pub fn from_path(path: &Path) -> Result<Self, ConfigError> {
        let lower = path.to_string_lossy().to_lowercase();
        if lower.ends_with(".png") {
            Ok(Self::Png)
        } else if lower.ends_with(".jpg") || lower.ends_with(".jpeg") {
            Ok(Self::Jpeg)
        } else {
            Err(ConfigError::UnsupportedSignatureFormat(
                path.display().to_string(),
            ))
        }
    }
}

impl From<SignatureFormat> for image::ImageFormat {
    fn from(format: SignatureFormat) -> Self {
        match format {
            SignatureFormat::Png => image::ImageFormat::Png,
            SignatureFormat::Jpeg => image::ImageFormat::Jpeg,
        }
    }
}

/// Placement of the signature in PDF user-space units (origin bottom-left).
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SignatureRect {
    pub x: f32,
    pub y: f32,
    pub width: f32,
    pub height: f32,
}

/// Stamps a signature onto a PDF.
pub trait PdfSigner: Send + Sync {
    /// Draw `image` at `rect` on the last page and return the new document.
    fn sign(
        &self,
        pdf: &[u8],
        image: &[u8],
        format: SignatureFormat,
        rect: SignatureRect,
    ) -> Result<Vec<u8>, SignError>;
}

/// `lopdf`-backed signer.
#[derive(Debug, Default, Clone, Copy)]
pub struct LopdfSigner;

impl PdfSigner for LopdfSigner {
    fn sign(
        &self,
        pdf: &[u8],
        image: &[u8],
        format: SignatureFormat,
        rect: SignatureRect,
    ) -> Result<Vec<u8>, SignError> {
        let mut doc = Document::load_mem(pdf).map_err(|e| SignError::Malformed(e.to_string()))?;

        let page_id = doc
            .get_pages()
            .into_values()
            .last()
            .ok_or(SignError::NoPages)?;

        let xobject = image_xobject(&mut doc, image, format)?;
        let xobject_id = doc.add_object(xobject);
        doc.add_xobject(page_id, SIGNATURE_XOBJECT, xobject_id)
            .map_err(|e| SignError::Malformed(e.to_string()))?;

        let existing = doc
            .get_page_content(page_id)
            .map_err(|e| SignError::Malformed(e.to_string()))?;
        let mut content = Vec::with_capacity(existing.len() + 96);
        // Isolate the original graphics state so its transforms don't leak.
        content.extend_from_slice(b"q\n");
        content.extend_from_slice(&existing);
        content.extend_from_slice(b"\nQ\n");
        content.extend_from_slice(
            format!(
                "q {} 0 0 {} {} {} cm /{} Do Q\n",
                rect.width, rect.height, rect.x, rect.y, SIGNATURE_XOBJECT
            )
            .as_bytes(),
        );
        doc.change_page_content(page_id, content)
            .map_err(|e| SignError::Malformed(e.to_string()))?;

        let mut out = Vec::new();
        doc.save_to(&mut out)
            .map_err(|e| SignError::Malformed(e.to_string()))?;

        debug!(
            input_bytes = pdf.len(),
            output_bytes = out.len(),
            "Signature stamped on last page"
        );
        Ok(out)
    }
}

/// Decode the signature and build an RGB image XObject, with an SMask when
/// the source has transparency.
fn image_xobject(
    doc: &mut Document,
    bytes: &[u8],
    format: SignatureFormat,
) -> Result<Stream, SignError> {
    let decoded = image::load_from_memory_with_format(bytes, format.into())
        .map_err(|e| SignError::Image(e.to_string()))?;
    let (width, height) = (decoded.width(), decoded.height());
    let rgba = decoded.to_rgba8();

    let mut rgb = Vec::with_capacity((width * height * 3) as usize);
    let mut alpha = Vec::with_capacity((width * height) as usize);
    for pixel in rgba.pixels() {
        rgb.extend_from_slice(&pixel.0[..3]);
        alpha.push(pixel.0[3]);
    }

    let mut dict = dictionary! {
        "Type" => "XObject",
        "Subtype" => "Image",
        "Width" => width as i64,
        "Height" => height as i64,
        "ColorSpace" => "DeviceRGB",
        "BitsPerComponent" => 8,
    };

    if alpha.iter().any(|a| *a != u8::MAX) {
        let mut smask = Stream::new(
            dictionary! {
                "Type" => "XObject",
                "Subtype" => "Image",
                "Width" => width as i64,
                "Height" => height as i64,
                "ColorSpace" => "DeviceGray",
                "BitsPerComponent" => 8,
            },
            alpha,
        );
        smask
            .compress()
            .map_err(|e| SignError::Image(e.to_string()))?;
        let smask_id = doc.add_object(smask);
        dict.set("SMask", Object::Reference(smask_id));
    }

    let mut stream = Stream::new(dict, rgb);
    stream
        .compress()
        .map_err(|e| SignError::Image(e.to_string()))?;
    Ok(stream)
}

#[cfg(test)]
mod tests {
    use std::io::Cursor;

    use super::*;

    fn pdf_with_pages(count: usize) -> Vec<u8> {
        let mut doc = Document::with_version("1.5");
        let pages_id = doc.new_object_id();
        let mut kids = Vec::new();
        for _ in 0..count {
            let content_id = doc.add_object(Stream::new(dictionary! {}, b"BT ET".to_vec()));
            let page_id = doc.add_object(dictionary! {
                "Type" => "Page",
                "Parent" => pages_id,
                "Contents" => content_id,
                "MediaBox" => vec![0.into(), 0.into(), 595.into(), 842.into()],
            });
            kids.push(Object::Reference(page_id));
        }
        doc.objects.insert(
            pages_id,
            Object::Dictionary(dictionary! {
                "Type" => "Pages",
                "Kids" => kids,
                "Count" => count as i64,
            }),
        );
        let catalog_id = doc.add_object(dictionary! {
            "Type" => "Catalog",
            "Pages" => pages_id,
        });
        doc.trailer.set("Root", catalog_id);
        let mut out = Vec::new();
        doc.save_to(&mut out).unwrap();
        out
    }

    fn png(transparent: bool) -> Vec<u8> {
        let alpha = if transparent { 0 } else { 255 };
        let img = image::RgbaImage::from_pixel(4, 2, image::Rgba([10, 20, 30, alpha]));
        let mut out = Cursor::new(Vec::new());
        img.write_to(&mut out, image::ImageFormat::Png).unwrap();
        out.into_inner()
    }

    const RECT: SignatureRect = SignatureRect {
        x: 100.0,
        y: 100.0,
        width: 150.0,
        height: 50.0,
    };

    #[test]
    fn format_from_extension() {
        assert_eq!(
            SignatureFormat::from_path(Path::new("sig.PNG")).unwrap(),
            SignatureFormat::Png
        );
        assert_eq!(
            SignatureFormat::from_path(Path::new("sig.jpeg")).unwrap(),
            SignatureFormat::Jpeg
        );
        assert!(SignatureFormat::from_path(Path::new("sig.bmp")).is_err());
    }

    #[test]
    fn stamps_last_page_only() {
        let signed = LopdfSigner
            .sign(&pdf_with_pages(2), &png(false), SignatureFormat::Png, RECT)
            .unwrap();

        let doc = Document::load_mem(&signed).unwrap();
        let pages: Vec<_> = doc.get_pages().into_values().collect();
        assert_eq!(pages.len(), 2);

        let first = doc.get_page_content(pages[0]).unwrap();
        let last = doc.get_page_content(pages[1]).unwrap();
        let needle = format!("/{SIGNATURE_XOBJECT} Do");
        assert!(!String::from_utf8_lossy(&first).contains(&needle));
        let last = String::from_utf8_lossy(&last).to_string();
        assert!(last.contains(&needle));
        assert!(last.contains("150 0 0 50 100 100 cm"));
    }

    #[test]
    fn transparent_png_gets_soft_mask() {
        let signed = LopdfSigner
            .sign(&pdf_with_pages(1), &png(true), SignatureFormat::Png, RECT)
            .unwrap();
        let doc = Document::load_mem(&signed).unwrap();
        let has_smask = doc.objects.values().any(|obj| {
            obj.as_stream()
                .map(|s| s.dict.has(b"SMask"))
                .unwrap_or(false)
        });
        assert!(has_smask);
    }

    #[test]
    fn zero_pages_is_an_error() {
        let err = LopdfSigner
            .sign(&pdf_with_pages(0), &png(false), SignatureFormat::Png, RECT)
            .unwrap_err();
        assert!(matches!(err, SignError::NoPages));
    }

    #[test]
    fn malformed_pdf_is_an_error() {
        let err = LopdfSigner
            .sign(b"not a pdf", &png(false), SignatureFormat::Png, RECT)
            .unwrap_err();
        assert!(matches!(err, SignError::Malformed(_)));
    }

    #[test]
    fn bad_image_is_an_error() {
        let err = LopdfSigner
            .sign(&pdf_with_pages(1), b"nope", SignatureFormat::Png, RECT)
            .unwrap_err();
        assert!(matches!(err, SignError::Image(_)));
    }
}
