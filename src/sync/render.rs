use lopdf::content::{Content, Operation};
use lopdf::{Dictionary, Document, Object, Stream};
use std::io::Cursor;
use std::path::{Path, PathBuf};
use thiserror::Error;
use uuid::Uuid;

#[derive(Error, Debug)]
pub enum MaterializeError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Image error in {path}: {source}")]
    Image {
        path: PathBuf,
        #[source]
        source: image::ImageError,
    },
    #[error("PDF error: {0}")]
    Pdf(#[from] lopdf::Error),
    #[error("Rendered archive contains no page images")]
    EmptyArchive,
}

/// Turns a rendered-pages archive into a document on disk
pub trait Materializer: Send + Sync {
    fn materialize(&self, archive: &[u8], destination: &Path) -> Result<(), MaterializeError>;
}

/// Extracts the page images of a render archive and writes them out as one PDF
pub struct DocumentMaterializer {
    extraction_dir: PathBuf,
}

impl DocumentMaterializer {
    pub fn new(extraction_dir: PathBuf) -> Self {
        Self { extraction_dir }
    }
}

impl Materializer for DocumentMaterializer {
    fn materialize(&self, archive: &[u8], destination: &Path) -> Result<(), MaterializeError> {
        let scratch = self.extraction_dir.join(Uuid::new_v4().to_string());
        std::fs::create_dir_all(&scratch)?;

        let result = extract_page_images(archive, &scratch)
            .and_then(|images| convert_to_pdf(&images))
            .and_then(|pdf| write_document(&pdf, destination));

        if let Err(e) = std::fs::remove_dir_all(&scratch) {
            log::warn!("Failed to remove scratch images {}: {}", scratch.display(), e);
        }
        result
    }
}

/// Extract the `.png` members of a tar archive into `dir`, in archive order
pub fn extract_page_images(archive: &[u8], dir: &Path) -> Result<Vec<PathBuf>, MaterializeError> {
    log::info!("Extracting notebook archive ({} bytes)", archive.len());
    let mut archive = tar::Archive::new(Cursor::new(archive));
    let mut images = Vec::new();

    for entry_result in archive.entries()? {
        let mut entry = entry_result?;
        let path = entry.path()?.to_path_buf();

        let is_png = path
            .extension()
            .map(|e| e.to_string_lossy().eq_ignore_ascii_case("png"))
            .unwrap_or(false);
        if !is_png {
            continue;
        }

        // Flatten: members are written by file name only
        let Some(file_name) = path.file_name() else {
            continue;
        };
        let target = dir.join(format!("{:04}-{}", images.len(), file_name.to_string_lossy()));
        entry.unpack(&target)?;
        images.push(target);
    }

    if images.is_empty() {
        return Err(MaterializeError::EmptyArchive);
    }
    Ok(images)
}

/// One PDF page per image, each page sized to its image
pub fn convert_to_pdf(images: &[PathBuf]) -> Result<Vec<u8>, MaterializeError> {
    log::info!("Converting {} page image(s) to PDF", images.len());
    if images.is_empty() {
        return Err(MaterializeError::EmptyArchive);
    }

    let mut doc = Document::with_version("1.5");
    let pages_id = doc.new_object_id();
    let mut kids = Vec::with_capacity(images.len());

    for image_path in images {
        let rgb = image::open(image_path)
            .map_err(|source| MaterializeError::Image {
                path: image_path.clone(),
                source,
            })?
            .to_rgb8();
        let width = i64::from(rgb.width());
        let height = i64::from(rgb.height());

        let mut image_dict = Dictionary::new();
        image_dict.set("Type", Object::Name(b"XObject".to_vec()));
        image_dict.set("Subtype", Object::Name(b"Image".to_vec()));
        image_dict.set("Width", Object::Integer(width));
        image_dict.set("Height", Object::Integer(height));
        image_dict.set("ColorSpace", Object::Name(b"DeviceRGB".to_vec()));
        image_dict.set("BitsPerComponent", Object::Integer(8));
        let mut image_stream = Stream::new(image_dict, rgb.into_raw());
        image_stream.compress()?;
        let image_id = doc.add_object(image_stream);

        let content = Content {
            operations: vec![
                Operation::new("q", vec![]),
                Operation::new(
                    "cm",
                    vec![
                        Object::Integer(width),
                        Object::Integer(0),
                        Object::Integer(0),
                        Object::Integer(height),
                        Object::Integer(0),
                        Object::Integer(0),
                    ],
                ),
                Operation::new("Do", vec![Object::Name(b"Im0".to_vec())]),
                Operation::new("Q", vec![]),
            ],
        };
        let content_id = doc.add_object(Stream::new(Dictionary::new(), content.encode()?));

        let mut xobjects = Dictionary::new();
        xobjects.set("Im0", Object::Reference(image_id));
        let mut resources = Dictionary::new();
        resources.set("XObject", Object::Dictionary(xobjects));

        let mut page = Dictionary::new();
        page.set("Type", Object::Name(b"Page".to_vec()));
        page.set("Parent", Object::Reference(pages_id));
        page.set(
            "MediaBox",
            Object::Array(vec![
                Object::Integer(0),
                Object::Integer(0),
                Object::Integer(width),
                Object::Integer(height),
            ]),
        );
        page.set("Resources", Object::Dictionary(resources));
        page.set("Contents", Object::Reference(content_id));
        kids.push(Object::Reference(doc.add_object(page)));
    }

    let mut pages = Dictionary::new();
    pages.set("Type", Object::Name(b"Pages".to_vec()));
    pages.set("Count", Object::Integer(kids.len() as i64));
    pages.set("Kids", Object::Array(kids));
    doc.objects.insert(pages_id, Object::Dictionary(pages));

    let mut catalog = Dictionary::new();
    catalog.set("Type", Object::Name(b"Catalog".to_vec()));
    catalog.set("Pages", Object::Reference(pages_id));
    let catalog_id = doc.add_object(catalog);
    doc.trailer.set("Root", Object::Reference(catalog_id));

    let mut out = Vec::new();
    doc.save_to(&mut out)?;
    Ok(out)
}

/// Write next to the destination, then rename into place
fn write_document(pdf: &[u8], destination: &Path) -> Result<(), MaterializeError> {
    log::info!("Writing {}", destination.display());
    if let Some(parent) = destination.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let tmp = destination.with_extension("pdf.part");
    std::fs::write(&tmp, pdf)?;
    std::fs::rename(&tmp, destination)?;
    Ok(())
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use tempfile::TempDir;

    /// A tar archive with `pages` small PNGs and one non-image member
    pub(crate) fn page_archive(pages: usize) -> Vec<u8> {
        let temp = TempDir::new().unwrap();
        let mut builder = tar::Builder::new(Vec::new());
        for i in 0..pages {
            let path = temp.path().join(format!("{}.png", i));
            let shade = (i * 40 % 255) as u8;
            image::RgbImage::from_pixel(8 + i as u32, 12, image::Rgb([shade, shade, shade]))
                .save(&path)
                .unwrap();
            builder
                .append_path_with_name(&path, format!("pages/{}.png", i))
                .unwrap();
        }
        let manifest = temp.path().join("manifest.json");
        std::fs::write(&manifest, "{}").unwrap();
        builder.append_path_with_name(&manifest, "manifest.json").unwrap();
        builder.into_inner().unwrap()
    }

    #[test]
    fn test_extract_keeps_archive_order_and_skips_non_images() {
        let temp = TempDir::new().unwrap();
        let images = extract_page_images(&page_archive(3), temp.path()).unwrap();

        assert_eq!(images.len(), 3);
        assert!(images[0].ends_with("0000-0.png"));
        assert!(images[2].ends_with("0002-2.png"));
        assert!(images.iter().all(|p| p.exists()));
    }

    #[test]
    fn test_extract_empty_archive_fails() {
        let temp = TempDir::new().unwrap();
        let result = extract_page_images(&page_archive(0), temp.path());
        assert!(matches!(result, Err(MaterializeError::EmptyArchive)));
    }

    #[test]
    fn test_convert_produces_one_page_per_image() {
        let temp = TempDir::new().unwrap();
        let images = extract_page_images(&page_archive(2), temp.path()).unwrap();
        let pdf = convert_to_pdf(&images).unwrap();

        let doc = Document::load_mem(&pdf).unwrap();
        assert_eq!(doc.get_pages().len(), 2);
    }

    #[test]
    fn test_materialize_writes_pdf_and_cleans_scratch() {
        let temp = TempDir::new().unwrap();
        let extraction = temp.path().join("extraction");
        let destination = temp.path().join("mirror").join("Work").join("Plans.pdf");
        let materializer = DocumentMaterializer::new(extraction.clone());

        materializer.materialize(&page_archive(1), &destination).unwrap();

        let bytes = std::fs::read(&destination).unwrap();
        assert!(bytes.starts_with(b"%PDF"));
        assert!(!destination.with_extension("pdf.part").exists());
        assert_eq!(std::fs::read_dir(&extraction).unwrap().count(), 0);
    }

    #[test]
    fn test_materialize_bad_archive_leaves_no_file() {
        let temp = TempDir::new().unwrap();
        let destination = temp.path().join("out.pdf");
        let materializer = DocumentMaterializer::new(temp.path().join("extraction"));

        assert!(materializer.materialize(&page_archive(0), &destination).is_err());
        assert!(!destination.exists());
    }
}
