use crate::error::IngestError;
use crate::models::ChunkMetadata;
use lopdf::Document;
use std::path::{Path, PathBuf};
use tracing::debug;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PageText {
    pub number: u32,
    pub text: String,
}

/// Raw text of one page plus the file it came from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExtractedPage {
    pub path: PathBuf,
    pub text: String,
    pub metadata: ChunkMetadata,
}

pub trait PdfExtractor: Send + Sync {
    /// Returns every page of the document in order, numbered from 1.
    fn extract_pages(&self, path: &Path) -> Result<Vec<PageText>, IngestError>;
}

#[derive(Debug, Default, Clone, Copy)]
pub struct LopdfExtractor;

impl PdfExtractor for LopdfExtractor {
    fn extract_pages(&self, path: &Path) -> Result<Vec<PageText>, IngestError> {
        let document = Document::load(path).map_err(|error| {
            IngestError::PdfParse(format!("{}: {error}", path.display()))
        })?;

        let mut pages = Vec::new();
        for (index, (page_no, _page_id)) in document.get_pages().into_iter().enumerate() {
            let text = document.extract_text(&[page_no]).map_err(|error| {
                IngestError::PdfParse(format!("{} page {page_no}: {error}", path.display()))
            })?;

            pages.push(PageText {
                number: (index + 1) as u32,
                text,
            });
        }

        if pages.is_empty() {
            return Err(IngestError::PdfParse(format!(
                "pdf has no pages: {}",
                path.display()
            )));
        }

        Ok(pages)
    }
}

pub fn extract_page_texts(path: &Path) -> Result<Vec<PageText>, IngestError> {
    LopdfExtractor.extract_pages(path)
}

/// `《stem》`, the bracketed title used as the `file` metadata of a page.
pub fn display_name(path: &Path) -> Result<String, IngestError> {
    let stem = path
        .file_stem()
        .and_then(|stem| stem.to_str())
        .ok_or_else(|| IngestError::MissingFileName(path.display().to_string()))?;
    Ok(format!("《{stem}》"))
}

/// Extracts all pages of all given files. The first unreadable file aborts the batch.
pub fn extract_files(
    extractor: &dyn PdfExtractor,
    files: &[PathBuf],
) -> Result<Vec<ExtractedPage>, IngestError> {
    let mut extracted = Vec::new();

    for path in files {
        let file = display_name(path)?;
        let pages = extractor.extract_pages(path)?;
        debug!(path = %path.display(), pages = pages.len(), "extracted pdf");

        extracted.extend(pages.into_iter().map(|page| ExtractedPage {
            path: path.clone(),
            text: page.text,
            metadata: ChunkMetadata {
                file: file.clone(),
                page: page.number,
            },
        }));
    }

    Ok(extracted)
}

#[cfg(test)]
pub(crate) mod test_pdf {
    use lopdf::content::{Content, Operation};
    use lopdf::{dictionary, Document, Object, Stream};
    use std::path::Path;

    /// Writes a PDF with one Courier text line per page.
    pub(crate) fn write_pdf(path: &Path, pages: &[&str]) -> Result<(), Box<dyn std::error::Error>> {
        let mut doc = Document::with_version("1.5");
        let pages_id = doc.new_object_id();
        let font_id = doc.add_object(dictionary! {
            "Type" => "Font",
            "Subtype" => "Type1",
            "BaseFont" => "Courier",
        });
        let resources_id = doc.add_object(dictionary! {
            "Font" => dictionary! { "F1" => font_id },
        });

        let mut kids: Vec<Object> = Vec::new();
        for line in pages {
            let content = Content {
                operations: vec![
                    Operation::new("BT", vec![]),
                    Operation::new("Tf", vec!["F1".into(), 24.into()]),
                    Operation::new("Td", vec![72.into(), 700.into()]),
                    Operation::new("Tj", vec![Object::string_literal(*line)]),
                    Operation::new("ET", vec![]),
                ],
            };
            let content_id = doc.add_object(Stream::new(dictionary! {}, content.encode()?));
            let page_id = doc.add_object(dictionary! {
                "Type" => "Page",
                "Parent" => pages_id,
                "Contents" => content_id,
                "Resources" => resources_id,
            });
            kids.push(page_id.into());
        }

        let count = kids.len() as i64;
        doc.objects.insert(
            pages_id,
            Object::Dictionary(dictionary! {
                "Type" => "Pages",
                "Kids" => kids,
                "Count" => count,
                "MediaBox" => vec![0.into(), 0.into(), 595.into(), 842.into()],
            }),
        );
        let catalog_id = doc.add_object(dictionary! {
            "Type" => "Catalog",
            "Pages" => pages_id,
        });
        doc.trailer.set("Root", catalog_id);
        doc.save(path)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::test_pdf::write_pdf;
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn one_record_per_page_numbered_from_one() -> Result<(), Box<dyn std::error::Error>> {
        let dir = tempdir()?;
        let path = dir.path().join("3-notes.pdf");
        write_pdf(&path, &["Hello first page", "Second page", "Third page"])?;

        let pages = LopdfExtractor.extract_pages(&path)?;
        let numbers = pages.iter().map(|page| page.number).collect::<Vec<_>>();
        assert_eq!(numbers, vec![1, 2, 3]);
        assert!(pages[0].text.contains("Hello"));
        Ok(())
    }

    #[test]
    fn metadata_restarts_page_numbers_per_file() -> Result<(), Box<dyn std::error::Error>> {
        let dir = tempdir()?;
        let first = dir.path().join("a.pdf");
        let second = dir.path().join("b.pdf");
        write_pdf(&first, &["one", "two"])?;
        write_pdf(&second, &["three"])?;

        let pages = extract_files(&LopdfExtractor, &[first, second])?;
        let records = pages
            .iter()
            .map(|page| (page.metadata.file.as_str(), page.metadata.page))
            .collect::<Vec<_>>();
        assert_eq!(records, vec![("《a》", 1), ("《a》", 2), ("《b》", 1)]);
        Ok(())
    }

    #[test]
    fn corrupt_file_aborts_the_batch() -> Result<(), Box<dyn std::error::Error>> {
        let dir = tempdir()?;
        let good = dir.path().join("good.pdf");
        let broken = dir.path().join("broken.pdf");
        write_pdf(&good, &["fine"])?;
        std::fs::write(&broken, b"%PDF-1.4\n%broken")?;

        let result = extract_files(&LopdfExtractor, &[good, broken]);
        assert!(matches!(result, Err(IngestError::PdfParse(_))));
        Ok(())
    }

    #[test]
    fn display_name_brackets_the_stem() -> Result<(), Box<dyn std::error::Error>> {
        let name = display_name(Path::new("/notes/1-大模型（LLMs）基础面.pdf"))?;
        assert_eq!(name, "《1-大模型（LLMs）基础面》");
        Ok(())
    }
}
