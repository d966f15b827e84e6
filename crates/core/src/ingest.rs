use crate::chunking::TextSplitter;
use crate::cleaner::TextCleaner;
use crate::extractor::{extract_files, PdfExtractor};
use crate::models::{DocumentChunk, PageDocument};
use crate::IngestError;
use std::path::{Path, PathBuf};
use tracing::info;
use walkdir::WalkDir;

/// Every `.pdf` under `folder`, sorted. A missing root or an unreadable
/// subdirectory fails the whole walk.
pub fn discover_pdf_files(folder: &Path) -> Result<Vec<PathBuf>, IngestError> {
    let mut files = Vec::new();

    for item in WalkDir::new(folder) {
        let entry = item.map_err(|error| walk_error(folder, error))?;
        if !entry.file_type().is_file() {
            continue;
        }

        let is_pdf = entry
            .path()
            .extension()
            .and_then(|ext| ext.to_str())
            .is_some_and(|ext| ext.eq_ignore_ascii_case("pdf"));

        if is_pdf {
            files.push(entry.path().to_path_buf());
        }
    }

    files.sort_unstable();
    Ok(files)
}

fn walk_error(folder: &Path, error: walkdir::Error) -> IngestError {
    if error.io_error().is_some() {
        return IngestError::Io(std::io::Error::from(error));
    }
    // Symlink loops carry no io error.
    IngestError::InvalidArgument(format!("cannot walk {}: {error}", folder.display()))
}

#[derive(Debug, Clone, Default)]
pub struct LoadedDocuments {
    pub files: usize,
    pub pages: usize,
    pub chunks: Vec<DocumentChunk>,
}

/// Extract, clean and split every PDF under `folder`.
pub fn load_documents(
    folder: &Path,
    extractor: &dyn PdfExtractor,
    cleaner: &TextCleaner,
    splitter: &TextSplitter,
) -> Result<LoadedDocuments, IngestError> {
    let files = discover_pdf_files(folder)?;

    if files.is_empty() {
        return Err(IngestError::InvalidArgument(format!(
            "no pdf files found in {}",
            folder.display()
        )));
    }

    let extracted = extract_files(extractor, &files)?;
    let pages = extracted
        .into_iter()
        .map(|page| PageDocument {
            text: cleaner.clean(&page.text, &page.path),
            metadata: page.metadata,
        })
        .collect::<Vec<_>>();

    let chunks = splitter.split_documents(&pages);
    info!(
        files = files.len(),
        pages = pages.len(),
        chunks = chunks.len(),
        "parsed notes"
    );

    Ok(LoadedDocuments {
        files: files.len(),
        pages: pages.len(),
        chunks,
    })
}

#[cfg(test)]
mod tests {
    use super::{discover_pdf_files, load_documents};
    use crate::chunking::{SplitterConfig, TextSplitter};
    use crate::cleaner::TextCleaner;
    use crate::extractor::{test_pdf::write_pdf, LopdfExtractor};
    use crate::{IngestError, IngestionOptions};
    use std::fs::{self, File};
    use std::io::Write;
    use tempfile::tempdir;

    #[test]
    fn discover_pdf_files_is_recursive() -> Result<(), Box<dyn std::error::Error>> {
        let dir = tempdir()?;
        let base = dir.path();
        let nested = base.join("nested");
        fs::create_dir(&nested)?;

        File::create(base.join("a.pdf"))
            .and_then(|mut file| file.write_all(b"%PDF-1.4\n%fake"))?;
        File::create(nested.join("b.PDF"))
            .and_then(|mut file| file.write_all(b"%PDF-1.4\n%fake"))?;
        fs::write(base.join("notes.txt"), b"not a pdf")?;

        let files = discover_pdf_files(base)?;
        assert_eq!(files.len(), 2);
        Ok(())
    }

    #[test]
    fn missing_data_folder_is_an_io_error() -> Result<(), Box<dyn std::error::Error>> {
        let dir = tempdir()?;
        let missing = dir.path().join("no-such-folder");

        let result = discover_pdf_files(&missing);
        assert!(matches!(result, Err(IngestError::Io(_))));

        let options = IngestionOptions::default();
        let result = load_documents(
            &missing,
            &LopdfExtractor,
            &TextCleaner::from_options(&options)?,
            &TextSplitter::new(SplitterConfig::from(&options))?,
        );
        assert!(matches!(result, Err(IngestError::Io(_))));
        Ok(())
    }

    #[test]
    fn loading_fails_without_pdfs() -> Result<(), Box<dyn std::error::Error>> {
        let dir = tempdir()?;
        let options = IngestionOptions::default();
        let result = load_documents(
            dir.path(),
            &LopdfExtractor,
            &TextCleaner::from_options(&options)?,
            &TextSplitter::new(SplitterConfig::from(&options))?,
        );
        assert!(matches!(result, Err(IngestError::InvalidArgument(_))));
        Ok(())
    }

    #[test]
    fn loads_chunks_with_page_metadata() -> Result<(), Box<dyn std::error::Error>> {
        let dir = tempdir()?;
        write_pdf(
            &dir.path().join("2-guide.pdf"),
            &["guide Hello from the first page", "Second page body"],
        )?;
        let options = IngestionOptions::default();

        let loaded = load_documents(
            dir.path(),
            &LopdfExtractor,
            &TextCleaner::from_options(&options)?,
            &TextSplitter::new(SplitterConfig::from(&options))?,
        )?;

        assert_eq!(loaded.files, 1);
        assert_eq!(loaded.pages, 2);
        assert!(!loaded.chunks.is_empty());
        assert!(loaded.chunks.iter().all(|chunk| chunk.metadata.file == "《2-guide》"));
        assert!(loaded.chunks.iter().all(|chunk| !chunk.text.contains("guide")));
        Ok(())
    }

    #[test]
    fn unreadable_pdf_aborts_loading() -> Result<(), Box<dyn std::error::Error>> {
        let dir = tempdir()?;
        fs::write(dir.path().join("unreadable.pdf"), b"%PDF-1.4\n%broken")?;
        let options = IngestionOptions::default();

        let result = load_documents(
            dir.path(),
            &LopdfExtractor,
            &TextCleaner::from_options(&options)?,
            &TextSplitter::new(SplitterConfig::from(&options))?,
        );

        assert!(matches!(result, Err(IngestError::PdfParse(_))));
        Ok(())
    }
}
