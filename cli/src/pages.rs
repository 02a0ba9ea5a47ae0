//! Loading page images from a directory.

use std::fs;
use std::path::{Path, PathBuf};

use docqa::{Document, Page};

/// PNG files in `dir`, in file-name order.
pub fn page_images(dir: &Path) -> Result<Vec<PathBuf>, Box<dyn std::error::Error>> {
    let mut paths: Vec<PathBuf> = fs::read_dir(dir)?
        .filter_map(|entry| entry.ok().map(|e| e.path()))
        .filter(|p| {
            p.extension()
                .and_then(|e| e.to_str())
                .is_some_and(|e| e.eq_ignore_ascii_case("png"))
        })
        .collect();
    paths.sort_by_key(|p| natural_key(p));
    Ok(paths)
}

/// Sort key treating the first digit run as a number, so `page-10` follows `page-9`.
fn natural_key(path: &Path) -> (String, u64, String) {
    let name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    let start = name.find(|c: char| c.is_ascii_digit());
    match start {
        Some(start) => {
            let digits: String = name[start..].chars().take_while(|c| c.is_ascii_digit()).collect();
            let number = digits.parse().unwrap_or(u64::MAX);
            (name[..start].to_string(), number, name)
        }
        None => (name.clone(), 0, name),
    }
}

/// Attach the images in `dir` to the document's pages in order.
///
/// Images beyond the last page become empty pages; pages beyond the last
/// image keep no bitmap.
pub fn attach_page_images(document: Document, dir: &Path) -> Result<Document, Box<dyn std::error::Error>> {
    let images = page_images(dir)?;
    if images.is_empty() {
        return Err(format!("no PNG page images in {}", dir.display()).into());
    }

    let mut pages = document.pages;
    for (index, path) in images.iter().enumerate() {
        let bitmap = image::open(path)
            .map_err(|e| format!("{}: {}", path.display(), e))?
            .to_luma8();
        match pages.get_mut(index) {
            Some(page) => {
                *page = page.clone().with_bitmap(bitmap);
            }
            None => pages.push(Page::new(index as u32 + 1, "").with_bitmap(bitmap)),
        }
    }
    log::debug!("attached {} page image(s) from {}", images.len(), dir.display());

    Ok(Document::from_pages(pages).with_metadata(document.metadata))
}
