//! Build the visitor list from the store.

use crate::store::{StorageError, VisitorFolder, VisitorStore};
use crate::types::{Thumbnail, Visitor};
use image::imageops::FilterType;
use std::path::Path;

pub const DEFAULT_THUMBNAIL_WIDTH: u32 = 200;

/// Photos taller than this many widths are refused as thumbnails.
pub const MAX_THUMBNAIL_ASPECT: u32 = 4;

/// Scan every visitor folder into a fresh list, in store order.
///
/// Fails only if the store root cannot be enumerated. A visitor whose photos
/// cannot be listed or decoded is kept without a thumbnail.
pub fn scan_visitors(store: &dyn VisitorStore, display_width: u32) -> Result<Vec<Visitor>, StorageError> {
    let folders = store.visitor_folders()?;
    let visitors: Vec<Visitor> = folders
        .into_iter()
        .map(|folder| scan_one(store, folder, display_width))
        .collect();
    tracing::debug!(count = visitors.len(), "scanned visitors");
    Ok(visitors)
}

fn scan_one(store: &dyn VisitorStore, folder: VisitorFolder, display_width: u32) -> Visitor {
    let photos = store.photos(&folder).unwrap_or_else(|e| {
        tracing::warn!(visitor = %folder.name, error = %e, "cannot list visitor photos");
        Vec::new()
    });

    let thumbnail = photos.first().and_then(|first| match load_thumbnail(store, first, display_width) {
        Ok(t) => Some(t),
        Err(e) => {
            tracing::warn!(visitor = %folder.name, error = %e, "thumbnail unavailable");
            None
        }
    });

    Visitor {
        name: folder.name,
        image_folder: folder.path,
        thumbnail,
        display_width,
        photo_count: photos.len(),
    }
}

fn load_thumbnail(store: &dyn VisitorStore, path: &Path, width: u32) -> Result<Thumbnail, StorageError> {
    let bytes = store.read_photo(path)?;
    let decoded = image::load_from_memory(&bytes).map_err(|e| StorageError::Decode {
        path: path.to_path_buf(),
        message: e.to_string(),
    })?;

    let (src_w, src_h) = (decoded.width().max(1), decoded.height());
    if src_h > src_w.saturating_mul(MAX_THUMBNAIL_ASPECT) {
        return Err(StorageError::Decode {
            path: path.to_path_buf(),
            message: format!("{src_w}x{src_h} photo is too tall for a thumbnail"),
        });
    }

    let width = width.max(1);
    let max_height = width.saturating_mul(MAX_THUMBNAIL_ASPECT);
    let height = (u64::from(src_h) * u64::from(width) / u64::from(src_w)).clamp(1, u64::from(max_height));
    let height = u32::try_from(height).unwrap_or(max_height);
    let image = decoded.resize_exact(width, height, FilterType::Triangle).to_rgb8();

    Ok(Thumbnail {
        source: path.to_path_buf(),
        image,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::FolderStore;
    use image::{ImageFormat, RgbImage};
    use std::io::Cursor;

    fn jpeg(width: u32, height: u32) -> Vec<u8> {
        let img = RgbImage::from_fn(width, height, |x, y| image::Rgb([x as u8, y as u8, 90]));
        let mut out = Cursor::new(Vec::new());
        img.write_to(&mut out, ImageFormat::Jpeg).unwrap();
        out.into_inner()
    }

    fn write_photo(store: &FolderStore, visitor: &str, file: &str, bytes: &[u8]) {
        std::fs::write(store.root().join(visitor).join(file), bytes).unwrap();
    }

    #[test]
    fn test_scan_two_visitors() {
        let dir = tempfile::tempdir().unwrap();
        let store = FolderStore::open(dir.path()).unwrap();
        store.create_visitor("Alice").unwrap();
        store.create_visitor("Bob").unwrap();
        write_photo(&store, "Bob", "img1.jpg", &jpeg(100, 50));
        write_photo(&store, "Bob", "img2.jpg", &jpeg(40, 40));

        let visitors = scan_visitors(&store, 200).unwrap();
        assert_eq!(visitors.len(), 2);

        let alice = &visitors[0];
        assert_eq!(alice.name, "Alice");
        assert!(alice.thumbnail.is_none());
        assert_eq!(alice.photo_count, 0);

        let bob = &visitors[1];
        assert_eq!(bob.name, "Bob");
        assert_eq!(bob.photo_count, 2);
        assert_eq!(bob.image_folder, store.root().join("Bob"));
        let thumb = bob.thumbnail.as_ref().unwrap();
        assert_eq!(thumb.source, store.root().join("Bob").join("img1.jpg"));
        assert_eq!(thumb.image.dimensions(), (200, 100));
        assert_eq!(bob.display_width, 200);
    }

    #[test]
    fn test_scan_is_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        let store = FolderStore::open(dir.path()).unwrap();
        store.create_visitor("Alice").unwrap();
        write_photo(&store, "Alice", "a.jpg", &jpeg(30, 60));

        let first = scan_visitors(&store, 120).unwrap();
        let second = scan_visitors(&store, 120).unwrap();
        assert_eq!(first, second);
    }

    #[test]
    fn test_undecodable_photo_degrades_entry() {
        let dir = tempfile::tempdir().unwrap();
        let store = FolderStore::open(dir.path()).unwrap();
        store.create_visitor("Alice").unwrap();
        store.create_visitor("Bob").unwrap();
        write_photo(&store, "Alice", "broken.jpg", b"not a jpeg");
        write_photo(&store, "Bob", "ok.jpg", &jpeg(20, 20));

        let visitors = scan_visitors(&store, 50).unwrap();
        assert_eq!(visitors.len(), 2);
        assert!(visitors[0].thumbnail.is_none());
        assert_eq!(visitors[0].photo_count, 1);
        assert!(visitors[1].thumbnail.is_some());
    }

    #[test]
    fn test_extreme_aspect_ratio_degrades_entry() {
        let dir = tempfile::tempdir().unwrap();
        let store = FolderStore::open(dir.path()).unwrap();
        store.create_visitor("Alice").unwrap();
        store.create_visitor("Bob").unwrap();
        write_photo(&store, "Alice", "sliver.jpg", &jpeg(1, 3000));
        write_photo(&store, "Bob", "tall.jpg", &jpeg(50, 200));

        let visitors = scan_visitors(&store, 200).unwrap();
        assert!(visitors[0].thumbnail.is_none());
        assert_eq!(visitors[0].photo_count, 1);

        let tall = visitors[1].thumbnail.as_ref().unwrap();
        assert_eq!(tall.image.dimensions(), (200, 800));
    }

    #[test]
    fn test_missing_root_fails() {
        let dir = tempfile::tempdir().unwrap();
        let store = FolderStore::open(dir.path()).unwrap();
        std::fs::remove_dir_all(store.root()).unwrap();
        assert!(matches!(scan_visitors(&store, 50), Err(StorageError::Io { .. })));
    }
}
