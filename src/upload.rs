use std::fs;
use std::path::Path;

use uuid::Uuid;

use crate::error::{AppError, AppResult};

pub const ALLOWED_EXTENSIONS: [&str; 3] = ["jpg", "jpeg", "png"];

const JPEG_MAGIC: [u8; 3] = [0xFF, 0xD8, 0xFF];
const PNG_MAGIC: [u8; 8] = [0x89, b'P', b'N', b'G', 0x0D, 0x0A, 0x1A, 0x0A];

/// Validate an uploaded image and return its normalized extension.
///
/// Rejects files over the size ceiling, extensions outside the allow-list,
/// and bodies whose magic bytes do not match the claimed type.
pub fn validate_image(filename: &str, data: &[u8], max_bytes: usize) -> AppResult<String> {
    if data.len() > max_bytes {
        return Err(AppError::Validation("File size exceeds limit".into()));
    }
    if data.is_empty() {
        return Err(AppError::Validation("Empty file".into()));
    }

    let extension = Path::new(filename)
        .extension()
        .and_then(|e| e.to_str())
        .map(str::to_lowercase)
        .unwrap_or_default();
    if !ALLOWED_EXTENSIONS.contains(&extension.as_str()) {
        return Err(AppError::Validation("Invalid file type".into()));
    }

    let magic_ok = match extension.as_str() {
        "jpg" | "jpeg" => data.starts_with(&JPEG_MAGIC),
        "png" => data.starts_with(&PNG_MAGIC),
        _ => false,
    };
    if !magic_ok {
        return Err(AppError::Validation(
            "File contents do not match its type".into(),
        ));
    }

    Ok(extension)
}

/// Store a validated image under a fresh unique name and return that name.
pub fn save_image(
    upload_dir: &str,
    filename: &str,
    data: &[u8],
    max_bytes: usize,
) -> AppResult<String> {
    let extension = validate_image(filename, data, max_bytes)?;
    let stored_name = format!("{}.{extension}", Uuid::new_v4().simple());

    fs::create_dir_all(upload_dir)
        .and_then(|_| fs::write(Path::new(upload_dir).join(&stored_name), data))
        .map_err(|e| {
            error!("failed to store upload {filename:?}: {e}");
            AppError::Validation("Failed to store uploaded file".into())
        })?;

    Ok(stored_name)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn png_bytes() -> Vec<u8> {
        let mut data = PNG_MAGIC.to_vec();
        data.extend_from_slice(&[0u8; 16]);
        data
    }

    fn jpeg_bytes() -> Vec<u8> {
        let mut data = JPEG_MAGIC.to_vec();
        data.extend_from_slice(&[0u8; 16]);
        data
    }

    #[test]
    fn accepts_well_formed_images() {
        assert_eq!(validate_image("photo.png", &png_bytes(), 1024).unwrap(), "png");
        assert_eq!(validate_image("photo.JPG", &jpeg_bytes(), 1024).unwrap(), "jpg");
        assert_eq!(validate_image("a.jpeg", &jpeg_bytes(), 1024).unwrap(), "jpeg");
    }

    #[test]
    fn rejects_oversized_files() {
        let err = validate_image("photo.png", &png_bytes(), 4).unwrap_err();
        assert!(err.to_string().contains("size"));
    }

    #[test]
    fn rejects_disallowed_extensions() {
        assert!(validate_image("shell.php", &png_bytes(), 1024).is_err());
        assert!(validate_image("image.gif", &png_bytes(), 1024).is_err());
        assert!(validate_image("noextension", &png_bytes(), 1024).is_err());
    }

    #[test]
    fn rejects_mismatched_magic_bytes() {
        // PNG body masquerading as a JPEG, and plain text as a PNG.
        assert!(validate_image("photo.jpg", &png_bytes(), 1024).is_err());
        assert!(validate_image("photo.png", b"hello world", 1024).is_err());
    }

    #[test]
    fn saved_file_gets_a_unique_name_with_same_extension() {
        let dir = tempfile::tempdir().unwrap();
        let dir_path = dir.path().to_str().unwrap();

        let a = save_image(dir_path, "photo.png", &png_bytes(), 1024).unwrap();
        let b = save_image(dir_path, "photo.png", &png_bytes(), 1024).unwrap();

        assert_ne!(a, b);
        assert!(a.ends_with(".png"));
        assert!(dir.path().join(&a).exists());
        assert_eq!(fs::read(dir.path().join(&b)).unwrap(), png_bytes());
    }
}
