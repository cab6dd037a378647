use axum::extract::Multipart;
use bytes::Bytes;
use chrono::Utc;
use futures::future::try_join_all;
use image::{codecs::jpeg::JpegEncoder, imageops::FilterType};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use thiserror::Error;
use uuid::Uuid;

pub const TOUR_IMAGE_SIZE: (u32, u32) = (2000, 1333);
pub const USER_PHOTO_SIZE: (u32, u32) = (500, 500);
pub const JPEG_QUALITY: u8 = 90;

/// `(field, max files)` accepted on a tour update
pub const TOUR_IMAGE_FIELDS: &[(&str, usize)] = &[("imageCover", 1), ("images", 3)];
pub const USER_PHOTO_FIELDS: &[(&str, usize)] = &[("photo", 1)];

#[derive(Debug, Error)]
pub enum UploadError {
    #[error("Not an image")]
    NotAnImage,

    #[error("Too many files for field {0}")]
    TooManyFiles(String),

    #[error("{0}")]
    Multipart(String),

    #[error("Image processing failed: {0}")]
    Image(#[from] image::ImageError),

    #[error("Failed to store image: {0}")]
    Io(#[from] std::io::Error),

    #[error("Image worker failed: {0}")]
    Join(#[from] tokio::task::JoinError),
}

#[derive(Debug, Clone)]
pub struct UploadedFile {
    pub field: String,
    pub bytes: Bytes,
}

/// Text fields and image files of a multipart body
#[derive(Debug, Default)]
pub struct MultipartForm {
    pub fields: HashMap<String, String>,
    pub files: Vec<UploadedFile>,
}

impl MultipartForm {
    pub fn files_for(&self, field: &str) -> Vec<&UploadedFile> {
        self.files.iter().filter(|f| f.field == field).collect()
    }
}

/// Buffers a multipart body in memory. Files are only accepted on the
/// listed fields, up to their count, and only with an `image/*` type.
pub async fn read_multipart(mut multipart: Multipart, file_fields: &[(&str, usize)]) -> Result<MultipartForm, UploadError> {
    let mut form = MultipartForm::default();
    let mut counts: HashMap<String, usize> = HashMap::new();

    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| UploadError::Multipart(e.body_text()))?
    {
        let name = field.name().unwrap_or_default().to_string();
        let is_file = field.file_name().is_some();

        if !is_file {
            let value = field.text().await.map_err(|e| UploadError::Multipart(e.body_text()))?;
            form.fields.insert(name, value);
            continue;
        }

        let max = file_fields
            .iter()
            .find(|(f, _)| *f == name)
            .map(|(_, max)| *max)
            .ok_or_else(|| UploadError::TooManyFiles(name.clone()))?;
        let count = counts.entry(name.clone()).or_default();
        *count += 1;
        if *count > max {
            return Err(UploadError::TooManyFiles(name));
        }

        if !field.content_type().map(|ct| ct.starts_with("image")).unwrap_or(false) {
            return Err(UploadError::NotAnImage);
        }
        let bytes = field.bytes().await.map_err(|e| UploadError::Multipart(e.body_text()))?;
        form.files.push(UploadedFile { field: name, bytes });
    }

    Ok(form)
}

/// Decodes, crops to fill `width`×`height`, and encodes as JPEG.
pub fn resize_to_jpeg(bytes: &[u8], width: u32, height: u32) -> Result<Vec<u8>, UploadError> {
    let image = image::load_from_memory(bytes)?;
    let resized = image.resize_to_fill(width, height, FilterType::Lanczos3).to_rgb8();
    let mut out = Vec::new();
    JpegEncoder::new_with_quality(&mut out, JPEG_QUALITY).encode_image(&resized)?;
    Ok(out)
}

async fn store_resized(bytes: Bytes, (width, height): (u32, u32), path: PathBuf) -> Result<(), UploadError> {
    let jpeg = tokio::task::spawn_blocking(move || resize_to_jpeg(&bytes, width, height)).await??;
    tokio::fs::write(&path, jpeg).await?;
    tracing::debug!("Stored image {}", path.display());
    Ok(())
}

/// Filenames written for a tour update
#[derive(Debug, Default, Clone, PartialEq)]
pub struct TourImages {
    pub image_cover: Option<String>,
    pub images: Option<Vec<String>>,
}

/// Writes the cover and gallery under `<upload_dir>/img/tours`; the gallery
/// files are resized concurrently.
pub async fn process_tour_images(form: &MultipartForm, tour_id: Uuid, upload_dir: &Path) -> Result<TourImages, UploadError> {
    let dir = upload_dir.join("img").join("tours");
    let millis = Utc::now().timestamp_millis();
    let mut result = TourImages::default();

    let cover = form.files_for("imageCover");
    let gallery = form.files_for("images");
    if cover.is_empty() && gallery.is_empty() {
        return Ok(result);
    }
    tokio::fs::create_dir_all(&dir).await?;

    if let Some(file) = cover.first() {
        let filename = format!("tour-{}-{}-cover.jpeg", tour_id, millis);
        store_resized(file.bytes.clone(), TOUR_IMAGE_SIZE, dir.join(&filename)).await?;
        result.image_cover = Some(filename);
    }

    if !gallery.is_empty() {
        let filenames: Vec<String> = (1..=gallery.len())
            .map(|n| format!("tour-{}-{}-{}.jpeg", tour_id, millis, n))
            .collect();
        try_join_all(
            gallery
                .iter()
                .zip(&filenames)
                .map(|(file, filename)| store_resized(file.bytes.clone(), TOUR_IMAGE_SIZE, dir.join(filename))),
        )
        .await?;
        result.images = Some(filenames);
    }

    Ok(result)
}

/// Writes the profile photo under `<upload_dir>/img/users`
pub async fn process_user_photo(form: &MultipartForm, user_id: Uuid, upload_dir: &Path) -> Result<Option<String>, UploadError> {
    let file = match form.files_for("photo").first() {
        Some(file) => (*file).clone(),
        None => return Ok(None),
    };
    let dir = upload_dir.join("img").join("users");
    tokio::fs::create_dir_all(&dir).await?;

    let filename = format!("user-{}-{}.jpeg", user_id, Utc::now().timestamp_millis());
    store_resized(file.bytes, USER_PHOTO_SIZE, dir.join(&filename)).await?;
    Ok(Some(filename))
}
