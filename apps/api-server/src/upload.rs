use crate::error::{ApiError, ApiResult};
use axum::extract::multipart::{Field, Multipart};

/// 10 MB
pub const MAX_UPLOAD_BYTES: usize = 10 * 1024 * 1024;

pub(crate) const MIN_MAX_LENGTH: usize = 2;
pub(crate) const MAX_MAX_LENGTH: usize = 512;

/// Parsed `POST /api/caption` form.
#[derive(Debug)]
pub(crate) struct CaptionForm {
    pub file_name: Option<String>,
    pub image: Vec<u8>,
    pub max_length: Option<usize>,
}

/// Reads the `file` part (and the optional `max_length` part). Checks run
/// before the model sees anything: content type, size cap while streaming,
/// then emptiness.
pub(crate) async fn read_caption_form(
    mut multipart: Multipart,
    max_bytes: usize,
) -> ApiResult<CaptionForm> {
    let mut file: Option<(Option<String>, Vec<u8>)> = None;
    let mut max_length = None;

    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| ApiError::from_multipart(e, max_bytes))?
    {
        match field.name() {
            Some("file") if file.is_none() => {
                let is_image = field
                    .content_type()
                    .is_some_and(|ct| ct.to_ascii_lowercase().starts_with("image/"));
                if !is_image {
                    return Err(ApiError::NotAnImage);
                }

                let file_name = field.file_name().map(str::to_string);
                let image = read_limited(field, max_bytes, max_bytes)
                    .await?
                    .ok_or(ApiError::TooLarge(max_bytes))?;
                file = Some((file_name, image));
            }
            Some("max_length") => {
                let invalid = ApiError::InvalidMaxLength {
                    min: MIN_MAX_LENGTH,
                    max: MAX_MAX_LENGTH,
                };
                let raw = read_limited(field, 16, max_bytes).await?.ok_or(invalid)?;
                max_length = Some(parse_max_length(&raw)?);
            }
            // unknown parts are skipped by the next `next_field`
            _ => {}
        }
    }

    let (file_name, image) = file.ok_or(ApiError::MissingFile)?;
    if image.is_empty() {
        return Err(ApiError::EmptyFile);
    }

    Ok(CaptionForm {
        file_name,
        image,
        max_length,
    })
}

/// `None` once the field grows past `limit`; the rest is not read.
/// `max_bytes` is the upload cap reported when the request body overflows.
async fn read_limited(
    mut field: Field<'_>,
    limit: usize,
    max_bytes: usize,
) -> ApiResult<Option<Vec<u8>>> {
    let mut data = Vec::new();
    while let Some(chunk) = field
        .chunk()
        .await
        .map_err(|e| ApiError::from_multipart(e, max_bytes))?
    {
        if data.len() + chunk.len() > limit {
            return Ok(None);
        }
        data.extend_from_slice(&chunk);
    }
    Ok(Some(data))
}

fn parse_max_length(raw: &[u8]) -> ApiResult<usize> {
    std::str::from_utf8(raw)
        .ok()
        .and_then(|s| s.trim().parse::<usize>().ok())
        .filter(|v| (MIN_MAX_LENGTH..=MAX_MAX_LENGTH).contains(v))
        .ok_or(ApiError::InvalidMaxLength {
            min: MIN_MAX_LENGTH,
            max: MAX_MAX_LENGTH,
        })
}

#[test]
fn test_parse_max_length() {
    assert_eq!(parse_max_length(b"50").unwrap(), 50);
    assert_eq!(parse_max_length(b" 2 ").unwrap(), 2);
    assert_eq!(parse_max_length(b"512").unwrap(), 512);
    assert!(parse_max_length(b"1").is_err());
    assert!(parse_max_length(b"513").is_err());
    assert!(parse_max_length(b"-3").is_err());
    assert!(parse_max_length(b"ten").is_err());
    assert!(parse_max_length(&[0xff, 0xfe]).is_err());
}
