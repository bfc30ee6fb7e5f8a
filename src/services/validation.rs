/// Upload policy checks
///
/// Runs at session creation and again when bytes actually arrive, so a
/// client that forged the earlier numbers is caught at ingress.
use crate::config::UploadConfig;
use crate::models::UploadType;

/// Hard byte cap for the one-shot multipart path
pub const DIRECT_MAX_BYTES: u64 = 200 * 1024 * 1024;

/// A single rejected field
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldError {
    pub field: &'static str,
    pub message: String,
}

/// Map MIME synonyms onto the canonical type the allow-list uses.
pub fn normalize_mime(mime: &str) -> String {
    let lowered = mime.to_ascii_lowercase();
    match lowered.as_str() {
        "application/mp4" | "video/x-m4v" => "video/mp4".to_string(),
        "video/avi" | "video/msvideo" => "video/x-msvideo".to_string(),
        "application/x-matroska" => "video/x-matroska".to_string(),
        _ => lowered,
    }
}

/// Validate an upload request. Errors come back in field order so the
/// surfaced message is stable.
pub fn validate_upload(
    filename: &str,
    filesize: i64,
    upload_type: UploadType,
    config: &UploadConfig,
) -> Result<(), Vec<FieldError>> {
    let mut errors = Vec::new();

    if filename.trim().is_empty() {
        errors.push(FieldError {
            field: "filename",
            message: "filename must not be empty".to_string(),
        });
    } else {
        match mime_guess::from_path(filename).first_raw() {
            Some(mime) => {
                let normalized = normalize_mime(mime);
                if !config.allowed_types.iter().any(|t| t == &normalized) {
                    errors.push(FieldError {
                        field: "filename",
                        message: format!("file type {} is not allowed", normalized),
                    });
                }
            }
            None => {
                errors.push(FieldError {
                    field: "filename",
                    message: "file type could not be determined from the filename".to_string(),
                });
            }
        }
    }

    if filesize <= 0 {
        errors.push(FieldError {
            field: "filesize",
            message: "filesize must be a positive integer".to_string(),
        });
    } else {
        let size = filesize as u64;
        match upload_type {
            UploadType::Resumable if size > config.max_file_size => {
                errors.push(FieldError {
                    field: "filesize",
                    message: format!(
                        "file exceeds the {}MB limit for resumable uploads",
                        config.max_file_size / (1024 * 1024)
                    ),
                });
            }
            UploadType::Direct if size > DIRECT_MAX_BYTES => {
                errors.push(FieldError {
                    field: "filesize",
                    message: "file exceeds the 200MB limit for direct uploads".to_string(),
                });
            }
            _ => {}
        }
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}

/// Collapse field errors into the single line the API surfaces.
pub fn error_line(errors: &[FieldError]) -> String {
    errors
        .iter()
        .map(|e| format!("{}: {}", e.field, e.message))
        .collect::<Vec<_>>()
        .join("; ")
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    fn config() -> UploadConfig {
        UploadConfig {
            upload_path: PathBuf::from("/tmp"),
            max_file_size: 100 * 1024 * 1024,
            allowed_types: vec![
                "video/mp4".to_string(),
                "video/quicktime".to_string(),
                "video/x-matroska".to_string(),
            ],
        }
    }

    #[test]
    fn test_accepts_known_video() {
        assert!(validate_upload("a.mp4", 10_485_760, UploadType::Resumable, &config()).is_ok());
        assert!(validate_upload("clip.mov", 1024, UploadType::Direct, &config()).is_ok());
    }

    #[test]
    fn test_rejects_empty_filename() {
        let errors =
            validate_upload("  ", 1024, UploadType::Resumable, &config()).unwrap_err();
        assert_eq!(errors[0].field, "filename");
    }

    #[test]
    fn test_rejects_unknown_suffix_and_disallowed_type() {
        let errors =
            validate_upload("notes.txt", 1024, UploadType::Resumable, &config()).unwrap_err();
        assert!(errors[0].message.contains("not allowed"));

        let errors =
            validate_upload("mystery", 1024, UploadType::Resumable, &config()).unwrap_err();
        assert!(errors[0].message.contains("could not be determined"));
    }

    #[test]
    fn test_normalizes_synonyms() {
        assert_eq!(normalize_mime("application/mp4"), "video/mp4");
        assert_eq!(normalize_mime("VIDEO/MP4"), "video/mp4");
        assert_eq!(normalize_mime("video/avi"), "video/x-msvideo");
    }

    #[test]
    fn test_size_ceiling_boundaries() {
        let cfg = config();
        let max = cfg.max_file_size as i64;

        // Exactly at the ceiling is accepted, one byte over is rejected.
        assert!(validate_upload("a.mp4", max, UploadType::Resumable, &cfg).is_ok());
        let errors =
            validate_upload("a.mp4", max + 1, UploadType::Resumable, &cfg).unwrap_err();
        assert_eq!(errors[0].field, "filesize");

        let direct_max = DIRECT_MAX_BYTES as i64;
        assert!(validate_upload("a.mp4", direct_max, UploadType::Direct, &cfg).is_ok());
        let errors =
            validate_upload("a.mp4", direct_max + 1, UploadType::Direct, &cfg).unwrap_err();
        assert!(errors[0].message.contains("200MB"));

        // The direct ceiling is fixed policy, independent of MAX_FILE_SIZE.
        assert!(validate_upload("a.mp4", max + 1, UploadType::Direct, &cfg).is_ok());
    }

    #[test]
    fn test_rejects_non_positive_size() {
        let errors = validate_upload("a.mp4", 0, UploadType::Resumable, &config()).unwrap_err();
        assert_eq!(errors[0].field, "filesize");
        let errors = validate_upload("a.mp4", -5, UploadType::Direct, &config()).unwrap_err();
        assert_eq!(errors[0].field, "filesize");
    }

    #[test]
    fn test_error_line_is_ordered() {
        let errors = validate_upload("", -1, UploadType::Resumable, &config()).unwrap_err();
        let line = error_line(&errors);
        let filename_pos = line.find("filename").unwrap();
        let filesize_pos = line.find("filesize").unwrap();
        assert!(filename_pos < filesize_pos);
        assert!(line.contains("; "));
    }
}
