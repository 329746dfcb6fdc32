use std::path::Path;

pub const MEDIA_ROOT: &str = "/sdcard/Pictures";
pub const SCAN_DIRS: &[&str] = &["/sdcard/DCIM", "/sdcard/Pictures"];

pub fn validate_device_path(path: &str) -> Result<(), String> {
    let trimmed = path.trim();
    if trimmed.is_empty() {
        return Err("device_path is required".to_string());
    }
    if !trimmed.starts_with('/') {
        return Err("device_path must be an absolute device path starting with '/'".to_string());
    }
    if trimmed.contains('\0') {
        return Err("device_path contains invalid characters".to_string());
    }
    if trimmed == "/" {
        return Err("device_path must not be root".to_string());
    }
    if trimmed.split('/').any(|segment| segment == "..") {
        return Err("device_path must not contain '..' segments".to_string());
    }
    Ok(())
}

pub fn device_parent_dir(device_path: &str) -> String {
    let trimmed = device_path.trim().trim_end_matches('/');
    match trimmed.rfind('/') {
        Some(0) | None => "/".to_string(),
        Some(index) => trimmed[..index].to_string(),
    }
}

/// Album directory holding every file pushed for `username`.
pub fn media_album_dir(username: &str) -> String {
    format!("{MEDIA_ROOT}/{}", sanitize_segment(username))
}

/// `/sdcard/Pictures/<username>/<username>_<epoch>.<ext>`
pub fn media_device_path(username: &str, epoch_secs: i64, local_file: &Path) -> String {
    let user = sanitize_segment(username);
    let ext = local_file
        .extension()
        .and_then(|ext| ext.to_str())
        .filter(|ext| !ext.is_empty())
        .unwrap_or("mp4");
    format!("{MEDIA_ROOT}/{user}/{user}_{epoch_secs}.{ext}")
}

/// Keeps usernames from escaping the album directory or breaking shell quoting.
fn sanitize_segment(value: &str) -> String {
    let cleaned: String = value
        .trim()
        .chars()
        .map(|ch| {
            if ch.is_ascii_alphanumeric() || ch == '_' || ch == '.' || ch == '-' {
                ch
            } else {
                '_'
            }
        })
        .collect();
    match cleaned.trim_matches('.') {
        "" => "unknown".to_string(),
        other => other.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    #[test]
    fn validate_device_path_requires_absolute() {
        assert!(validate_device_path("").is_err());
        assert!(validate_device_path("sdcard/file.txt").is_err());
        assert!(validate_device_path("/").is_err());
        assert!(validate_device_path("/sdcard/file.txt").is_ok());
    }

    #[test]
    fn validate_device_path_blocks_dotdot() {
        assert!(validate_device_path("/sdcard/../etc/passwd").is_err());
        assert!(validate_device_path("/sdcard/a/../b").is_err());
    }

    #[test]
    fn device_parent_dir_handles_common_cases() {
        assert_eq!(device_parent_dir("/sdcard/Download/file.txt"), "/sdcard/Download");
        assert_eq!(device_parent_dir("/sdcard/Download/"), "/sdcard");
        assert_eq!(device_parent_dir("/file.txt"), "/");
        assert_eq!(device_parent_dir("/"), "/");
        assert_eq!(device_parent_dir(""), "/");
    }

    #[test]
    fn builds_media_paths_per_user() {
        let local = PathBuf::from("/tmp/downloads/abc.mov");
        assert_eq!(
            media_device_path("u1", 1700000000, &local),
            "/sdcard/Pictures/u1/u1_1700000000.mov"
        );
        assert_eq!(media_album_dir("u1"), "/sdcard/Pictures/u1");
        assert_eq!(
            device_parent_dir(&media_device_path("u1", 1, &local)),
            media_album_dir("u1")
        );
    }

    #[test]
    fn media_paths_default_to_mp4_and_sanitize_names() {
        let local = PathBuf::from("/tmp/downloads/noext");
        assert_eq!(
            media_device_path("../evil user", 5, &local),
            "/sdcard/Pictures/_evil_user/_evil_user_5.mp4"
        );
        assert_eq!(media_album_dir(".."), "/sdcard/Pictures/unknown");
    }
}
