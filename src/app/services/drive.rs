use std::fs::{self, File};
use std::path::{Path, PathBuf};
use std::time::Duration;

use regex::Regex;
use reqwest::blocking::{Client, RequestBuilder};
use serde::Deserialize;
use tracing::{info, warn};

use crate::app::error::AppError;
use crate::app::models::DownloadedMedia;

const DRIVE_FILES_API: &str = "https://www.googleapis.com/drive/v3/files";
const DOWNLOAD_TIMEOUT: Duration = Duration::from_secs(120);
const DEFAULT_EXTENSION: &str = "mp4";

pub trait MediaDownloader: Send + Sync {
    fn download(&self, url: &str, out_dir: &Path) -> Result<DownloadedMedia, AppError>;
}

/// Extracts the file id from `drive://<id>`, `/file/d/<id>/...`, `?id=<id>` or a bare id.
pub fn parse_drive_id(url: &str) -> Option<String> {
    let url = url.trim();
    if let Some(id) = url.strip_prefix("drive://") {
        let id = id.trim_matches('/');
        return (!id.is_empty()).then(|| id.to_string());
    }
    let patterns = [r"/file/d/([A-Za-z0-9_-]+)", r"[?&]id=([A-Za-z0-9_-]+)", r"^([A-Za-z0-9_-]{10,})$"];
    patterns.iter().find_map(|pattern| {
        Regex::new(pattern)
            .ok()
            .and_then(|re| re.captures(url))
            .and_then(|caps| caps.get(1))
            .map(|m| m.as_str().to_string())
    })
}

/// Metadata extension first, then the file name, then the mime type, else `mp4`.
pub fn pick_extension(file_extension: Option<&str>, name: Option<&str>, mime: Option<&str>) -> String {
    let clean = |ext: &str| ext.trim().trim_start_matches('.').to_ascii_lowercase();
    if let Some(ext) = file_extension.map(clean).filter(|ext| !ext.is_empty()) {
        return ext;
    }
    if let Some(ext) = name
        .and_then(|name| Path::new(name).extension())
        .and_then(|ext| ext.to_str())
        .map(clean)
        .filter(|ext| !ext.is_empty())
    {
        return ext;
    }
    if let Some(mime) = mime {
        if mime == "video/mp4" {
            return DEFAULT_EXTENSION.to_string();
        }
        if let Some(ext) = mime_guess::get_mime_extensions_str(mime).and_then(|exts| exts.first()) {
            return ext.to_string();
        }
    }
    DEFAULT_EXTENSION.to_string()
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct FileMetadata {
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    mime_type: Option<String>,
    #[serde(default)]
    file_extension: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
struct DriveCredentials {
    #[serde(default)]
    access_token: Option<String>,
    #[serde(default)]
    api_key: Option<String>,
}

#[derive(Debug, Clone)]
enum DriveAuth {
    Bearer(String),
    ApiKey(String),
}

/// Google Drive v3 downloader. Credentials JSON holds an `access_token` or an `api_key`.
pub struct DriveDownloader {
    client: Client,
    auth: DriveAuth,
    trace_id: String,
}

impl DriveDownloader {
    pub fn from_credentials_file(path: &Path, trace_id: &str) -> Result<Self, AppError> {
        let raw = fs::read_to_string(path).map_err(|err| {
            AppError::config(format!("Failed to read drive credentials {}: {err}", path.display()), trace_id)
        })?;
        let creds: DriveCredentials = serde_json::from_str(&raw)
            .map_err(|err| AppError::config(format!("Invalid drive credentials: {err}"), trace_id))?;
        let auth = match (creds.access_token, creds.api_key) {
            (Some(token), _) if !token.trim().is_empty() => DriveAuth::Bearer(token.trim().to_string()),
            (_, Some(key)) if !key.trim().is_empty() => DriveAuth::ApiKey(key.trim().to_string()),
            _ => {
                return Err(AppError::config(
                    "Drive credentials need an access_token or api_key",
                    trace_id,
                ))
            }
        };
        let client = Client::builder()
            .timeout(DOWNLOAD_TIMEOUT)
            .build()
            .map_err(|err| AppError::system(format!("Failed to build HTTP client: {err}"), trace_id))?;
        Ok(Self {
            client,
            auth,
            trace_id: trace_id.to_string(),
        })
    }

    fn authorize(&self, request: RequestBuilder) -> RequestBuilder {
        match &self.auth {
            DriveAuth::Bearer(token) => request.bearer_auth(token),
            DriveAuth::ApiKey(key) => request.query(&[("key", key.as_str())]),
        }
    }

    fn metadata(&self, file_id: &str) -> FileMetadata {
        let request = self
            .client
            .get(format!("{DRIVE_FILES_API}/{file_id}"))
            .query(&[("fields", "name,mimeType,fileExtension"), ("supportsAllDrives", "true")]);
        match self.authorize(request).send() {
            Ok(response) if response.status().is_success() => response.json().unwrap_or_default(),
            Ok(response) => {
                warn!(trace_id = %self.trace_id, file_id = %file_id, status = %response.status(), "⚠️ drive metadata unavailable");
                FileMetadata::default()
            }
            Err(err) => {
                warn!(trace_id = %self.trace_id, file_id = %file_id, error = %err, "⚠️ drive metadata request failed");
                FileMetadata::default()
            }
        }
    }
}

impl MediaDownloader for DriveDownloader {
    fn download(&self, url: &str, out_dir: &Path) -> Result<DownloadedMedia, AppError> {
        let file_id = parse_drive_id(url)
            .ok_or_else(|| AppError::validation(format!("Unrecognized drive url: {url}"), &self.trace_id))?;
        let meta = self.metadata(&file_id);
        let extension = pick_extension(
            meta.file_extension.as_deref(),
            meta.name.as_deref(),
            meta.mime_type.as_deref(),
        );
        let mime = meta
            .mime_type
            .clone()
            .unwrap_or_else(|| mime_guess::from_ext(&extension).first_or_octet_stream().to_string());
        fs::create_dir_all(out_dir).map_err(|err| {
            AppError::system(format!("Failed to create {}: {err}", out_dir.display()), &self.trace_id)
        })?;
        let local_path: PathBuf = out_dir.join(format!("{file_id}.{extension}"));

        let request = self
            .client
            .get(format!("{DRIVE_FILES_API}/{file_id}"))
            .query(&[("alt", "media"), ("supportsAllDrives", "true")]);
        let mut response = self
            .authorize(request)
            .send()
            .map_err(|err| AppError::dependency(format!("Drive download failed: {err}"), &self.trace_id))?;
        if !response.status().is_success() {
            return Err(AppError::dependency(
                format!("Drive returned {} for {file_id}", response.status()),
                &self.trace_id,
            ));
        }
        let mut file = File::create(&local_path).map_err(|err| {
            AppError::system(format!("Failed to create {}: {err}", local_path.display()), &self.trace_id)
        })?;
        let bytes = response.copy_to(&mut file).map_err(|err| {
            let _ = fs::remove_file(&local_path);
            AppError::dependency(format!("Drive download interrupted: {err}"), &self.trace_id)
        })?;
        if bytes == 0 {
            let _ = fs::remove_file(&local_path);
            return Err(AppError::dependency(format!("Drive file {file_id} is empty"), &self.trace_id));
        }
        info!(trace_id = %self.trace_id, file_id = %file_id, bytes, path = %local_path.display(), "media downloaded");
        Ok(DownloadedMedia {
            local_path,
            mime,
            file_id,
        })
    }
}
