use crate::error::ExtractError;
use async_trait::async_trait;
use base64::{engine::general_purpose::STANDARD, Engine};
use calamine::{open_workbook_auto, Data, Reader};
use lopdf::Document;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fs;
use std::io::ErrorKind;
use std::path::Path;
use std::time::Duration;
use tokio::process::Command;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SourceFormat {
    Pdf,
    Spreadsheet,
    Json,
    Image,
    PlainText,
}

impl SourceFormat {
    pub fn from_path(path: &Path) -> Option<Self> {
        let extension = path.extension()?.to_str()?.to_ascii_lowercase();
        match extension.as_str() {
            "pdf" => Some(SourceFormat::Pdf),
            "xlsx" | "xls" => Some(SourceFormat::Spreadsheet),
            "json" => Some(SourceFormat::Json),
            "png" | "jpg" | "jpeg" => Some(SourceFormat::Image),
            "txt" => Some(SourceFormat::PlainText),
            _ => None,
        }
    }
}

#[async_trait]
pub trait TextExtractor: Send + Sync {
    async fn extract(&self, path: &Path) -> Result<String, ExtractError>;
}

#[derive(Debug, Clone)]
pub struct OcrEndpointConfig {
    pub endpoint: String,
    pub api_key: Option<String>,
    pub timeout: Duration,
}

/// OCR goes to `endpoint` when set, otherwise to a local `tesseract`
/// process that is killed after `tesseract_timeout`.
#[derive(Debug, Clone)]
pub struct OcrConfig {
    pub endpoint: Option<OcrEndpointConfig>,
    pub tesseract_binary: String,
    pub tesseract_timeout: Duration,
}

impl Default for OcrConfig {
    fn default() -> Self {
        Self {
            endpoint: None,
            tesseract_binary: "tesseract".to_string(),
            tesseract_timeout: Duration::from_secs(30),
        }
    }
}

/// Picks a reader by file extension and rejects documents that yield only
/// whitespace.
#[derive(Debug, Clone, Default)]
pub struct DocumentExtractor {
    pub ocr: OcrConfig,
}

impl DocumentExtractor {
    pub fn new(ocr: OcrConfig) -> Self {
        Self { ocr }
    }
}

#[async_trait]
impl TextExtractor for DocumentExtractor {
    async fn extract(&self, path: &Path) -> Result<String, ExtractError> {
        let format = SourceFormat::from_path(path)
            .ok_or_else(|| ExtractError::NoText(path.to_path_buf()))?;

        let text = match format {
            SourceFormat::Pdf => extract_pdf(path)?,
            SourceFormat::Spreadsheet => extract_spreadsheet(path)?,
            SourceFormat::Json => extract_json(path)?,
            SourceFormat::Image => extract_image(path, &self.ocr).await?,
            SourceFormat::PlainText => extract_plain_text(path)?,
        };

        if text.trim().is_empty() {
            return Err(ExtractError::NoText(path.to_path_buf()));
        }
        Ok(text)
    }
}

pub fn extract_pdf(path: &Path) -> Result<String, ExtractError> {
    let document = Document::load(path).map_err(|error| ExtractError::Pdf(error.to_string()))?;

    let mut pages = Vec::new();
    for page_no in document.get_pages().keys() {
        let text = document
            .extract_text(&[*page_no])
            .map_err(|error| ExtractError::Pdf(error.to_string()))?;
        if !text.trim().is_empty() {
            pages.push(text.trim().to_string());
        }
    }

    Ok(pages.join("\n\n"))
}

pub fn extract_spreadsheet(path: &Path) -> Result<String, ExtractError> {
    let mut workbook =
        open_workbook_auto(path).map_err(|error| ExtractError::Spreadsheet(error.to_string()))?;

    let mut lines = Vec::new();
    for sheet in workbook.sheet_names() {
        let range = workbook
            .worksheet_range(&sheet)
            .map_err(|error| ExtractError::Spreadsheet(error.to_string()))?;

        lines.push(format!("Sheet: {sheet}"));
        for row in range.rows() {
            let cells = row
                .iter()
                .filter(|cell| !matches!(cell, Data::Empty))
                .map(|cell| cell.to_string())
                .collect::<Vec<_>>();
            if !cells.is_empty() {
                lines.push(cells.join(" | "));
            }
        }
    }

    Ok(lines.join("\n"))
}

pub fn extract_json(path: &Path) -> Result<String, ExtractError> {
    let bytes = fs::read(path)?;
    let value: Value = serde_json::from_slice(&bytes)?;
    let mut parts = Vec::new();
    flatten_json(&value, "", &mut parts);
    Ok(parts.join(" "))
}

/// Renders nested JSON as `key: value` text; array items are prefixed `[i]`.
pub fn flatten_json(value: &Value, prefix: &str, parts: &mut Vec<String>) {
    match value {
        Value::Object(map) => {
            for (key, nested) in map {
                flatten_json(nested, &format!("{prefix}{key}: "), parts);
            }
        }
        Value::Array(items) => {
            for (index, item) in items.iter().enumerate() {
                flatten_json(item, &format!("{prefix}[{index}] "), parts);
            }
        }
        Value::String(text) => parts.push(format!("{prefix}{text}")),
        Value::Null => parts.push(format!("{prefix}null")),
        other => parts.push(format!("{prefix}{other}")),
    }
}

pub fn extract_plain_text(path: &Path) -> Result<String, ExtractError> {
    let bytes = fs::read(path)?;
    String::from_utf8(bytes).map_err(|_| ExtractError::Encoding(path.to_path_buf()))
}

pub async fn extract_image(path: &Path, config: &OcrConfig) -> Result<String, ExtractError> {
    match &config.endpoint {
        Some(endpoint) => extract_with_ocr_endpoint(path, endpoint).await,
        None => {
            extract_with_tesseract(path, &config.tesseract_binary, config.tesseract_timeout).await
        }
    }
}

async fn extract_with_tesseract(
    path: &Path,
    binary: &str,
    timeout: Duration,
) -> Result<String, ExtractError> {
    let mut command = Command::new(binary);
    command.arg(path).arg("stdout").kill_on_drop(true);

    let output = tokio::time::timeout(timeout, command.output())
        .await
        .map_err(|_| ExtractError::OcrTimeout {
            program: binary.to_string(),
            after: timeout,
        })?
        .map_err(|error| match error.kind() {
            ErrorKind::NotFound => {
                ExtractError::OcrUnavailable(format!("{binary} is not installed"))
            }
            _ => ExtractError::Io(error),
        })?;

    if !output.status.success() {
        return Err(ExtractError::OcrFailed(format!(
            "{binary} exited with {}: {}",
            output.status,
            String::from_utf8_lossy(&output.stderr).trim()
        )));
    }

    Ok(String::from_utf8_lossy(&output.stdout).trim().to_string())
}

#[derive(Debug, Clone, Serialize)]
struct OcrRequest {
    image_base64: String,
    source_path: String,
}

#[derive(Debug, Clone, Deserialize)]
struct OcrResponse {
    pages: Option<Vec<OcrPage>>,
    text: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
struct OcrPage {
    #[serde(default)]
    text: Option<String>,
}

async fn extract_with_ocr_endpoint(
    path: &Path,
    cfg: &OcrEndpointConfig,
) -> Result<String, ExtractError> {
    let image = tokio::fs::read(path).await?;
    let payload = OcrRequest {
        image_base64: STANDARD.encode(image),
        source_path: path.to_string_lossy().to_string(),
    };

    let client = Client::builder().timeout(cfg.timeout).build()?;
    let mut request = client
        .post(&cfg.endpoint)
        .header("content-type", "application/json")
        .json(&payload);

    if let Some(api_key) = &cfg.api_key {
        request = request.bearer_auth(api_key);
    }

    let response = request
        .send()
        .await
        .map_err(|error| ExtractError::OcrUnavailable(error.to_string()))?;

    if !response.status().is_success() {
        return Err(ExtractError::OcrFailed(format!(
            "OCR request to {} returned {}",
            cfg.endpoint,
            response.status()
        )));
    }

    let payload: OcrResponse = response.json().await?;
    payload_to_text(&payload, path)
}

fn payload_to_text(payload: &OcrResponse, path: &Path) -> Result<String, ExtractError> {
    if let Some(listed) = &payload.pages {
        let listed = listed
            .iter()
            .filter_map(|page| page.text.as_deref().map(str::trim))
            .filter(|text| !text.is_empty())
            .collect::<Vec<_>>();

        if !listed.is_empty() {
            return Ok(listed.join("\n\n"));
        }
    }

    if let Some(raw_text) = &payload.text {
        let pages = raw_text
            .split('\u{000c}')
            .map(str::trim)
            .filter(|chunk| !chunk.is_empty())
            .collect::<Vec<_>>();

        if !pages.is_empty() {
            return Ok(pages.join("\n\n"));
        }
    }

    Err(ExtractError::OcrFailed(format!(
        "OCR response was empty for {}",
        path.display()
    )))
}
