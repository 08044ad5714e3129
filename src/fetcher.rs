use crate::errors::FetchError;
use log::info;
use reqwest::header::{CONTENT_TYPE, USER_AGENT};
use std::io::Write;
use std::path::Path;
use std::time::Duration;
use tempfile::NamedTempFile;

const BROWSER_USER_AGENT: &str = "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/91.0.4472.124 Safari/537.36";

/// XLSX files are ZIP containers.
const ZIP_MAGIC: &[u8] = b"PK";

/// A downloaded workbook staged in a temporary file. The file is removed when
/// this value is dropped, so the raw export never outlives the run.
pub struct DownloadedWorkbook {
    file: NamedTempFile,
    pub size: usize,
}

impl DownloadedWorkbook {
    pub fn path(&self) -> &Path {
        self.file.path()
    }
}

pub struct WorkbookFetcher {
    client: reqwest::Client,
    timeout: Duration,
}

impl WorkbookFetcher {
    pub fn new(timeout: Duration) -> Self {
        Self {
            client: reqwest::Client::new(),
            timeout,
        }
    }

    pub async fn download(&self, url: &str) -> Result<DownloadedWorkbook, FetchError> {
        let url = direct_download_url(url);
        info!("🌐 Downloading workbook from: {}", url);

        let response = self
            .client
            .get(&url)
            .header(USER_AGENT, BROWSER_USER_AGENT)
            .timeout(self.timeout)
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(FetchError::HttpStatus(response.status()));
        }

        let is_html = response
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .map(|v| v.contains("text/html"))
            .unwrap_or(false);
        if is_html {
            return Err(FetchError::HtmlPayload);
        }

        let bytes = response.bytes().await?;
        let workbook = stage_workbook(&bytes)?;
        info!("   ✅ Downloaded {} bytes", workbook.size);
        Ok(workbook)
    }

    /// Quick reachability check used by the admin status view.
    pub async fn probe(&self, url: &str) -> bool {
        let url = direct_download_url(url);
        match self
            .client
            .head(&url)
            .header(USER_AGENT, BROWSER_USER_AGENT)
            .timeout(Duration::from_secs(5))
            .send()
            .await
        {
            Ok(response) => response.status().is_success(),
            Err(_) => false,
        }
    }
}

/// Validate the payload and write it to a temporary `.xlsx` file.
fn stage_workbook(bytes: &[u8]) -> Result<DownloadedWorkbook, FetchError> {
    if !bytes.starts_with(ZIP_MAGIC) {
        return Err(FetchError::NotAWorkbook);
    }

    let mut file = tempfile::Builder::new()
        .prefix("raw_query_data_")
        .suffix(".xlsx")
        .tempfile()?;
    file.write_all(bytes)?;
    file.flush()?;

    Ok(DownloadedWorkbook {
        file,
        size: bytes.len(),
    })
}

/// Share links on `1drv.ms` need `download=1` to return the file itself.
pub fn direct_download_url(url: &str) -> String {
    if url.contains("1drv.ms") && !url.contains("download=1") {
        let separator = if url.contains('?') { '&' } else { '?' };
        format!("{}{}download=1", url, separator)
    } else {
        url.to_string()
    }
}
