use std::time::Duration;

use reqwest::blocking::Client;
use tracing::{debug, instrument};

use crate::sources::{read_local, SourceError, SourceLoader, SourceLocation};

const PROBE_TIMEOUT: Duration = Duration::from_secs(5);
const CONNECT_TIMEOUT: Duration = Duration::from_secs(30);

/// Blocking HTTP loader; local paths are read from disk.
#[derive(Debug, Clone)]
pub struct HttpFetcher {
    client: Client,
}

impl HttpFetcher {
    /// A loader whose downloads may take as long as the body needs.
    pub fn new() -> Result<Self, SourceError> {
        Self::with_download_timeout(None)
    }

    /// `download_timeout` bounds a whole GET including the body; `None` leaves it unbounded.
    /// The availability probe always keeps its own short limit.
    pub fn with_download_timeout(download_timeout: Option<Duration>) -> Result<Self, SourceError> {
        let client = Client::builder()
            .connect_timeout(CONNECT_TIMEOUT)
            .timeout(download_timeout)
            .build()
            .map_err(|source| SourceError::Http {
                url: String::from("<client>"),
                source,
            })?;
        Ok(Self { client })
    }
}

impl SourceLoader for HttpFetcher {
    fn name(&self) -> &'static str {
        "http"
    }

    #[instrument(skip(self, location), fields(source = %location))]
    fn fetch(&self, location: &SourceLocation) -> Result<Vec<u8>, SourceError> {
        let url = match location {
            SourceLocation::Url(url) => url,
            SourceLocation::Path(path) => return read_local(path),
        };

        let http_error = |source: reqwest::Error| SourceError::Http {
            url: url.clone(),
            source,
        };
        let response = self.client.get(url).send().map_err(http_error)?;
        let status = response.status();
        if !status.is_success() {
            return Err(SourceError::Unavailable {
                url: url.clone(),
                status: status.as_u16(),
            });
        }
        let bytes = response.bytes().map_err(http_error)?;
        debug!(bytes = bytes.len(), "source downloaded");
        Ok(bytes.to_vec())
    }

    fn is_available(&self, location: &SourceLocation) -> bool {
        let url = match location {
            SourceLocation::Url(url) => url,
            SourceLocation::Path(path) => return path.is_file(),
        };
        match self.client.head(url).timeout(PROBE_TIMEOUT).send() {
            Ok(response) => response.status().as_u16() == 200,
            Err(err) => {
                debug!(url = %url, error = %err, "availability probe failed");
                false
            }
        }
    }
}
