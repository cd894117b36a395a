use log::{debug, info, warn};
use url::Url;

use crate::config::types::UploadSettings;
use crate::error::UploadError;
use crate::upload::types::{UploadOutcome, UploadRecord};

pub fn upload_url(space_url: &Url) -> Result<Url, url::ParseError> {
    Url::parse(&format!("{}/upload", space_url.as_str().trim_end_matches('/')))
}

/// Posts position records to the collection endpoint.
#[derive(Clone)]
pub struct UploadClient {
    client: reqwest::Client,
    upload_url: Url,
    token: String,
}

impl UploadClient {
    pub fn new(settings: &UploadSettings) -> Result<Self, UploadError> {
        Self::with_client(reqwest::Client::builder().build()?, settings)
    }

    pub fn with_client(client: reqwest::Client, settings: &UploadSettings) -> Result<Self, UploadError> {
        Ok(UploadClient {
            client,
            upload_url: upload_url(&settings.space_url)?,
            token: settings.token.clone(),
        })
    }

    pub fn upload_url(&self) -> &Url {
        &self.upload_url
    }

    /// Sends one record. Never fails; every problem is folded into the outcome.
    pub async fn upload(&self, record: &UploadRecord) -> UploadOutcome {
        let result = self
            .client
            .post(self.upload_url.clone())
            .bearer_auth(&self.token)
            .json(record)
            .send()
            .await;

        match result {
            Ok(response) => {
                let status = response.status().as_u16();
                info!("GPS upload status: {}", status);

                match response.text().await {
                    Ok(body) => debug!("Response: {}", body),
                    Err(err) => debug!("Failed to read response body: {}", err),
                }
                UploadOutcome::Status(status)
            },
            Err(err) => {
                warn!("Upload error: {}", err);
                UploadOutcome::Transport(err.to_string())
            },
        }
    }
}
