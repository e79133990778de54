//! HTTP implementation of [`ChatApi`] using `reqwest`.

use std::time::Duration;

use fleetchat_proto::api::{
    CONTACTS_PATH, CONVERSATIONS_PATH, Contact, ConversationSummary, HistoryMessage,
    IdentityQuery, MARK_READ_PATH, MESSAGES_PATH, MarkReadRequest, SendMessageRequest,
    SendMessageResponse,
};
use fleetchat_proto::message::{CounterpartyId, Identity};
use serde::de::DeserializeOwned;
use url::Url;

use super::{ApiError, ChatApi};

/// REST client for the relay's chat endpoints.
#[derive(Debug, Clone)]
pub struct HttpChatApi {
    client: reqwest::Client,
    base: Url,
}

impl HttpChatApi {
    /// Create a client for the server at `base_url` (e.g. `http://127.0.0.1:9000`).
    ///
    /// `timeout` bounds every request, including the body read.
    ///
    /// # Errors
    ///
    /// Returns [`ApiError::InvalidUrl`] if `base_url` does not parse, or
    /// [`ApiError::Network`] if the underlying client cannot be built.
    pub fn new(base_url: &str, timeout: Duration) -> Result<Self, ApiError> {
        let mut base = Url::parse(base_url).map_err(|e| ApiError::InvalidUrl(e.to_string()))?;
        if !base.path().ends_with('/') {
            let path = format!("{}/", base.path());
            base.set_path(&path);
        }
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| ApiError::Network(e.to_string()))?;
        Ok(Self { client, base })
    }

    /// The normalized base URL (always ends with `/`).
    #[must_use]
    pub const fn base_url(&self) -> &Url {
        &self.base
    }

    /// Resolve a route constant against the base URL, keeping any base path prefix.
    fn endpoint(&self, path: &str) -> Result<Url, ApiError> {
        self.base
            .join(path.trim_start_matches('/'))
            .map_err(|e| ApiError::InvalidUrl(e.to_string()))
    }

    async fn get_json<T: DeserializeOwned>(
        &self,
        url: Url,
        identity: &Identity,
    ) -> Result<T, ApiError> {
        let response = self
            .client
            .get(url)
            .query(&IdentityQuery::from(identity))
            .send()
            .await
            .map_err(map_reqwest_error)?;
        let response = check_status(response)?;
        response
            .json::<T>()
            .await
            .map_err(|e| ApiError::Decode(e.to_string()))
    }
}

impl ChatApi for HttpChatApi {
    async fn conversation_summaries(
        &self,
        identity: &Identity,
    ) -> Result<Vec<ConversationSummary>, ApiError> {
        let url = self.endpoint(CONVERSATIONS_PATH)?;
        self.get_json(url, identity).await
    }

    async fn contacts(&self, identity: &Identity) -> Result<Vec<Contact>, ApiError> {
        let url = self.endpoint(CONTACTS_PATH)?;
        self.get_json(url, identity).await
    }

    async fn message_history(
        &self,
        counterparty: &CounterpartyId,
        identity: &Identity,
    ) -> Result<Vec<HistoryMessage>, ApiError> {
        let mut url = self.endpoint(MESSAGES_PATH)?;
        url.path_segments_mut()
            .map_err(|()| ApiError::InvalidUrl("base url cannot have path segments".into()))?
            .push(counterparty.as_str());
        self.get_json(url, identity).await
    }

    async fn send_message(
        &self,
        request: &SendMessageRequest,
    ) -> Result<SendMessageResponse, ApiError> {
        let url = self.endpoint(MESSAGES_PATH)?;
        let response = self
            .client
            .post(url)
            .json(request)
            .send()
            .await
            .map_err(map_reqwest_error)?;
        let response = check_status(response)?;
        response
            .json::<SendMessageResponse>()
            .await
            .map_err(|e| ApiError::Decode(e.to_string()))
    }

    async fn mark_read(&self, request: &MarkReadRequest) -> Result<(), ApiError> {
        let url = self.endpoint(MARK_READ_PATH)?;
        let response = self
            .client
            .post(url)
            .json(request)
            .send()
            .await
            .map_err(map_reqwest_error)?;
        check_status(response)?;
        Ok(())
    }
}

fn check_status(response: reqwest::Response) -> Result<reqwest::Response, ApiError> {
    let status = response.status();
    if status.is_success() {
        Ok(response)
    } else {
        tracing::debug!(status = status.as_u16(), url = %response.url(), "request rejected");
        Err(ApiError::Status {
            status: status.as_u16(),
        })
    }
}

fn map_reqwest_error(err: reqwest::Error) -> ApiError {
    if err.is_timeout() {
        ApiError::Timeout
    } else if err.is_decode() {
        ApiError::Decode(err.to_string())
    } else {
        ApiError::Network(err.to_string())
    }
}
