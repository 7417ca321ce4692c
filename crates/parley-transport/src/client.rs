use std::collections::VecDeque;
use std::sync::Arc;

use async_trait::async_trait;
use futures_util::{Stream, StreamExt};
use parley_core::config::ServerConfig;
use parley_core::types::{ConversationId, ConversationSummary, CorrelationId};
use parley_core::ParleyConfig;
use reqwest::header::{ACCEPT, CONTENT_TYPE};
use reqwest::{Method, StatusCode, Url};
use serde::de::DeserializeOwned;
use serde::Serialize;
use tracing::{debug, warn};

use crate::auth::TokenStore;
use crate::error::TransportError;
use crate::stream::{parse_event, ProgressEvent, ProgressStream, SseDecoder};
use crate::wire::{
    AuthTokens, ConversationPatch, CreateConversationBody, EmploymentSubmission, InsightReceipt,
    InsightSubmission, MessageRecord, RefreshBody, SendMessageBody, SkillsReceipt,
    SkillsSubmission,
};

/// Everything the session controller needs from the assistant service.
///
/// Implemented over HTTP by [`HttpTransport`]; tests substitute scripted fakes.
#[async_trait]
pub trait AssistantApi: Send + Sync {
    /// Persisted history for a conversation, oldest first.
    async fn list_messages(
        &self,
        conversation: &ConversationId,
    ) -> Result<Vec<MessageRecord>, TransportError>;

    /// Submit a prompt; resolves with the authoritative assistant record.
    async fn send_message(
        &self,
        conversation: &ConversationId,
        prompt: &str,
        request_id: CorrelationId,
    ) -> Result<MessageRecord, TransportError>;

    /// Subscribe to progress notifications for an in-flight request.
    async fn open_progress(
        &self,
        conversation: &ConversationId,
        request_id: CorrelationId,
    ) -> Result<ProgressStream, TransportError>;

    async fn create_conversation(&self, title: &str)
        -> Result<ConversationSummary, TransportError>;

    async fn list_conversations(&self) -> Result<Vec<ConversationSummary>, TransportError>;

    async fn update_conversation(
        &self,
        conversation: &ConversationId,
        patch: &ConversationPatch,
    ) -> Result<ConversationSummary, TransportError>;

    async fn delete_conversation(&self, conversation: &ConversationId)
        -> Result<(), TransportError>;

    async fn submit_employment(
        &self,
        body: &EmploymentSubmission,
    ) -> Result<serde_json::Value, TransportError>;

    async fn submit_skills(&self, body: &SkillsSubmission) -> Result<SkillsReceipt, TransportError>;

    async fn submit_insights(
        &self,
        body: &InsightSubmission,
    ) -> Result<InsightReceipt, TransportError>;
}

/// reqwest-backed [`AssistantApi`].
///
/// Request/response calls share one client with a whole-request timeout.
/// Progress streams use a second client with only a connect timeout so a
/// long-running request is not cut off mid-stream.
#[derive(Debug, Clone)]
pub struct HttpTransport {
    base: Url,
    client: reqwest::Client,
    stream_client: reqwest::Client,
    tokens: Arc<TokenStore>,
}

impl HttpTransport {
    pub fn new(server: &ServerConfig, tokens: Arc<TokenStore>) -> Result<Self, TransportError> {
        let base = Url::parse(&server.base_url)
            .map_err(|e| TransportError::InvalidUrl(format!("{}: {e}", server.base_url)))?;
        if base.cannot_be_a_base() {
            return Err(TransportError::InvalidUrl(server.base_url.clone()));
        }

        let client = reqwest::Client::builder()
            .connect_timeout(server.connect_timeout())
            .timeout(server.request_timeout())
            .build()?;
        let stream_client = reqwest::Client::builder()
            .connect_timeout(server.connect_timeout())
            .build()?;

        Ok(Self {
            base,
            client,
            stream_client,
            tokens,
        })
    }

    /// Build a transport from the full configuration, seeding the token store
    /// from the `[auth]` section.
    pub fn from_config(config: &ParleyConfig) -> Result<Self, TransportError> {
        let tokens = Arc::new(TokenStore::new(
            config.auth.access_token.clone(),
            config.auth.refresh_token.clone(),
        ));
        Self::new(&config.server, tokens)
    }

    pub fn tokens(&self) -> &Arc<TokenStore> {
        &self.tokens
    }

    fn endpoint(&self, segments: &[&str]) -> Result<Url, TransportError> {
        let mut url = self.base.clone();
        url.path_segments_mut()
            .map_err(|_| TransportError::InvalidUrl(self.base.to_string()))?
            .pop_if_empty()
            .extend(segments);
        Ok(url)
    }

    // -------------------------------------------------------------------------
    // Request plumbing
    // -------------------------------------------------------------------------

    async fn send_once(
        &self,
        method: &Method,
        url: &Url,
        body: Option<&str>,
    ) -> Result<reqwest::Response, TransportError> {
        let mut request = self.client.request(method.clone(), url.clone());
        if let Some(token) = self.tokens.access_token() {
            request = request.bearer_auth(token);
        }
        if let Some(body) = body {
            request = request
                .header(CONTENT_TYPE, "application/json")
                .body(body.to_string());
        }
        Ok(request.send().await?)
    }

    /// Issue a request, refreshing credentials once on `401`.
    async fn execute(
        &self,
        method: Method,
        url: Url,
        body: Option<String>,
    ) -> Result<Vec<u8>, TransportError> {
        let response = self.send_once(&method, &url, body.as_deref()).await?;
        if response.status() != StatusCode::UNAUTHORIZED {
            return read_body(response).await;
        }

        debug!(%url, "access token rejected, attempting refresh");
        if let Err(e) = self.refresh().await {
            warn!(error = %e, "token refresh failed, signing out");
            self.tokens.clear();
            return Err(TransportError::AuthExpired);
        }

        let retry = self.send_once(&method, &url, body.as_deref()).await?;
        if retry.status() == StatusCode::UNAUTHORIZED {
            warn!(%url, "request rejected after refresh, signing out");
            self.tokens.clear();
            return Err(TransportError::AuthExpired);
        }
        read_body(retry).await
    }

    async fn refresh(&self) -> Result<(), TransportError> {
        let refresh_token = self
            .tokens
            .refresh_token()
            .ok_or(TransportError::AuthExpired)?;
        let body = serde_json::to_string(&RefreshBody {
            refresh_token: &refresh_token,
        })?;

        let response = self
            .client
            .post(self.endpoint(&["auth", "refresh"])?)
            .header(CONTENT_TYPE, "application/json")
            .body(body)
            .send()
            .await?;
        let bytes = read_body(response).await?;
        let fresh: AuthTokens = decode(&bytes)?;
        self.tokens.update(fresh);
        debug!("access token refreshed");
        Ok(())
    }

    async fn get_json<T: DeserializeOwned>(&self, segments: &[&str]) -> Result<T, TransportError> {
        let bytes = self
            .execute(Method::GET, self.endpoint(segments)?, None)
            .await?;
        decode(&bytes)
    }

    async fn send_json<B, T>(
        &self,
        method: Method,
        segments: &[&str],
        body: &B,
    ) -> Result<T, TransportError>
    where
        B: Serialize + Sync,
        T: DeserializeOwned,
    {
        let payload = serde_json::to_string(body)?;
        let bytes = self
            .execute(method, self.endpoint(segments)?, Some(payload))
            .await?;
        decode(&bytes)
    }
}

async fn read_body(response: reqwest::Response) -> Result<Vec<u8>, TransportError> {
    let status = response.status();
    if !status.is_success() {
        let body = response.text().await.unwrap_or_default();
        return Err(TransportError::Http {
            status: status.as_u16(),
            body,
        });
    }
    Ok(response.bytes().await?.to_vec())
}

/// Decode a JSON body. An empty body reads as `null`.
fn decode<T: DeserializeOwned>(bytes: &[u8]) -> Result<T, TransportError> {
    let bytes = if bytes.iter().all(u8::is_ascii_whitespace) {
        b"null".as_slice()
    } else {
        bytes
    };
    Ok(serde_json::from_slice(bytes)?)
}

/// Turn an SSE response body into decoded progress events.
fn sse_events(
    response: reqwest::Response,
) -> impl Stream<Item = Result<ProgressEvent, TransportError>> + Send {
    let body = Box::pin(response.bytes_stream());
    futures_util::stream::unfold(
        (body, SseDecoder::new(), VecDeque::<String>::new()),
        |(mut body, mut decoder, mut ready)| async move {
            loop {
                if let Some(data) = ready.pop_front() {
                    let event = parse_event(&data);
                    return Some((event, (body, decoder, ready)));
                }
                match body.next().await {
                    Some(Ok(chunk)) => ready.extend(decoder.push(&chunk)),
                    Some(Err(e)) => {
                        return Some((Err(TransportError::from(e)), (body, decoder, ready)))
                    }
                    None => return None,
                }
            }
        },
    )
}

#[async_trait]
impl AssistantApi for HttpTransport {
    async fn list_messages(
        &self,
        conversation: &ConversationId,
    ) -> Result<Vec<MessageRecord>, TransportError> {
        let records: Option<Vec<MessageRecord>> =
            self.get_json(&["messages", conversation.as_str()]).await?;
        Ok(records.unwrap_or_default())
    }

    async fn send_message(
        &self,
        conversation: &ConversationId,
        prompt: &str,
        request_id: CorrelationId,
    ) -> Result<MessageRecord, TransportError> {
        let body = SendMessageBody {
            prompt,
            request_id: request_id.to_string(),
        };
        self.send_json(Method::POST, &["messages", conversation.as_str()], &body)
            .await
    }

    async fn open_progress(
        &self,
        conversation: &ConversationId,
        request_id: CorrelationId,
    ) -> Result<ProgressStream, TransportError> {
        let mut url = self.endpoint(&["messages", conversation.as_str(), "progress"])?;
        {
            let mut query = url.query_pairs_mut();
            query.append_pair("request_id", &request_id.to_string());
            if let Some(token) = self.tokens.access_token() {
                query.append_pair("access_token", &token);
            }
        }

        let response = self
            .stream_client
            .get(url)
            .header(ACCEPT, "text/event-stream")
            .send()
            .await
            .map_err(|e| TransportError::StreamOpen(e.to_string()))?;
        let status = response.status();
        if !status.is_success() {
            return Err(TransportError::StreamOpen(format!("HTTP {}", status.as_u16())));
        }

        debug!(%conversation, %request_id, "progress stream opened");
        Ok(ProgressStream::new(sse_events(response)))
    }

    async fn create_conversation(
        &self,
        title: &str,
    ) -> Result<ConversationSummary, TransportError> {
        self.send_json(Method::POST, &["chats"], &CreateConversationBody { title })
            .await
    }

    async fn list_conversations(&self) -> Result<Vec<ConversationSummary>, TransportError> {
        let list: Option<Vec<ConversationSummary>> = self.get_json(&["chats"]).await?;
        Ok(list.unwrap_or_default())
    }

    async fn update_conversation(
        &self,
        conversation: &ConversationId,
        patch: &ConversationPatch,
    ) -> Result<ConversationSummary, TransportError> {
        self.send_json(Method::PATCH, &["chats", conversation.as_str()], patch)
            .await
    }

    async fn delete_conversation(
        &self,
        conversation: &ConversationId,
    ) -> Result<(), TransportError> {
        self.execute(
            Method::DELETE,
            self.endpoint(&["chats", conversation.as_str()])?,
            None,
        )
        .await?;
        Ok(())
    }

    async fn submit_employment(
        &self,
        body: &EmploymentSubmission,
    ) -> Result<serde_json::Value, TransportError> {
        self.send_json(Method::POST, &["uia", "submit", "employment"], body)
            .await
    }

    async fn submit_skills(&self, body: &SkillsSubmission) -> Result<SkillsReceipt, TransportError> {
        let receipt: Option<SkillsReceipt> = self
            .send_json(Method::POST, &["uia", "submit", "skills"], body)
            .await?;
        Ok(receipt.unwrap_or_default())
    }

    async fn submit_insights(
        &self,
        body: &InsightSubmission,
    ) -> Result<InsightReceipt, TransportError> {
        let receipt: Option<InsightReceipt> = self
            .send_json(Method::POST, &["insights", "submit"], body)
            .await?;
        Ok(receipt.unwrap_or_default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn transport(base_url: &str) -> Result<HttpTransport, TransportError> {
        let server = ServerConfig {
            base_url: base_url.to_string(),
            ..ServerConfig::default()
        };
        HttpTransport::new(&server, Arc::new(TokenStore::default()))
    }

    #[test]
    fn test_endpoint_joins_segments() {
        let t = transport("http://localhost:8000").unwrap();
        assert_eq!(
            t.endpoint(&["messages", "c1"]).unwrap().as_str(),
            "http://localhost:8000/messages/c1"
        );
    }

    #[test]
    fn test_endpoint_keeps_base_path_and_escapes() {
        let t = transport("https://example.com/api/").unwrap();
        assert_eq!(
            t.endpoint(&["chats", "a b"]).unwrap().as_str(),
            "https://example.com/api/chats/a%20b"
        );
    }

    #[test]
    fn test_invalid_base_url() {
        assert!(matches!(
            transport("not a url"),
            Err(TransportError::InvalidUrl(_))
        ));
        assert!(matches!(
            transport("mailto:someone@example.com"),
            Err(TransportError::InvalidUrl(_))
        ));
    }

    #[test]
    fn test_decode_empty_body_as_null() {
        let v: Option<SkillsReceipt> = decode(b"").unwrap();
        assert!(v.is_none());
        let v: serde_json::Value = decode(b"  \n").unwrap();
        assert!(v.is_null());
        let v: SkillsReceipt = decode(br#"{"mode":"system_decide"}"#).unwrap();
        assert!(v.is_system_decide());
    }
}
