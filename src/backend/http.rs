use async_trait::async_trait;
use futures::StreamExt;
use log::{ debug, error, info, warn };
use reqwest::{ multipart, Client as HttpClient, Method, RequestBuilder, Response, StatusCode };
use serde::de::DeserializeOwned;
use serde_json::Value as JsonValue;
use std::collections::HashMap;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::timeout;
use tokio_stream::wrappers::ReceiverStream;
use url::Url;

use super::{
    non_empty_node_id,
    Backend,
    BackendError,
    ChatTreeResponse,
    EditReceipt,
    EventStream,
    SendReceipt,
};
use crate::config::ClientConfig;
use crate::models::api::{
    ChatTreeBody,
    CreateChatBody,
    EditNodeBody,
    EditNodeRequest,
    FileInfoBody,
    SendMessageBody,
    SendMessageRequest,
    SuccessBody,
    ToggleToolRequest,
    UploadBody,
};
use crate::models::chat::{ ChatId, ChatSummary, FileId, FileRef, NodeId, ToolList };
use crate::models::stream::StreamEvent;
use crate::stream::sse::{ parse_event, SseDecoder };

const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// `Backend` over the chat service's JSON API and its `text/event-stream`
/// response streams. The login session lives in the client's cookie store.
#[derive(Debug, Clone)]
pub struct HttpBackend {
    http: HttpClient,
    base_url: Url,
    request_timeout: Duration,
    stream_buffer: usize,
    stream_idle_timeout: Duration,
}

impl HttpBackend {
    pub fn new(config: &ClientConfig) -> Result<Self, BackendError> {
        let mut base_url = config.base_url.clone();
        if base_url.cannot_be_a_base() {
            return Err(BackendError::InvalidBaseUrl(base_url.to_string()));
        }
        if !base_url.path().ends_with('/') {
            let path = format!("{}/", base_url.path());
            base_url.set_path(&path);
        }

        let http = HttpClient::builder()
            .cookie_store(true)
            .connect_timeout(CONNECT_TIMEOUT)
            .build()?;

        Ok(Self {
            http,
            base_url,
            request_timeout: config.request_timeout,
            stream_buffer: config.stream_buffer.max(1),
            stream_idle_timeout: config.stream_idle_timeout,
        })
    }

    pub fn base_url(&self) -> &Url {
        &self.base_url
    }

    /// Submits the login form. The backend answers a wrong password by
    /// redirecting back to the login page.
    pub async fn login(&self, password: &str) -> Result<(), BackendError> {
        let url = self.endpoint(&["login"])?;
        info!("Logging in at {}", url);
        let response = self.http
            .post(url)
            .form(&[("password", password)])
            .timeout(self.request_timeout)
            .send().await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(BackendError::Status { status: status.as_u16(), body });
        }
        if response.url().path().trim_end_matches('/').ends_with("/login") {
            warn!("Login rejected by {}", self.base_url);
            return Err(BackendError::Rejected("Incorrect password".to_string()));
        }
        info!("Logged in");
        Ok(())
    }

    fn endpoint(&self, segments: &[&str]) -> Result<Url, BackendError> {
        let mut url = self.base_url.clone();
        url.path_segments_mut()
            .map_err(|_| BackendError::InvalidBaseUrl(self.base_url.to_string()))?
            .pop_if_empty()
            .extend(segments);
        Ok(url)
    }

    fn request(&self, method: Method, segments: &[&str]) -> Result<RequestBuilder, BackendError> {
        let url = self.endpoint(segments)?;
        debug!("{} {}", method, url);
        Ok(self.http.request(method, url).timeout(self.request_timeout))
    }

    async fn send_json<T: DeserializeOwned>(&self, request: RequestBuilder) -> Result<T, BackendError> {
        let response = request.send().await?;
        let value = read_json(response).await?;
        Ok(serde_json::from_value(value)?)
    }
}

/// Reads a JSON body, turning `{"error": ..}` and `{"success": false}`
/// answers into `Rejected` and other non-2xx answers into `Status`.
async fn read_json(response: Response) -> Result<JsonValue, BackendError> {
    let status = response.status();
    let body = response.text().await?;
    let value = match serde_json::from_str::<JsonValue>(&body) {
        Ok(value) => value,
        Err(err) => {
            if status.is_success() {
                return Err(BackendError::Decode(err));
            }
            return Err(BackendError::Status { status: status.as_u16(), body });
        }
    };

    if let Some(message) = value.get("error") {
        let message = match message {
            JsonValue::String(text) => text.clone(),
            other => other.to_string(),
        };
        return Err(BackendError::Rejected(message));
    }
    if !status.is_success() {
        return Err(BackendError::Status { status: status.as_u16(), body });
    }
    if value.get("success") == Some(&JsonValue::Bool(false)) {
        return Err(BackendError::Rejected("request was not successful".to_string()));
    }
    Ok(value)
}

#[async_trait]
impl Backend for HttpBackend {
    async fn list_chats(&self) -> Result<Vec<ChatSummary>, BackendError> {
        self.send_json(self.request(Method::GET, &["api", "chats"])?).await
    }

    async fn create_chat(&self) -> Result<ChatId, BackendError> {
        let body: CreateChatBody = self.send_json(
            self.request(Method::POST, &["api", "chats", "new"])?
        ).await?;
        info!("Created chat {}", body.chat_id);
        Ok(body.chat_id)
    }

    async fn delete_chat(&self, chat_id: &ChatId) -> Result<bool, BackendError> {
        let body: SuccessBody = self.send_json(
            self.request(Method::DELETE, &["api", "chats", chat_id.as_str()])?
        ).await?;
        Ok(body.success)
    }

    async fn get_chat_tree(&self, chat_id: &ChatId) -> Result<ChatTreeResponse, BackendError> {
        let body: ChatTreeBody = self.send_json(
            self.request(Method::GET, &["api", "chats", chat_id.as_str(), "tree"])?
        ).await?;
        let current_node_id = non_empty_node_id(
            body.current_node_id.or(body.tree.current_node_id)
        );
        Ok(ChatTreeResponse {
            title: body.title,
            current_node_id,
            root: body.tree.root,
        })
    }

    async fn send_message(
        &self,
        chat_id: &ChatId,
        text: &str,
        files: &[FileId]
    ) -> Result<SendReceipt, BackendError> {
        let request = self
            .request(Method::POST, &["api", "chats", chat_id.as_str(), "send"])?
            .json(&(SendMessageRequest { message: text, files }));
        let body: SendMessageBody = self.send_json(request).await?;
        Ok(SendReceipt {
            node_id: body.node_id,
            updated_title: body.updated_title,
        })
    }

    async fn continue_node(&self, chat_id: &ChatId, node_id: &NodeId) -> Result<bool, BackendError> {
        let body: SuccessBody = self.send_json(
            self.request(
                Method::POST,
                &["api", "chats", chat_id.as_str(), "continue", node_id.as_str()]
            )?
        ).await?;
        Ok(body.success)
    }

    async fn edit_node(
        &self,
        chat_id: &ChatId,
        node_id: &NodeId,
        text: &str,
        files: &[FileId]
    ) -> Result<EditReceipt, BackendError> {
        let request = self
            .request(Method::POST, &["api", "chats", chat_id.as_str(), "edit"])?
            .json(&(EditNodeRequest { node_id, content: text, files }));
        let body: EditNodeBody = self.send_json(request).await?;
        Ok(EditReceipt {
            node_id: body.node_id,
            should_generate: body.should_generate,
        })
    }

    async fn open_stream(&self, chat_id: &ChatId, node_id: &NodeId) -> Result<EventStream, BackendError> {
        let url = self.endpoint(&["api", "chats", chat_id.as_str(), "stream", node_id.as_str()])?;
        info!("Opening event stream {}", url);
        let response = self.http
            .get(url)
            .header(reqwest::header::ACCEPT, "text/event-stream")
            .send().await?;

        let status = response.status();
        if status != StatusCode::OK {
            let body = response.text().await.unwrap_or_default();
            return Err(BackendError::Status { status: status.as_u16(), body });
        }

        let (tx, rx) = mpsc::channel::<Result<StreamEvent, BackendError>>(self.stream_buffer);
        let node_id = node_id.clone();
        let idle = self.stream_idle_timeout;

        tokio::spawn(async move {
            let mut bytes = response.bytes_stream();
            let mut decoder = SseDecoder::new();

            loop {
                let chunk_result = match timeout(idle, bytes.next()).await {
                    Ok(Some(chunk_result)) => chunk_result,
                    Ok(None) => {
                        break;
                    }
                    Err(_) => {
                        error!("Stream for node {} stalled: no data for {:?}", node_id, idle);
                        let detail = format!("no data received for {:?}", idle);
                        let _ = tx.send(Err(BackendError::Transport(detail))).await;
                        return;
                    }
                };
                match chunk_result {
                    Ok(chunk) => {
                        for payload in decoder.feed(&chunk) {
                            if !forward(&tx, &payload).await {
                                debug!("Stream reader for node {} stopped: receiver dropped", node_id);
                                return;
                            }
                        }
                    }
                    Err(e) => {
                        error!("Stream for node {} broke: {}", node_id, e);
                        let _ = tx.send(Err(BackendError::Transport(e.to_string()))).await;
                        return;
                    }
                }
            }

            if let Some(payload) = decoder.finish() {
                forward(&tx, &payload).await;
            }
            debug!("Stream body for node {} ended", node_id);
        });

        Ok(Box::pin(ReceiverStream::new(rx)))
    }

    async fn list_files(&self) -> Result<HashMap<FileId, FileRef>, BackendError> {
        let body: HashMap<FileId, FileInfoBody> = self.send_json(
            self.request(Method::GET, &["api", "files"])?
        ).await?;
        Ok(
            body
                .into_iter()
                .map(|(uuid, info)| {
                    let file = FileRef {
                        uuid: uuid.clone(),
                        filename: info.filename,
                        mime_type: info.mime_type,
                        is_image: info.is_image,
                        size: info.size,
                    };
                    (uuid, file)
                })
                .collect()
        )
    }

    async fn upload_file(&self, bytes: Vec<u8>, filename: &str) -> Result<FileRef, BackendError> {
        let size = bytes.len() as u64;
        let part = multipart::Part::bytes(bytes).file_name(filename.to_string());
        let form = multipart::Form::new().part("file", part);
        let request = self.request(Method::POST, &["api", "files", "upload"])?.multipart(form);
        let body: UploadBody = self.send_json(request).await?;
        info!("Uploaded {} as {}", body.filename, body.file_uuid);
        Ok(FileRef {
            uuid: body.file_uuid,
            filename: body.filename,
            mime_type: body.mime_type,
            is_image: body.is_image,
            size: Some(size),
        })
    }

    async fn list_tools(&self) -> Result<ToolList, BackendError> {
        self.send_json(self.request(Method::GET, &["api", "tools"])?).await
    }

    async fn set_tool_enabled(&self, name: &str, enabled: bool) -> Result<bool, BackendError> {
        let request = self
            .request(Method::POST, &["api", "tools", "toggle"])?
            .json(&(ToggleToolRequest { tool_name: name, enabled }));
        let body: SuccessBody = self.send_json(request).await?;
        Ok(body.success)
    }
}

/// Decodes one payload and hands it to the session. `false` once the
/// receiving side is gone.
async fn forward(tx: &mpsc::Sender<Result<StreamEvent, BackendError>>, payload: &str) -> bool {
    match parse_event(payload) {
        Some(Ok(event)) => tx.send(Ok(event)).await.is_ok(),
        Some(Err(e)) => {
            warn!("Skipping malformed stream event: {} ({})", e, payload);
            !tx.is_closed()
        }
        None => !tx.is_closed(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn backend(base: &str) -> HttpBackend {
        HttpBackend::new(&ClientConfig::new(Url::parse(base).unwrap())).unwrap()
    }

    #[test]
    fn endpoints_keep_the_base_path() {
        let plain = backend("http://127.0.0.1:55551");
        assert_eq!(
            plain.endpoint(&["api", "chats", "c1", "tree"]).unwrap().as_str(),
            "http://127.0.0.1:55551/api/chats/c1/tree"
        );

        let nested = backend("http://host/app");
        assert_eq!(nested.endpoint(&["login"]).unwrap().as_str(), "http://host/app/login");
    }

    #[test]
    fn ids_are_escaped_as_path_segments() {
        let http = backend("http://host/");
        assert_eq!(
            http.endpoint(&["api", "chats", "a b/c"]).unwrap().as_str(),
            "http://host/api/chats/a%20b%2Fc"
        );
    }

    #[test]
    fn rejects_non_base_urls() {
        let config = ClientConfig::new(Url::parse("mailto:someone@example.com").unwrap());
        assert!(matches!(HttpBackend::new(&config), Err(BackendError::InvalidBaseUrl(_))));
    }
}
