//! JSON-over-HTTP clients for the chat services.
//!
//! Every call is a `POST {base}/{service}/{operation}` with a JSON body.
//! Connection failures, timeouts, 5xx and 429 responses are transient;
//! other 4xx responses are permanent rejections.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::StatusCode;
use serde::{Deserialize, Serialize, de::DeserializeOwned};
use url::Url;

use super::{
    ServiceClients,
    error::{ServiceError, ServiceResult},
    traits::{
        Conversation, ConversationIndex, MessageStore, NotificationDispatcher, ObjectStore, Page,
    },
};
use crate::{config::ServicesConfig, notification::Notification};

/// Errors building HTTP clients from configuration.
#[derive(Debug, thiserror::Error)]
pub enum HttpClientError {
    #[error("invalid {name} '{url}': {source}")]
    InvalidUrl {
        name: &'static str,
        url: String,
        #[source]
        source: url::ParseError,
    },

    #[error("failed to build HTTP client: {0}")]
    Build(#[from] reqwest::Error),
}

/// Shared plumbing for one service endpoint.
#[derive(Clone)]
struct Endpoint {
    client: reqwest::Client,
    base: Url,
    service: &'static str,
}

impl Endpoint {
    fn new(
        client: reqwest::Client,
        name: &'static str,
        url: &str,
        service: &'static str,
    ) -> Result<Self, HttpClientError> {
        let base = Url::parse(url).map_err(|source| HttpClientError::InvalidUrl {
            name,
            url: url.to_string(),
            source,
        })?;
        Ok(Self {
            client,
            base,
            service,
        })
    }

    async fn post<Req, Resp>(&self, operation: &str, body: &Req) -> ServiceResult<Resp>
    where
        Req: Serialize + ?Sized,
        Resp: DeserializeOwned,
    {
        let url = format!(
            "{}/{}/{}",
            self.base.as_str().trim_end_matches('/'),
            self.service,
            operation
        );

        let response = self
            .client
            .post(&url)
            .json(body)
            .send()
            .await
            .map_err(|e| self.classify(e))?;

        let status = response.status();
        if !status.is_success() {
            let message = response.text().await.unwrap_or_default();
            return Err(self.status_error(status, message));
        }

        response
            .json::<Resp>()
            .await
            .map_err(|e| ServiceError::InvalidResponse {
                service: self.service,
                message: e.to_string(),
            })
    }

    fn classify(&self, error: reqwest::Error) -> ServiceError {
        if error.is_timeout() {
            ServiceError::Timeout {
                service: self.service,
            }
        } else if let Some(status) = error.status() {
            self.status_error(status, error.to_string())
        } else {
            ServiceError::Unavailable {
                service: self.service,
                message: error.to_string(),
            }
        }
    }

    fn status_error(&self, status: StatusCode, message: String) -> ServiceError {
        let message = if message.is_empty() {
            status.to_string()
        } else {
            format!("{status}: {message}")
        };
        if status.is_server_error() || status == StatusCode::TOO_MANY_REQUESTS {
            ServiceError::Unavailable {
                service: self.service,
                message,
            }
        } else {
            ServiceError::Rejected {
                service: self.service,
                message,
            }
        }
    }
}

#[derive(Serialize)]
struct AgedBoundaryRequest<'a> {
    conversation_id: &'a str,
    cutoff_ms: i64,
}

#[derive(Deserialize)]
struct AgedBoundaryResponse {
    seq: Option<i64>,
}

#[derive(Serialize)]
struct DeletePhysicalRequest<'a> {
    conversation_id: &'a str,
    seqs: &'a [i64],
}

#[derive(Deserialize)]
struct DeletedResponse {
    deleted: u64,
}

#[derive(Serialize)]
struct ListConversationsRequest {
    page_number: u32,
    show_number: u32,
}

#[derive(Deserialize)]
struct ListConversationsResponse {
    #[serde(default)]
    conversations: Vec<Conversation>,
}

#[derive(Serialize)]
struct AdvanceFloorRequest<'a> {
    conversation_id: &'a str,
    floor: i64,
}

#[derive(Serialize)]
struct TrimUserIndexRequest<'a> {
    user_id: &'a str,
    conversation_id: &'a str,
    floor: i64,
}

#[derive(Serialize)]
struct ListObjectsRequest<'a> {
    category: &'a str,
    cutoff_ms: i64,
}

#[derive(Deserialize)]
struct ListObjectsResponse {
    #[serde(default)]
    keys: Vec<String>,
}

#[derive(Serialize)]
struct DeleteObjectsRequest<'a> {
    category: &'a str,
    keys: &'a [String],
}

#[derive(Deserialize)]
struct Empty {}

pub struct HttpMessageStore(Endpoint);

#[async_trait]
impl MessageStore for HttpMessageStore {
    async fn list_aged_boundary(
        &self,
        conversation_id: &str,
        cutoff: DateTime<Utc>,
    ) -> ServiceResult<Option<i64>> {
        let response: AgedBoundaryResponse = self
            .0
            .post(
                "aged_boundary",
                &AgedBoundaryRequest {
                    conversation_id,
                    cutoff_ms: cutoff.timestamp_millis(),
                },
            )
            .await?;
        Ok(response.seq)
    }

    async fn delete_physical(&self, conversation_id: &str, seqs: &[i64]) -> ServiceResult<u64> {
        let response: DeletedResponse = self
            .0
            .post(
                "delete_physical",
                &DeletePhysicalRequest {
                    conversation_id,
                    seqs,
                },
            )
            .await?;
        Ok(response.deleted)
    }
}

pub struct HttpConversationIndex(Endpoint);

#[async_trait]
impl ConversationIndex for HttpConversationIndex {
    async fn list_conversations(&self, page: Page) -> ServiceResult<Vec<Conversation>> {
        let response: ListConversationsResponse = self
            .0
            .post(
                "list",
                &ListConversationsRequest {
                    page_number: page.number,
                    show_number: page.size,
                },
            )
            .await?;
        Ok(response.conversations)
    }

    async fn advance_retained_floor(
        &self,
        conversation_id: &str,
        new_floor: i64,
    ) -> ServiceResult<()> {
        let _: Empty = self
            .0
            .post(
                "advance_floor",
                &AdvanceFloorRequest {
                    conversation_id,
                    floor: new_floor,
                },
            )
            .await?;
        Ok(())
    }

    async fn trim_user_index(
        &self,
        user_id: &str,
        conversation_id: &str,
        floor: i64,
    ) -> ServiceResult<()> {
        let _: Empty = self
            .0
            .post(
                "trim_user_index",
                &TrimUserIndexRequest {
                    user_id,
                    conversation_id,
                    floor,
                },
            )
            .await?;
        Ok(())
    }
}

pub struct HttpObjectStore(Endpoint);

#[async_trait]
impl ObjectStore for HttpObjectStore {
    async fn list_older_than(
        &self,
        category: &str,
        cutoff: DateTime<Utc>,
    ) -> ServiceResult<Vec<String>> {
        let response: ListObjectsResponse = self
            .0
            .post(
                "list_older_than",
                &ListObjectsRequest {
                    category,
                    cutoff_ms: cutoff.timestamp_millis(),
                },
            )
            .await?;
        Ok(response.keys)
    }

    async fn delete_batch(&self, category: &str, keys: &[String]) -> ServiceResult<u64> {
        let response: DeletedResponse = self
            .0
            .post("delete_batch", &DeleteObjectsRequest { category, keys })
            .await?;
        Ok(response.deleted)
    }
}

pub struct HttpNotificationDispatcher(Endpoint);

#[async_trait]
impl NotificationDispatcher for HttpNotificationDispatcher {
    async fn notify(&self, notification: Notification) -> ServiceResult<()> {
        let _: Empty = self.0.post("notify", &notification).await?;
        Ok(())
    }
}

/// Build HTTP clients for every service in `config`.
pub fn build_service_clients(config: &ServicesConfig) -> Result<ServiceClients, HttpClientError> {
    let client = reqwest::Client::builder()
        .timeout(config.timeout())
        .build()?;

    Ok(ServiceClients {
        messages: std::sync::Arc::new(HttpMessageStore(Endpoint::new(
            client.clone(),
            "services.message_url",
            &config.message_url,
            "msg",
        )?)),
        conversations: std::sync::Arc::new(HttpConversationIndex(Endpoint::new(
            client.clone(),
            "services.conversation_url",
            &config.conversation_url,
            "conversation",
        )?)),
        objects: std::sync::Arc::new(HttpObjectStore(Endpoint::new(
            client.clone(),
            "services.object_url",
            &config.object_url,
            "object",
        )?)),
        dispatcher: std::sync::Arc::new(HttpNotificationDispatcher(Endpoint::new(
            client,
            "services.push_url",
            &config.push_url,
            "push",
        )?)),
    })
}

#[cfg(test)]
mod tests {
    use serde_json::json;
    use wiremock::{
        Mock, MockServer, ResponseTemplate,
        matchers::{body_json, method, path},
    };

    use super::*;
    use crate::notification::{DeleteMsgsTips, EventType, NotificationPayload};

    fn config_for(server: &MockServer) -> ServicesConfig {
        ServicesConfig {
            message_url: server.uri(),
            conversation_url: server.uri(),
            object_url: server.uri(),
            push_url: server.uri(),
            timeout_secs: 5,
        }
    }

    #[tokio::test]
    async fn test_aged_boundary_request() {
        let server = MockServer::start().await;
        let cutoff = DateTime::from_timestamp_millis(1_700_000_000_000).unwrap();
        Mock::given(method("POST"))
            .and(path("/msg/aged_boundary"))
            .and(body_json(json!({
                "conversation_id": "si_a_b",
                "cutoff_ms": 1_700_000_000_000i64
            })))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"seq": 10})))
            .mount(&server)
            .await;

        let clients = build_service_clients(&config_for(&server)).unwrap();
        let boundary = clients
            .messages
            .list_aged_boundary("si_a_b", cutoff)
            .await
            .unwrap();
        assert_eq!(boundary, Some(10));
    }

    #[tokio::test]
    async fn test_null_boundary() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/msg/aged_boundary"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"seq": null})))
            .mount(&server)
            .await;

        let clients = build_service_clients(&config_for(&server)).unwrap();
        let boundary = clients
            .messages
            .list_aged_boundary("c1", Utc::now())
            .await
            .unwrap();
        assert_eq!(boundary, None);
    }

    #[tokio::test]
    async fn test_list_conversations() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/conversation/list"))
            .and(body_json(json!({"page_number": 2, "show_number": 50})))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "conversations": [{
                    "conversation_id": "sg_team",
                    "session_type": "read_group",
                    "max_seq": 120,
                    "retained_floor": 30,
                    "members": [{"user_id": "alice", "has_read_seq": 100}]
                }]
            })))
            .mount(&server)
            .await;

        let clients = build_service_clients(&config_for(&server)).unwrap();
        let page = Page::first(50).next();
        let conversations = clients.conversations.list_conversations(page).await.unwrap();
        assert_eq!(conversations.len(), 1);
        assert_eq!(conversations[0].retained_floor, 30);
        assert_eq!(conversations[0].members[0].user_id, "alice");
    }

    #[tokio::test]
    async fn test_server_error_is_transient() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/object/delete_batch"))
            .respond_with(ResponseTemplate::new(503))
            .mount(&server)
            .await;

        let clients = build_service_clients(&config_for(&server)).unwrap();
        let err = clients
            .objects
            .delete_batch("msg-picture", &["k1".to_string()])
            .await
            .unwrap_err();
        assert!(err.is_transient(), "{err}");
        assert_eq!(err.service(), "object");
    }

    #[tokio::test]
    async fn test_rate_limit_is_transient() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/conversation/advance_floor"))
            .respond_with(ResponseTemplate::new(429))
            .mount(&server)
            .await;

        let clients = build_service_clients(&config_for(&server)).unwrap();
        let err = clients
            .conversations
            .advance_retained_floor("c1", 10)
            .await
            .unwrap_err();
        assert!(err.is_transient());
    }

    #[tokio::test]
    async fn test_client_error_is_permanent() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/conversation/advance_floor"))
            .respond_with(ResponseTemplate::new(409).set_body_string("floor regression"))
            .mount(&server)
            .await;

        let clients = build_service_clients(&config_for(&server)).unwrap();
        let err = clients
            .conversations
            .advance_retained_floor("c1", 3)
            .await
            .unwrap_err();
        assert!(!err.is_transient());
        assert!(err.to_string().contains("floor regression"));
    }

    #[tokio::test]
    async fn test_malformed_body_is_invalid_response() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/object/list_older_than"))
            .respond_with(ResponseTemplate::new(200).set_body_string("not json"))
            .mount(&server)
            .await;

        let clients = build_service_clients(&config_for(&server)).unwrap();
        let err = clients
            .objects
            .list_older_than("msg-file", Utc::now())
            .await
            .unwrap_err();
        assert!(matches!(err, ServiceError::InvalidResponse { .. }));
    }

    #[tokio::test]
    async fn test_notify_posts_payload() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/push/notify"))
            .and(body_json(json!({
                "from_user_id": "alice",
                "to_user_id": "alice",
                "event_type": "delete_msgs",
                "payload": {"user_id": "alice", "conversation_id": "c1", "seqs": [1, 2]}
            })))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({})))
            .expect(1)
            .mount(&server)
            .await;

        let clients = build_service_clients(&config_for(&server)).unwrap();
        clients
            .dispatcher
            .notify(Notification {
                from_user_id: "alice".into(),
                to_user_id: "alice".into(),
                event_type: EventType::DeleteMsgs,
                session_type: None,
                payload: NotificationPayload::DeleteMsgs(DeleteMsgsTips {
                    user_id: "alice".into(),
                    conversation_id: "c1".into(),
                    seqs: vec![1, 2],
                }),
            })
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_unreachable_service_is_transient() {
        let config = ServicesConfig {
            message_url: "http://127.0.0.1:1".into(),
            conversation_url: "http://127.0.0.1:1".into(),
            object_url: "http://127.0.0.1:1".into(),
            push_url: "http://127.0.0.1:1".into(),
            timeout_secs: 2,
        };
        let clients = build_service_clients(&config).unwrap();
        let err = clients
            .messages
            .delete_physical("c1", &[1])
            .await
            .unwrap_err();
        assert!(err.is_transient(), "{err}");
    }

    #[test]
    fn test_invalid_url_rejected() {
        let config = ServicesConfig {
            message_url: "not a url".into(),
            ..Default::default()
        };
        let err = build_service_clients(&config).err().unwrap();
        assert!(err.to_string().contains("services.message_url"));
    }
}
