//! [`Gateway`] over the calendar backend's JSON API.

use super::wire::{
    self, CalendarsEnvelope, CreatedEnvelope, DeleteEventBody, DeleteTaskBody, ErrorBody,
    EventsEnvelope, ProfileBody, TasksEnvelope, UpdatedEnvelope,
};
use super::Gateway;
use crate::classifier::{classify, RawRecord};
use crate::config::{backend_base_url, SyncConfig};
use crate::error::GatewayError;
use crate::model::{CalendarItem, CalendarRef, ItemPatch, ItemSpec, Profile};
use async_trait::async_trait;
use reqwest::Method;
use serde::de::DeserializeOwned;
use serde::Serialize;
use url::Url;

/// Markers the backend leaves in error bodies when Google reports the
/// target as gone. The backend does not always forward the 404/410 status.
const NOT_FOUND_MARKERS: &[&str] = &[
    "notFound",
    "HttpError 404",
    "HttpError 410",
    "Resource has been deleted",
];

pub struct HttpGateway {
    client: reqwest::Client,
    base_url: Url,
    default_calendar_id: String,
    time_zone: Option<String>,
}

impl HttpGateway {
    pub fn new(config: &SyncConfig) -> Result<Self, GatewayError> {
        let client = reqwest::Client::builder()
            .timeout(config.request_timeout())
            .build()
            .map_err(|source| GatewayError::Transport {
                endpoint: config.backend_url.clone(),
                source,
            })?;
        let mut gateway = Self::with_client(client, &config.backend_url)?;
        gateway.default_calendar_id = config.calendar_id.clone();
        gateway.time_zone = config.timezone.clone();
        Ok(gateway)
    }

    /// Build a gateway around an existing client.
    pub fn with_client(client: reqwest::Client, backend_url: &str) -> Result<Self, GatewayError> {
        let base_url = backend_base_url(backend_url).map_err(|source| GatewayError::InvalidUrl {
            url: backend_url.to_string(),
            source,
        })?;
        Ok(Self {
            client,
            base_url,
            default_calendar_id: "primary".to_string(),
            time_zone: None,
        })
    }

    pub fn base_url(&self) -> &Url {
        &self.base_url
    }

    fn endpoint(&self, path: &str) -> Result<Url, GatewayError> {
        self.base_url
            .join(path)
            .map_err(|source| GatewayError::InvalidUrl {
                url: format!("{}{}", self.base_url, path),
                source,
            })
    }

    async fn get_json<T: DeserializeOwned>(&self, path: &str) -> Result<T, GatewayError> {
        let url = self.endpoint(path)?;
        log::debug!("GET {}", url);
        let resp = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|source| transport(path, source))?;
        let text = read_success(path, resp).await?;
        decode(path, &text)
    }

    async fn send_json<B, T>(&self, method: Method, path: &str, body: &B) -> Result<T, GatewayError>
    where
        B: Serialize + ?Sized + Sync,
        T: DeserializeOwned,
    {
        let text = self.send(method, path, body).await?;
        decode(path, &text)
    }

    async fn send<B>(&self, method: Method, path: &str, body: &B) -> Result<String, GatewayError>
    where
        B: Serialize + ?Sized + Sync,
    {
        let url = self.endpoint(path)?;
        log::debug!("{} {}", method, url);
        let resp = self
            .client
            .request(method, url)
            .json(body)
            .send()
            .await
            .map_err(|source| transport(path, source))?;
        read_success(path, resp).await
    }
}

#[async_trait]
impl Gateway for HttpGateway {
    fn name(&self) -> &'static str {
        "http"
    }

    async fn list_events(
        &self,
        user_id: &str,
        calendar_id: &str,
    ) -> Result<Vec<RawRecord>, GatewayError> {
        let path = format!(
            "events/?email={}&calendar_id={}",
            urlencoding::encode(user_id),
            urlencoding::encode(calendar_id)
        );
        let envelope: EventsEnvelope = self.get_json(&path).await?;
        Ok(envelope
            .events
            .into_iter()
            .map(|mut record| {
                if record.calendar_id.is_none() {
                    record.calendar_id = Some(calendar_id.to_string());
                }
                record
            })
            .collect())
    }

    async fn list_tasks(&self, user_id: &str) -> Result<Vec<RawRecord>, GatewayError> {
        let path = format!("tasks/?email={}", urlencoding::encode(user_id));
        let envelope: TasksEnvelope = self.get_json(&path).await?;
        Ok(envelope.tasks)
    }

    async fn list_calendars(&self, user_id: &str) -> Result<Vec<CalendarRef>, GatewayError> {
        let path = format!("calendars/?email={}", urlencoding::encode(user_id));
        let envelope: CalendarsEnvelope = self.get_json(&path).await?;
        Ok(envelope.calendars.into_iter().map(Into::into).collect())
    }

    async fn get_profile(&self, user_id: &str) -> Result<Profile, GatewayError> {
        let path = format!("profile/?email={}", urlencoding::encode(user_id));
        let body: ProfileBody = self.get_json(&path).await?;
        Ok(body.into())
    }

    async fn create_item(
        &self,
        user_id: &str,
        spec: &ItemSpec,
    ) -> Result<CalendarItem, GatewayError> {
        const PATH: &str = "items/create/";
        let body = wire::create_item_body(
            user_id,
            spec,
            &self.default_calendar_id,
            self.time_zone.as_deref(),
        );
        let envelope: CreatedEnvelope = self.send_json(Method::POST, PATH, &body).await?;
        let mut record = envelope
            .into_record()
            .ok_or_else(|| missing_record(PATH, "google_event or google_task"))?;
        if record.calendar_id.is_none() {
            record.calendar_id = Some(body.google_calendar_id.clone());
        }
        Ok(classify(&record).item)
    }

    async fn update_event(
        &self,
        user_id: &str,
        id: &str,
        patch: &ItemPatch,
    ) -> Result<CalendarItem, GatewayError> {
        const PATH: &str = "events/update";
        let body = wire::update_event_body(user_id, id, patch);
        let envelope: UpdatedEnvelope = self.send_json(Method::PUT, PATH, &body).await?;
        let record = envelope.event.ok_or_else(|| missing_record(PATH, "event"))?;
        Ok(classify(&record).item)
    }

    async fn delete_event(&self, user_id: &str, id: &str) -> Result<(), GatewayError> {
        let body = DeleteEventBody {
            email: user_id.to_string(),
            event_id: id.to_string(),
        };
        self.send(Method::DELETE, "events/delete", &body).await?;
        Ok(())
    }

    async fn delete_task(&self, user_id: &str, id: &str) -> Result<(), GatewayError> {
        let body = DeleteTaskBody {
            email: user_id.to_string(),
            task_id: id.to_string(),
        };
        self.send(Method::DELETE, "tasks/delete", &body).await?;
        Ok(())
    }
}

fn transport(endpoint: &str, source: reqwest::Error) -> GatewayError {
    GatewayError::Transport {
        endpoint: endpoint.to_string(),
        source,
    }
}

fn decode<T: DeserializeOwned>(endpoint: &str, text: &str) -> Result<T, GatewayError> {
    serde_json::from_str(text).map_err(|source| GatewayError::Decode {
        endpoint: endpoint.to_string(),
        source,
    })
}

fn missing_record(endpoint: &str, field: &'static str) -> GatewayError {
    GatewayError::Decode {
        endpoint: endpoint.to_string(),
        source: serde::de::Error::missing_field(field),
    }
}

/// Body of a 2xx response, or the matching error.
async fn read_success(endpoint: &str, resp: reqwest::Response) -> Result<String, GatewayError> {
    let status = resp.status();
    let text = resp.text().await.map_err(|source| transport(endpoint, source))?;
    if status.is_success() {
        return Ok(text);
    }

    if is_not_found(status.as_u16(), &text) {
        log::debug!("{} reported the target as gone: {}", endpoint, text);
        return Err(GatewayError::NotFound {
            endpoint: endpoint.to_string(),
        });
    }

    let message = serde_json::from_str::<ErrorBody>(&text)
        .ok()
        .map(|body| body.error)
        .filter(|error| !error.is_empty())
        .unwrap_or(text);
    Err(GatewayError::Status {
        endpoint: endpoint.to_string(),
        status: status.as_u16(),
        body: message,
    })
}

fn is_not_found(status: u16, body: &str) -> bool {
    status == 404 || status == 410 || NOT_FOUND_MARKERS.iter().any(|m| body.contains(m))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_not_found_detection() {
        assert!(is_not_found(404, ""));
        assert!(is_not_found(410, ""));
        assert!(is_not_found(
            500,
            r#"{"error": "<HttpError 410 when requesting ... returned \"Resource has been deleted\">"}"#
        ));
        assert!(!is_not_found(500, r#"{"error": "Invalid Credentials"}"#));
    }

    #[test]
    fn test_base_url_normalized() {
        let gateway =
            HttpGateway::with_client(reqwest::Client::new(), "http://localhost:8000/auth").unwrap();
        assert_eq!(gateway.base_url().as_str(), "http://localhost:8000/auth/");
        assert_eq!(
            gateway.endpoint("events/?email=a%40b.c").unwrap().as_str(),
            "http://localhost:8000/auth/events/?email=a%40b.c"
        );
    }

    #[test]
    fn test_invalid_base_url() {
        let err = HttpGateway::with_client(reqwest::Client::new(), "::nope").err();
        assert!(matches!(err, Some(GatewayError::InvalidUrl { .. })));
    }
}
