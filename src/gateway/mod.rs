//! Contract between the sync session and the remote calendar backend.

pub mod http;
pub mod wire;

use crate::classifier::RawRecord;
use crate::error::GatewayError;
use crate::model::{CalendarItem, CalendarRef, ItemPatch, ItemSpec, Profile};
use async_trait::async_trait;

pub use http::HttpGateway;

/// Remote read/write calls, keyed by the signed-in user's identifier.
///
/// Listings return raw records; the session classifies them. Calls are
/// stateless and may run concurrently.
#[async_trait]
pub trait Gateway: Send + Sync {
    fn name(&self) -> &'static str;

    async fn list_events(
        &self,
        user_id: &str,
        calendar_id: &str,
    ) -> Result<Vec<RawRecord>, GatewayError>;

    async fn list_tasks(&self, user_id: &str) -> Result<Vec<RawRecord>, GatewayError>;

    async fn list_calendars(&self, user_id: &str) -> Result<Vec<CalendarRef>, GatewayError>;

    async fn get_profile(&self, user_id: &str) -> Result<Profile, GatewayError>;

    async fn create_item(
        &self,
        user_id: &str,
        spec: &ItemSpec,
    ) -> Result<CalendarItem, GatewayError>;

    async fn update_event(
        &self,
        user_id: &str,
        id: &str,
        patch: &ItemPatch,
    ) -> Result<CalendarItem, GatewayError>;

    async fn delete_event(&self, user_id: &str, id: &str) -> Result<(), GatewayError>;

    async fn delete_task(&self, user_id: &str, id: &str) -> Result<(), GatewayError>;
}

pub type DynGateway = dyn Gateway + Send + Sync;
