//! The stateful core: owns fetched items, the derived schedule, the
//! selection and the polling loop, and funnels every mutation through the
//! gateway.
//!
//! Every fetch is tagged with the request epoch current when it started.
//! Results are applied only while that epoch is still current, so a slow
//! superseded refresh can never overwrite a newer one.

mod poll;

use crate::classifier::{classify, RawRecord};
use crate::config::SyncConfig;
use crate::error::{GatewayError, Resource, ResourceFailure, Result, SyncError};
use crate::gateway::DynGateway;
use crate::model::{
    CalendarItem, CalendarRef, Event, FilterKind, ItemPatch, ItemSpec, Profile, Task,
};
use crate::projector::{project, visible_ids, DayZone, ScheduleGroup};
use crate::selection::SelectionSet;
use futures::future::{join_all, BoxFuture, Either};
use futures::FutureExt;
use std::future::Future;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use tokio::sync::{broadcast, watch};
use tokio::task::JoinHandle;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MutationKind {
    Create,
    Update,
    Delete,
    BulkDelete,
}

/// Observable state of the session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Idle,
    Fetching { epoch: u64 },
    Mutating(MutationKind),
    TornDown,
}

/// Change notifications for the rendering layer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionMessage {
    ScheduleChanged,
    TasksChanged,
    /// Calendars or profile were replaced.
    DirectoryChanged,
    SelectionChanged { count: usize },
    BusyChanged(bool),
    RefreshFailed {
        epoch: u64,
        failures: Vec<ResourceFailure>,
    },
    TornDown,
}

#[derive(Debug, Clone)]
pub struct SessionOptions {
    pub user_email: String,
    pub calendar_id: String,
    pub filter: FilterKind,
    /// `None` disables background polling.
    pub poll_interval: Option<Duration>,
    /// Zone whose days the schedule is grouped by.
    pub day_zone: DayZone,
}

impl SessionOptions {
    pub fn new(user_email: impl Into<String>) -> Self {
        Self {
            user_email: user_email.into(),
            calendar_id: "primary".to_string(),
            filter: FilterKind::All,
            poll_interval: Some(Duration::from_secs(2)),
            day_zone: DayZone::Local,
        }
    }

    pub fn from_config(config: &SyncConfig, user_email: impl Into<String>) -> Self {
        Self {
            calendar_id: config.calendar_id.clone(),
            poll_interval: Some(config.poll_interval()),
            day_zone: config.day_zone().unwrap_or_default(),
            ..Self::new(user_email)
        }
    }

    pub fn with_filter(mut self, filter: FilterKind) -> Self {
        self.filter = filter;
        self
    }

    pub fn with_calendar(mut self, calendar_id: impl Into<String>) -> Self {
        self.calendar_id = calendar_id.into();
        self
    }

    pub fn with_poll_interval(mut self, interval: Option<Duration>) -> Self {
        self.poll_interval = interval;
        self
    }

    pub fn with_day_zone(mut self, zone: DayZone) -> Self {
        self.day_zone = zone;
        self
    }
}

/// What a completed refresh did with each resource it fetched.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RefreshReport {
    pub epoch: u64,
    pub applied: Vec<Resource>,
    /// Fetched fine but superseded by a newer refresh.
    pub discarded: Vec<Resource>,
}

impl RefreshReport {
    pub fn is_current(&self) -> bool {
        self.discarded.is_empty()
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BulkDeleteReport {
    pub deleted: usize,
    pub total: usize,
}

/// Read-only view of everything the rendering layer needs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionSnapshot {
    pub user_email: String,
    pub active_calendar_id: String,
    pub filter: FilterKind,
    pub schedule: Vec<ScheduleGroup>,
    pub tasks: Vec<Task>,
    pub calendars: Vec<CalendarRef>,
    pub profile: Option<Profile>,
    pub selection: Vec<String>,
    pub is_busy: bool,
    pub phase: Phase,
    pub request_epoch: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum DeleteTarget {
    Event,
    Task,
    Unknown,
}

enum FetchOutcome {
    Applied(Resource),
    Discarded(Resource),
    Failed(ResourceFailure),
}

struct BulkDeletePlan {
    user_email: String,
    targets: Vec<(String, DeleteTarget)>,
    mutation: MutationGuard,
}

struct FetchPlan {
    epoch: u64,
    user_email: String,
    calendar_id: String,
    with_calendars: bool,
    with_profile: bool,
}

struct SessionState {
    user_email: String,
    active_calendar_id: String,
    filter: FilterKind,
    day_zone: DayZone,
    events: Vec<Event>,
    tasks: Vec<Task>,
    calendars: Vec<CalendarRef>,
    calendars_loaded: bool,
    profile: Option<Profile>,
    schedule: Vec<ScheduleGroup>,
    selection: SelectionSet,
    request_epoch: u64,
    /// Epoch of the newest refresh still in flight.
    fetching: Option<u64>,
    /// Epoch of the newest non-silent refresh still in flight.
    busy_epoch: Option<u64>,
    mutations: Vec<MutationKind>,
    torn_down: bool,
    outbox: Vec<SessionMessage>,
}

impl SessionState {
    fn new(options: &SessionOptions) -> Self {
        Self {
            user_email: options.user_email.clone(),
            active_calendar_id: options.calendar_id.clone(),
            filter: options.filter,
            day_zone: options.day_zone,
            events: Vec::new(),
            tasks: Vec::new(),
            calendars: Vec::new(),
            calendars_loaded: false,
            profile: None,
            schedule: Vec::new(),
            selection: SelectionSet::new(),
            request_epoch: 0,
            fetching: None,
            busy_epoch: None,
            mutations: Vec::new(),
            torn_down: false,
            outbox: Vec::new(),
        }
    }

    fn ensure_live(&self) -> Result<()> {
        if self.torn_down {
            Err(SyncError::TornDown)
        } else {
            Ok(())
        }
    }

    fn accepts(&self, epoch: u64) -> bool {
        !self.torn_down && self.request_epoch == epoch
    }

    fn is_busy(&self) -> bool {
        self.busy_epoch.is_some() || !self.mutations.is_empty()
    }

    fn phase(&self) -> Phase {
        if self.torn_down {
            Phase::TornDown
        } else if let Some(epoch) = self.fetching {
            Phase::Fetching { epoch }
        } else if let Some(kind) = self.mutations.last() {
            Phase::Mutating(*kind)
        } else {
            Phase::Idle
        }
    }

    /// Recompute the schedule and prune the selection to what is visible.
    fn reproject(&mut self) {
        let items: Vec<CalendarItem> = self
            .events
            .iter()
            .cloned()
            .map(CalendarItem::Event)
            .collect();
        self.schedule = project(&items, self.filter, self.day_zone);
        let visible = visible_ids(&self.schedule);
        let pruned = self.selection.retain_visible(&visible);
        self.outbox.push(SessionMessage::ScheduleChanged);
        if pruned > 0 {
            log::debug!("pruned {} hidden ids from the selection", pruned);
            self.selection_changed();
        }
    }

    fn selection_changed(&mut self) {
        self.outbox.push(SessionMessage::SelectionChanged {
            count: self.selection.count(),
        });
    }

    fn is_visible(&self, id: &str) -> bool {
        self.schedule
            .iter()
            .flat_map(|group| group.items.iter())
            .any(|item| item.id() == id)
    }

    /// Drop `id` from the local item lists and the selection.
    fn remove_locally(&mut self, id: &str) -> DeleteTarget {
        self.selection.remove(id);
        let events_before = self.events.len();
        self.events.retain(|event| event.id != id);
        if self.events.len() != events_before {
            return DeleteTarget::Event;
        }
        let tasks_before = self.tasks.len();
        self.tasks.retain(|task| task.id != id);
        if self.tasks.len() != tasks_before {
            self.outbox.push(SessionMessage::TasksChanged);
            return DeleteTarget::Task;
        }
        DeleteTarget::Unknown
    }

    /// Supersede every fetch in flight so none of them can resurrect
    /// optimistically removed items.
    fn supersede_fetches(&mut self) {
        self.request_epoch += 1;
    }

    fn finish_fetch(&mut self, epoch: u64) {
        if self.fetching == Some(epoch) {
            self.fetching = None;
        }
        if self.busy_epoch == Some(epoch) {
            self.busy_epoch = None;
        }
    }

    fn begin_mutation(&mut self, kind: MutationKind) {
        self.mutations.push(kind);
    }

    fn end_mutation(&mut self, kind: MutationKind) {
        if let Some(pos) = self.mutations.iter().rposition(|k| *k == kind) {
            self.mutations.remove(pos);
        }
    }
}

struct SessionInner {
    gateway: Arc<DynGateway>,
    state: Mutex<SessionState>,
    tx: broadcast::Sender<SessionMessage>,
    poll_interval: Option<Duration>,
    shutdown: watch::Sender<bool>,
    poller: Mutex<Option<JoinHandle<()>>>,
}

impl SessionInner {
    /// Run `f` under the state lock, then publish whatever it queued.
    fn with_state<R>(&self, f: impl FnOnce(&mut SessionState) -> R) -> R {
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        let was_busy = state.is_busy();
        let result = f(&mut state);
        let now_busy = state.is_busy();
        if was_busy != now_busy {
            state.outbox.push(SessionMessage::BusyChanged(now_busy));
        }
        for message in state.outbox.drain(..) {
            // no subscribers is fine
            let _ = self.tx.send(message);
        }
        result
    }

    fn read<R>(&self, f: impl FnOnce(&SessionState) -> R) -> R {
        let state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        f(&state)
    }
}

impl Drop for SessionInner {
    fn drop(&mut self) {
        let _ = self.shutdown.send(true);
    }
}

/// Ends a mutation when dropped, so a future abandoned mid-flight cannot
/// leave the session busy.
struct MutationGuard {
    inner: Arc<SessionInner>,
    kind: MutationKind,
}

impl Drop for MutationGuard {
    fn drop(&mut self) {
        let kind = self.kind;
        self.inner.with_state(|state| state.end_mutation(kind));
    }
}

/// Clears the in-flight markers of one refresh when dropped.
struct FetchGuard<'a> {
    inner: &'a SessionInner,
    epoch: u64,
}

impl Drop for FetchGuard<'_> {
    fn drop(&mut self) {
        let epoch = self.epoch;
        self.inner.with_state(|state| state.finish_fetch(epoch));
    }
}

/// Handle to a sync session. Clones share the same session.
#[derive(Clone)]
pub struct SyncSession {
    inner: Arc<SessionInner>,
}

impl SyncSession {
    /// Create an idle session. Nothing is fetched and no poller runs until
    /// [`refresh`](Self::refresh) or [`start_polling`](Self::start_polling).
    pub fn new(gateway: Arc<DynGateway>, options: SessionOptions) -> Self {
        let (tx, _) = broadcast::channel(100);
        let (shutdown, _) = watch::channel(false);
        log::debug!(
            "session for {} on calendar {} via {} gateway",
            options.user_email,
            options.calendar_id,
            gateway.name()
        );
        Self {
            inner: Arc::new(SessionInner {
                gateway,
                state: Mutex::new(SessionState::new(&options)),
                tx,
                poll_interval: options.poll_interval,
                shutdown,
                poller: Mutex::new(None),
            }),
        }
    }

    /// Create a session, run the initial visible refresh and start polling.
    ///
    /// A failing initial refresh is logged and published as
    /// [`SessionMessage::RefreshFailed`]; the poller retries it.
    pub async fn open(gateway: Arc<DynGateway>, options: SessionOptions) -> Self {
        let session = Self::new(gateway, options);
        if let Err(err) = session.refresh(false).await {
            log::warn!("initial refresh failed: {}", err);
        }
        session.start_polling();
        session
    }

    /// Start the background silent refresh. No-op when polling is disabled,
    /// already running, or the session is torn down.
    pub fn start_polling(&self) {
        let Some(interval) = self.inner.poll_interval else {
            return;
        };
        if self.inner.read(|state| state.torn_down) {
            return;
        }
        let mut poller = self
            .inner
            .poller
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        if poller.is_some() {
            return;
        }
        *poller = Some(poll::spawn(
            Arc::downgrade(&self.inner),
            interval,
            self.inner.shutdown.subscribe(),
        ));
        log::debug!("polling every {:?}", interval);
    }

    pub fn subscribe(&self) -> broadcast::Receiver<SessionMessage> {
        self.inner.tx.subscribe()
    }

    /// Refresh events and tasks, plus calendars and profile until they
    /// have been loaded once.
    pub async fn refresh(&self, silent: bool) -> Result<RefreshReport> {
        self.run_refresh(silent, false).await
    }

    /// Like [`refresh`](Self::refresh) but always refetches calendars and
    /// profile too.
    pub async fn refresh_all(&self, silent: bool) -> Result<RefreshReport> {
        self.run_refresh(silent, true).await
    }

    async fn run_refresh(&self, silent: bool, with_directory: bool) -> Result<RefreshReport> {
        let plan = self.inner.with_state(|state| {
            state.ensure_live()?;
            state.request_epoch += 1;
            let epoch = state.request_epoch;
            state.fetching = Some(epoch);
            if !silent {
                state.busy_epoch = Some(epoch);
            }
            Ok::<_, SyncError>(FetchPlan {
                epoch,
                user_email: state.user_email.clone(),
                calendar_id: state.active_calendar_id.clone(),
                with_calendars: with_directory || !state.calendars_loaded,
                with_profile: with_directory || state.profile.is_none(),
            })
        })?;
        let epoch = plan.epoch;
        let in_flight = FetchGuard {
            inner: self.inner.as_ref(),
            epoch,
        };
        if silent {
            log::debug!("refresh #{} started (silent)", epoch);
        } else {
            log::debug!("refresh #{} started", epoch);
        }

        let gateway = &self.inner.gateway;
        let mut fetches: Vec<BoxFuture<'_, FetchOutcome>> = Vec::with_capacity(4);
        fetches.push(
            async {
                let result = gateway
                    .list_events(&plan.user_email, &plan.calendar_id)
                    .await;
                self.settle(epoch, Resource::Events, result, Self::apply_events)
            }
            .boxed(),
        );
        fetches.push(
            async {
                let result = gateway.list_tasks(&plan.user_email).await;
                self.settle(epoch, Resource::Tasks, result, Self::apply_tasks)
            }
            .boxed(),
        );
        if plan.with_calendars {
            fetches.push(
                async {
                    let result = gateway.list_calendars(&plan.user_email).await;
                    self.settle(epoch, Resource::Calendars, result, Self::apply_calendars)
                }
                .boxed(),
            );
        }
        if plan.with_profile {
            fetches.push(
                async {
                    let result = gateway.get_profile(&plan.user_email).await;
                    self.settle(epoch, Resource::Profile, result, Self::apply_profile)
                }
                .boxed(),
            );
        }

        let mut report = RefreshReport {
            epoch,
            ..Default::default()
        };
        let mut failures = Vec::new();
        for outcome in join_all(fetches).await {
            match outcome {
                FetchOutcome::Applied(resource) => report.applied.push(resource),
                FetchOutcome::Discarded(resource) => report.discarded.push(resource),
                FetchOutcome::Failed(failure) => failures.push(failure),
            }
        }

        drop(in_flight);
        if !failures.is_empty() {
            self.inner.with_state(|state| {
                if !state.torn_down {
                    state.outbox.push(SessionMessage::RefreshFailed {
                        epoch,
                        failures: failures.clone(),
                    });
                }
            });
        }

        if failures.is_empty() {
            log::debug!(
                "refresh #{} done: applied {:?}, discarded {:?}",
                epoch,
                report.applied,
                report.discarded
            );
            Ok(report)
        } else {
            Err(SyncError::PartialRefresh { epoch, failures })
        }
    }

    /// Apply one fetch result if `epoch` is still current.
    fn settle<T>(
        &self,
        epoch: u64,
        resource: Resource,
        result: std::result::Result<T, GatewayError>,
        apply: fn(&mut SessionState, T),
    ) -> FetchOutcome {
        match result {
            Ok(value) => self.inner.with_state(|state| {
                if state.accepts(epoch) {
                    apply(state, value);
                    FetchOutcome::Applied(resource)
                } else {
                    log::debug!(
                        "discarding {} from refresh #{} (now #{})",
                        resource,
                        epoch,
                        state.request_epoch
                    );
                    FetchOutcome::Discarded(resource)
                }
            }),
            Err(err) => {
                log::warn!("refresh #{}: fetching {} failed: {}", epoch, resource, err);
                FetchOutcome::Failed(ResourceFailure {
                    resource,
                    message: err.to_string(),
                })
            }
        }
    }

    fn apply_events(state: &mut SessionState, records: Vec<RawRecord>) {
        state.events = classify_listing(records, Resource::Events)
            .into_iter()
            .filter_map(|item| match item {
                CalendarItem::Event(event) => Some(event),
                CalendarItem::Task(_) => None,
            })
            .collect();
        state.reproject();
    }

    fn apply_tasks(state: &mut SessionState, records: Vec<RawRecord>) {
        state.tasks = classify_listing(records, Resource::Tasks)
            .into_iter()
            .filter_map(|item| match item {
                CalendarItem::Task(task) => Some(task),
                CalendarItem::Event(_) => None,
            })
            .collect();
        state.outbox.push(SessionMessage::TasksChanged);
    }

    fn apply_calendars(state: &mut SessionState, calendars: Vec<CalendarRef>) {
        state.calendars = calendars;
        state.calendars_loaded = true;
        state.outbox.push(SessionMessage::DirectoryChanged);
    }

    fn apply_profile(state: &mut SessionState, profile: Profile) {
        state.profile = Some(profile);
        state.outbox.push(SessionMessage::DirectoryChanged);
    }

    /// Scope the event listing to another calendar and refetch.
    pub async fn set_active_calendar(&self, calendar_id: &str) -> Result<RefreshReport> {
        self.inner.with_state(|state| {
            state.ensure_live()?;
            if state.active_calendar_id != calendar_id {
                log::info!("switching to calendar {}", calendar_id);
                state.active_calendar_id = calendar_id.to_string();
            }
            Ok::<_, SyncError>(())
        })?;
        self.refresh(false).await
    }

    /// Change the client-side filter. Re-projects without fetching.
    pub fn set_filter(&self, filter: FilterKind) -> Result<()> {
        self.inner.with_state(|state| {
            state.ensure_live()?;
            state.filter = filter;
            state.reproject();
            Ok(())
        })
    }

    /// Flip the selection of a visible item and return whether it is now
    /// selected. Ids that are not visible are ignored.
    pub fn toggle_selection(&self, id: &str) -> Result<bool> {
        self.inner.with_state(|state| {
            state.ensure_live()?;
            if !state.is_visible(id) {
                log::debug!("ignoring selection of hidden item {}", id);
                return Ok(false);
            }
            let selected = state.selection.toggle(id);
            state.selection_changed();
            Ok(selected)
        })
    }

    /// Select exactly the items visible under the current filter.
    pub fn select_all_visible(&self) -> Result<usize> {
        self.inner.with_state(|state| {
            state.ensure_live()?;
            let visible = visible_ids(&state.schedule);
            state.selection.select_all(visible);
            state.selection_changed();
            Ok(state.selection.count())
        })
    }

    pub fn clear_selection(&self) -> Result<()> {
        self.inner.with_state(|state| {
            state.ensure_live()?;
            if !state.selection.is_empty() {
                state.selection.clear();
                state.selection_changed();
            }
            Ok(())
        })
    }

    /// Validate and create an item, then refresh. Local state is untouched
    /// when the backend rejects it.
    pub async fn create_item(&self, mut spec: ItemSpec) -> Result<CalendarItem> {
        spec.validate()?;
        let user_email = self.inner.with_state(|state| {
            state.ensure_live()?;
            if spec.calendar_id.is_none() {
                spec.calendar_id = Some(state.active_calendar_id.clone());
            }
            state.begin_mutation(MutationKind::Create);
            Ok::<_, SyncError>(state.user_email.clone())
        })?;
        let mutation = self.mutation(MutationKind::Create);

        let result = self.inner.gateway.create_item(&user_email, &spec).await;
        drop(mutation);

        let item = result.map_err(|err| {
            log::warn!("creating {} '{}' failed: {}", spec.kind, spec.title, err);
            SyncError::from(err)
        })?;
        log::info!("created {} {}", spec.kind, item.id());
        self.refresh_after("create").await;
        Ok(item)
    }

    /// Update an event, then refresh whatever the outcome.
    ///
    /// Returns `None` when the event no longer exists.
    pub async fn update_item(&self, id: &str, patch: ItemPatch) -> Result<Option<CalendarItem>> {
        patch.validate()?;
        let user_email = self.inner.with_state(|state| {
            state.ensure_live()?;
            state.begin_mutation(MutationKind::Update);
            Ok::<_, SyncError>(state.user_email.clone())
        })?;
        let mutation = self.mutation(MutationKind::Update);

        let result = self
            .inner
            .gateway
            .update_event(&user_email, id, &patch)
            .await;
        drop(mutation);
        self.refresh_after("update").await;

        match result {
            Ok(item) => {
                log::info!("updated {}", id);
                Ok(Some(item))
            }
            Err(err) if err.is_not_found() => {
                log::info!("{} was already gone, nothing to update", id);
                Ok(None)
            }
            Err(err) => {
                log::warn!("updating {} failed: {}", id, err);
                Err(err.into())
            }
        }
    }

    /// Delete one item.
    ///
    /// The item leaves the local lists and the selection before this
    /// returns. The remote delete and a reconciling refresh, which restores
    /// the item if the delete failed, run as their own task: they complete
    /// even if the returned future is dropped.
    pub fn delete_item(&self, id: &str) -> impl Future<Output = Result<()>> + Send + 'static {
        let id = id.to_string();
        let prepared = self
            .inner
            .with_state(|state| {
                state.ensure_live()?;
                let target = state.remove_locally(&id);
                state.supersede_fetches();
                state.reproject();
                state.begin_mutation(MutationKind::Delete);
                Ok::<_, SyncError>((state.user_email.clone(), target))
            })
            .map(|(user_email, target)| {
                (user_email, target, self.mutation(MutationKind::Delete))
            });
        detach(self.clone().finish_delete(id, prepared))
    }

    async fn finish_delete(
        self,
        id: String,
        prepared: Result<(String, DeleteTarget, MutationGuard)>,
    ) -> Result<()> {
        let (user_email, target, mutation) = prepared?;
        let result = self.delete_remote(&user_email, &id, target).await;
        drop(mutation);
        self.refresh_after("delete").await;

        match result {
            Ok(()) => {
                log::info!("deleted {}", id);
                Ok(())
            }
            Err(err) if err.is_not_found() => {
                log::info!("{} was already gone", id);
                Ok(())
            }
            Err(err) => {
                log::warn!("deleting {} failed: {}", id, err);
                Err(err.into())
            }
        }
    }

    /// Delete every selected item concurrently.
    ///
    /// The selection is cleared and the items leave the local lists before
    /// this returns. One refresh follows once every delete has settled.
    /// Like [`delete_item`](Self::delete_item), the remote work runs as its
    /// own task. No-op on an empty selection.
    pub fn delete_selected(
        &self,
    ) -> impl Future<Output = Result<BulkDeleteReport>> + Send + 'static {
        let prepared = self.inner.with_state(|state| {
            state.ensure_live()?;
            let ids = state.selection.take();
            if ids.is_empty() {
                return Ok(None);
            }
            let targets: Vec<(String, DeleteTarget)> = ids
                .into_iter()
                .map(|id| {
                    let target = state.remove_locally(&id);
                    (id, target)
                })
                .collect();
            state.selection_changed();
            state.supersede_fetches();
            state.reproject();
            state.begin_mutation(MutationKind::BulkDelete);
            Ok::<_, SyncError>(Some((state.user_email.clone(), targets)))
        });
        let prepared = prepared.map(|planned| {
            planned.map(|(user_email, targets)| BulkDeletePlan {
                user_email,
                targets,
                mutation: self.mutation(MutationKind::BulkDelete),
            })
        });
        detach(self.clone().finish_bulk_delete(prepared))
    }

    async fn finish_bulk_delete(
        self,
        prepared: Result<Option<BulkDeletePlan>>,
    ) -> Result<BulkDeleteReport> {
        let Some(BulkDeletePlan {
            user_email,
            targets,
            mutation,
        }) = prepared?
        else {
            log::debug!("nothing selected, nothing to delete");
            return Ok(BulkDeleteReport::default());
        };
        let total = targets.len();
        log::info!("deleting {} selected items", total);

        let deletes = targets.iter().map(|(id, target)| {
            let session = &self;
            let user_email = &user_email;
            async move {
                match session.delete_remote(user_email, id, *target).await {
                    Ok(()) => None,
                    Err(err) if err.is_not_found() => None,
                    Err(err) => {
                        log::warn!("deleting {} failed: {}", id, err);
                        Some(id.clone())
                    }
                }
            }
        });
        let failed: Vec<String> = join_all(deletes).await.into_iter().flatten().collect();
        drop(mutation);
        self.refresh_after("bulk delete").await;

        if failed.is_empty() {
            Ok(BulkDeleteReport {
                deleted: total,
                total,
            })
        } else {
            Err(SyncError::BulkDelete { failed, total })
        }
    }

    /// Guard for a mutation already begun under the state lock.
    fn mutation(&self, kind: MutationKind) -> MutationGuard {
        MutationGuard {
            inner: self.inner.clone(),
            kind,
        }
    }

    async fn delete_remote(
        &self,
        user_email: &str,
        id: &str,
        target: DeleteTarget,
    ) -> std::result::Result<(), GatewayError> {
        let gateway = &self.inner.gateway;
        match target {
            DeleteTarget::Event => gateway.delete_event(user_email, id).await,
            DeleteTarget::Task => gateway.delete_task(user_email, id).await,
            // not in local state: try both kinds
            DeleteTarget::Unknown => match gateway.delete_event(user_email, id).await {
                Err(err) if err.is_not_found() => gateway.delete_task(user_email, id).await,
                other => other,
            },
        }
    }

    /// Visible refresh after a mutation. Its failures are logged and
    /// published, never returned in place of the mutation's own outcome.
    async fn refresh_after(&self, operation: &str) {
        match self.refresh(false).await {
            Ok(_) | Err(SyncError::TornDown) => {}
            Err(err) => log::warn!("refresh after {} failed: {}", operation, err),
        }
    }

    /// Stop polling, discard everything in flight and reject further
    /// operations. Returns once the poller has exited.
    pub async fn teardown(&self) {
        let first = self.inner.with_state(|state| {
            if state.torn_down {
                return false;
            }
            state.torn_down = true;
            state.request_epoch += 1;
            state.fetching = None;
            state.busy_epoch = None;
            state.mutations.clear();
            state.outbox.push(SessionMessage::TornDown);
            true
        });
        if !first {
            return;
        }

        let _ = self.inner.shutdown.send(true);
        let handle = self
            .inner
            .poller
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(handle) = handle {
            if let Err(err) = handle.await {
                log::warn!("poller ended abnormally: {}", err);
            }
        }
        log::info!("session torn down");
    }

    pub fn is_torn_down(&self) -> bool {
        self.inner.read(|state| state.torn_down)
    }

    pub fn is_polling(&self) -> bool {
        self.inner
            .poller
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .as_ref()
            .is_some_and(|handle| !handle.is_finished())
    }

    pub fn schedule(&self) -> Vec<ScheduleGroup> {
        self.inner.read(|state| state.schedule.clone())
    }

    pub fn events(&self) -> Vec<Event> {
        self.inner.read(|state| state.events.clone())
    }

    pub fn tasks(&self) -> Vec<Task> {
        self.inner.read(|state| state.tasks.clone())
    }

    pub fn calendars(&self) -> Vec<CalendarRef> {
        self.inner.read(|state| state.calendars.clone())
    }

    pub fn profile(&self) -> Option<Profile> {
        self.inner.read(|state| state.profile.clone())
    }

    pub fn selection(&self) -> SelectionSet {
        self.inner.read(|state| state.selection.clone())
    }

    pub fn is_busy(&self) -> bool {
        self.inner.read(SessionState::is_busy)
    }

    pub fn phase(&self) -> Phase {
        self.inner.read(SessionState::phase)
    }

    pub fn filter(&self) -> FilterKind {
        self.inner.read(|state| state.filter)
    }

    pub fn active_calendar_id(&self) -> String {
        self.inner.read(|state| state.active_calendar_id.clone())
    }

    pub fn request_epoch(&self) -> u64 {
        self.inner.read(|state| state.request_epoch)
    }

    pub fn snapshot(&self) -> SessionSnapshot {
        self.inner.read(|state| SessionSnapshot {
            user_email: state.user_email.clone(),
            active_calendar_id: state.active_calendar_id.clone(),
            filter: state.filter,
            schedule: state.schedule.clone(),
            tasks: state.tasks.clone(),
            calendars: state.calendars.clone(),
            profile: state.profile.clone(),
            selection: state.selection.to_vec(),
            is_busy: state.is_busy(),
            phase: state.phase(),
            request_epoch: state.request_epoch,
        })
    }
}

/// Run `work` as its own task when a runtime is available, so it finishes
/// even if the returned future is dropped. Without a runtime it runs when
/// polled.
fn detach<T>(
    work: impl Future<Output = Result<T>> + Send + 'static,
) -> impl Future<Output = Result<T>> + Send + 'static
where
    T: Send + 'static,
{
    match tokio::runtime::Handle::try_current() {
        Ok(runtime) => {
            let task = runtime.spawn(work);
            Either::Left(async move {
                match task.await {
                    Ok(result) => result,
                    Err(err) if err.is_panic() => std::panic::resume_unwind(err.into_panic()),
                    // only cancelled when the runtime shuts down
                    Err(_) => Err(SyncError::TornDown),
                }
            })
        }
        Err(_) => Either::Right(work),
    }
}

/// Classify a listing, logging warnings and dropping records of the wrong
/// kind for `resource`.
fn classify_listing(records: Vec<RawRecord>, resource: Resource) -> Vec<CalendarItem> {
    let mut items = Vec::with_capacity(records.len());
    for record in &records {
        let classified = classify(record);
        for warning in &classified.warnings {
            log::warn!("{} listing: {}", resource, warning);
        }
        let misrouted = match resource {
            Resource::Events => classified.item.as_task().is_some(),
            Resource::Tasks => classified.item.as_event().is_some(),
            _ => false,
        };
        if misrouted {
            log::warn!(
                "{} listing: dropping {} which is not of that kind",
                resource,
                classified.item.id()
            );
            continue;
        }
        items.push(classified.item);
    }
    items
}
