use async_trait::async_trait;
use calview::classifier::{classify, RawAttendee, RawEventTime, RawRecord};
use calview::error::GatewayError;
use calview::gateway::Gateway;
use calview::model::{CalendarItem, CalendarRef, ItemKind, ItemPatch, ItemSpec, Profile};
use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::Mutex;
use tokio::sync::oneshot;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Op {
    ListEvents,
    ListTasks,
    ListCalendars,
    GetProfile,
    Create,
    Update,
    DeleteEvent,
    DeleteTask,
}

/// In-memory backend whose failures and response timing a test controls.
pub struct ScriptedGateway {
    inner: Mutex<Script>,
}

struct Script {
    events: Vec<RawRecord>,
    tasks: Vec<RawRecord>,
    calendars: Vec<CalendarRef>,
    profile: Profile,
    failing: HashSet<Op>,
    stalled: HashSet<Op>,
    held_events: VecDeque<oneshot::Receiver<Vec<RawRecord>>>,
    calls: HashMap<Op, usize>,
    next_id: usize,
}

impl ScriptedGateway {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(Script {
                events: Vec::new(),
                tasks: Vec::new(),
                calendars: vec![
                    CalendarRef {
                        id: "primary".to_string(),
                        display_name: "me@example.com".to_string(),
                        is_primary: true,
                    },
                    CalendarRef {
                        id: "work".to_string(),
                        display_name: "Work".to_string(),
                        is_primary: false,
                    },
                ],
                profile: Profile {
                    display_name: "Me".to_string(),
                    email: "me@example.com".to_string(),
                    avatar_url: None,
                },
                failing: HashSet::new(),
                stalled: HashSet::new(),
                held_events: VecDeque::new(),
                calls: HashMap::new(),
                next_id: 1,
            }),
        }
    }

    pub fn with_events(self, events: Vec<RawRecord>) -> Self {
        self.set_events(events);
        self
    }

    pub fn with_tasks(self, tasks: Vec<RawRecord>) -> Self {
        self.inner.lock().unwrap().tasks = tasks;
        self
    }

    /// Replace the server-side events. Records without a calendar belong
    /// to `primary`.
    pub fn set_events(&self, events: Vec<RawRecord>) {
        self.inner.lock().unwrap().events = events;
    }

    pub fn fail(&self, op: Op) {
        self.inner.lock().unwrap().failing.insert(op);
    }

    pub fn recover(&self, op: Op) {
        self.inner.lock().unwrap().failing.remove(&op);
    }

    /// Make every later call of `op` hang until the caller gives up.
    pub fn stall(&self, op: Op) {
        self.inner.lock().unwrap().stalled.insert(op);
    }

    /// Make the next `list_events` call wait until the returned sender
    /// provides its response. Holds queue up in call order.
    pub fn hold_events(&self) -> oneshot::Sender<Vec<RawRecord>> {
        let (tx, rx) = oneshot::channel();
        self.inner.lock().unwrap().held_events.push_back(rx);
        tx
    }

    pub fn calls(&self, op: Op) -> usize {
        self.inner
            .lock()
            .unwrap()
            .calls
            .get(&op)
            .copied()
            .unwrap_or(0)
    }

    pub fn server_event_ids(&self) -> Vec<String> {
        self.inner
            .lock()
            .unwrap()
            .events
            .iter()
            .filter_map(|e| e.id.clone())
            .collect()
    }

    /// Count the call and fail it if scripted to.
    fn enter(&self, op: Op) -> Result<(), GatewayError> {
        let mut script = self.inner.lock().unwrap();
        *script.calls.entry(op).or_default() += 1;
        if script.failing.contains(&op) {
            return Err(GatewayError::Status {
                endpoint: format!("{:?}", op),
                status: 500,
                body: "scripted failure".to_string(),
            });
        }
        Ok(())
    }

    async fn wait_if_stalled(&self, op: Op) {
        let stalled = self.inner.lock().unwrap().stalled.contains(&op);
        if stalled {
            std::future::pending::<()>().await;
        }
    }
}

fn not_found(op: Op) -> GatewayError {
    GatewayError::NotFound {
        endpoint: format!("{:?}", op),
    }
}

fn event_time(value: Option<String>) -> Option<RawEventTime> {
    value.map(|date_time| RawEventTime {
        date_time: Some(date_time),
        ..Default::default()
    })
}

#[async_trait]
impl Gateway for ScriptedGateway {
    fn name(&self) -> &'static str {
        "scripted"
    }

    async fn list_events(
        &self,
        _user_id: &str,
        calendar_id: &str,
    ) -> Result<Vec<RawRecord>, GatewayError> {
        self.enter(Op::ListEvents)?;
        let held = self.inner.lock().unwrap().held_events.pop_front();
        if let Some(rx) = held {
            return rx.await.map_err(|_| GatewayError::Status {
                endpoint: "ListEvents".to_string(),
                status: 504,
                body: "hold dropped".to_string(),
            });
        }
        let script = self.inner.lock().unwrap();
        Ok(script
            .events
            .iter()
            .filter(|e| e.calendar_id.as_deref().unwrap_or("primary") == calendar_id)
            .cloned()
            .collect())
    }

    async fn list_tasks(&self, _user_id: &str) -> Result<Vec<RawRecord>, GatewayError> {
        self.enter(Op::ListTasks)?;
        Ok(self.inner.lock().unwrap().tasks.clone())
    }

    async fn list_calendars(&self, _user_id: &str) -> Result<Vec<CalendarRef>, GatewayError> {
        self.enter(Op::ListCalendars)?;
        Ok(self.inner.lock().unwrap().calendars.clone())
    }

    async fn get_profile(&self, _user_id: &str) -> Result<Profile, GatewayError> {
        self.enter(Op::GetProfile)?;
        Ok(self.inner.lock().unwrap().profile.clone())
    }

    async fn create_item(
        &self,
        _user_id: &str,
        spec: &ItemSpec,
    ) -> Result<CalendarItem, GatewayError> {
        self.enter(Op::Create)?;
        self.wait_if_stalled(Op::Create).await;
        let mut script = self.inner.lock().unwrap();
        let id = format!("created-{}", script.next_id);
        script.next_id += 1;

        let record = match spec.kind {
            ItemKind::Task => RawRecord {
                id: Some(id),
                title: Some(spec.title.clone()),
                notes: Some(spec.description.clone()),
                due: spec
                    .due_at
                    .map(|d| format!("{}T00:00:00.000Z", d.format("%Y-%m-%d"))),
                ..Default::default()
            },
            ItemKind::Event | ItemKind::Appointment => RawRecord {
                id: Some(id),
                summary: Some(spec.title.clone()),
                description: Some(spec.description.clone()),
                start: event_time(spec.start_at.map(|t| t.to_rfc3339())),
                end: event_time(spec.end_at.map(|t| t.to_rfc3339())),
                attendees: spec
                    .attendees
                    .iter()
                    .map(|email| RawAttendee {
                        email: Some(email.clone()),
                    })
                    .collect(),
                hangout_link: spec
                    .add_meet
                    .then(|| "https://meet.google.com/abc-defg-hij".to_string()),
                calendar_id: spec.calendar_id.clone(),
                ..Default::default()
            },
        };
        if spec.kind == ItemKind::Task {
            script.tasks.push(record.clone());
        } else {
            script.events.push(record.clone());
        }
        Ok(classify(&record).item)
    }

    async fn update_event(
        &self,
        _user_id: &str,
        id: &str,
        patch: &ItemPatch,
    ) -> Result<CalendarItem, GatewayError> {
        self.enter(Op::Update)?;
        self.wait_if_stalled(Op::Update).await;
        let mut script = self.inner.lock().unwrap();
        let record = script
            .events
            .iter_mut()
            .find(|e| e.id.as_deref() == Some(id))
            .ok_or_else(|| not_found(Op::Update))?;
        if let Some(title) = &patch.title {
            record.summary = Some(title.clone());
        }
        if let Some(description) = &patch.description {
            record.description = Some(description.clone());
        }
        if let Some(start) = patch.start_at {
            record.start = event_time(Some(start.to_rfc3339()));
        }
        if let Some(end) = patch.end_at {
            record.end = event_time(Some(end.to_rfc3339()));
        }
        Ok(classify(record).item)
    }

    async fn delete_event(&self, _user_id: &str, id: &str) -> Result<(), GatewayError> {
        self.enter(Op::DeleteEvent)?;
        let mut script = self.inner.lock().unwrap();
        let before = script.events.len();
        script.events.retain(|e| e.id.as_deref() != Some(id));
        if script.events.len() == before {
            return Err(not_found(Op::DeleteEvent));
        }
        Ok(())
    }

    async fn delete_task(&self, _user_id: &str, id: &str) -> Result<(), GatewayError> {
        self.enter(Op::DeleteTask)?;
        let mut script = self.inner.lock().unwrap();
        let before = script.tasks.len();
        script.tasks.retain(|t| t.id.as_deref() != Some(id));
        if script.tasks.len() == before {
            return Err(not_found(Op::DeleteTask));
        }
        Ok(())
    }
}
