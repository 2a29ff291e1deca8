//! In-memory doubles for the engine, clock and command runner
//!
//! Used by the unit tests in this crate and by the binary's integration
//! tests, so nothing here talks to a real daemon or sleeps.

use crate::clock::Clock;
use crate::compose::{CommandRunner, TeardownCommand};
use crate::engine::{ContainerEngine, ContainerInspector, EngineError, EventStream};
use crate::models::{
    ContainerEvent, ContainerSnapshot, ContainerState, NetworkResource, ServiceResource,
    VolumeResource,
};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures::StreamExt;
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

/// Shorthand for an exited, unlabelled container snapshot
pub fn container(id: &str, name: &str) -> ContainerSnapshot {
    ContainerSnapshot::new(id, name)
}

pub fn network(id: &str, name: &str) -> NetworkResource {
    NetworkResource {
        id: id.to_string(),
        name: name.to_string(),
        labels: HashMap::new(),
        containers: Vec::new(),
    }
}

pub fn volume(name: &str) -> VolumeResource {
    VolumeResource {
        name: name.to_string(),
        labels: HashMap::new(),
    }
}

pub fn service(id: &str, name: &str) -> ServiceResource {
    ServiceResource {
        id: id.to_string(),
        name: name.to_string(),
        labels: HashMap::new(),
    }
}

pub fn event(id: &str, action: &str) -> ContainerEvent {
    ContainerEvent {
        id: id.to_string(),
        action: action.to_string(),
        time_nano: None,
        attributes: HashMap::new(),
    }
}

/// Mutating engine call recorded by [`MockEngine`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EngineCall {
    Stop(String),
    RemoveContainer(String),
    RemoveNetwork(String),
    RemoveVolume(String),
    RemoveService(String),
}

#[derive(Default)]
struct MockState {
    containers: Vec<ContainerSnapshot>,
    networks: Vec<NetworkResource>,
    volumes: Vec<VolumeResource>,
    services: Vec<ServiceResource>,
    events: Vec<Result<ContainerEvent, String>>,

    fail_stop: HashSet<String>,
    fail_remove: HashSet<String>,
    /// Resources deleted by someone else just before our remove lands
    vanished: HashSet<String>,
    /// Containers whose stop succeeds but that keep running
    stuck_running: HashSet<String>,
    /// Containers whose remove succeeds but that stay listed
    sticky: HashSet<String>,
    fail_list_containers: bool,
    fail_list_networks: bool,

    calls: Vec<EngineCall>,
    inspect_calls: Vec<String>,
    /// Feed items taken off the event stream so far
    events_pulled: usize,
    container_lists: usize,
}

/// In-memory engine with failure injection and a call log
#[derive(Clone, Default)]
pub struct MockEngine {
    state: Arc<Mutex<MockState>>,
}

impl MockEngine {
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> MutexGuard<'_, MockState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn add_container(&self, container: ContainerSnapshot) {
        self.state().containers.push(container);
    }

    pub fn add_network(&self, network: NetworkResource) {
        self.state().networks.push(network);
    }

    pub fn add_volume(&self, volume: VolumeResource) {
        self.state().volumes.push(volume);
    }

    pub fn add_service(&self, service: ServiceResource) {
        self.state().services.push(service);
    }

    pub fn push_event(&self, event: ContainerEvent) {
        self.state().events.push(Ok(event));
    }

    pub fn push_feed_error(&self, message: &str) {
        self.state().events.push(Err(message.to_string()));
    }

    pub fn fail_stop(&self, id: &str) {
        self.state().fail_stop.insert(id.to_string());
    }

    pub fn fail_remove(&self, id: &str) {
        self.state().fail_remove.insert(id.to_string());
    }

    /// Simulate a concurrent deletion: the next remove of `id` drops it and
    /// reports not found
    pub fn vanish_on_remove(&self, id: &str) {
        self.state().vanished.insert(id.to_string());
    }

    pub fn keep_running(&self, id: &str) {
        self.state().stuck_running.insert(id.to_string());
    }

    pub fn keep_listed(&self, id: &str) {
        self.state().sticky.insert(id.to_string());
    }

    pub fn fail_container_listing(&self) {
        self.state().fail_list_containers = true;
    }

    pub fn fail_network_listing(&self) {
        self.state().fail_list_networks = true;
    }

    pub fn calls(&self) -> Vec<EngineCall> {
        self.state().calls.clone()
    }

    pub fn inspect_calls(&self) -> Vec<String> {
        self.state().inspect_calls.clone()
    }

    pub fn events_pulled(&self) -> usize {
        self.state().events_pulled
    }

    pub fn container_list_count(&self) -> usize {
        self.state().container_lists
    }

    pub fn container_ids(&self) -> Vec<String> {
        self.state().containers.iter().map(|c| c.id.clone()).collect()
    }

    pub fn network_names(&self) -> Vec<String> {
        self.state().networks.iter().map(|n| n.name.clone()).collect()
    }

    pub fn volume_names(&self) -> Vec<String> {
        self.state().volumes.iter().map(|v| v.name.clone()).collect()
    }

    pub fn service_ids(&self) -> Vec<String> {
        self.state().services.iter().map(|s| s.id.clone()).collect()
    }
}

fn injected(id: &str) -> EngineError {
    EngineError::Api {
        status: 500,
        message: format!("injected failure for {id}"),
    }
}

#[async_trait]
impl ContainerInspector for MockEngine {
    async fn inspect_container(&self, id: &str) -> Result<ContainerSnapshot, EngineError> {
        let mut state = self.state();
        state.inspect_calls.push(id.to_string());
        state
            .containers
            .iter()
            .find(|c| c.id == id)
            .cloned()
            .ok_or_else(|| EngineError::NotFound(format!("No such container: {id}")))
    }

    async fn list_containers(&self) -> Result<Vec<ContainerSnapshot>, EngineError> {
        let mut state = self.state();
        state.container_lists += 1;
        if state.fail_list_containers {
            return Err(EngineError::Unavailable("connection refused".to_string()));
        }
        Ok(state.containers.clone())
    }
}

#[async_trait]
impl ContainerEngine for MockEngine {
    fn subscribe_events(&self) -> EventStream {
        let events = std::mem::take(&mut self.state().events);
        let engine = self.clone();
        futures::stream::iter(events)
            .inspect(move |_| engine.state().events_pulled += 1)
            .map(|event| event.map_err(EngineError::Unavailable))
            .boxed()
    }

    async fn stop_container(&self, id: &str, _timeout: Duration) -> Result<(), EngineError> {
        let mut state = self.state();
        state.calls.push(EngineCall::Stop(id.to_string()));
        if state.fail_stop.contains(id) {
            return Err(injected(id));
        }
        let stuck = state.stuck_running.contains(id);
        match state.containers.iter_mut().find(|c| c.id == id) {
            Some(c) => {
                if !stuck {
                    c.state = ContainerState::Exited;
                }
                Ok(())
            }
            None => Err(EngineError::NotFound(id.to_string())),
        }
    }

    async fn remove_container(&self, id: &str) -> Result<(), EngineError> {
        let mut state = self.state();
        state.calls.push(EngineCall::RemoveContainer(id.to_string()));
        if state.fail_remove.contains(id) {
            return Err(injected(id));
        }
        if state.sticky.contains(id) {
            return Ok(());
        }
        if state.vanished.remove(id) {
            state.containers.retain(|c| c.id != id);
            return Err(EngineError::NotFound(id.to_string()));
        }
        let before = state.containers.len();
        state.containers.retain(|c| c.id != id);
        if state.containers.len() == before {
            return Err(EngineError::NotFound(id.to_string()));
        }
        Ok(())
    }

    async fn list_networks(&self) -> Result<Vec<NetworkResource>, EngineError> {
        let state = self.state();
        if state.fail_list_networks {
            return Err(EngineError::Unavailable("connection refused".to_string()));
        }
        Ok(state.networks.clone())
    }

    async fn remove_network(&self, id: &str) -> Result<(), EngineError> {
        let mut state = self.state();
        state.calls.push(EngineCall::RemoveNetwork(id.to_string()));
        if state.fail_remove.contains(id) {
            return Err(injected(id));
        }
        if state.vanished.remove(id) {
            state.networks.retain(|n| n.id != id);
            return Err(EngineError::NotFound(id.to_string()));
        }
        state.networks.retain(|n| n.id != id);
        Ok(())
    }

    async fn list_volumes(&self) -> Result<Vec<VolumeResource>, EngineError> {
        Ok(self.state().volumes.clone())
    }

    async fn remove_volume(&self, name: &str) -> Result<(), EngineError> {
        let mut state = self.state();
        state.calls.push(EngineCall::RemoveVolume(name.to_string()));
        if state.fail_remove.contains(name) {
            return Err(injected(name));
        }
        if state.vanished.remove(name) {
            state.volumes.retain(|v| v.name != name);
            return Err(EngineError::NotFound(name.to_string()));
        }
        state.volumes.retain(|v| v.name != name);
        Ok(())
    }

    async fn list_services(&self) -> Result<Vec<ServiceResource>, EngineError> {
        Ok(self.state().services.clone())
    }

    async fn remove_service(&self, id: &str) -> Result<(), EngineError> {
        let mut state = self.state();
        state.calls.push(EngineCall::RemoveService(id.to_string()));
        if state.fail_remove.contains(id) {
            return Err(injected(id));
        }
        if state.vanished.remove(id) {
            state.services.retain(|s| s.id != id);
            return Err(EngineError::NotFound(id.to_string()));
        }
        state.services.retain(|s| s.id != id);
        Ok(())
    }
}

/// Clock with a fixed "now" whose sleeps return immediately
#[derive(Clone)]
pub struct ManualClock {
    now: Arc<Mutex<DateTime<Utc>>>,
    sleeps: Arc<Mutex<Vec<Duration>>>,
}

impl ManualClock {
    pub fn new(now: DateTime<Utc>) -> Self {
        Self {
            now: Arc::new(Mutex::new(now)),
            sleeps: Arc::new(Mutex::new(Vec::new())),
        }
    }

    pub fn set_now(&self, now: DateTime<Utc>) {
        *self.now.lock().unwrap_or_else(|p| p.into_inner()) = now;
    }

    /// Every duration passed to `sleep`, in call order
    pub fn sleeps(&self) -> Vec<Duration> {
        self.sleeps.lock().unwrap_or_else(|p| p.into_inner()).clone()
    }
}

impl Default for ManualClock {
    fn default() -> Self {
        Self::new(Utc::now())
    }
}

#[async_trait]
impl Clock for ManualClock {
    fn now(&self) -> DateTime<Utc> {
        *self.now.lock().unwrap_or_else(|p| p.into_inner())
    }

    async fn sleep(&self, duration: Duration) {
        self.sleeps
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .push(duration);
    }
}

/// Command runner that records invocations and returns a fixed outcome
#[derive(Clone)]
pub struct RecordingRunner {
    exit_code: Option<i32>,
    spawn_error: bool,
    commands: Arc<Mutex<Vec<TeardownCommand>>>,
}

impl RecordingRunner {
    pub fn succeeding() -> Self {
        Self::with_exit_code(Some(0))
    }

    pub fn with_exit_code(exit_code: Option<i32>) -> Self {
        Self {
            exit_code,
            spawn_error: false,
            commands: Arc::new(Mutex::new(Vec::new())),
        }
    }

    /// Runner whose spawn fails, as when the binary is missing
    pub fn missing_binary() -> Self {
        Self {
            spawn_error: true,
            ..Self::succeeding()
        }
    }

    pub fn commands(&self) -> Vec<TeardownCommand> {
        self.commands
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .clone()
    }
}

#[async_trait]
impl CommandRunner for RecordingRunner {
    async fn run(&self, command: &TeardownCommand) -> std::io::Result<Option<i32>> {
        self.commands
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .push(command.clone());

        if self.spawn_error {
            return Err(std::io::Error::new(
                std::io::ErrorKind::NotFound,
                format!("{}: command not found", command.program),
            ));
        }
        Ok(self.exit_code)
    }
}
