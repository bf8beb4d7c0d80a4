//! The supervisor: owns every service and routes control requests to them.
//!
//! Besides per-service start/stop/toggle it fans out "start all" and "stop all",
//! keeps track of which service is shown in the viewport, and runs the refresh
//! loop that turns service notifications into list title updates for the TUI.

use std::sync::{Arc, Mutex, PoisonError};

use tokio::sync::mpsc;
use tokio::task::JoinSet;
use tracing::{debug, error, info, warn};

use crate::error::ServiceError;
use crate::events::Event;
use crate::notify::{Notifications, Notifier};
use crate::output::Viewport;
use crate::process::{format_title, ServiceSpec};
use crate::service::Service;

/// Per-service outcome of a fan-out operation, ordered by service index.
pub type FanOutReport<T> = Vec<(usize, Result<T, ServiceError>)>;

/// Owns the fixed, ordered collection of services.
#[derive(Debug)]
pub struct Supervisor {
    services: Vec<Arc<Service>>,
    viewport: Viewport,
    selected: Mutex<usize>,
}

impl Supervisor {
    /// Builds one service per spec, all stopped, and shows the first one.
    pub fn new(specs: Vec<ServiceSpec>, notifier: Notifier) -> Self {
        let viewport = Viewport::new();
        let services = specs
            .into_iter()
            .enumerate()
            .map(|(id, spec)| Arc::new(Service::new(id, spec, viewport.clone(), notifier.clone())))
            .collect::<Vec<_>>();
        if let Some(first) = services.first() {
            first.show_in_viewport();
        }
        Self {
            services,
            viewport,
            selected: Mutex::new(0),
        }
    }

    pub fn services(&self) -> &[Arc<Service>] {
        &self.services
    }

    pub fn service(&self, id: usize) -> Result<&Arc<Service>, ServiceError> {
        self.services.get(id).ok_or(ServiceError::UnknownService(id))
    }

    /// The live output buffer the TUI renders.
    pub fn viewport(&self) -> &Viewport {
        &self.viewport
    }

    pub fn toggle(&self, id: usize) {
        match self.service(id) {
            Ok(service) => service.toggle(),
            Err(err) => warn!("{}", err),
        }
    }

    /// Starts every service, each independently of the others.
    pub async fn start_all(&self) -> FanOutReport<u32> {
        let report = self.fan_out(Service::start).await;
        log_report("start all", &report);
        report
    }

    /// Signals every service. Stopped services report `NotRunning` and are left alone.
    pub async fn stop_all(&self) -> FanOutReport<()> {
        let report = self.fan_out(Service::stop).await;
        log_report("stop all", &report);
        report
    }

    /// Moves the viewport to service `id`.
    ///
    /// The previously shown service is paused (it keeps recording history) and
    /// the viewport is repainted from the new service's full history.
    pub fn selection_changed(&self, id: usize) -> Result<(), ServiceError> {
        let next = self.service(id)?;
        let mut selected = self.selected.lock().unwrap_or_else(PoisonError::into_inner);
        if *selected == id {
            next.resume_output();
            return Ok(());
        }
        if let Some(previous) = self.services.get(*selected) {
            previous.pause_output();
        }
        *selected = id;
        next.show_in_viewport();
        debug!(service = %next.name(), "selection changed");
        Ok(())
    }

    pub fn any_running(&self) -> bool {
        self.services.iter().any(|service| service.is_running())
    }

    pub fn running_count(&self) -> usize {
        self.services.iter().filter(|service| service.is_running()).count()
    }

    async fn fan_out<T, F>(&self, op: F) -> FanOutReport<T>
    where
        T: Send + 'static,
        F: Fn(&Service) -> Result<T, ServiceError> + Clone + Send + 'static,
    {
        let mut tasks = JoinSet::new();
        for service in &self.services {
            let service = service.clone();
            let op = op.clone();
            tasks.spawn(async move { (service.id(), op(service.as_ref())) });
        }
        let mut report = Vec::with_capacity(self.services.len());
        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok(outcome) => report.push(outcome),
                Err(err) => error!("service task failed: {}", err),
            }
        }
        report.sort_by_key(|(id, _)| *id);
        report
    }
}

#[cfg(test)]
impl Supervisor {
    fn selected(&self) -> usize {
        *self.selected.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn start(&self, id: usize) -> Result<u32, ServiceError> {
        self.service(id)?.start()
    }

    fn stop(&self, id: usize) -> Result<(), ServiceError> {
        self.service(id)?.stop()
    }

    fn display_name(&self, id: usize) -> Option<String> {
        self.services.get(id).map(|service| service.display_name())
    }

    fn history(&self, id: usize) -> Option<Vec<u8>> {
        self.services.get(id).map(|service| service.history())
    }
}

fn log_report<T>(label: &str, report: &FanOutReport<T>) {
    let failed = report.iter().filter(|(_, outcome)| outcome.is_err()).count();
    info!(
        "{}: {} succeeded, {} failed",
        label,
        report.len() - failed,
        failed
    );
}

/// Consumes service notifications one at a time and publishes fresh titles.
///
/// This is the only producer of `Event::ServiceUpdated`, so titles from
/// concurrent exits are applied in order and never interleave. Returns when
/// the notification channel closes or the event receiver is gone.
pub async fn refresh_loop(
    supervisor: Arc<Supervisor>,
    mut notifications: Notifications,
    events: mpsc::Sender<Event>,
) {
    while let Some(id) = notifications.next().await {
        let Some(service) = supervisor.services.get(id) else {
            warn!(id, "notification for unknown service");
            continue;
        };
        let status = service.status();
        let title = format_title(service.name(), status);
        debug!(id, %title, %status, "Update list item");
        let event = Event::ServiceUpdated {
            id,
            title,
            running: status.is_running(),
        };
        if events.send(event).await.is_err() {
            break;
        }
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use crate::notify;
    use std::collections::HashMap;
    use std::time::Duration;

    fn make_supervisor(commands: &[(&str, &str)]) -> (Arc<Supervisor>, Notifications) {
        let (notifier, notifications) = notify::channel();
        let specs = commands
            .iter()
            .map(|(name, command)| ServiceSpec::new(*name, *command, None))
            .collect();
        (Arc::new(Supervisor::new(specs, notifier)), notifications)
    }

    async fn next_event(rx: &mut mpsc::Receiver<Event>) -> (usize, String, bool) {
        let event = tokio::time::timeout(Duration::from_secs(10), rx.recv())
            .await
            .expect("timed out waiting for refresh")
            .expect("refresh loop ended");
        match event {
            Event::ServiceUpdated { id, title, running } => (id, title, running),
            other => panic!("unexpected event {:?}", other),
        }
    }

    async fn wait_all_stopped(supervisor: &Supervisor) {
        tokio::time::timeout(Duration::from_secs(10), async {
            while supervisor.any_running() {
                tokio::time::sleep(Duration::from_millis(20)).await;
            }
        })
        .await
        .expect("services did not stop");
    }

    #[tokio::test]
    async fn unknown_index_is_rejected() {
        let (supervisor, _notes) = make_supervisor(&[("a", "true")]);
        assert!(matches!(supervisor.start(5), Err(ServiceError::UnknownService(5))));
        assert!(matches!(supervisor.stop(5), Err(ServiceError::UnknownService(5))));
        assert!(supervisor.selection_changed(5).is_err());
        assert_eq!(supervisor.selected(), 0);
    }

    #[tokio::test]
    async fn stop_all_only_signals_running_services() {
        let (supervisor, _notes) = make_supervisor(&[("a", "sleep 5"), ("b", "sleep 5")]);
        supervisor.start(0).unwrap();

        let report = supervisor.stop_all().await;
        assert_eq!(report.len(), 2);
        assert_eq!(report[0].0, 0);
        assert!(report[0].1.is_ok());
        assert!(matches!(report[1].1, Err(ServiceError::NotRunning { .. })));
        assert!(!supervisor.services()[1].is_running());

        wait_all_stopped(&supervisor).await;
    }

    #[tokio::test]
    async fn start_all_launches_each_service_independently() {
        let dir = tempfile::tempdir().unwrap();
        let (notifier, _notes) = notify::channel();
        let specs = vec![
            ServiceSpec::new("ok", "sleep 5", None),
            ServiceSpec::new("bad", "sleep 5", Some(dir.path().join("missing"))),
            ServiceSpec::new("also-ok", "sleep 5", None),
        ];
        let supervisor = Supervisor::new(specs, notifier);

        let report = supervisor.start_all().await;
        assert!(report[0].1.is_ok());
        assert!(matches!(report[1].1, Err(ServiceError::LaunchFailed { .. })));
        assert!(report[2].1.is_ok());
        assert_eq!(supervisor.running_count(), 2);

        supervisor.stop_all().await;
        wait_all_stopped(&supervisor).await;
    }

    #[tokio::test]
    async fn only_the_selected_service_reaches_the_viewport() {
        let (supervisor, _notes) = make_supervisor(&[("a", "echo alpha"), ("b", "echo beta")]);
        supervisor.start_all().await;
        wait_all_stopped(&supervisor).await;
        // Let the output pumps finish even when the watcher raced ahead of us.
        tokio::time::sleep(Duration::from_millis(100)).await;

        assert_eq!(supervisor.viewport().contents(), b"alpha\n");
        supervisor.selection_changed(1).unwrap();
        assert_eq!(supervisor.selected(), 1);
        assert_eq!(supervisor.viewport().contents(), b"beta\n");
        assert_eq!(supervisor.history(0).unwrap(), b"alpha\n");
    }

    #[tokio::test]
    async fn concurrent_exits_yield_one_refresh_each() {
        let (supervisor, notes) = make_supervisor(&[("a", "sleep 5"), ("b", "sleep 5")]);
        let (tx, mut rx) = mpsc::channel(16);
        tokio::spawn(refresh_loop(supervisor.clone(), notes, tx));

        supervisor.start_all().await;
        supervisor.stop_all().await;

        let mut seen: HashMap<usize, Vec<(String, bool)>> = HashMap::new();
        for _ in 0..4 {
            let (id, title, running) = next_event(&mut rx).await;
            seen.entry(id).or_default().push((title, running));
        }
        assert_eq!(seen.len(), 2);
        for (id, updates) in &seen {
            assert_eq!(updates.len(), 2, "service {} refreshed {} times", id, updates.len());
            let (title, running) = updates.last().unwrap();
            assert!(!running);
            assert!(title.starts_with("[      ] "));
        }
        let extra = tokio::time::timeout(Duration::from_millis(300), rx.recv()).await;
        assert!(extra.is_err(), "unexpected extra refresh");
    }

    #[tokio::test]
    async fn short_and_long_running_services() {
        let (supervisor, notes) = make_supervisor(&[("A", "sleep 5"), ("B", "false")]);
        let (tx, mut rx) = mpsc::channel(16);
        tokio::spawn(refresh_loop(supervisor.clone(), notes, tx));

        supervisor.start(1).unwrap();
        let (launched, _, _) = next_event(&mut rx).await;
        assert_eq!(launched, 1);
        let exited = next_event(&mut rx).await;
        assert_eq!(exited, (1, "[      ] B".to_string(), false));

        let pid = supervisor.start(0).unwrap();
        let (id, title, running) = next_event(&mut rx).await;
        assert_eq!(id, 0);
        assert!(running);
        assert_eq!(title, format!("[{:>6}] A", pid));
        tokio::time::sleep(Duration::from_millis(500)).await;
        assert_eq!(supervisor.display_name(0).unwrap(), title);

        supervisor.stop(0).unwrap();
        let (id, title, running) = next_event(&mut rx).await;
        assert_eq!((id, running), (0, false));
        assert_eq!(title, "[      ] A");
    }
}
