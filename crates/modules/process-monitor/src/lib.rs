//! Process lifecycle collaborator.
//!
//! Feeds process creation, remote thread creation, image loads and exits into
//! the [`FamilyRegistry`], and reacts when the registry refuses a process.
//! [`ProcessGuard`] keeps watched processes from tampering with processes
//! outside their family.

use std::{sync::Arc, time::Duration};

use custody_core::{
    AddError, AddResult, ConfigError, FamilyRegistry, FileId, ModuleConfig, Pid, ProcessControl,
    WaitOutcome,
};
use thiserror::Error;
use tokio::sync::{mpsc, oneshot};

mod access;

pub use access::{AccessDecision, ProcessAccess, ProcessGuard, ProcessOpen};

pub const MODULE_NAME: &str = "process-monitor";

/// Notifications delivered by the process feed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProcessEvent {
    /// `creator` is the process that asked for the creation. It differs from
    /// `ppid` for reparented or spawned-on-behalf processes.
    Created { pid: Pid, ppid: Pid, creator: Pid },
    /// A thread created by `creator` inside `target`.
    ThreadCreated { creator: Pid, target: Pid },
    ImageLoaded { pid: Pid, file_id: FileId },
    Exited { pid: Pid },
}

impl ProcessEvent {
    pub fn pid(&self) -> Pid {
        match *self {
            ProcessEvent::Created { pid, .. }
            | ProcessEvent::ImageLoaded { pid, .. }
            | ProcessEvent::Exited { pid } => pid,
            ProcessEvent::ThreadCreated { target, .. } => target,
        }
    }
}

/// What the monitor did about an event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Reaction {
    /// The process is not part of any watched family.
    Ignored,
    /// The process is (now) a member of the family rooted at `root`.
    Attached { root: Pid },
    /// The registry refused the process and it was left running.
    Rejected(AddError),
    /// The registry refused the process and it was killed.
    Terminated { pid: Pid, cause: AddError },
    Exited(WaitOutcome),
}

#[derive(Debug, Clone)]
pub struct Config {
    /// `None` waits for the children of an exiting root without limit.
    pub exit_wait_timeout: Option<Duration>,
    pub terminate_on_exhaustion: bool,
    pub block_respawn: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            exit_wait_timeout: None,
            terminate_on_exhaustion: true,
            block_respawn: true,
        }
    }
}

impl TryFrom<&ModuleConfig> for Config {
    type Error = ConfigError;

    fn try_from(config: &ModuleConfig) -> Result<Self, Self::Error> {
        let timeout_ms: u64 = config.with_default("exit_wait_timeout_ms", 0)?;
        Ok(Config {
            exit_wait_timeout: (timeout_ms > 0).then(|| Duration::from_millis(timeout_ms)),
            terminate_on_exhaustion: config.with_default("terminate_on_exhaustion", true)?,
            block_respawn: config.with_default("block_respawn", true)?,
        })
    }
}

/// Synchronous event handler. Every call may take the registry lock, and
/// [`ProcessEvent::Exited`] may block until the family settles.
#[derive(Clone)]
pub struct ProcessWatcher {
    registry: Arc<FamilyRegistry>,
    process_control: Arc<dyn ProcessControl>,
    config: Config,
}

impl ProcessWatcher {
    pub fn new(
        registry: Arc<FamilyRegistry>,
        process_control: Arc<dyn ProcessControl>,
        config: Config,
    ) -> Self {
        Self {
            registry,
            process_control,
            config,
        }
    }

    pub fn handle(&self, event: ProcessEvent) -> Reaction {
        match event {
            ProcessEvent::Created { pid, ppid, creator } => {
                let mut result = self.registry.attach_child(pid, ppid);
                if !matches!(result, Ok(()) | Err(AddError::AlreadyExists))
                    && creator.is_valid()
                    && creator != ppid
                {
                    result = self.registry.attach_child(pid, creator);
                }
                self.react(pid, result, false)
            }
            ProcessEvent::ThreadCreated { creator, target } => {
                if creator == target || !self.registry.contains_family(creator) {
                    return Reaction::Ignored;
                }
                log::debug!("[{creator}] created a thread in {target}");
                let result = self.registry.attach_child(target, creator);
                self.react(target, result, false)
            }
            ProcessEvent::ImageLoaded { pid, file_id } => {
                if !file_id.is_valid() {
                    return Reaction::Ignored;
                }
                let result = self.registry.adopt_by_file_ownership(pid, file_id);
                if result == Err(AddError::TreeDead) {
                    log::warn!(
                        "[{pid}] executing {file_id} dropped by exited family {}",
                        self.registry.file_owner_root(file_id)
                    );
                }
                self.react(pid, result, self.config.block_respawn)
            }
            ProcessEvent::Exited { pid } => {
                let outcome = self
                    .registry
                    .wait_for_exit(pid, self.config.exit_wait_timeout);
                if outcome == WaitOutcome::TimedOut {
                    // the process is gone whatever its children do
                    log::warn!("[{pid}] children still running, forgetting exited root");
                    self.registry.remove_member(pid);
                }
                Reaction::Exited(outcome)
            }
        }
    }

    fn react(&self, pid: Pid, result: AddResult, terminate_dead: bool) -> Reaction {
        let cause = match result {
            Ok(()) | Err(AddError::AlreadyExists) => {
                return Reaction::Attached {
                    root: self.registry.process_owner_root(pid),
                };
            }
            Err(AddError::NoParent | AddError::InvalidItem) => return Reaction::Ignored,
            Err(cause) => cause,
        };
        let terminate = match cause {
            AddError::CapacityExhausted => self.config.terminate_on_exhaustion,
            AddError::TreeDead => terminate_dead,
            _ => false,
        };
        if !terminate {
            log::info!("[{pid}] not tracked: {cause}");
            return Reaction::Rejected(cause);
        }
        match self.process_control.terminate(pid) {
            Ok(()) => {
                log::info!("[{pid}] terminated: {cause}");
                Reaction::Terminated { pid, cause }
            }
            Err(err) => {
                log::error!("[{pid}] termination failed: {err}");
                Reaction::Rejected(cause)
            }
        }
    }
}

#[derive(Debug, Error)]
#[error("process monitor is not running")]
pub struct MonitorClosed;

enum MonitorRequest {
    Update(ProcessEvent),
    Handle {
        event: ProcessEvent,
        tx_reply: oneshot::Sender<Reaction>,
    },
}

/// Start the monitor task. It runs until every [`ProcessMonitorHandle`] is
/// dropped.
pub fn start_process_monitor(watcher: ProcessWatcher) -> ProcessMonitorHandle {
    let (tx, rx) = mpsc::unbounded_channel();
    tokio::spawn(run(watcher, rx));
    ProcessMonitorHandle { tx }
}

#[derive(Clone)]
pub struct ProcessMonitorHandle {
    tx: mpsc::UnboundedSender<MonitorRequest>,
}

impl ProcessMonitorHandle {
    /// Queue an event without waiting for its outcome.
    pub fn update(&self, event: ProcessEvent) {
        if self.tx.send(MonitorRequest::Update(event)).is_err() {
            log::warn!("{MODULE_NAME} stopped, dropping {event:?}");
        }
    }

    /// Queue an event and wait for the monitor's reaction.
    pub async fn handle(&self, event: ProcessEvent) -> Result<Reaction, MonitorClosed> {
        let (tx_reply, rx_reply) = oneshot::channel();
        self.tx
            .send(MonitorRequest::Handle { event, tx_reply })
            .map_err(|_| MonitorClosed)?;
        rx_reply.await.map_err(|_| MonitorClosed)
    }
}

async fn run(watcher: ProcessWatcher, mut rx: mpsc::UnboundedReceiver<MonitorRequest>) {
    log::debug!("{MODULE_NAME} started");
    while let Some(request) = rx.recv().await {
        let (event, tx_reply) = match request {
            MonitorRequest::Update(event) => (event, None),
            MonitorRequest::Handle { event, tx_reply } => (event, Some(tx_reply)),
        };
        let blocking = match event {
            ProcessEvent::Exited { pid } => watcher.registry.exit_would_block(pid),
            _ => false,
        };
        if blocking {
            // the root waits on later events of its children; every other
            // event stays inline to keep the feed order
            let watcher = watcher.clone();
            tokio::task::spawn_blocking(move || reply(tx_reply, watcher.handle(event)));
        } else {
            reply(tx_reply, watcher.handle(event));
        }
    }
    log::debug!("{MODULE_NAME} stopped");
}

fn reply(tx_reply: Option<oneshot::Sender<Reaction>>, reaction: Reaction) {
    if let Some(tx_reply) = tx_reply {
        // the requester may have stopped listening
        let _ = tx_reply.send(reaction);
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use custody_core::{ProcessControlError, RegistryLimits, RespawnPolicy};

    use super::*;

    #[derive(Default)]
    struct RecordingControl {
        terminated: Mutex<Vec<Pid>>,
    }

    impl ProcessControl for RecordingControl {
        fn terminate(&self, pid: Pid) -> Result<(), ProcessControlError> {
            self.terminated.lock().unwrap().push(pid);
            Ok(())
        }

        fn is_running(&self, _pid: Pid) -> bool {
            true
        }
    }

    fn pid(raw: u32) -> Pid {
        Pid::from_raw(raw)
    }

    fn watcher_with(
        limits: RegistryLimits,
        config: Config,
    ) -> (ProcessWatcher, Arc<FamilyRegistry>, Arc<RecordingControl>) {
        let registry = Arc::new(FamilyRegistry::new(limits));
        let control = Arc::new(RecordingControl::default());
        let watcher = ProcessWatcher::new(registry.clone(), control.clone(), config);
        (watcher, registry, control)
    }

    fn watcher() -> (ProcessWatcher, Arc<FamilyRegistry>, Arc<RecordingControl>) {
        watcher_with(RegistryLimits::default(), Config::default())
    }

    fn created(child: u32, ppid: u32, creator: u32) -> ProcessEvent {
        ProcessEvent::Created {
            pid: pid(child),
            ppid: pid(ppid),
            creator: pid(creator),
        }
    }

    #[test]
    fn children_join_their_parent_family() {
        let (watcher, registry, _) = watcher();
        registry
            .create_family(pid(100), FileId::INVALID, RespawnPolicy::NoRestriction)
            .unwrap();
        assert_eq!(
            watcher.handle(created(101, 100, 100)),
            Reaction::Attached { root: pid(100) }
        );
        assert_eq!(
            watcher.handle(created(102, 101, 101)),
            Reaction::Attached { root: pid(100) }
        );
        // duplicate notification
        assert_eq!(
            watcher.handle(created(102, 101, 101)),
            Reaction::Attached { root: pid(100) }
        );
        assert_eq!(watcher.handle(created(300, 1, 1)), Reaction::Ignored);
    }

    #[test]
    fn spawn_on_behalf_uses_creator() {
        let (watcher, registry, _) = watcher();
        registry
            .create_family(pid(100), FileId::INVALID, RespawnPolicy::NoRestriction)
            .unwrap();
        // reparented to init, but created by a watched process
        assert_eq!(
            watcher.handle(created(101, 1, 100)),
            Reaction::Attached { root: pid(100) }
        );
    }

    #[test]
    fn remote_threads_pull_target_in() {
        let (watcher, registry, _) = watcher();
        registry
            .create_family(pid(100), FileId::INVALID, RespawnPolicy::NoRestriction)
            .unwrap();
        let injected = ProcessEvent::ThreadCreated {
            creator: pid(100),
            target: pid(555),
        };
        assert_eq!(watcher.handle(injected), Reaction::Attached { root: pid(100) });
        assert!(registry.is_same_family(pid(100), pid(555)));

        let own = ProcessEvent::ThreadCreated {
            creator: pid(100),
            target: pid(100),
        };
        assert_eq!(watcher.handle(own), Reaction::Ignored);
        let unwatched = ProcessEvent::ThreadCreated {
            creator: pid(7),
            target: pid(8),
        };
        assert_eq!(watcher.handle(unwatched), Reaction::Ignored);
    }

    #[test]
    fn exhaustion_terminates_when_configured() {
        let limits = RegistryLimits {
            max_members: 1,
            ..Default::default()
        };
        let (watcher, registry, control) = watcher_with(limits, Config::default());
        registry
            .create_family(pid(100), FileId::INVALID, RespawnPolicy::NoRestriction)
            .unwrap();
        assert_eq!(
            watcher.handle(created(101, 100, 100)),
            Reaction::Terminated {
                pid: pid(101),
                cause: AddError::CapacityExhausted
            }
        );
        assert_eq!(*control.terminated.lock().unwrap(), vec![pid(101)]);

        let config = Config {
            terminate_on_exhaustion: false,
            ..Default::default()
        };
        let (watcher, registry, control) = watcher_with(limits, config);
        registry
            .create_family(pid(100), FileId::INVALID, RespawnPolicy::NoRestriction)
            .unwrap();
        assert_eq!(
            watcher.handle(created(101, 100, 100)),
            Reaction::Rejected(AddError::CapacityExhausted)
        );
        assert!(control.terminated.lock().unwrap().is_empty());
    }

    #[test]
    fn respawn_of_dropped_file_is_blocked() {
        let (watcher, registry, control) = watcher();
        let dropped = FileId::from_raw(0xb);
        registry
            .create_family(pid(30), dropped, RespawnPolicy::ProtectDroppedFiles)
            .unwrap();
        registry.claim_file(dropped, pid(30)).unwrap();

        // while alive, running the artifact joins the family
        assert_eq!(
            watcher.handle(ProcessEvent::ImageLoaded {
                pid: pid(31),
                file_id: dropped
            }),
            Reaction::Attached { root: pid(30) }
        );
        watcher.handle(ProcessEvent::Exited { pid: pid(31) });
        watcher.handle(ProcessEvent::Exited { pid: pid(30) });
        assert_eq!(registry.family_count(), 1);

        assert_eq!(
            watcher.handle(ProcessEvent::ImageLoaded {
                pid: pid(32),
                file_id: dropped
            }),
            Reaction::Terminated {
                pid: pid(32),
                cause: AddError::TreeDead
            }
        );
        assert_eq!(*control.terminated.lock().unwrap(), vec![pid(32)]);
        assert_eq!(
            watcher.handle(ProcessEvent::ImageLoaded {
                pid: pid(33),
                file_id: FileId::from_raw(1)
            }),
            Reaction::Ignored
        );
    }

    #[test]
    fn exit_timeout_still_forgets_root() {
        let config = Config {
            exit_wait_timeout: Some(Duration::from_millis(10)),
            ..Default::default()
        };
        let (watcher, registry, _) = watcher_with(RegistryLimits::default(), config);
        registry
            .create_family(pid(40), FileId::INVALID, RespawnPolicy::NoRestriction)
            .unwrap();
        watcher.handle(created(41, 40, 40));
        assert_eq!(
            watcher.handle(ProcessEvent::Exited { pid: pid(40) }),
            Reaction::Exited(WaitOutcome::TimedOut)
        );
        assert!(!registry.contains_family(pid(40)));
        assert_eq!(registry.process_owner_root(pid(41)), pid(40));
    }

    #[test]
    fn config_from_section() {
        let config = Config::try_from(&ModuleConfig::default()).unwrap();
        assert_eq!(config.exit_wait_timeout, None);
        assert!(config.terminate_on_exhaustion && config.block_respawn);

        let section: ModuleConfig = [("exit_wait_timeout_ms", "250"), ("block_respawn", "false")]
            .into_iter()
            .collect();
        let config = Config::try_from(&section).unwrap();
        assert_eq!(config.exit_wait_timeout, Some(Duration::from_millis(250)));
        assert!(!config.block_respawn);

        let section: ModuleConfig = [("terminate_on_exhaustion", "maybe")]
            .into_iter()
            .collect();
        assert!(Config::try_from(&section).is_err());
    }

    #[tokio::test]
    async fn root_exit_waits_for_children() {
        let (watcher, registry, _) = watcher();
        registry
            .create_family(pid(40), FileId::INVALID, RespawnPolicy::NoRestriction)
            .unwrap();
        let monitor = start_process_monitor(watcher);
        monitor.update(created(41, 40, 40));

        let root_exit = tokio::spawn({
            let monitor = monitor.clone();
            async move { monitor.handle(ProcessEvent::Exited { pid: pid(40) }).await }
        });
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(!root_exit.is_finished());

        // the feed keeps flowing while the root waits
        assert_eq!(
            monitor.handle(created(42, 41, 41)).await.unwrap(),
            Reaction::Attached { root: pid(40) }
        );
        monitor.update(ProcessEvent::Exited { pid: pid(42) });
        assert_eq!(
            monitor
                .handle(ProcessEvent::Exited { pid: pid(41) })
                .await
                .unwrap(),
            Reaction::Exited(WaitOutcome::Settled { removed: true })
        );
        assert_eq!(
            root_exit.await.unwrap().unwrap(),
            Reaction::Exited(WaitOutcome::Settled { removed: true })
        );
        assert_eq!(registry.family_count(), 0);
    }

    #[tokio::test]
    async fn member_exit_is_ordered_before_pid_reuse() {
        let (watcher, registry, _) = watcher();
        registry
            .create_family(pid(40), FileId::INVALID, RespawnPolicy::NoRestriction)
            .unwrap();
        let monitor = start_process_monitor(watcher);
        monitor.update(created(41, 40, 40));

        // 41 exits and the pid is handed straight to a new child of the root
        for _ in 0..50 {
            monitor.update(ProcessEvent::Exited { pid: pid(41) });
            assert_eq!(
                monitor.handle(created(41, 40, 40)).await.unwrap(),
                Reaction::Attached { root: pid(40) }
            );
            tokio::task::yield_now().await;
            assert!(registry.is_same_family(pid(40), pid(41)));
        }
    }
}
