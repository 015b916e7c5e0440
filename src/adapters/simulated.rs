use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::core::volumes::{RemovableVolume, VolumeEvent, VolumeProvider};

enum SimulatedCommand {
    InjectAttach(RemovableVolume),
    InjectDetach(String),
}

/// Controller handle for injecting volume events, used by the test suite
/// and the interactive simulation shell.
#[derive(Clone)]
pub struct Simulator {
    tx: mpsc::UnboundedSender<SimulatedCommand>,
    volumes: Arc<Mutex<HashMap<String, RemovableVolume>>>,
}

impl Simulator {
    pub fn attach(&self, id: &str, size_gb: u64) {
        let capacity = size_gb * 1024 * 1024 * 1024;
        self.attach_volume(RemovableVolume {
            id: id.to_string(),
            label: format!("SIM_DRIVE_{id}"),
            mount_point: std::env::temp_dir().join(format!("ebk-sim-{id}")),
            capacity,
            free_space: capacity,
            filesystem: "exfat".to_string(),
        });
    }

    /// Attach a fully specified volume, e.g. one mounted at a tempdir.
    pub fn attach_volume(&self, volume: RemovableVolume) {
        self.volumes
            .lock()
            .unwrap()
            .insert(volume.id.clone(), volume.clone());
        let _ = self.tx.send(SimulatedCommand::InjectAttach(volume));
    }

    pub fn detach(&self, id: &str) {
        self.volumes.lock().unwrap().remove(id);
        let _ = self.tx.send(SimulatedCommand::InjectDetach(id.to_string()));
    }
}

pub struct SimulatedProvider {
    // The receiver is wrapped in a Mutex so it can move out inside
    // `start()`, which takes &self. (start is only called once.)
    cmd_rx: Arc<Mutex<Option<mpsc::UnboundedReceiver<SimulatedCommand>>>>,
    volumes: Arc<Mutex<HashMap<String, RemovableVolume>>>,
    shutdown: CancellationToken,
}

impl SimulatedProvider {
    pub fn new() -> (Self, Simulator) {
        let (tx, rx) = mpsc::unbounded_channel();
        let volumes = Arc::new(Mutex::new(HashMap::new()));

        (
            Self {
                cmd_rx: Arc::new(Mutex::new(Some(rx))),
                volumes: Arc::clone(&volumes),
                shutdown: CancellationToken::new(),
            },
            Simulator { tx, volumes },
        )
    }
}

impl VolumeProvider for SimulatedProvider {
    fn start(&self, event_sender: mpsc::Sender<VolumeEvent>) {
        let mut rx = self
            .cmd_rx
            .lock()
            .unwrap()
            .take()
            .expect("SimulatedProvider::start() called twice");
        let shutdown = self.shutdown.clone();

        // Bridge task: controller commands become volume events.
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = shutdown.cancelled() => break,
                    cmd = rx.recv() => {
                        let Some(cmd) = cmd else { break };
                        let event = match cmd {
                            SimulatedCommand::InjectAttach(volume) => {
                                VolumeEvent::VolumeAttached(volume)
                            }
                            SimulatedCommand::InjectDetach(id) => VolumeEvent::VolumeDetached(id),
                        };
                        if event_sender.send(event).await.is_err() {
                            break;
                        }
                    }
                }
            }
        });
    }

    fn stop(&self) {
        self.shutdown.cancel();
    }

    fn list_volumes(&self) -> anyhow::Result<Vec<RemovableVolume>> {
        Ok(self.volumes.lock().unwrap().values().cloned().collect())
    }
}
