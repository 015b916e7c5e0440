use std::time::Duration;

use crate::config::AppConfig;
use crate::core::volumes::VolumeProvider;

#[cfg(target_os = "linux")]
mod linux;
mod simulated;

pub use simulated::{SimulatedProvider, Simulator};

#[cfg(target_os = "linux")]
pub use linux::free_space;

pub fn get_provider(config: &AppConfig) -> Box<dyn VolumeProvider> {
    if config.simulation {
        let (provider, controller) = SimulatedProvider::new();

        std::thread::spawn(move || {
            let stdin = std::io::stdin();
            for line in stdin.lines() {
                if let Ok(cmd) = line {
                    let parts: Vec<&str> = cmd.trim().split_whitespace().collect();
                    match parts.first().copied() {
                        Some("add") => controller.attach(parts.get(1).unwrap_or(&"123"), 64),
                        Some("rm") => controller.detach(parts.get(1).unwrap_or(&"123")),
                        _ => println!("(Simulator) Use: 'add <id>' or 'rm <id>'"),
                    }
                }
            }
        });

        return Box::new(provider);
    }

    #[cfg(target_os = "linux")]
    {
        return Box::new(linux::LinuxVolumeProvider::new(Duration::from_secs(
            config.poll_interval_secs,
        )));
    }
}
