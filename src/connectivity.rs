use std::{error::Error, net::IpAddr, sync::mpsc::Sender, thread, time::Duration};

use fastping_rs::{PingResult, Pinger};
use slog::{debug, info};

use crate::runtime::Event;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Connectivity {
    Online,
    Offline,
}

/// Turns reachability samples into online/offline transitions. The first
/// sample only establishes the baseline.
#[derive(Debug, Default)]
pub struct ConnectivityTracker {
    reachable: Option<bool>,
}
impl ConnectivityTracker {
    pub fn observe(&mut self, reachable: bool) -> Option<Connectivity> {
        match self.reachable.replace(reachable) {
            Some(previous) if previous != reachable => Some(if reachable {
                Connectivity::Online
            } else {
                Connectivity::Offline
            }),
            _ => None,
        }
    }
}

/// Keeps the pinger alive, pinging stops when this is dropped.
pub struct ConnectivityMonitor {
    pinger: Pinger,
}
impl Drop for ConnectivityMonitor {
    fn drop(&mut self) {
        self.pinger.stop_pinger();
    }
}

/// Pings `probe` every `interval` and posts an [`Event::Connectivity`] each
/// time it goes from reachable to unreachable or back. Needs permission to
/// open raw ICMP sockets.
pub fn spawn_monitor(
    log: &slog::Logger,
    probe: IpAddr,
    interval: Duration,
    events: Sender<Event>,
) -> Result<ConnectivityMonitor, Box<dyn Error>> {
    let (pinger, result_stream) = Pinger::new(Some(interval.as_millis() as u64), None)?;
    pinger.add_ipaddr(&probe.to_string());
    pinger.run_pinger();
    info!(log, "watching connectivity"; "probe" => probe.to_string(), "interval" => format!("{interval:?}"));

    let log = log.clone();
    thread::spawn(move || {
        let mut tracker = ConnectivityTracker::default();
        while let Ok(result) = result_stream.recv() {
            let reachable = match result {
                PingResult::Idle { addr } => {
                    debug!(log, "network: probe unanswered"; "addr" => addr.to_string());
                    false
                }
                PingResult::Receive { addr, rtt } => {
                    debug!(log, "network: received ICMP Echo"; "addr" => addr.to_string(), "rtt" => format!("{rtt:?}"));
                    true
                }
            };
            if let Some(change) = tracker.observe(reachable) {
                if events.send(Event::Connectivity(change)).is_err() {
                    break;
                }
            }
        }
    });

    Ok(ConnectivityMonitor { pinger })
}
