use std::time::Duration;

use slog::{debug, error, info};

use crate::connectivity::Connectivity;
use crate::error::FetchError;
use crate::location::{ApiResponse, LocationRecord};
use crate::view::{Region, View};

pub const MAX_RETRIES: u32 = 3;
pub const RETRY_STEP: Duration = Duration::from_millis(2000);
/// Upper bound for a single retry delay.
pub const MAX_RETRY_DELAY: Duration = Duration::from_secs(60 * 60);

/// Identifies one fetch chain (the first attempt plus its retries). Outcomes
/// carrying an older generation belong to a superseded chain and are dropped.
pub type Generation = u64;

#[derive(Debug, Clone)]
pub struct FetcherConfig {
    pub max_retries: u32,
    /// The n-th retry waits `n * retry_step`.
    pub retry_step: Duration,
    pub coordinate_precision: Option<usize>,
}
impl Default for FetcherConfig {
    fn default() -> Self {
        Self {
            max_retries: MAX_RETRIES,
            retry_step: RETRY_STEP,
            coordinate_precision: None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Idle,
    Loading,
    Retrying,
    Success,
    Failed,
}
impl Phase {
    fn visible_region(&self) -> Option<Region> {
        match self {
            Phase::Idle => None,
            Phase::Loading | Phase::Retrying => Some(Region::Loading),
            Phase::Success => Some(Region::Data),
            Phase::Failed => Some(Region::Error),
        }
    }
}

/// Work the fetcher wants done on its behalf. It never performs I/O or waits
/// itself, whoever drives it executes these and reports back.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Effect {
    Request {
        generation: Generation,
    },
    ScheduleRetry {
        generation: Generation,
        delay: Duration,
    },
}

pub struct LocationFetcher<V: View> {
    log: slog::Logger,
    view: V,
    config: FetcherConfig,
    phase: Phase,
    retry_count: u32,
    generation: Generation,
}
impl<V: View> LocationFetcher<V> {
    pub fn new(log: &slog::Logger, view: V, config: FetcherConfig) -> Self {
        Self {
            log: log.clone(),
            view,
            config,
            phase: Phase::Idle,
            retry_count: 0,
            generation: 0,
        }
    }

    pub fn phase(&self) -> Phase {
        self.phase
    }
    pub fn retry_count(&self) -> u32 {
        self.retry_count
    }
    #[cfg(test)]
    pub fn view(&self) -> &V {
        &self.view
    }
    pub fn is_settled(&self) -> bool {
        matches!(self.phase, Phase::Success | Phase::Failed)
    }

    /// Starts a new fetch chain, superseding whatever was in flight or
    /// waiting for a retry.
    pub fn fetch(&mut self) -> Effect {
        self.generation += 1;
        self.begin_attempt()
    }

    fn begin_attempt(&mut self) -> Effect {
        self.transition(Phase::Loading);
        info!(self.log, "fetching location data"; "generation" => self.generation, "retry" => self.retry_count);
        Effect::Request {
            generation: self.generation,
        }
    }

    pub fn on_response(
        &mut self,
        generation: Generation,
        outcome: Result<ApiResponse, FetchError>,
    ) -> Option<Effect> {
        if generation != self.generation || self.phase != Phase::Loading {
            debug!(self.log, "discarding stale response"; "generation" => generation, "current" => self.generation);
            return None;
        }
        match outcome.and_then(LocationRecord::try_from) {
            Ok(record) => {
                self.render(&record);
                self.retry_count = 0;
                self.transition(Phase::Success);
                info!(self.log, "location data displayed"; "ip" => &record.ip_address);
                None
            }
            Err(err) => self.on_failure(err),
        }
    }

    /// Decides between another attempt and giving up. Retries keep the
    /// loading region up, only the final failure shows the error region.
    pub fn on_failure(&mut self, err: FetchError) -> Option<Effect> {
        let status = err.status();
        if self.retry_count < self.config.max_retries && status.is_retryable() {
            self.retry_count += 1;
            let delay = self
                .config
                .retry_step
                .saturating_mul(self.retry_count)
                .min(MAX_RETRY_DELAY);
            self.transition(Phase::Retrying);
            info!(
                self.log, "retrying";
                "attempt" => self.retry_count,
                "max" => self.config.max_retries,
                "delay" => format!("{delay:?}"),
                "status" => status.as_str(),
            );
            return Some(Effect::ScheduleRetry {
                generation: self.generation,
                delay,
            });
        }

        self.transition(Phase::Failed);
        error!(
            self.log, "failed to fetch location data";
            "error" => err.message(),
            "status" => status.as_str(),
            "retry_count" => self.retry_count,
        );
        None
    }

    pub fn on_retry_due(&mut self, generation: Generation) -> Option<Effect> {
        if generation != self.generation || self.phase != Phase::Retrying {
            debug!(self.log, "discarding stale retry"; "generation" => generation, "current" => self.generation);
            return None;
        }
        Some(self.begin_attempt())
    }

    pub fn on_connectivity(&mut self, connectivity: Connectivity) -> Option<Effect> {
        match connectivity {
            Connectivity::Online => {
                info!(self.log, "network is online");
                if self.phase == Phase::Failed {
                    return Some(self.fetch());
                }
                None
            }
            Connectivity::Offline => {
                info!(self.log, "network is offline");
                None
            }
        }
    }

    fn render(&mut self, record: &LocationRecord) {
        for (slot, value) in record.slot_values(self.config.coordinate_precision) {
            if !self.view.set_text(slot, &value) {
                debug!(self.log, "slot not part of the layout"; "slot" => slot.id());
            }
        }
    }

    // hide before show, so at no point two regions are up at once
    fn transition(&mut self, next: Phase) {
        let shown = next.visible_region();
        for region in Region::ALL {
            if Some(region) != shown {
                for element in region.elements() {
                    self.view.set_visible(element, false);
                }
            }
        }
        if let Some(region) = shown {
            for element in region.elements() {
                self.view.set_visible(element, true);
            }
        }
        debug!(self.log, "state transition"; "from" => format!("{:?}", self.phase), "to" => format!("{next:?}"));
        self.phase = next;
    }
}
