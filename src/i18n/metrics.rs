//! Locale resolution metrics.
//!
//! Counts which negotiation step produced the active locale and how often a
//! source-locale lookup came back empty. Counters are plain atomics behind a
//! lazily created process-wide instance; they carry no request data.

use super::negotiator::ResolutionSource;
use serde::Serialize;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::OnceLock;

/// Resolution counters.
pub struct ResolutionMetrics {
    parameter: AtomicUsize,
    persisted: AtomicUsize,
    browser: AtomicUsize,
    geo: AtomicUsize,
    default: AtomicUsize,

    /// Source-locale lookups that found no content in any applicable locale
    source_misses: AtomicUsize,
}

/// Global metrics instance (initialized lazily)
static METRICS: OnceLock<ResolutionMetrics> = OnceLock::new();

impl ResolutionMetrics {
    /// Create a detached set of counters.
    pub fn new() -> Self {
        Self {
            parameter: AtomicUsize::new(0),
            persisted: AtomicUsize::new(0),
            browser: AtomicUsize::new(0),
            geo: AtomicUsize::new(0),
            default: AtomicUsize::new(0),
            source_misses: AtomicUsize::new(0),
        }
    }

    /// Get the global resolution metrics instance.
    pub fn global() -> &'static ResolutionMetrics {
        METRICS.get_or_init(ResolutionMetrics::new)
    }

    /// Record which step resolved a request.
    pub fn record_resolution(&self, source: ResolutionSource) {
        self.counter(source).fetch_add(1, Ordering::Relaxed);
    }

    /// Record a source-locale lookup that found nothing.
    pub fn record_source_miss(&self) {
        self.source_misses.fetch_add(1, Ordering::Relaxed);
    }

    /// Current count for one resolution source.
    pub fn resolutions(&self, source: ResolutionSource) -> usize {
        self.counter(source).load(Ordering::Relaxed)
    }

    pub fn source_misses(&self) -> usize {
        self.source_misses.load(Ordering::Relaxed)
    }

    fn counter(&self, source: ResolutionSource) -> &AtomicUsize {
        match source {
            ResolutionSource::Parameter => &self.parameter,
            ResolutionSource::Persisted => &self.persisted,
            ResolutionSource::Browser => &self.browser,
            ResolutionSource::Geo => &self.geo,
            ResolutionSource::Default => &self.default,
        }
    }

    /// Generate a metrics report.
    pub fn report(&self) -> MetricsReport {
        let parameter = self.resolutions(ResolutionSource::Parameter);
        let persisted = self.resolutions(ResolutionSource::Persisted);
        let browser = self.resolutions(ResolutionSource::Browser);
        let geo = self.resolutions(ResolutionSource::Geo);
        let default = self.resolutions(ResolutionSource::Default);
        let total = parameter + persisted + browser + geo + default;

        let detection_rate = if total > 0 {
            ((browser + geo) as f64 / total as f64) * 100.0
        } else {
            0.0
        };

        MetricsReport {
            total_resolutions: total,
            parameter,
            persisted,
            browser,
            geo,
            default,
            detection_rate,
            source_misses: self.source_misses(),
        }
    }

    /// Reset all metrics to zero (useful for testing).
    #[cfg(test)]
    pub fn reset(&self) {
        for counter in [
            &self.parameter,
            &self.persisted,
            &self.browser,
            &self.geo,
            &self.default,
            &self.source_misses,
        ] {
            counter.store(0, Ordering::Relaxed);
        }
    }
}

impl Default for ResolutionMetrics {
    fn default() -> Self {
        Self::new()
    }
}

/// Snapshot of the resolution counters.
#[derive(Debug, Clone, Serialize)]
pub struct MetricsReport {
    pub total_resolutions: usize,
    pub parameter: usize,
    pub persisted: usize,
    pub browser: usize,
    pub geo: usize,
    pub default: usize,

    /// Share of resolutions decided by browser or geo detection (0-100)
    pub detection_rate: f64,

    pub source_misses: usize,
}
