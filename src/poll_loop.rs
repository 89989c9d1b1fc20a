use crate::config::{Config, Offsets};
use crate::error::{GatewayError, Result};
use crate::normalizer::{apply_offsets, nullify_phases};
use crate::register_catalog::RegisterCatalog;
use crate::register_encoder::encode;
use crate::register_table::SharedRegisterTable;
use crate::semantic_mapper::derive_and_map;
use crate::shelly_client::ShellyClient;
use crate::shutdown::ShutdownFlag;
use crate::telemetry::{Phase, TelemetryRecord};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::sleep;
use tracing::{debug, error, info, warn};

/// Anything that can produce one telemetry snapshot per call
pub trait TelemetrySource {
    fn fetch(&self) -> impl Future<Output = Result<TelemetryRecord>> + Send;
}

impl TelemetrySource for ShellyClient {
    fn fetch(&self) -> impl Future<Output = Result<TelemetryRecord>> + Send {
        self.read_status()
    }
}

impl<T: TelemetrySource + Send + Sync> TelemetrySource for Arc<T> {
    fn fetch(&self) -> impl Future<Output = Result<TelemetryRecord>> + Send {
        (**self).fetch()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PollState {
    Idle,
    Calibrating,
    Fetching,
    Normalizing,
    Mapping,
    Encoding,
    Publishing,
    Sleeping,
    Stopped,
}

/// Background task that turns Shelly readings into the published register
/// image, once per poll interval.
pub struct PollLoop<S> {
    source: S,
    config: Config,
    nullified: Vec<Phase>,
    table: SharedRegisterTable,
    shutdown: ShutdownFlag,
    state: PollState,
}

impl<S> PollLoop<S>
where
    S: TelemetrySource + Send + Sync + 'static,
{
    pub fn new(
        source: S,
        config: Config,
        table: SharedRegisterTable,
        shutdown: ShutdownFlag,
    ) -> Result<Self> {
        let nullified = config.nullified_phases()?;
        Ok(Self {
            source,
            config,
            nullified,
            table,
            shutdown,
            state: PollState::Idle,
        })
    }

    /// Spawns the loop in its own task
    pub fn spawn(mut self) -> JoinHandle<()> {
        tokio::spawn(async move {
            self.run().await;
        })
    }

    pub fn state(&self) -> PollState {
        self.state
    }

    /// Runs cycles until the shutdown flag is seen at the top of a cycle
    pub async fn run(&mut self) {
        info!(
            "Polling {:?} every {:?}",
            self.config.shelly_url,
            self.config.poll_interval()
        );
        if !self.nullified.is_empty() {
            info!("Nullifying channels {:?}", self.nullified);
        }

        if self.config.calibrate_offsets {
            self.state = PollState::Calibrating;
            self.config = calibrate_offsets(&self.source, &self.config, &self.shutdown).await;
        }

        while !self.shutdown.is_triggered() {
            let pause = match self.run_cycle().await {
                Ok(()) => self.config.poll_interval(),
                Err(err) => {
                    self.report_failure(&err);
                    self.config.error_backoff()
                }
            };
            self.sleep(pause).await;
        }

        self.state = PollState::Stopped;
        info!("Poll loop stopped");
    }

    async fn sleep(&mut self, pause: Duration) {
        self.state = PollState::Sleeping;
        tokio::select! {
            _ = sleep(pause) => {}
            _ = self.shutdown.triggered() => debug!("Sleep cut short by shutdown"),
        }
        self.state = PollState::Idle;
    }

    fn report_failure(&self, err: &GatewayError) {
        match err {
            GatewayError::Fetch { message } => {
                warn!("Failed to read the Shelly: {message}, retrying in {:?}", self.config.error_backoff())
            }
            GatewayError::MissingField { .. } => {
                warn!("Incomplete reading, cycle skipped: {err}")
            }
            _ => error!("Failed to update registers: {err}"),
        }
    }

    /// Fetch, normalize, map, encode and publish one reading. On error the
    /// published image is left exactly as it was.
    pub async fn run_cycle(&mut self) -> Result<()> {
        self.state = PollState::Fetching;
        let raw = self.source.fetch().await?;

        self.state = PollState::Normalizing;
        let record = self.normalize(&raw)?;

        self.state = PollState::Mapping;
        let values = derive_and_map(&record)?;

        self.state = PollState::Encoding;
        let current = self.table.snapshot();
        let encoded = encode(&values, RegisterCatalog::sunspec_meter(), &current);
        for err in &encoded.rejected {
            warn!("Register left unchanged: {err}");
        }

        self.state = PollState::Publishing;
        self.table.publish(encoded.image);
        debug!("Published {} values", values.len());
        Ok(())
    }

    fn normalize(&self, raw: &TelemetryRecord) -> Result<TelemetryRecord> {
        let offset = match apply_offsets(raw, &self.config.offsets) {
            Ok(adjusted) => adjusted,
            Err(GatewayError::Config { message }) => {
                warn!("Skipping offset adjustment: {message}");
                raw.clone()
            }
            Err(err) => return Err(err),
        };
        nullify_phases(&offset, &self.nullified)
    }
}

/// Reads the meter until it answers and returns a configuration whose
/// offsets are that reading's counters, so published energy starts at zero.
/// Gives back the configuration unchanged if shutdown is requested first.
pub async fn calibrate_offsets<S: TelemetrySource>(
    source: &S,
    config: &Config,
    shutdown: &ShutdownFlag,
) -> Config {
    while !shutdown.is_triggered() {
        let captured = match source.fetch().await {
            Ok(record) => Offsets::from_record(&record),
            Err(e) => Err(e),
        };
        match captured {
            Ok(offsets) => {
                info!("Calibrated offsets {offsets:?}");
                return config.with_offsets(offsets);
            }
            Err(e) => {
                warn!(
                    "Offset calibration failed: {e}, retrying in {:?}",
                    config.error_backoff()
                );
                tokio::select! {
                    _ = sleep(config.error_backoff()) => {}
                    _ = shutdown.triggered() => {}
                }
            }
        }
    }
    warn!("Shutdown before offsets were calibrated");
    config.clone()
}
