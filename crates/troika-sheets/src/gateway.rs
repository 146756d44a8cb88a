//! The gateway: worker offload, write serialization, retry, breakers,
//! client caching.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{Mutex, RwLock, Semaphore};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use troika_core::breaker::{BreakerConfig, BreakerState, CircuitBreaker};
use troika_core::retry::{retry, RetryConfig, RetryOutcome};

use crate::api::{ApiError, CellUpdate, Row, SheetsApi};
use crate::color::Color;
use crate::error::{SheetError, SheetResult};

/// The three sheet contours the process talks to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SheetEndpoint {
    /// Partner identity sheet.
    Auth,
    /// Appeals sheet.
    Appeals,
    /// Promotions sheet.
    Promotions,
}

impl SheetEndpoint {
    /// Stable name used for breakers and logs.
    #[must_use]
    pub fn name(self) -> &'static str {
        match self {
            Self::Auth => "auth-sheet",
            Self::Appeals => "appeals-sheet",
            Self::Promotions => "promotions-sheet",
        }
    }
}

/// Gateway tuning knobs.
#[derive(Debug, Clone)]
pub struct GatewayConfig {
    /// Size of the blocking worker pool; the only concurrency knob for
    /// external sheet I/O.
    pub pool_size: usize,
    /// Per-RPC timeout.
    pub rpc_timeout: Duration,
    /// Retry profile for transient failures.
    pub retry: RetryConfig,
    /// Breaker thresholds applied per endpoint.
    pub breaker: BreakerConfig,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            pool_size: 8,
            rpc_timeout: Duration::from_secs(30),
            retry: RetryConfig::sheets(),
            breaker: BreakerConfig::default(),
        }
    }
}

/// Builds an authorized client. Blocking; runs on the worker pool.
pub type Connector = Arc<dyn Fn() -> Result<Arc<dyn SheetsApi>, ApiError> + Send + Sync>;

struct Shared {
    pool: Semaphore,
    write_lock: Mutex<()>,
    config: GatewayConfig,
}

struct Contour {
    endpoint: SheetEndpoint,
    worksheet: String,
    connector: Connector,
    client: RwLock<Option<Arc<dyn SheetsApi>>>,
    breaker: CircuitBreaker,
}

/// Factory for per-sheet handles sharing one pool and one write lock.
#[derive(Clone)]
pub struct SheetsGateway {
    shared: Arc<Shared>,
}

impl SheetsGateway {
    /// Create a gateway with the given tuning.
    #[must_use]
    pub fn new(config: GatewayConfig) -> Self {
        Self {
            shared: Arc::new(Shared {
                pool: Semaphore::new(config.pool_size.max(1)),
                write_lock: Mutex::new(()),
                config,
            }),
        }
    }

    /// Create a handle for one sheet contour.
    ///
    /// Handles are cheap to clone; all handles from one gateway share the
    /// worker pool and the write lock, so mutating RPCs are serialized
    /// process-wide regardless of which sheet they touch.
    #[must_use]
    pub fn sheet(
        &self,
        endpoint: SheetEndpoint,
        worksheet: &str,
        connector: Connector,
    ) -> SheetHandle {
        SheetHandle {
            shared: Arc::clone(&self.shared),
            contour: Arc::new(Contour {
                endpoint,
                worksheet: worksheet.to_string(),
                connector,
                client: RwLock::new(None),
                breaker: CircuitBreaker::new(endpoint.name(), self.shared.config.breaker),
            }),
        }
    }
}

impl std::fmt::Debug for SheetsGateway {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SheetsGateway")
            .field("pool_size", &self.shared.config.pool_size)
            .finish_non_exhaustive()
    }
}

/// Failure of one attempt, before retry classification.
#[derive(Debug)]
enum AttemptError {
    Api(ApiError),
    BreakerOpen,
    Timeout,
    Cancelled,
}

impl AttemptError {
    fn is_retryable(&self) -> bool {
        match self {
            Self::Api(e) => e.is_transient(),
            Self::BreakerOpen | Self::Cancelled => false,
            Self::Timeout => true,
        }
    }
}

/// Async operations on one sheet contour.
#[derive(Clone)]
pub struct SheetHandle {
    shared: Arc<Shared>,
    contour: Arc<Contour>,
}

impl SheetHandle {
    /// The contour this handle addresses.
    #[must_use]
    pub fn endpoint(&self) -> SheetEndpoint {
        self.contour.endpoint
    }

    /// Current breaker state, for health reporting.
    #[must_use]
    pub fn breaker_state(&self) -> BreakerState {
        self.contour.breaker.state()
    }

    /// Drop the cached client so the next call reconnects.
    pub async fn invalidate_client(&self) {
        debug!(endpoint = self.contour.endpoint.name(), "client cache invalidated");
        *self.contour.client.write().await = None;
    }

    /// All rows, header included.
    pub async fn list_rows(&self, cancel: &CancellationToken) -> SheetResult<Vec<Row>> {
        let sheet = self.contour.worksheet.clone();
        self.execute(false, cancel, move |api| api.list_rows(&sheet))
            .await
    }

    /// Read one cell.
    pub async fn read_cell(
        &self,
        row: u32,
        col: u32,
        cancel: &CancellationToken,
    ) -> SheetResult<String> {
        let sheet = self.contour.worksheet.clone();
        self.execute(false, cancel, move |api| api.read_cell(&sheet, row, col))
            .await
    }

    /// Write one cell. Serialized under the process write lock.
    pub async fn write_cell(
        &self,
        row: u32,
        col: u32,
        value: &str,
        cancel: &CancellationToken,
    ) -> SheetResult<()> {
        let sheet = self.contour.worksheet.clone();
        let value = value.to_string();
        self.execute(true, cancel, move |api| {
            api.write_cell(&sheet, row, col, &value)
        })
        .await
    }

    /// Apply a batch of cell writes in one RPC, under the write lock.
    pub async fn batch_update(
        &self,
        updates: Vec<CellUpdate>,
        cancel: &CancellationToken,
    ) -> SheetResult<()> {
        let sheet = self.contour.worksheet.clone();
        self.execute(true, cancel, move |api| api.batch_update(&sheet, &updates))
            .await
    }

    /// Append a row, under the write lock. Returns its 1-based index.
    pub async fn append_row(
        &self,
        values: Vec<String>,
        cancel: &CancellationToken,
    ) -> SheetResult<u32> {
        let sheet = self.contour.worksheet.clone();
        self.execute(true, cancel, move |api| api.append_row(&sheet, &values))
            .await
    }

    /// Set or clear a cell's fill color, under the write lock.
    pub async fn format_cell(
        &self,
        row: u32,
        col: u32,
        color: Option<Color>,
        cancel: &CancellationToken,
    ) -> SheetResult<()> {
        let sheet = self.contour.worksheet.clone();
        self.execute(true, cancel, move |api| {
            api.format_cell(&sheet, row, col, color)
        })
        .await
    }

    /// Run a read-modify-write sequence as one unit under the write
    /// lock.
    ///
    /// The closure receives the vendor client and the worksheet name and
    /// may combine reads and writes; the whole sequence holds the
    /// process write lock, so no other mutation can interleave. A retry
    /// re-runs the entire closure.
    pub async fn mutate<T, F>(&self, cancel: &CancellationToken, op: F) -> SheetResult<T>
    where
        T: Send + 'static,
        F: Fn(&dyn SheetsApi, &str) -> Result<T, ApiError> + Send + Sync + Clone + 'static,
    {
        let sheet = self.contour.worksheet.clone();
        self.execute(true, cancel, move |api| op(api, &sheet)).await
    }

    /// Run one operation with retry, breaker, pool offload and (for
    /// mutations) write serialization.
    async fn execute<T, F>(
        &self,
        mutating: bool,
        cancel: &CancellationToken,
        op: F,
    ) -> SheetResult<T>
    where
        T: Send + 'static,
        F: Fn(&dyn SheetsApi) -> Result<T, ApiError> + Send + Sync + Clone + 'static,
    {
        let outcome = retry(
            &self.shared.config.retry,
            cancel,
            |attempt| self.attempt(mutating, attempt, cancel, op.clone()),
            AttemptError::is_retryable,
        )
        .await;

        match outcome {
            RetryOutcome::Success(value) => Ok(value),
            RetryOutcome::Cancelled => Err(SheetError::Cancelled),
            RetryOutcome::Exhausted { error, attempts } => {
                let endpoint = self.contour.endpoint.name();
                match error {
                    AttemptError::BreakerOpen => Err(SheetError::BreakerOpen {
                        endpoint: endpoint.to_string(),
                    }),
                    AttemptError::Cancelled => Err(SheetError::Cancelled),
                    AttemptError::Timeout => {
                        warn!(endpoint, attempts, "sheet rpc timed out");
                        Err(SheetError::Transient("rpc timed out".to_string()))
                    },
                    AttemptError::Api(e) => {
                        if e.is_transient() {
                            warn!(endpoint, attempts, error = %e, "sheet rpc exhausted retries");
                        }
                        Err(SheetError::from(e))
                    },
                }
            },
        }
    }

    async fn attempt<T, F>(
        &self,
        mutating: bool,
        attempt: u32,
        cancel: &CancellationToken,
        op: F,
    ) -> Result<T, AttemptError>
    where
        T: Send + 'static,
        F: Fn(&dyn SheetsApi) -> Result<T, ApiError> + Send + Sync + 'static,
    {
        if !self.contour.breaker.try_acquire() {
            return Err(AttemptError::BreakerOpen);
        }

        let client = match self.client().await {
            Ok(client) => client,
            Err(e) => {
                self.settle(&e);
                return Err(e);
            },
        };

        if attempt > 0 {
            debug!(
                endpoint = self.contour.endpoint.name(),
                attempt, "retrying sheet rpc"
            );
        }

        // Held across the blocking RPC by design: the external store is
        // last-writer-wins per cell, and process-wide serialization of
        // mutations removes read-modify-write races.
        let write_guard = if mutating {
            Some(self.shared.write_lock.lock().await)
        } else {
            None
        };

        let result = self.offload(client, op, cancel).await;
        drop(write_guard);

        match &result {
            Ok(_) => self.contour.breaker.record_success(),
            Err(e) => self.settle(e),
        }
        result
    }

    /// Run the blocking closure on the pool with the RPC timeout.
    async fn offload<T, F>(
        &self,
        client: Arc<dyn SheetsApi>,
        op: F,
        cancel: &CancellationToken,
    ) -> Result<T, AttemptError>
    where
        T: Send + 'static,
        F: Fn(&dyn SheetsApi) -> Result<T, ApiError> + Send + Sync + 'static,
    {
        let _permit = self
            .shared
            .pool
            .acquire()
            .await
            .map_err(|_| AttemptError::Api(ApiError::Invalid("pool closed".to_string())))?;

        if cancel.is_cancelled() {
            return Err(AttemptError::Cancelled);
        }

        let join = tokio::task::spawn_blocking(move || op(client.as_ref()));
        match tokio::time::timeout(self.shared.config.rpc_timeout, join).await {
            Err(_) => Err(AttemptError::Timeout),
            Ok(Err(join_error)) => Err(AttemptError::Api(ApiError::Invalid(format!(
                "worker panicked: {join_error}"
            )))),
            Ok(Ok(Ok(value))) => Ok(value),
            Ok(Ok(Err(api_error))) => Err(AttemptError::Api(api_error)),
        }
    }

    /// Breaker and cache bookkeeping for a failed attempt.
    fn settle(&self, error: &AttemptError) {
        match error {
            AttemptError::Timeout => self.contour.breaker.record_failure(),
            AttemptError::Api(e) => {
                if e.is_transient() {
                    self.contour.breaker.record_failure();
                } else {
                    // The endpoint answered; as a liveness signal that is
                    // a success even though the call failed. This also
                    // releases an outstanding half-open probe.
                    self.contour.breaker.record_success();
                }
                if e.is_auth() {
                    let contour = Arc::clone(&self.contour);
                    tokio::spawn(async move {
                        warn!(
                            endpoint = contour.endpoint.name(),
                            "auth failure, rebuilding client on next call"
                        );
                        *contour.client.write().await = None;
                    });
                }
            },
            AttemptError::BreakerOpen | AttemptError::Cancelled => {},
        }
    }

    /// Cached client, connecting on first use.
    async fn client(&self) -> Result<Arc<dyn SheetsApi>, AttemptError> {
        if let Some(client) = self.contour.client.read().await.clone() {
            return Ok(client);
        }

        let connector = Arc::clone(&self.contour.connector);
        let join = tokio::task::spawn_blocking(move || connector());
        let connected = match tokio::time::timeout(self.shared.config.rpc_timeout, join).await {
            Err(_) => return Err(AttemptError::Timeout),
            Ok(Err(join_error)) => {
                return Err(AttemptError::Api(ApiError::Invalid(format!(
                    "connector panicked: {join_error}"
                ))))
            },
            Ok(Ok(Err(api_error))) => return Err(AttemptError::Api(api_error)),
            Ok(Ok(Ok(client))) => client,
        };

        // Last connect wins if two raced; both produced valid clients.
        *self.contour.client.write().await = Some(Arc::clone(&connected));
        Ok(connected)
    }
}

impl std::fmt::Debug for SheetHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SheetHandle")
            .field("endpoint", &self.contour.endpoint)
            .field("worksheet", &self.contour.worksheet)
            .finish_non_exhaustive()
    }
}
