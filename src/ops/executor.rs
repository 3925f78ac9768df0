use crate::messages::{Message, MessageBuilder};
use crate::network::{ConnectionError, ConnectionPool, Outcome, PoolError, PooledConnection, ServerAddress};
use crate::ops::error::{AttemptFailure, ExecuteError, ResponseError};
use crate::ops::operation::{server_error, Operation};
use crate::security::{fingerprint, TokenSupplier};
use crate::stats::{AttemptToken, StatsRegistry};
use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, error, info, instrument, trace, warn};

pub const DEFAULT_MAX_ATTEMPTS: u32 = 3;
pub const DEFAULT_PER_ATTEMPT_TIMEOUT: Duration = Duration::from_secs(10);

/// Retry and timeout settings for the executor
#[derive(Debug, Clone)]
pub struct ExecutorConfig {
    /// Server-failover attempts before giving up
    pub max_attempts: u32,
    /// Time allowed for one send plus receive before the attempt counts as timed out
    pub per_attempt_timeout: Duration,
}

impl Default for ExecutorConfig {
    fn default() -> Self {
        Self {
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            per_attempt_timeout: DEFAULT_PER_ATTEMPT_TIMEOUT,
        }
    }
}

/// Cancels an operation between attempts
#[derive(Debug, Clone, Default)]
pub struct CancelHandle {
    cancelled: Arc<AtomicBool>,
}

impl CancelHandle {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::Release);
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::Acquire)
    }
}

enum Step<T> {
    /// A result or a terminal error for the caller
    Done(Result<T, ExecuteError>),
    /// The attempt failed at transport level; try another server
    Failover(AttemptFailure),
}

/// Drives operations over pooled connections with failover.
///
/// Each attempt checks out a connection to a server not yet tried by this
/// operation, sends the request, and classifies the reply. Transport
/// failures, timeouts and undecodable replies move on to another server;
/// an error reply from a live server is returned as-is.
pub struct Executor {
    pool: ConnectionPool,
    stats: Arc<StatsRegistry>,
    tokens: Option<Arc<dyn TokenSupplier>>,
    config: ExecutorConfig,
}

impl Executor {
    pub fn new(pool: ConnectionPool, stats: Arc<StatsRegistry>, config: ExecutorConfig) -> Self {
        Self {
            pool,
            stats,
            tokens: None,
            config,
        }
    }

    pub fn with_token_supplier(mut self, supplier: Arc<dyn TokenSupplier>) -> Self {
        self.set_token_supplier(supplier);
        self
    }

    pub fn set_token_supplier(&mut self, supplier: Arc<dyn TokenSupplier>) {
        self.tokens = Some(supplier);
    }

    pub fn pool(&self) -> &ConnectionPool {
        &self.pool
    }

    pub fn stats(&self) -> &Arc<StatsRegistry> {
        &self.stats
    }

    pub fn config(&self) -> &ExecutorConfig {
        &self.config
    }

    pub async fn execute<O: Operation>(&self, op: &O) -> Result<O::Output, ExecuteError> {
        self.execute_with_cancel(op, &CancelHandle::new()).await
    }

    #[instrument(level = "debug", skip_all, fields(operation = op.kind()))]
    pub async fn execute_with_cancel<O: Operation>(
        &self,
        op: &O,
        cancel: &CancelHandle,
    ) -> Result<O::Output, ExecuteError> {
        let max_attempts = self.config.max_attempts.max(1);
        let mut tried: Vec<ServerAddress> = Vec::new();
        let mut excluded: HashSet<ServerAddress> = HashSet::new();
        let mut last_error: Option<AttemptFailure> = None;
        let mut attempt = 0;

        loop {
            // Running out of servers wins over running out of attempts
            let untried = self.pool.servers().iter().any(|server| !excluded.contains(server));
            if !untried {
                warn!("{} has no server left to try after {} attempts", op.kind(), attempt);
                return Err(ExecuteError::ExhaustedServers { tried, last_error });
            }
            if attempt >= max_attempts {
                warn!("{} failed after {} attempts", op.kind(), attempt);
                return Err(ExecuteError::RetriesExhausted {
                    attempts: attempt,
                    tried,
                    last_error,
                });
            }
            if cancel.is_cancelled() {
                info!("{} cancelled after {} attempts", op.kind(), attempt);
                return Err(ExecuteError::Cancelled { attempts: attempt });
            }

            attempt += 1;
            let token = op.start_attempt(&self.stats);
            debug!("Starting {} (attempt {}/{})", op.kind(), attempt, max_attempts);

            let connection = match self.pool.acquire(&excluded).await {
                Ok(connection) => connection,
                Err(PoolError::Connect { server, source }) => {
                    warn!(attempt, server = %server, "Connect failed, failing over: {}", source);
                    op.end_attempt(&self.stats, token, false, true);
                    excluded.insert(server.clone());
                    tried.push(server.clone());
                    last_error = Some(AttemptFailure::Connect { server, source });
                    continue;
                }
                Err(pool_error) => {
                    op.end_attempt(&self.stats, token, false, true);
                    warn!("{} has no server left to try: {}", op.kind(), pool_error);
                    return Err(ExecuteError::ExhaustedServers { tried, last_error });
                }
            };

            match self.attempt(op, connection, token, attempt).await {
                Step::Done(result) => return result,
                Step::Failover(failure) => {
                    let server = failure.server().clone();
                    excluded.insert(server.clone());
                    tried.push(server);
                    last_error = Some(failure);
                }
            }
        }
    }

    fn build_request<O: Operation>(&self, op: &O) -> Result<Message, ExecuteError> {
        let mut builder = MessageBuilder::new(op.message_type(), op.part_count());
        op.build_request(&mut builder)?;
        let mut request = builder.build()?.with_early_ack(op.early_ack());

        if op.needs_user_id() {
            match &self.tokens {
                Some(supplier) => {
                    let token = supplier.current_token()?;
                    trace!(token = %fingerprint(&token), "Attaching secure part");
                    request = request.with_secure_part(token);
                }
                None => trace!("No token supplier configured, sending without secure part"),
            }
        }
        Ok(request)
    }

    async fn attempt<O: Operation>(
        &self,
        op: &O,
        mut connection: PooledConnection,
        mut token: AttemptToken,
        attempt: u32,
    ) -> Step<O::Output> {
        let server = connection.server().clone();

        let request = match self.build_request(op) {
            Ok(request) => request,
            Err(error) => {
                self.pool.release(connection, Outcome::Healthy);
                op.end_attempt(&self.stats, token, false, true);
                return Step::Done(Err(error));
            }
        };

        let timeout = self.config.per_attempt_timeout;
        let started = Instant::now();

        let sent = connection.send(&request, timeout).await;
        op.end_send_attempt(&self.stats, &mut token, sent.is_err());
        if let Err(error) = sent {
            warn!(attempt, server = %server, "Send failed: {}", error);
            self.pool.release(connection, Outcome::Failed);
            op.end_attempt(&self.stats, token, false, true);
            return Step::Failover(AttemptFailure::Transport {
                server,
                source: error,
            });
        }

        let remaining = timeout.saturating_sub(started.elapsed());
        let response = match connection.receive(remaining).await {
            Ok(response) => response,
            Err(ConnectionError::Timeout { .. }) => {
                warn!(attempt, server = %server, "No response within {:?}", timeout);
                self.pool.release(connection, Outcome::TimedOut);
                op.end_attempt(&self.stats, token, true, false);
                return Step::Failover(AttemptFailure::Timeout { server, timeout });
            }
            Err(ConnectionError::Codec(source)) => {
                error!(
                    attempt,
                    server = %server,
                    "Protocol anomaly, undecodable response (version mismatch?): {}",
                    source
                );
                self.pool.release(connection, Outcome::Failed);
                op.end_attempt(&self.stats, token, false, true);
                return Step::Failover(AttemptFailure::Protocol { server, source });
            }
            Err(error) => {
                warn!(attempt, server = %server, "Receive failed: {}", error);
                self.pool.release(connection, Outcome::Failed);
                op.end_attempt(&self.stats, token, false, true);
                return Step::Failover(AttemptFailure::Transport {
                    server,
                    source: error,
                });
            }
        };

        let response_type = response.message_type();
        if op.is_error_response(response_type) || response_type.is_generic_error() {
            // The server answered; the connection is still good
            self.pool.release(connection, Outcome::Healthy);
            op.end_attempt(&self.stats, token, false, true);

            let fallback = server_error(op.kind(), &response);
            let error = match op.process_response(response) {
                Err(ResponseError::Server(error)) => error,
                Err(ResponseError::Malformed(_)) | Ok(_) => fallback,
            };
            info!(server = %server, "{} rejected by server: {}", op.kind(), error);
            return Step::Done(Err(error.into()));
        }

        match op.process_response(response) {
            Ok(output) => {
                self.pool.release(connection, Outcome::Healthy);
                op.end_attempt(&self.stats, token, false, false);
                debug!(
                    server = %server,
                    "{} completed on attempt {} in {:?}",
                    op.kind(),
                    attempt,
                    started.elapsed()
                );
                Step::Done(Ok(output))
            }
            Err(ResponseError::Server(error)) => {
                self.pool.release(connection, Outcome::Healthy);
                op.end_attempt(&self.stats, token, false, true);
                info!(server = %server, "{} rejected by server: {}", op.kind(), error);
                Step::Done(Err(error.into()))
            }
            Err(ResponseError::Malformed(source)) => {
                error!(
                    attempt,
                    server = %server,
                    "Protocol anomaly, malformed {} payload: {}",
                    op.kind(),
                    source
                );
                self.pool.release(connection, Outcome::Failed);
                op.end_attempt(&self.stats, token, false, true);
                Step::Failover(AttemptFailure::Protocol { server, source })
            }
        }
    }
}

impl std::fmt::Debug for Executor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Executor")
            .field("pool", &self.pool)
            .field("config", &self.config)
            .field("secured", &self.tokens.is_some())
            .finish()
    }
}
