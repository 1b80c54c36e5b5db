use std::sync::Arc;

use stockade_core::cache::{PrincipalCache, RedisPool, TokenBlacklist};
use stockade_core::{Config, Database, ExpirySweeper, ReservationCoordinator, StockLedger};

use crate::middleware::RateLimiters;

#[derive(Clone)]
pub struct AppState {
    pub db: Database,
    pub ledger: StockLedger,
    pub coordinator: Arc<ReservationCoordinator>,
    pub sweeper: Arc<ExpirySweeper>,
    pub config: Arc<Config>,
    pub redis: Option<RedisPool>,
    pub rate_limiters: Arc<RateLimiters>,
    pub token_blacklist: Option<Arc<TokenBlacklist>>,
    pub principal_cache: Option<Arc<PrincipalCache>>,
}
