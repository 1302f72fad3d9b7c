//! Reconciling local order state against venue updates

use common::{
    is_diverged, is_forward, is_forward_cancellation, CoreError, Execution, Market, Order,
    OrderParams, Trade,
};
use rustc_hash::{FxHashMap, FxHashSet};
use tracing::{debug, warn};

/// One update learned from the venue: an order snapshot, optionally
/// carrying the execution trade that produced it.
#[derive(Clone, Debug)]
pub struct VenueUpdate {
    /// Remote order snapshot
    pub order: Order,
    /// Execution trade attached to the update, if any
    pub trade: Option<Trade>,
}

/// A locally-owned order extended with reconciliation bookkeeping.
#[derive(Clone, Debug)]
pub struct ReconOrder {
    /// Local source of truth, advanced only by ingested trades and
    /// legal status propagation
    pub order: Order,
    /// Ids of execution trades already folded in; duplicates are no-ops
    pub ingested_trade_ids: FxHashSet<String>,
    /// Most forward execution snapshot seen from the venue
    pub remote_execution: Option<Execution>,
}

impl ReconOrder {
    /// Wrap a freshly-opened local order.
    #[must_use]
    pub fn new(order: Order) -> Self {
        Self {
            order,
            ingested_trade_ids: FxHashSet::default(),
            remote_execution: None,
        }
    }

    /// Whether the local and remote views disagree.
    ///
    /// Remote ahead in size means trades are missing locally; remote
    /// behind or diverged means the source of truth and the local fold
    /// no longer describe the same order.
    #[must_use]
    pub fn is_out_of_sync(&self) -> bool {
        self.remote_execution.as_ref().is_some_and(|remote| {
            remote.size != self.order.execution.size
                || is_diverged(remote, &self.order.execution)
        })
    }

    /// Fold one venue update into the local order.
    pub fn apply_update(&mut self, update: &VenueUpdate, market: &Market) -> Result<(), CoreError> {
        // 1. ingest the attached trade unless it was already seen
        if let Some(trade) = &update.trade {
            if self.ingested_trade_ids.contains(&trade.id) {
                debug!(order = %self.order.id, trade = %trade.id, "duplicate trade skipped");
            } else {
                self.order.ingest_trade(trade, market)?;
                self.ingested_trade_ids.insert(trade.id.clone());
            }
        }

        // 2. remember the most forward remote snapshot; once one is held,
        //    it only ever moves forward
        let candidate = &update.order.execution;
        let local = &self.order.execution;
        let keeps_pace =
            candidate.size == local.size && candidate.status == local.status;
        let store = match &self.remote_execution {
            None => is_forward(local, candidate) || keeps_pace,
            Some(stored) => is_forward(stored, candidate),
        };
        if store {
            self.remote_execution = Some(candidate.clone());
        } else if is_diverged(candidate, local) {
            warn!(order = %self.order.id, "diverged venue snapshot");
        }

        // 3. propagate the remote status once every trade it accounts for
        //    has arrived locally
        if let Some(remote) = &self.remote_execution {
            if remote.size == self.order.execution.size
                && remote.status != self.order.execution.status
                && self
                    .order
                    .execution
                    .status
                    .can_transition(remote.status)
            {
                self.order.transition(remote.status)?;
            }
        }

        // 4. adopt a forward cancellation
        if is_forward_cancellation(self.order.cancellation, update.order.cancellation) {
            self.order.cancellation = update.order.cancellation;
        }

        Ok(())
    }
}

/// All reconciled orders of one market, keyed by order id.
#[derive(Clone, Debug)]
pub struct OrderIndex {
    market: Market,
    orders: FxHashMap<String, ReconOrder>,
}

impl OrderIndex {
    /// Empty index for a market.
    #[must_use]
    pub fn new(market: Market) -> Self {
        Self {
            market,
            orders: FxHashMap::default(),
        }
    }

    /// The market this index reconciles.
    #[must_use]
    pub const fn market(&self) -> &Market {
        &self.market
    }

    /// Number of tracked orders.
    #[must_use]
    pub fn len(&self) -> usize {
        self.orders.len()
    }

    /// Whether no orders are tracked.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.orders.is_empty()
    }

    /// Track a locally-opened order.
    pub fn insert(&mut self, order: Order) -> Result<(), CoreError> {
        if self.orders.contains_key(&order.id) {
            return Err(CoreError::invalid_params(format!(
                "order {} already tracked",
                order.id
            )));
        }
        self.orders.insert(order.id.clone(), ReconOrder::new(order));
        Ok(())
    }

    /// Look up a tracked order.
    #[must_use]
    pub fn get(&self, id: &str) -> Option<&ReconOrder> {
        self.orders.get(id)
    }

    /// Stop tracking an order, returning its final state.
    pub fn remove(&mut self, id: &str) -> Option<ReconOrder> {
        self.orders.remove(id)
    }

    /// Fold one venue update into its order.
    ///
    /// An update for an unknown id starts tracking a fresh local order
    /// with the update's parameters; its execution still has to be
    /// reconstructed trade by trade.
    pub fn apply_update(&mut self, update: &VenueUpdate) -> Result<(), CoreError> {
        let market = self.market.clone();
        let entry = self
            .orders
            .entry(update.order.id.clone())
            .or_insert_with(|| {
                let params: OrderParams = update.order.params.clone();
                ReconOrder::new(Order::new(
                    update.order.id.clone(),
                    update.order.symbol.clone(),
                    params,
                ))
            });
        entry.apply_update(update, &market)
    }

    /// Orders whose remote and local views disagree.
    ///
    /// The caller polls this to decide which orders to refetch from the
    /// venue.
    #[must_use]
    pub fn out_of_sync_orders(&self) -> Vec<&ReconOrder> {
        let mut out: Vec<&ReconOrder> = self
            .orders
            .values()
            .filter(|o| o.is_out_of_sync())
            .collect();
        out.sort_by(|a, b| a.order.id.cmp(&b.order.id));
        out
    }
}
