//! Strategy session runner.
//!
//! Owns the gateway event stream for one (strategy, symbol) pair and
//! drives bars through the signal pipeline into the execution engine.

use super::build_cancel_policy;
use crate::config::Config;
use crate::execution::{EngineSettings, ExecutionError, OrderEngine, StrategyIdentity};
use crate::gateway::{Bar, EventReceiver, Gateway, GatewayEvent, Instrument};
use crate::signal::{
    fetch_history_with_retry, HistoryRequest, PipelineState, SignalPipeline, Strategy, TradeSignal,
};
use crate::sinks::{AlertLevel, Notification, Notifier, TradeLogSink, TradeSignalRecord};
use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info, warn};

/// Counters reported at heartbeat and shutdown.
#[derive(Debug, Clone, Serialize)]
pub struct RunnerStats {
    pub started_at: DateTime<Utc>,
    pub bars: u64,
    pub signals: u64,
    pub brackets_placed: u64,
    pub signals_rejected: u64,
    pub placement_failures: u64,
    pub order_events: u64,
    pub ticks: u64,
    pub syncs: u64,
}

impl Default for RunnerStats {
    fn default() -> Self {
        Self {
            started_at: Utc::now(),
            bars: 0,
            signals: 0,
            brackets_placed: 0,
            signals_rejected: 0,
            placement_failures: 0,
            order_events: 0,
            ticks: 0,
            syncs: 0,
        }
    }
}

/// Runs one strategy against one symbol on a gateway session.
pub struct StrategyRunner<G: Gateway + 'static> {
    config: Config,
    identity: StrategyIdentity,
    gateway: Arc<G>,
    engine: Arc<OrderEngine<G>>,
    pipeline: SignalPipeline,
    events: EventReceiver,
    trade_log: Arc<dyn TradeLogSink>,
    notifier: Arc<dyn Notifier>,
    instrument: Option<Instrument>,
    stats: RunnerStats,
}

impl<G: Gateway + 'static> StrategyRunner<G> {
    pub fn new(
        config: Config,
        gateway: Arc<G>,
        events: EventReceiver,
        strategy: Box<dyn Strategy>,
        trade_log: Arc<dyn TradeLogSink>,
        notifier: Arc<dyn Notifier>,
    ) -> Self {
        let identity = StrategyIdentity::new(&config.bot.strategy_name, &config.bot.symbol);
        let pipeline = SignalPipeline::new(
            &config.bot.symbol,
            strategy,
            config.signal.historical_window,
            config.signal.min_data_points,
        );

        let mut engine = OrderEngine::new(gateway.clone(), EngineSettings::from_config(&config))
            .with_trade_log(trade_log.clone())
            .with_notifier(notifier.clone());
        if let Some(policy) = build_cancel_policy(&config.monitoring) {
            engine = engine.with_cancel_policy(policy);
        }

        Self {
            config,
            identity,
            gateway,
            engine: Arc::new(engine),
            pipeline,
            events,
            trade_log,
            notifier,
            instrument: None,
            stats: RunnerStats::default(),
        }
    }

    pub fn identity(&self) -> &StrategyIdentity {
        &self.identity
    }

    pub fn engine(&self) -> &Arc<OrderEngine<G>> {
        &self.engine
    }

    pub fn stats(&self) -> &RunnerStats {
        &self.stats
    }

    pub fn pipeline_state(&self) -> PipelineState {
        self.pipeline.state()
    }

    /// Connect, qualify the instrument, bootstrap history and subscribe
    /// to bars. Connection and qualification failures are fatal.
    pub async fn start(&mut self) -> Result<()> {
        info!(identity = %self.identity, tag = %self.identity.tag(), "🚀 [START] Starting strategy session");

        if let Err(e) = self.gateway.connect().await {
            self.notifier.notify(
                Notification::new(AlertLevel::Critical, "Gateway connection failed")
                    .with_symbol(&self.identity.symbol)
                    .with_error(e.to_string()),
            );
            return Err(e).context("Failed to connect to gateway");
        }

        let bot = &self.config.bot;
        let instrument = match self
            .engine
            .resolve_instrument(&bot.symbol, bot.asset_class, &bot.exchange)
            .await
        {
            Ok(instrument) => instrument,
            Err(e) => {
                self.notifier.notify(
                    Notification::new(AlertLevel::Critical, "Instrument qualification failed")
                        .with_symbol(&self.identity.symbol)
                        .with_error(e.to_string()),
                );
                return Err(e).context("Failed to qualify instrument");
            }
        };

        let request = HistoryRequest {
            bar_count: self.config.history.bar_count,
            max_retries: self.config.history.max_retries,
            backoff: Duration::from_millis(self.config.history.retry_backoff_ms),
        };
        match fetch_history_with_retry(
            self.gateway.as_ref(),
            &instrument,
            &self.config.bot.timeframe,
            request,
        )
        .await
        {
            Ok(bars) => {
                if let Err(e) = self.pipeline.seed(bars) {
                    warn!(error = %e, "⚠️  [START] Failed to evaluate history, starting flat");
                }
            }
            Err(e) => {
                error!(error = %e, "❌ [START] Historical data unavailable, warming up from live bars");
                self.notifier.notify(
                    Notification::new(AlertLevel::Warning, "Historical data unavailable")
                        .with_symbol(&self.identity.symbol)
                        .with_error(e.to_string()),
                );
            }
        }

        self.gateway
            .subscribe_bars(&instrument, &self.config.bot.timeframe)
            .await
            .context("Failed to subscribe to bars")?;
        self.instrument = Some(instrument);

        self.sync().await;
        self.notifier.notify(
            Notification::new(AlertLevel::Info, "Strategy session started")
                .with_symbol(&self.identity.symbol)
                .with_strategy(&self.identity.strategy_name),
        );
        Ok(())
    }

    /// Process events until `shutdown` resolves, then stop monitoring and
    /// disconnect.
    pub async fn run<F>(&mut self, shutdown: F) -> Result<RunnerStats>
    where
        F: Future<Output = ()>,
    {
        tokio::pin!(shutdown);

        let monitoring = &self.config.monitoring;
        let mut sync_timer =
            tokio::time::interval(Duration::from_secs(monitoring.sync_interval_secs.max(1)));
        let mut heartbeat =
            tokio::time::interval(Duration::from_secs(monitoring.heartbeat_secs.max(1)));
        // both fire immediately otherwise
        sync_timer.tick().await;
        heartbeat.tick().await;

        info!("━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━");
        loop {
            tokio::select! {
                biased;
                event = self.events.recv() => match event {
                    Some(event) => self.dispatch(event).await,
                    None => {
                        warn!("Gateway event stream closed");
                        break;
                    }
                },
                _ = &mut shutdown => {
                    info!("🛑 Shutdown signal received");
                    break;
                }
                _ = sync_timer.tick() => self.sync().await,
                _ = heartbeat.tick() => self.log_status().await,
            }
        }

        self.shutdown().await;
        Ok(self.stats.clone())
    }

    /// Handle every event already queued, without waiting for more.
    pub async fn drain_events(&mut self) -> usize {
        let mut handled = 0;
        while let Ok(event) = self.events.try_recv() {
            self.dispatch(event).await;
            handled += 1;
        }
        handled
    }

    async fn dispatch(&mut self, event: GatewayEvent) {
        match event {
            GatewayEvent::Bar { symbol, bar } => {
                if symbol == self.identity.symbol {
                    self.on_bar(bar).await;
                }
            }
            GatewayEvent::Tick(tick) => {
                self.stats.ticks += 1;
                let engine = self.engine.clone();
                tokio::spawn(async move {
                    engine.handle_tick(&tick.symbol, &tick).await;
                });
            }
            GatewayEvent::OrderStatus(update) | GatewayEvent::Cancelled(update) => {
                self.stats.order_events += 1;
                self.engine.on_order_update(&update).await;
            }
            GatewayEvent::Fill(fill) => {
                self.stats.order_events += 1;
                self.engine.on_fill(&fill).await;
            }
            GatewayEvent::ConnectionLost { reason } => {
                error!(%reason, "🚨 [GATEWAY] Connection lost");
                self.notifier.notify(
                    Notification::new(AlertLevel::Critical, "Gateway connection lost")
                        .with_symbol(&self.identity.symbol)
                        .with_error(reason),
                );
            }
            GatewayEvent::ConnectionRestored => {
                info!("✅ [GATEWAY] Connection restored, reconciling");
                self.notifier.notify(
                    Notification::new(AlertLevel::Info, "Gateway connection restored")
                        .with_symbol(&self.identity.symbol),
                );
                self.sync().await;
            }
            GatewayEvent::Error { code, message } => {
                warn!(code, %message, "⚠️  [GATEWAY] Error reported");
            }
        }
    }

    async fn on_bar(&mut self, bar: Bar) {
        self.stats.bars += 1;
        debug!(time = %bar.time, close = %bar.close, "Bar received");

        let signal = match self.pipeline.process_new_bar(bar) {
            Ok(Some(signal)) => signal,
            Ok(None) => return,
            Err(e) => {
                error!(error = %e, "❌ [SIGNAL] Signal evaluation failed, no order placed");
                self.notifier.notify(
                    Notification::new(AlertLevel::Warning, "Signal evaluation failed")
                        .with_symbol(&self.identity.symbol)
                        .with_strategy(&self.identity.strategy_name)
                        .with_error(e.to_string()),
                );
                return;
            }
        };
        self.stats.signals += 1;

        let rejection = match self.engine.place_bracket(&signal, &self.identity).await {
            Ok(group) => {
                self.stats.brackets_placed += 1;
                self.notifier.notify(
                    Notification::new(AlertLevel::Info, "Bracket order placed")
                        .with_symbol(&group.symbol)
                        .with_strategy(&self.identity.strategy_name)
                        .with_message(format!(
                            "{} entry {} / TP {} / SL {}",
                            group.direction, group.entry_price, group.take_profit, group.stop_loss
                        ))
                        .with_order(group.parent_order_id, Some(group.entry_price), group.quantity),
                );
                if let Err(e) = self.engine.start_monitoring(&group).await {
                    self.notifier.notify(
                        Notification::new(AlertLevel::Error, "Bracket monitoring failed")
                            .with_symbol(&group.symbol)
                            .with_error(e.to_string()),
                    );
                }
                None
            }
            Err(e) if e.is_recoverable() => {
                self.stats.signals_rejected += 1;
                Some(e)
            }
            Err(e) => {
                self.stats.placement_failures += 1;
                error!(error = %e, "❌ [ORDER] Bracket placement failed");
                self.notifier.notify(
                    Notification::new(AlertLevel::Error, "Bracket placement failed")
                        .with_symbol(&self.identity.symbol)
                        .with_strategy(&self.identity.strategy_name)
                        .with_error(e.to_string()),
                );
                Some(e)
            }
        };

        self.record_signal(&signal, rejection.as_ref()).await;
    }

    async fn record_signal(&self, signal: &TradeSignal, rejection: Option<&ExecutionError>) {
        let count = self.engine.active_trade_count(&self.identity).await;
        self.trade_log.trade_signal(TradeSignalRecord {
            bot_name: self.config.bot.name.clone(),
            symbol: self.identity.symbol.clone(),
            strategy_name: self.identity.strategy_name.clone(),
            timeframe: self.config.bot.timeframe.clone(),
            action: signal.direction.entry_action().to_string(),
            entry_price: signal.entry_price,
            take_profit: signal.take_profit,
            stop_loss: signal.stop_loss,
            confidence: signal.confidence.as_str().to_string(),
            indicators: signal.indicators.clone(),
            current_active_trades: count.count,
            max_concurrent_trades: self.config.bot.max_concurrent_trades,
            order_placed: rejection.is_none(),
            rejection_reason: rejection.map(|e| e.reason().to_string()),
            signal_time: signal.generated_at,
        });
    }

    async fn sync(&mut self) {
        self.stats.syncs += 1;
        if let Err(e) = self.engine.sync(&self.identity).await {
            warn!(error = %e, "⚠️  [SYNC] Reconciliation skipped");
        }
    }

    async fn log_status(&self) {
        let snapshot = self.engine.snapshot().await;
        let state = self.pipeline.state();
        info!(
            contract_id = ?self.instrument.as_ref().map(|i| i.contract_id),
            tracked = snapshot.tracked_orders,
            monitored = snapshot.monitored_orders,
            groups = snapshot.groups,
            positions = snapshot.positions.len(),
            signal = ?state.current_signal,
            data_points = state.data_points,
            bars = self.stats.bars,
            brackets = self.stats.brackets_placed,
            "📊 [STATUS] Heartbeat"
        );
        for position in &snapshot.positions {
            info!(
                symbol = %position.symbol,
                direction = %position.direction,
                size = %position.size,
                entry = %position.entry_price,
                pnl = %position.unrealized_pnl,
                "   Position"
            );
        }
    }

    async fn shutdown(&mut self) {
        self.engine.stop_monitoring(&self.identity.symbol).await;

        let uptime = Utc::now() - self.stats.started_at;
        info!("━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━");
        info!(
            uptime_secs = uptime.num_seconds(),
            bars = self.stats.bars,
            signals = self.stats.signals,
            placed = self.stats.brackets_placed,
            rejected = self.stats.signals_rejected,
            failed = self.stats.placement_failures,
            "📈 [SUMMARY] Session finished"
        );

        if let Err(e) = self.gateway.disconnect().await {
            warn!(error = %e, "Gateway disconnect failed");
        }
    }
}
