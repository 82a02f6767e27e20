//! Process-wide table of running makers, one per symbol.
//!
//! A single async mutex guards the table and is held across a maker's
//! start/stop/update, so lifecycle calls for the same symbol never
//! interleave. Match events take the lock only long enough to find the
//! target maker.

use std::collections::BTreeMap;
use std::sync::Arc;

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use tokio::sync::Mutex;
use tracing::info;
use venue::{ConfStore, MatchEvent};

use crate::error::{MakerError, Result};
use crate::mm::config::{config_key, MakerConfig};
use crate::mm::maker::{Maker, MakerServices};

pub struct Registry {
    makers: Mutex<BTreeMap<String, Arc<Maker>>>,
    services: MakerServices,
    store: Arc<dyn ConfStore>,
    /// Seeds each new maker's generator.
    seeds: parking_lot::Mutex<StdRng>,
}

impl Registry {
    pub fn new(services: MakerServices, store: Arc<dyn ConfStore>) -> Self {
        Self::with_rng(services, store, StdRng::from_entropy())
    }

    /// Registry whose makers draw from generators derived from `seed`.
    pub fn with_seed(services: MakerServices, store: Arc<dyn ConfStore>, seed: u64) -> Self {
        Self::with_rng(services, store, StdRng::seed_from_u64(seed))
    }

    fn with_rng(services: MakerServices, store: Arc<dyn ConfStore>, rng: StdRng) -> Self {
        Self {
            makers: Mutex::new(BTreeMap::new()),
            services,
            store,
            seeds: parking_lot::Mutex::new(rng),
        }
    }

    /// Start every symbol whose stored config has `on` set.
    ///
    /// Symbols without a stored config are skipped. Any other failure stops
    /// the bootstrap and is returned; makers started so far keep running.
    pub async fn bootstrap(&self) -> Result<usize> {
        let mut started = 0;
        for info in self.services.engine.symbols() {
            let config = match self.load_config(&info.symbol).await {
                Ok(config) => config,
                Err(e) if e.is_config_missing() => continue,
                Err(e) => return Err(e),
            };
            if config.on {
                self.start(&info.symbol).await?;
                started += 1;
            }
        }
        info!(started, "BOOTSTRAP");
        Ok(started)
    }

    /// Start the maker for `symbol` from its stored config.
    pub async fn start(&self, symbol: &str) -> Result<()> {
        let mut makers = self.makers.lock().await;
        if makers.contains_key(symbol) {
            return Err(MakerError::AlreadyRunning(symbol.to_string()));
        }
        let config = self.load_config(symbol).await?;
        if config.symbol != symbol {
            return Err(MakerError::SymbolMismatch {
                requested: symbol.to_string(),
                stored: config.symbol,
            });
        }
        let rng = StdRng::seed_from_u64(self.seeds.lock().gen());
        let maker = Maker::start(config, self.services.clone(), rng).await?;
        makers.insert(symbol.to_string(), Arc::new(maker));
        Ok(())
    }

    /// Stop the maker for `symbol` and drop it from the table.
    pub async fn stop(&self, symbol: &str) -> Result<()> {
        let mut makers = self.makers.lock().await;
        let maker = makers
            .remove(symbol)
            .ok_or_else(|| MakerError::NotRunning(symbol.to_string()))?;
        maker.stop().await;
        Ok(())
    }

    /// Stop every running maker.
    pub async fn stop_all(&self) {
        let mut makers = self.makers.lock().await;
        while let Some((_, maker)) = makers.pop_first() {
            maker.stop().await;
        }
    }

    /// Stored config for `symbol`; `Venue(NotFound)` when none is stored.
    pub async fn load_config(&self, symbol: &str) -> Result<MakerConfig> {
        let bytes = self.store.load(&config_key(symbol)).await?;
        MakerConfig::decode(&bytes)
    }

    /// Validate and store `config`, then apply it to a running maker of the
    /// same symbol, if any.
    pub async fn update_config(&self, config: MakerConfig) -> Result<()> {
        config.validate()?;
        self.store
            .store(&config_key(&config.symbol), &config.encode()?)
            .await?;
        let makers = self.makers.lock().await;
        if let Some(maker) = makers.get(&config.symbol) {
            maker.update(config).await?;
        }
        Ok(())
    }

    pub async fn find(&self, symbol: &str) -> Option<Arc<Maker>> {
        self.makers.lock().await.get(symbol).cloned()
    }

    /// Running makers ordered by symbol.
    pub async fn list(&self) -> Vec<Arc<Maker>> {
        self.makers.lock().await.values().cloned().collect()
    }

    /// Route a match event to the maker for its symbol. Events for symbols
    /// without a running maker are dropped.
    pub async fn on_matched(&self, event: &MatchEvent) {
        if let Some(maker) = self.find(&event.symbol).await {
            maker.on_matched(event);
        }
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;
    use std::time::Duration;

    use async_trait::async_trait;
    use rust_decimal_macros::dec;
    use venue::{
        Balance, BalanceArea, Holding, Ledger, MemoryConfStore, MemoryVenue, VenueError,
    };

    use super::*;
    use crate::mm::maker::tests::{config, services, venue, USER};

    fn registry(venue: &Arc<MemoryVenue>) -> (Registry, Arc<MemoryConfStore>) {
        let store = Arc::new(MemoryConfStore::new());
        (Registry::with_seed(services(venue), store.clone(), 7), store)
    }

    async fn put(store: &MemoryConfStore, config: &MakerConfig) {
        store
            .store(&config_key(&config.symbol), &config.encode().unwrap())
            .await
            .unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_start_stop_lifecycle() {
        let venue = venue();
        let (registry, store) = registry(&venue);
        put(&store, &config("futures.YWEUSDT")).await;

        registry.start("futures.YWEUSDT").await.unwrap();
        assert!(matches!(
            registry.start("futures.YWEUSDT").await,
            Err(MakerError::AlreadyRunning(_))
        ));
        assert!(registry.find("futures.YWEUSDT").await.is_some());
        assert_eq!(registry.list().await.len(), 1);

        registry.stop("futures.YWEUSDT").await.unwrap();
        assert!(registry.find("futures.YWEUSDT").await.is_none());
        assert!(matches!(
            registry.stop("futures.YWEUSDT").await,
            Err(MakerError::NotRunning(_))
        ));
    }

    #[tokio::test]
    async fn test_start_without_config_is_not_registered() {
        let venue = venue();
        let (registry, _) = registry(&venue);
        let err = registry.start("futures.YWEUSDT").await.unwrap_err();
        assert!(err.is_config_missing());
        assert!(registry.list().await.is_empty());
    }

    #[tokio::test]
    async fn test_start_unknown_symbol_fails() {
        let venue = venue();
        let (registry, store) = registry(&venue);
        put(&store, &config("futures.NOPE")).await;
        assert!(matches!(
            registry.start("futures.NOPE").await,
            Err(MakerError::SymbolNotFound(_))
        ));
        assert!(registry.find("futures.NOPE").await.is_none());
    }

    #[tokio::test]
    async fn test_start_rejects_record_for_other_symbol() {
        let venue = venue();
        let (registry, store) = registry(&venue);
        let spot = config("spot.YWEUSDT");
        store
            .store(&config_key("futures.YWEUSDT"), &spot.encode().unwrap())
            .await
            .unwrap();

        let err = registry.start("futures.YWEUSDT").await.unwrap_err();
        assert!(matches!(
            err,
            MakerError::SymbolMismatch { ref requested, ref stored }
                if requested == "futures.YWEUSDT" && stored == "spot.YWEUSDT"
        ));
        assert!(registry.list().await.is_empty());
        assert!(venue.open_orders(USER, "spot.YWEUSDT").is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_bootstrap_starts_only_enabled() {
        let venue = venue();
        let (registry, store) = registry(&venue);
        let mut on = config("futures.YWEUSDT");
        on.on = true;
        put(&store, &on).await;
        put(&store, &config("spot.YWEUSDT")).await;

        assert_eq!(registry.bootstrap().await.unwrap(), 1);
        let running: Vec<_> = registry
            .list()
            .await
            .iter()
            .map(|m| m.symbol().to_string())
            .collect();
        assert_eq!(running, vec!["futures.YWEUSDT"]);
        registry.stop_all().await;
        assert!(registry.list().await.is_empty());
    }

    #[tokio::test]
    async fn test_bootstrap_aborts_on_corrupt_record() {
        let venue = venue();
        let (registry, store) = registry(&venue);
        store.store("maker-futures.YWEUSDT", b"not json").await.unwrap();
        assert!(matches!(
            registry.bootstrap().await,
            Err(MakerError::Json(_))
        ));
    }

    #[tokio::test]
    async fn test_update_config_validates_before_storing() {
        let venue = venue();
        let (registry, _) = registry(&venue);
        let mut bad = config("futures.YWEUSDT");
        bad.ticker = dec!(0);
        assert!(matches!(
            registry.update_config(bad).await,
            Err(MakerError::InvalidConfig(_))
        ));
        assert!(registry
            .load_config("futures.YWEUSDT")
            .await
            .unwrap_err()
            .is_config_missing());
    }

    #[tokio::test(start_paused = true)]
    async fn test_update_then_stop_leaves_no_entry() {
        let venue = venue();
        let (registry, store) = registry(&venue);
        put(&store, &config("futures.YWEUSDT")).await;
        registry.start("futures.YWEUSDT").await.unwrap();
        tokio::time::sleep(Duration::from_millis(250)).await;

        let mut next = config("futures.YWEUSDT");
        next.delay_ms = 50;
        next.depth.qty_max = dec!(2);
        registry.update_config(next.clone()).await.unwrap();
        let maker = registry.find("futures.YWEUSDT").await.unwrap();
        assert_eq!(maker.config(), next);
        assert_eq!(registry.load_config("futures.YWEUSDT").await.unwrap(), next);

        tokio::time::timeout(Duration::from_secs(5), registry.stop("futures.YWEUSDT"))
            .await
            .expect("stop deadlocked")
            .unwrap();
        assert!(registry.find("futures.YWEUSDT").await.is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_events_route_to_maker() {
        let venue = venue();
        let (registry, store) = registry(&venue);
        put(&store, &config("futures.YWEUSDT")).await;
        registry.start("futures.YWEUSDT").await.unwrap();

        let mut rx = venue.subscribe_events();
        tokio::time::sleep(Duration::from_millis(150)).await;
        // Quiesce the loops so no new orders race the assertions.
        let maker = registry.find("futures.YWEUSDT").await.unwrap();
        maker.stop().await;

        while let Ok(event) = rx.try_recv() {
            registry.on_matched(&event).await;
        }
        assert!(maker.snapshot().open_orders > 0);
        assert_eq!(
            maker.snapshot().open_orders,
            venue.open_orders(USER, "futures.YWEUSDT").len()
        );
        registry.stop("futures.YWEUSDT").await.unwrap();
    }

    /// Ledger that fails every read.
    struct BrokenLedger;

    #[async_trait]
    impl Ledger for BrokenLedger {
        async fn touch_balance(&self, _: i64, _: BalanceArea, _: &[String]) -> venue::Result<()> {
            Ok(())
        }

        async fn list_balances(
            &self,
            _: i64,
            _: BalanceArea,
        ) -> venue::Result<HashMap<String, Balance>> {
            Err(VenueError::Rejected("ledger offline".into()))
        }

        async fn touch_holding(&self, _: i64, _: &[String]) -> venue::Result<()> {
            Ok(())
        }

        async fn find_holding(&self, _: i64, _: &str) -> venue::Result<Option<Holding>> {
            Ok(None)
        }
    }

    #[tokio::test]
    async fn test_ledger_failure_aborts_start() {
        let venue = venue();
        let store = Arc::new(MemoryConfStore::new());
        let registry = Registry::with_seed(
            MakerServices::new(venue.clone(), Arc::new(BrokenLedger)),
            store.clone(),
            1,
        );
        let mut on = config("futures.YWEUSDT");
        on.on = true;
        put(&store, &on).await;

        assert!(matches!(
            registry.bootstrap().await,
            Err(MakerError::Venue(VenueError::Rejected(_)))
        ));
        assert!(registry.list().await.is_empty());
    }
}
